use super::*;
use crate::logfile::{self, LogBuffer, LogCommand};
use crate::entries::TimeValue;

/// A log flushed but never run is exactly what a crash leaves
/// behind; running it later must produce the final state.
#[test]
fn crashed_log_replays_to_completion() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    versioned_file(&anchor, "a.txt", b"old\n", None, 3);
    let adm = access.retrieve(&anchor)?;

    // Stage a new text-base by hand and journal its installation,
    // as install_file would.
    let wc_path = path::join(&anchor, "a.txt");
    std::fs::write(pristine::text_base_path(&wc_path, true), b"new\n")?;
    let mut log = LogBuffer::new();
    log.push(LogCommand::CpAndTranslate {
        name: pristine::text_base_rel("a.txt", true),
        dest: "a.txt".to_string(),
    });
    log.push(LogCommand::ModifyEntry {
        name: "a.txt".to_string(),
        update: EntryUpdate {
            revision: Some(4),
            text_time: Some(TimeValue::Working),
            ..Default::default()
        },
    });
    log.push(LogCommand::Mv {
        name: pristine::text_base_rel("a.txt", true),
        dest: pristine::text_base_rel("a.txt", false),
    });
    log.push(LogCommand::Readonly {
        name: pristine::text_base_rel("a.txt", false),
    });
    log.flush(&adm)?;

    // "Crash": nothing has run yet.
    assert!(logfile::log_file_present(&anchor));
    assert_eq!(read_file(&anchor, "a.txt"), b"old\n");

    logfile::run_log(&adm, None, None)?;
    assert!(!logfile::log_file_present(&anchor));
    assert_eq!(read_file(&anchor, "a.txt"), b"new\n");
    assert_eq!(
        std::fs::read(pristine::text_base_path(&wc_path, false))?,
        b"new\n"
    );
    assert_eq!(entry_of(&anchor, "a.txt").unwrap().revision, Some(4));
    Ok(())
}

/// Replaying a log whose commands already (partially) ran converges
/// on the same state: sources consumed by the rotation are skipped.
#[test]
fn replay_is_idempotent() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    versioned_file(&anchor, "a.txt", b"old\n", None, 3);
    let adm = access.retrieve(&anchor)?;

    let wc_path = path::join(&anchor, "a.txt");
    std::fs::write(pristine::text_base_path(&wc_path, true), b"new\n")?;
    let mut log = LogBuffer::new();
    log.push(LogCommand::CpAndTranslate {
        name: pristine::text_base_rel("a.txt", true),
        dest: "a.txt".to_string(),
    });
    log.push(LogCommand::ModifyEntry {
        name: "a.txt".to_string(),
        update: EntryUpdate {
            revision: Some(4),
            ..Default::default()
        },
    });
    log.push(LogCommand::Mv {
        name: pristine::text_base_rel("a.txt", true),
        dest: pristine::text_base_rel("a.txt", false),
    });
    let serialized = log.serialize();
    log.flush(&adm)?;
    logfile::run_log(&adm, None, None)?;

    // Simulate the log surviving a crash *after* every command ran
    // but before the file was removed.
    adm::write_adm_file(&anchor, adm::ADM_LOG, serialized.as_bytes())?;
    logfile::run_log(&adm, None, None)?;

    assert_eq!(read_file(&anchor, "a.txt"), b"new\n");
    assert_eq!(
        std::fs::read(pristine::text_base_path(&wc_path, false))?,
        b"new\n"
    );
    assert_eq!(entry_of(&anchor, "a.txt").unwrap().revision, Some(4));
    assert!(!logfile::log_file_present(&anchor));
    Ok(())
}

/// delete-entry replay after the physical removal already happened
/// only has the entry left to drop.
#[test]
fn delete_replay_tolerates_missing_target() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    versioned_file(&anchor, "gone.txt", b"x\n", None, 3);
    let adm = access.retrieve(&anchor)?;
    let mut log = LogBuffer::new();
    log.push(LogCommand::DeleteEntry {
        name: "gone.txt".to_string(),
    });
    log.flush(&adm)?;
    // The working file vanished before the crash.
    std::fs::remove_file(path::join(&anchor, "gone.txt"))?;
    logfile::run_log(&adm, None, None)?;
    assert!(entry_of(&anchor, "gone.txt").is_none());
    // And running with nothing left is a no-op.
    logfile::run_log(&adm, None, None)?;
    Ok(())
}

/// The log file format survives a write/parse round trip through
/// the file system, including escaping.
#[test]
fn log_file_reparses() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    let adm = access.retrieve(&anchor)?;
    let mut log = LogBuffer::new();
    log.push(LogCommand::ModifyWcprop {
        name: "weird \"name\" & co".to_string(),
        propname: "vn:wc:x".to_string(),
        propval: Some("<value>".to_string()),
    });
    log.flush(&adm)?;
    let text = std::fs::read_to_string(adm::adm_path(&anchor, false, adm::ADM_LOG))?;
    let parsed = logfile::parse_log(&anchor, &text)?;
    assert_eq!(
        parsed,
        vec![LogCommand::ModifyWcprop {
            name: "weird \"name\" & co".to_string(),
            propname: "vn:wc:x".to_string(),
            propval: Some("<value>".to_string()),
        }]
    );
    logfile::discard_log(&anchor);
    Ok(())
}
