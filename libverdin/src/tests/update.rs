use super::*;
use crate::notify::{NotifyAction, NotifyState};

/// Fresh checkout of a single file: the text lands, the entry
/// carries the new revision and checksum, the root ends complete.
#[test]
fn checkout_single_file() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(0);
    let (collected, notify) = Collected::new();
    let mut ed = editor_for(&anchor, None, 7, &access, Some(notify));

    let root = ed.open_root(None)?;
    let hello = ed.add_file("hello.txt", &root, None)?;
    send_text(&mut ed, &hello, b"hi\n", None)?;
    ed.close_file(hello, Some("764efa883dda1e11db47671c4a3bbd9e"))?;
    ed.close_directory(root)?;
    ed.close_edit()?;

    assert_eq!(read_file(&anchor, "hello.txt"), b"hi\n");
    let entry = entry_of(&anchor, "hello.txt").unwrap();
    assert_eq!(entry.revision, Some(7));
    assert_eq!(
        entry.checksum.as_deref(),
        Some("764efa883dda1e11db47671c4a3bbd9e")
    );
    let this = entry_of(&anchor, "").unwrap();
    assert!(!this.incomplete);
    assert_eq!(this.revision, Some(7));

    let notifications = collected.notifications.borrow();
    assert!(notifications
        .iter()
        .any(|n| n.action == NotifyAction::UpdateAdd && n.path.ends_with("hello.txt")));
    assert!(matches!(
        notifications.last().unwrap().action,
        NotifyAction::UpdateCompleted
    ));
    Ok(())
}

/// Update over a local edit, disjoint regions: clean three-way
/// merge, `merged` state, revision bumped.
#[test]
fn update_merges_local_edit() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    versioned_file(
        &anchor,
        "a.txt",
        b"line1\nline2\nline3\n",
        Some(b"line1\nLOCAL\nline3\n"),
        3,
    );
    let (collected, notify) = Collected::new();
    let mut ed = editor_for(&anchor, None, 4, &access, Some(notify));

    let root = ed.open_root(Some(3))?;
    let f = ed.open_file("a.txt", &root, Some(3))?;
    let new_text = b"line1\nline2\nline3modified\n";
    send_text(&mut ed, &f, new_text, None)?;
    ed.close_file(f, Some(&pristine::md5_hex(new_text)))?;
    ed.close_directory(root)?;
    ed.close_edit()?;

    assert_eq!(read_file(&anchor, "a.txt"), b"line1\nLOCAL\nline3modified\n");
    let entry = entry_of(&anchor, "a.txt").unwrap();
    assert_eq!(entry.revision, Some(4));
    let n = collected
        .notifications
        .borrow()
        .iter()
        .find(|n| n.path.ends_with("a.txt"))
        .cloned()
        .unwrap();
    assert_eq!(n.content_state, NotifyState::Merged);
    // The new pristine is in place too.
    assert_eq!(
        std::fs::read(pristine::text_base_path(
            &path::join(&anchor, "a.txt"),
            false
        ))?,
        new_text
    );
    Ok(())
}

/// Update over a local edit of the same line: conflict markers in
/// the working file, backups on disk, entry marked conflicted.
#[test]
fn update_conflicts_on_overlap() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    versioned_file(
        &anchor,
        "a.txt",
        b"line1\nline2\nline3\n",
        Some(b"line1\nLOCAL\nline3\n"),
        3,
    );
    let (collected, notify) = Collected::new();
    let mut ed = editor_for(&anchor, None, 4, &access, Some(notify));

    let root = ed.open_root(Some(3))?;
    let f = ed.open_file("a.txt", &root, Some(3))?;
    send_text(&mut ed, &f, b"line1\nSERVER\nline3\n", None)?;
    ed.close_file(f, None)?;
    ed.close_directory(root)?;
    ed.close_edit()?;

    let text = String::from_utf8(read_file(&anchor, "a.txt"))?;
    assert!(text.contains("<<<<<<<"), "no conflict markers in {:?}", text);
    assert!(text.contains("LOCAL") && text.contains("SERVER"));

    let entry = entry_of(&anchor, "a.txt").unwrap();
    let (text_conflict, _) = entry.is_conflicted(&anchor);
    assert!(text_conflict);
    assert!(adm::disk_kind(&path::join(&anchor, "a.txt.mine")) != adm::DiskKind::None);
    assert!(adm::disk_kind(&path::join(&anchor, "a.txt.r3")) != adm::DiskKind::None);
    assert!(adm::disk_kind(&path::join(&anchor, "a.txt.r4")) != adm::DiskKind::None);
    let n = collected
        .notifications
        .borrow()
        .iter()
        .find(|n| n.path.ends_with("a.txt"))
        .cloned()
        .unwrap();
    assert_eq!(n.content_state, NotifyState::Conflicted);
    // The pre-merge working content survives in the backup.
    assert_eq!(read_file(&anchor, "a.txt.mine"), b"line1\nLOCAL\nline3\n");
    Ok(())
}

/// An update that never touches a locally modified file leaves its
/// working bytes alone.
#[test]
fn untouched_local_mods_survive() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    versioned_file(&anchor, "keep.txt", b"base\n", Some(b"edited\n"), 3);
    versioned_file(&anchor, "other.txt", b"x\n", None, 3);
    let mut ed = editor_for(&anchor, None, 4, &access, None);

    let root = ed.open_root(Some(3))?;
    let f = ed.open_file("other.txt", &root, Some(3))?;
    send_text(&mut ed, &f, b"y\n", None)?;
    ed.close_file(f, None)?;
    ed.close_directory(root)?;
    ed.close_edit()?;

    assert_eq!(read_file(&anchor, "keep.txt"), b"edited\n");
    assert_eq!(read_file(&anchor, "other.txt"), b"y\n");
    // Both entries still moved to the new revision.
    assert_eq!(entry_of(&anchor, "keep.txt").unwrap().revision, Some(4));
    assert_eq!(entry_of(&anchor, "other.txt").unwrap().revision, Some(4));
    Ok(())
}

/// Deleting the update target leaves a tombstone at the new
/// revision, and completion does not sweep it.
#[test]
fn target_deletion_leaves_tombstone() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(9);
    let gone = versioned_dir(&anchor, "gone", 9, &access);
    let (collected, notify) = Collected::new();
    let mut ed = editor_for(&anchor, Some("gone"), 10, &access, Some(notify));

    let root = ed.open_root(Some(9))?;
    ed.delete_entry("gone", None, &root)?;
    ed.close_directory(root)?;
    ed.close_edit()?;

    assert_eq!(adm::disk_kind(&gone), adm::DiskKind::None);
    let entry = entry_of(&anchor, "gone").unwrap();
    assert!(entry.deleted);
    assert_eq!(entry.revision, Some(10));
    assert!(!entry_of(&anchor, "").unwrap().incomplete);
    assert!(collected
        .notifications
        .borrow()
        .iter()
        .any(|n| n.action == NotifyAction::UpdateDelete));
    Ok(())
}

/// A declared checksum that does not match the reconstructed text
/// fails the close.
#[test]
fn checksum_mismatch_fails_close() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(0);
    let mut ed = editor_for(&anchor, None, 1, &access, None);
    let root = ed.open_root(None)?;
    let f = ed.add_file("hello.txt", &root, None)?;
    send_text(&mut ed, &f, b"hi\n", None)?;
    match ed.close_file(f, Some("00000000000000000000000000000000")) {
        Err(EditError::ChecksumMismatch { .. }) => {}
        other => panic!("expected checksum mismatch, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

/// A corrupted pristine is caught before any window is applied.
#[test]
fn corrupt_text_base_detected() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    versioned_file(&anchor, "a.txt", b"pristine\n", None, 3);
    // Scribble over the text-base behind the entry's back.
    std::fs::write(
        pristine::text_base_path(&path::join(&anchor, "a.txt"), false),
        b"tampered\n",
    )?;
    let mut ed = editor_for(&anchor, None, 4, &access, None);
    let root = ed.open_root(Some(3))?;
    let f = ed.open_file("a.txt", &root, Some(3))?;
    match ed.apply_textdelta(&f, None) {
        Err(EditError::CorruptTextBase { .. }) => {}
        other => panic!("expected corrupt text base, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

/// With use-commit-times, the committed-date entry prop stamps the
/// freshly added working file.
#[test]
fn commit_times_stamp_new_files() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(0);
    let mut ed = crate::editor::update_editor(EditorParams {
        anchor: anchor.clone(),
        target: None,
        target_revision: 5,
        use_commit_times: true,
        recurse: true,
        notify: None,
        cancel: None,
        diff3_cmd: None,
        traversal_info: None,
        access: access.clone(),
    });
    ed.set_target_revision(5)?;
    let root = ed.open_root(None)?;
    let f = ed.add_file("dated.txt", &root, None)?;
    ed.change_file_prop(&f, props::PROP_ENTRY_COMMITTED_DATE, Some("2004-02-01T10:00:00+00:00"))?;
    send_text(&mut ed, &f, b"contents\n", None)?;
    ed.close_file(f, None)?;
    ed.close_directory(root)?;
    ed.close_edit()?;

    let mtime = std::fs::metadata(path::join(&anchor, "dated.txt"))?.modified()?;
    let stamped = chrono::DateTime::<chrono::Utc>::from(mtime);
    assert_eq!(
        stamped,
        chrono::DateTime::parse_from_rfc3339("2004-02-01T10:00:00+00:00")
            .unwrap()
            .with_timezone(&chrono::Utc)
    );
    Ok(())
}
