use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use libverdin::adm;
use libverdin::entries::{Entries, Kind};
use libverdin::logfile;
use libverdin::AccessSet;
use log::*;

#[derive(Parser, Debug)]
pub struct Cleanup {
    /// Working-copy directory to recover. Defaults to the current
    /// directory.
    pub path: Option<PathBuf>,
    /// External diff3 command to use when replaying merges.
    #[clap(long = "diff3-cmd")]
    pub diff3_cmd: Option<String>,
}

impl Cleanup {
    pub fn run(self) -> Result<(), anyhow::Error> {
        let path = match self.path {
            Some(p) => p,
            None => std::env::current_dir()?,
        };
        let dir = path.to_str().map(|s| s.to_string()).unwrap_or_default();
        if !adm::is_adm(&dir) {
            bail!("{:?} is not a working copy", path);
        }
        let access = AccessSet::new();
        let replayed = cleanup_dir(&dir, &access, self.diff3_cmd.as_deref())?;
        access.close_all();
        info!("cleanup done, {} logs replayed", replayed);
        Ok(())
    }
}

/// Steals any stale lock, replays an outstanding log, and recurses
/// into versioned children. Returns how many logs actually ran.
fn cleanup_dir(
    dir: &str,
    access: &AccessSet,
    diff3_cmd: Option<&str>,
) -> Result<usize, anyhow::Error> {
    debug!("cleanup {:?}", dir);
    let lock = adm::adm_path(dir, false, adm::ADM_LOCK);
    if adm::disk_kind(&lock) != adm::DiskKind::None {
        info!("breaking stale lock in {:?}", dir);
        std::fs::remove_file(&lock)?;
    }
    access.open_into(dir)?;
    let adm_access = access.retrieve(dir)?;
    let mut replayed = 0;
    if logfile::log_file_present(dir) {
        info!("replaying log in {:?}", dir);
        logfile::run_log(&adm_access, diff3_cmd, None)?;
        replayed += 1;
    }
    for (name, entry) in Entries::read(dir)?.iter() {
        if name.is_empty() || entry.kind != Kind::Dir {
            continue;
        }
        let child = libverdin::path::join(dir, name);
        if adm::is_adm(&child) {
            replayed += cleanup_dir(&child, access, diff3_cmd)?;
        }
    }
    Ok(replayed)
}
