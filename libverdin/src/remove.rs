//! Taking things out of revision control: dropping entries, pristine
//! copies and admin areas, destroying working files only when they
//! carry no local modifications.

use crate::entries::{Entries, Kind};
use crate::{adm, merge, path, pristine, props, CancelFunc};
use std::fs;
use std::path::Path;

#[derive(Debug, Error)]
pub enum RemoveError {
    /// Something locally modified survived the removal; the caller
    /// decides whether that aborts the operation.
    #[error("Left locally modified content behind in '{0}'")]
    LeftLocalMod(String),
    #[error("Cancelled")]
    Cancelled,
    #[error(transparent)]
    Entries(#[from] crate::entries::EntriesError),
    #[error(transparent)]
    Merge(#[from] Box<merge::MergeError>),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Adm(#[from] adm::AdmError),
}

impl From<merge::MergeError> for RemoveError {
    fn from(e: merge::MergeError) -> Self {
        RemoveError::Merge(Box::new(e))
    }
}

fn remove_if_present(p: &str) -> Result<(), std::io::Error> {
    match fs::remove_file(Path::new(p)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn check_cancel(cancel: Option<&CancelFunc>) -> Result<(), RemoveError> {
    if let Some(c) = cancel {
        if c() {
            return Err(RemoveError::Cancelled);
        }
    }
    Ok(())
}

/// Removes the *file* `name` of `dir` from revision control: entry,
/// text-base and prop files go away; the working file goes away too
/// when `destroy_wf` is set and it has no local modifications.
/// Returns `LeftLocalMod` when the working file had to be kept.
fn remove_file_entry(dir: &str, name: &str, destroy_wf: bool) -> Result<(), RemoveError> {
    debug!("remove_file_entry {:?} / {:?}", dir, name);
    let working = path::join(dir, name);
    let modified = merge::text_modified(dir, name)?;
    // Pristine text-bases are read-only; unlock before unlinking.
    let tb = pristine::text_base_path(&working, false);
    if adm::disk_kind(&tb) != adm::DiskKind::None {
        pristine::set_read_only(&tb, false).unwrap_or(());
    }
    remove_if_present(&tb)?;
    remove_if_present(&path::join(dir, &props::prop_rel(Some(name), false, false)))?;
    remove_if_present(&path::join(dir, &props::prop_rel(Some(name), true, false)))?;
    remove_if_present(&path::join(dir, &props::wcprop_rel(Some(name))))?;
    let mut entries = Entries::read(dir)?;
    entries.remove(name);
    entries.write(dir)?;
    if destroy_wf {
        if modified {
            return Err(RemoveError::LeftLocalMod(working));
        }
        remove_if_present(&working)?;
    }
    Ok(())
}

/// Removes the whole directory `dir` from revision control,
/// recursively. Locally modified files survive (and the directories
/// holding them), reported as one `LeftLocalMod` at the end.
pub fn remove_dir_from_revision_control(
    dir: &str,
    destroy_wf: bool,
    cancel: Option<&CancelFunc>,
) -> Result<(), RemoveError> {
    debug!("remove_dir_from_revision_control {:?}", dir);
    check_cancel(cancel)?;
    let mut left = false;
    let entries = Entries::read(dir)?;
    for (name, entry) in entries.iter() {
        if name.is_empty() {
            continue;
        }
        check_cancel(cancel)?;
        match entry.kind {
            Kind::File => match remove_file_entry(dir, name, destroy_wf) {
                Ok(()) => {}
                Err(RemoveError::LeftLocalMod(_)) => left = true,
                Err(e) => return Err(e),
            },
            Kind::Dir => {
                let child = path::join(dir, name);
                if adm::adm_missing(&child) {
                    trace!("child {:?} already gone", child);
                } else {
                    match remove_dir_from_revision_control(&child, destroy_wf, cancel) {
                        Ok(()) => {}
                        Err(RemoveError::LeftLocalMod(_)) => left = true,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
    adm::destroy_adm(dir)?;
    if destroy_wf && !left {
        // Non-recursive on purpose: anything still inside is either
        // unversioned or a kept local modification.
        if let Err(e) = fs::remove_dir(Path::new(dir)) {
            info!("while removing {:?}: {:?}", dir, e);
        }
    }
    if left {
        Err(RemoveError::LeftLocalMod(dir.to_string()))
    } else {
        Ok(())
    }
}

/// The `delete-entry` log verb: removes `name` of `dir` from
/// revision control, entry included. A missing entry means a replay
/// already finished the job.
pub fn remove_from_revision_control(
    dir: &str,
    name: &str,
    destroy_wf: bool,
    cancel: Option<&CancelFunc>,
) -> Result<(), RemoveError> {
    if name.is_empty() {
        return remove_dir_from_revision_control(dir, destroy_wf, cancel);
    }
    let entry = match Entries::read(dir)?.get(name) {
        Some(e) => e.clone(),
        None => {
            trace!("no entry {:?} in {:?}, nothing to delete", name, dir);
            return Ok(());
        }
    };
    match entry.kind {
        Kind::File => remove_file_entry(dir, name, destroy_wf),
        Kind::Dir => {
            let child = path::join(dir, name);
            if !adm::adm_missing(&child) {
                remove_dir_from_revision_control(&child, destroy_wf, cancel)?;
            }
            let mut entries = Entries::read(dir)?;
            entries.remove(name);
            entries.write(dir)?;
            Ok(())
        }
    }
}
