//! The administrative area: the `.verdin` directory kept inside every
//! versioned directory, and the write-lock discipline protecting it.
//!
//! Layout, relative to a versioned directory `D`:
//!
//! ```text
//! D/.verdin/entries            versioned-entries table (one JSON map)
//! D/.verdin/log                journaled command log, present only
//!                              between a flush and a successful replay
//! D/.verdin/lock               write lock
//! D/.verdin/dir-props          working props of D itself
//! D/.verdin/dir-prop-base      pristine props of D itself
//! D/.verdin/dir-wcprops        wc props of D itself
//! D/.verdin/props/<name>       working props of D/<name>
//! D/.verdin/prop-base/<name>   pristine props of D/<name>
//! D/.verdin/wcprops/<name>     wc props of D/<name>
//! D/.verdin/text-base/<name>.vn-base
//! D/.verdin/tmp/...            staging mirror of all of the above
//! ```
//!
//! Everything written under `.verdin` goes through the `tmp/` mirror
//! first and is renamed into place, so a reader never sees a torn file.

use crate::entries::{Entries, Entry, Kind, Schedule};
use crate::{path, Revnum, DOT_DIR};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const ADM_ENTRIES: &str = "entries";
pub const ADM_LOG: &str = "log";
pub const ADM_LOCK: &str = "lock";
pub const ADM_DIR_PROPS: &str = "dir-props";
pub const ADM_DIR_PROP_BASE: &str = "dir-prop-base";
pub const ADM_DIR_WCPROPS: &str = "dir-wcprops";
pub const ADM_PROPS: &str = "props";
pub const ADM_PROP_BASE: &str = "prop-base";
pub const ADM_WCPROPS: &str = "wcprops";
pub const ADM_TEXT_BASE: &str = "text-base";
pub const ADM_TMP: &str = "tmp";

#[derive(Debug, Error)]
pub enum AdmError {
    #[error("Directory not locked: {0}")]
    NotLocked(String),
    #[error("Working copy locked: {0}")]
    Locked(String),
    #[error("'{0}' is already a working copy for a different URL ({1})")]
    UrlMismatch(String, String),
    #[error(transparent)]
    Entries(#[from] crate::entries::EntriesError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What a path resolves to on disk, without following the entries
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskKind {
    None,
    File,
    Dir,
}

pub fn disk_kind(path: &str) -> DiskKind {
    match fs::symlink_metadata(Path::new(path)) {
        Ok(m) if m.is_dir() => DiskKind::Dir,
        Ok(_) => DiskKind::File,
        Err(_) => DiskKind::None,
    }
}

/// Path of the admin directory of `dir`.
pub fn adm_dir(dir: &str) -> String {
    path::join(dir, DOT_DIR)
}

/// Path of an admin file of `dir`, optionally under the `tmp/`
/// staging mirror.
pub fn adm_path(dir: &str, tmp: bool, name: &str) -> String {
    let base = if tmp {
        path::join(&adm_dir(dir), ADM_TMP)
    } else {
        adm_dir(dir)
    };
    path::join(&base, name)
}

/// Is `dir` a versioned directory, i.e. does it carry an admin area?
pub fn is_adm(dir: &str) -> bool {
    disk_kind(&adm_path(dir, false, ADM_ENTRIES)) == DiskKind::File
}

/// A versioned subdirectory is "missing" when its entry exists in the
/// parent but its admin area is gone from disk.
pub fn adm_missing(dir: &str) -> bool {
    disk_kind(dir) != DiskKind::Dir || !is_adm(dir)
}

/// Writes `contents` to the admin file `name` of `dir` atomically:
/// the bytes are staged under `tmp/`, flushed, and renamed into
/// place.
pub fn write_adm_file(dir: &str, name: &str, contents: &[u8]) -> Result<(), AdmError> {
    let tmp = adm_path(dir, true, name);
    let real = adm_path(dir, false, name);
    trace!("write_adm_file {:?} -> {:?}", tmp, real);
    if let Some(p) = Path::new(&tmp).parent() {
        fs::create_dir_all(p)?;
    }
    let mut f = fs::File::create(Path::new(&tmp))?;
    f.write_all(contents)?;
    f.sync_all()?;
    fs::rename(Path::new(&tmp), Path::new(&real))?;
    Ok(())
}

/// A proof that the admin area of `path` is write-locked by this
/// process. Handed out by [`AccessSet::retrieve`]; operations that
/// mutate an admin area take one.
#[derive(Debug, Clone)]
pub struct AdmAccess {
    pub path: String,
}

/// The set of admin areas locked for one working-copy operation,
/// rooted at the edit's anchor. The editor only ever *retrieves*
/// accesses from the set; acquiring and releasing is the caller's
/// business, except for child areas created during the edit
/// (`open_into`), which join the set so they are unlocked with it.
#[derive(Clone)]
pub struct AccessSet {
    locked: Rc<RefCell<HashSet<String>>>,
}

impl Default for AccessSet {
    fn default() -> Self {
        AccessSet {
            locked: Rc::new(RefCell::new(HashSet::new())),
        }
    }
}

impl AccessSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write-locks `dir`, and all versioned subdirectories when
    /// `recursive`.
    pub fn open(&self, dir: &str, recursive: bool) -> Result<(), AdmError> {
        debug!("lock {:?} recursive = {:?}", dir, recursive);
        let lock = adm_path(dir, false, ADM_LOCK);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(Path::new(&lock))
        {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(AdmError::Locked(dir.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        self.locked.borrow_mut().insert(dir.to_string());
        if recursive {
            let entries = Entries::read(dir)?;
            for (name, entry) in entries.iter() {
                if name.is_empty() || entry.kind != Kind::Dir {
                    continue;
                }
                let child = path::join(dir, name);
                if is_adm(&child) {
                    self.open(&child, true)?;
                }
            }
        }
        Ok(())
    }

    /// Opens a child admin area created mid-edit into the set.
    pub fn open_into(&self, dir: &str) -> Result<(), AdmError> {
        if self.locked.borrow().contains(dir) {
            return Ok(());
        }
        self.open(dir, false)
    }

    /// Asserts possession of the lock on `dir`.
    pub fn retrieve(&self, dir: &str) -> Result<AdmAccess, AdmError> {
        if self.locked.borrow().contains(dir) {
            Ok(AdmAccess {
                path: dir.to_string(),
            })
        } else {
            Err(AdmError::NotLocked(dir.to_string()))
        }
    }

    /// Releases every lock in the set. Lock files that vanished with
    /// their directory (deletions during the edit) are ignored.
    pub fn close_all(&self) {
        for dir in self.locked.borrow_mut().drain() {
            let lock = adm_path(&dir, false, ADM_LOCK);
            if let Err(e) = fs::remove_file(Path::new(&lock)) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    info!("while unlocking {:?}: {:?}", dir, e);
                }
            }
        }
    }
}

/// Creates the skeleton of an admin area.
fn init_adm(dir: &str) -> Result<(), AdmError> {
    for sub in [
        "",
        ADM_PROPS,
        ADM_PROP_BASE,
        ADM_WCPROPS,
        ADM_TEXT_BASE,
        ADM_TMP,
    ] {
        let p = path::join(&adm_dir(dir), sub);
        fs::create_dir_all(Path::new(&p))?;
    }
    // The staging mirror needs the same shape as the real area.
    let tmp = path::join(&adm_dir(dir), ADM_TMP);
    for sub in [ADM_PROPS, ADM_PROP_BASE, ADM_TEXT_BASE] {
        let p = path::join(&tmp, sub);
        fs::create_dir_all(Path::new(&p))?;
    }
    Ok(())
}

/// Makes sure `dir` exists on disk and is a working copy for `url`
/// at `revision`, creating the admin area if there is none yet.
pub fn ensure_adm(dir: &str, url: &str, revision: Revnum) -> Result<(), AdmError> {
    debug!("ensure_adm {:?} url = {:?} rev = {}", dir, url, revision);
    fs::create_dir_all(Path::new(dir))?;
    if is_adm(dir) {
        let entries = Entries::read(dir)?;
        if let Some(this) = entries.get("") {
            if let Some(ref existing) = this.url {
                if existing != url {
                    return Err(AdmError::UrlMismatch(dir.to_string(), existing.clone()));
                }
            }
        }
        return Ok(());
    }
    init_adm(dir)?;
    let mut entries = Entries::default();
    let mut this = Entry::new(Kind::Dir);
    this.url = Some(url.to_string());
    this.revision = Some(revision);
    this.schedule = Schedule::Normal;
    entries.insert(String::new(), this);
    entries.write(dir)?;
    Ok(())
}

/// Removes the whole admin area of `dir`.
pub fn destroy_adm(dir: &str) -> Result<(), AdmError> {
    let adm = adm_dir(dir);
    debug!("destroy_adm {:?}", adm);
    match fs::remove_dir_all(Path::new(&adm)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Converts a `/`-separated working-copy path to an OS path.
pub fn os_path(p: &str) -> PathBuf {
    PathBuf::from(p)
}
