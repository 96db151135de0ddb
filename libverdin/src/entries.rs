//! The versioned-entries table: one record per versioned name inside
//! a directory, keyed by basename, with the empty string naming the
//! directory itself. The table is read and written as an atomic
//! unit.

use crate::{adm, path, Revnum};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Error)]
pub enum EntriesError {
    #[error("No entry for '{0}' in '{1}'")]
    NotFound(String, String),
    #[error("Corrupt entries table in '{0}': {1}")]
    Corrupt(String, serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    File,
    Dir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    #[default]
    Normal,
    Add,
    Delete,
}

/// One versioned name within a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revnum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub schedule: Schedule,
    /// Tombstone: the name existed and was deleted in the revision
    /// this entry carries. Kept so the parent can report it
    /// accurately until the next completion pass sweeps it.
    #[serde(default)]
    pub deleted: bool,
    /// Set from open/add until `complete_directory`.
    #[serde(default)]
    pub incomplete: bool,
    #[serde(default)]
    pub copied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyfrom_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyfrom_rev: Option<Revnum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmt_author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmt_rev: Option<Revnum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmt_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Conflict bookkeeping: names of the backup files written by a
    /// conflicted merge, and of a property-reject file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_old: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_new: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_wrk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_reject: Option<String>,
}

impl Entry {
    pub fn new(kind: Kind) -> Self {
        Entry {
            kind,
            revision: None,
            url: None,
            schedule: Schedule::Normal,
            deleted: false,
            incomplete: false,
            copied: false,
            checksum: None,
            text_time: None,
            prop_time: None,
            copyfrom_url: None,
            copyfrom_rev: None,
            cmt_author: None,
            cmt_rev: None,
            cmt_date: None,
            uuid: None,
            conflict_old: None,
            conflict_new: None,
            conflict_wrk: None,
            prop_reject: None,
        }
    }

    /// A file is text-conflicted while any of its merge backups are
    /// still on disk; property-conflicted while its reject file is.
    pub fn is_conflicted(&self, dir: &str) -> (bool, bool) {
        let here = |n: &Option<String>| {
            n.as_deref()
                .map(|n| adm::disk_kind(&path::join(dir, n)) != adm::DiskKind::None)
                .unwrap_or(false)
        };
        let text = here(&self.conflict_old) || here(&self.conflict_new) || here(&self.conflict_wrk);
        let props = here(&self.prop_reject);
        (text, props)
    }
}

/// A timestamp argument to [`EntryUpdate`]: either an explicit time,
/// or the sentinel meaning "whatever the working file's mtime is when
/// the command runs". The sentinel is what makes the log replayable:
/// it is resolved at execution time, not at emission time.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeValue {
    Working,
    At(DateTime<Utc>),
}

/// A field-mask update of one entry: `None` leaves the stored field
/// untouched. Double options unset a field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryUpdate {
    pub kind: Option<Kind>,
    pub revision: Option<Revnum>,
    pub url: Option<String>,
    pub schedule: Option<Schedule>,
    pub deleted: Option<bool>,
    pub incomplete: Option<bool>,
    pub copied: Option<bool>,
    pub checksum: Option<String>,
    pub text_time: Option<TimeValue>,
    pub prop_time: Option<TimeValue>,
    pub copyfrom_url: Option<String>,
    pub copyfrom_rev: Option<Revnum>,
    pub cmt_author: Option<String>,
    pub cmt_rev: Option<Revnum>,
    pub cmt_date: Option<String>,
    pub uuid: Option<String>,
    pub conflict_old: Option<Option<String>>,
    pub conflict_new: Option<Option<String>>,
    pub conflict_wrk: Option<Option<String>>,
    pub prop_reject: Option<Option<String>>,
}

impl EntryUpdate {
    pub fn is_empty(&self) -> bool {
        self == &EntryUpdate::default()
    }
}

/// The in-memory entries table of one directory.
#[derive(Debug, Clone, Default)]
pub struct Entries(pub BTreeMap<String, Entry>);

impl Entries {
    /// Reads the table of `dir`. A directory without an admin area
    /// has no entries.
    pub fn read(dir: &str) -> Result<Self, EntriesError> {
        let p = adm::adm_path(dir, false, adm::ADM_ENTRIES);
        trace!("entries read {:?}", p);
        let bytes = match std::fs::read(Path::new(&p)) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Entries::default());
            }
            Err(e) => return Err(e.into()),
        };
        let map = serde_json::from_slice(&bytes)
            .map_err(|e| EntriesError::Corrupt(dir.to_string(), e))?;
        Ok(Entries(map))
    }

    /// Atomically writes the table back.
    pub fn write(&self, dir: &str) -> Result<(), EntriesError> {
        let json = serde_json::to_vec_pretty(&self.0).expect("entries serialize");
        adm::write_adm_file(dir, adm::ADM_ENTRIES, &json).map_err(|e| match e {
            adm::AdmError::Io(io) => EntriesError::Io(io),
            other => EntriesError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                other.to_string(),
            )),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: String, entry: Entry) {
        self.0.insert(name, entry);
    }

    pub fn remove(&mut self, name: &str) {
        self.0.remove(name);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.0.iter()
    }
}

/// Returns the entry for `wc_path`: the directory's own entry when
/// the path is a versioned directory, otherwise the record under its
/// parent.
pub fn stat_entry(wc_path: &str) -> Result<Option<Entry>, EntriesError> {
    if adm::is_adm(wc_path) {
        return Ok(Entries::read(wc_path)?.get("").cloned());
    }
    let (dir, name) = path::split(wc_path);
    if name.is_empty() {
        return Ok(None);
    }
    Ok(Entries::read(dir)?.get(name).cloned())
}

fn mtime_of(p: &str) -> Option<DateTime<Utc>> {
    std::fs::metadata(Path::new(p))
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Applies `update` to the entry `name` of `dir`, creating the
/// record when necessary, and writes the table back atomically.
/// `TimeValue::Working` stamps resolve against the working file at
/// call time.
pub fn entry_modify(dir: &str, name: &str, update: &EntryUpdate) -> Result<(), EntriesError> {
    debug!("entry_modify {:?} / {:?}: {:?}", dir, name, update);
    let mut entries = Entries::read(dir)?;
    let entry = entries.0.entry(name.to_string()).or_insert_with(|| {
        Entry::new(update.kind.unwrap_or(Kind::File))
    });
    if let Some(kind) = update.kind {
        entry.kind = kind;
    }
    if let Some(rev) = update.revision {
        entry.revision = Some(rev);
    }
    if let Some(ref url) = update.url {
        entry.url = Some(url.clone());
    }
    if let Some(schedule) = update.schedule {
        entry.schedule = schedule;
    }
    if let Some(deleted) = update.deleted {
        entry.deleted = deleted;
    }
    if let Some(incomplete) = update.incomplete {
        entry.incomplete = incomplete;
    }
    if let Some(copied) = update.copied {
        entry.copied = copied;
    }
    if let Some(ref checksum) = update.checksum {
        entry.checksum = Some(checksum.clone());
    }
    let working = if name.is_empty() {
        dir.to_string()
    } else {
        path::join(dir, name)
    };
    if let Some(ref t) = update.text_time {
        entry.text_time = match t {
            TimeValue::Working => mtime_of(&working),
            TimeValue::At(t) => Some(*t),
        };
    }
    if let Some(ref t) = update.prop_time {
        entry.prop_time = match t {
            TimeValue::Working => mtime_of(&working),
            TimeValue::At(t) => Some(*t),
        };
    }
    if let Some(ref u) = update.copyfrom_url {
        entry.copyfrom_url = Some(u.clone());
    }
    if let Some(r) = update.copyfrom_rev {
        entry.copyfrom_rev = Some(r);
    }
    if let Some(ref a) = update.cmt_author {
        entry.cmt_author = Some(a.clone());
    }
    if let Some(r) = update.cmt_rev {
        entry.cmt_rev = Some(r);
    }
    if let Some(ref d) = update.cmt_date {
        entry.cmt_date = Some(d.clone());
    }
    if let Some(ref u) = update.uuid {
        entry.uuid = Some(u.clone());
    }
    if let Some(ref v) = update.conflict_old {
        entry.conflict_old = v.clone();
    }
    if let Some(ref v) = update.conflict_new {
        entry.conflict_new = v.clone();
    }
    if let Some(ref v) = update.conflict_wrk {
        entry.conflict_wrk = v.clone();
    }
    if let Some(ref v) = update.prop_reject {
        entry.prop_reject = v.clone();
    }
    entries.write(dir)
}
