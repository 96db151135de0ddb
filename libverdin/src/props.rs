//! Versioned properties. Three disjoint namespaces share one wire
//! representation: *regular* props are user-visible and versioned,
//! *entry* props (`vn:entry:`) are synthetic fields that land in the
//! entries table, and *wc* props (`vn:wc:`) belong to this working
//! copy only.

use crate::adm::{self, AdmAccess};
use crate::entries::EntryUpdate;
use crate::logfile::{LogBuffer, LogCommand};
use crate::path;
use std::collections::BTreeMap;
use std::path::Path;

pub const PROP_EXECUTABLE: &str = "vn:executable";
pub const PROP_KEYWORDS: &str = "vn:keywords";
pub const PROP_EOL_STYLE: &str = "vn:eol-style";
pub const PROP_EXTERNALS: &str = "vn:externals";
pub const PROP_MIME_TYPE: &str = "vn:mime-type";

pub const ENTRY_PREFIX: &str = "vn:entry:";
pub const WC_PREFIX: &str = "vn:wc:";
pub const PROP_ENTRY_COMMITTED_DATE: &str = "vn:entry:committed-date";
pub const PROP_ENTRY_COMMITTED_REV: &str = "vn:entry:committed-rev";
pub const PROP_ENTRY_LAST_AUTHOR: &str = "vn:entry:last-author";
pub const PROP_ENTRY_UUID: &str = "vn:entry:uuid";

#[derive(Debug, Error)]
pub enum PropError {
    #[error("Corrupt property file '{0}': {1}")]
    Corrupt(String, serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropKind {
    Regular,
    Entry,
    Wc,
}

pub fn classify(name: &str) -> PropKind {
    if name.starts_with(ENTRY_PREFIX) {
        PropKind::Entry
    } else if name.starts_with(WC_PREFIX) {
        PropKind::Wc
    } else {
        PropKind::Regular
    }
}

/// A property whose change forces retranslation of the working file.
pub fn is_magic(name: &str) -> bool {
    name == PROP_EXECUTABLE || name == PROP_KEYWORDS || name == PROP_EOL_STYLE
}

/// One pending property change; `value: None` is a tombstone.
#[derive(Debug, Clone, PartialEq)]
pub struct PropChange {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Default)]
pub struct Categorized {
    pub regular: Vec<PropChange>,
    pub entry: Vec<PropChange>,
    pub wc: Vec<PropChange>,
}

/// Splits a change list into the three namespaces.
pub fn categorize(changes: &[PropChange]) -> Categorized {
    let mut c = Categorized::default();
    for change in changes {
        match classify(&change.name) {
            PropKind::Regular => c.regular.push(change.clone()),
            PropKind::Entry => c.entry.push(change.clone()),
            PropKind::Wc => c.wc.push(change.clone()),
        }
    }
    c
}

pub type PropMap = BTreeMap<String, String>;

/// Result of merging incoming property changes into a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropState {
    Unchanged,
    Changed,
    Merged,
    Conflicted,
}

impl From<PropState> for crate::notify::NotifyState {
    fn from(p: PropState) -> Self {
        use crate::notify::NotifyState::*;
        match p {
            PropState::Unchanged => Unchanged,
            PropState::Changed => Changed,
            PropState::Merged => Merged,
            PropState::Conflicted => Conflicted,
        }
    }
}

/// Admin-relative path of a property file. `name = None` addresses
/// the directory's own props.
pub fn prop_rel(name: Option<&str>, base: bool, tmp: bool) -> String {
    let area = if tmp {
        path::join(crate::DOT_DIR, adm::ADM_TMP)
    } else {
        crate::DOT_DIR.to_string()
    };
    match name {
        None => path::join(
            &area,
            if base {
                adm::ADM_DIR_PROP_BASE
            } else {
                adm::ADM_DIR_PROPS
            },
        ),
        Some(n) => path::join(
            &path::join(&area, if base { adm::ADM_PROP_BASE } else { adm::ADM_PROPS }),
            n,
        ),
    }
}

pub fn wcprop_rel(name: Option<&str>) -> String {
    match name {
        None => path::join(crate::DOT_DIR, adm::ADM_DIR_WCPROPS),
        Some(n) => path::join(&path::join(crate::DOT_DIR, adm::ADM_WCPROPS), n),
    }
}

/// Loads a property file as a map; a missing file is an empty map.
pub fn load_prop_file(file: &str) -> Result<PropMap, PropError> {
    match std::fs::read(Path::new(file)) {
        Ok(bytes) => {
            serde_json::from_slice(&bytes).map_err(|e| PropError::Corrupt(file.to_string(), e))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PropMap::new()),
        Err(e) => Err(e.into()),
    }
}

pub fn save_prop_file(file: &str, props: &PropMap) -> Result<(), PropError> {
    let json = serde_json::to_vec_pretty(props).expect("props serialize");
    if let Some(p) = Path::new(file).parent() {
        std::fs::create_dir_all(p)?;
    }
    std::fs::write(Path::new(file), json)?;
    Ok(())
}

/// Reads one working property of `dir/name` (or of `dir` itself).
pub fn prop_get(dir: &str, name: Option<&str>, propname: &str) -> Result<Option<String>, PropError> {
    let p = path::join(dir, &prop_rel(name, false, false));
    Ok(load_prop_file(&p)?.get(propname).cloned())
}

/// Computes `new − old` as a change list; names present only in
/// `old` become tombstones.
pub fn prop_diffs(new: &PropMap, old: &PropMap) -> Vec<PropChange> {
    let mut changes = Vec::new();
    for (name, value) in new.iter() {
        if old.get(name) != Some(value) {
            changes.push(PropChange {
                name: name.clone(),
                value: Some(value.clone()),
            });
        }
    }
    for name in old.keys() {
        if !new.contains_key(name) {
            changes.push(PropChange {
                name: name.clone(),
                value: None,
            });
        }
    }
    changes
}

/// Are the working props of `dir/name` different from the pristine
/// props?
pub fn props_modified(dir: &str, name: Option<&str>) -> Result<bool, PropError> {
    let working = load_prop_file(&path::join(dir, &prop_rel(name, false, false)))?;
    let base = load_prop_file(&path::join(dir, &prop_rel(name, true, false)))?;
    Ok(working != base)
}

fn apply_change(map: &mut PropMap, change: &PropChange) {
    match change.value {
        Some(ref v) => {
            map.insert(change.name.clone(), v.clone());
        }
        None => {
            map.remove(&change.name);
        }
    }
}

/// Merges incoming regular-prop `changes` into the pristine and
/// working props of `adm.path/name`, staging the merged files under
/// `tmp/` and appending the log commands that install them. The
/// pristine always ends up reflecting the repository; a local change
/// that disagrees with an incoming change is left in place and
/// reported through a reject file plus the returned
/// [`PropState::Conflicted`].
pub fn merge_prop_diffs(
    adm: &AdmAccess,
    name: Option<&str>,
    changes: &[PropChange],
    log: &mut LogBuffer,
) -> Result<PropState, PropError> {
    let dir = &adm.path;
    debug!("merge_prop_diffs {:?} / {:?}", dir, name);
    let mut base = load_prop_file(&path::join(dir, &prop_rel(name, true, false)))?;
    let mut working = load_prop_file(&path::join(dir, &prop_rel(name, false, false)))?;
    let mut changed = false;
    let mut merged = false;
    let mut conflicts: Vec<String> = Vec::new();

    for change in changes {
        let base_val = base.get(&change.name).cloned();
        let working_val = working.get(&change.name).cloned();
        if working_val == base_val {
            apply_change(&mut working, change);
            apply_change(&mut base, change);
            changed = true;
        } else if working_val == change.value {
            // The local edit already matches what the repository
            // wants; only the pristine needs the update.
            apply_change(&mut base, change);
            merged = true;
        } else {
            conflicts.push(match (&base_val, &change.value, &working_val) {
                (_, Some(new), Some(local)) => format!(
                    "property '{}': incoming value '{}' clashes with local value '{}'",
                    change.name, new, local
                ),
                (_, None, Some(local)) => format!(
                    "property '{}': incoming deletion clashes with local value '{}'",
                    change.name, local
                ),
                (_, Some(new), None) => format!(
                    "property '{}': incoming value '{}' clashes with local deletion",
                    change.name, new
                ),
                (_, None, None) => unreachable!("no conflict without disagreement"),
            });
            apply_change(&mut base, change);
        }
    }

    let base_tmp = prop_rel(name, true, true);
    let working_tmp = prop_rel(name, false, true);
    save_prop_file(&path::join(dir, &base_tmp), &base)?;
    save_prop_file(&path::join(dir, &working_tmp), &working)?;
    log.push(LogCommand::Mv {
        name: base_tmp,
        dest: prop_rel(name, true, false),
    });
    log.push(LogCommand::Mv {
        name: working_tmp,
        dest: prop_rel(name, false, false),
    });

    if !conflicts.is_empty() {
        let reject_name = match name {
            Some(n) => format!("{}.prej", n),
            None => "dir_conflicts.prej".to_string(),
        };
        let reject_tmp = path::join(
            &path::join(&path::join(crate::DOT_DIR, adm::ADM_TMP), adm::ADM_PROPS),
            &reject_name,
        );
        std::fs::write(
            Path::new(&path::join(dir, &reject_tmp)),
            conflicts.join("\n") + "\n",
        )?;
        log.push(LogCommand::Mv {
            name: reject_tmp,
            dest: reject_name.clone(),
        });
        log.push(LogCommand::ModifyEntry {
            name: name.unwrap_or("").to_string(),
            update: EntryUpdate {
                prop_reject: Some(Some(reject_name)),
                ..Default::default()
            },
        });
        return Ok(PropState::Conflicted);
    }
    Ok(if merged {
        PropState::Merged
    } else if changed {
        PropState::Changed
    } else {
        PropState::Unchanged
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_namespaces() {
        assert_eq!(classify("vn:eol-style"), PropKind::Regular);
        assert_eq!(classify("vn:entry:committed-rev"), PropKind::Entry);
        assert_eq!(classify("vn:wc:ra-dav-token"), PropKind::Wc);
        assert_eq!(classify("license"), PropKind::Regular);
    }

    #[test]
    fn diffs_are_new_minus_old() {
        let mut old = PropMap::new();
        old.insert("a".into(), "1".into());
        old.insert("b".into(), "2".into());
        let mut new = PropMap::new();
        new.insert("a".into(), "1".into());
        new.insert("c".into(), "3".into());
        let d = prop_diffs(&new, &old);
        assert_eq!(d.len(), 2);
        assert!(d.contains(&PropChange {
            name: "c".into(),
            value: Some("3".into())
        }));
        assert!(d.contains(&PropChange {
            name: "b".into(),
            value: None
        }));
    }
}
