//! Integrating one new revision of a file into the working copy: the
//! single log script that schedules additions, merges text and
//! props, rotates the text-base and fixes up entry metadata, then
//! one atomic replay.

use super::EditError;
use crate::adm::{AccessSet, DiskKind};
use crate::entries::{Entries, EntryUpdate, Kind, Schedule, TimeValue};
use crate::logfile::{run_log, LogBuffer, LogCommand};
use crate::notify::NotifyState;
use crate::props::{self, PropChange, PropState};
use crate::{adm, merge, path, pristine, CancelFunc, Revnum};
use std::path::Path;

pub struct InstallFile<'a> {
    pub access: &'a AccessSet,
    /// Full working-copy path of the file.
    pub file_path: &'a str,
    pub new_revision: Revnum,
    /// A finished new text-base, if the file's text changed.
    pub new_text_path: Option<String>,
    pub props: Option<&'a [PropChange]>,
    /// Whether `props` is the complete new pristine list (diffed
    /// against the stored one here) or already a diff.
    pub is_full_proplist: bool,
    pub new_url: Option<&'a str>,
    pub is_add: bool,
    pub copyfrom: Option<(String, Revnum)>,
    pub diff3_cmd: Option<&'a str>,
    /// Stamps the final working file; must translate to the last
    /// command of the log.
    pub timestamp_string: Option<&'a str>,
    pub cancel: Option<&'a CancelFunc>,
}

/// Runs the installation, returning the observed content and
/// property states for notification.
pub fn install_file(p: InstallFile) -> Result<(NotifyState, NotifyState), EditError> {
    let (parent_dir, base_name) = path::split(p.file_path);
    let adm = p.access.retrieve(parent_dir)?;
    debug!(
        "install_file {:?} r{} text = {:?} add = {:?}",
        p.file_path, p.new_revision, p.new_text_path, p.is_add
    );

    if p.is_add {
        assert_eq!(p.new_revision, 0);
    } else {
        assert!(p.copyfrom.is_none());
    }

    let mut log = LogBuffer::new();

    // Schedule the addition before anything touches the entry, so
    // the rest of the script operates on an added file.
    if p.is_add {
        let mut update = EntryUpdate {
            schedule: Some(Schedule::Add),
            ..Default::default()
        };
        if let Some((ref url, rev)) = p.copyfrom {
            update.copyfrom_url = Some(url.clone());
            update.copyfrom_rev = Some(rev);
            update.copied = Some(true);
        }
        log.push(LogCommand::ModifyEntry {
            name: base_name.to_string(),
            update,
        });
    }

    // The log can only talk about paths inside this directory, so a
    // new text-base delivered anywhere else moves to the staging
    // area first. Not journaled: the staging area belongs to us
    // while the admin area is locked.
    let expected = pristine::text_base_path(p.file_path, true);
    let new_text_path = match p.new_text_path {
        Some(ref given) if *given != expected => {
            std::fs::rename(Path::new(given), Path::new(&expected))?;
            Some(expected.clone())
        }
        other => other,
    };

    let categorized = p.props.map(props::categorize);
    let mut prop_state = PropState::Unchanged;
    let mut magic_props_changed = false;

    if let Some(ref cat) = categorized {
        let propchanges = if p.is_full_proplist {
            // The caller gave the complete new pristine list;
            // reduce it to a diff against the stored one.
            let pristine_path =
                path::join(parent_dir, &props::prop_rel(Some(base_name), true, false));
            let old = props::load_prop_file(&pristine_path)?;
            let mut new = props::PropMap::new();
            for change in &cat.regular {
                if let Some(ref v) = change.value {
                    new.insert(change.name.clone(), v.clone());
                }
            }
            props::prop_diffs(&new, &old)
        } else {
            cat.regular.clone()
        };
        magic_props_changed = propchanges.iter().any(|c| props::is_magic(&c.name));
        if !propchanges.is_empty() {
            prop_state = props::merge_prop_diffs(&adm, Some(base_name), &propchanges, &mut log)?;
        }
        // Entry props feed the entries table directly; they go in
        // ahead of any textual merge so keyword expansion sees the
        // new committed-info. Tombstones leave the stored field
        // untouched by convention.
        let entry_update = entry_props_update(&cat.entry);
        if !entry_update.is_empty() {
            log.push(LogCommand::ModifyEntry {
                name: base_name.to_string(),
                update: entry_update,
            });
        }
    }

    let is_locally_modified = merge::text_modified(parent_dir, base_name)?;
    debug!("{:?} locally modified: {:?}", p.file_path, is_locally_modified);

    let txtb = pristine::text_base_rel(base_name, false);
    let tmp_txtb = pristine::text_base_rel(base_name, true);

    if new_text_path.is_some() {
        let working_kind = adm::disk_kind(p.file_path);
        if !is_locally_modified || working_kind == DiskKind::None {
            // No local edits (or no working file at all): the new
            // text-base simply becomes the working file, translated.
            log.push(LogCommand::CpAndTranslate {
                name: tmp_txtb.clone(),
                dest: base_name.to_string(),
            });
        } else {
            let entry = Entries::read(parent_dir)?
                .get(base_name)
                .cloned()
                .ok_or_else(|| EditError::EntryNotFound(p.file_path.to_string()))?;
            let old_rev = entry.revision.unwrap_or(0);
            log.push(LogCommand::Merge {
                name: base_name.to_string(),
                left: txtb.clone(),
                right: tmp_txtb.clone(),
                left_label: format!(".r{}", old_rev),
                right_label: format!(".r{}", p.new_revision),
                target_label: ".mine".to_string(),
            });
        }
    } else if magic_props_changed {
        // Prop-only change that still affects the working text:
        // detranslate in place, then translate back under the new
        // props.
        log.push(LogCommand::CpAndDetranslate {
            name: base_name.to_string(),
            dest: tmp_txtb.clone(),
        });
        log.push(LogCommand::CpAndTranslate {
            name: tmp_txtb.clone(),
            dest: base_name.to_string(),
        });
    }

    // Bump the revision; also clears any phantom tombstone being
    // overwritten.
    log.push(LogCommand::ModifyEntry {
        name: base_name.to_string(),
        update: EntryUpdate {
            kind: Some(Kind::File),
            revision: Some(p.new_revision),
            deleted: Some(false),
            ..Default::default()
        },
    });

    if let Some(url) = p.new_url {
        log.push(LogCommand::ModifyEntry {
            name: base_name.to_string(),
            update: EntryUpdate {
                url: Some(url.to_string()),
                ..Default::default()
            },
        });
    }

    if (new_text_path.is_some() || magic_props_changed) && !is_locally_modified {
        log.push(LogCommand::ModifyEntry {
            name: base_name.to_string(),
            update: EntryUpdate {
                text_time: Some(TimeValue::Working),
                ..Default::default()
            },
        });
    }

    if p.props.is_some() && !props::props_modified(parent_dir, Some(base_name))? {
        log.push(LogCommand::ModifyEntry {
            name: base_name.to_string(),
            update: EntryUpdate {
                prop_time: Some(TimeValue::Working),
                ..Default::default()
            },
        });
    }

    if let Some(ref ntp) = new_text_path {
        log.push(LogCommand::Mv {
            name: tmp_txtb.clone(),
            dest: txtb.clone(),
        });
        log.push(LogCommand::Readonly { name: txtb.clone() });
        let digest = pristine::file_md5(ntp)?;
        log.push(LogCommand::ModifyEntry {
            name: base_name.to_string(),
            update: EntryUpdate {
                checksum: Some(digest),
                ..Default::default()
            },
        });
    }

    if let Some(ref cat) = categorized {
        for change in &cat.wc {
            log.push(LogCommand::ModifyWcprop {
                name: base_name.to_string(),
                propname: change.name.clone(),
                propval: change.value.clone(),
            });
        }
    }

    // Last command by contract: nothing may touch the working file
    // after its mtime is pinned.
    if let Some(ts) = p.timestamp_string {
        log.push(LogCommand::SetTimestamp {
            name: base_name.to_string(),
            timestamp: ts.to_string(),
        });
    }

    log.flush(&adm)?;
    run_log(&adm, p.diff3_cmd, p.cancel)?;

    let entry = Entries::read(parent_dir)?.get(base_name).cloned();
    let text_conflicted = entry
        .map(|e| e.is_conflicted(parent_dir).0)
        .unwrap_or(false);
    let content_state = if text_conflicted {
        NotifyState::Conflicted
    } else if new_text_path.is_some() {
        if is_locally_modified {
            NotifyState::Merged
        } else {
            NotifyState::Changed
        }
    } else {
        NotifyState::Unchanged
    };
    Ok((content_state, prop_state.into()))
}

/// Maps non-tombstone entry props onto entry fields; unknown names
/// are ignored.
pub(super) fn entry_props_update(entry_props: &[PropChange]) -> EntryUpdate {
    let mut update = EntryUpdate::default();
    for prop in entry_props {
        let value = match prop.value {
            Some(ref v) => v.clone(),
            None => continue,
        };
        match prop.name.as_str() {
            props::PROP_ENTRY_LAST_AUTHOR => update.cmt_author = Some(value),
            props::PROP_ENTRY_COMMITTED_REV => update.cmt_rev = value.parse().ok(),
            props::PROP_ENTRY_COMMITTED_DATE => update.cmt_date = Some(value),
            props::PROP_ENTRY_UUID => update.uuid = Some(value),
            other => trace!("ignoring entry prop {:?}", other),
        }
    }
    update
}

/// Installs a repository-fetched file (complete new text and full
/// prop list, possibly with copy history) into the working copy,
/// scheduling it for addition. The working-copy face of copy and
/// merge drivers.
pub fn add_repos_file(
    access: &AccessSet,
    dst_path: &str,
    new_text_path: &str,
    new_props: &props::PropMap,
    copyfrom: Option<(String, Revnum)>,
) -> Result<(), EditError> {
    let (parent_dir, base_name) = path::split(dst_path);
    let parent_entry = Entries::read(parent_dir)?
        .get("")
        .cloned()
        .ok_or_else(|| EditError::EntryNotFound(parent_dir.to_string()))?;
    let parent_url = parent_entry
        .url
        .ok_or_else(|| EditError::EntryMissingUrl(parent_dir.to_string()))?;
    let new_url = path::url_join(&parent_url, base_name);
    let propchanges: Vec<PropChange> = new_props
        .iter()
        .map(|(name, value)| PropChange {
            name: name.clone(),
            value: Some(value.clone()),
        })
        .collect();
    install_file(InstallFile {
        access,
        file_path: dst_path,
        new_revision: 0,
        new_text_path: Some(new_text_path.to_string()),
        props: Some(&propchanges),
        is_full_proplist: true,
        new_url: Some(&new_url),
        is_add: true,
        copyfrom,
        diff3_cmd: None,
        timestamp_string: None,
        cancel: None,
    })?;
    Ok(())
}
