//! The update editor: a driven state machine consuming tree-delta
//! callbacks in strictly nested order and integrating the described
//! revision into the working copy, preserving local modifications.
//!
//! Every mutation funnels through per-directory journaled logs
//! ([`crate::logfile`]), so an interrupted edit is repaired by
//! replaying the logs left on disk. Directories "complete" in
//! postfix order: each one tracks a reference count
//! ([`BumpInfo`]) that drops as its children close, and hits zero
//! exactly when the directory and everything below it is done.

use crate::adm::{self, AccessSet, DiskKind};
use crate::delta::{DeltaApplier, DeltaError, DeltaWindow};
use crate::entries::{self, Entries, EntryUpdate, Kind, Schedule};
use crate::logfile::{self, LogBuffer, LogCommand, LogError};
use crate::notify::{Notification, NotifyAction, NotifyFunc, NotifyState};
use crate::props::{self, PropChange};
use crate::{merge, path, pristine, remove, translate, CancelFunc, Revnum};
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

pub mod anchor;
mod cancel;
mod install;
pub mod traversal;

pub use cancel::CancelEditor;
pub use install::{add_repos_file, install_file, InstallFile};
pub use traversal::TraversalInfo;

#[derive(Debug, Error)]
pub enum EditError {
    #[error("Obstructed update: {0}")]
    ObstructedUpdate(String),
    #[error("Entry not found: {0}")]
    EntryNotFound(String),
    #[error("'{0}' has no ancestry information")]
    EntryMissingUrl(String),
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("Corrupt text-base for '{path}': expected checksum {expected}, actual {actual}")]
    CorruptTextBase {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("Checksum mismatch for '{path}': expected {expected}, actual {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("Cancelled")]
    Cancelled,
    #[error(transparent)]
    Adm(#[from] adm::AdmError),
    #[error(transparent)]
    Entries(#[from] entries::EntriesError),
    #[error(transparent)]
    Props(#[from] props::PropError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Merge(#[from] Box<merge::MergeError>),
    #[error(transparent)]
    Translate(#[from] Box<translate::TranslateError>),
    #[error(transparent)]
    Delta(#[from] DeltaError),
    #[error(transparent)]
    Remove(#[from] remove::RemoveError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<merge::MergeError> for EditError {
    fn from(e: merge::MergeError) -> Self {
        EditError::Merge(Box::new(e))
    }
}

impl From<translate::TranslateError> for EditError {
    fn from(e: translate::TranslateError) -> Self {
        EditError::Translate(Box::new(e))
    }
}

/// The driver-facing callback surface. Calls come in strictly
/// nested, depth-first order: a directory opens before anything
/// inside it, and closes after everything inside it; a file opens,
/// receives at most one text delta and any number of prop changes,
/// then closes.
pub trait DeltaEditor {
    type Dir: Clone;
    type File: Clone;

    fn set_target_revision(&mut self, revision: Revnum) -> Result<(), EditError>;
    fn open_root(&mut self, base_revision: Option<Revnum>) -> Result<Self::Dir, EditError>;
    fn delete_entry(
        &mut self,
        rel_path: &str,
        revision: Option<Revnum>,
        parent: &Self::Dir,
    ) -> Result<(), EditError>;
    fn add_directory(
        &mut self,
        rel_path: &str,
        parent: &Self::Dir,
        copyfrom: Option<(String, Revnum)>,
    ) -> Result<Self::Dir, EditError>;
    fn open_directory(
        &mut self,
        rel_path: &str,
        parent: &Self::Dir,
        base_revision: Option<Revnum>,
    ) -> Result<Self::Dir, EditError>;
    fn change_dir_prop(
        &mut self,
        dir: &Self::Dir,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), EditError>;
    fn close_directory(&mut self, dir: Self::Dir) -> Result<(), EditError>;
    fn add_file(
        &mut self,
        rel_path: &str,
        parent: &Self::Dir,
        copyfrom: Option<(String, Revnum)>,
    ) -> Result<Self::File, EditError>;
    fn open_file(
        &mut self,
        rel_path: &str,
        parent: &Self::Dir,
        base_revision: Option<Revnum>,
    ) -> Result<Self::File, EditError>;
    fn apply_textdelta(
        &mut self,
        file: &Self::File,
        base_checksum: Option<&str>,
    ) -> Result<Box<dyn WindowHandler>, EditError>;
    fn change_file_prop(
        &mut self,
        file: &Self::File,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), EditError>;
    fn close_file(&mut self, file: Self::File, text_checksum: Option<&str>)
        -> Result<(), EditError>;
    fn close_edit(self) -> Result<(), EditError>
    where
        Self: Sized;
}

/// Consumes one file's window stream. `None` ends the stream.
pub trait WindowHandler {
    fn window(&mut self, window: Option<&DeltaWindow>) -> Result<(), EditError>;
}

/// Reference-counted "directory done" tracker, one per directory
/// entered, living for the whole edit (directory batons die much
/// earlier under postfix delta order). Children hold shared
/// ownership of their parent's record; the count reaches zero
/// exactly when the directory and all descendants have closed.
pub struct BumpInfo {
    parent: Option<Rc<BumpInfo>>,
    ref_count: Cell<usize>,
    path: String,
}

pub struct EditContext {
    anchor: String,
    target: Option<String>,
    target_revision: Cell<Revnum>,
    recurse: bool,
    use_commit_times: bool,
    switch_url: Option<String>,
    diff3_cmd: Option<String>,
    notify: Option<NotifyFunc>,
    cancel: Option<CancelFunc>,
    traversal_info: Option<Rc<TraversalInfo>>,
    access: AccessSet,
    root_opened: Cell<bool>,
    target_deleted: Cell<bool>,
}

impl EditContext {
    fn notify(&self, n: Notification) {
        if let Some(ref f) = self.notify {
            f(&n);
        }
    }
}

pub struct DirState {
    /// Full working-copy path.
    path: String,
    /// Basename within the parent; `None` for the edit root.
    name: Option<String>,
    /// Repository URL this directory corresponds to after the edit.
    new_url: Option<String>,
    parent: Option<DirBaton>,
    added: bool,
    propchanges: RefCell<Vec<PropChange>>,
    bump: Rc<BumpInfo>,
}

pub type DirBaton = Rc<DirState>;

pub struct FileState {
    /// Full working-copy path, and the directory holding it.
    path: String,
    dir_path: String,
    name: String,
    new_url: Option<String>,
    added: bool,
    text_changed: Cell<bool>,
    prop_changed: Cell<bool>,
    propchanges: RefCell<Vec<PropChange>>,
    /// Cached committed-date entry prop, for commit-time stamping.
    last_changed_date: RefCell<Option<String>>,
    /// Hex MD5 of the reconstructed full text, set by the window
    /// handler at end-of-stream.
    digest: RefCell<Option<String>>,
    bump: Rc<BumpInfo>,
}

pub type FileBaton = Rc<FileState>;

/// The update/switch editor.
pub struct UpdateEditor {
    ctx: Rc<EditContext>,
}

fn get_entry_url(dir: &str, name: Option<&str>) -> Option<String> {
    let entries = Entries::read(dir).ok()?;
    entries.get(name.unwrap_or(""))?.url.clone()
}

impl UpdateEditor {
    fn make_dir_baton(
        &self,
        rel_path: Option<&str>,
        parent: Option<&DirBaton>,
        added: bool,
    ) -> DirBaton {
        assert!(!(parent.is_some() && rel_path.is_none()));
        let ctx = &self.ctx;
        let (dir_path, name) = match rel_path {
            Some(p) => (
                path::join(&ctx.anchor, p),
                Some(path::file_name(p).unwrap_or(p).to_string()),
            ),
            None => (ctx.anchor.clone(), None),
        };

        let new_url = if let Some(ref switch_url) = ctx.switch_url {
            match parent {
                // The root either is both anchor and target (and
                // gets the switch URL itself), or is just the
                // anchor of a deeper target (and gets its parent).
                None => {
                    if ctx.target.is_some() {
                        Some(switch_url.clone())
                    } else {
                        Some(path::url_parent(switch_url))
                    }
                }
                Some(pb) => {
                    if pb.parent.is_none() {
                        Some(switch_url.clone())
                    } else {
                        pb.new_url
                            .as_ref()
                            .map(|u| path::url_join(u, name.as_deref().unwrap_or("")))
                    }
                }
            }
        } else {
            // Plain update: keep the URL already on disk, else
            // telescope from the parent.
            get_entry_url(&dir_path, None).or_else(|| {
                parent.and_then(|pb| {
                    pb.new_url
                        .as_ref()
                        .map(|u| path::url_join(u, name.as_deref().unwrap_or("")))
                })
            })
        };

        let bump = Rc::new(BumpInfo {
            parent: parent.map(|pb| {
                pb.bump.ref_count.set(pb.bump.ref_count.get() + 1);
                pb.bump.clone()
            }),
            ref_count: Cell::new(1),
            path: dir_path.clone(),
        });

        Rc::new(DirState {
            path: dir_path,
            name,
            new_url,
            parent: parent.cloned(),
            added,
            propchanges: RefCell::new(Vec::new()),
            bump,
        })
    }

    fn make_file_baton(&self, parent: &DirBaton, rel_path: &str, adding: bool) -> FileBaton {
        let ctx = &self.ctx;
        let name = path::file_name(rel_path).unwrap_or(rel_path).to_string();
        let file_path = path::join(&ctx.anchor, rel_path);
        let new_url = if ctx.switch_url.is_some() {
            parent.new_url.as_ref().map(|u| path::url_join(u, &name))
        } else {
            get_entry_url(&parent.path, Some(&name))
        };
        parent.bump.ref_count.set(parent.bump.ref_count.get() + 1);
        Rc::new(FileState {
            path: file_path,
            dir_path: parent.path.clone(),
            name,
            new_url,
            added: adding,
            text_changed: Cell::new(false),
            prop_changed: Cell::new(false),
            propchanges: RefCell::new(Vec::new()),
            last_changed_date: RefCell::new(None),
            digest: RefCell::new(None),
            bump: parent.bump.clone(),
        })
    }

    /// In one atomic rewrite of the entries table: clear the
    /// directory's `incomplete` flag, sweep tombstones, and drop
    /// entries for subdirectories that vanished from disk without
    /// being scheduled for addition.
    fn complete_directory(&self, dir_path: &str, is_root: bool) -> Result<(), EditError> {
        let ctx = &self.ctx;
        debug!("complete_directory {:?} root = {:?}", dir_path, is_root);
        let mut entries = Entries::read(dir_path)?;
        match entries.0.get_mut("") {
            Some(this) => this.incomplete = false,
            None => return Err(EditError::EntryNotFound(format!("no '' entry in {:?}", dir_path))),
        }

        let mut doomed: Vec<(String, Kind)> = Vec::new();
        if is_root && ctx.target.is_some() {
            // The edit only operated on the target; leave every
            // sibling alone.
            let target = ctx.target.as_deref().unwrap();
            if let Some(current) = entries.get(target).cloned() {
                if current.deleted {
                    // A tombstone that *is* the update target is
                    // intentional and stays.
                    if !ctx.target_deleted.get() {
                        entries.remove(target);
                    }
                } else if current.kind == Kind::Dir {
                    let child = path::join(dir_path, target);
                    if adm::adm_missing(&child) && current.schedule != Schedule::Add {
                        doomed.push((target.to_string(), current.kind));
                    }
                }
            }
        } else {
            for (name, entry) in entries.iter() {
                if name.is_empty() {
                    continue;
                }
                if entry.deleted {
                    doomed.push((name.clone(), entry.kind));
                } else if entry.kind == Kind::Dir {
                    let child = path::join(dir_path, name);
                    if adm::adm_missing(&child) && entry.schedule != Schedule::Add {
                        doomed.push((name.clone(), entry.kind));
                    }
                }
            }
        }
        for (name, kind) in doomed {
            let was_tombstone = entries.get(&name).map(|e| e.deleted).unwrap_or(false);
            entries.remove(&name);
            if !was_tombstone {
                ctx.notify(
                    Notification::new(&path::join(dir_path, &name), NotifyAction::UpdateDelete)
                        .kind(kind),
                );
            }
        }
        entries.write(dir_path)?;
        Ok(())
    }

    /// Drops one reference from `bump`; a count reaching zero
    /// completes that directory and recurses into its parent.
    fn maybe_bump(&self, bump: &Rc<BumpInfo>) -> Result<(), EditError> {
        let mut current = Some(bump.clone());
        while let Some(bdi) = current {
            let n = bdi.ref_count.get() - 1;
            bdi.ref_count.set(n);
            trace!("bump {:?} -> {}", bdi.path, n);
            if n > 0 {
                return Ok(());
            }
            self.complete_directory(&bdi.path, bdi.parent.is_none())?;
            current = bdi.parent.clone();
        }
        Ok(())
    }

    fn do_entry_deletion(&self, parent_path: &str, rel_path: &str) -> Result<(), EditError> {
        let ctx = &self.ctx;
        let base_name = path::file_name(rel_path).unwrap_or(rel_path);
        let full_path = path::join(parent_path, base_name);
        let kind = adm::disk_kind(&full_path);
        let adm = ctx.access.retrieve(parent_path)?;
        debug!("delete_entry {:?} (kind {:?})", full_path, kind);

        if kind == DiskKind::File {
            let tmodified = merge::text_modified(parent_path, base_name)?;
            let pmodified = props::props_modified(parent_path, Some(base_name))?;
            if tmodified || pmodified {
                return Err(EditError::ObstructedUpdate(format!(
                    "failed to delete file '{}': file has local modifications",
                    base_name
                )));
            }
        }

        let mut log = LogBuffer::new();
        log.push(LogCommand::DeleteEntry {
            name: base_name.to_string(),
        });

        // Deleting the very target of the update leaves a phantom
        // tombstone behind, carrying the new revision, so the parent
        // keeps reporting the name accurately.
        if ctx.target.as_deref() == Some(rel_path) {
            log.push(LogCommand::ModifyEntry {
                name: base_name.to_string(),
                update: EntryUpdate {
                    kind: Some(if kind == DiskKind::File {
                        Kind::File
                    } else {
                        Kind::Dir
                    }),
                    revision: Some(ctx.target_revision.get()),
                    deleted: Some(true),
                    ..Default::default()
                },
            });
            ctx.target_deleted.set(true);
        }

        log.flush(&adm)?;

        if ctx.switch_url.is_some() && kind == DiskKind::Dir {
            // A switch has already rewritten the parent's URL, which
            // would make the child look like a disjoint working copy
            // and block its removal from the parent. Take the child
            // out of revision control ourselves, before the log
            // replays; the delete-entry command then only has the
            // parent's record left to drop.
            let result = remove::remove_dir_from_revision_control(
                &full_path,
                true,
                ctx.cancel.as_ref(),
            );
            if let Err(e) = result {
                return Err(self.leftmod_error(e.into(), parent_path));
            }
        }

        if let Err(e) = logfile::run_log(&adm, ctx.diff3_cmd.as_deref(), ctx.cancel.as_ref()) {
            return Err(self.leftmod_error(e, parent_path));
        }

        ctx.notify(Notification::new(&full_path, NotifyAction::UpdateDelete));
        Ok(())
    }

    /// Rewrites a replay failure caused by surviving local
    /// modifications into an obstructed update, discarding the
    /// half-written log so the next cleanup does not retry the
    /// deletion.
    fn leftmod_error(&self, err: LogError, parent_path: &str) -> EditError {
        if err.left_local_mod() {
            logfile::discard_log(parent_path);
            EditError::ObstructedUpdate(format!(
                "failed to delete '{}': local modifications found within",
                parent_path
            ))
        } else {
            err.into()
        }
    }

    fn add_or_open_file(
        &self,
        rel_path: &str,
        parent: &DirBaton,
        adding: bool,
    ) -> Result<FileBaton, EditError> {
        let fb = self.make_file_baton(parent, rel_path, adding);
        let kind = adm::disk_kind(&fb.path);
        let entry = Entries::read(&parent.path)?.get(&fb.name).cloned();

        if adding && kind != DiskKind::None {
            return Err(EditError::ObstructedUpdate(format!(
                "failed to add file '{}': object of the same name already exists",
                fb.path
            )));
        }
        // Re-adding a file whose working copy the user deleted is
        // fine; a pre-existing entry only blocks the add when it is
        // itself scheduled for addition.
        if adding {
            if let Some(ref e) = entry {
                if e.schedule == Schedule::Add {
                    return Err(EditError::ObstructedUpdate(format!(
                        "failed to add file '{}': object of the same name is already scheduled for addition",
                        fb.path
                    )));
                }
            }
        }
        if !adding && entry.is_none() {
            return Err(EditError::EntryNotFound(format!(
                "trying to open non-versioned file '{}' in directory '{}'",
                fb.name, parent.path
            )));
        }
        Ok(fb)
    }
}

impl DeltaEditor for UpdateEditor {
    type Dir = DirBaton;
    type File = FileBaton;

    fn set_target_revision(&mut self, revision: Revnum) -> Result<(), EditError> {
        trace!("set_target_revision {}", revision);
        self.ctx.target_revision.set(revision);
        Ok(())
    }

    fn open_root(&mut self, _base_revision: Option<Revnum>) -> Result<DirBaton, EditError> {
        let ctx = self.ctx.clone();
        debug!("open_root of {:?}", ctx.anchor);
        ctx.root_opened.set(true);
        let d = self.make_dir_baton(None, None, false);
        if ctx.target.is_none() {
            // Without a target this behaves exactly like opening the
            // directory itself: at the new revision and URL, but
            // incomplete until everything below has arrived.
            ctx.access.retrieve(&d.path)?;
            entries::entry_modify(
                &d.path,
                "",
                &EntryUpdate {
                    revision: Some(ctx.target_revision.get()),
                    url: d.new_url.clone(),
                    incomplete: Some(true),
                    ..Default::default()
                },
            )?;
        }
        Ok(d)
    }

    fn delete_entry(
        &mut self,
        rel_path: &str,
        _revision: Option<Revnum>,
        parent: &DirBaton,
    ) -> Result<(), EditError> {
        self.do_entry_deletion(&parent.path, rel_path)
    }

    fn add_directory(
        &mut self,
        rel_path: &str,
        parent: &DirBaton,
        copyfrom: Option<(String, Revnum)>,
    ) -> Result<DirBaton, EditError> {
        let ctx = self.ctx.clone();
        let db = self.make_dir_baton(Some(rel_path), Some(parent), true);
        debug!("add_directory {:?}", db.path);

        if adm::disk_kind(&db.path) != DiskKind::None {
            return Err(EditError::ObstructedUpdate(format!(
                "failed to add directory '{}': object of the same name already exists",
                db.path
            )));
        }
        let name = db.name.as_deref().unwrap_or("");
        if name == crate::DOT_DIR {
            return Err(EditError::ObstructedUpdate(format!(
                "failed to add directory '{}': object of the same name as the administrative directory",
                db.path
            )));
        }
        if copyfrom.is_some() {
            return Err(EditError::UnsupportedFeature(format!(
                "failed to add directory '{}': copyfrom args not yet supported",
                db.path
            )));
        }
        if let Some(e) = Entries::read(&parent.path)?.get(name) {
            if e.schedule == Schedule::Add {
                return Err(EditError::ObstructedUpdate(format!(
                    "failed to add directory '{}': object of the same name is already scheduled for addition",
                    rel_path
                )));
            }
        }
        // The parent gets the child's record right away; a phantom
        // tombstone under this name loses its deleted flag here.
        ctx.access.retrieve(&parent.path)?;
        entries::entry_modify(
            &parent.path,
            name,
            &EntryUpdate {
                kind: Some(Kind::Dir),
                deleted: Some(false),
                ..Default::default()
            },
        )?;

        // Bring the directory itself into existence, versioned at
        // the right ancestry, incomplete until its close.
        let url = db
            .new_url
            .clone()
            .ok_or_else(|| EditError::EntryMissingUrl(db.path.clone()))?;
        adm::ensure_adm(&db.path, &url, ctx.target_revision.get())?;
        ctx.access.open_into(&db.path)?;
        entries::entry_modify(
            &db.path,
            "",
            &EntryUpdate {
                revision: Some(ctx.target_revision.get()),
                url: Some(url),
                incomplete: Some(true),
                ..Default::default()
            },
        )?;

        ctx.notify(Notification::new(&db.path, NotifyAction::UpdateAdd).kind(Kind::Dir));
        Ok(db)
    }

    fn open_directory(
        &mut self,
        rel_path: &str,
        parent: &DirBaton,
        _base_revision: Option<Revnum>,
    ) -> Result<DirBaton, EditError> {
        let ctx = self.ctx.clone();
        let db = self.make_dir_baton(Some(rel_path), Some(parent), false);
        debug!("open_directory {:?}", db.path);
        ctx.access.retrieve(&db.path)?;
        entries::entry_modify(
            &db.path,
            "",
            &EntryUpdate {
                revision: Some(ctx.target_revision.get()),
                url: db.new_url.clone(),
                incomplete: Some(true),
                ..Default::default()
            },
        )?;
        Ok(db)
    }

    fn change_dir_prop(
        &mut self,
        dir: &DirBaton,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), EditError> {
        dir.propchanges.borrow_mut().push(PropChange {
            name: name.to_string(),
            value: value.map(|v| v.to_string()),
        });
        Ok(())
    }

    fn close_directory(&mut self, dir: DirBaton) -> Result<(), EditError> {
        let ctx = self.ctx.clone();
        debug!("close_directory {:?}", dir.path);
        let propchanges = dir.propchanges.borrow();
        let cat = props::categorize(&propchanges);
        let mut prop_state = NotifyState::Unknown;

        if !cat.regular.is_empty() || !cat.entry.is_empty() || !cat.wc.is_empty() {
            let adm = ctx.access.retrieve(&dir.path)?;
            let mut log = LogBuffer::new();

            if !cat.regular.is_empty() {
                if let Some(ref ti) = ctx.traversal_info {
                    if let Some(change) = cat
                        .regular
                        .iter()
                        .find(|c| c.name == props::PROP_EXTERNALS)
                    {
                        let old_val =
                            props::prop_get(&dir.path, None, props::PROP_EXTERNALS)?;
                        if old_val.as_deref() != change.value.as_deref()
                            && !(old_val.is_none() && change.value.is_none())
                        {
                            ti.record(&dir.path, old_val.as_deref(), change.value.as_deref());
                        }
                    }
                }
                prop_state =
                    props::merge_prop_diffs(&adm, None, &cat.regular, &mut log)?.into();
                if !props::props_modified(&dir.path, None)? {
                    log.push(LogCommand::ModifyEntry {
                        name: String::new(),
                        update: EntryUpdate {
                            prop_time: Some(entries::TimeValue::Working),
                            ..Default::default()
                        },
                    });
                }
            }

            let entry_update = install::entry_props_update(&cat.entry);
            if !entry_update.is_empty() {
                log.push(LogCommand::ModifyEntry {
                    name: String::new(),
                    update: entry_update,
                });
            }
            for change in &cat.wc {
                log.push(LogCommand::ModifyWcprop {
                    name: String::new(),
                    propname: change.name.clone(),
                    propval: change.value.clone(),
                });
            }

            log.flush(&adm)?;
            logfile::run_log(&adm, ctx.diff3_cmd.as_deref(), ctx.cancel.as_ref())?;
        }
        drop(propchanges);

        self.maybe_bump(&dir.bump)?;

        if !dir.added {
            ctx.notify(
                Notification::new(&dir.path, NotifyAction::UpdateUpdate)
                    .kind(Kind::Dir)
                    .states(NotifyState::Unknown, prop_state),
            );
        }
        Ok(())
    }

    fn add_file(
        &mut self,
        rel_path: &str,
        parent: &DirBaton,
        _copyfrom: Option<(String, Revnum)>,
    ) -> Result<FileBaton, EditError> {
        // copyfrom args are accepted and ignored, like the directory
        // case will be once someone implements the local-copy
        // optimization.
        self.add_or_open_file(rel_path, parent, true)
    }

    fn open_file(
        &mut self,
        rel_path: &str,
        parent: &DirBaton,
        _base_revision: Option<Revnum>,
    ) -> Result<FileBaton, EditError> {
        self.add_or_open_file(rel_path, parent, false)
    }

    fn apply_textdelta(
        &mut self,
        file: &FileBaton,
        base_checksum: Option<&str>,
    ) -> Result<Box<dyn WindowHandler>, EditError> {
        debug!("apply_textdelta on {:?}", file.path);
        let entry = Entries::read(&file.dir_path)?.get(&file.name).cloned();

        // No recorded checksum means the file was created by this
        // very edit; nothing to verify yet.
        if let Some(stored) = entry.and_then(|e| e.checksum) {
            let tb = pristine::text_base_path(&file.path, false);
            let actual = pristine::file_md5(&tb)?;
            if let Some(base) = base_checksum {
                if actual != base {
                    return Err(EditError::CorruptTextBase {
                        path: tb,
                        expected: base.to_string(),
                        actual,
                    });
                }
            }
            if actual != stored {
                // Older working copies recorded digests in base64.
                let legacy = pristine::md5_hex_to_base64(&actual);
                if legacy.as_deref() != Some(stored.as_str()) {
                    return Err(EditError::CorruptTextBase {
                        path: tb,
                        expected: stored,
                        actual,
                    });
                }
            }
        }

        let source = pristine::open_text_base(&file.path)?;
        let (dest, tmp_path) = pristine::create_text_base_tmp(&file.path)?;
        Ok(Box::new(TextDeltaHandler {
            applier: Some(DeltaApplier::new(source, dest)),
            file: file.clone(),
            tmp_path,
        }))
    }

    fn change_file_prop(
        &mut self,
        file: &FileBaton,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), EditError> {
        file.propchanges.borrow_mut().push(PropChange {
            name: name.to_string(),
            value: value.map(|v| v.to_string()),
        });
        file.prop_changed.set(true);
        if self.ctx.use_commit_times && name == props::PROP_ENTRY_COMMITTED_DATE {
            *file.last_changed_date.borrow_mut() = value.map(|v| v.to_string());
        }
        Ok(())
    }

    fn close_file(
        &mut self,
        file: FileBaton,
        text_checksum: Option<&str>,
    ) -> Result<(), EditError> {
        let ctx = self.ctx.clone();
        debug!("close_file {:?}", file.path);

        let new_text_path = if file.text_changed.get() {
            let p = pristine::text_base_path(&file.path, true);
            if let Some(expected) = text_checksum {
                let actual = file.digest.borrow().clone().unwrap_or_default();
                if actual != expected {
                    return Err(EditError::ChecksumMismatch {
                        path: file.path.clone(),
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
            Some(p)
        } else {
            None
        };

        let propchanges = file.propchanges.borrow();
        let props_arg: Option<&[PropChange]> = if file.prop_changed.get() {
            Some(&propchanges[..])
        } else {
            None
        };

        let (content_state, prop_state) = install::install_file(InstallFile {
            access: &ctx.access,
            file_path: &file.path,
            new_revision: ctx.target_revision.get(),
            new_text_path,
            props: props_arg,
            is_full_proplist: false,
            new_url: file.new_url.as_deref(),
            is_add: false,
            copyfrom: None,
            diff3_cmd: ctx.diff3_cmd.as_deref(),
            timestamp_string: file.last_changed_date.borrow().as_deref(),
            cancel: ctx.cancel.as_ref(),
        })?;
        drop(propchanges);

        self.maybe_bump(&file.bump)?;

        if content_state != NotifyState::Unchanged || prop_state != NotifyState::Unchanged {
            ctx.notify(
                Notification::new(
                    &file.path,
                    if file.added {
                        NotifyAction::UpdateAdd
                    } else {
                        NotifyAction::UpdateUpdate
                    },
                )
                .kind(Kind::File)
                .states(content_state, prop_state),
            );
        }
        Ok(())
    }

    fn close_edit(self) -> Result<(), EditError> {
        let ctx = self.ctx.clone();
        let target_path = match ctx.target {
            Some(ref t) => path::join(&ctx.anchor, t),
            None => ctx.anchor.clone(),
        };
        debug!("close_edit, target_path = {:?}", target_path);

        if !ctx.root_opened.get() {
            // An empty edit against a missing target means the
            // server no longer knows the name: behave as if the
            // driver had sent the deletion itself.
            if ctx.target.is_some() && adm::adm_missing(&target_path) {
                self.do_entry_deletion(&ctx.anchor, ctx.target.as_deref().unwrap())?;
            }
            self.complete_directory(&ctx.anchor, true)?;
        }

        // Everything under the edit's scope now moves to the target
        // revision (and, on a switch, the new URLs) — except when
        // the whole point of the edit was to tombstone the target.
        if !ctx.target_deleted.get() {
            do_update_cleanup(
                &target_path,
                ctx.recurse,
                ctx.switch_url.as_deref(),
                ctx.target_revision.get(),
            )?;
        }

        ctx.notify(
            Notification::new(&ctx.anchor, NotifyAction::UpdateCompleted)
                .states(NotifyState::Inapplicable, NotifyState::Inapplicable)
                .revision(ctx.target_revision.get()),
        );
        Ok(())
    }
}

/// Recursively stamps every entry in scope with the new revision,
/// rewriting URLs on a switch. Scheduled and missing things keep
/// their story: an add or delete in flight, or a subdirectory gone
/// from disk, is not "updated" by anyone.
fn do_update_cleanup(
    target_path: &str,
    recurse: bool,
    base_url: Option<&str>,
    revision: Revnum,
) -> Result<(), EditError> {
    debug!("update_cleanup {:?} -> r{}", target_path, revision);
    match entries::stat_entry(target_path)? {
        None => return Ok(()),
        Some(entry) if entry.kind == Kind::File => {
            let (dir, name) = path::split(target_path);
            let mut entries = Entries::read(dir)?;
            if let Some(e) = entries.0.get_mut(name) {
                if e.schedule == Schedule::Normal {
                    e.revision = Some(revision);
                    if let Some(url) = base_url {
                        e.url = Some(url.to_string());
                    }
                }
            }
            entries.write(dir)?;
        }
        Some(_) => tweak_entries(target_path, base_url, revision, recurse)?,
    }
    Ok(())
}

fn tweak_entries(
    dir_path: &str,
    base_url: Option<&str>,
    revision: Revnum,
    recurse: bool,
) -> Result<(), EditError> {
    let mut entries = Entries::read(dir_path)?;
    let mut subdirs = Vec::new();
    for (name, entry) in entries.0.iter_mut() {
        if entry.deleted || entry.schedule != Schedule::Normal {
            continue;
        }
        if name.is_empty() {
            entry.revision = Some(revision);
            if let Some(url) = base_url {
                entry.url = Some(url.to_string());
            }
            continue;
        }
        let child_url = base_url.map(|u| path::url_join(u, name));
        match entry.kind {
            Kind::File => {
                entry.revision = Some(revision);
                if let Some(u) = child_url {
                    entry.url = Some(u);
                }
            }
            Kind::Dir => {
                let child = path::join(dir_path, name);
                if recurse && !adm::adm_missing(&child) {
                    subdirs.push((child, child_url));
                }
            }
        }
    }
    entries.write(dir_path)?;
    for (child, child_url) in subdirs {
        tweak_entries(&child, child_url.as_deref(), revision, recurse)?;
    }
    Ok(())
}

struct TextDeltaHandler {
    applier: Option<DeltaApplier>,
    file: FileBaton,
    tmp_path: String,
}

impl TextDeltaHandler {
    fn discard_tmp(&self) {
        if let Err(e) = std::fs::remove_file(Path::new(&self.tmp_path)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                info!("while removing {:?}: {:?}", self.tmp_path, e);
            }
        }
    }
}

impl WindowHandler for TextDeltaHandler {
    fn window(&mut self, window: Option<&DeltaWindow>) -> Result<(), EditError> {
        let applier = match self.applier.as_mut() {
            Some(a) => a,
            None => return Ok(()), // stream already ended
        };
        match window {
            Some(w) => match applier.apply_window(w) {
                Ok(()) => Ok(()),
                Err(e) => {
                    // Dropping the applier closes both streams; the
                    // half-written staging text-base goes with it.
                    // The window's own error is the one worth
                    // keeping.
                    self.applier = None;
                    self.discard_tmp();
                    Err(e.into())
                }
            },
            None => {
                let applier = self.applier.take().unwrap();
                match applier.finish() {
                    Ok(digest) => {
                        *self.file.digest.borrow_mut() = Some(digest);
                        self.file.text_changed.set(true);
                        Ok(())
                    }
                    Err(e) => {
                        self.discard_tmp();
                        Err(e.into())
                    }
                }
            }
        }
    }
}

pub struct EditorParams {
    pub anchor: String,
    pub target: Option<String>,
    pub target_revision: Revnum,
    pub use_commit_times: bool,
    pub recurse: bool,
    pub notify: Option<NotifyFunc>,
    pub cancel: Option<CancelFunc>,
    pub diff3_cmd: Option<String>,
    pub traversal_info: Option<Rc<TraversalInfo>>,
    pub access: AccessSet,
}

fn make_editor(params: EditorParams, switch_url: Option<String>) -> CancelEditor<UpdateEditor> {
    let cancel = params.cancel.clone();
    let editor = UpdateEditor {
        ctx: Rc::new(EditContext {
            anchor: params.anchor,
            target: params.target.filter(|t| !t.is_empty()),
            target_revision: Cell::new(params.target_revision),
            recurse: params.recurse,
            use_commit_times: params.use_commit_times,
            switch_url,
            diff3_cmd: params.diff3_cmd,
            notify: params.notify,
            cancel: params.cancel,
            traversal_info: params.traversal_info,
            access: params.access,
            root_opened: Cell::new(false),
            target_deleted: Cell::new(false),
        }),
    };
    CancelEditor::new(editor, cancel)
}

/// The editor driven by an update: integrates the target revision
/// under `params.anchor`, keeping URLs as they are.
pub fn update_editor(params: EditorParams) -> CancelEditor<UpdateEditor> {
    make_editor(params, None)
}

/// The editor driven by a switch: like an update, but every affected
/// entry is rewritten to descend from `switch_url`.
pub fn switch_editor(params: EditorParams, switch_url: String) -> CancelEditor<UpdateEditor> {
    make_editor(params, Some(switch_url))
}
