use crate::adm::AccessSet;
use crate::delta::DeltaWindow;
use crate::editor::{update_editor, CancelEditor, DeltaEditor, EditError, EditorParams, UpdateEditor};
use crate::entries::{self, Entries, Entry, EntryUpdate, Kind, Schedule};
use crate::notify::{Notification, NotifyFunc};
use crate::{adm, path, pristine, props, Revnum};
use std::cell::RefCell;
use std::rc::Rc;
use tempfile::TempDir;

mod anchor;
mod props_update;
mod replay;
mod update;

pub(crate) const REPO_URL: &str = "proto://repo/proj";

/// A fresh working copy of `proj` at revision `rev`, write-locked.
pub(crate) fn fixture(rev: Revnum) -> (TempDir, String, AccessSet) {
    env_logger::try_init().unwrap_or(());
    let tmp = tempfile::tempdir().unwrap();
    let anchor = tmp.path().join("proj").to_str().unwrap().to_string();
    adm::ensure_adm(&anchor, REPO_URL, rev).unwrap();
    let access = AccessSet::new();
    access.open(&anchor, true).unwrap();
    (tmp, anchor, access)
}

/// Puts a versioned file into the fixture: text-base, entry with
/// checksum and URL, and (optionally different) working text.
pub(crate) fn versioned_file(dir: &str, name: &str, base: &[u8], working: Option<&[u8]>, rev: Revnum) {
    let wc_path = path::join(dir, name);
    let tb = pristine::text_base_path(&wc_path, false);
    std::fs::write(&tb, base).unwrap();
    std::fs::write(&wc_path, working.unwrap_or(base)).unwrap();
    let dir_url = Entries::read(dir).unwrap().get("").unwrap().url.clone().unwrap();
    entries::entry_modify(
        dir,
        name,
        &EntryUpdate {
            kind: Some(Kind::File),
            revision: Some(rev),
            url: Some(path::url_join(&dir_url, name)),
            checksum: Some(pristine::md5_hex(base)),
            ..Default::default()
        },
    )
    .unwrap();
}

/// Puts a versioned subdirectory into the fixture, admin area
/// included, and locks it.
pub(crate) fn versioned_dir(parent: &str, name: &str, rev: Revnum, access: &AccessSet) -> String {
    let child = path::join(parent, name);
    let parent_url = Entries::read(parent)
        .unwrap()
        .get("")
        .unwrap()
        .url
        .clone()
        .unwrap();
    adm::ensure_adm(&child, &path::url_join(&parent_url, name), rev).unwrap();
    entries::entry_modify(
        parent,
        name,
        &EntryUpdate {
            kind: Some(Kind::Dir),
            revision: Some(rev),
            ..Default::default()
        },
    )
    .unwrap();
    access.open_into(&child).unwrap();
    child
}

pub(crate) struct Collected {
    pub notifications: Rc<RefCell<Vec<Notification>>>,
}

impl Collected {
    pub(crate) fn new() -> (Self, NotifyFunc) {
        let notifications = Rc::new(RefCell::new(Vec::new()));
        let sink = notifications.clone();
        let f: NotifyFunc = Rc::new(move |n: &Notification| sink.borrow_mut().push(n.clone()));
        (Collected { notifications }, f)
    }
}

pub(crate) fn editor_for(
    anchor: &str,
    target: Option<&str>,
    rev: Revnum,
    access: &AccessSet,
    notify: Option<NotifyFunc>,
) -> CancelEditor<UpdateEditor> {
    let mut ed = update_editor(EditorParams {
        anchor: anchor.to_string(),
        target: target.map(|t| t.to_string()),
        target_revision: rev,
        use_commit_times: false,
        recurse: true,
        notify,
        cancel: None,
        diff3_cmd: None,
        traversal_info: None,
        access: access.clone(),
    });
    ed.set_target_revision(rev).unwrap();
    ed
}

/// Feeds one full-text delta through the window handler, ending the
/// stream.
pub(crate) fn send_text<E: DeltaEditor>(
    ed: &mut E,
    file: &E::File,
    text: &[u8],
    base_checksum: Option<&str>,
) -> Result<(), EditError> {
    let mut handler = ed.apply_textdelta(file, base_checksum)?;
    handler.window(Some(&DeltaWindow::fulltext(text)))?;
    handler.window(None)
}

pub(crate) fn read_file(dir: &str, name: &str) -> Vec<u8> {
    std::fs::read(path::join(dir, name)).unwrap()
}

pub(crate) fn entry_of(dir: &str, name: &str) -> Option<Entry> {
    Entries::read(dir).unwrap().get(name).cloned()
}

pub(crate) fn schedule_add_entry(dir: &str, name: &str, kind: Kind) {
    entries::entry_modify(
        dir,
        name,
        &EntryUpdate {
            kind: Some(kind),
            schedule: Some(Schedule::Add),
            ..Default::default()
        },
    )
    .unwrap();
}

pub(crate) fn set_props(dir: &str, name: Option<&str>, pairs: &[(&str, &str)], base_too: bool) {
    let mut map = props::PropMap::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), v.to_string());
    }
    props::save_prop_file(&path::join(dir, &props::prop_rel(name, false, false)), &map).unwrap();
    if base_too {
        props::save_prop_file(&path::join(dir, &props::prop_rel(name, true, false)), &map)
            .unwrap();
    }
}
