#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate thiserror;

pub mod adm;
pub mod delta;
pub mod editor;
pub mod entries;
pub mod logfile;
pub mod merge;
pub mod notify;
pub mod path;
pub mod pristine;
pub mod props;
pub mod remove;
pub mod translate;

#[cfg(test)]
mod tests;

/// Name of the administrative directory kept inside every versioned
/// directory of a working copy.
pub const DOT_DIR: &str = ".verdin";

/// A repository revision number.
pub type Revnum = u64;

pub use crate::adm::{AccessSet, AdmAccess, AdmError, DiskKind};
pub use crate::editor::anchor::{actual_target, is_wc_root};
pub use crate::editor::{
    add_repos_file, switch_editor, update_editor, CancelEditor, DeltaEditor, EditError,
    EditorParams, TraversalInfo, UpdateEditor, WindowHandler,
};
pub use crate::entries::{Entries, Entry, EntryUpdate, Kind, Schedule};
pub use crate::logfile::{run_log, LogBuffer, LogCommand, LogError};
pub use crate::notify::{Notification, NotifyAction, NotifyFunc, NotifyState};
pub use crate::props::{PropChange, PropKind, PropState};

/// Signature of the cancellation probe handed to an edit. Returns
/// `true` when the caller wants the edit aborted.
pub type CancelFunc = std::rc::Rc<dyn Fn() -> bool>;
