//! Notifications emitted while an edit mutates the working copy. The
//! sink is a plain callback so drivers can print, collect or ignore
//! them.

use crate::entries::Kind;
use crate::Revnum;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
    UpdateAdd,
    UpdateDelete,
    UpdateUpdate,
    UpdateCompleted,
}

/// State of a file's content or properties after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyState {
    Unknown,
    Unchanged,
    Changed,
    Merged,
    Conflicted,
    Inapplicable,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub path: String,
    pub action: NotifyAction,
    pub kind: Option<Kind>,
    pub mime_type: Option<String>,
    pub content_state: NotifyState,
    pub prop_state: NotifyState,
    pub revision: Option<Revnum>,
}

pub type NotifyFunc = Rc<dyn Fn(&Notification)>;

impl Notification {
    pub fn new(path: &str, action: NotifyAction) -> Self {
        Notification {
            path: path.to_string(),
            action,
            kind: None,
            mime_type: None,
            content_state: NotifyState::Unknown,
            prop_state: NotifyState::Unknown,
            revision: None,
        }
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn states(mut self, content: NotifyState, prop: NotifyState) -> Self {
        self.content_state = content;
        self.prop_state = prop;
        self
    }

    pub fn revision(mut self, rev: Revnum) -> Self {
        self.revision = Some(rev);
        self
    }
}
