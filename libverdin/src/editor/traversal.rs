//! Observed before/after values of the externals property, gathered
//! during an edit for the driver to plan external-dependency work
//! once the edit is over.

use std::cell::RefCell;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct TraversalInfo {
    externals_old: RefCell<BTreeMap<String, String>>,
    externals_new: RefCell<BTreeMap<String, String>>,
}

impl TraversalInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one observed change of the externals property on
    /// `dir_path`. Either side may be absent. Append-only: a later
    /// record for the same directory overwrites nothing the driver
    /// has already consumed, because the driver only reads after
    /// `close_edit`.
    pub fn record(&self, dir_path: &str, old: Option<&str>, new: Option<&str>) {
        debug!("externals changed on {:?}", dir_path);
        if let Some(old) = old {
            self.externals_old
                .borrow_mut()
                .insert(dir_path.to_string(), old.to_string());
        }
        if let Some(new) = new {
            self.externals_new
                .borrow_mut()
                .insert(dir_path.to_string(), new.to_string());
        }
    }

    /// Both maps, keyed by directory path.
    pub fn edited_externals(&self) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
        (
            self.externals_old.borrow().clone(),
            self.externals_new.borrow().clone(),
        )
    }
}
