//! Deciding where to root an edit. Updating `P` drives an editor
//! rooted at an *anchor* directory, optionally restricted to a
//! *target* basename inside it: a plain directory anchors at itself,
//! anything else (a file, a working-copy root that is a file, a
//! path whose recorded URL diverges from its parent's) anchors at
//! its parent so the editor can delete or replace it.

use super::EditError;
use crate::entries::{self, Kind};
use crate::path;

/// A path is a working-copy root when its recorded parentage
/// diverges from its on-disk parentage: no versioned parent, or a
/// parent whose URL does not extend to it. The empty path is always
/// a root.
pub fn is_wc_root(wc_path: &str) -> Result<bool, EditError> {
    if wc_path.is_empty() {
        return Ok(true);
    }
    let entry = entries::stat_entry(wc_path)?
        .ok_or_else(|| EditError::EntryNotFound(wc_path.to_string()))?;
    let (parent, base_name) = path::split(wc_path);
    let p_entry = match entries::stat_entry(parent) {
        Ok(Some(e)) => e,
        // No versioned parent: nothing above us to belong to.
        Ok(None) | Err(_) => return Ok(true),
    };
    let p_url = p_entry
        .url
        .ok_or_else(|| EditError::EntryMissingUrl(parent.to_string()))?;
    if let Some(ref url) = entry.url {
        if path::url_join(&p_url, base_name) != *url {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Splits `wc_path` into the anchor to root an editor at and the
/// target basename to restrict it to (`None` = the whole anchor).
pub fn actual_target(wc_path: &str) -> Result<(String, Option<String>), EditError> {
    if wc_path.is_empty() {
        return Ok((String::new(), None));
    }
    let entry = entries::stat_entry(wc_path)?
        .ok_or_else(|| EditError::EntryNotFound(wc_path.to_string()))?;
    let root = is_wc_root(wc_path)?;
    if !root || entry.kind == Kind::File {
        let (anchor, base_name) = path::split(wc_path);
        Ok((anchor.to_string(), Some(base_name.to_string())))
    } else {
        Ok((wc_path.to_string(), None))
    }
}
