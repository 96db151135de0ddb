use super::*;
use crate::editor::anchor::{actual_target, is_wc_root};

/// The empty path is always its own anchor.
#[test]
fn empty_path_is_root() -> Result<(), anyhow::Error> {
    assert!(is_wc_root("")?);
    assert_eq!(actual_target("")?, (String::new(), None));
    Ok(())
}

/// A versioned child whose URL extends its parent's anchors at the
/// parent.
#[test]
fn child_dir_anchors_at_parent() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    let bar = versioned_dir(&anchor, "bar", 3, &access);
    // The child's own entry needs the URL the parent would give it.
    assert!(!is_wc_root(&bar)?);
    let (a, t) = actual_target(&bar)?;
    assert_eq!(a, anchor);
    assert_eq!(t.as_deref(), Some("bar"));
    Ok(())
}

/// A child whose URL diverges from its parent is a disjoint working
/// copy: it anchors at itself.
#[test]
fn divergent_child_is_its_own_root() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    let bar = versioned_dir(&anchor, "bar", 3, &access);
    entries::entry_modify(
        &bar,
        "",
        &EntryUpdate {
            url: Some("proto://elsewhere/bar".to_string()),
            ..Default::default()
        },
    )?;
    assert!(is_wc_root(&bar)?);
    let (a, t) = actual_target(&bar)?;
    assert_eq!(a, bar);
    assert_eq!(t, None);
    Ok(())
}

/// Files always anchor at their parent, working-copy root or not.
#[test]
fn file_anchors_at_parent() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    let _ = access;
    versioned_file(&anchor, "a.txt", b"x\n", None, 3);
    let file_path = path::join(&anchor, "a.txt");
    let (a, t) = actual_target(&file_path)?;
    assert_eq!(a, anchor);
    assert_eq!(t.as_deref(), Some("a.txt"));
    Ok(())
}

/// A parent entry without ancestry information is an error, not a
/// guess.
#[test]
fn parent_without_url_errors() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    let bar = versioned_dir(&anchor, "bar", 3, &access);
    // Strip the parent's URL.
    let mut e = Entries::read(&anchor)?;
    e.0.get_mut("").unwrap().url = None;
    e.write(&anchor)?;
    match is_wc_root(&bar) {
        Err(EditError::EntryMissingUrl(_)) => {}
        other => panic!("expected missing-url error, got {:?}", other),
    }
    Ok(())
}
