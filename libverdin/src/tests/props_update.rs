use super::*;
use crate::editor::TraversalInfo;
use crate::notify::NotifyState;

/// Directory property changes land in both the pristine and working
/// prop files, entry props in the entries table, wc props in the
/// wcprops store.
#[test]
fn close_directory_installs_props() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    let mut ed = editor_for(&anchor, None, 4, &access, None);
    let root = ed.open_root(Some(3))?;
    ed.change_dir_prop(&root, "license", Some("MIT"))?;
    ed.change_dir_prop(&root, props::PROP_ENTRY_LAST_AUTHOR, Some("jrandom"))?;
    ed.change_dir_prop(&root, "vn:wc:ra-token", Some("opaque"))?;
    ed.close_directory(root)?;
    ed.close_edit()?;

    assert_eq!(
        props::prop_get(&anchor, None, "license")?.as_deref(),
        Some("MIT")
    );
    let base = props::load_prop_file(&path::join(
        &anchor,
        &props::prop_rel(None, true, false),
    ))?;
    assert_eq!(base.get("license").map(|s| s.as_str()), Some("MIT"));
    let this = entry_of(&anchor, "").unwrap();
    assert_eq!(this.cmt_author.as_deref(), Some("jrandom"));
    assert!(this.prop_time.is_some());
    let wcprops = props::load_prop_file(&path::join(&anchor, &props::wcprop_rel(None)))?;
    assert_eq!(wcprops.get("vn:wc:ra-token").map(|s| s.as_str()), Some("opaque"));
    Ok(())
}

/// An incoming prop change that clashes with a local one conflicts:
/// the pristine takes the repository value, the working value stays,
/// and a reject file appears.
#[test]
fn conflicting_prop_change_is_rejected() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    versioned_file(&anchor, "a.txt", b"x\n", None, 3);
    set_props(&anchor, Some("a.txt"), &[("color", "blue")], true);
    // Local edit: blue -> green.
    set_props(&anchor, Some("a.txt"), &[("color", "green")], false);

    let (collected, notify) = Collected::new();
    let mut ed = editor_for(&anchor, None, 4, &access, Some(notify));
    let root = ed.open_root(Some(3))?;
    let f = ed.open_file("a.txt", &root, Some(3))?;
    ed.change_file_prop(&f, "color", Some("red"))?;
    ed.close_file(f, None)?;
    ed.close_directory(root)?;
    ed.close_edit()?;

    assert_eq!(
        props::prop_get(&anchor, Some("a.txt"), "color")?.as_deref(),
        Some("green")
    );
    let base = props::load_prop_file(&path::join(
        &anchor,
        &props::prop_rel(Some("a.txt"), true, false),
    ))?;
    assert_eq!(base.get("color").map(|s| s.as_str()), Some("red"));
    let entry = entry_of(&anchor, "a.txt").unwrap();
    assert!(entry.prop_reject.is_some());
    assert!(
        adm::disk_kind(&path::join(&anchor, entry.prop_reject.as_deref().unwrap()))
            != adm::DiskKind::None
    );
    let n = collected
        .notifications
        .borrow()
        .iter()
        .find(|n| n.path.ends_with("a.txt"))
        .cloned()
        .unwrap();
    assert_eq!(n.prop_state, NotifyState::Conflicted);
    Ok(())
}

/// Changes to the externals property are recorded, before and after,
/// for the driver to consume once the edit is over.
#[test]
fn externals_changes_are_collected() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    set_props(
        &anchor,
        None,
        &[(props::PROP_EXTERNALS, "lib proto://repo/lib")],
        true,
    );
    let ti = Rc::new(TraversalInfo::new());
    let mut ed = crate::editor::update_editor(EditorParams {
        anchor: anchor.clone(),
        target: None,
        target_revision: 4,
        use_commit_times: false,
        recurse: true,
        notify: None,
        cancel: None,
        diff3_cmd: None,
        traversal_info: Some(ti.clone()),
        access: access.clone(),
    });
    ed.set_target_revision(4)?;
    let root = ed.open_root(Some(3))?;
    ed.change_dir_prop(&root, props::PROP_EXTERNALS, Some("lib proto://repo/lib2"))?;
    ed.close_directory(root)?;
    ed.close_edit()?;

    let (old, new) = ti.edited_externals();
    assert_eq!(old.get(&anchor).map(|s| s.as_str()), Some("lib proto://repo/lib"));
    assert_eq!(new.get(&anchor).map(|s| s.as_str()), Some("lib proto://repo/lib2"));
    Ok(())
}

/// An unchanged externals value records nothing.
#[test]
fn unchanged_externals_not_collected() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    set_props(
        &anchor,
        None,
        &[(props::PROP_EXTERNALS, "lib proto://repo/lib")],
        true,
    );
    let ti = Rc::new(TraversalInfo::new());
    let mut ed = crate::editor::update_editor(EditorParams {
        anchor: anchor.clone(),
        target: None,
        target_revision: 4,
        use_commit_times: false,
        recurse: true,
        notify: None,
        cancel: None,
        diff3_cmd: None,
        traversal_info: Some(ti.clone()),
        access: access.clone(),
    });
    ed.set_target_revision(4)?;
    let root = ed.open_root(Some(3))?;
    ed.change_dir_prop(&root, props::PROP_EXTERNALS, Some("lib proto://repo/lib"))?;
    ed.close_directory(root)?;
    ed.close_edit()?;

    let (old, new) = ti.edited_externals();
    assert!(old.is_empty() && new.is_empty());
    Ok(())
}

/// A magic-prop-only change still retranslates the working file.
#[test]
fn magic_prop_change_retranslates() -> Result<(), anyhow::Error> {
    let (_tmp, anchor, access) = fixture(3);
    versioned_file(&anchor, "k.txt", b"rev is $Rev$\n", None, 3);
    let mut ed = editor_for(&anchor, None, 4, &access, None);
    let root = ed.open_root(Some(3))?;
    let f = ed.open_file("k.txt", &root, Some(3))?;
    ed.change_file_prop(&f, props::PROP_KEYWORDS, Some("Rev"))?;
    ed.change_file_prop(&f, props::PROP_ENTRY_COMMITTED_REV, Some("4"))?;
    ed.close_file(f, None)?;
    ed.close_directory(root)?;
    ed.close_edit()?;

    assert_eq!(read_file(&anchor, "k.txt"), b"rev is $Rev: 4 $\n");
    // The pristine stays contracted.
    assert_eq!(
        std::fs::read(pristine::text_base_path(&path::join(&anchor, "k.txt"), false))?,
        b"rev is $Rev$\n"
    );
    Ok(())
}
