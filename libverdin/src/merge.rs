//! Textual three-way merge, and the "has the user touched this
//! file?" probe that decides between overwrite and merge during an
//! update.
//!
//! The merge works on repository normal form: the working file is
//! detranslated first, merged against the old and new text-bases,
//! and the result is translated back into working form. Conflicts
//! produce inline markers plus backups of all three inputs.

use crate::adm::AdmAccess;
use crate::entries::{self, EntryUpdate};
use crate::translate::{self, Translation};
use crate::{path, pristine};
use similar::{capture_diff_slices, Algorithm, DiffOp};
use std::path::Path;
use std::process::Command;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("External diff3 failed on '{0}': {1}")]
    Diff3(String, String),
    #[error(transparent)]
    Translate(#[from] translate::TranslateError),
    #[error(transparent)]
    Entries(#[from] entries::EntriesError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Is the working text of `dir/name` different from its text-base?
/// The text-base comparison happens in normal form, so keyword
/// expansion and eol translation alone never count as local edits.
pub fn text_modified(dir: &str, name: &str) -> Result<bool, MergeError> {
    let working = path::join(dir, name);
    if crate::adm::disk_kind(&working) == crate::adm::DiskKind::None {
        return Ok(false);
    }
    let base_path = pristine::text_base_path(&working, false);
    if crate::adm::disk_kind(&base_path) == crate::adm::DiskKind::None {
        return Ok(true);
    }
    if let Some(entry) = entries::Entries::read(dir)?.get(name) {
        if let (Some(stamp), Ok(meta)) = (entry.text_time, std::fs::metadata(Path::new(&working))) {
            if let Ok(mtime) = meta.modified() {
                if chrono::DateTime::<chrono::Utc>::from(mtime) == stamp {
                    trace!("text_modified {:?}: timestamp match", working);
                    return Ok(false);
                }
            }
        }
    }
    let detranslated = translate::detranslated_working(dir, name)?;
    let base = std::fs::read(Path::new(&base_path))?;
    Ok(detranslated != base)
}

fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, &b) in data.iter().enumerate() {
        if b == b'\n' {
            out.push(&data[start..=i]);
            start = i + 1;
        }
    }
    if start < data.len() {
        out.push(&data[start..]);
    }
    out
}

/// One side's rewrite of a base region.
#[derive(Debug, Clone)]
struct Change {
    old_start: usize,
    old_end: usize,
    new_start: usize,
    new_end: usize,
}

fn changes_against(base: &[&[u8]], side: &[&[u8]]) -> Vec<Change> {
    capture_diff_slices(Algorithm::Myers, base, side)
        .into_iter()
        .filter_map(|op| match op {
            DiffOp::Equal { .. } => None,
            DiffOp::Delete {
                old_index,
                old_len,
                new_index,
            } => Some(Change {
                old_start: old_index,
                old_end: old_index + old_len,
                new_start: new_index,
                new_end: new_index,
            }),
            DiffOp::Insert {
                old_index,
                new_index,
                new_len,
            } => Some(Change {
                old_start: old_index,
                old_end: old_index,
                new_start: new_index,
                new_end: new_index + new_len,
            }),
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => Some(Change {
                old_start: old_index,
                old_end: old_index + old_len,
                new_start: new_index,
                new_end: new_index + new_len,
            }),
        })
        .collect()
}

pub struct Merged {
    pub data: Vec<u8>,
    pub conflicted: bool,
}

/// Classic diff3 region merge. Changes touching disjoint base
/// regions compose; overlapping changes that disagree produce a
/// conflict block delimited by the given labels.
pub fn three_way(
    base: &[u8],
    mine: &[u8],
    theirs: &[u8],
    mine_label: &str,
    theirs_label: &str,
) -> Merged {
    let base_l = split_lines(base);
    let mine_l = split_lines(mine);
    let theirs_l = split_lines(theirs);
    let a = changes_against(&base_l, &mine_l);
    let b = changes_against(&base_l, &theirs_l);

    let mut out: Vec<u8> = Vec::with_capacity(mine.len().max(theirs.len()));
    let mut conflicted = false;
    let (mut ai, mut bi) = (0, 0);
    let mut pos = 0; // next unconsumed base line

    // A chunk joins the cluster `[start, end)` when their base
    // regions genuinely intersect. An insertion (empty base region)
    // intersects only strictly inside the cluster, or when the
    // cluster itself is an insertion at the same point (two sides
    // competing for one spot).
    let joins = |c: &Change, start: usize, end: usize| {
        if c.old_start == c.old_end {
            (c.old_start > start && c.old_start < end) || (c.old_start == start && start == end)
        } else {
            c.old_start < end && c.old_end > start
        }
    };

    while ai < a.len() || bi < b.len() {
        // The earliest pending change opens a cluster.
        let take_a = match (a.get(ai), b.get(bi)) {
            (Some(ca), Some(cb)) => ca.old_start <= cb.old_start,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => unreachable!(),
        };
        let (a_from, b_from) = (ai, bi);
        let first = if take_a {
            ai += 1;
            &a[ai - 1]
        } else {
            bi += 1;
            &b[bi - 1]
        };
        let start = first.old_start;
        let mut end = first.old_end;
        for line in &base_l[pos..start.max(pos)] {
            out.extend_from_slice(line);
        }
        // Grow the cluster while either side still intersects it.
        loop {
            let mut grew = false;
            while let Some(ca) = a.get(ai) {
                if joins(ca, start, end) {
                    end = end.max(ca.old_end);
                    ai += 1;
                    grew = true;
                } else {
                    break;
                }
            }
            while let Some(cb) = b.get(bi) {
                if joins(cb, start, end) {
                    end = end.max(cb.old_end);
                    bi += 1;
                    grew = true;
                } else {
                    break;
                }
            }
            if !grew {
                break;
            }
        }
        let a_touched = ai > a_from;
        let b_touched = bi > b_from;
        let mine_region = side_region(&a[a_from..ai], &mine_l, start, end, &base_l);
        let theirs_region = side_region(&b[b_from..bi], &theirs_l, start, end, &base_l);
        match (a_touched, b_touched) {
            (true, false) => out.extend_from_slice(&mine_region),
            (false, true) => out.extend_from_slice(&theirs_region),
            (true, true) => {
                if mine_region == theirs_region {
                    out.extend_from_slice(&mine_region);
                } else {
                    conflicted = true;
                    out.extend_from_slice(format!("<<<<<<< {}\n", mine_label).as_bytes());
                    out.extend_from_slice(&mine_region);
                    out.extend_from_slice(b"=======\n");
                    out.extend_from_slice(&theirs_region);
                    out.extend_from_slice(format!(">>>>>>> {}\n", theirs_label).as_bytes());
                }
            }
            (false, false) => unreachable!("empty cluster"),
        }
        pos = pos.max(end);
    }
    for line in &base_l[pos..] {
        out.extend_from_slice(line);
    }
    Merged {
        data: out,
        conflicted,
    }
}

/// What one side turned base lines `[start, end)` into: its changed
/// spans stitched together with the base lines it left alone.
fn side_region(
    side_changes: &[Change],
    side_lines: &[&[u8]],
    start: usize,
    end: usize,
    base_lines: &[&[u8]],
) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = start;
    for c in side_changes {
        for line in &base_lines[pos..c.old_start] {
            out.extend_from_slice(line);
        }
        for line in &side_lines[c.new_start..c.new_end] {
            out.extend_from_slice(line);
        }
        pos = c.old_end;
    }
    for line in &base_lines[pos..end] {
        out.extend_from_slice(line);
    }
    out
}

fn run_diff3(
    cmd: &str,
    dir: &str,
    mine: &[u8],
    older: &[u8],
    yours: &[u8],
) -> Result<Merged, MergeError> {
    let tmp = path::join(dir, &path::join(crate::DOT_DIR, crate::adm::ADM_TMP));
    let write = |name: &str, data: &[u8]| -> Result<String, std::io::Error> {
        let p = path::join(&tmp, name);
        std::fs::write(Path::new(&p), data)?;
        Ok(p)
    };
    let mine_p = write("diff3-mine", mine)?;
    let older_p = write("diff3-older", older)?;
    let yours_p = write("diff3-yours", yours)?;
    debug!("spawning {:?} for merge in {:?}", cmd, dir);
    let output = Command::new(cmd)
        .args(["-E", "-m", &mine_p, &older_p, &yours_p])
        .output()?;
    match output.status.code() {
        Some(0) => Ok(Merged {
            data: output.stdout,
            conflicted: false,
        }),
        Some(1) => Ok(Merged {
            data: output.stdout,
            conflicted: true,
        }),
        _ => Err(MergeError::Diff3(
            cmd.to_string(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        )),
    }
}

pub struct MergeOutcome {
    pub conflicted: bool,
}

/// The `merge` log verb: three-way merge of the incoming change
/// (`left` → `right`, both paths relative to `adm.path`) into the
/// working file `name`. On conflict, backups of all three inputs are
/// left next to the working file and recorded in the entry.
///
/// Skips quietly when an input is missing: the inputs of a merge
/// that already ran were consumed by the text-base rotation that
/// follows it in every log.
pub fn merge_file(
    adm: &AdmAccess,
    name: &str,
    left: &str,
    right: &str,
    left_label: &str,
    right_label: &str,
    target_label: &str,
    diff3_cmd: Option<&str>,
) -> Result<MergeOutcome, MergeError> {
    let dir = &adm.path;
    let left_abs = path::join(dir, left);
    let right_abs = path::join(dir, right);
    if crate::adm::disk_kind(&left_abs) == crate::adm::DiskKind::None
        || crate::adm::disk_kind(&right_abs) == crate::adm::DiskKind::None
    {
        debug!("merge inputs gone for {:?}, already applied", name);
        return Ok(MergeOutcome { conflicted: false });
    }
    let working = path::join(dir, name);
    let mine = translate::detranslated_working(dir, name)?;
    let older = std::fs::read(Path::new(&left_abs))?;
    let yours = std::fs::read(Path::new(&right_abs))?;

    let mine_label = format!("{}{}", name, target_label);
    let yours_label = format!("{}{}", name, right_label);
    let merged = match diff3_cmd {
        Some(cmd) => run_diff3(cmd, dir, &mine, &older, &yours)?,
        None => three_way(&older, &mine, &yours, &mine_label, &yours_label),
    };

    let t = translate::translation_for(dir, name)?;
    if !merged.conflicted {
        write_working(&working, &merged.data, &t)?;
        return Ok(MergeOutcome { conflicted: false });
    }

    // Conflict: keep .mine (the user's working form, verbatim) and
    // translated copies of both text-bases, then install the marked
    // result.
    let wrk_name = format!("{}{}", name, target_label);
    let old_name = format!("{}{}", name, left_label);
    let new_name = format!("{}{}", name, right_label);
    std::fs::copy(Path::new(&working), Path::new(&path::join(dir, &wrk_name)))?;
    write_working(&path::join(dir, &old_name), &older, &t)?;
    write_working(&path::join(dir, &new_name), &yours, &t)?;
    write_working(&working, &merged.data, &t)?;
    entries::entry_modify(
        dir,
        name,
        &EntryUpdate {
            conflict_old: Some(Some(old_name)),
            conflict_new: Some(Some(new_name)),
            conflict_wrk: Some(Some(wrk_name)),
            ..Default::default()
        },
    )?;
    Ok(MergeOutcome { conflicted: true })
}

fn write_working(dst: &str, normal_form: &[u8], t: &Translation) -> Result<(), MergeError> {
    let data = translate::translate(normal_form, t, true);
    std::fs::write(Path::new(dst), data)?;
    if t.executable {
        translate::set_executable(dst)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_changes_compose() {
        let base = b"line1\nline2\nline3\n";
        let mine = b"line1\nLOCAL\nline3\n";
        let theirs = b"line1\nline2\nline3modified\n";
        let m = three_way(base, mine, theirs, "a.mine", "a.r4");
        assert!(!m.conflicted);
        assert_eq!(m.data, b"line1\nLOCAL\nline3modified\n");
    }

    #[test]
    fn overlapping_changes_conflict() {
        let base = b"line1\nline2\nline3\n";
        let mine = b"line1\nLOCAL\nline3\n";
        let theirs = b"line1\nSERVER\nline3\n";
        let m = three_way(base, mine, theirs, "a.mine", "a.r4");
        assert!(m.conflicted);
        let text = String::from_utf8(m.data).unwrap();
        assert!(text.contains("<<<<<<< a.mine"));
        assert!(text.contains("LOCAL"));
        assert!(text.contains("======="));
        assert!(text.contains("SERVER"));
        assert!(text.contains(">>>>>>> a.r4"));
        assert!(text.starts_with("line1\n"));
        assert!(text.ends_with("line3\n"));
    }

    #[test]
    fn identical_changes_merge_clean() {
        let base = b"a\nb\n";
        let both = b"a\nc\n";
        let m = three_way(base, both, both, "x", "y");
        assert!(!m.conflicted);
        assert_eq!(m.data, b"a\nc\n");
    }

    #[test]
    fn appends_on_both_ends() {
        let base = b"m\n";
        let mine = b"top\nm\n";
        let theirs = b"m\nbottom\n";
        let m = three_way(base, mine, theirs, "x", "y");
        assert!(!m.conflicted);
        assert_eq!(m.data, b"top\nm\nbottom\n");
    }
}
