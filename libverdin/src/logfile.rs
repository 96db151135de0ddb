//! The per-directory journaled log: mutations of the working copy
//! are first accumulated as commands, flushed to a well-known file
//! inside the admin area, then replayed in order. Every command is
//! idempotent, so a log interrupted mid-replay can simply be run
//! again; the file is removed only when the whole sequence
//! succeeded.
//!
//! On the wire a log is a sequence of self-closing XML-like tags,
//! one per command, attribute order irrelevant, tag order = execution
//! order:
//!
//! ```text
//! <modify-entry
//!    name="a.txt"
//!    revision="4"/>
//! <mv
//!    name=".verdin/tmp/text-base/a.txt.vn-base"
//!    dest=".verdin/text-base/a.txt.vn-base"/>
//! ```

use crate::adm::{self, AdmAccess};
use crate::entries::{self, EntryUpdate, Kind, Schedule, TimeValue};
use crate::{merge, path, pristine, props, remove, translate, CancelFunc};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Malformed log file in '{0}': {1}")]
    Parse(String, String),
    #[error("Unknown log command: {0}")]
    UnknownCommand(String),
    #[error("Log command '{0}' is missing its '{1}' attribute")]
    MissingAttr(&'static str, &'static str),
    #[error("Unreadable timestamp: {0}")]
    BadTimestamp(String),
    #[error("Cancelled")]
    Cancelled,
    #[error(transparent)]
    Entries(#[from] entries::EntriesError),
    #[error(transparent)]
    Props(#[from] props::PropError),
    #[error(transparent)]
    Merge(#[from] Box<merge::MergeError>),
    #[error(transparent)]
    Translate(#[from] Box<translate::TranslateError>),
    #[error(transparent)]
    Remove(#[from] remove::RemoveError),
    #[error(transparent)]
    Adm(#[from] adm::AdmError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<merge::MergeError> for LogError {
    fn from(e: merge::MergeError) -> Self {
        LogError::Merge(Box::new(e))
    }
}

impl From<translate::TranslateError> for LogError {
    fn from(e: translate::TranslateError) -> Self {
        LogError::Translate(Box::new(e))
    }
}

impl LogError {
    /// Did replay leave local modifications behind (the condition
    /// `delete_entry` rewrites into an obstructed update)?
    pub fn left_local_mod(&self) -> bool {
        matches!(self, LogError::Remove(remove::RemoveError::LeftLocalMod(_)))
    }
}

/// One journaled command. Paths are relative to the directory whose
/// log carries the command.
#[derive(Debug, Clone, PartialEq)]
pub enum LogCommand {
    ModifyEntry {
        name: String,
        update: EntryUpdate,
    },
    ModifyWcprop {
        name: String,
        propname: String,
        propval: Option<String>,
    },
    DeleteEntry {
        name: String,
    },
    Merge {
        name: String,
        left: String,
        right: String,
        left_label: String,
        right_label: String,
        target_label: String,
    },
    CpAndTranslate {
        name: String,
        dest: String,
    },
    CpAndDetranslate {
        name: String,
        dest: String,
    },
    Mv {
        name: String,
        dest: String,
    },
    Readonly {
        name: String,
    },
    SetTimestamp {
        name: String,
        timestamp: String,
    },
}

fn escape(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

fn unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

struct TagWriter<'a> {
    out: &'a mut String,
}

impl<'a> TagWriter<'a> {
    fn open(out: &'a mut String, name: &str) -> Self {
        out.push('<');
        out.push_str(name);
        TagWriter { out }
    }

    fn attr(self, name: &str, value: &str) -> Self {
        self.out.push_str("\n   ");
        self.out.push_str(name);
        self.out.push_str("=\"");
        escape(value, self.out);
        self.out.push('"');
        self
    }

    fn attr_opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.attr(name, v),
            None => self,
        }
    }

    fn close(self) {
        self.out.push_str("/>\n");
    }
}

fn time_attr(t: &TimeValue) -> String {
    match t {
        TimeValue::Working => "working".to_string(),
        TimeValue::At(t) => t.to_rfc3339(),
    }
}

fn entry_attrs<'a>(mut w: TagWriter<'a>, u: &EntryUpdate) -> TagWriter<'a> {
    w = w.attr_opt(
        "kind",
        u.kind.map(|k| match k {
            Kind::File => "file",
            Kind::Dir => "dir",
        }),
    );
    w = w.attr_opt("revision", u.revision.map(|r| r.to_string()).as_deref());
    w = w.attr_opt("url", u.url.as_deref());
    w = w.attr_opt(
        "schedule",
        u.schedule.map(|s| match s {
            Schedule::Normal => "normal",
            Schedule::Add => "add",
            Schedule::Delete => "delete",
        }),
    );
    w = w.attr_opt("deleted", u.deleted.map(|b| bool_str(b)));
    w = w.attr_opt("incomplete", u.incomplete.map(|b| bool_str(b)));
    w = w.attr_opt("copied", u.copied.map(|b| bool_str(b)));
    w = w.attr_opt("checksum", u.checksum.as_deref());
    w = w.attr_opt("text-time", u.text_time.as_ref().map(time_attr).as_deref());
    w = w.attr_opt("prop-time", u.prop_time.as_ref().map(time_attr).as_deref());
    w = w.attr_opt("copyfrom-url", u.copyfrom_url.as_deref());
    w = w.attr_opt(
        "copyfrom-rev",
        u.copyfrom_rev.map(|r| r.to_string()).as_deref(),
    );
    w = w.attr_opt("cmt-author", u.cmt_author.as_deref());
    w = w.attr_opt("cmt-rev", u.cmt_rev.map(|r| r.to_string()).as_deref());
    w = w.attr_opt("cmt-date", u.cmt_date.as_deref());
    w = w.attr_opt("uuid", u.uuid.as_deref());
    w = w.attr_opt(
        "conflict-old",
        u.conflict_old.as_ref().map(|v| v.as_deref().unwrap_or("")),
    );
    w = w.attr_opt(
        "conflict-new",
        u.conflict_new.as_ref().map(|v| v.as_deref().unwrap_or("")),
    );
    w = w.attr_opt(
        "conflict-wrk",
        u.conflict_wrk.as_ref().map(|v| v.as_deref().unwrap_or("")),
    );
    w = w.attr_opt(
        "prop-reject",
        u.prop_reject.as_ref().map(|v| v.as_deref().unwrap_or("")),
    );
    w
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

impl LogCommand {
    pub fn write(&self, out: &mut String) {
        match self {
            LogCommand::ModifyEntry { name, update } => {
                entry_attrs(TagWriter::open(out, "modify-entry").attr("name", name), update)
                    .close();
            }
            LogCommand::ModifyWcprop {
                name,
                propname,
                propval,
            } => {
                TagWriter::open(out, "modify-wcprop")
                    .attr("name", name)
                    .attr("propname", propname)
                    .attr_opt("propval", propval.as_deref())
                    .close();
            }
            LogCommand::DeleteEntry { name } => {
                TagWriter::open(out, "delete-entry").attr("name", name).close();
            }
            LogCommand::Merge {
                name,
                left,
                right,
                left_label,
                right_label,
                target_label,
            } => {
                TagWriter::open(out, "merge")
                    .attr("name", name)
                    .attr("left", left)
                    .attr("right", right)
                    .attr("left-label", left_label)
                    .attr("right-label", right_label)
                    .attr("target-label", target_label)
                    .close();
            }
            LogCommand::CpAndTranslate { name, dest } => {
                TagWriter::open(out, "cp-and-translate")
                    .attr("name", name)
                    .attr("dest", dest)
                    .close();
            }
            LogCommand::CpAndDetranslate { name, dest } => {
                TagWriter::open(out, "cp-and-detranslate")
                    .attr("name", name)
                    .attr("dest", dest)
                    .close();
            }
            LogCommand::Mv { name, dest } => {
                TagWriter::open(out, "mv")
                    .attr("name", name)
                    .attr("dest", dest)
                    .close();
            }
            LogCommand::Readonly { name } => {
                TagWriter::open(out, "readonly").attr("name", name).close();
            }
            LogCommand::SetTimestamp { name, timestamp } => {
                TagWriter::open(out, "set-timestamp")
                    .attr("name", name)
                    .attr("timestamp", timestamp)
                    .close();
            }
        }
    }
}

/// The in-memory command buffer of one directory's log.
#[derive(Debug, Default)]
pub struct LogBuffer {
    commands: Vec<LogCommand>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: LogCommand) {
        self.commands.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for c in &self.commands {
            c.write(&mut out);
        }
        out
    }

    /// Flushes the buffer to `adm.path`'s log file, atomically. From
    /// this moment the mutations are committed: a crash before the
    /// replay finishes is repaired by running the log again.
    pub fn flush(&self, adm: &AdmAccess) -> Result<(), LogError> {
        debug!("flushing {} log commands to {:?}", self.commands.len(), adm.path);
        adm::write_adm_file(&adm.path, adm::ADM_LOG, self.serialize().as_bytes())?;
        Ok(())
    }
}

mod parse {
    use super::*;
    use nom::bytes::complete::{tag, take_while1};
    use nom::character::complete::{char, multispace0, multispace1, none_of};
    use nom::combinator::{map, opt, recognize};
    use nom::multi::{many0, many1};
    use nom::sequence::{delimited, preceded, separated_pair};
    use nom::IResult;

    fn attr_name(i: &str) -> IResult<&str, &str> {
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-')(i)
    }

    fn quoted(i: &str) -> IResult<&str, String> {
        map(
            delimited(
                char('"'),
                opt(recognize(many1(none_of("\"")))),
                char('"'),
            ),
            |v: Option<&str>| super::unescape(v.unwrap_or("")),
        )(i)
    }

    fn attribute(i: &str) -> IResult<&str, (&str, String)> {
        preceded(multispace1, separated_pair(attr_name, char('='), quoted))(i)
    }

    pub(super) fn command(i: &str) -> IResult<&str, (String, BTreeMap<String, String>)> {
        let (i, _) = multispace0(i)?;
        let (i, _) = char('<')(i)?;
        let (i, name) = attr_name(i)?;
        let (i, attrs) = many0(attribute)(i)?;
        let (i, _) = multispace0(i)?;
        let (i, _) = tag("/>")(i)?;
        let map = attrs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Ok((i, (name.to_string(), map)))
    }
}

fn take_attr(
    attrs: &mut BTreeMap<String, String>,
    tag: &'static str,
    key: &'static str,
) -> Result<String, LogError> {
    attrs.remove(key).ok_or(LogError::MissingAttr(tag, key))
}

fn entry_update_from(attrs: &mut BTreeMap<String, String>) -> Result<EntryUpdate, LogError> {
    let mut u = EntryUpdate::default();
    if let Some(k) = attrs.remove("kind") {
        u.kind = Some(match k.as_str() {
            "dir" => Kind::Dir,
            _ => Kind::File,
        });
    }
    if let Some(r) = attrs.remove("revision") {
        u.revision = r.parse().ok();
    }
    u.url = attrs.remove("url");
    if let Some(s) = attrs.remove("schedule") {
        u.schedule = Some(match s.as_str() {
            "add" => Schedule::Add,
            "delete" => Schedule::Delete,
            _ => Schedule::Normal,
        });
    }
    if let Some(b) = attrs.remove("deleted") {
        u.deleted = Some(b == "true");
    }
    if let Some(b) = attrs.remove("incomplete") {
        u.incomplete = Some(b == "true");
    }
    if let Some(b) = attrs.remove("copied") {
        u.copied = Some(b == "true");
    }
    u.checksum = attrs.remove("checksum");
    u.text_time = attrs.remove("text-time").map(parse_time).transpose()?;
    u.prop_time = attrs.remove("prop-time").map(parse_time).transpose()?;
    u.copyfrom_url = attrs.remove("copyfrom-url");
    if let Some(r) = attrs.remove("copyfrom-rev") {
        u.copyfrom_rev = r.parse().ok();
    }
    u.cmt_author = attrs.remove("cmt-author");
    if let Some(r) = attrs.remove("cmt-rev") {
        u.cmt_rev = r.parse().ok();
    }
    u.cmt_date = attrs.remove("cmt-date");
    u.uuid = attrs.remove("uuid");
    let conflict = |v: String| if v.is_empty() { None } else { Some(v) };
    u.conflict_old = attrs.remove("conflict-old").map(conflict);
    u.conflict_new = attrs.remove("conflict-new").map(conflict);
    u.conflict_wrk = attrs.remove("conflict-wrk").map(conflict);
    u.prop_reject = attrs.remove("prop-reject").map(conflict);
    Ok(u)
}

fn parse_time(v: String) -> Result<TimeValue, LogError> {
    if v == "working" {
        return Ok(TimeValue::Working);
    }
    DateTime::parse_from_rfc3339(&v)
        .map(|t| TimeValue::At(t.with_timezone(&Utc)))
        .map_err(|_| LogError::BadTimestamp(v))
}

/// Parses the serialized form back into commands.
pub fn parse_log(dir: &str, input: &str) -> Result<Vec<LogCommand>, LogError> {
    let mut rest = input;
    let mut commands = Vec::new();
    loop {
        if rest.trim_start().is_empty() {
            break;
        }
        let (next, (tag_name, mut attrs)) = parse::command(rest)
            .map_err(|e| LogError::Parse(dir.to_string(), format!("{:?}", e)))?;
        rest = next;
        let command = match tag_name.as_str() {
            "modify-entry" => LogCommand::ModifyEntry {
                name: take_attr(&mut attrs, "modify-entry", "name")?,
                update: entry_update_from(&mut attrs)?,
            },
            "modify-wcprop" => LogCommand::ModifyWcprop {
                name: take_attr(&mut attrs, "modify-wcprop", "name")?,
                propname: take_attr(&mut attrs, "modify-wcprop", "propname")?,
                propval: attrs.remove("propval"),
            },
            "delete-entry" => LogCommand::DeleteEntry {
                name: take_attr(&mut attrs, "delete-entry", "name")?,
            },
            "merge" => LogCommand::Merge {
                name: take_attr(&mut attrs, "merge", "name")?,
                left: take_attr(&mut attrs, "merge", "left")?,
                right: take_attr(&mut attrs, "merge", "right")?,
                left_label: take_attr(&mut attrs, "merge", "left-label")?,
                right_label: take_attr(&mut attrs, "merge", "right-label")?,
                target_label: take_attr(&mut attrs, "merge", "target-label")?,
            },
            "cp-and-translate" => LogCommand::CpAndTranslate {
                name: take_attr(&mut attrs, "cp-and-translate", "name")?,
                dest: take_attr(&mut attrs, "cp-and-translate", "dest")?,
            },
            "cp-and-detranslate" => LogCommand::CpAndDetranslate {
                name: take_attr(&mut attrs, "cp-and-detranslate", "name")?,
                dest: take_attr(&mut attrs, "cp-and-detranslate", "dest")?,
            },
            "mv" => LogCommand::Mv {
                name: take_attr(&mut attrs, "mv", "name")?,
                dest: take_attr(&mut attrs, "mv", "dest")?,
            },
            "readonly" => LogCommand::Readonly {
                name: take_attr(&mut attrs, "readonly", "name")?,
            },
            "set-timestamp" => LogCommand::SetTimestamp {
                name: take_attr(&mut attrs, "set-timestamp", "name")?,
                timestamp: take_attr(&mut attrs, "set-timestamp", "timestamp")?,
            },
            other => return Err(LogError::UnknownCommand(other.to_string())),
        };
        commands.push(command);
    }
    Ok(commands)
}

/// Is there an unreplayed log in `dir`?
pub fn log_file_present(dir: &str) -> bool {
    adm::disk_kind(&adm::adm_path(dir, false, adm::ADM_LOG)) != adm::DiskKind::None
}

fn execute(
    adm: &AdmAccess,
    command: &LogCommand,
    diff3_cmd: Option<&str>,
    cancel: Option<&CancelFunc>,
) -> Result<(), LogError> {
    let dir = &adm.path;
    trace!("execute {:?} in {:?}", command, dir);
    match command {
        LogCommand::ModifyEntry { name, update } => {
            entries::entry_modify(dir, name, update)?;
        }
        LogCommand::ModifyWcprop {
            name,
            propname,
            propval,
        } => {
            let file = path::join(dir, &props::wcprop_rel(some_name(name)));
            let mut map = props::load_prop_file(&file)?;
            match propval {
                Some(v) => {
                    map.insert(propname.clone(), v.clone());
                }
                None => {
                    map.remove(propname);
                }
            }
            props::save_prop_file(&file, &map)?;
        }
        LogCommand::DeleteEntry { name } => {
            remove::remove_from_revision_control(dir, name, true, cancel)?;
        }
        LogCommand::Merge {
            name,
            left,
            right,
            left_label,
            right_label,
            target_label,
        } => {
            merge::merge_file(
                adm,
                name,
                left,
                right,
                left_label,
                right_label,
                target_label,
                diff3_cmd,
            )?;
        }
        LogCommand::CpAndTranslate { name, dest } => {
            if adm::disk_kind(&path::join(dir, name)) == adm::DiskKind::None {
                debug!("cp-and-translate source {:?} gone, skipping", name);
            } else {
                translate::copy_and_translate(adm, name, dest)?;
            }
        }
        LogCommand::CpAndDetranslate { name, dest } => {
            if adm::disk_kind(&path::join(dir, name)) == adm::DiskKind::None {
                debug!("cp-and-detranslate source {:?} gone, skipping", name);
            } else {
                translate::copy_and_detranslate(adm, name, dest)?;
            }
        }
        LogCommand::Mv { name, dest } => {
            let src = path::join(dir, name);
            let dst = path::join(dir, dest);
            if adm::disk_kind(&src) == adm::DiskKind::None {
                debug!("mv source {:?} gone, already rotated", src);
            } else {
                // The destination may be a read-only former
                // text-base; renaming over it is fine, removing it
                // first keeps Windows happy too.
                if adm::disk_kind(&dst) != adm::DiskKind::None {
                    pristine::set_read_only(&dst, false).unwrap_or(());
                    std::fs::remove_file(Path::new(&dst)).unwrap_or(());
                }
                std::fs::rename(Path::new(&src), Path::new(&dst))?;
            }
        }
        LogCommand::Readonly { name } => {
            let p = path::join(dir, name);
            if adm::disk_kind(&p) != adm::DiskKind::None {
                pristine::set_read_only(&p, true)?;
            }
        }
        LogCommand::SetTimestamp { name, timestamp } => {
            let p = path::join(dir, name);
            if adm::disk_kind(&p) != adm::DiskKind::None {
                let t = match parse_time(timestamp.clone())? {
                    TimeValue::At(t) => t,
                    TimeValue::Working => return Err(LogError::BadTimestamp(timestamp.clone())),
                };
                let ft = filetime::FileTime::from_system_time(t.into());
                filetime::set_file_mtime(Path::new(&p), ft)?;
            }
        }
    }
    Ok(())
}

fn some_name(name: &str) -> Option<&str> {
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Replays the log of `adm.path`, in order, command by command, and
/// removes the log file afterwards. Safe to call when there is no
/// log, and safe to call again after any interruption.
pub fn run_log(
    adm: &AdmAccess,
    diff3_cmd: Option<&str>,
    cancel: Option<&CancelFunc>,
) -> Result<(), LogError> {
    let dir = &adm.path;
    let log_path = adm::adm_path(dir, false, adm::ADM_LOG);
    let contents = match std::fs::read_to_string(Path::new(&log_path)) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            trace!("no log in {:?}", dir);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let commands = parse_log(dir, &contents)?;
    info!("running {} log commands in {:?}", commands.len(), dir);
    for command in &commands {
        if let Some(c) = cancel {
            if c() {
                return Err(LogError::Cancelled);
            }
        }
        execute(adm, command, diff3_cmd, cancel)?;
    }
    std::fs::remove_file(Path::new(&log_path))?;
    Ok(())
}

/// Removes a flushed-but-unwanted log file, eating errors: used on
/// cleanup paths that must preserve the primary error.
pub fn discard_log(dir: &str) {
    let log_path = adm::adm_path(dir, false, adm::ADM_LOG);
    if let Err(e) = std::fs::remove_file(Path::new(&log_path)) {
        if e.kind() != std::io::ErrorKind::NotFound {
            info!("while discarding log in {:?}: {:?}", dir, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        env_logger::try_init().unwrap_or(());
        let mut buf = LogBuffer::new();
        buf.push(LogCommand::ModifyEntry {
            name: "a.txt".into(),
            update: EntryUpdate {
                kind: Some(Kind::File),
                revision: Some(7),
                deleted: Some(false),
                checksum: Some("764efa883dda1e11db47671c4a3bbd9e".into()),
                text_time: Some(TimeValue::Working),
                ..Default::default()
            },
        });
        buf.push(LogCommand::Mv {
            name: ".verdin/tmp/text-base/a.txt.vn-base".into(),
            dest: ".verdin/text-base/a.txt.vn-base".into(),
        });
        buf.push(LogCommand::ModifyWcprop {
            name: "a.txt".into(),
            propname: "vn:wc:token".into(),
            propval: Some("va<l&ue\"".into()),
        });
        buf.push(LogCommand::Merge {
            name: "a.txt".into(),
            left: ".verdin/text-base/a.txt.vn-base".into(),
            right: ".verdin/tmp/text-base/a.txt.vn-base".into(),
            left_label: ".r3".into(),
            right_label: ".r4".into(),
            target_label: ".mine".into(),
        });
        let text = buf.serialize();
        let parsed = parse_log("x", &text).unwrap();
        assert_eq!(parsed, buf.commands);
    }

    #[test]
    fn rejects_unknown_commands() {
        let err = parse_log("x", "<rm\n   name=\"y\"/>\n").unwrap_err();
        assert!(matches!(err, LogError::UnknownCommand(_)));
    }
}
