//! End-of-line and keyword translation between the repository normal
//! form (what text-bases hold) and the working form (what the user
//! edits). Translation is driven entirely by the node's regular
//! props: no `vn:eol-style` means line endings are untouched, no
//! `vn:keywords` means dollar-keywords are untouched.

use crate::adm::AdmAccess;
use crate::entries;
use crate::path;
use crate::props;
use std::path::Path;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("Unknown eol-style: {0}")]
    UnknownEolStyle(String),
    #[error(transparent)]
    Props(#[from] props::PropError),
    #[error(transparent)]
    Entries(#[from] entries::EntriesError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(windows)]
const NATIVE_EOL: &[u8] = b"\r\n";
#[cfg(not(windows))]
const NATIVE_EOL: &[u8] = b"\n";

fn eol_bytes(style: &str) -> Result<&'static [u8], TranslateError> {
    match style {
        "native" => Ok(NATIVE_EOL),
        "LF" => Ok(b"\n"),
        "CRLF" => Ok(b"\r\n"),
        "CR" => Ok(b"\r"),
        other => Err(TranslateError::UnknownEolStyle(other.to_string())),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Keywords {
    pub rev: bool,
    pub date: bool,
    pub author: bool,
    pub url: bool,
    pub id: bool,
}

impl Keywords {
    pub fn parse(value: &str) -> Keywords {
        let mut k = Keywords::default();
        for word in value.split_whitespace() {
            match word {
                "Rev" | "Revision" | "LastChangedRevision" => k.rev = true,
                "Date" | "LastChangedDate" => k.date = true,
                "Author" | "LastChangedBy" => k.author = true,
                "URL" | "HeadURL" => k.url = true,
                "Id" => k.id = true,
                other => trace!("ignoring unknown keyword {:?}", other),
            }
        }
        k
    }

    pub fn is_empty(&self) -> bool {
        self == &Keywords::default()
    }

    fn enabled(&self, name: &str) -> bool {
        match name {
            "Rev" | "Revision" | "LastChangedRevision" => self.rev,
            "Date" | "LastChangedDate" => self.date,
            "Author" | "LastChangedBy" => self.author,
            "URL" | "HeadURL" => self.url,
            "Id" => self.id,
            _ => false,
        }
    }
}

/// The committed-info substituted into expanded keywords, taken from
/// the node's entry.
#[derive(Debug, Default, Clone)]
pub struct KeywordValues {
    pub rev: Option<String>,
    pub date: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
    pub basename: String,
}

impl KeywordValues {
    fn value_of(&self, name: &str) -> Option<String> {
        match name {
            "Rev" | "Revision" | "LastChangedRevision" => self.rev.clone(),
            "Date" | "LastChangedDate" => self.date.clone(),
            "Author" | "LastChangedBy" => self.author.clone(),
            "URL" | "HeadURL" => self.url.clone(),
            "Id" => {
                let join = |o: &Option<String>| o.as_deref().unwrap_or("").to_string();
                Some(format!(
                    "{} {} {} {}",
                    self.basename,
                    join(&self.rev),
                    join(&self.date),
                    join(&self.author)
                ))
            }
            _ => None,
        }
    }
}

/// How a particular versioned node translates, computed from its
/// working props and entry.
#[derive(Debug, Default, Clone)]
pub struct Translation {
    pub eol: Option<&'static [u8]>,
    pub keywords: Keywords,
    pub values: KeywordValues,
    pub executable: bool,
}

impl Translation {
    pub fn is_identity(&self) -> bool {
        self.eol.is_none() && self.keywords.is_empty()
    }
}

/// Builds the [`Translation`] of `dir/name` from its props and entry.
pub fn translation_for(dir: &str, name: &str) -> Result<Translation, TranslateError> {
    let mut t = Translation::default();
    if let Some(style) = props::prop_get(dir, Some(name), props::PROP_EOL_STYLE)? {
        t.eol = Some(eol_bytes(&style)?);
    }
    if let Some(kw) = props::prop_get(dir, Some(name), props::PROP_KEYWORDS)? {
        t.keywords = Keywords::parse(&kw);
    }
    t.executable = props::prop_get(dir, Some(name), props::PROP_EXECUTABLE)?.is_some();
    if let Some(entry) = entries::Entries::read(dir)?.get(name) {
        t.values = KeywordValues {
            rev: entry.cmt_rev.map(|r| r.to_string()),
            date: entry.cmt_date.clone(),
            author: entry.cmt_author.clone(),
            url: entry.url.clone(),
            basename: name.to_string(),
        };
    } else {
        t.values.basename = name.to_string();
    }
    Ok(t)
}

/// Splits `data` into segments ending at any of LF, CRLF or CR,
/// yielding `(line_without_eol, had_eol)`.
fn lines(data: &[u8]) -> Vec<(&[u8], bool)> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'\n' => {
                out.push((&data[start..i], true));
                i += 1;
                start = i;
            }
            b'\r' => {
                out.push((&data[start..i], true));
                i += if data.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < data.len() {
        out.push((&data[start..], false));
    }
    out
}

/// Rewrites the dollar-keywords of one line. `expand == true`
/// produces `$Key: value $`; `expand == false` contracts back to
/// `$Key$`.
fn substitute_line(line: &[u8], kw: &Keywords, values: &KeywordValues, expand: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        if line[i] != b'$' {
            out.push(line[i]);
            i += 1;
            continue;
        }
        // A candidate keyword runs to the next '$' on the same line.
        let rest = &line[i + 1..];
        let end = match rest.iter().position(|&b| b == b'$') {
            Some(e) => e,
            None => {
                out.extend_from_slice(&line[i..]);
                break;
            }
        };
        let inner = &rest[..end];
        let text = String::from_utf8_lossy(inner);
        let name = text.split(':').next().unwrap_or("").trim().to_string();
        if !kw.enabled(&name) {
            out.push(b'$');
            i += 1;
            continue;
        }
        if expand {
            match values.value_of(&name) {
                Some(v) if !v.is_empty() => {
                    out.extend_from_slice(format!("${}: {} $", name, v).as_bytes())
                }
                _ => out.extend_from_slice(format!("${}$", name).as_bytes()),
            }
        } else {
            out.extend_from_slice(format!("${}$", name).as_bytes());
        }
        i += 1 + end + 1;
    }
    out
}

/// Translation with a fixed target eol: split, substitute, rejoin.
/// Contraction always rejoins with LF, the repository normal form.
fn translate_eol(data: &[u8], t: &Translation, expand: bool) -> Vec<u8> {
    let eol: &[u8] = if expand {
        t.eol.expect("translate_eol needs an eol-style")
    } else {
        b"\n"
    };
    let mut out = Vec::with_capacity(data.len());
    for (line, had_eol) in lines(data) {
        let line = if t.keywords.is_empty() {
            line.to_vec()
        } else {
            substitute_line(line, &t.keywords, &t.values, expand)
        };
        out.extend_from_slice(&line);
        if had_eol {
            out.extend_from_slice(eol);
        }
    }
    out
}

/// Translation with pass-through endings needs the original bytes
/// kept intact; only keywords are rewritten.
fn translate_keywords_only(data: &[u8], t: &Translation, expand: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    loop {
        let split = rest
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
            .map(|i| {
                if rest[i] == b'\r' && rest.get(i + 1) == Some(&b'\n') {
                    i + 2
                } else {
                    i + 1
                }
            });
        match split {
            Some(e) => {
                let eol_start = if rest[e - 1] == b'\n' && e >= 2 && rest[e - 2] == b'\r' {
                    e - 2
                } else {
                    e - 1
                };
                out.extend_from_slice(&substitute_line(
                    &rest[..eol_start],
                    &t.keywords,
                    &t.values,
                    expand,
                ));
                out.extend_from_slice(&rest[eol_start..e]);
                rest = &rest[e..];
            }
            None => {
                if !rest.is_empty() {
                    out.extend_from_slice(&substitute_line(rest, &t.keywords, &t.values, expand));
                }
                break;
            }
        }
    }
    out
}

/// Translates `data` between normal form and working form.
/// Expansion substitutes keywords and converts line endings to the
/// target eol; contraction folds keywords and normalizes endings to
/// LF. Without an eol-style, endings pass through untouched.
pub fn translate(data: &[u8], t: &Translation, expand: bool) -> Vec<u8> {
    if t.is_identity() {
        data.to_vec()
    } else if t.eol.is_none() {
        translate_keywords_only(data, t, expand)
    } else {
        translate_eol(data, t, expand)
    }
}

/// The `cp-and-translate` verb: copies `src` to `dst` (both paths
/// relative to `adm.path`), expanding into working form on the way;
/// `dst` names the versioned node whose props drive the translation.
pub fn copy_and_translate(adm: &AdmAccess, src: &str, dst: &str) -> Result<(), TranslateError> {
    let dir = &adm.path;
    let name = path::file_name(dst).unwrap_or(dst);
    let t = translation_for(dir, name)?;
    let data = std::fs::read(Path::new(&path::join(dir, src)))?;
    let out = translate(&data, &t, true);
    let dst_abs = path::join(dir, dst);
    std::fs::write(Path::new(&dst_abs), out)?;
    if t.executable {
        set_executable(&dst_abs)?;
    }
    Ok(())
}

/// The `cp-and-detranslate` verb: copies `src` to `dst`, contracting
/// back to normal form; `src` names the versioned node.
pub fn copy_and_detranslate(adm: &AdmAccess, src: &str, dst: &str) -> Result<(), TranslateError> {
    let dir = &adm.path;
    let name = path::file_name(src).unwrap_or(src);
    let t = translation_for(dir, name)?;
    let data = std::fs::read(Path::new(&path::join(dir, src)))?;
    let out = translate(&data, &t, false);
    if let Some(p) = Path::new(&path::join(dir, dst)).parent() {
        std::fs::create_dir_all(p)?;
    }
    std::fs::write(Path::new(&path::join(dir, dst)), out)?;
    Ok(())
}

/// Contracts the working file of `dir/name` into normal form,
/// in memory, for comparison against its text-base.
pub fn detranslated_working(dir: &str, name: &str) -> Result<Vec<u8>, TranslateError> {
    let t = translation_for(dir, name)?;
    let data = std::fs::read(Path::new(&path::join(dir, name)))?;
    Ok(translate(&data, &t, false))
}

#[cfg(not(windows))]
pub fn set_executable(file: &str) -> Result<(), std::io::Error> {
    use std::os::unix::fs::PermissionsExt;
    let p = Path::new(file);
    let mut perms = std::fs::metadata(p)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    std::fs::set_permissions(p, perms)
}

#[cfg(windows)]
pub fn set_executable(_file: &str) -> Result<(), std::io::Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(names: &str) -> Translation {
        Translation {
            eol: None,
            keywords: Keywords::parse(names),
            values: KeywordValues {
                rev: Some("42".into()),
                date: Some("2004-01-01".into()),
                author: Some("jrandom".into()),
                url: Some("proto://repo/f".into()),
                basename: "f".into(),
            },
            executable: false,
        }
    }

    #[test]
    fn expand_and_contract_rev() {
        let t = kw("Rev");
        let expanded = translate(b"x $Rev$ y\n", &t, true);
        assert_eq!(expanded, b"x $Rev: 42 $ y\n");
        assert_eq!(translate(&expanded, &t, false), b"x $Rev$ y\n");
    }

    #[test]
    fn disabled_keywords_pass_through() {
        let t = kw("Rev");
        assert_eq!(translate(b"$Author$\n", &t, true), b"$Author$\n");
    }

    #[test]
    fn eol_translation() {
        let t = Translation {
            eol: Some(b"\r\n"),
            ..Default::default()
        };
        assert_eq!(translate(b"a\nb\n", &t, true), b"a\r\nb\r\n");
        assert_eq!(translate(b"a\r\nb\r\n", &t, false), b"a\nb\n");
    }

    #[test]
    fn no_props_is_identity() {
        let t = Translation::default();
        assert_eq!(translate(b"a\r\n$Rev$\n", &t, true), b"a\r\n$Rev$\n");
    }
}
