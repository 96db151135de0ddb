//! Treating strings as paths. For portability reasons, working-copy
//! paths are internally treated as `/`-separated strings, and
//! converted to `std::path::Path` only at the filesystem boundary.
//! Repository URLs reuse the same component arithmetic.
//!
//! Everything here reduces to one primitive, [`split`], which scans
//! the path once from its end.

/// Splits a path into its directory part and its final component.
/// Trailing separators and a trailing `.` component do not count as
/// a component; a path without a separator has an empty directory
/// part, and the empty path splits into two empty halves.
///
/// ```ignore
/// use libverdin::path::split;
/// assert_eq!(split("foo/bar"), ("foo", "bar"));
/// assert_eq!(split("/usr/bin/"), ("/usr", "bin"));
/// assert_eq!(split("bar"), ("", "bar"));
/// assert_eq!(split(""), ("", ""));
/// ```
pub fn split(path: &str) -> (&str, &str) {
    let bytes = path.as_bytes();
    let mut end = bytes.len();
    // Walk back over separator runs and bare `.` components until
    // something substantial ends the path.
    loop {
        while end > 0 && bytes[end - 1] == b'/' {
            end -= 1;
        }
        if end > 0 && bytes[end - 1] == b'.' && (end == 1 || bytes[end - 2] == b'/') {
            end -= 1;
        } else {
            break;
        }
    }
    let mut start = end;
    while start > 0 && bytes[start - 1] != b'/' {
        start -= 1;
    }
    let mut dir_end = start;
    while dir_end > 0 && bytes[dir_end - 1] == b'/' {
        dir_end -= 1;
    }
    (&path[..dir_end], &path[start..end])
}

#[test]
fn test_split() {
    assert_eq!(split("foo/bar"), ("foo", "bar"));
    assert_eq!(split("/usr/bin/"), ("/usr", "bin"));
    assert_eq!(split("foo.txt/."), ("", "foo.txt"));
    assert_eq!(split("bar"), ("", "bar"));
    assert_eq!(split("/"), ("", ""));
    assert_eq!(split(""), ("", ""));
}

/// The final component of `path`, when there is one. `..` does not
/// name a component.
pub fn file_name(path: &str) -> Option<&str> {
    match split(path).1 {
        "" | ".." => None,
        base => Some(base),
    }
}

#[test]
fn test_file_name() {
    assert_eq!(file_name("/usr/bin/"), Some("bin"));
    assert_eq!(file_name("tmp/foo.txt"), Some("foo.txt"));
    assert_eq!(file_name("foo.txt/."), Some("foo.txt"));
    assert_eq!(file_name("foo.txt/.."), None);
    assert_eq!(file_name("/"), None);
    assert_eq!(file_name(""), None);
}

/// Joins a path and a relative path with a single separator. An
/// empty side contributes nothing, so `join` never fabricates a
/// leading or trailing separator.
pub fn join(base: &str, extra: &str) -> String {
    assert!(!extra.starts_with('/'));
    if extra.is_empty() {
        return base.to_string();
    }
    if base.is_empty() {
        return extra.to_string();
    }
    let mut out = String::with_capacity(base.len() + extra.len() + 1);
    out.push_str(base);
    if !out.ends_with('/') {
        out.push('/');
    }
    out.push_str(extra);
    out
}

#[test]
fn test_join() {
    assert_eq!(join("a", "b/c"), "a/b/c");
    assert_eq!(join("", "b"), "b");
    assert_eq!(join("a", ""), "a");
    assert_eq!(join("a/", "b"), "a/b");
}

/// Appends a component to a repository URL. URLs never carry a
/// trailing slash, so this is plain component arithmetic.
pub fn url_join(url: &str, component: &str) -> String {
    let mut u = url.trim_end_matches('/').to_string();
    u.push('/');
    u.push_str(component);
    u
}

/// Returns the URL with its last component removed.
pub fn url_parent(url: &str) -> String {
    let u = url.trim_end_matches('/');
    match u.rfind('/') {
        Some(i) => u[..i].to_string(),
        None => String::new(),
    }
}

#[test]
fn test_url() {
    assert_eq!(url_join("http://s/repo", "a"), "http://s/repo/a");
    assert_eq!(url_parent("http://s/repo/a"), "http://s/repo");
}
