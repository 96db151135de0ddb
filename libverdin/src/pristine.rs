//! The pristine store: read-only "text-base" copies of file contents
//! at their recorded revision. A text-base is never mutated in
//! place; new content lands in the `tmp/` staging mirror and is
//! rotated into position by a log command.

use crate::{adm, path};
use md5::{Digest, Md5};
use std::fs;
use std::io::Read;
use std::path::Path;

pub const TEXT_BASE_EXT: &str = ".vn-base";

/// Admin-relative path of the text-base of `name`, or of its staging
/// twin.
pub fn text_base_rel(name: &str, tmp: bool) -> String {
    let area = if tmp {
        path::join(crate::DOT_DIR, adm::ADM_TMP)
    } else {
        crate::DOT_DIR.to_string()
    };
    path::join(
        &path::join(&area, adm::ADM_TEXT_BASE),
        &format!("{}{}", name, TEXT_BASE_EXT),
    )
}

/// Full path of the text-base shadowing the working file `wc_path`.
pub fn text_base_path(wc_path: &str, tmp: bool) -> String {
    let (dir, name) = path::split(wc_path);
    path::join(dir, &text_base_rel(name, tmp))
}

/// Opens the text-base of `wc_path` for reading; `None` means there
/// is no pristine yet (a file brand-new in this edit).
pub fn open_text_base(wc_path: &str) -> Result<Option<fs::File>, std::io::Error> {
    let p = text_base_path(wc_path, false);
    trace!("open_text_base {:?}", p);
    match fs::File::open(Path::new(&p)) {
        Ok(f) => Ok(Some(f)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Creates (truncating) the staging text-base of `wc_path` for
/// writing, and returns it with its path.
pub fn create_text_base_tmp(wc_path: &str) -> Result<(fs::File, String), std::io::Error> {
    let p = text_base_path(wc_path, true);
    trace!("create_text_base_tmp {:?}", p);
    if let Some(parent) = Path::new(&p).parent() {
        fs::create_dir_all(parent)?;
    }
    let f = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(Path::new(&p))?;
    Ok((f, p))
}

/// MD5 digest of a file's contents, as lowercase hex.
pub fn file_md5(file: &str) -> Result<String, std::io::Error> {
    let mut f = fs::File::open(Path::new(file))?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Legacy digests were stored base64-encoded; tolerated on
/// comparison for old working copies.
pub fn md5_hex_to_base64(hex_digest: &str) -> Option<String> {
    let raw = hex::decode(hex_digest).ok()?;
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::new();
    for chunk in raw.chunks(3) {
        let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
        let n = ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32;
        out.push(ALPHABET[(n >> 18) as usize & 63] as char);
        out.push(ALPHABET[(n >> 12) as usize & 63] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(n >> 6) as usize & 63] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[n as usize & 63] as char
        } else {
            '='
        });
    }
    Some(out)
}

/// Marks a file read-only (text-bases are) or read-write again.
pub fn set_read_only(file: &str, read_only: bool) -> Result<(), std::io::Error> {
    let p = Path::new(file);
    let mut perms = fs::metadata(p)?.permissions();
    perms.set_readonly(read_only);
    fs::set_permissions(p, perms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_known_text() {
        // The digest the update scenarios rely on.
        assert_eq!(md5_hex(b"hi\n"), "764efa883dda1e11db47671c4a3bbd9e");
    }

    #[test]
    fn base64_compat() {
        assert_eq!(
            md5_hex_to_base64("764efa883dda1e11db47671c4a3bbd9e").unwrap(),
            "dk76iD3aHhHbR2ccSju9ng=="
        );
    }
}
