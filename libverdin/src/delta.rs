//! Binary text-delta application: reconstructing a full text from a
//! stream of windows against the current text-base, into a staging
//! text-base, with a running MD5 of the output.

use md5::{Digest, Md5};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("Delta window source view [{0}, +{1}) outside the source text")]
    SourceView(u64, usize),
    #[error("Delta op reads outside its view")]
    OpOutOfBounds,
    #[error("Delta window produced {0} bytes, declared {1}")]
    TargetLength(usize, usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One instruction of a delta window. Offsets are relative to the
/// window's views: `Source` reads from the source view, `Target`
/// from the target bytes already produced by *this* window (overlap
/// allowed, giving run-length behaviour), `New` from the window's
/// fresh-data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOp {
    Source { offset: usize, len: usize },
    Target { offset: usize, len: usize },
    New { offset: usize, len: usize },
}

#[derive(Debug, Clone, Default)]
pub struct DeltaWindow {
    pub sview_offset: u64,
    pub sview_len: usize,
    pub tview_len: usize,
    pub ops: Vec<DeltaOp>,
    pub new_data: Vec<u8>,
}

impl DeltaWindow {
    /// A window that ignores the source and emits `data` verbatim.
    pub fn fulltext(data: &[u8]) -> Self {
        DeltaWindow {
            sview_offset: 0,
            sview_len: 0,
            tview_len: data.len(),
            ops: vec![DeltaOp::New {
                offset: 0,
                len: data.len(),
            }],
            new_data: data.to_vec(),
        }
    }
}

/// Applies a window stream between an optional source file and a
/// destination file, hashing everything written.
pub struct DeltaApplier {
    source: Option<File>,
    dest: File,
    digest: Md5,
}

impl DeltaApplier {
    pub fn new(source: Option<File>, dest: File) -> Self {
        DeltaApplier {
            source,
            dest,
            digest: Md5::new(),
        }
    }

    pub fn apply_window(&mut self, window: &DeltaWindow) -> Result<(), DeltaError> {
        trace!(
            "apply_window sview = [{}, +{}), tview = {}",
            window.sview_offset,
            window.sview_len,
            window.tview_len
        );
        let mut sview = vec![0u8; window.sview_len];
        if window.sview_len > 0 {
            let src = self
                .source
                .as_mut()
                .ok_or(DeltaError::SourceView(window.sview_offset, window.sview_len))?;
            src.seek(SeekFrom::Start(window.sview_offset))?;
            src.read_exact(&mut sview).map_err(|_| {
                DeltaError::SourceView(window.sview_offset, window.sview_len)
            })?;
        }
        let mut tview: Vec<u8> = Vec::with_capacity(window.tview_len);
        for op in &window.ops {
            match *op {
                DeltaOp::Source { offset, len } => {
                    let end = offset.checked_add(len).ok_or(DeltaError::OpOutOfBounds)?;
                    let chunk = sview.get(offset..end).ok_or(DeltaError::OpOutOfBounds)?;
                    tview.extend_from_slice(chunk);
                }
                DeltaOp::New { offset, len } => {
                    let end = offset.checked_add(len).ok_or(DeltaError::OpOutOfBounds)?;
                    let chunk = window
                        .new_data
                        .get(offset..end)
                        .ok_or(DeltaError::OpOutOfBounds)?;
                    tview.extend_from_slice(chunk);
                }
                DeltaOp::Target { offset, len } => {
                    // Byte-at-a-time: the copied region may overlap
                    // what this op is still producing.
                    if offset >= tview.len() && len > 0 {
                        return Err(DeltaError::OpOutOfBounds);
                    }
                    for i in 0..len {
                        let b = tview[offset + i];
                        tview.push(b);
                    }
                }
            }
        }
        if tview.len() != window.tview_len {
            return Err(DeltaError::TargetLength(tview.len(), window.tview_len));
        }
        self.digest.update(&tview);
        self.dest.write_all(&tview)?;
        Ok(())
    }

    /// Ends the stream: flushes the destination and returns the hex
    /// MD5 of the reconstructed full text.
    pub fn finish(mut self) -> Result<String, DeltaError> {
        self.dest.flush()?;
        self.dest.sync_all()?;
        Ok(hex::encode(self.digest.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmpfile(data: &[u8]) -> File {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(data).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f
    }

    fn read_back(mut f: File) -> Vec<u8> {
        let mut out = Vec::new();
        f.seek(SeekFrom::Start(0)).unwrap();
        f.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn fulltext_window() -> Result<(), anyhow::Error> {
        let dest = tempfile::tempfile()?;
        let mut applier = DeltaApplier::new(None, dest.try_clone()?);
        applier.apply_window(&DeltaWindow::fulltext(b"hi\n"))?;
        let digest = applier.finish()?;
        assert_eq!(digest, "764efa883dda1e11db47671c4a3bbd9e");
        assert_eq!(read_back(dest), b"hi\n");
        Ok(())
    }

    #[test]
    fn source_and_target_copies() -> Result<(), anyhow::Error> {
        let source = tmpfile(b"abcdef");
        let dest = tempfile::tempfile()?;
        let mut applier = DeltaApplier::new(Some(source), dest.try_clone()?);
        applier.apply_window(&DeltaWindow {
            sview_offset: 2,
            sview_len: 3,
            tview_len: 8,
            ops: vec![
                DeltaOp::Source { offset: 0, len: 3 },
                DeltaOp::New { offset: 0, len: 1 },
                // Overlapping target copy: run-length expansion.
                DeltaOp::Target { offset: 3, len: 4 },
            ],
            new_data: b"x".to_vec(),
        })?;
        assert_eq!(read_back(dest), b"cdexxxxx");
        Ok(())
    }

    #[test]
    fn bad_declared_length() {
        let dest = tempfile::tempfile().unwrap();
        let mut applier = DeltaApplier::new(None, dest);
        let mut w = DeltaWindow::fulltext(b"hi\n");
        w.tview_len = 5;
        assert!(matches!(
            applier.apply_window(&w),
            Err(DeltaError::TargetLength(3, 5))
        ));
    }
}
