//! Positioned writes to recovery and repaired files
//!
//! Recovery packets and reconstructed blocks are written piecewise at known
//! offsets. [`OutputHandle`] keeps the most recently used file open so that
//! consecutive writes to the same path share a handle.

use crate::error::{FileOp, Par3Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct OutputHandle {
    open: Option<(PathBuf, File)>,
}

impl OutputHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` for reading and writing, creating it when missing
    fn file(&mut self, path: &Path) -> Result<&mut File> {
        let handle = match self.open.take() {
            Some((open, handle)) if open == path => handle,
            previous => {
                if let Some((open, mut handle)) = previous {
                    handle
                        .flush()
                        .map_err(|e| Par3Error::file_io(&open, FileOp::Write, e))?;
                }
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(path)
                    .map_err(|e| Par3Error::file_io(path, FileOp::Create, e))?
            }
        };
        Ok(&mut self.open.insert((path.to_path_buf(), handle)).1)
    }

    pub fn write_at(&mut self, path: &Path, offset: u64, bytes: &[u8]) -> Result<()> {
        let file = self.file(path)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Par3Error::file_io(path, FileOp::Seek, e))?;
        file.write_all(bytes)
            .map_err(|e| Par3Error::file_io(path, FileOp::Write, e))
    }

    pub fn read_at(&mut self, path: &Path, offset: u64, buf: &mut [u8]) -> Result<()> {
        let file = self.file(path)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Par3Error::file_io(path, FileOp::Seek, e))?;
        file.read_exact(buf)
            .map_err(|e| Par3Error::file_io(path, FileOp::Read, e))
    }

    /// Flush and close the open handle
    pub fn close(&mut self) -> Result<()> {
        if let Some((path, mut handle)) = self.open.take() {
            handle
                .flush()
                .map_err(|e| Par3Error::file_io(&path, FileOp::Write, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_across_files() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let mut out = OutputHandle::new();

        out.write_at(&a, 4, b"tail").unwrap();
        out.write_at(&b, 0, b"bee").unwrap();
        out.write_at(&a, 0, b"head").unwrap();

        let mut buf = [0u8; 8];
        out.read_at(&a, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"headtail");
        out.close().unwrap();

        assert_eq!(std::fs::read(&b).unwrap(), b"bee");
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let mut out = OutputHandle::new();
        out.write_at(&a, 0, b"xy").unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            out.read_at(&a, 0, &mut buf),
            Err(Par3Error::FileIo {
                op: FileOp::Read,
                ..
            })
        ));
    }
}
