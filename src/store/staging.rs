//! Temp-file staging for uploads.
//!
//! The gzip header of a revision file embeds the payload's size and MD5, so
//! both must be known before the compressed target is written — but the
//! upload body is unbounded. Each write therefore fans out to an unlinked
//! temp file and a running hasher; once the body is fully staged the
//! metadata is final and the bytes are replayed into the compressed target.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use md5::{Digest, Md5};

pub struct StagingFile {
    file: File,
    hasher: Md5,
    size: u64,
}

impl StagingFile {
    /// Create an unlinked temp file; the backing storage is reclaimed when
    /// the value drops.
    pub fn new() -> io::Result<StagingFile> {
        Ok(StagingFile {
            file: tempfile::tempfile()?,
            hasher: Md5::new(),
            size: 0,
        })
    }

    /// Byte length of everything staged so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// MD5 of everything staged so far, as 32 lowercase hex digits.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// Flush, rewind, and stream the staged bytes into `sink`.
    pub fn copy_to(&mut self, sink: &mut impl Write) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        self.file.seek(SeekFrom::Start(0))?;
        io::copy(&mut self.file, sink)?;
        Ok(())
    }

    /// Stage the whole of `r`, then return the final size.
    pub fn fill_from(&mut self, r: &mut impl Read) -> io::Result<u64> {
        io::copy(r, self)?;
        Ok(self.size)
    }
}

impl Write for StagingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
