//! Seekable reads over a compressed revision file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;

use crate::error::StoreError;

use super::{ExtraFields, Metadata};

/// A reader over the uncompressed payload of one revision.
///
/// The reader tracks a logical position in the uncompressed stream. Forward
/// seeks discard bytes from the decompressor; backward seeks rewind the
/// underlying file, reset the decoder, and replay forward. `SeekFrom::End`
/// resolves against the uncompressed size recorded in the metadata header,
/// which makes the reader usable for byte-range serving without inflating
/// the whole payload first.
pub struct ArtifactReader {
    // None only transiently while the decoder is being reset.
    decoder: Option<GzDecoder<File>>,
    meta: Metadata,
    pos: u64,
}

impl ArtifactReader {
    pub(super) fn open(path: &Path) -> Result<ArtifactReader, StoreError> {
        let file = File::open(path)?;
        let decoder = GzDecoder::new(file);
        let meta = decode_metadata(&decoder)?;

        Ok(ArtifactReader {
            decoder: Some(decoder),
            meta,
            pos: 0,
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    fn rewind_decoder(&mut self) -> io::Result<()> {
        let decoder = self
            .decoder
            .take()
            .ok_or_else(|| io::Error::other("artifact reader poisoned by earlier seek failure"))?;

        let mut file = decoder.into_inner();
        file.seek(SeekFrom::Start(0))?;
        self.decoder = Some(GzDecoder::new(file));
        self.pos = 0;
        Ok(())
    }
}

impl Read for ArtifactReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| io::Error::other("artifact reader poisoned by earlier seek failure"))?;

        let n = decoder.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for ArtifactReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(d) => i128::from(self.pos) + i128::from(d),
            SeekFrom::End(d) => i128::from(self.meta.size) + i128::from(d),
        };

        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative position",
            ));
        }
        let target = target as u64;

        if target < self.pos {
            self.rewind_decoder()?;
        }

        let skip = target - self.pos;
        io::copy(&mut self.by_ref().take(skip), &mut io::sink())?;

        Ok(self.pos)
    }
}

fn decode_metadata(decoder: &GzDecoder<File>) -> Result<Metadata, StoreError> {
    let header = decoder
        .header()
        .ok_or_else(|| StoreError::CorruptArtifact("missing gzip header".to_string()))?;

    let extra = header
        .extra()
        .ok_or_else(|| StoreError::CorruptArtifact("missing metadata field".to_string()))?;
    let fields: ExtraFields = serde_json::from_slice(extra)?;

    let key = header
        .filename()
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .unwrap_or_default();
    let timestamp = DateTime::<Utc>::from_timestamp(i64::from(header.mtime()), 0)
        .unwrap_or(DateTime::UNIX_EPOCH);

    Ok(Metadata {
        key,
        revision: fields.revision,
        content_type: fields.content_type,
        size: fields.size,
        hash: fields.md5,
        timestamp,
    })
}
