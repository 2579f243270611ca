//! Revisioned blob storage on the local filesystem.
//!
//! Layout: one directory per key under the store root (directory name is the
//! percent-escaped key, slashes included), one gzip file per revision named
//! by its decimal number. The gzip header doubles as the metadata record:
//! FNAME carries the key, MTIME the creation time, and EXTRA a JSON blob
//! with `{revision, type, size, md5}`. Revisions are immutable once their
//! file exists; they disappear only through the retention sweeps.

mod media;
mod reader;
mod retention;
mod staging;

pub use reader::ArtifactReader;
pub use retention::spawn_sweeper;
pub use staging::StagingFile;

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::{Compression, GzBuilder};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use media::detect_content_type;

/// Everything outside `[A-Za-z0-9-._~]` is escaped, slash included, so a key
/// maps to exactly one flat directory name.
const KEY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Metadata of one stored revision.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub key: String,
    pub revision: u64,
    pub content_type: String,
    /// Byte length of the uncompressed payload.
    pub size: u64,
    /// MD5 of the uncompressed payload, 32 lowercase hex digits.
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Wire form of the metadata embedded in the gzip EXTRA field.
#[derive(Serialize, Deserialize)]
pub(crate) struct ExtraFields {
    pub(crate) revision: u64,
    #[serde(rename = "type")]
    pub(crate) content_type: String,
    pub(crate) size: u64,
    pub(crate) md5: String,
}

/// Which old revisions to drop. Both rules run independently; zero disables
/// a rule. The latest revision of a key is never swept.
#[derive(Debug, Clone, Default)]
pub struct RetainPolicy {
    /// Keep at most this many trailing revisions; 0 keeps all.
    pub num: u64,
    /// Drop non-latest revisions older than this; `None` keeps forever.
    pub period: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    retain: RetainPolicy,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, retain: RetainPolicy) -> LocalStore {
        LocalStore {
            root: root.into(),
            retain,
        }
    }

    fn escape(key: &str) -> String {
        utf8_percent_encode(key, KEY_ESCAPE).to_string()
    }

    fn unescape(name: &str) -> String {
        percent_decode_str(name).decode_utf8_lossy().into_owned()
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.root.join(Self::escape(key))
    }

    fn revision_path(&self, key: &str, revision: u64) -> PathBuf {
        self.key_dir(key).join(revision.to_string())
    }

    /// Highest revision number present for `key`.
    ///
    /// A missing key directory is `NoSuchArtifact`; a present but empty one
    /// yields 0.
    pub fn latest(&self, key: &str) -> Result<u64, StoreError> {
        let entries = match fs::read_dir(self.key_dir(key)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NoSuchArtifact)
            }
            Err(e) => return Err(e.into()),
        };

        let mut latest = 0;
        for entry in entries {
            let entry = entry?;
            if let Ok(revision) = entry.file_name().to_string_lossy().parse::<u64>() {
                latest = latest.max(revision);
            }
        }

        Ok(latest)
    }

    /// Read the metadata of one revision without inflating the payload.
    pub fn metadata(&self, key: &str, revision: u64) -> Result<Metadata, StoreError> {
        match ArtifactReader::open(&self.revision_path(key, revision)) {
            Ok(reader) => Ok(reader.metadata().clone()),
            Err(e) => Err(self.map_missing(key, revision, e)),
        }
    }

    /// Open one revision for reading.
    pub fn get(&self, key: &str, revision: u64) -> Result<(ArtifactReader, Metadata), StoreError> {
        match ArtifactReader::open(&self.revision_path(key, revision)) {
            Ok(reader) => {
                let meta = reader.metadata().clone();
                Ok((reader, meta))
            }
            Err(e) => Err(self.map_missing(key, revision, e)),
        }
    }

    /// A missing file is `RevisionDeleted` when a higher revision still
    /// exists, otherwise `NoSuchArtifact`.
    fn map_missing(&self, key: &str, revision: u64, err: StoreError) -> StoreError {
        match err {
            StoreError::Io(e) if e.kind() == io::ErrorKind::NotFound => match self.latest(key) {
                Ok(latest) if revision < latest => StoreError::RevisionDeleted,
                _ => StoreError::NoSuchArtifact,
            },
            other => other,
        }
    }

    /// Store a new revision of `key` from a streaming body.
    ///
    /// The body is staged through a temp file to compute size and MD5 before
    /// the compressed target is written, so an interrupted upload leaves
    /// either no file or a complete one. Returns the allocated revision.
    ///
    /// Revision allocation is not protected against concurrent writers of
    /// the same key; the server runs a single process and uploads to one key
    /// are expected not to race.
    pub fn put(&self, key: &str, mut body: impl Read) -> Result<u64, StoreError> {
        let mut head = [0u8; 512];
        let head_len = read_head(&mut body, &mut head)?;

        let latest = match self.latest(key) {
            Ok(n) => n,
            Err(StoreError::NoSuchArtifact) => 0,
            Err(e) => return Err(e),
        };
        let revision = latest + 1;

        fs::create_dir_all(self.key_dir(key))?;
        let path = self.revision_path(key, revision);
        let file = fs::File::create(&path)?;

        match self.write_revision(key, revision, file, &head[..head_len], body) {
            Ok(()) => Ok(revision),
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    fn write_revision(
        &self,
        key: &str,
        revision: u64,
        file: fs::File,
        head: &[u8],
        mut body: impl Read,
    ) -> Result<(), StoreError> {
        let mut staging = StagingFile::new()?;
        staging.write_all(head)?;
        staging.fill_from(&mut body)?;

        let extra = serde_json::to_vec(&ExtraFields {
            revision,
            content_type: detect_content_type(key, head),
            size: staging.size(),
            md5: staging.hash_hex(),
        })?;

        let mut gz = GzBuilder::new()
            .filename(key)
            .mtime(Utc::now().timestamp() as u32)
            .extra(extra)
            .write(file, Compression::default());

        staging.copy_to(&mut gz)?;
        let file = gz.finish()?;
        file.sync_all()?;
        Ok(())
    }

    /// Drop revisions of `key` numbered `latest - num` or below.
    ///
    /// Invoked after each successful put with the newly allocated revision.
    /// Removal failures are logged and skipped.
    pub fn sweep_by_num(&self, key: &str, latest: u64) {
        if self.retain.num == 0 {
            return;
        }
        let cutoff = latest.saturating_sub(self.retain.num);
        if cutoff == 0 {
            return;
        }

        let dir = self.key_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Ok(revision) = name.to_string_lossy().parse::<u64>() else {
                continue;
            };
            if revision <= cutoff {
                match fs::remove_file(dir.join(&name)) {
                    Ok(()) => tracing::info!(key, revision, "swept old revision"),
                    Err(e) => {
                        tracing::error!(key, revision, error = %e, "failed to sweep old revision")
                    }
                }
            }
        }
    }

    /// Drop non-latest revisions of `key` whose age exceeds the retention
    /// period.
    fn sweep_by_time(&self, key: &str) {
        let Some(period) = self.retain.period else {
            return;
        };
        let Ok(period) = chrono::Duration::from_std(period) else {
            return;
        };

        let Ok(latest) = self.latest(key) else {
            return;
        };

        let dir = self.key_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let now = Utc::now();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Ok(revision) = name.to_string_lossy().parse::<u64>() else {
                continue;
            };
            if revision == latest {
                continue;
            }

            let Ok(meta) = self.metadata(key, revision) else {
                continue;
            };

            if meta.timestamp + period < now {
                match fs::remove_file(dir.join(&name)) {
                    Ok(()) => tracing::info!(key, revision, "swept old revision"),
                    Err(e) => {
                        tracing::error!(key, revision, error = %e, "failed to sweep old revision")
                    }
                }
            }
        }
    }

    /// Apply the age-based retention rule to every key in the store.
    pub fn sweep(&self) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let key = Self::unescape(&entry.file_name().to_string_lossy());
            self.sweep_by_time(&key);
        }
    }
}

/// Fill `buf` from `r` until full or EOF; the head is what content sniffing
/// looks at.
fn read_head(r: &mut impl Read, buf: &mut [u8; 512]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
