use std::io;

use thiserror::Error;

/// The error type for blob store operations.
///
/// `NoSuchArtifact` and `RevisionDeleted` are sentinel kinds the HTTP layer
/// matches on to pick a status code; everything else passes through.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key has never been published, or the revision is above the latest.
    #[error("No such artifact on this server.")]
    NoSuchArtifact,

    /// The revision existed once but has been swept away.
    #[error("This revision has been deleted.")]
    RevisionDeleted,

    /// The revision file exists but its gzip header is unreadable.
    #[error("artifact file is corrupt: {0}")]
    CorruptArtifact(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("invalid metadata header: {0}")]
    Metadata(#[from] serde_json::Error),
}
