//! Thin HTTP client used by the `get` and `publish` subcommands.

use std::io::{self, Write};

use thiserror::Error;

use crate::auth::Token;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to fetch: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// Non-success response; the message is the server's body.
    #[error("{0}")]
    Server(String),
}

fn artifact_url(server: &str, key: &str, revision: Option<u64>) -> String {
    let mut url = format!("{}/{}", server.trim_end_matches('/'), key);
    if let Some(revision) = revision {
        url.push_str(&format!("?rev={revision}"));
    }
    url
}

/// Fetch an artifact and stream it into `output` (a file path, or stdout
/// when `None`). Follows the latest-revision redirect.
pub async fn fetch(
    server: &str,
    key: &str,
    revision: Option<u64>,
    output: Option<&str>,
) -> Result<(), ClientError> {
    let resp = reqwest::get(artifact_url(server, key, revision)).await?;

    if !resp.status().is_success() {
        return Err(ClientError::Server(resp.text().await?));
    }

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(std::fs::File::create(path)?),
        None => Box::new(io::stdout()),
    };

    let mut resp = resp;
    while let Some(chunk) = resp.chunk().await? {
        out.write_all(&chunk)?;
    }
    out.flush()?;

    Ok(())
}

/// Publish a file as a new revision of `key`. Returns the server's response
/// body (the URL of the new revision).
pub async fn publish(
    server: &str,
    token: &Token,
    key: &str,
    file: &str,
) -> Result<String, ClientError> {
    let data = tokio::fs::read(file).await?;

    let resp = reqwest::Client::new()
        .post(artifact_url(server, key, None))
        .header("Content-Type", "application/octet-stream")
        .header("Authorization", format!("bearer {token}"))
        .body(data)
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(ClientError::Server(body));
    }

    Ok(body)
}
