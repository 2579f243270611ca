//! HTTP surface of the artifact store.
//!
//! The request path minus its leading slash is the artifact key. `?rev=N`
//! addresses one revision; without it, GET redirects to the latest. POST
//! publishes a new revision and requires a bearer token minted from the
//! server secret. The store itself is synchronous, so every store call runs
//! on a blocking task and bodies are bridged over channels in both
//! directions.

use std::io::{self, Read, Seek, SeekFrom};
use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::auth::{is_correct_token, Token};
use crate::error::StoreError;
use crate::key::verify_key;
use crate::range::{RangeError, RangeRequest};
use crate::state::AppState;
use crate::store::{ArtifactReader, Metadata};

const INTERNAL_ERROR_MESSAGE: &str =
    "Internal server error.\nPlease check server log if you are server administrator.";

/// Build the axum router: the bare root rejects, everything else is a key.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", any(bare_root))
        .route("/*key", any(artifact))
        .layer(middleware::from_fn(set_server_header))
        .with_state(state)
}

async fn set_server_header(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    res.headers_mut()
        .insert(header::SERVER, HeaderValue::from_static("Artistore"));
    res
}

async fn bare_root() -> Response {
    plain(StatusCode::NOT_FOUND, "Please specify the key of artifact.")
}

#[derive(Deserialize)]
struct RevQuery {
    rev: Option<String>,
}

async fn artifact(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<RevQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let method = req.method().clone();
    tracing::info!(%method, key = %key, client = %addr, "request");

    if method == Method::GET || method == Method::HEAD {
        let is_head = method == Method::HEAD;
        match query.rev {
            Some(raw) => serve_revision(&state, &key, &raw, req.headers(), is_head).await,
            None => redirect_latest(&state, &key, req.headers()).await,
        }
    } else if method == Method::POST {
        post_artifact(state, key, req).await
    } else if method == Method::OPTIONS {
        options_artifact(query.rev.is_some())
    } else {
        plain(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed.")
    }
}

/// GET without `rev`: point the client at the latest revision.
async fn redirect_latest(state: &AppState, key: &str, headers: &HeaderMap) -> Response {
    let store = state.store.clone();
    let owned_key = key.to_string();
    let latest = match tokio::task::spawn_blocking(move || store.latest(&owned_key)).await {
        Ok(Ok(revision)) => revision,
        Ok(Err(err @ StoreError::NoSuchArtifact)) => return plain(StatusCode::NOT_FOUND, err),
        Ok(Err(err)) => return internal_error(err),
        Err(err) => return internal_error(err),
    };

    let path = path_to(key, latest);
    let mut res = plain(
        StatusCode::SEE_OTHER,
        format!("http://{}{}", host(headers), path),
    );
    set_location(&mut res, &path);
    res
}

/// GET/HEAD of one revision: conditional and range semantics.
async fn serve_revision(
    state: &AppState,
    key: &str,
    raw_revision: &str,
    headers: &HeaderMap,
    is_head: bool,
) -> Response {
    let Ok(revision) = raw_revision.parse::<u64>() else {
        return plain(StatusCode::BAD_REQUEST, "Invalid revision.");
    };

    let store = state.store.clone();
    let owned_key = key.to_string();
    let meta = match tokio::task::spawn_blocking(move || store.metadata(&owned_key, revision)).await
    {
        Ok(Ok(meta)) => meta,
        Ok(Err(err)) => return store_error(err),
        Err(err) => return internal_error(err),
    };

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let mut range = match RangeRequest::parse(range_header) {
        Ok(range) => range,
        Err(err @ RangeError::UnsupportedUnit) => return plain(StatusCode::BAD_REQUEST, err),
        Err(_) => return plain(StatusCode::BAD_REQUEST, "Invalid range request."),
    };

    let store = state.store.clone();
    let owned_key = key.to_string();
    let reader = match tokio::task::spawn_blocking(move || store.get(&owned_key, revision)).await {
        Ok(Ok((reader, _))) => reader,
        Ok(Err(err)) => return store_error(err),
        Err(err) => return internal_error(err),
    };

    // A failed If-Range precondition downgrades to the whole body.
    if let Some(cond) = headers.get(header::IF_RANGE).and_then(|v| v.to_str().ok()) {
        if !if_range_keeps(cond, &meta) {
            range = RangeRequest::default();
        }
    }

    let resolved = if range.requested() {
        match range.resolve(meta.size) {
            Ok(resolved) => Some(resolved),
            Err(err) => return plain(StatusCode::RANGE_NOT_SATISFIABLE, err),
        }
    } else {
        None
    };

    let mut out = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&meta.content_type) {
        out.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.hash) {
        out.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format_http_date(meta.timestamp)) {
        out.insert(header::LAST_MODIFIED, value);
    }
    out.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    out.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    match &resolved {
        Some(range) => {
            out.insert(header::CONTENT_LENGTH, HeaderValue::from(range.size()));
            if let Ok(value) = HeaderValue::from_str(&range.content_range()) {
                out.insert(header::CONTENT_RANGE, value);
            }
        }
        None => {
            out.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));
        }
    }

    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    if if_none_match == Some(meta.hash.as_str()) {
        return respond(StatusCode::NOT_MODIFIED, out, Body::empty());
    }
    if if_none_match.is_none() {
        if let Some(since) = headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date)
        {
            if meta.timestamp > since {
                return respond(StatusCode::NOT_MODIFIED, out, Body::empty());
            }
        }
    }

    if is_head {
        return respond(StatusCode::OK, out, Body::empty());
    }

    match resolved {
        Some(range) => respond(
            StatusCode::PARTIAL_CONTENT,
            out,
            stream_body(reader, Some(range.from), Some(range.size())),
        ),
        None => respond(StatusCode::OK, out, stream_body(reader, None, None)),
    }
}

/// POST: authorized streaming upload of a new revision.
async fn post_artifact(state: AppState, key: String, req: Request) -> Response {
    let auth = match req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(value) => value.trim().to_string(),
        None => {
            return plain(
                StatusCode::FORBIDDEN,
                "Authorization header is required to publish artifact.",
            )
        }
    };

    let token = match auth.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => return plain(StatusCode::FORBIDDEN, "Authorization type should be bearer."),
    };

    let authorized = match Token::parse(token) {
        Ok(token) => is_correct_token(&state.secret, &token, &key),
        Err(_) => false,
    };
    if !authorized {
        tracing::warn!(key = %key, "rejected publish with invalid token");
        return plain(StatusCode::FORBIDDEN, "Invalid authorization token.");
    }

    if let Err(err) = verify_key(&key) {
        return plain(StatusCode::BAD_REQUEST, err);
    }

    let host = host(req.headers()).to_string();

    // Bridge the request body into the synchronous store: chunks flow over a
    // bounded channel to a reader running on the blocking pool.
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(8);
    let store = state.store.clone();
    let owned_key = key.clone();
    let put_task =
        tokio::task::spawn_blocking(move || store.put(&owned_key, ChannelReader::new(rx)));

    let mut body = req.into_body().into_data_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                if tx.send(Ok(bytes)).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "upload body interrupted");
                let _ = tx.send(Err(io::Error::other(err))).await;
                break;
            }
        }
    }
    drop(tx);

    let revision = match put_task.await {
        Ok(Ok(revision)) => revision,
        Ok(Err(err)) => return internal_error(err),
        Err(err) => return internal_error(err),
    };

    tracing::info!(key = %key, revision, "published new revision");

    // Retention by count runs off the request path.
    let store = state.store.clone();
    let owned_key = key.clone();
    tokio::task::spawn_blocking(move || store.sweep_by_num(&owned_key, revision));

    let path = path_to(&key, revision);
    let mut res = plain(StatusCode::CREATED, format!("http://{}{}", host, path));
    set_location(&mut res, &path);
    res
}

fn options_artifact(has_rev: bool) -> Response {
    let allow = if has_rev {
        "GET, HEAD, OPTIONS"
    } else {
        "GET, POST, HEAD, OPTIONS"
    };
    let mut res = Response::new(Body::empty());
    res.headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(allow));
    res
}

/// Reader over a channel of body chunks, for use on the blocking pool.
struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> ChannelReader {
        ChannelReader {
            rx,
            current: Bytes::new(),
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(Ok(bytes)) => self.current = bytes,
                Some(Err(err)) => return Err(err),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len());
        let chunk = self.current.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }
}

/// Stream the (optionally seeked and limited) reader out as a response body.
///
/// Reads happen on a blocking task; a dropped receiver means the client went
/// away and stops the copy.
fn stream_body(mut reader: ArtifactReader, seek_to: Option<u64>, limit: Option<u64>) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(8);

    tokio::task::spawn_blocking(move || {
        if let Some(offset) = seek_to {
            if let Err(err) = reader.seek(SeekFrom::Start(offset)) {
                tracing::error!(error = %err, "failed to seek artifact reader");
                let _ = tx.blocking_send(Err(err));
                return;
            }
        }

        let mut remaining = limit;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let want = match remaining {
                Some(0) => break,
                Some(left) => buf.len().min(left as usize),
                None => buf.len(),
            };
            match reader.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    if let Some(left) = remaining.as_mut() {
                        *left -= n as u64;
                    }
                    if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed while streaming artifact body");
                    let _ = tx.blocking_send(Err(err));
                    break;
                }
            }
        }
    });

    Body::from_stream(ReceiverStream::new(rx))
}

fn path_to(key: &str, revision: u64) -> String {
    format!("/{}?rev={}", key, revision)
}

fn host(headers: &HeaderMap) -> &str {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
}

fn set_location(res: &mut Response, path: &str) {
    if let Ok(value) = HeaderValue::from_str(path) {
        res.headers_mut().insert(header::LOCATION, value);
    }
}

/// Keep the range when the validator still matches: an HTTP-date validator
/// holds while the artifact is not newer, anything else must equal the hash.
fn if_range_keeps(cond: &str, meta: &Metadata) -> bool {
    match parse_http_date(cond) {
        Some(date) => meta.timestamp <= date,
        None => cond == meta.hash,
    }
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc2822(value) {
        return Some(t.with_timezone(&Utc));
    }
    // RFC 850 and asctime forms.
    if let Ok(t) = NaiveDateTime::parse_from_str(value, "%A, %d-%b-%y %H:%M:%S GMT") {
        return Some(t.and_utc());
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(value, "%a %b %e %H:%M:%S %Y") {
        return Some(t.and_utc());
    }
    None
}

fn format_http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn plain(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, format!("{message}\n")).into_response()
}

fn store_error(err: StoreError) -> Response {
    match err {
        StoreError::NoSuchArtifact => plain(StatusCode::NOT_FOUND, err),
        StoreError::RevisionDeleted => plain(StatusCode::GONE, err),
        other => internal_error(other),
    }
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    tracing::error!(error = %err, "internal error");
    plain(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
}

fn respond(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut res = Response::new(body);
    *res.status_mut() = status;
    *res.headers_mut() = headers;
    res
}
