//! End-to-end tests over a real listener: publish/fetch round-trips,
//! redirects, retention, conditional and range GETs, and authorization.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use artistore::auth::{Secret, Token};
use artistore::routes::build_router;
use artistore::state::AppState;
use artistore::store::{LocalStore, RetainPolicy};

struct TestServer {
    base_url: String,
    secret: Secret,
    _dir: tempfile::TempDir,
}

/// Start the server on an ephemeral port with a tempdir store.
async fn start_test_server(retain: RetainPolicy) -> TestServer {
    let dir = tempfile::tempdir().expect("create temp store dir");
    let secret = Secret::generate();

    let store = Arc::new(LocalStore::new(dir.path(), retain));
    let app = build_router(AppState {
        store,
        secret: secret.clone(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        secret,
        _dir: dir,
    }
}

fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

async fn publish(server: &TestServer, key: &str, body: Vec<u8>) -> reqwest::Response {
    let token = Token::for_key(&server.secret, key);
    reqwest::Client::new()
        .post(format!("{}/{}", server.base_url, key))
        .header("Authorization", format!("bearer {}", token))
        .body(body)
        .send()
        .await
        .unwrap()
}

fn header<'a>(resp: &'a reqwest::Response, name: &str) -> &'a str {
    resp.headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {name}"))
        .to_str()
        .unwrap()
}

#[tokio::test]
async fn test_write_then_read_roundtrip() {
    let server = start_test_server(RetainPolicy::default()).await;

    let resp = publish(&server, "hello", b"hello world".to_vec()).await;
    assert_eq!(resp.status(), 201);
    assert_eq!(header(&resp, "location"), "/hello?rev=1");
    assert_eq!(header(&resp, "server"), "Artistore");

    let resp = reqwest::get(format!("{}/hello?rev=1", server.base_url))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(header(&resp, "etag"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    assert_eq!(header(&resp, "content-length"), "11");
    assert_eq!(
        header(&resp, "cache-control"),
        "public, max-age=31536000, immutable"
    );
    assert_eq!(header(&resp, "accept-ranges"), "bytes");
    assert_eq!(header(&resp, "content-type"), "text/plain; charset=utf-8");
    assert_eq!(resp.text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn test_latest_redirect() {
    let server = start_test_server(RetainPolicy::default()).await;

    assert_eq!(publish(&server, "hello", b"one".to_vec()).await.status(), 201);
    assert_eq!(publish(&server, "hello", b"two".to_vec()).await.status(), 201);

    let resp = no_redirect_client()
        .get(format!("{}/hello", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 303);
    assert_eq!(header(&resp, "location"), "/hello?rev=2");

    // A redirect-following client lands on the latest body.
    let resp = reqwest::get(format!("{}/hello", server.base_url))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "two");
}

#[tokio::test]
async fn test_retention_by_count() {
    let server = start_test_server(RetainPolicy {
        num: 2,
        period: None,
    })
    .await;

    for body in [b"one".to_vec(), b"two".to_vec(), b"three".to_vec()] {
        assert_eq!(publish(&server, "hello", body).await.status(), 201);
    }
    assert_eq!(publish(&server, "world", b"only".to_vec()).await.status(), 201);

    // The count-based sweep runs off the request path.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let gone = reqwest::get(format!("{}/hello?rev=1", server.base_url))
        .await
        .unwrap();
    assert_eq!(gone.status(), 410);

    for rev in [2, 3] {
        let ok = reqwest::get(format!("{}/hello?rev={}", server.base_url, rev))
            .await
            .unwrap();
        assert_eq!(ok.status(), 200, "revision {rev} should remain");
    }

    let other = reqwest::get(format!("{}/world?rev=1", server.base_url))
        .await
        .unwrap();
    assert_eq!(other.status(), 200);

    let never = reqwest::get(format!("{}/hello?rev=99", server.base_url))
        .await
        .unwrap();
    assert_eq!(never.status(), 404);
}

#[tokio::test]
async fn test_conditional_get() {
    let server = start_test_server(RetainPolicy::default()).await;
    publish(&server, "hello", b"hello world".to_vec()).await;

    let url = format!("{}/hello?rev=1", server.base_url);
    let first = reqwest::get(&url).await.unwrap();
    assert_eq!(first.status(), 200);
    let etag = header(&first, "etag").to_string();

    let resp = reqwest::Client::new()
        .get(&url)
        .header("If-None-Match", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 304);
    assert_eq!(resp.text().await.unwrap(), "");

    // The artifact is newer than a date in the past.
    let resp = reqwest::Client::new()
        .get(&url)
        .header("If-Modified-Since", "Wed, 21 Oct 2015 07:28:00 GMT")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 304);

    // But not newer than a date in the future.
    let resp = reqwest::Client::new()
        .get(&url)
        .header("If-Modified-Since", "Wed, 21 Oct 2105 07:28:00 GMT")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_range_get() {
    let server = start_test_server(RetainPolicy::default()).await;
    let payload: Vec<u8> = (0..100).collect();
    publish(&server, "blob", payload.clone()).await;

    let url = format!("{}/blob?rev=1", server.base_url);
    let client = reqwest::Client::new();

    let resp = client
        .get(&url)
        .header("Range", "bytes=10-19")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 206);
    assert_eq!(header(&resp, "content-length"), "10");
    assert_eq!(header(&resp, "content-range"), "bytes 10-19/100");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), &payload[10..20]);

    let resp = client
        .get(&url)
        .header("Range", "bytes=-10")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 206);
    assert_eq!(header(&resp, "content-range"), "bytes 90-99/100");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), &payload[90..]);

    let resp = client
        .get(&url)
        .header("Range", "bytes=90-")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 206);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), &payload[90..]);

    let resp = client
        .get(&url)
        .header("Range", "chunk=0-10")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert!(resp.text().await.unwrap().contains("Unsupported range unit"));

    let resp = client
        .get(&url)
        .header("Range", "bytes=a-11")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(&url)
        .header("Range", "bytes=200-")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 416);
}

#[tokio::test]
async fn test_if_range() {
    let server = start_test_server(RetainPolicy::default()).await;
    let payload: Vec<u8> = (0..100).collect();
    publish(&server, "blob", payload.clone()).await;

    let url = format!("{}/blob?rev=1", server.base_url);
    let client = reqwest::Client::new();
    let etag = {
        let resp = reqwest::get(&url).await.unwrap();
        header(&resp, "etag").to_string()
    };

    // Matching validator keeps the range.
    let resp = client
        .get(&url)
        .header("Range", "bytes=0-9")
        .header("If-Range", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 206);
    assert_eq!(resp.bytes().await.unwrap().len(), 10);

    // Mismatched validator downgrades to the whole body.
    let resp = client
        .get(&url)
        .header("Range", "bytes=0-9")
        .header("If-Range", "0000000000000000000000000000dead")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap().len(), 100);
}

#[tokio::test]
async fn test_prefix_token() {
    let server = start_test_server(RetainPolicy::default()).await;
    let token = Token::for_key(&server.secret, "a/b/");
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/a/b/c", server.base_url))
        .header("Authorization", format!("bearer {}", token))
        .body(b"nested".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    assert_eq!(header(&resp, "location"), "/a/b/c?rev=1");

    let resp = client
        .post(format!("{}/a/x", server.base_url))
        .header("Authorization", format!("bearer {}", token))
        .body(b"sibling".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_post_auth_failures() {
    let server = start_test_server(RetainPolicy::default()).await;
    let client = reqwest::Client::new();
    let url = format!("{}/hello", server.base_url);

    let resp = client.post(&url).body(b"data".to_vec()).send().await.unwrap();
    assert_eq!(resp.status(), 403);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("Authorization header is required"));

    let resp = client
        .post(&url)
        .header("Authorization", "Basic dXNlcjpwYXNz")
        .body(b"data".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert!(resp.text().await.unwrap().contains("should be bearer"));

    let resp = client
        .post(&url)
        .header("Authorization", "bearer t1:not-a-real-token")
        .body(b"data".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert!(resp.text().await.unwrap().contains("Invalid authorization token"));

    // A token for a different key is rejected too.
    let wrong = Token::for_key(&server.secret, "other");
    let resp = client
        .post(&url)
        .header("Authorization", format!("bearer {}", wrong))
        .body(b"data".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_head_has_headers_but_no_body() {
    let server = start_test_server(RetainPolicy::default()).await;
    publish(&server, "hello", b"hello world".to_vec()).await;

    let resp = reqwest::Client::new()
        .head(format!("{}/hello?rev=1", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(header(&resp, "content-length"), "11");
    assert_eq!(header(&resp, "etag"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    assert_eq!(resp.bytes().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_options_and_method_table() {
    let server = start_test_server(RetainPolicy::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .request(reqwest::Method::OPTIONS, format!("{}/hello", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(header(&resp, "allow"), "GET, POST, HEAD, OPTIONS");

    let resp = client
        .request(
            reqwest::Method::OPTIONS,
            format!("{}/hello?rev=1", server.base_url),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(header(&resp, "allow"), "GET, HEAD, OPTIONS");

    let resp = client
        .delete(format!("{}/hello", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 405);

    // The bare root is not a key.
    let resp = reqwest::get(&server.base_url).await.unwrap();
    assert_eq!(resp.status(), 404);

    let resp = reqwest::get(format!("{}/missing", server.base_url))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_bad_revision_parameter() {
    let server = start_test_server(RetainPolicy::default()).await;
    publish(&server, "hello", b"data".to_vec()).await;

    for rev in ["abc", "-1", "1.5", ""] {
        let resp = reqwest::get(format!("{}/hello?rev={}", server.base_url, rev))
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "rev={rev:?}");
    }
}
