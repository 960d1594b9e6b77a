use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use chanstore::gateway::router;
use chanstore::{
    MemoryChannel, ObjectCatalog, RetryPolicy, SessionConfig, SessionHandle, Store, StoreConfig,
};
use tower::ServiceExt;

fn store(dir: &Path) -> (Arc<Store>, MemoryChannel) {
    let config = StoreConfig {
        catalog_path: dir.join("config.discord"),
        work_dir: dir.join("work"),
        chunk_size: 4,
        ..StoreConfig::default()
    };
    let catalog =
        ObjectCatalog::create(&config.catalog_path, &SessionConfig::new("token", "42")).unwrap();
    let channel = MemoryChannel::new();
    let store = Store::new(config, catalog, SessionHandle::spawn(channel.clone()))
        .with_retry(RetryPolicy::new(vec![Duration::from_millis(1)]));
    (Arc::new(store), channel)
}

fn request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(Method::from_bytes(method.as_bytes()).unwrap())
        .uri(uri)
}

async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn put(app: &Router, uri: &str, data: &'static [u8]) -> StatusCode {
    send(app, request("PUT", uri).body(Body::from(data)).unwrap())
        .await
        .status()
}

#[tokio::test]
async fn test_options_advertises_dav() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store(dir.path());
    let app = router(store);

    let response = send(&app, request("OPTIONS", "/").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["dav"], "1,2");
    assert_eq!(response.headers()["ms-author-via"], "DAV");
    assert!(response.headers()["allow"]
        .to_str()
        .unwrap()
        .contains("PROPFIND"));
}

#[tokio::test]
async fn test_put_propfind_get() {
    let dir = tempfile::tempdir().unwrap();
    let (store, channel) = store(dir.path());
    let app = router(store.clone());

    assert_eq!(put(&app, "/hello%20world.txt", b"hello, webdav").await, StatusCode::CREATED);
    // 13 bytes in 4-byte chunks plus the digest blob
    assert_eq!(channel.sent_names().len(), 5);

    let listing = send(
        &app,
        request("PROPFIND", "/")
            .header("depth", "1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(listing.status(), StatusCode::MULTI_STATUS);
    let xml = body_text(listing).await;
    assert!(xml.contains("<href>/hello%20world.txt</href>"));
    assert!(xml.contains("<displayname>hello world.txt</displayname>"));
    assert!(xml.contains("<getcontentlength>13</getcontentlength>"));

    let root_only = send(
        &app,
        request("PROPFIND", "/")
            .header("depth", "0")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert!(!body_text(root_only).await.contains("hello"));

    let response = send(
        &app,
        request("GET", "/hello%20world.txt").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-length"], "13");
    assert_eq!(body_text(response).await, "hello, webdav");

    // Second read is served from the cache.
    let fetched = channel.fetch_log().len();
    let again = send(
        &app,
        request("GET", "/hello%20world.txt").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(body_text(again).await, "hello, webdav");
    assert_eq!(channel.fetch_log().len(), fetched);

    let head = send(&app, request("HEAD", "/hello%20world.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(head.headers()["content-length"], "13");

    let root = send(&app, request("GET", "/").body(Body::empty()).unwrap()).await;
    assert_eq!(body_text(root).await, "hello world.txt\t13\n");
}

#[tokio::test]
async fn test_put_replaces_same_name() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store(dir.path());
    let app = router(store.clone());

    assert_eq!(put(&app, "/a.txt", b"first").await, StatusCode::CREATED);
    assert_eq!(put(&app, "/a.txt", b"second!").await, StatusCode::NO_CONTENT);

    let objects = store.list().unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].total_size_bytes, 7);

    let response = send(&app, request("GET", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(body_text(response).await, "second!");
}

#[tokio::test]
async fn test_empty_put_stores_empty_object() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store(dir.path());
    let app = router(store.clone());

    assert_eq!(put(&app, "/empty.txt", b"").await, StatusCode::CREATED);
    let response = send(&app, request("GET", "/empty.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "");
}

#[tokio::test]
async fn test_missing_file_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let (store, channel) = store(dir.path());
    let app = router(store);

    for method in ["GET", "HEAD", "PROPFIND", "DELETE"] {
        let response = send(&app, request(method, "/nope.txt").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", method);
    }
    assert!(channel.fetch_log().is_empty());
}

#[tokio::test]
async fn test_move_and_copy() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store(dir.path());
    let app = router(store.clone());
    put(&app, "/a.txt", b"payload").await;

    let moved = send(
        &app,
        request("MOVE", "/a.txt")
            .header("destination", "http://localhost:8080/b.txt")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(moved.status(), StatusCode::CREATED);
    assert!(store.find_by_name("a.txt").unwrap().is_none());
    assert!(store.find_by_name("b.txt").unwrap().is_some());

    let copied = send(
        &app,
        request("COPY", "/b.txt")
            .header("destination", "/c.txt")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(copied.status(), StatusCode::CREATED);
    assert_eq!(store.list().unwrap().len(), 2);

    let response = send(&app, request("GET", "/c.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(body_text(response).await, "payload");

    let overwrite = send(
        &app,
        request("COPY", "/b.txt")
            .header("destination", "/c.txt")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(overwrite.status(), StatusCode::NO_CONTENT);
    assert_eq!(store.list().unwrap().len(), 2);
}

#[tokio::test]
async fn test_overwrite_false_is_412() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store(dir.path());
    let app = router(store.clone());
    put(&app, "/a.txt", b"one").await;
    put(&app, "/b.txt", b"two").await;

    let response = send(
        &app,
        request("MOVE", "/a.txt")
            .header("destination", "/b.txt")
            .header("overwrite", "F")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    assert!(store.find_by_name("a.txt").unwrap().is_some());
}

#[tokio::test]
async fn test_move_onto_itself_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store(dir.path());
    let app = router(store);
    put(&app, "/a.txt", b"one").await;

    let response = send(
        &app,
        request("MOVE", "/a.txt")
            .header("destination", "/a.txt")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_removes_entry() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store(dir.path());
    let app = router(store.clone());
    put(&app, "/a.txt", b"bye").await;

    let response = send(&app, request("DELETE", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(store.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_lock_unlock_proppatch_mkcol() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store(dir.path());
    let app = router(store);

    let lock = send(&app, request("LOCK", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(lock.status(), StatusCode::OK);
    let token = lock.headers()["lock-token"].to_str().unwrap().to_string();
    assert!(token.starts_with("<urn:uuid:"));
    assert!(body_text(lock).await.contains("<lockscope><exclusive/></lockscope>"));

    let unlock = send(
        &app,
        request("UNLOCK", "/a.txt")
            .header("lock-token", token)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(unlock.status(), StatusCode::NO_CONTENT);

    let proppatch = send(&app, request("PROPPATCH", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(proppatch.status(), StatusCode::MULTI_STATUS);

    let mkcol = send(&app, request("MKCOL", "/dir").body(Body::empty()).unwrap()).await;
    assert_eq!(mkcol.status(), StatusCode::METHOD_NOT_ALLOWED);

    let unknown = send(&app, request("SEARCH", "/").body(Body::empty()).unwrap()).await;
    assert_eq!(unknown.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_unusable_channel_is_502() {
    let dir = tempfile::tempdir().unwrap();
    let (store, channel) = store(dir.path());
    let app = router(store);
    channel.set_unusable("read-only channel");

    assert_eq!(put(&app, "/a.txt", b"data").await, StatusCode::BAD_GATEWAY);
}
