use axum::{
    body::Body,
    http::{header, request::Builder, Method, Request, StatusCode},
    response::Response,
    Router,
};
use ftpgate::{app, ftp::memory::MemoryFtp, metrics::DownloadOutcome, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

const HOST: &str = "user:pass@ftp.example.com";
const NOTE: &str = "No files are hosted on this server, this is simply a router";
const CLIENT: &str = "192.0.2.10";

fn sample_ftp() -> MemoryFtp {
    MemoryFtp::new()
        .with_login("user", "pass")
        .with_file("/docs/readme.txt", "Hello, world!")
        .with_file("/docs/more/deep.bin", vec![1u8; 32])
        .with_file("/top.txt", "top")
}

fn setup(ftp: &MemoryFtp) -> Router {
    app(AppState::with_backend(ftp.clone()).with_max_download_rate(0))
}

async fn send(app: &Router, builder: Builder) -> Response {
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get(app: &Router, uri: &str, client: &str) -> Response {
    send(app, Request::get(uri).header("x-forwarded-for", client)).await
}

async fn body_bytes(res: Response) -> Vec<u8> {
    res.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn json_body(res: Response) -> Value {
    serde_json::from_slice(&body_bytes(res).await).unwrap()
}

fn browse_uri(path: &str) -> String {
    format!("{path}?host={HOST}")
}

fn download_uri(path: &str) -> String {
    format!("{path}?host={HOST}&download")
}

#[tokio::test]
async fn root_of_empty_server_carries_note() {
    let app = setup(&MemoryFtp::new());

    let res = get(&app, "/?host=ftp.example.com", CLIENT).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "application/json"
    );

    let mut body = json_body(res).await;
    let last_updated = body.as_object_mut().unwrap().remove("lastUpdated");
    assert!(last_updated.unwrap().is_string());
    assert_eq!(
        body,
        json!({
            "type": "dir",
            "path": "",
            "name": "",
            "incomplete": false,
            "dirs": [],
            "files": [],
            "note": NOTE,
        })
    );
}

#[tokio::test]
async fn directory_listing_is_shallow() {
    let app = setup(&sample_ftp());

    let res = get(&app, &browse_uri("/docs/"), CLIENT).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["path"], "/docs");
    assert_eq!(body["dirs"][0]["path"], "/docs/more");
    assert!(body["dirs"][0].get("files").is_none());
    assert_eq!(body["files"][0]["name"], "readme.txt");
    assert_eq!(body["files"][0]["size"], 13);
    assert_eq!(body["note"], NOTE);
}

#[tokio::test]
async fn file_without_download_flag_returns_metadata() {
    let app = setup(&sample_ftp());

    let res = get(&app, &browse_uri("/docs/readme.txt"), CLIENT).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["type"], "file");
    assert_eq!(body["path"], "/docs/readme.txt");
    assert_eq!(body["size"], 13);
    assert_eq!(body["date"], "2024-01-15T00:00:00Z");
    assert_eq!(body["note"], NOTE);
}

#[tokio::test]
async fn missing_host_is_a_bad_request() {
    let app = setup(&sample_ftp());

    for uri in ["/", "/docs", "/docs?download"] {
        let res = get(&app, uri, CLIENT).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{uri}");
        let body = json_body(res).await;
        assert!(body["error"].as_str().unwrap().contains("host"));
    }
}

#[tokio::test]
async fn empty_host_renders_empty_root_without_connecting() {
    let ftp = sample_ftp();
    let app = setup(&ftp);

    let res = get(&app, "/?host=", CLIENT).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["dirs"], json!([]));
    assert_eq!(body["files"], json!([]));
    assert_eq!(ftp.connect_count(), 0);
}

#[tokio::test]
async fn file_grown_since_listing_is_served_at_listed_length() {
    let ftp = MemoryFtp::new().with_file("/f.bin", vec![1u8; 10]);
    let state = AppState::with_backend(ftp.clone()).with_max_download_rate(0);
    let metrics = state.metrics();
    let app = app(state);

    let res = get(&app, "/f.bin?host=ftp.example.com", CLIENT).await;
    assert_eq!(json_body(res).await["size"], 10);

    let _ = ftp.clone().with_file("/f.bin", vec![2u8; 20]);
    let res = get(&app, "/f.bin?host=ftp.example.com&download", CLIENT).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_LENGTH].to_str().unwrap(), "10");
    assert_eq!(body_bytes(res).await, vec![2u8; 10]);
    assert_eq!(metrics.downloads(DownloadOutcome::Completed), 1);
    assert_eq!(metrics.downloads(DownloadOutcome::Cancelled), 0);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let ftp = MemoryFtp::new();
    let app = setup(&ftp);

    let res = get(&app, "/nope?host=ftp.example.com", CLIENT).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let app = setup(&sample_ftp());
    let res = get(&app, &browse_uri("/top.txt/below"), CLIENT).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_without_grant_is_forbidden_and_touches_no_transfer() {
    let ftp = sample_ftp();
    let state = AppState::with_backend(ftp.clone());
    let metrics = state.metrics();
    let app = app(state);

    let res = get(&app, &download_uri("/docs/readme.txt"), CLIENT).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(ftp.transfer_count(), 0);
    assert_eq!(metrics.downloads(DownloadOutcome::Forbidden), 1);
}

#[tokio::test]
async fn download_after_browse_streams_bytes() {
    let ftp = sample_ftp();
    let app = setup(&ftp);

    let res = get(&app, &browse_uri("/"), CLIENT).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = get(&app, &download_uri("/docs/readme.txt"), CLIENT).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "application/octet-stream"
    );
    assert_eq!(res.headers()[header::CONTENT_LENGTH].to_str().unwrap(), "13");
    assert_eq!(res.headers()[header::ACCEPT_RANGES].to_str().unwrap(), "bytes");
    assert_eq!(body_bytes(res).await, b"Hello, world!");
    assert_eq!(ftp.transfer_count(), 1);

    // The successful download refreshed the grant.
    let res = get(&app, &download_uri("/top.txt"), CLIENT).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_bytes(res).await, b"top");
}

#[tokio::test]
async fn grants_are_per_client() {
    let ftp = sample_ftp();
    let app = setup(&ftp);

    get(&app, &browse_uri("/"), "198.51.100.1").await;
    let res = get(&app, &download_uri("/top.txt"), "198.51.100.2").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn download_flag_on_directory_returns_listing() {
    let app = setup(&sample_ftp());

    let res = get(&app, &download_uri("/docs"), CLIENT).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["type"], "dir");
}

#[tokio::test]
async fn ranged_downloads() {
    let app = setup(&sample_ftp());
    get(&app, &browse_uri("/"), CLIENT).await;

    let res = send(
        &app,
        Request::get(download_uri("/docs/readme.txt"))
            .header("x-forwarded-for", CLIENT)
            .header(header::RANGE, "bytes=7-11"),
    )
    .await;
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        res.headers()[header::CONTENT_RANGE].to_str().unwrap(),
        "bytes 7-11/13"
    );
    assert_eq!(res.headers()[header::CONTENT_LENGTH].to_str().unwrap(), "5");
    assert_eq!(body_bytes(res).await, b"world");

    let res = send(
        &app,
        Request::get(download_uri("/docs/readme.txt"))
            .header("x-forwarded-for", CLIENT)
            .header(header::RANGE, "bytes=100-"),
    )
    .await;
    assert_eq!(res.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        res.headers()[header::CONTENT_RANGE].to_str().unwrap(),
        "bytes */13"
    );

    let res = send(
        &app,
        Request::get(download_uri("/docs/readme.txt"))
            .header("x-forwarded-for", CLIENT)
            .header(header::RANGE, "bytes=0-1,4-5"),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_bytes(res).await, b"Hello, world!");
}

#[tokio::test]
async fn failed_transfer_is_a_server_error() {
    let ftp = sample_ftp().with_failing_transfers();
    let app = setup(&ftp);
    get(&app, &browse_uri("/"), CLIENT).await;

    let res = get(&app, &download_uri("/top.txt"), CLIENT).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(res).await["error"], "transfer failed");

    // A failed download does not count as a successful interaction, but the earlier grant holds.
    let res = get(&app, &download_uri("/top.txt"), CLIENT).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn unreachable_server_renders_empty_root() {
    let ftp = sample_ftp().unreachable();
    let app = setup(&ftp);

    let res = get(&app, &browse_uri("/"), CLIENT).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["dirs"], json!([]));
    assert_eq!(body["files"], json!([]));

    let res = get(&app, &browse_uri("/docs"), CLIENT).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_credentials_render_empty_root() {
    let ftp = sample_ftp();
    let app = setup(&ftp);

    let res = get(&app, "/?host=user:wrong@ftp.example.com", CLIENT).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["dirs"], json!([]));
}

#[tokio::test]
async fn tree_is_cached_between_requests() {
    let ftp = sample_ftp();
    let app = setup(&ftp);

    get(&app, &browse_uri("/"), CLIENT).await;
    get(&app, &browse_uri("/docs"), CLIENT).await;
    get(&app, &browse_uri("/docs/more"), CLIENT).await;
    assert_eq!(ftp.connect_count(), 1);
}

#[tokio::test]
async fn percent_encoded_segments_resolve() {
    let ftp = MemoryFtp::new().with_file("/with space/ü.txt", "x");
    let app = setup(&ftp);

    let res = get(&app, "/with%20space/%C3%BC.txt?host=ftp.example.com", CLIENT).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["name"], "ü.txt");
}

#[tokio::test]
async fn cors_headers_and_preflight() {
    let app = setup(&sample_ftp());

    let res = send(
        &app,
        Request::get(browse_uri("/"))
            .header(header::ORIGIN, "https://app.example")
            .header("x-forwarded-for", CLIENT),
    )
    .await;
    assert_eq!(
        res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN].to_str().unwrap(),
        "*"
    );

    let res = send(
        &app,
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/docs/readme.txt")
            .header(header::ORIGIN, "https://app.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "range"),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN].to_str().unwrap(),
        "*"
    );
    let allow_headers = res.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allow_headers.contains("range"));

    // Error responses are readable cross-origin too.
    let res = get(&app, "/", CLIENT).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(res.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn request_id_is_echoed_or_generated() {
    let app = setup(&sample_ftp());

    let res = send(
        &app,
        Request::get(browse_uri("/")).header("x-request-id", "abc-123"),
    )
    .await;
    assert_eq!(res.headers()["x-request-id"].to_str().unwrap(), "abc-123");

    let res = get(&app, &browse_uri("/"), CLIENT).await;
    let generated = res.headers()["x-request-id"].to_str().unwrap();
    assert_eq!(generated.len(), 36);
}

#[tokio::test]
async fn custom_note_is_used() {
    let app = app(AppState::with_backend(MemoryFtp::new()).with_note("hello"));
    let res = get(&app, "/?host=ftp.example.com", CLIENT).await;
    assert_eq!(json_body(res).await["note"], "hello");
}
