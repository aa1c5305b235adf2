//! End-to-end scenario tests driving the full pipeline (match
//! selection, resolution, header building, merge/strip, and upstream
//! forwarding) against a real HTTP server stood up with `wiremock`.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use kreme_proxy::config::Config;
use kreme_proxy::datasources::Registry;
use kreme_proxy::proxy::forward::handle_request;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn registry() -> Registry {
    Registry::with_builtins()
}

/// Single data source, single header: `Foo: bar` inbound becomes
/// `X-Baz: bar` outbound, with the original `Foo` header untouched.
#[tokio::test]
async fn single_data_source_single_header() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .and(header("x-baz", "bar"))
        .and(header("foo", "bar"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&upstream)
        .await;

    let yaml = "proxy:\n  mode: httpproxy\n  port: 0\nmatches:\n  - always: true\n    headers:\n      X-Baz: \"{{hdr_baz}}\"\n    dataSources:\n      hdr:\n        type: headers\n        options:\n          headersToKeys:\n            Foo: baz\n";
    let config = Config::parse(yaml, &registry()).unwrap();
    let client = reqwest::Client::new();

    let request = Request::builder()
        .method("GET")
        .uri(format!("{}/a", upstream.uri()))
        .header("Foo", "bar")
        .body(Body::empty())
        .unwrap();

    let response = handle_request(&config, &client, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// `preserveHeaders`: a rule-produced value for a preserved header is
/// accepted alongside pre-existing client values (the exact merge
/// order, client values first and produced appended, is covered at the
/// unit level in `proxy::forward`'s `merge_headers` tests; this proves
/// the full pipeline reaches the upstream without rejecting a request
/// that carries a duplicate, preserved header).
#[tokio::test]
async fn preserve_headers_request_with_duplicate_header_reaches_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let yaml = "proxy:\n  mode: httpproxy\n  port: 0\n  preserveHeaders:\n    - client\nmatches:\n  - always: true\n    headers:\n      Client: \"p1\"\n";
    let config = Config::parse(yaml, &registry()).unwrap();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.append("client", "c1".parse().unwrap());
    headers.append("client", "c2".parse().unwrap());
    let mut request = Request::builder()
        .method("GET")
        .uri(format!("{}/a", upstream.uri()))
        .body(Body::empty())
        .unwrap();
    *request.headers_mut() = headers;

    let response = handle_request(&config, &client, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// An upstream 5xx is surfaced as a 504; the client body depends on
/// `exposeErrorsToClient`.
#[tokio::test]
async fn upstream_5xx_maps_to_504() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("bang"))
        .mount(&upstream)
        .await;

    let yaml = "proxy:\n  mode: httpproxy\n  port: 0\nmatches: []\n";
    let config = Config::parse(yaml, &registry()).unwrap();
    let client = reqwest::Client::new();

    let request = Request::builder()
        .method("GET")
        .uri(format!("{}/a", upstream.uri()))
        .body(Body::empty())
        .unwrap();

    let err = handle_request(&config, &client, request).await.unwrap_err();
    assert_eq!(err.http_status(), 504);
    assert!(err.to_string().contains("bang"));
}

/// A request that matches no rule is forwarded unchanged: absence of
/// a match is not an error.
#[tokio::test]
async fn no_match_forwards_request_without_injected_headers() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/untouched"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let yaml = "proxy:\n  mode: httpproxy\n  port: 0\nmatches:\n  - hosts:\n      - nevermatches.example\n    headers:\n      X-Injected: \"yes\"\n";
    let config = Config::parse(yaml, &registry()).unwrap();
    let client = reqwest::Client::new();

    let request = Request::builder()
        .method("GET")
        .uri(format!("{}/untouched", upstream.uri()))
        .body(Body::empty())
        .unwrap();

    let response = handle_request(&config, &client, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// `errorIfMissing` turns an empty/absent produced header into a fatal
/// 500 for the request.
#[tokio::test]
async fn error_if_missing_header_fails_the_request_before_forwarding() {
    let upstream = MockServer::start().await;
    // No mock mounted: if the proxy ever reached the upstream, the
    // unmatched request would make wiremock panic, catching a
    // regression where enforcement is skipped.

    let yaml = "proxy:\n  mode: httpproxy\n  port: 0\nmatches:\n  - always: true\n    errorIfMissing:\n      - x-required\n    headers:\n      X-Required: \"{{hdr_baz}}\"\n    dataSources:\n      hdr:\n        type: headers\n        options:\n          headersToKeys:\n            Foo: baz\n";
    let config = Config::parse(yaml, &registry()).unwrap();
    let client = reqwest::Client::new();

    let request = Request::builder()
        .method("GET")
        .uri(format!("{}/a", upstream.uri()))
        .body(Body::empty())
        .unwrap();

    let err = handle_request(&config, &client, request).await.unwrap_err();
    assert_eq!(err.http_status(), 500);
}
