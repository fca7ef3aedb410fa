//! Real HTTP round-trips against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use deployer::core::errors::ProbeError;
use deployer::dispatch::{DispatchRequest, Dispatcher, ProxyRoute, RouteBinding};
use deployer::endpoint::ProxyTarget;
use deployer::io::config::HttpConfig;
use deployer::io::http::{HttpClient, HttpError, HttpRequest, Method, ReqwestClient};
use deployer::route_test::RouteTester;
use deployer::test_support::{TestSite, json_endpoint};
use httpmock::prelude::*;

fn client() -> ReqwestClient {
    ReqwestClient::new(&HttpConfig::default()).expect("client")
}

#[test]
fn get_returns_status_headers_and_body() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/.well-known/ai.json")
            .header("cache-control", "no-cache");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"v":1}"#);
    });

    let response = client()
        .send(
            &HttpRequest::get(server.url("/.well-known/ai.json"), Duration::from_secs(2))
                .with_header("cache-control", "no-cache"),
        )
        .expect("response");

    mock.assert();
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("application/json"));
    assert_eq!(response.body, br#"{"v":1}"#);
}

#[test]
fn non_success_status_is_not_an_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/missing");
        then.status(404).body("not found");
    });

    let response = client()
        .send(&HttpRequest::get(server.url("/missing"), Duration::from_secs(2)))
        .expect("response");
    assert_eq!(response.status, 404);
}

#[test]
fn slow_response_times_out() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/slow");
        then.status(200).delay(Duration::from_millis(1500)).body("late");
    });

    let err = client()
        .send(&HttpRequest::get(server.url("/slow"), Duration::from_millis(200)))
        .unwrap_err();
    assert_eq!(err, HttpError::Timeout(Duration::from_millis(200)));
}

#[test]
fn refused_connection_is_a_connect_error() {
    let err = client()
        .send(&HttpRequest::get("http://127.0.0.1:1/", Duration::from_secs(1)))
        .unwrap_err();
    assert!(matches!(err, HttpError::Connect(_)), "{err:?}");
}

#[test]
fn proxy_route_forwards_method_query_body_and_auth() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat")
            .query_param("stream", "false")
            .header("authorization", "Bearer token")
            .body(r#"{"q":"hi"}"#);
        then.status(201)
            .header("content-type", "application/json")
            .body(r#"{"a":"hello"}"#);
    });

    let dispatcher = Dispatcher::new(Arc::new(client()));
    dispatcher.bind(
        "/api/chat",
        RouteBinding::Proxy(ProxyRoute {
            target: ProxyTarget {
                upstream: server.url("/v1/chat"),
                timeout: Duration::from_secs(2),
                allow_origin: "https://example.org".to_string(),
            },
            methods: vec![Method::Get, Method::Post],
        }),
    );
    let request = DispatchRequest {
        method: "POST".to_string(),
        path: "/api/chat".to_string(),
        query: Some("stream=false".to_string()),
        headers: vec![
            ("Authorization".to_string(), "Bearer token".to_string()),
            ("Cookie".to_string(), "session=secret".to_string()),
        ],
        body: br#"{"q":"hi"}"#.to_vec(),
    };

    let response = dispatcher.dispatch(&request).expect("handled");

    mock.assert();
    assert_eq!(response.status, 201);
    assert_eq!(response.body, br#"{"a":"hello"}"#);
    assert_eq!(
        response.header("access-control-allow-origin"),
        Some("https://example.org")
    );
}

#[test]
fn foreign_handler_is_not_mistaken_for_the_probe_route() {
    let server = MockServer::start();
    // A catch-all handler that happens to answer with the right bytes.
    server.mock(|when, then| {
        when.method(GET).path("/discovery.json");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"v":1}"#);
    });

    let mut site = TestSite::new();
    site.site.base_url = server.base_url();
    let endpoint = json_endpoint("/discovery.json", r#"{"v":1}"#);
    let content = endpoint.generate().expect("content");
    let http = client();

    let report = RouteTester::new(&http, &site.site, &site.dispatcher, Duration::from_secs(2))
        .test(&endpoint, &content);

    assert!(report.static_file.success);
    assert!(!report.dynamic_route.success);
    assert_eq!(report.dynamic_route.error, Some(ProbeError::ForeignHandler));
    assert!(site.dispatcher.routes().is_empty());
    assert!(!site.root().join("discovery.json").exists());
}
