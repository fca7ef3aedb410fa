//! Forwarding for proxy routes.

use tracing::{debug, warn};

use super::{DispatchRequest, DispatchResponse, ProxyRoute, allow_header};
use crate::io::http::{HttpClient, HttpError, HttpRequest, Method};

/// Request headers passed through to the upstream.
const FORWARDED_HEADERS: [&str; 3] = ["content-type", "accept", "authorization"];

/// Answer a proxied request: CORS preflight locally, everything else upstream.
pub fn forward(
    route: &ProxyRoute,
    client: &dyn HttpClient,
    request: &DispatchRequest,
) -> DispatchResponse {
    let target = &route.target;
    if request.method.eq_ignore_ascii_case("OPTIONS") {
        let mut methods = allow_header(&route.methods);
        methods.push_str(", OPTIONS");
        return DispatchResponse::new(204)
            .with_header("access-control-allow-origin", target.allow_origin.clone())
            .with_header("access-control-allow-methods", methods)
            .with_header(
                "access-control-allow-headers",
                "Content-Type, Authorization",
            )
            .with_header("access-control-max-age", "600");
    }

    let Some(method) = request
        .parsed_method()
        .filter(|method| route.methods.contains(method))
    else {
        return DispatchResponse::new(405)
            .with_header("allow", allow_header(&route.methods))
            .with_header("access-control-allow-origin", target.allow_origin.clone());
    };

    let url = match request.query.as_deref() {
        Some(query) if !query.is_empty() => format!("{}?{query}", target.upstream),
        _ => target.upstream.clone(),
    };
    let mut outbound = match method {
        Method::Get => HttpRequest::get(url, target.timeout),
        Method::Post => HttpRequest::post(url, request.body.clone(), target.timeout),
    };
    for name in FORWARDED_HEADERS {
        if let Some(value) = request.header(name) {
            outbound = outbound.with_header(name, value);
        }
    }

    match client.send(&outbound) {
        Ok(upstream) => {
            debug!(path = %request.path, status = upstream.status, "proxied request");
            let mut response = DispatchResponse::new(upstream.status)
                .with_header("access-control-allow-origin", target.allow_origin.clone());
            if let Some(content_type) = upstream.header("content-type") {
                response = response.with_header("content-type", content_type);
            }
            response.with_body(upstream.body)
        }
        Err(HttpError::Timeout(after)) => {
            warn!(path = %request.path, ?after, "upstream timed out");
            DispatchResponse::error_json(504, "upstream timed out")
        }
        Err(err) => {
            warn!(path = %request.path, err = %err, "upstream unreachable");
            DispatchResponse::error_json(502, "upstream unreachable")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::endpoint::ProxyTarget;
    use crate::io::http::HttpResponse;

    struct Recording {
        seen: Mutex<Vec<HttpRequest>>,
        reply: Result<HttpResponse, HttpError>,
    }

    impl HttpClient for Recording {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
            self.seen.lock().expect("lock").push(request.clone());
            self.reply.clone()
        }
    }

    fn route() -> ProxyRoute {
        ProxyRoute {
            target: ProxyTarget {
                upstream: "https://upstream.test/chat".to_string(),
                timeout: Duration::from_secs(5),
                allow_origin: "https://site.test".to_string(),
            },
            methods: vec![Method::Get, Method::Post],
        }
    }

    fn client(reply: Result<HttpResponse, HttpError>) -> Recording {
        Recording {
            seen: Mutex::new(Vec::new()),
            reply,
        }
    }

    #[test]
    fn preflight_is_answered_locally() {
        let upstream = client(Err(HttpError::Other("unused".to_string())));
        let request = DispatchRequest {
            method: "OPTIONS".to_string(),
            ..DispatchRequest::get("/api/chat")
        };
        let response = forward(&route(), &upstream, &request);
        assert_eq!(response.status, 204);
        assert_eq!(
            response.header("access-control-allow-methods"),
            Some("GET, POST, OPTIONS")
        );
        assert!(upstream.seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn post_is_forwarded_with_body_and_query() {
        let upstream = client(Ok(HttpResponse {
            status: 201,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: br#"{"ok":true}"#.to_vec(),
        }));
        let request = DispatchRequest {
            method: "POST".to_string(),
            query: Some("session=1".to_string()),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Cookie".to_string(), "secret".to_string()),
            ],
            body: br#"{"q":"hi"}"#.to_vec(),
            ..DispatchRequest::get("/api/chat")
        };
        let response = forward(&route(), &upstream, &request);
        assert_eq!(response.status, 201);
        assert_eq!(response.body, br#"{"ok":true}"#);
        assert_eq!(
            response.header("access-control-allow-origin"),
            Some("https://site.test")
        );

        let seen = upstream.seen.lock().expect("lock");
        assert_eq!(seen[0].url, "https://upstream.test/chat?session=1");
        assert_eq!(seen[0].body, br#"{"q":"hi"}"#);
        assert!(seen[0].headers.iter().all(|(name, _)| name != "cookie"));
    }

    #[test]
    fn upstream_failures_map_to_gateway_errors() {
        let timeout = client(Err(HttpError::Timeout(Duration::from_secs(5))));
        let response = forward(&route(), &timeout, &DispatchRequest::get("/api/chat"));
        assert_eq!(response.status, 504);

        let refused = client(Err(HttpError::Connect("refused".to_string())));
        let response = forward(&route(), &refused, &DispatchRequest::get("/api/chat"));
        assert_eq!(response.status, 502);
    }

    #[test]
    fn methods_outside_list_are_rejected() {
        let upstream = client(Err(HttpError::Other("unused".to_string())));
        let request = DispatchRequest {
            method: "DELETE".to_string(),
            ..DispatchRequest::get("/api/chat")
        };
        assert_eq!(forward(&route(), &upstream, &request).status, 405);
    }
}
