//! Relay of authenticated requests to the upstream service.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::Response,
};
use reqwest::{redirect::Policy, Client};
use std::{future::Future, net::SocketAddr, pin::Pin};
use tracing::{debug, instrument};
use url::Url;

use super::error::Error;

/// Header carrying the session JSON to the upstream.
pub const STATE_HEADER: HeaderName = HeaderName::from_static("travis-state");

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_SERVER: HeaderName = HeaderName::from_static("x-forwarded-server");

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub trait Forwarder: Send + Sync {
    fn forward(
        &self,
        request: Request,
        state: HeaderValue,
    ) -> Pin<Box<dyn Future<Output = Result<Response, Error>> + Send + '_>>;
}

/// Forwards over HTTP with `reqwest`, streaming both bodies.
#[derive(Clone, Debug)]
pub struct HttpForwarder {
    client: Client,
    upstream: Url,
}

impl HttpForwarder {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(upstream: Url) -> Result<Self, reqwest::Error> {
        // Redirects belong to the browser, not to the gateway.
        let client = Client::builder().redirect(Policy::none()).build()?;
        Ok(Self { client, upstream })
    }

    /// Upstream scheme and authority with the request's path and query.
    #[must_use]
    pub fn target(&self, request: &Request) -> Url {
        let mut url = self.upstream.clone();
        url.set_path(request.uri().path());
        url.set_query(request.uri().query());
        url
    }

    #[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
    async fn relay(&self, request: Request, state: HeaderValue) -> Result<Response, Error> {
        let url = self.target(&request);
        let client = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let (parts, body) = request.into_parts();

        let mut headers = strip_hop_by_hop(parts.headers);
        headers.remove(&STATE_HEADER);
        headers.insert(STATE_HEADER, state);

        if let Some(host) = headers.remove(header::HOST) {
            headers.insert(X_FORWARDED_SERVER, host.clone());
            headers.insert(X_FORWARDED_HOST, host);
        }
        if !headers.contains_key(&X_FORWARDED_PROTO) {
            let proto = if parts.uri.scheme_str() == Some("https") {
                "https"
            } else {
                "http"
            };
            headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
        }
        if let Some(ip) = client {
            let chain = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{prior}, {ip}"),
                None => ip.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&chain) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        debug!("forwarding to {}", url);

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(Error::Forward)?;

        let mut response = Response::builder().status(upstream.status());
        if let Some(response_headers) = response.headers_mut() {
            *response_headers = strip_hop_by_hop(upstream.headers().clone());
        }

        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|_| Error::Body)
    }
}

impl Forwarder for HttpForwarder {
    fn forward(
        &self,
        request: Request,
        state: HeaderValue,
    ) -> Pin<Box<dyn Future<Output = Result<Response, Error>> + Send + '_>> {
        Box::pin(self.relay(request, state))
    }
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    // Headers named in Connection are hop-by-hop as well.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::{body::to_bytes, http::StatusCode};
    use std::net::TcpListener;
    use wiremock::matchers::{body_string, header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    #[test]
    fn target_rewrites_scheme_and_host_only() -> Result<()> {
        let forwarder = HttpForwarder::new(Url::parse("http://127.0.0.1:8899/ignored")?)?;
        let request = Request::builder()
            .uri("https://sso.example.com/builds/1?page=2")
            .body(Body::empty())?;
        assert_eq!(
            forwarder.target(&request).as_str(),
            "http://127.0.0.1:8899/builds/1?page=2"
        );
        Ok(())
    }

    #[test]
    fn strip_hop_by_hop_removes_connection_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-private"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        let headers = strip_hop_by_hop(headers);
        assert!(!headers.contains_key(header::CONNECTION));
        assert!(!headers.contains_key("x-private"));
        assert!(!headers.contains_key(header::UPGRADE));
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[tokio::test]
    async fn forward_replaces_client_state_header() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/builds"))
            .and(query_param("page", "2"))
            .and(header_is("travis-state", "{\"token\":\"T\"}"))
            .and(body_string("payload"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-upstream", "yes")
                    .set_body_string("created"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = HttpForwarder::new(Url::parse(&server.uri())?)?;
        let request = Request::builder()
            .method("POST")
            .uri("/builds?page=2")
            .header(header::HOST, "sso.example.com")
            .header("travis-state", "{\"token\":\"forged\"}")
            .body(Body::from("payload"))?;

        let response = forwarder
            .forward(request, HeaderValue::from_static("{\"token\":\"T\"}"))
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response
                .headers()
                .get("x-upstream")
                .and_then(|v| v.to_str().ok()),
            Some("yes")
        );

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&body[..], b"created");
        Ok(())
    }

    #[tokio::test]
    async fn forward_does_not_follow_redirects() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
            .mount(&server)
            .await;

        let forwarder = HttpForwarder::new(Url::parse(&server.uri())?)?;
        let request = Request::builder().uri("/old").body(Body::empty())?;
        let response = forwarder
            .forward(request, HeaderValue::from_static("{}"))
            .await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn forward_streams_large_bodies() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        const CHUNK: usize = 64 * 1024;
        const CHUNKS: usize = 48;

        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/artifacts"))
            .and(|request: &wiremock::Request| {
                request.body.len() == CHUNK * CHUNKS && request.body.iter().all(|b| *b == b'x')
            })
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let chunks = (0..CHUNKS).map(|_| Ok::<_, std::io::Error>(vec![b'x'; CHUNK]));
        let request = Request::builder()
            .method("PUT")
            .uri("/artifacts")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from_stream(futures::stream::iter(chunks)))?;

        let forwarder = HttpForwarder::new(Url::parse(&server.uri())?)?;
        let response = forwarder
            .forward(request, HeaderValue::from_static("{}"))
            .await?;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn forward_appends_client_address() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(|request: &wiremock::Request| {
                request
                    .headers
                    .get("x-forwarded-for")
                    .and_then(|value| value.to_str().ok())
                    == Some("10.0.0.1, 192.0.2.7")
            })
            .and(header_is("x-forwarded-host", "sso.example.com"))
            .and(header_is("x-forwarded-server", "sso.example.com"))
            .and(header_is("x-forwarded-proto", "http"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = Request::builder()
            .uri("/")
            .header(header::HOST, "sso.example.com")
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::empty())?;
        let peer: SocketAddr = "192.0.2.7:51234".parse()?;
        request.extensions_mut().insert(ConnectInfo(peer));

        let forwarder = HttpForwarder::new(Url::parse(&server.uri())?)?;
        let response = forwarder
            .forward(request, HeaderValue::from_static("{}"))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }
}
