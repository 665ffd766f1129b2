//! Network access for the worker.
//!
//! The policies only see the `Network` trait, so tests can script every
//! response and failure. `HttpNetwork` is the reqwest-backed implementation
//! used by real hosts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;
use url::{Origin, Url};

use crate::error::NetworkError;
use crate::http::{Request, RequestMode, Response, ResponseType};

/// HTTP request timeout in seconds when the config does not set one.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait Network: Send + Sync {
    /// Fetch a request. Any HTTP status is a successful fetch; only transport
    /// failures are errors.
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// `Network` over a pooled reqwest client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: Origin,
}

impl HttpNetwork {
    /// Create a client whose responses are typed relative to `origin`.
    pub fn new(origin: &Url, timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, origin))
    }

    /// Use an already configured client.
    pub fn with_client(client: Client, origin: &Url) -> Self {
        Self {
            client,
            origin: origin.origin(),
        }
    }

    fn response_type(&self, request: &Request, url: &Url) -> ResponseType {
        if url.origin() == self.origin {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let mut headers = header::HeaderMap::new();
        for (name, value) in &request.headers {
            let name = header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;
            headers.append(name, value);
        }

        let reply = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers)
            .send()
            .await?;

        // Redirects can land on another origin
        let response_type = self.response_type(request, reply.url());
        let status = reply.status().as_u16();
        let headers: Vec<(String, String)> = reply
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = reply.bytes().await?.to_vec();
        debug!(url = %request.url, status = status, bytes = body.len(), "Network response");

        let mut response = Response::new(status, body).with_type(response_type);
        response.headers = headers;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn network() -> HttpNetwork {
        let origin = Url::parse("https://example.github.io").unwrap();
        HttpNetwork::new(&origin, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)).unwrap()
    }

    fn local_network(origin: &Url) -> HttpNetwork {
        let client = Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        HttpNetwork::with_client(client, origin)
    }

    /// Answer a single HTTP request with `reply`. The task yields the raw request head.
    async fn serve_once(reply: String) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&head).into_owned()
        });
        (Url::parse(&format!("http://{}/", addr)).unwrap(), handle)
    }

    fn http_reply(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut reply = format!("HTTP/1.1 {}\r\n", status);
        for (name, value) in headers {
            reply.push_str(&format!("{}: {}\r\n", name, value));
        }
        reply.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n{}", body.len(), body));
        reply
    }

    #[tokio::test]
    async fn test_fetch_carries_headers_status_and_body() {
        let reply = http_reply("200 OK", &[("Content-Type", "text/html")], "<html>shell</html>");
        let (base, server) = serve_once(reply).await;
        let net = local_network(&base);

        let request = Request::navigate(base.join("CashTrail/index.html").unwrap())
            .with_header("X-CashTrail-Version", "cashtrail-v1");
        let response = net.fetch(&request).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.body, b"<html>shell</html>");
        assert_eq!(response.response_type, ResponseType::Basic);

        let head = server.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /cashtrail/index.html http/1.1"), "{}", head);
        assert!(head.contains("x-cashtrail-version: cashtrail-v1"), "{}", head);
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let (base, server) = serve_once(http_reply("500 Internal Server Error", &[], "boom")).await;
        let net = local_network(&base);

        let response = net.fetch(&Request::get(base.clone())).await.unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(response.body, b"boom");
        assert!(!response.is_cacheable());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_redirect_to_other_origin_is_cors() {
        let (cdn, cdn_server) = serve_once(http_reply("200 OK", &[], "lib")).await;
        let target = cdn.join("lib.js").unwrap();
        let redirect = http_reply("302 Found", &[("Location", target.as_str())], "");
        let (base, server) = serve_once(redirect).await;
        let net = local_network(&base);

        let response = net.fetch(&Request::get(base.join("lib.js").unwrap())).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"lib");
        assert_eq!(response.response_type, ResponseType::Cors);
        assert!(!response.is_cacheable());
        server.await.unwrap();
        cdn_server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_host_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        drop(listener);
        let net = local_network(&base);

        let err = net.fetch(&Request::get(base)).await.unwrap_err();
        assert!(matches!(err, NetworkError::Offline(_) | NetworkError::Timeout(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_invalid_header_is_rejected() {
        let net = network();
        let request = Request::get(Url::parse("https://example.github.io/").unwrap())
            .with_header("bad header", "x");
        let err = net.fetch(&request).await.unwrap_err();
        assert!(matches!(err, NetworkError::InvalidRequest(_)));
    }

    #[test]
    fn test_response_type_by_origin() {
        let net = network();
        let same = Url::parse("https://example.github.io/CashTrail/").unwrap();
        let cdn = Url::parse("https://cdn.example.com/lib.js").unwrap();

        assert_eq!(net.response_type(&Request::get(same.clone()), &same), ResponseType::Basic);
        assert_eq!(net.response_type(&Request::get(cdn.clone()), &cdn), ResponseType::Cors);
        let no_cors = Request::get(cdn.clone()).with_mode(RequestMode::NoCors);
        assert_eq!(net.response_type(&no_cors, &cdn), ResponseType::Opaque);
    }

    #[test]
    fn test_port_changes_origin() {
        let net = network();
        let other_port = Url::parse("https://example.github.io:8443/CashTrail/").unwrap();
        assert_eq!(
            net.response_type(&Request::get(other_port.clone()), &other_port),
            ResponseType::Cors
        );
    }
}
