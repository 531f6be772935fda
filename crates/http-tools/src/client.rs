//! Outbound HTTP request/response values and the client seam used to send them.
//!
//! Request construction happens elsewhere and never touches the network; the only code that
//! talks to an upstream API is an [`OutboundClient`] implementation.

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A fully formed outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid header '{name}': {reason}")]
pub struct InvalidHeader {
    pub name: String,
    pub reason: String,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Set (replace) a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or value is not a valid HTTP header token.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), InvalidHeader> {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| InvalidHeader {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| InvalidHeader {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        self.headers.insert(header_name, header_value);
        Ok(())
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Append one `key=value` pair to the query string, keeping existing pairs.
    pub fn append_query_pair(&mut self, key: &str, value: &str) {
        self.url.query_pairs_mut().append_pair(key, value);
    }

    #[must_use]
    pub fn body_json(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

/// Raw upstream response: status code and the unparsed body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("request timed out after {0}ms")]
    Timeout(u128),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("response too large: {0}")]
    TooLarge(String),
    #[error("http transport error: {0}")]
    Transport(String),
}

/// The seam between tool invocation and the network.
#[async_trait]
pub trait OutboundClient: Send + Sync {
    /// Send `request`, giving up after `timeout`.
    ///
    /// Any HTTP status is a successful send; only network-level failures are errors.
    async fn send(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, OutboundError>;
}

/// Production client backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
    max_response_bytes: Option<usize>,
}

impl ReqwestClient {
    #[must_use]
    pub fn new(client: reqwest::Client, max_response_bytes: Option<usize>) -> Self {
        Self {
            client,
            max_response_bytes,
        }
    }

    /// Client with a `restbridge-http/<version>` user agent and an optional body size cap.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn with_response_limit(max_response_bytes: Option<usize>) -> Result<Self, OutboundError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("restbridge-http/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OutboundError::Transport(sanitize_reqwest_error(&e)))?;
        Ok(Self::new(client, max_response_bytes))
    }

    async fn read_body_limited(
        &self,
        mut response: reqwest::Response,
        timeout: Duration,
    ) -> Result<Vec<u8>, OutboundError> {
        let Some(max) = self.max_response_bytes else {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| classify_reqwest_error(&e, timeout))?;
            return Ok(bytes.to_vec());
        };

        if let Some(len) = response.content_length()
            && len > max as u64
        {
            return Err(OutboundError::TooLarge(format!("{len} bytes (limit {max})")));
        }

        let mut out: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| classify_reqwest_error(&e, timeout))?
        {
            if out.len().saturating_add(chunk.len()) > max {
                return Err(OutboundError::TooLarge(format!("exceeded {max} bytes")));
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), None)
    }
}

#[async_trait]
impl OutboundClient for ReqwestClient {
    async fn send(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, OutboundError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers)
            .timeout(timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        tracing::debug!(
            method = %request.method,
            url = %redact_url(&request.url),
            "sending upstream request"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e, timeout))?;
        let status = response.status().as_u16();
        let body = self.read_body_limited(response, timeout).await?;
        Ok(HttpResponse { status, body })
    }
}

fn classify_reqwest_error(e: &reqwest::Error, timeout: Duration) -> OutboundError {
    if e.is_timeout() {
        OutboundError::Timeout(timeout.as_millis())
    } else if e.is_connect() {
        OutboundError::Connect(sanitize_reqwest_error(e))
    } else {
        OutboundError::Transport(sanitize_reqwest_error(e))
    }
}

/// Drop credentials, query, and fragment so secrets never reach logs or error payloads.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> (String, tokio::sync::oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .expect("serve");
        });
        (format!("http://{addr}"), tx)
    }

    #[test]
    fn redact_url_strips_query_and_credentials() {
        let url = Url::parse("https://user:pw@api.example.com/v1/items?api_key=secret#frag")
            .expect("url");
        assert_eq!(redact_url(&url), "https://api.example.com/v1/items");
    }

    #[test]
    fn set_header_rejects_invalid_names() {
        let mut req = HttpRequest::new(
            Method::GET,
            Url::parse("http://localhost/").expect("url"),
        );
        assert!(req.set_header("bad header", "x").is_err());
        req.set_header("X-Trace", "abc").expect("valid");
        assert_eq!(req.header("x-trace"), Some("abc"));
    }

    #[test]
    fn append_query_pair_keeps_existing_pairs() {
        let mut req = HttpRequest::new(
            Method::GET,
            Url::parse("http://localhost/items?q=a%20b").expect("url"),
        );
        req.append_query_pair("key", "v&1");
        assert_eq!(req.url.query(), Some("q=a%20b&key=v%261"));
    }

    #[tokio::test]
    async fn reqwest_client_returns_non_success_statuses() {
        let router = Router::new().route(
            "/missing",
            get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }),
        );
        let (base, stop) = serve(router).await;

        let client = ReqwestClient::default();
        let req = HttpRequest::new(
            Method::GET,
            Url::parse(&format!("{base}/missing")).expect("url"),
        );
        let resp = client
            .send(req, Duration::from_secs(5))
            .await
            .expect("send");
        assert_eq!(resp.status, 404);
        assert_eq!(resp.text_lossy(), "nope");
        let _ = stop.send(());
    }

    #[tokio::test]
    async fn reqwest_client_classifies_timeouts() {
        let router = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        );
        let (base, stop) = serve(router).await;

        let client = ReqwestClient::default();
        let req = HttpRequest::new(Method::GET, Url::parse(&format!("{base}/slow")).expect("url"));
        let err = client
            .send(req, Duration::from_millis(100))
            .await
            .expect_err("must time out");
        assert!(matches!(err, OutboundError::Timeout(100)), "{err:?}");
        let _ = stop.send(());
    }

    #[tokio::test]
    async fn reqwest_client_enforces_body_limit() {
        let router = Router::new().route("/big", get(|| async { "x".repeat(64) }));
        let (base, stop) = serve(router).await;

        let client = ReqwestClient::new(reqwest::Client::new(), Some(16));
        let req = HttpRequest::new(Method::GET, Url::parse(&format!("{base}/big")).expect("url"));
        let err = client
            .send(req, Duration::from_secs(5))
            .await
            .expect_err("too large");
        assert!(matches!(err, OutboundError::TooLarge(_)));
        let _ = stop.send(());
    }

    #[tokio::test]
    async fn reqwest_client_reports_connect_failures() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let client = ReqwestClient::default();
        let req = HttpRequest::new(
            Method::GET,
            Url::parse(&format!("http://127.0.0.1:{port}/")).expect("url"),
        );
        let err = client
            .send(req, Duration::from_secs(5))
            .await
            .expect_err("nothing listening");
        assert!(matches!(err, OutboundError::Connect(_)), "{err:?}");
    }
}
