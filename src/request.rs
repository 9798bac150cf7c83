//! Piecewise request construction with deferred commit.
//!
//! [`RequestFacade`] mimics a blocking connection object: `put_request`,
//! `put_header`, `end_headers`, `send`, then ask for the response. Nothing
//! touches the network until [`RequestFacade::fetch_response()`] consumes the
//! facade and hands an immutable [`PendingRequest`] to the [`Transport`].

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use http::uri::Scheme;
use http::{HeaderName, HeaderValue, Method};

use crate::response::ResponseView;
use crate::transport::Transport;
use crate::Error;

/// Default connect/request timeout for a single exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Where a request is sent: scheme, host and optional explicit port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    scheme: Scheme,
    host: String,
    port: Option<u16>,
}

impl Target {
    /// Plain `http` target.
    pub fn http(host: impl Into<String>) -> Self {
        Target {
            scheme: Scheme::HTTP,
            host: host.into(),
            port: None,
        }
    }

    /// `https` target.
    pub fn https(host: impl Into<String>) -> Self {
        Target {
            scheme: Scheme::HTTPS,
            host: host.into(),
            port: None,
        }
    }

    /// Pick `http` or `https` from a flag.
    pub fn new(secure: bool, host: impl Into<String>) -> Self {
        if secure {
            Self::https(host)
        } else {
            Self::http(host)
        }
    }

    /// Use an explicit port instead of the scheme default.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Whether the scheme is `https`.
    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }

    /// The scheme.
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Host name without port.
    pub fn host(&self) -> &str {
        &self.host
    }

    fn default_port(&self) -> u16 {
        if self.is_secure() {
            443
        } else {
            80
        }
    }

    /// Port to connect to.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.default_port())
    }

    /// Value for the `host` header. The port is only included when it
    /// differs from the scheme default.
    pub fn host_header(&self) -> String {
        match self.port {
            Some(p) if p != self.default_port() => format!("{}:{}", self.host, p),
            _ => self.host.clone(),
        }
    }

    /// Full url for `path`, used for logging.
    pub fn url(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.host_header(), path)
    }
}

/// Request body.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// Body of known length, sent with `content-length`.
    Bytes(Vec<u8>),
    /// Body already framed as `transfer-encoding: chunked`, including the
    /// terminating zero chunk. Sent verbatim.
    Framed(Vec<u8>),
}

impl Body {
    /// Tell if there is no body.
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Bytes(v) | Body::Framed(v) => v.is_empty(),
        }
    }

    /// Bytes as they go on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Empty => &[],
            Body::Bytes(v) | Body::Framed(v) => v,
        }
    }

    /// Tell if the body is chunk framed.
    pub fn is_framed(&self) -> bool {
        matches!(self, Body::Framed(_))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => write!(f, "Empty"),
            Body::Bytes(v) => write!(f, "Bytes({})", v.len()),
            Body::Framed(v) => write!(f, "Framed({})", v.len()),
        }
    }
}

/// An immutable request, ready for exactly one exchange.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    method: Method,
    target: Target,
    path: String,
    headers: Vec<(String, String)>,
    body: Body,
    timeout: Duration,
}

impl PendingRequest {
    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Path including any query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Headers in insertion order, duplicates included.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First header value for `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Request body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Connect/request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Full url, for logging.
    pub fn url(&self) -> String {
        self.target.url(&self.path)
    }
}

/// Accumulates a request one piece at a time and commits it once.
pub struct RequestFacade {
    transport: Rc<dyn Transport>,
    target: Target,
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Body,
    timeout: Duration,
}

impl RequestFacade {
    /// New facade for `target`, defaulting to `GET /`.
    pub fn new(transport: Rc<dyn Transport>, target: Target) -> Self {
        RequestFacade {
            transport,
            target,
            method: "GET".to_string(),
            path: "/".to_string(),
            headers: Vec::new(),
            body: Body::Empty,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the connect/request timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Set method and path.
    pub fn put_request(&mut self, method: &str, path: &str) {
        self.method = method.to_string();
        self.path = path.to_string();
    }

    /// Append a header.
    ///
    /// Headers are never replaced. Adding the same name twice sends two
    /// header lines, in the order they were added.
    pub fn put_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Marks the end of headers. Has no effect.
    pub fn end_headers(&mut self) {}

    /// Set the request body. The last call wins, an empty `data` clears it.
    pub fn send(&mut self, data: &[u8]) {
        self.send_vec(data.to_vec());
    }

    /// Like [`RequestFacade::send()`], taking ownership of the buffer.
    pub fn send_vec(&mut self, data: Vec<u8>) {
        self.body = if data.is_empty() {
            Body::Empty
        } else {
            Body::Bytes(data)
        };
    }

    /// Set an already chunk framed body. The last call wins.
    pub fn send_framed(&mut self, framed: Vec<u8>) {
        self.body = Body::Framed(framed);
    }

    /// Set everything at once.
    ///
    /// `body` replaces the current body when given. `headers` are appended.
    pub fn request(
        &mut self,
        method: &str,
        path: &str,
        body: Option<&[u8]>,
        headers: &[(&str, &str)],
    ) {
        self.put_request(method, path);
        if let Some(body) = body {
            self.send(body);
        }
        for (k, v) in headers {
            self.put_header(*k, *v);
        }
    }

    /// Kept for call-shape compatibility. Has no effect.
    pub fn set_debuglevel(&mut self, _level: u32) {}

    /// Kept for call-shape compatibility. Connecting happens on fetch.
    pub fn connect(&mut self) {}

    /// Kept for call-shape compatibility. Connections close after each exchange.
    pub fn close(&mut self) {}

    /// The configured method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The configured path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The target this facade sends to.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Headers in insertion order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The current body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The transport this facade commits to.
    pub fn transport(&self) -> &Rc<dyn Transport> {
        &self.transport
    }

    fn validate(&self) -> Result<Method, Error> {
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|_| Error::BadMethod(self.method.clone()))?;

        let path_ok = (self.path.starts_with('/') || self.path == "*")
            && !self.path.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control());
        if !path_ok {
            return Err(Error::BadTarget(self.path.clone()));
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::BadHeader(format!("invalid name: {:?}", name)))?;
            HeaderValue::from_str(value)
                .map_err(|_| Error::BadHeader(format!("invalid value for {}", name)))?;
        }

        Ok(method)
    }

    /// Validate and freeze a copy of the accumulated state.
    pub fn to_pending(&self) -> Result<PendingRequest, Error> {
        Ok(PendingRequest {
            method: self.validate()?,
            target: self.target.clone(),
            path: self.path.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            timeout: self.timeout,
        })
    }

    /// Validate and freeze the accumulated state, moving it.
    fn into_pending(self) -> Result<PendingRequest, Error> {
        Ok(PendingRequest {
            method: self.validate()?,
            target: self.target,
            path: self.path,
            headers: self.headers,
            body: self.body,
            timeout: self.timeout,
        })
    }

    /// Commit the request and deliver the response to `continuation`.
    ///
    /// The continuation runs exactly once, from the event loop, and never
    /// before this function returns. That includes local failures such as an
    /// invalid header.
    pub fn fetch_response<F>(self, continuation: F)
    where
        F: FnOnce(Result<ResponseView, Error>) + 'static,
    {
        let transport = self.transport.clone();
        let pending = self.into_pending();

        match pending {
            Ok(request) => {
                debug!("Commit {} {}", request.method(), request.url());
                transport.fetch(request, Box::new(continuation));
            }
            Err(e) => {
                debug!("Request rejected before send: {}", e);
                transport.schedule(Box::new(move || continuation(Err(e))));
            }
        }
    }
}

impl fmt::Debug for RequestFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFacade")
            .field("method", &self.method)
            .field("url", &self.target.url(&self.path))
            .field("headers", &self.headers.len())
            .field("body", &self.body)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::ScriptedTransport;

    fn facade() -> RequestFacade {
        let transport = Rc::new(ScriptedTransport::new());
        RequestFacade::new(transport, Target::http("s3.test"))
    }

    #[test]
    fn headers_keep_order_and_duplicates() {
        let mut req = facade();
        req.put_request("PUT", "/bucket/key");
        req.put_header("x-amz-meta-a", "1");
        req.put_header("Content-Type", "text/plain");
        req.put_header("x-amz-meta-a", "2");
        req.end_headers();

        let pending = req.to_pending().unwrap();
        let headers: Vec<_> = pending.headers().collect();
        assert_eq!(
            headers,
            vec![
                ("x-amz-meta-a", "1"),
                ("Content-Type", "text/plain"),
                ("x-amz-meta-a", "2")
            ]
        );
        assert_eq!(pending.header("X-AMZ-META-A"), Some("1"));
        assert_eq!(pending.method(), Method::PUT);
    }

    #[test]
    fn end_headers_is_valid_anywhere() {
        let mut req = facade();
        req.end_headers();
        req.put_request("GET", "/");
        req.end_headers();
        req.put_header("a", "b");
        req.end_headers();
        req.end_headers();
        assert!(req.to_pending().is_ok());
    }

    #[test]
    fn last_body_write_wins() {
        let mut req = facade();
        req.send(b"first");
        req.send(b"second");
        assert_eq!(req.body(), &Body::Bytes(b"second".to_vec()));

        req.send(b"");
        assert!(req.body().is_empty());

        req.send_framed(b"0\r\n\r\n".to_vec());
        assert!(req.body().is_framed());
    }

    #[test]
    fn send_vec_hands_over_buffer() {
        let mut req = facade();
        let data = vec![7_u8; 4096];
        let ptr = data.as_ptr();

        req.send_vec(data);
        let Body::Bytes(held) = req.body() else {
            panic!("Expected bytes");
        };
        assert_eq!(held.as_ptr(), ptr);

        req.send_vec(Vec::new());
        assert!(req.body().is_empty());
    }

    /// Records where the committed body lives.
    struct BodyAddress(std::cell::Cell<usize>);

    impl Transport for BodyAddress {
        fn fetch(&self, request: PendingRequest, _done: crate::transport::Completion) {
            self.0.set(request.body().as_bytes().as_ptr() as usize);
        }

        fn schedule(&self, _task: Box<dyn FnOnce()>) {}
    }

    #[test]
    fn fetch_moves_body_into_request() {
        let transport = Rc::new(BodyAddress(std::cell::Cell::new(0)));
        let mut req = RequestFacade::new(transport.clone(), Target::http("s3.test"));
        req.put_request("PUT", "/b/k");

        let data = vec![1_u8; 1024];
        let ptr = data.as_ptr() as usize;
        req.send_vec(data);
        req.fetch_response(|_| {});

        assert_eq!(transport.0.get(), ptr);
    }

    #[test]
    fn one_shot_request() {
        let mut req = facade();
        req.put_header("x-first", "1");
        req.request("POST", "/q?Action=Send", Some(b"body"), &[("x-second", "2")]);

        let pending = req.to_pending().unwrap();
        assert_eq!(pending.path(), "/q?Action=Send");
        assert_eq!(pending.headers().count(), 2);
        assert_eq!(pending.body().as_bytes(), b"body");
    }

    #[test]
    fn invalid_parts_are_rejected() {
        let mut req = facade();
        req.put_request("GE T", "/");
        assert!(matches!(req.to_pending(), Err(Error::BadMethod(_))));

        let mut req = facade();
        req.put_request("GET", "no-slash");
        assert!(matches!(req.to_pending(), Err(Error::BadTarget(_))));

        let mut req = facade();
        req.put_header("x-evil", "a\r\nInjected: 1");
        assert!(matches!(req.to_pending(), Err(Error::BadHeader(_))));

        let mut req = facade();
        req.put_header("bad name", "v");
        assert!(matches!(req.to_pending(), Err(Error::BadHeader(_))));
    }

    #[test]
    fn target_host_header() {
        assert_eq!(Target::http("a.test").host_header(), "a.test");
        assert_eq!(Target::http("a.test").with_port(80).host_header(), "a.test");
        assert_eq!(Target::https("a.test").with_port(8443).host_header(), "a.test:8443");
        assert_eq!(Target::https("a.test").port(), 443);
        assert_eq!(Target::new(false, "a.test").url("/x"), "http://a.test/x");
    }
}
