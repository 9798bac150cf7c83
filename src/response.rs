//! A completed exchange.

use std::fmt;

use http::header::{CONTENT_LENGTH, CONTENT_RANGE, ETAG, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode, Version};

use crate::parser::ReasonPhrase;
use crate::Error;

/// Status, reason, headers and buffered body of one completed exchange.
///
/// The body is read off the wire in full before the view is handed to a
/// continuation, so [`ResponseView::body()`] returns the same bytes every
/// time it is called.
#[derive(Clone)]
pub struct ResponseView {
    status: StatusCode,
    reason: String,
    version: Version,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseView {
    pub(crate) fn new(response: Response<()>, body: Vec<u8>) -> Self {
        let (parts, _) = response.into_parts();

        let reason = parts
            .extensions
            .get::<ReasonPhrase>()
            .map(|r| r.0.clone())
            .unwrap_or_default();

        ResponseView {
            status: parts.status,
            reason,
            version: parts.version,
            headers: parts.headers,
            body,
        }
    }

    /// Construct a view from loose parts.
    ///
    /// Useful for transports that don't speak HTTP/1.1 themselves, and for
    /// stubbing responses.
    pub fn from_parts(
        status: u16,
        reason: &str,
        headers: &[(&str, &str)],
        body: impl Into<Vec<u8>>,
    ) -> Result<Self, Error> {
        let status = StatusCode::from_u16(status)
            .map_err(|_| Error::HttpParseFail(format!("invalid status: {}", status)))?;

        let mut map = HeaderMap::new();
        for (k, v) in headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| Error::BadHeader(e.to_string()))?;
            let value = HeaderValue::from_str(v).map_err(|e| Error::BadHeader(e.to_string()))?;
            map.append(name, value);
        }

        Ok(ResponseView {
            status,
            reason: reason.to_string(),
            version: Version::HTTP_11,
            headers: map,
            body: body.into(),
        })
    }

    /// Numeric status code.
    pub fn status(&self) -> u16 {
        self.status.as_u16()
    }

    /// Status code as [`StatusCode`].
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase as sent by the server.
    ///
    /// Falls back on the canonical reason when the server sent none.
    pub fn reason(&self) -> &str {
        if self.reason.is_empty() {
            self.status.canonical_reason().unwrap_or_default()
        } else {
            &self.reason
        }
    }

    /// HTTP version of the response.
    pub fn version(&self) -> Version {
        self.version
    }

    /// First value of header `name`, or `default`.
    ///
    /// Lookup is case-insensitive. Values that are not visible ascii count
    /// as missing.
    pub fn header<'a>(&'a self, name: &str, default: Option<&'a str>) -> Option<&'a str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .or(default)
    }

    /// All headers as `(name, value)` pairs, names in lowercase.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter_map(|(k, v)| Some((k.as_str(), v.to_str().ok()?)))
    }

    /// The header map.
    pub fn header_map(&self) -> &HeaderMap {
        &self.headers
    }

    /// The full response body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the view, keeping only the body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Parsed `content-length` header.
    pub fn content_length(&self) -> Option<u64> {
        self.header(CONTENT_LENGTH.as_str(), None)?.trim().parse().ok()
    }

    /// `etag` header, quotes included.
    pub fn etag(&self) -> Option<&str> {
        self.header(ETAG.as_str(), None)
    }

    /// `location` header.
    pub fn location(&self) -> Option<&str> {
        self.header(LOCATION.as_str(), None)
    }

    /// User metadata headers starting with `prefix`, with the prefix removed.
    ///
    /// `metadata("x-amz-meta-")` on a response carrying
    /// `x-amz-meta-color: red` yields `("color", "red")`.
    pub fn metadata<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.headers().filter_map(move |(k, v)| {
            let key = k.get(..prefix.len())?;
            if key.eq_ignore_ascii_case(prefix) {
                Some((&k[prefix.len()..], v))
            } else {
                None
            }
        })
    }

    /// Size of the whole object.
    ///
    /// The total from `content-range: bytes 0-9/1234` when present, else
    /// `content-length`, else 0.
    pub fn object_size(&self) -> u64 {
        let total = self
            .header(CONTENT_RANGE.as_str(), None)
            .and_then(|v| v.rsplit_once('/'))
            .and_then(|(_, total)| total.trim().parse().ok());

        total.or_else(|| self.content_length()).unwrap_or(0)
    }

    /// The first `max` bytes of the body as lossy utf-8, for diagnostics.
    pub fn body_snippet(&self, max: usize) -> String {
        let end = self.body.len().min(max);
        String::from_utf8_lossy(&self.body[..end]).into_owned()
    }
}

impl fmt::Debug for ResponseView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseView")
            .field("status", &self.status.as_u16())
            .field("reason", &self.reason())
            .field("headers", &self.headers.len())
            .field("body", &self.body.len())
            .finish()
    }
}
