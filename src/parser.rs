use http::{HeaderName, HeaderValue, Response, StatusCode, Version};

use crate::Error;

/// Reason phrase of a parsed status line, kept as a response extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReasonPhrase(pub String);

/// Try to parse a response head (status line and headers).
///
/// Returns `Ok(None)` until `input` holds the full head including the final
/// empty line. `N` is the max number of headers accepted.
pub(crate) fn try_parse_response<const N: usize>(
    input: &[u8],
) -> Result<Option<(usize, Response<()>)>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; N];
    let mut res = httparse::Response::new(&mut headers);

    let input_used = match res.parse(input) {
        Ok(httparse::Status::Complete(v)) => v,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => return Err(Error::HttpParseTooManyHeaders),
        Err(e) => return Err(e.into()),
    };

    let version = match res.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(Error::HttpParseFail("unsupported http version".into())),
    };

    let status = res
        .code
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| Error::HttpParseFail("missing status code".into()))?;

    let mut builder = Response::builder().version(version).status(status);

    for h in res.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| Error::BadHeader(e.to_string()))?;
        let value =
            HeaderValue::from_bytes(h.value).map_err(|e| Error::BadHeader(e.to_string()))?;
        builder = builder.header(name, value);
    }

    let reason = res.reason.unwrap_or_default().to_string();
    builder = builder.extension(ReasonPhrase(reason));

    let response = builder
        .body(())
        .map_err(|e| Error::HttpParseFail(e.to_string()))?;

    Ok(Some((input_used, response)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_partial() {
        let r = try_parse_response::<16>(b"HTTP/1.1 200 OK\r\nContent-Le").unwrap();
        assert!(r.is_none());
    }

    #[test]
    fn parse_complete_with_reason() {
        let input = b"HTTP/1.1 503 Slow Down\r\nRetry-After: 1\r\n\r\nbody";
        let (n, res) = try_parse_response::<16>(input).unwrap().unwrap();
        assert_eq!(n, input.len() - 4);
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.headers().get("retry-after").unwrap(), "1");
        assert_eq!(
            res.extensions().get::<ReasonPhrase>(),
            Some(&ReasonPhrase("Slow Down".into()))
        );
    }

    #[test]
    fn parse_http10() {
        let (_, res) = try_parse_response::<16>(b"HTTP/1.0 404 Not Found\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(res.version(), Version::HTTP_10);
    }

    #[test]
    fn parse_too_many_headers() {
        let mut res = String::from("HTTP/1.1 200 OK\r\n");
        for i in 0..10 {
            res.push_str(&format!("X-Header-{}: value\r\n", i));
        }
        res.push_str("\r\n");

        let err = try_parse_response::<4>(res.as_bytes()).unwrap_err();
        assert_eq!(err, Error::HttpParseTooManyHeaders);
    }

    #[test]
    fn parse_fail() {
        let err = try_parse_response::<4>(b"HTTP/1.1200 OK\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::HttpParseFail(_)));
    }
}
