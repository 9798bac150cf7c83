use std::fmt;
use std::io;

/// Error type for deferred-conn
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum Error {
    BadHeader(String),
    BadMethod(String),
    BadTarget(String),
    OutputOverflow,
    ChunkLenNotAscii,
    ChunkLenNotANumber,
    ChunkExpectedCrLf,
    BodyContentAfterFinish,
    BodyLargerThanContentLength,
    SourceSizeMismatch { expected: u64, actual: u64 },
    BadContentLengthHeader,
    HttpParseFail(String),
    HttpParseTooManyHeaders,
    ConnectionClosed,
    Timeout,
    Io(io::ErrorKind, String),
    Tls(String),
    TlsUnavailable,
}

impl From<httparse::Error> for Error {
    fn from(value: httparse::Error) -> Self {
        Error::HttpParseFail(value.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        if value.kind() == io::ErrorKind::TimedOut {
            return Error::Timeout;
        }
        Error::Io(value.kind(), value.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadHeader(v) => write!(f, "bad header: {}", v),
            Error::BadMethod(v) => write!(f, "bad method: {}", v),
            Error::BadTarget(v) => write!(f, "bad request target: {}", v),
            Error::OutputOverflow => write!(f, "output too small to write output"),
            Error::ChunkLenNotAscii => write!(f, "chunk length is not ascii"),
            Error::ChunkLenNotANumber => write!(f, "chunk length cannot be read as a number"),
            Error::ChunkExpectedCrLf => write!(f, "chunk expected crlf as next character"),
            Error::BodyContentAfterFinish => {
                write!(f, "attempt to stream body after sending finish (&[])")
            }
            Error::BodyLargerThanContentLength => {
                write!(f, "attempt to write larger body than content-length")
            }
            Error::SourceSizeMismatch { expected, actual } => write!(
                f,
                "source produced {} bytes, expected {}",
                actual, expected
            ),
            Error::BadContentLengthHeader => write!(f, "content-length header not a number"),
            Error::HttpParseFail(v) => write!(f, "http parse fail: {}", v),
            Error::HttpParseTooManyHeaders => write!(f, "http parse resulted in too many headers"),
            Error::ConnectionClosed => write!(f, "connection closed before response was complete"),
            Error::Timeout => write!(f, "request timed out"),
            Error::Io(kind, v) => write!(f, "io error ({:?}): {}", kind, v),
            Error::Tls(v) => write!(f, "tls error: {}", v),
            Error::TlsUnavailable => {
                write!(f, "https requested but tls support is not compiled in")
            }
        }
    }
}
