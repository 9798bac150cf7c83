//! One HTTP/1.1 exchange as a sequence of typed states.
//!
//! ```text
//!  SendRequest ──► SendBody ──► RecvResponse ──► RecvBody ──► Cleanup
//!       │                            ▲    │                      ▲
//!       └────────────────────────────┘    └──────────────────────┘
//! ```
//!
//! The call does no I/O. The transport moves bytes between the socket and
//! `write()`/`try_response()`/`read()` and calls `proceed()` when a state is
//! done.

use std::fmt;
use std::io::Write;
use std::marker::PhantomData;

use http::{Response, StatusCode};

use crate::body::{BodyReader, BodyWriter};
use crate::ext::{HeaderIterExt, MethodExt};
use crate::parser::try_parse_response;
use crate::request::{Body, PendingRequest};
use crate::util::{log_data, Writer};
use crate::Error;

/// Max number of response headers we accept.
const MAX_RESPONSE_HEADERS: usize = 128;

pub(crate) mod state {
    pub(crate) trait Named {
        fn name() -> &'static str;
    }

    macro_rules! call_state {
        ($n:tt) => {
            pub(crate) struct $n(());
            impl Named for $n {
                fn name() -> &'static str {
                    stringify!($n)
                }
            }
        };
    }

    call_state!(SendRequest);
    call_state!(SendBody);
    call_state!(RecvResponse);
    call_state!(RecvBody);
    call_state!(Cleanup);
}
use self::state::*;

pub(crate) struct Call<State> {
    inner: Inner,
    _ph: PhantomData<State>,
}

#[derive(Debug)]
struct Inner {
    request: PendingRequest,
    /// Request headers plus the ones we add (host, body framing, user-agent).
    headers: Vec<(String, String)>,
    phase: RequestPhase,
    writer: BodyWriter,
    /// Amount of the request body consumed so far.
    body_sent: usize,
    reader: Option<BodyReader>,
    status: Option<StatusCode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestPhase {
    SendLine,
    SendHeaders(usize),
    SendBody,
}

impl RequestPhase {
    fn is_prelude(&self) -> bool {
        matches!(self, RequestPhase::SendLine | RequestPhase::SendHeaders(_))
    }
}

impl<S> Call<S> {
    fn wrap(inner: Inner) -> Call<S>
    where
        S: Named,
    {
        let wrapped = Call {
            inner,
            _ph: PhantomData,
        };

        debug!("{:?}", wrapped);

        wrapped
    }
}

// //////////////////////////////////////////////////////////////////////////////////////////// SEND REQUEST

impl Call<SendRequest> {
    /// Start a call for `request`.
    ///
    /// Adds `host` and the body framing header when missing, and `user-agent`
    /// when one is given and the request has none.
    pub fn new(request: PendingRequest, user_agent: Option<&str>) -> Result<Self, Error> {
        let mut headers: Vec<(String, String)> = request
            .headers()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let has_key = |headers: &[(String, String)], key: &str| {
            headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).has_key(key)
        };

        let user_chunked = headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .has("transfer-encoding", "chunked");
        let user_length = request.header("content-length");

        let writer = match request.body() {
            Body::Empty if request.method().need_request_body() => BodyWriter::new_sized(0),
            Body::Empty => BodyWriter::new_none(),
            Body::Bytes(_) if user_chunked => BodyWriter::new_chunked(),
            Body::Bytes(v) => BodyWriter::new_sized(v.len() as u64),
            Body::Framed(_) => BodyWriter::new_chunked(),
        };

        match writer {
            BodyWriter::LengthDelimited(size) => {
                if let Some(v) = user_length {
                    if v.trim().parse::<u64>().ok() != Some(size) {
                        return Err(Error::BadHeader(format!(
                            "content-length {} does not match body of {} bytes",
                            v, size
                        )));
                    }
                }
            }
            BodyWriter::Chunked(_) if user_length.is_some() => {
                return Err(Error::BadHeader(
                    "content-length not allowed with chunked body".into(),
                ));
            }
            _ => {}
        }

        if !has_key(&headers, "host") {
            headers.insert(0, ("host".to_string(), request.target().host_header()));
        }

        if let Some(ua) = user_agent {
            if !has_key(&headers, "user-agent") {
                headers.push(("user-agent".to_string(), ua.to_string()));
            }
        }

        if user_length.is_none() && !user_chunked {
            if let Some((k, v)) = writer.body_header() {
                headers.push((k.to_string(), v));
            }
        }

        let inner = Inner {
            request,
            headers,
            phase: RequestPhase::SendLine,
            writer,
            body_sent: 0,
            reader: None,
            status: None,
        };

        Ok(Call::wrap(inner))
    }

    /// Write the request line and headers to `output`.
    ///
    /// Writes incrementally and can be called repeatedly with a small output
    /// buffer. The buffer must fit the longest header line, or the result is
    /// [`Error::OutputOverflow`].
    pub fn write(&mut self, output: &mut [u8]) -> Result<usize, Error> {
        let mut w = Writer::new(output);

        loop {
            if !try_write_prelude_part(&mut self.inner, &mut w) {
                break;
            }
        }

        let written = w.len();
        if written == 0 && self.inner.phase.is_prelude() {
            return Err(Error::OutputOverflow);
        }

        log_data(&output[..written]);

        Ok(written)
    }

    /// Whether the whole prelude is written.
    pub fn can_proceed(&self) -> bool {
        !self.inner.phase.is_prelude()
    }

    /// Returns `None` until [`Call::can_proceed()`] is `true`.
    pub fn proceed(self) -> Option<SendRequestResult> {
        if !self.can_proceed() {
            return None;
        }

        Some(if self.inner.writer.has_body() {
            SendRequestResult::SendBody(Call::wrap(self.inner))
        } else {
            SendRequestResult::RecvResponse(Call::wrap(self.inner))
        })
    }
}

pub(crate) enum SendRequestResult {
    SendBody(Call<SendBody>),
    RecvResponse(Call<RecvResponse>),
}

fn try_write_prelude_part(inner: &mut Inner, w: &mut Writer) -> bool {
    match inner.phase {
        RequestPhase::SendLine => {
            let method = inner.request.method();
            let path = inner.request.path();
            let ok = w.try_write(|w| write!(w, "{} {} HTTP/1.1\r\n", method, path));
            if ok {
                inner.phase = RequestPhase::SendHeaders(0);
            }
            ok
        }
        RequestPhase::SendHeaders(index) => {
            if let Some((name, value)) = inner.headers.get(index) {
                let ok = w.try_write(|w| write!(w, "{}: {}\r\n", name, value));
                if ok {
                    inner.phase = RequestPhase::SendHeaders(index + 1);
                }
                ok
            } else {
                let ok = w.write_bytes(b"\r\n");
                if ok {
                    inner.phase = RequestPhase::SendBody;
                }
                ok
            }
        }
        RequestPhase::SendBody => false,
    }
}

// //////////////////////////////////////////////////////////////////////////////////////////// SEND BODY

impl Call<SendBody> {
    /// Write as much of the request body as fits in `output`.
    ///
    /// Returns the output used. Framed bodies are copied verbatim, others go
    /// through the body writer.
    pub fn write(&mut self, output: &mut [u8]) -> Result<usize, Error> {
        let inner = &mut self.inner;
        let mut w = Writer::new(output);
        let body = inner.request.body();
        let data = body.as_bytes();

        if body.is_framed() {
            let rest = &data[inner.body_sent..];
            let n = rest.len().min(w.available());
            w.write_bytes(&rest[..n]);
            inner.body_sent += n;
            return Ok(w.len());
        }

        loop {
            let rest = &data[inner.body_sent..];

            if rest.is_empty() {
                if inner.writer.is_chunked() && !inner.writer.is_ended() {
                    inner.writer.write(&[], &mut w);
                }
                break;
            }

            inner.writer.check_input(rest)?;
            let n = inner.writer.write(rest, &mut w);
            if n == 0 {
                break;
            }
            inner.body_sent += n;
        }

        if w.len() == 0 && !self.can_proceed() {
            return Err(Error::OutputOverflow);
        }

        Ok(w.len())
    }

    /// Whether the whole body is written.
    pub fn can_proceed(&self) -> bool {
        let body = self.inner.request.body();
        if body.is_framed() {
            self.inner.body_sent == body.as_bytes().len()
        } else {
            self.inner.writer.is_ended()
        }
    }

    /// Returns `None` until [`Call::can_proceed()`] is `true`.
    pub fn proceed(self) -> Option<Call<RecvResponse>> {
        if !self.can_proceed() {
            return None;
        }

        Some(Call::wrap(self.inner))
    }

    /// Stop sending the body and go on to read the response.
    ///
    /// For a server that answers and closes before the body is complete.
    /// The connection can't be reused afterwards.
    pub fn abandon(self) -> Call<RecvResponse> {
        debug!("Abandon request body after {} bytes", self.inner.body_sent);
        Call::wrap(self.inner)
    }
}

// //////////////////////////////////////////////////////////////////////////////////////////// RECV RESPONSE

impl Call<RecvResponse> {
    /// Try reading a response head from `input`.
    ///
    /// Returns `(input consumed, response)`. Interim 1xx responses are
    /// consumed and discarded, which gives a non-zero consumed amount without
    /// a response. The caller drops the consumed input and tries again.
    pub fn try_response(&mut self, input: &[u8]) -> Result<(usize, Option<Response<()>>), Error> {
        let (input_used, response) = match try_parse_response::<MAX_RESPONSE_HEADERS>(input)? {
            Some(v) => v,
            None => return Ok((0, None)),
        };

        log_data(&input[..input_used]);

        if response.status().is_informational() {
            debug!("Discard interim response: {}", response.status());
            return Ok((input_used, None));
        }

        let header_lookup = |name: &str| response.headers().get(name).and_then(|v| v.to_str().ok());

        let reader = BodyReader::for_response(
            self.inner.request.method(),
            response.status(),
            &header_lookup,
        )?;

        self.inner.status = Some(response.status());
        self.inner.reader = Some(reader);

        Ok((input_used, Some(response)))
    }

    /// Whether a final response head has been read.
    pub fn can_proceed(&self) -> bool {
        self.inner.reader.is_some()
    }

    /// Returns `None` until [`Call::can_proceed()`] is `true`.
    pub fn proceed(self) -> Option<RecvResponseResult> {
        let need_body = match &self.inner.reader {
            None => return None,
            Some(BodyReader::NoBody) | Some(BodyReader::LengthDelimited(0)) => false,
            Some(_) => true,
        };

        Some(if need_body {
            RecvResponseResult::RecvBody(Call::wrap(self.inner))
        } else {
            RecvResponseResult::Cleanup(Call::wrap(self.inner))
        })
    }
}

pub(crate) enum RecvResponseResult {
    RecvBody(Call<RecvBody>),
    Cleanup(Call<Cleanup>),
}

// //////////////////////////////////////////////////////////////////////////////////////////// RECV BODY

impl Call<RecvBody> {
    /// Decode response body from `input` to `output`.
    ///
    /// Returns `(input consumed, output used)`.
    pub fn read(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize), Error> {
        match self.inner.reader.as_mut() {
            Some(reader) if !reader.is_ended() => reader.read(input, output),
            _ => Ok((0, 0)),
        }
    }

    /// Whether the body ends when the server closes the connection.
    pub fn is_close_delimited(&self) -> bool {
        self.inner
            .reader
            .as_ref()
            .map(|r| r.is_close_delimited())
            .unwrap_or(false)
    }

    /// Whether the whole body is read.
    pub fn can_proceed(&self) -> bool {
        self.inner
            .reader
            .as_ref()
            .map(|r| r.is_ended())
            .unwrap_or(true)
    }

    /// Proceed to cleanup.
    ///
    /// A close delimited body can always proceed, since it ends when the
    /// transport sees the connection close.
    pub fn proceed(self) -> Option<Call<Cleanup>> {
        if !self.can_proceed() && !self.is_close_delimited() {
            return None;
        }

        Some(Call::wrap(self.inner))
    }
}

// //////////////////////////////////////////////////////////////////////////////////////////// CLEANUP

impl Call<Cleanup> {
    /// Status of the completed exchange.
    pub fn status(&self) -> Option<StatusCode> {
        self.inner.status
    }
}

// ////////////////////////////////////////////////////////////////////////////////////////////

impl<State: Named> fmt::Debug for Call<State> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Call<{}>", State::name())
    }
}
