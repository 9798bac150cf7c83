//! Host-bound entry point for object style operations.

use std::io::{Read, Seek, Write};
use std::rc::Rc;
use std::time::Duration;

use crate::dispatch::{ExchangeDispatcher, Fatal, Outcome};
use crate::request::{RequestFacade, Target, DEFAULT_TIMEOUT};
use crate::response::ResponseView;
use crate::sign::Authorizer;
use crate::transfer::{ContentHash, TransferEngine, TransferOptions, TransferRecord, Uploaded};
use crate::transport::Transport;
use crate::Error;

/// Content type sent on uploads that don't set one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Header prefix for user metadata.
pub const DEFAULT_METADATA_PREFIX: &str = "x-amz-meta-";

/// Requests against one host, sharing a transport and an authorizer.
///
/// Every operation takes a continuation and returns immediately. Cloning is
/// cheap and clones share the transport.
#[derive(Clone)]
pub struct Connection {
    transport: Rc<dyn Transport>,
    host: String,
    port: Option<u16>,
    secure: bool,
    timeout: Duration,
    authorizer: Option<Rc<dyn Authorizer>>,
    metadata_prefix: String,
}

/// What a lookup found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// `ETag`, quotes included.
    pub etag: Option<String>,
    /// `Content-Type`.
    pub content_type: Option<String>,
    /// Size of the object, 0 when the server didn't say.
    pub size: u64,
    /// `Last-Modified`, as sent.
    pub last_modified: Option<String>,
    /// User metadata with the prefix stripped.
    pub metadata: Vec<(String, String)>,
}

impl ObjectInfo {
    /// Pull object facts out of a response.
    pub fn from_response(response: &ResponseView, metadata_prefix: &str) -> Self {
        let owned = |name: &str| response.header(name, None).map(|v| v.to_string());

        ObjectInfo {
            etag: owned("etag"),
            content_type: owned("content-type"),
            size: response.object_size(),
            last_modified: owned("last-modified"),
            metadata: response
                .metadata(metadata_prefix)
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Result of a store operation.
#[derive(Debug)]
pub enum Stored {
    /// The body was sent and accepted.
    Uploaded(Uploaded),
    /// Nothing was sent, the object exists and replacing was not allowed.
    AlreadyExists,
}

/// Settings for one store operation.
#[derive(Debug, Default)]
pub struct PutOptions {
    headers: Vec<(String, String)>,
    keep_existing: bool,
    transfer: TransferOptions,
}

impl PutOptions {
    /// Add a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Whether an existing object may be overwritten. Defaults to `true`.
    ///
    /// With `false`, a lookup runs first and the upload is skipped when the
    /// object exists.
    pub fn replace(mut self, replace: bool) -> Self {
        self.keep_existing = !replace;
        self
    }

    /// Buffering and progress for the transfer.
    pub fn transfer(mut self, transfer: TransferOptions) -> Self {
        self.transfer = transfer;
        self
    }
}

impl Connection {
    /// Plain `http` connection to `host`.
    pub fn new(transport: Rc<dyn Transport>, host: impl Into<String>) -> Self {
        Connection {
            transport,
            host: host.into(),
            port: None,
            secure: false,
            timeout: DEFAULT_TIMEOUT,
            authorizer: None,
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_string(),
        }
    }

    /// Use `https`.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Use an explicit port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Per request timeout. Defaults to 20 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sign every request with `authorizer`.
    pub fn authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Some(Rc::new(authorizer));
        self
    }

    /// Header prefix for user metadata. Defaults to `x-amz-meta-`.
    pub fn metadata_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metadata_prefix = prefix.into();
        self
    }

    /// Where requests go.
    pub fn target(&self) -> Target {
        let target = Target::new(self.secure, self.host.clone());
        match self.port {
            Some(p) => target.with_port(p),
            None => target,
        }
    }

    /// The shared transport.
    pub fn transport(&self) -> &Rc<dyn Transport> {
        &self.transport
    }

    /// A fresh facade bound to this connection's target and timeout.
    pub fn http_connection(&self) -> RequestFacade {
        let mut facade = RequestFacade::new(self.transport.clone(), self.target());
        facade.set_timeout(self.timeout);
        facade
    }

    /// Build a dispatcher for one request, signed with the authorizer.
    pub fn make_request(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> ExchangeDispatcher {
        let mut facade = self.http_connection();
        facade.request(method, path, body, headers);

        let dispatcher = ExchangeDispatcher::new(facade);
        match &self.authorizer {
            Some(a) => dispatcher.authorizer(a.clone()),
            None => dispatcher,
        }
    }

    /// Send one request with an in-memory body.
    ///
    /// The request can be replayed, so transient failures come back as
    /// [`Outcome::Retryable`].
    pub fn dispatch<F>(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
        continuation: F,
    ) where
        F: FnOnce(Outcome) + 'static,
    {
        self.make_request(method, path, headers, body)
            .replayable(true)
            .execute(continuation);
    }

    /// `HEAD` an object. A 404 is [`Outcome::Absent`].
    ///
    /// The request has no body and can be replayed, so transient failures
    /// come back as [`Outcome::Retryable`].
    pub fn lookup<F>(&self, path: &str, continuation: F)
    where
        F: FnOnce(Outcome<ObjectInfo>) + 'static,
    {
        let prefix = self.metadata_prefix.clone();

        self.make_request("HEAD", path, &[], None)
            .lookup()
            .replayable(true)
            .execute(move |outcome| {
                continuation(outcome.map(|r| ObjectInfo::from_response(&r, &prefix)));
            });
    }

    /// Whether an object exists.
    pub fn exists<F>(&self, path: &str, continuation: F)
    where
        F: FnOnce(Result<bool, Fatal>) + 'static,
    {
        self.lookup(path, move |outcome| {
            let result = match outcome {
                Outcome::Success(_) => Ok(true),
                Outcome::Absent => Ok(false),
                Outcome::Retryable(r) => Err(Fatal::from_response(r)),
                Outcome::Fatal(e) => Err(e),
            };
            continuation(result);
        });
    }

    /// Store a seekable source as a fixed length body.
    ///
    /// The MD5 is computed first unless `hash` is given. The server's `ETag`
    /// must match it. `continuation` gets the source back so a retryable
    /// outcome can be sent again.
    pub fn upload_file<R, F>(
        &self,
        path: &str,
        mut source: R,
        hash: Option<ContentHash>,
        options: PutOptions,
        continuation: F,
    ) where
        R: Read + Seek + 'static,
        F: FnOnce(Outcome<Stored>, R) + 'static,
    {
        let hash = match hash {
            Some(h) => h,
            None => match ContentHash::compute(&mut source, options.transfer.get_buffer_size()) {
                Ok(h) => h,
                Err(e) => return self.fail_later(e, source, continuation),
            },
        };

        if options.keep_existing {
            let this = self.clone();
            let path = path.to_string();
            let lookup_path = path.clone();
            let store = move |source: R, continuation: F| {
                this.put_fixed(&path, source, hash, options, continuation)
            };
            return self.unless_exists(lookup_path, source, continuation, store);
        }

        self.put_fixed(path, source, hash, options, continuation);
    }

    /// Store a stream of unknown length as a chunked body.
    ///
    /// No integrity check is possible and the upload is never retryable. With
    /// `replace(false)` the lookup that runs first can still be.
    pub fn upload_stream<R, F>(&self, path: &str, source: R, options: PutOptions, continuation: F)
    where
        R: Read + 'static,
        F: FnOnce(Outcome<Stored>, R) + 'static,
    {
        if options.keep_existing {
            let this = self.clone();
            let path = path.to_string();
            let lookup_path = path.clone();
            let store = move |source: R, continuation: F| {
                this.put_chunked(&path, source, options, continuation)
            };
            return self.unless_exists(lookup_path, source, continuation, store);
        }

        self.put_chunked(path, source, options, continuation);
    }

    /// `GET` an object into `sink`.
    ///
    /// `continuation` gets the sink back along with the outcome.
    pub fn download<W, F>(
        &self,
        path: &str,
        mut sink: W,
        transfer: TransferOptions,
        continuation: F,
    ) where
        W: Write + 'static,
        F: FnOnce(Outcome<TransferRecord>, W) + 'static,
    {
        let mut engine = TransferEngine::new(transfer);

        self.make_request("GET", path, &[], None).execute(move |outcome| {
            let outcome = outcome.and_then(|response| match engine.drain_to(&response, &mut sink) {
                Ok(record) => Outcome::Success(record),
                Err(e) => Outcome::Fatal(Fatal::Transport(e)),
            });
            continuation(outcome, sink);
        });
    }

    fn put_dispatcher(&self, path: &str, headers: &[(String, String)]) -> ExchangeDispatcher {
        let mut dispatcher = self.make_request("PUT", path, &[], None);

        let facade = dispatcher.facade_mut();
        for (k, v) in headers {
            facade.put_header(k.clone(), v.clone());
        }
        if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
            facade.put_header("Content-Type", DEFAULT_CONTENT_TYPE);
        }

        dispatcher
    }

    fn put_fixed<R, F>(
        &self,
        path: &str,
        source: R,
        hash: ContentHash,
        options: PutOptions,
        continuation: F,
    ) where
        R: Read + Seek + 'static,
        F: FnOnce(Outcome<Stored>, R) + 'static,
    {
        let dispatcher = self.put_dispatcher(path, &options.headers);

        let done = move |outcome: Outcome<Uploaded>, source: R| {
            continuation(outcome.map(Stored::Uploaded), source)
        };
        TransferEngine::new(options.transfer).upload_fixed(dispatcher, source, hash, done);
    }

    fn put_chunked<R, F>(&self, path: &str, source: R, options: PutOptions, continuation: F)
    where
        R: Read + 'static,
        F: FnOnce(Outcome<Stored>, R) + 'static,
    {
        let dispatcher = self.put_dispatcher(path, &options.headers);

        let done = move |outcome: Outcome<Uploaded>, source: R| {
            continuation(outcome.map(Stored::Uploaded), source)
        };
        TransferEngine::new(options.transfer).upload_chunked(dispatcher, source, done);
    }

    /// Run `store` only when `path` is absent.
    fn unless_exists<R, F, S>(&self, path: String, source: R, continuation: F, store: S)
    where
        R: 'static,
        F: FnOnce(Outcome<Stored>, R) + 'static,
        S: FnOnce(R, F) + 'static,
    {
        let label = path.clone();

        self.lookup(&path, move |outcome| match outcome {
            Outcome::Absent => store(source, continuation),
            Outcome::Success(_) => {
                debug!("{} exists, not replacing", label);
                continuation(Outcome::Success(Stored::AlreadyExists), source)
            }
            Outcome::Retryable(r) => continuation(Outcome::Retryable(r), source),
            Outcome::Fatal(e) => continuation(Outcome::Fatal(e), source),
        });
    }

    fn fail_later<R, F>(&self, error: Error, source: R, continuation: F)
    where
        R: 'static,
        F: FnOnce(Outcome<Stored>, R) + 'static,
    {
        let task = move || continuation(Outcome::Fatal(Fatal::Transport(error)), source);
        self.transport.schedule(Box::new(task));
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target())
            .field("timeout", &self.timeout)
            .field("authorizer", &self.authorizer.is_some())
            .finish()
    }
}
