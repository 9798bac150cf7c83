//! Moving bodies in and out, with hashing and progress.
//!
//! Uploads come in two modes:
//!
//! * **Fixed length.** Size and MD5 are known up front ([`ContentHash::compute`]
//!   reads the source once). The body is sent with `Content-Length` and
//!   `Content-MD5`, and the server's `ETag` must echo the MD5 afterwards.
//!   A 500, 503 or redirect is [`Outcome::Retryable`], since the source can be
//!   rewound and sent again.
//! * **Chunked.** Size is unknown. Each buffer becomes one
//!   `transfer-encoding: chunked` chunk and the MD5 is computed on the fly.
//!   There is nothing for the server to check against, and the stream can't
//!   be replayed, so the same transient statuses are [`Outcome::Fatal`].
//!
//! Progress is reported through [`TransferOptions::progress`] as
//! `(bytes done, bytes total)`.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::body::BodyWriter;
use crate::dispatch::{ExchangeDispatcher, Fatal, Outcome};
use crate::request::RequestFacade;
use crate::response::ResponseView;
use crate::Error;

mod hash;

pub use hash::ContentHash;
use hash::Hasher;

/// Default size of each buffer read from a source.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Chunked mode reports progress once per this many bytes.
const CHUNKED_PROGRESS_BYTES: usize = 1024 * 1024;

/// Progress callback, `(bytes done, bytes total)`.
pub type ProgressFn = Box<dyn FnMut(u64, u64)>;

/// Buffering and progress settings for one transfer.
pub struct TransferOptions {
    buffer_size: usize,
    num_cb: i32,
    progress: Option<ProgressFn>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            buffer_size: DEFAULT_BUFFER_SIZE,
            num_cb: 10,
            progress: None,
        }
    }
}

impl TransferOptions {
    /// Size of each buffer read from the source. Defaults to 8 KiB.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Upper bound on progress calls for fixed length transfers.
    ///
    /// Above 2, mid-transfer calls are spread evenly. Negative means a call
    /// for every buffer. 0 to 2 means only the initial and final calls.
    /// Defaults to 10.
    pub fn num_cb(mut self, num_cb: i32) -> Self {
        self.num_cb = num_cb;
        self
    }

    /// Callback receiving `(bytes done, bytes total)`.
    pub fn progress<F>(mut self, progress: F) -> Self
    where
        F: FnMut(u64, u64) + 'static,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Configured buffer size.
    pub fn get_buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Configured callback budget.
    pub fn get_num_cb(&self) -> i32 {
        self.num_cb
    }
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("buffer_size", &self.buffer_size)
            .field("num_cb", &self.num_cb)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// What one transfer moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    /// MD5 and size of the bytes moved.
    pub hash: ContentHash,
    /// Number of buffers read from the source.
    pub buffers: u64,
    /// Whether the body was sent chunked.
    pub chunked: bool,
}

impl TransferRecord {
    /// Total bytes moved.
    pub fn size(&self) -> u64 {
        self.hash.size()
    }
}

/// A completed upload.
#[derive(Debug)]
pub struct Uploaded {
    /// The server's response.
    pub response: ResponseView,
    /// What was sent.
    pub record: TransferRecord,
}

/// How often progress fires mid-transfer, in buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    Never,
    EachBuffer,
    Every(u64),
}

impl Cadence {
    fn fixed(size: u64, buffer_size: usize, num_cb: i32) -> Self {
        if num_cb > 2 {
            let every = size / buffer_size as u64 / (num_cb as u64 - 2);
            if every == 0 {
                Cadence::Never
            } else {
                Cadence::Every(every)
            }
        } else if num_cb < 0 {
            Cadence::EachBuffer
        } else {
            Cadence::Never
        }
    }

    fn chunked(buffer_size: usize) -> Self {
        match (CHUNKED_PROGRESS_BYTES / buffer_size) as u64 {
            0 => Cadence::Never,
            n => Cadence::Every(n),
        }
    }
}

/// Per-transfer counters.
struct TransferState {
    cadence: Cadence,
    since_last: u64,
    buffers: u64,
    total: u64,
    hasher: Hasher,
}

impl TransferState {
    fn new(cadence: Cadence) -> Self {
        TransferState {
            cadence,
            since_last: 0,
            buffers: 0,
            total: 0,
            hasher: Hasher::default(),
        }
    }

    /// Account for one buffer. Returns whether progress is due.
    fn advance(&mut self, data: &[u8]) -> bool {
        self.hasher.update(data);
        self.total += data.len() as u64;
        self.buffers += 1;
        self.since_last += 1;

        let due = match self.cadence {
            Cadence::Never => false,
            Cadence::EachBuffer => true,
            Cadence::Every(n) => self.since_last == n,
        };
        if due {
            self.since_last = 0;
        }
        due
    }

    fn finish(self, chunked: bool) -> TransferRecord {
        TransferRecord {
            hash: self.hasher.finish(),
            buffers: self.buffers,
            chunked,
        }
    }
}

/// Fills request bodies from sources, and drains response bodies to sinks.
#[derive(Debug, Default)]
pub struct TransferEngine {
    options: TransferOptions,
}

impl TransferEngine {
    /// Engine with `options`.
    pub fn new(options: TransferOptions) -> Self {
        TransferEngine { options }
    }

    /// The options in use.
    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    fn report(&mut self, done: u64, total: u64) {
        if let Some(progress) = self.options.progress.as_mut() {
            progress(done, total);
        }
    }

    /// Fill `facade` with a fixed length body from `source`.
    ///
    /// `hash` must describe the source from position 0. The source is rewound
    /// before and after. Adds `Content-MD5` and `Content-Length`.
    pub fn fill_fixed<R>(
        &mut self,
        facade: &mut RequestFacade,
        source: &mut R,
        hash: &ContentHash,
    ) -> Result<TransferRecord, Error>
    where
        R: Read + Seek,
    {
        let size = hash.size();
        let buffer_size = self.options.buffer_size;
        let mut state = TransferState::new(Cadence::fixed(size, buffer_size, self.options.num_cb));

        source.seek(SeekFrom::Start(0))?;

        let mut writer = BodyWriter::new_sized(size);
        let mut body = Vec::with_capacity(size as usize);
        let mut buf = vec![0; buffer_size];

        self.report(0, size);

        loop {
            let n = read_full(source, &mut buf)?;
            if n == 0 {
                break;
            }
            let data = &buf[..n];

            writer
                .write_to_vec(data, &mut body)
                .map_err(|_| Error::SourceSizeMismatch {
                    expected: size,
                    actual: state.total + n as u64,
                })?;

            if state.advance(data) {
                self.report(state.total, size);
            }
        }

        source.seek(SeekFrom::Start(0))?;

        if state.total != size {
            return Err(Error::SourceSizeMismatch {
                expected: size,
                actual: state.total,
            });
        }

        self.report(state.total, size);

        facade.put_header("Content-MD5", hash.base64());
        facade.put_header("Content-Length", size.to_string());
        facade.send_vec(body);

        let record = state.finish(false);
        trace!("Fixed body: {} bytes in {} buffers", record.size(), record.buffers);

        Ok(record)
    }

    /// Fill `facade` with a chunked body read from `source` until it ends.
    ///
    /// Adds `Transfer-Encoding: chunked`. The returned record carries the size
    /// and MD5 of what was read.
    pub fn fill_chunked<R>(
        &mut self,
        facade: &mut RequestFacade,
        source: &mut R,
    ) -> Result<TransferRecord, Error>
    where
        R: Read,
    {
        let buffer_size = self.options.buffer_size;
        let mut state = TransferState::new(Cadence::chunked(buffer_size));

        let mut writer = BodyWriter::new_chunked();
        let mut framed = Vec::new();
        let mut buf = vec![0; buffer_size];

        self.report(0, 0);

        loop {
            let n = read_full(source, &mut buf)?;
            if n == 0 {
                break;
            }
            let data = &buf[..n];

            writer.write_to_vec(data, &mut framed)?;

            if state.advance(data) {
                // Total size is unknown until the stream ends.
                self.report(state.total, 0);
            }
        }

        writer.write_to_vec(&[], &mut framed)?;

        self.report(state.total, state.total);

        facade.put_header("Transfer-Encoding", "chunked");
        facade.send_framed(framed);

        let record = state.finish(true);
        trace!("Chunked body: {} bytes in {} buffers", record.size(), record.buffers);

        Ok(record)
    }

    /// Upload a fixed length body and verify the server's `ETag`.
    ///
    /// The dispatcher is marked replayable. `continuation` receives the
    /// outcome and the source back, rewound to position 0, so a retryable
    /// outcome can be sent again.
    pub fn upload_fixed<R, F>(
        mut self,
        mut dispatcher: ExchangeDispatcher,
        mut source: R,
        hash: ContentHash,
        continuation: F,
    ) where
        R: Read + Seek + 'static,
        F: FnOnce(Outcome<Uploaded>, R) + 'static,
    {
        let filled = self.fill_fixed(dispatcher.facade_mut(), &mut source, &hash);

        let record = match filled {
            Ok(v) => v,
            Err(e) => return fail_later(&dispatcher, e, source, continuation),
        };

        dispatcher.replayable(true).execute(move |outcome| {
            let outcome = outcome.and_then(|response| verify_etag(response, record));
            continuation(outcome, source)
        });
    }

    /// Upload a chunked body from a stream of unknown length.
    ///
    /// Never retryable. The source is handed back positioned at its end.
    pub fn upload_chunked<R, F>(
        mut self,
        mut dispatcher: ExchangeDispatcher,
        mut source: R,
        continuation: F,
    ) where
        R: Read + 'static,
        F: FnOnce(Outcome<Uploaded>, R) + 'static,
    {
        let filled = self.fill_chunked(dispatcher.facade_mut(), &mut source);

        let record = match filled {
            Ok(v) => v,
            Err(e) => return fail_later(&dispatcher, e, source, continuation),
        };

        dispatcher.replayable(false).execute(move |outcome| {
            let outcome = outcome.map(|response| Uploaded { response, record });
            continuation(outcome, source)
        });
    }

    /// Write the body of `response` to `sink`, buffer by buffer.
    ///
    /// Progress follows the fixed length cadence with the body length as
    /// total.
    pub fn drain_to<W>(
        &mut self,
        response: &ResponseView,
        sink: &mut W,
    ) -> Result<TransferRecord, Error>
    where
        W: Write,
    {
        let body = response.body();
        let size = body.len() as u64;
        let cadence = Cadence::fixed(size, self.options.buffer_size, self.options.num_cb);
        let mut state = TransferState::new(cadence);

        self.report(0, size);

        for data in body.chunks(self.options.buffer_size) {
            sink.write_all(data)?;
            if state.advance(data) {
                self.report(state.total, size);
            }
        }
        sink.flush()?;

        self.report(state.total, size);

        Ok(state.finish(false))
    }
}

fn verify_etag(response: ResponseView, record: TransferRecord) -> Outcome<Uploaded> {
    let reported = response.etag();

    if reported.map(|e| record.hash.matches_etag(e)).unwrap_or(false) {
        return Outcome::Success(Uploaded { response, record });
    }

    warn!(
        "ETag mismatch: computed {}, reported {:?}",
        record.hash.hex(),
        reported
    );

    Outcome::Fatal(Fatal::DataIntegrity {
        computed: record.hash.hex().to_string(),
        reported: reported.map(|s| s.to_string()),
    })
}

/// Deliver a local failure through the event loop, never synchronously.
fn fail_later<R, F>(dispatcher: &ExchangeDispatcher, error: Error, source: R, continuation: F)
where
    R: 'static,
    F: FnOnce(Outcome<Uploaded>, R) + 'static,
{
    debug!("Transfer failed before send: {}", error);
    let task = move || continuation(Outcome::Fatal(Fatal::Transport(error)), source);
    dispatcher.facade().transport().schedule(Box::new(task));
}

/// Read until `buf` is full or the source ends. Returns the amount read.
pub(crate) fn read_full<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> Result<usize, Error> {
    let mut filled = 0;

    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(filled)
}
