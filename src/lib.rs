//! Build-then-send HTTP/1.1 requests over a single-threaded event loop.
//!
//! Code written against a blocking connection object usually looks like this:
//! set the method and path, add headers one by one, write the body, then ask for
//! the response. This crate keeps that call shape but never blocks. All I/O is
//! deferred until [`RequestFacade::fetch_response()`] hands the accumulated
//! request to a [`Transport`], and the outcome is delivered later to a
//! continuation.
//!
//! The pieces, leaf first:
//!
//! * [`RequestFacade`] accumulates method, path, headers and body. Consuming it
//!   produces an immutable [`PendingRequest`] that is sent exactly once.
//! * [`ResponseView`] wraps one completed exchange: status, reason, headers and
//!   a buffered body.
//! * [`TransferEngine`] fills a facade from a source, either as a fixed-length
//!   body with a precomputed MD5, or as `transfer-encoding: chunked` with the
//!   MD5 computed on the fly. It reports progress at a bounded cadence.
//! * [`ExchangeDispatcher`] runs one exchange and classifies the response into
//!   exactly one [`Outcome`]: success, retryable, absent or fatal.
//!
//! The default transport is [`LoopClient`], which runs on a tokio
//! current-thread runtime inside a [`LocalSet`](tokio::task::LocalSet).
//!
//! # Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use deferred_conn::{ClientConfig, Connection, LoopClient, Outcome};
//!
//! let rt = tokio::runtime::Builder::new_current_thread()
//!     .enable_all()
//!     .build()
//!     .unwrap();
//! let local = tokio::task::LocalSet::new();
//!
//! local.block_on(&rt, async {
//!     let client = Rc::new(LoopClient::new(ClientConfig::default()).unwrap());
//!     let conn = Connection::new(client, "bucket.example.test");
//!
//!     let (tx, rx) = tokio::sync::oneshot::channel();
//!
//!     conn.lookup("/missing-key", move |outcome| {
//!         let _ = tx.send(matches!(outcome, Outcome::Absent));
//!     });
//!
//!     let absent = rx.await.unwrap();
//!     println!("absent: {}", absent);
//! });
//! ```
//!
//! # Not in scope
//!
//! * Request signing. See [`Authorizer`] for the hook.
//! * Parsing response bodies into domain objects.
//! * Connection pooling and keep-alive. Every exchange uses a fresh connection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

#[macro_use]
extern crate log;

mod body;
mod error;
mod ext;
mod parser;
mod util;
mod wire;

pub mod connection;
pub mod dispatch;
pub mod request;
pub mod response;
pub mod sign;
pub mod transfer;
pub mod transport;

#[cfg(test)]
mod test;

pub use connection::{Connection, ObjectInfo, PutOptions, Stored};
pub use dispatch::{ExchangeDispatcher, Fatal, Outcome, Policy};
pub use error::Error;
pub use request::{Body, PendingRequest, RequestFacade, Target};
pub use response::ResponseView;
pub use sign::{Authorizer, StaticHeader};
pub use transfer::{ContentHash, TransferEngine, TransferOptions, TransferRecord, Uploaded};
pub use transport::{ClientConfig, Completion, LoopClient, Transport};

// Re-export the basis for this library.
pub use http;
