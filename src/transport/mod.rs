//! The event-loop client seam.
//!
//! A [`Transport`] takes one [`PendingRequest`] and later calls the
//! [`Completion`] with the outcome. Everything above this module is written
//! against the trait, so tests can swap in a scripted transport.

use crate::request::PendingRequest;
use crate::response::ResponseView;
use crate::Error;

mod config;
mod loop_client;
#[cfg(feature = "tls")]
mod tls;

pub use config::ClientConfig;
pub use loop_client::LoopClient;

/// Continuation receiving the result of one exchange.
pub type Completion = Box<dyn FnOnce(Result<ResponseView, Error>)>;

/// A single-threaded, continuation based HTTP client.
///
/// Implementors must call `done` exactly once per `fetch`, and never before
/// `fetch` has returned.
pub trait Transport {
    /// Run one exchange for `request`.
    fn fetch(&self, request: PendingRequest, done: Completion);

    /// Run `task` on the event loop, after the current call stack unwinds.
    ///
    /// Used to deliver local failures without calling a continuation
    /// synchronously.
    fn schedule(&self, task: Box<dyn FnOnce()>);
}
