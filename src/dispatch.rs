//! One exchange, one classified outcome.

use std::fmt;
use std::rc::Rc;

use crate::request::RequestFacade;
use crate::response::ResponseView;
use crate::sign::Authorizer;
use crate::Error;

/// Longest body excerpt included in a [`Fatal::Status`] display.
const SNIPPET_LEN: usize = 1024;

/// Classification of a completed exchange.
///
/// Exactly one variant is delivered per exchange. `T` is what a successful
/// operation yields, a [`ResponseView`] for plain exchanges.
#[derive(Debug)]
pub enum Outcome<T = ResponseView> {
    /// Status 2xx, and the operation's own checks passed.
    Success(T),
    /// Transient failure on a replayable operation. The caller decides
    /// whether and when to try again.
    Retryable(ResponseView),
    /// 404 on a lookup. Not an error.
    Absent,
    /// Anything else.
    Fatal(Fatal),
}

impl<T> Outcome<T> {
    /// Map the success value, leaving other variants as they are.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Success(v) => Outcome::Success(f(v)),
            Outcome::Retryable(r) => Outcome::Retryable(r),
            Outcome::Absent => Outcome::Absent,
            Outcome::Fatal(e) => Outcome::Fatal(e),
        }
    }

    /// Chain a fallible check on the success value.
    pub fn and_then<U, F: FnOnce(T) -> Outcome<U>>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Success(v) => f(v),
            Outcome::Retryable(r) => Outcome::Retryable(r),
            Outcome::Absent => Outcome::Absent,
            Outcome::Fatal(e) => Outcome::Fatal(e),
        }
    }

    /// Tell if this is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Tell if this is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Outcome::Retryable(_))
    }

    /// Tell if this is absent.
    pub fn is_absent(&self) -> bool {
        matches!(self, Outcome::Absent)
    }

    /// Tell if this is fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::Fatal(_))
    }

    /// Success value, if any.
    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(v) => Some(v),
            _ => None,
        }
    }

    /// The fatal error, if any.
    pub fn fatal(self) -> Option<Fatal> {
        match self {
            Outcome::Fatal(e) => Some(e),
            _ => None,
        }
    }
}

/// A failure the adapter will not retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fatal {
    /// No status was received: connect failure, timeout, reset, bad wire data.
    Transport(Error),
    /// The server answered with a status outside the accepted bands.
    Status {
        /// Numeric status.
        status: u16,
        /// Reason phrase.
        reason: String,
        /// Response body, verbatim.
        body: Vec<u8>,
    },
    /// The hash the server reported does not match what was sent.
    DataIntegrity {
        /// Hex MD5 of the uploaded bytes.
        computed: String,
        /// `ETag` reported by the server, if any.
        reported: Option<String>,
    },
    /// A 2xx response without the body the operation needs.
    MissingBody,
}

impl Fatal {
    pub(crate) fn from_response(response: ResponseView) -> Self {
        let status = response.status();
        let reason = response.reason().to_string();
        Fatal::Status {
            status,
            reason,
            body: response.into_body(),
        }
    }

    /// Status code, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Fatal::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fatal::Transport(e) => write!(f, "transport error: {}", e),
            Fatal::Status {
                status,
                reason,
                body,
            } => {
                let end = body.len().min(SNIPPET_LEN);
                write!(
                    f,
                    "{} {}\n{}",
                    status,
                    reason,
                    String::from_utf8_lossy(&body[..end])
                )
            }
            Fatal::DataIntegrity { computed, reported } => write!(
                f,
                "ETag from server did not match computed MD5: computed {}, reported {}",
                computed,
                reported.as_deref().unwrap_or("none")
            ),
            Fatal::MissingBody => write!(f, "response has no body"),
        }
    }
}

impl std::error::Error for Fatal {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Fatal::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Error> for Fatal {
    fn from(value: Error) -> Self {
        Fatal::Transport(value)
    }
}

/// Rules for turning a response into an [`Outcome`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policy {
    /// 404 means [`Outcome::Absent`].
    pub lookup: bool,
    /// 500, 503 and redirects are [`Outcome::Retryable`].
    pub replayable: bool,
    /// An empty 2xx body is [`Fatal::MissingBody`].
    pub require_body: bool,
}

impl Policy {
    /// Classify the result of one exchange.
    pub fn classify(&self, result: Result<ResponseView, Error>) -> Outcome {
        let response = match result {
            Ok(v) => v,
            Err(e) => return Outcome::Fatal(Fatal::Transport(e)),
        };

        let status = response.status();

        if (200..=299).contains(&status) {
            if self.require_body && response.body().is_empty() {
                return Outcome::Fatal(Fatal::MissingBody);
            }
            return Outcome::Success(response);
        }

        let transient = status == 500 || status == 503 || response.location().is_some();
        if transient && self.replayable {
            return Outcome::Retryable(response);
        }

        if status == 404 && self.lookup {
            return Outcome::Absent;
        }

        Outcome::Fatal(Fatal::from_response(response))
    }
}

/// Runs one exchange through a [`RequestFacade`] and classifies it.
///
/// A dispatcher handles exactly one exchange. Concurrent operations use
/// independent dispatchers and only share the transport.
pub struct ExchangeDispatcher {
    facade: RequestFacade,
    policy: Policy,
    authorizer: Option<Rc<dyn Authorizer>>,
}

impl ExchangeDispatcher {
    /// Dispatcher for the request built in `facade`.
    pub fn new(facade: RequestFacade) -> Self {
        ExchangeDispatcher {
            facade,
            policy: Policy::default(),
            authorizer: None,
        }
    }

    /// Treat 404 as [`Outcome::Absent`].
    pub fn lookup(mut self) -> Self {
        self.policy.lookup = true;
        self
    }

    /// Whether the request can be sent again as is.
    pub fn replayable(mut self, replayable: bool) -> Self {
        self.policy.replayable = replayable;
        self
    }

    /// Require a non-empty body on success.
    pub fn require_body(mut self) -> Self {
        self.policy.require_body = true;
        self
    }

    /// Sign the request right before it is committed.
    pub fn authorizer(mut self, authorizer: Rc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// The request being built.
    pub fn facade(&self) -> &RequestFacade {
        &self.facade
    }

    /// Mutable access to the request, to fill in a body.
    pub fn facade_mut(&mut self) -> &mut RequestFacade {
        &mut self.facade
    }

    /// The classification rules.
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Commit the request and deliver the classified outcome.
    ///
    /// `continuation` runs exactly once, from the event loop.
    pub fn execute<F>(self, continuation: F)
    where
        F: FnOnce(Outcome) + 'static,
    {
        let ExchangeDispatcher {
            mut facade,
            policy,
            authorizer,
        } = self;

        if let Some(authorizer) = authorizer {
            authorizer.authorize(&mut facade);
        }

        let label = format!("{} {}", facade.method(), facade.path());

        facade.fetch_response(move |result| {
            let outcome = policy.classify(result);
            match &outcome {
                Outcome::Success(r) => debug!("{}: success {}", label, r.status()),
                Outcome::Retryable(r) => debug!("{}: retryable {}", label, r.status()),
                Outcome::Absent => debug!("{}: absent", label),
                Outcome::Fatal(e) => debug!("{}: fatal {}", label, e),
            }
            continuation(outcome);
        });
    }
}

impl fmt::Debug for ExchangeDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeDispatcher")
            .field("facade", &self.facade)
            .field("policy", &self.policy)
            .field("authorizer", &self.authorizer.is_some())
            .finish()
    }
}
