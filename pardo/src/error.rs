//! Failure carriers for the execution core.
//!
//! The core distinguishes exactly two provenances of failure: user code
//! threw, or the caller misconfigured or misused the runtime. The former is
//! carried opaquely in [`Error::UserCode`]; the latter fails fast with a
//! descriptive message. Nothing is retried, and a failed element fails its
//! whole bundle.

use thiserror::Error;

/// An arbitrary error escaping a user hook.
///
/// User lifecycle hooks return this so that `?` composes with any error type
/// the user's own code produces.
pub type UserError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Everything that can go wrong while driving a transform over a bundle.
#[derive(Debug, Error)]
pub enum Error {
    /// A user hook returned an error; the bundle fails as a whole.
    #[error("user code failed")]
    UserCode(#[source] UserError),
    /// The transform was wired up with a malformed or unknown configuration.
    #[error("invalid transform configuration: {0}")]
    Config(String),
    /// An output or timer timestamp violated its documented bounds.
    #[error("{0}")]
    TimestampViolation(String),
    /// An operation was invoked in a phase that does not support it.
    #[error("{0}")]
    Unsupported(String),
    /// `tear_down` was invoked more than once.
    #[error("tear_down may only be invoked once")]
    TornDown,
    /// An output was emitted to a tag with no registered consumer.
    #[error("unknown output tag `{0}`")]
    UnknownOutput(String),
    /// An element, window, or timer failed to encode or decode.
    #[error("coder failure: {0}")]
    Coder(String),
}

impl Error {
    /// Recovers a runtime error that round-tripped through a user hook via
    /// `?`, wrapping anything else as a user-code failure.
    pub(crate) fn from_user(err: UserError) -> Self {
        match err.downcast::<Error>() {
            Ok(err) => *err,
            Err(err) => Error::UserCode(err),
        }
    }
}
