//! # Errors
//!
//! Error types shared by every module of the SDK, including the traits that
//! hosts implement for transport and key storage.

use std::fmt::Display;

use thiserror::Error;

/// Simplify creation of errors with tracing.
///
/// # Example
/// ```
/// use eladid::error::Kind;
/// use eladid::{tracerr, Result};
///
/// fn with_msg() -> Result<()> {
///     tracerr!(Kind::InvalidArgs, "message: {}", "some message")
/// }
///
/// fn no_msg() -> Result<()> {
///     tracerr!(Kind::InvalidArgs)
/// }
/// ```
#[macro_export]
macro_rules! tracerr {
    // with context
    ($code:expr, $($msg:tt)*) => {
        {
        use $crate::error::Context as _;
        tracing::error!($($msg)*);
        return Err($code).context(format!($($msg)*));
        }
    };
    // no context
    ($code:expr) => {
        {
        tracing::error!("{}", $code);
        return Err($code.into());
        }
    }
}

/// Public error type for the SDK.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(#[from] anyhow::Error);

impl Error {
    /// Returns true if `Kind` is the type held by this error object.
    #[must_use]
    pub fn is(&self, kind: Kind) -> bool {
        self.0.downcast_ref::<Kind>().map_or(false, |k| k == &kind)
    }

    /// The typed kind carried by this error, if any.
    #[must_use]
    pub fn kind(&self) -> Option<Kind> {
        self.0.downcast_ref::<Kind>().copied()
    }

    /// The human-readable reason attached when the error was raised.
    #[must_use]
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Typed errors. A closed set: validators return the earliest failing
/// condition with a reason string attached as context.
#[derive(Clone, Copy, Error, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Null or empty required input.
    #[error("invalid_args")]
    InvalidArgs,

    /// No resolver or transaction adapter has been configured.
    #[error("not_initialized")]
    NotInitialized,

    /// A request envelope failed structural parsing: bad Base64URL, missing
    /// header fields, unknown operation.
    #[error("malformed_request")]
    MalformedRequest,

    /// A resolve response failed structural parsing or contradicted itself.
    #[error("malformed_resolve_response")]
    MalformedResolveResponse,

    /// An admission rule was violated. The context carries the specific
    /// reason (DID exists, prev-txid mismatch, ticket invalid, ...).
    #[error("transaction_error")]
    TransactionError,

    /// Transport failure or post-verification failure during resolution.
    #[error("resolve_error")]
    ResolveError,

    /// Resource absent. Not always an error: resolution surfaces this
    /// alongside a status.
    #[error("not_found")]
    NotFound,

    /// Unknown operation or DID method prefix.
    #[error("unsupported")]
    Unsupported,

    /// Publish attempted on a document with no attached store.
    #[error("no_attached_store")]
    NoAttachedStore,

    /// Cache or store filesystem failure.
    #[error("io_error")]
    IOError,
}

/// Context is used to decorate errors with useful context information.
pub trait Context<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Adds context to the error.
    ///
    /// # Errors
    ///
    /// * Original error with context appended.
    fn context<C>(self, context: C) -> Result<T, Error>
    where
        C: Display + Send + Sync + 'static;
}

impl<T, E> Context<T, E> for core::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
    {
        match self {
            Ok(ok) => Ok(ok),
            Err(e) => Err(Error(anyhow::Error::from(e).context(context))),
        }
    }
}

impl From<Kind> for Error {
    fn from(kind: Kind) -> Self {
        Error(kind.into())
    }
}

impl From<base64ct::Error> for Error {
    fn from(err: base64ct::Error) -> Error {
        Error(err.into())
    }
}

impl From<bs58::decode::Error> for Error {
    fn from(err: bs58::decode::Error) -> Error {
        Error(err.into())
    }
}

impl From<ecdsa::Error> for Error {
    fn from(err: ecdsa::Error) -> Error {
        Error(err.into())
    }
}

impl From<chrono::ParseError> for Error {
    fn from(err: chrono::ParseError) -> Error {
        Error(err.into())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Error {
        Error(err.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Error {
        Error(err.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error(err.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error(err.into())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Error {
        Error(err.into())
    }
}
