//! Error types.
//!
//! Two very different kinds of failure live here:
//!
//! - [`Error`] surfaces infrastructure failures of the host: an unparsable
//!   bind address, binding to a port.
//! - [`RequestError`] is an *annotation* attached to a request while it is
//!   being handled. It never changes control flow; the access-log middleware
//!   reports every accumulated one as its own error record.

use std::fmt;

/// The error type returned by logguard's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid socket address `{addr}`: {source}")]
    Addr {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// An error recorded against a request by a handler or middleware.
///
/// Wraps any `std::error::Error + Send + Sync`. Like `anyhow::Error`, it does
/// not implement `std::error::Error` itself so that the blanket `From` impl
/// below stays coherent.
pub struct RequestError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl RequestError {
    /// An error carrying nothing but a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self(Box::new(Message(message.to_string())))
    }

    /// The wrapped error, for downcasting.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl<E> From<E> for RequestError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(e: E) -> Self {
        Self(Box::new(e))
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_error_keeps_message_and_type() {
        let err = RequestError::from(std::io::Error::other("disk on fire"));
        assert_eq!(err.to_string(), "disk on fire");
        assert!(err.inner().downcast_ref::<std::io::Error>().is_some());

        assert_eq!(RequestError::msg("plain").to_string(), "plain");
    }

    #[test]
    fn addr_error_names_the_address() {
        let source = "nope".parse::<std::net::SocketAddr>().unwrap_err();
        let err = Error::Addr { addr: "nope".into(), source };
        assert!(err.to_string().starts_with("invalid socket address `nope`"));
    }
}
