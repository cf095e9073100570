//! Error taxonomy for the access layer.
//!
//! Backend error replies keep their message verbatim; transport failures keep
//! their cause. `NotConnected` is raised before any network attempt.

use tablekv_resp::RespError;

/// Result type for all access-layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the access layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation issued against a connection name that was never registered
    /// (or was closed).
    #[error("connection `{name}` is not registered")]
    NotConnected { name: String },

    /// Network or IO failure while talking to the backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// RESP framing or parse error.
    #[error("protocol error")]
    Protocol,

    /// Backend returned an error reply; the message is preserved verbatim.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },

    /// Reply type did not match the issued command.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Endpoint could not be parsed into host and port.
    #[error("invalid address: {addr}")]
    InvalidAddress { addr: String },

    /// Connection options were malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Bounded lock wait elapsed while the lock stayed held elsewhere.
    #[error("lock wait exceeded")]
    LockWaitExceeded,

    /// No usable cluster topology, or no owner for a slot.
    #[error("cluster unavailable: {reason}")]
    ClusterDown { reason: String },

    /// Atomic/pipelined batch whose keys hash to more than one cluster slot.
    #[error("batch keys span multiple cluster slots")]
    CrossSlotBatch,
}

impl Error {
    /// True for failures of the transport itself, as opposed to backend
    /// replies and caller mistakes. These are the failures reported through
    /// the registry's error hook. Local backpressure (`PoolExhausted`) is
    /// not a transport failure and does not mark a connection errored.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Protocol | Error::ClusterDown { .. })
    }
}

impl From<RespError> for Error {
    fn from(err: RespError) -> Self {
        match err {
            RespError::Io(err) => Error::Io(err),
            RespError::Protocol => Error::Protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_class_covers_wire_failures_only() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert!(io.is_transport());
        assert!(Error::Protocol.is_transport());
        assert!(Error::ClusterDown { reason: "no owner".to_string() }.is_transport());

        // Local backpressure and backend replies stay out of the class.
        assert!(!Error::PoolExhausted.is_transport());
        assert!(!Error::Server { message: b"ERR oops".to_vec() }.is_transport());
        assert!(!Error::LockWaitExceeded.is_transport());
    }
}
