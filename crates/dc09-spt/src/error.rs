//! Error taxonomy for the SPT engine, grouped the way the wire protocol actually
//! fails: bad configuration, bad encoding, a dead transport, or a malformed reply.

use thiserror::Error;

/// Errors produced anywhere in the `dc09-spt` crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected at construction time: bad key length, non-numeric account, etc.
    /// Never enqueued — the caller sees this synchronously.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Rejected while building a DC-03/DC-05 payload: disallowed characters,
    /// an unsupported message type, or a field the code class can't carry.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A transport-level failure: connect/send/receive. The transport itself
    /// downgrades to disconnected and logs; this variant is mostly surfaced
    /// through `Result` at the settings/CLI boundary rather than deep in the
    /// dispatcher, which treats a transport failure as "attempt failed", not
    /// as something to propagate.
    #[error("transport error: {0}")]
    Transport(String),

    /// A malformed or unexpected acknowledgement: bad length, bad CRC, wrong
    /// msg_nr, unrecognized status token.
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
