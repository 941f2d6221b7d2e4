//! The error taxonomy shared by the transport, protocol codec and session layers.

use thiserror::Error;

/// A transport-level failure: DNS, TCP, or TLS. Always terminal for the connection it occurred on.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid server name: {0}")]
    InvalidServerName(#[from] rustls::pki_types::InvalidDnsNameError),
    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// `recv` elapsed its timeout without producing a complete message. Benign in the idle receive
/// loop; fatal wherever a reply is mandatory (handshake, RTS/CTS, client-initiated operations).
#[derive(Debug, Error)]
#[error("receive timed out")]
pub struct TransportTimeout;

/// A framing or schema violation: malformed JSON, a missing envelope field, an unexpected
/// `payload.type`, a mismatched `message` label, or a non-`ok` result where one was required.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unexpected payload type, expected `{expected}`, got `{got}`")]
    UnexpectedPayloadType {
        expected: &'static str,
        got: String,
    },
    #[error("unexpected message label, expected `{expected}`, got `{got}`")]
    UnexpectedLabel { expected: String, got: String },
    #[error("unknown command/message type")]
    UnknownMessage,
    #[error("received {0} invalid")]
    InvalidPayload(&'static str),
    #[error("alertLevels not of type list")]
    AlertLevelsNotList,
    #[error("alertLevels items not of type int")]
    AlertLevelsItemNotInt,
    #[error("peer sent an error message: {0}")]
    PeerError(String),
    #[error("connection closed by peer")]
    PeerClosed,
}

/// The client and server disagree on protocol version at handshake time.
#[derive(Debug, Error)]
#[error("version not compatible")]
pub struct VersionMismatch;

/// Authentication was rejected by the server.
#[derive(Debug, Error)]
#[error("authentication failed")]
pub struct AuthFailure;

/// The external event handler reported failure while processing a delivered message.
#[derive(Debug, Error)]
#[error("handling received data failed")]
pub struct HandlerFailure;

/// The two benign-or-fatal outcomes of a transport-level receive: either it timed out, or
/// something else went wrong at the socket/TLS layer. A successful receive (including an
/// orderly peer close, which yields an empty buffer) never constructs this type.
#[derive(Debug, Error)]
pub enum RecvError {
    #[error(transparent)]
    Timeout(#[from] TransportTimeout),
    #[error(transparent)]
    Io(#[from] TransportError),
}

/// The composed error type returned by every fallible `Session` operation.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Timeout(#[from] TransportTimeout),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    VersionMismatch(#[from] VersionMismatch),
    #[error(transparent)]
    AuthFailure(#[from] AuthFailure),
    #[error(transparent)]
    HandlerFailure(#[from] HandlerFailure),
    #[error("session is not connected")]
    NotConnected,
}

impl From<RecvError> for SessionError {
    fn from(err: RecvError) -> Self {
        match err {
            RecvError::Timeout(e) => SessionError::Timeout(e),
            RecvError::Io(e) => SessionError::Transport(e),
        }
    }
}
