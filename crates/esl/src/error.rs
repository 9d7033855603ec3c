use thiserror::Error;

/// Errors surfaced across the public API.
///
/// `Timeout` deliberately has no variant here: per the outbound session's
/// blocking command methods, a `response_timeout` expiry is represented as
/// an empty result, not a thrown error (see `outbound::session`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The connection is not (or no longer) usable: pre-connect failure,
    /// post-disconnect `send`, or a stop() in progress.
    #[error("not connected")]
    NotConnected,

    /// The outbound session's call has disconnected or is lingering; no
    /// further channel commands may be issued.
    #[error("session gone")]
    SessionGone,

    /// Bad input at a trust boundary: rejected auth, unregistering an
    /// unknown handler key, or a malformed construction argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<esl_net::Error> for Error {
    fn from(_: esl_net::Error) -> Self {
        Error::NotConnected
    }
}
