use std::io;

use thiserror::Error;

/// Failures from the listening/connecting helpers.
///
/// This is intentionally narrower than `esl::Error`: callers in `esl` map
/// these onto `NotConnected`/`InvalidArgument` at the point where they carry
/// protocol meaning.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no candidate port could be bound: {0}")]
    NoPortAvailable(io::Error),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error(transparent)]
    Io(#[from] io::Error),
}
