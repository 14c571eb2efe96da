use std::{io, result};

use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    IoError(#[from] io::Error),
    /// On-disk structures are missing or malformed. Returned by `open`
    /// only; the dispatcher treats it as "not this label type".
    #[error("{0}")]
    Decode(String),
    /// Caller error, rejected before anything was written.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not supported")]
    NotSupported,
    #[error("not empty")]
    NotEmpty,
}

impl Error {
    pub(crate) fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
