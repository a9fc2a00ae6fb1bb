use thiserror::Error;

/// Failure classes of inbox processing. Carried inside `anyhow::Error` so the
/// worker can decide whether a queue message is retried or discarded.
#[derive(Debug, Error)]
pub(crate) enum InboxError {
    #[error("malformed activity: {0}")]
    Malformed(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("unsupported activity: {0}")]
    Unsupported(String),
    #[error("remote object {0} is gone")]
    Gone(String),
    #[error("invalid http signature: {0}")]
    InvalidSignature(String),
    #[error("{0} is on a banned instance")]
    BannedInstance(String),
    #[error("transient failure: {0}")]
    Transient(String),
}

/// What the worker does with a message whose processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Leave the message in the queue for redelivery.
    Retry,
    /// Discard the message and log the failure.
    Drop,
    /// Discard the message quietly; expected traffic shaping.
    Silent,
}

impl InboxError {
    pub(crate) fn disposition(&self) -> Disposition {
        match self {
            InboxError::Malformed(_)
            | InboxError::Unauthorized(_)
            | InboxError::Unsupported(_)
            | InboxError::Gone(_)
            | InboxError::InvalidSignature(_) => Disposition::Drop,
            InboxError::BannedInstance(_) => Disposition::Silent,
            InboxError::Transient(_) => Disposition::Retry,
        }
    }
}

/// Errors that don't carry an [`InboxError`] come from storage or codecs and
/// are retried.
pub(crate) fn classify(error: &anyhow::Error) -> Disposition {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<InboxError>())
        .map_or(Disposition::Retry, InboxError::disposition)
}
