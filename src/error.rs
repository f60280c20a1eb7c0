//! Error taxonomy surfaced to the host application.

use thiserror::Error;

use crate::envelope::EnvelopeDecodeError;

/// Errors the pipeline reports to the host.
///
/// Only `PermissionDenied` is fatal; the pipeline recovers from transport
/// failures on its own, and decode or send failures cost one message at
/// most.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An audio device could not be opened. Fatal to audio mode and never
    /// retried automatically; the host must surface this to the user.
    #[error("audio device unavailable: {0}")]
    PermissionDenied(String),

    /// Connection-level failure. Recovered internally by reconnecting
    /// after the configured delay.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single wire message could not be decoded and was dropped. The
    /// stream keeps running.
    #[error(transparent)]
    Decode(#[from] EnvelopeDecodeError),

    /// A send was attempted while the link was not open. The envelope is
    /// dropped, never queued.
    #[error("send rejected: link is not open")]
    SendRejected,
}
