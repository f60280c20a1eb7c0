//! voicelink - bidirectional live audio/text streaming client core.
//!
//! Streams microphone audio and text to a conversational agent backend
//! over a duplex link and plays the agent's PCM16 replies, with voice
//! barge-in interruption. This crate is the protocol and real-time
//! pipeline core only; transcript rendering, window chrome, and tool
//! side effects belong to the host application consuming
//! [`PipelineEvent`]s.
//!
//! Typical use:
//!
//! ```no_run
//! use voicelink_rs::{Pipeline, PipelineConfig, SessionMode};
//!
//! # async fn run() -> Result<(), voicelink_rs::PipelineError> {
//! let (handle, mut events) = Pipeline::start(PipelineConfig::default(), SessionMode::Audio).await?;
//! handle.send_text("hello").await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod connector;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod session;
pub mod turn;

pub use config::{PipelineConfig, SessionMode};
pub use coordinator::{Pipeline, PipelineEvent, PipelineHandle};
pub use envelope::{Envelope, EnvelopeDecodeError};
pub use error::PipelineError;
