//! Turn-control interpretation of decoded envelopes.
//!
//! A turn is one continuous span of agent output. Text deltas accumulate
//! under one turn id until the agent signals completion; an interruption
//! stops the voice without discarding the turn, so resumed content still
//! lands in the same transcript entry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use uuid::Uuid;

use crate::audio::pcm;
use crate::envelope::Envelope;

/// What the coordinator should do with one decoded envelope.
#[derive(Debug, PartialEq)]
pub enum TurnUpdate {
    /// First content of a new turn; the host should open a transcript
    /// entry before appending `delta`.
    TurnStarted { turn_id: String, delta: String },
    /// More content for the already-open turn.
    TextDelta { turn_id: String, delta: String },
    /// Decoded playback samples; the assistant is now audibly speaking.
    Audio { samples: Vec<f32> },
    /// Tool side-effect payload for the host.
    ToolEvent(Value),
    /// The turn ended; the next text starts a fresh one.
    TurnCompleted,
    /// Voice was cut off; the turn id survives so content may resume.
    Interrupted,
}

/// Tracks the current turn and the assistant-speaking flag.
pub struct TurnTracker {
    current_turn: Option<String>,
    speaking: Arc<AtomicBool>,
}

impl TurnTracker {
    /// `speaking` is shared with the barge-in detector on the capture
    /// side; this tracker is the only place that raises it.
    pub fn new(speaking: Arc<AtomicBool>) -> Self {
        Self {
            current_turn: None,
            speaking,
        }
    }

    pub fn current_turn(&self) -> Option<&str> {
        self.current_turn.as_deref()
    }

    pub fn on_envelope(&mut self, envelope: Envelope) -> TurnUpdate {
        match envelope {
            Envelope::Text(delta) => match &self.current_turn {
                Some(id) => TurnUpdate::TextDelta {
                    turn_id: id.clone(),
                    delta,
                },
                None => {
                    let turn_id = Uuid::new_v4().to_string();
                    self.current_turn = Some(turn_id.clone());
                    TurnUpdate::TurnStarted { turn_id, delta }
                }
            },
            Envelope::Audio(bytes) => {
                self.speaking.store(true, Ordering::Release);
                TurnUpdate::Audio {
                    samples: pcm::bytes_to_f32(&bytes),
                }
            }
            Envelope::ToolEvent(payload) => TurnUpdate::ToolEvent(payload),
            Envelope::TurnComplete => {
                self.current_turn = None;
                self.speaking.store(false, Ordering::Release);
                TurnUpdate::TurnCompleted
            }
            Envelope::Interrupted => {
                self.speaking.store(false, Ordering::Release);
                TurnUpdate::Interrupted
            }
        }
    }
}
