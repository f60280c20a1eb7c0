//! Pipeline coordinator.
//!
//! Owns the session context (id, mode, speaking flag, channel topology)
//! and wires the two halves together: capture frames flow out through
//! the envelope codec to the transport, and wire messages flow back
//! through the codec and turn tracker into the playback queue and the
//! host's event stream. The host talks to a running pipeline only
//! through `PipelineHandle` and the event receiver.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::{AudioSystem, PlaybackCommand, pcm};
use crate::config::{PipelineConfig, SessionMode};
use crate::connector::{Connector, SseConnector, WsConnector};
use crate::envelope::{self, Envelope};
use crate::error::PipelineError;
use crate::session::{LinkState, SessionCommand, SessionEvent, SessionTransport};
use crate::turn::{TurnTracker, TurnUpdate};

/// Notifications toward the host application.
#[derive(Debug, PartialEq)]
pub enum PipelineEvent {
    Connected,
    Disconnected,
    /// A new agent turn began; deltas with the same id follow.
    TurnStarted { turn_id: String },
    TextDelta { turn_id: String, delta: String },
    /// Tool side-effect payload, verbatim from the wire.
    ToolEvent(Value),
    TurnCompleted,
    /// Playback was cut off; the turn may still continue as text.
    Interrupted,
    /// A non-fatal failure the host should surface (e.g. the audio
    /// devices refused to open on a mid-session mode switch).
    Error(String),
}

/// Host-side commands into the coordinator loop.
#[derive(Debug)]
enum HostCommand {
    SendText(String),
    SwitchMode(SessionMode),
    Stop,
}

/// Cheap cloneable handle for driving a running pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    commands: mpsc::Sender<HostCommand>,
}

impl PipelineHandle {
    /// Queue one text message for the agent. If the link is not open
    /// when the message reaches the transport it is dropped with a
    /// diagnostic, never buffered.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), PipelineError> {
        self.commands
            .send(HostCommand::SendText(text.into()))
            .await
            .map_err(|_| PipelineError::SendRejected)
    }

    /// Tear down the connection and reopen it with the new mode, keeping
    /// the session id. Audio threads start or stop accordingly.
    pub async fn switch_mode(&self, mode: SessionMode) -> Result<(), PipelineError> {
        self.commands
            .send(HostCommand::SwitchMode(mode))
            .await
            .map_err(|_| PipelineError::SendRejected)
    }

    /// Stop the pipeline: closes the connection and joins the audio
    /// threads.
    pub async fn stop(&self) {
        let _ = self.commands.send(HostCommand::Stop).await;
    }
}

/// The assembled pipeline. Construction wires everything and spawns the
/// transport and coordinator tasks; the value itself is just the entry
/// point.
pub struct Pipeline;

impl Pipeline {
    /// Start with the connector matching the configured URL scheme:
    /// `ws://`/`wss://` picks the duplex socket, anything else the
    /// SSE + POST pair.
    pub async fn start(
        config: PipelineConfig,
        mode: SessionMode,
    ) -> Result<(PipelineHandle, mpsc::Receiver<PipelineEvent>), PipelineError> {
        let connector: Arc<dyn Connector> = if config.server_url.starts_with("ws") {
            Arc::new(WsConnector::new(config.server_url.clone()))
        } else {
            Arc::new(SseConnector::new(config.server_url.clone()))
        };
        Self::start_with_connector(config, mode, connector).await
    }

    /// Start against an explicit connector. This is also the seam tests
    /// use to run the whole pipeline without a backend.
    pub async fn start_with_connector(
        config: PipelineConfig,
        mode: SessionMode,
        connector: Arc<dyn Connector>,
    ) -> Result<(PipelineHandle, mpsc::Receiver<PipelineEvent>), PipelineError> {
        // One id for the process lifetime, reused across reconnects and
        // mode switches.
        let session_id = Uuid::new_v4().to_string();
        log::info!("pipeline starting, session {}, mode {:?}", session_id, mode);

        let depth = config.channel_depth;
        let (session_event_tx, session_event_rx) = mpsc::channel::<SessionEvent>(depth);
        let (session_command_tx, session_command_rx) = mpsc::channel::<SessionCommand>(depth);
        let (host_command_tx, host_command_rx) = mpsc::channel::<HostCommand>(depth);
        let (pipeline_event_tx, pipeline_event_rx) = mpsc::channel::<PipelineEvent>(depth);
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<i16>>(depth);

        let speaking = Arc::new(AtomicBool::new(false));

        let audio = if mode.is_audio() {
            Some(start_audio(&config, frame_tx.clone(), speaking.clone()).await?)
        } else {
            None
        };

        let transport = SessionTransport::new(
            session_id,
            mode,
            config.clone(),
            connector,
            session_event_tx,
            session_command_rx,
        );
        tokio::spawn(transport.run());

        let coordinator = Coordinator {
            config,
            link_state: LinkState::Disconnected,
            tracker: TurnTracker::new(speaking.clone()),
            speaking,
            audio,
            frame_tx,
            session_commands: session_command_tx,
            events: pipeline_event_tx,
        };
        tokio::spawn(coordinator.run(session_event_rx, host_command_rx, frame_rx));

        let handle = PipelineHandle {
            commands: host_command_tx,
        };
        Ok((handle, pipeline_event_rx))
    }
}

/// Audio threads plus the sender the network side writes playback
/// samples into.
struct AudioStage {
    system: AudioSystem,
    playback_tx: mpsc::Sender<PlaybackCommand>,
}

/// Opening ALSA devices blocks briefly, so it runs off the async
/// threads.
async fn start_audio(
    config: &PipelineConfig,
    frame_tx: mpsc::Sender<Vec<i16>>,
    speaking: Arc<AtomicBool>,
) -> Result<AudioStage, PipelineError> {
    let (playback_tx, playback_rx) = mpsc::channel::<PlaybackCommand>(config.channel_depth);
    let clear_tx = playback_tx.clone();
    let config = config.clone();
    let system = tokio::task::spawn_blocking(move || {
        AudioSystem::start(&config, frame_tx, clear_tx, playback_rx, speaking)
    })
    .await
    .map_err(|e| PipelineError::PermissionDenied(e.to_string()))??;

    Ok(AudioStage {
        system,
        playback_tx,
    })
}

struct Coordinator {
    config: PipelineConfig,
    link_state: LinkState,
    tracker: TurnTracker,
    speaking: Arc<AtomicBool>,
    audio: Option<AudioStage>,
    frame_tx: mpsc::Sender<Vec<i16>>,
    session_commands: mpsc::Sender<SessionCommand>,
    events: mpsc::Sender<PipelineEvent>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut session_events: mpsc::Receiver<SessionEvent>,
        mut host_commands: mpsc::Receiver<HostCommand>,
        mut frames: mpsc::Receiver<Vec<i16>>,
    ) {
        loop {
            tokio::select! {
                Some(event) = session_events.recv() => {
                    self.handle_session_event(event).await;
                }
                Some(frame) = frames.recv() => {
                    self.handle_capture_frame(frame).await;
                }
                Some(command) = host_commands.recv() => {
                    if !self.handle_host_command(command).await {
                        break;
                    }
                }
                else => break,
            }
        }

        // Joining the audio threads happens off the async threads too.
        if let Some(stage) = self.audio.take() {
            let _ = tokio::task::spawn_blocking(move || {
                let mut stage = stage;
                stage.system.stop();
            })
            .await;
        }
        log::info!("pipeline stopped");
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged(state) => {
                self.link_state = state;
                match state {
                    LinkState::Open => self.emit(PipelineEvent::Connected).await,
                    LinkState::Closed | LinkState::Errored => {
                        self.emit(PipelineEvent::Disconnected).await;
                    }
                    _ => {}
                }
            }
            SessionEvent::Message(text) => match envelope::decode(&text) {
                Ok(envelope) => {
                    let update = self.tracker.on_envelope(envelope);
                    self.apply_update(update).await;
                }
                Err(e) => {
                    // One bad message costs itself, nothing else.
                    log::warn!("dropping undecodable message: {}", e);
                }
            },
        }
    }

    async fn apply_update(&mut self, update: TurnUpdate) {
        match update {
            TurnUpdate::Audio { samples } => {
                if let Some(stage) = &self.audio {
                    if stage
                        .playback_tx
                        .try_send(PlaybackCommand::Write(samples))
                        .is_err()
                    {
                        log::warn!("playback queue full, dropping audio");
                    }
                } else {
                    log::debug!("audio envelope in text mode, ignoring");
                }
            }
            TurnUpdate::TurnStarted { turn_id, delta } => {
                self.emit(PipelineEvent::TurnStarted {
                    turn_id: turn_id.clone(),
                })
                .await;
                self.emit(PipelineEvent::TextDelta { turn_id, delta }).await;
            }
            TurnUpdate::TextDelta { turn_id, delta } => {
                self.emit(PipelineEvent::TextDelta { turn_id, delta }).await;
            }
            TurnUpdate::ToolEvent(payload) => {
                self.emit(PipelineEvent::ToolEvent(payload)).await;
            }
            TurnUpdate::TurnCompleted => self.emit(PipelineEvent::TurnCompleted).await,
            TurnUpdate::Interrupted => self.emit(PipelineEvent::Interrupted).await,
        }
    }

    async fn handle_capture_frame(&mut self, frame: Vec<i16>) {
        if self.link_state != LinkState::Open {
            // No backpressure toward capture; this frame is gone.
            log::debug!("link not open, dropping capture frame");
            return;
        }
        let envelope = Envelope::Audio(pcm::frame_to_bytes(&frame));
        if self
            .session_commands
            .send(SessionCommand::Send(envelope))
            .await
            .is_err()
        {
            log::warn!("transport gone, dropping capture frame");
        }
    }

    /// Returns false when the loop should exit.
    async fn handle_host_command(&mut self, command: HostCommand) -> bool {
        match command {
            HostCommand::SendText(text) => {
                if self.link_state == LinkState::Open {
                    let _ = self
                        .session_commands
                        .send(SessionCommand::Send(Envelope::Text(text)))
                        .await;
                } else {
                    log::warn!("send rejected: link is not open, dropping text");
                }
                true
            }
            HostCommand::SwitchMode(mode) => {
                self.switch_mode(mode).await;
                true
            }
            HostCommand::Stop => {
                let _ = self.session_commands.send(SessionCommand::Stop).await;
                false
            }
        }
    }

    async fn switch_mode(&mut self, mode: SessionMode) {
        // Audio machinery first: entering audio mode must not reconnect
        // the transport when the devices refuse to open.
        if mode.is_audio() && self.audio.is_none() {
            match start_audio(&self.config, self.frame_tx.clone(), self.speaking.clone()).await {
                Ok(stage) => self.audio = Some(stage),
                Err(e) => {
                    log::error!("cannot enter audio mode: {}", e);
                    self.emit(PipelineEvent::Error(e.to_string())).await;
                    return;
                }
            }
        } else if !mode.is_audio() {
            if let Some(stage) = self.audio.take() {
                let _ = tokio::task::spawn_blocking(move || {
                    let mut stage = stage;
                    stage.system.stop();
                })
                .await;
            }
        }

        let _ = self
            .session_commands
            .send(SessionCommand::SwitchMode(mode))
            .await;
    }

    async fn emit(&self, event: PipelineEvent) {
        if self.events.send(event).await.is_err() {
            log::debug!("host dropped the event receiver");
        }
    }
}
