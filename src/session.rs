//! Session transport state machine.
//!
//! One task owns the connection lifecycle: connect, serve the open link,
//! reconnect after a fixed per-mode delay, switch mode on request. The
//! states and transitions are explicit (instead of the onopen/onclose
//! callback style the protocol grew up with) so reconnect and
//! mode-switch races are reproducible in tests. Because the delay lives
//! inside this single task's loop, at most one reconnect timer can ever
//! be outstanding, and a mode switch or stop supersedes it.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{PipelineConfig, SessionMode};
use crate::connector::{Connector, WireDuplex, WireEvent};
use crate::envelope::{self, Envelope};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Open,
    /// The peer (or our own mode switch) closed an open link.
    Closed,
    /// The connect attempt itself failed.
    Errored,
}

/// Events that move the link between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    ConnectRequested,
    Opened,
    RemoteClosed,
    LocalClosed,
    ConnectFailed,
    Stopped,
}

impl LinkState {
    /// Transition table. `None` marks an illegal move.
    pub fn apply(self, transition: LinkTransition) -> Option<LinkState> {
        use LinkState::*;
        use LinkTransition::*;
        match (self, transition) {
            (_, Stopped) => Some(Disconnected),
            (Disconnected | Closed | Errored, ConnectRequested) => Some(Connecting),
            (Connecting, Opened) => Some(Open),
            (Connecting, ConnectFailed) => Some(Errored),
            (Open, RemoteClosed) => Some(Closed),
            (Open, LocalClosed) => Some(Closed),
            _ => None,
        }
    }
}

/// Commands from the coordinator into the transport task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Encode and send one envelope. Rejected (dropped with a warning)
    /// unless the link is open.
    Send(Envelope),
    /// Tear down the connection and reopen with the new mode, keeping
    /// the session id.
    SwitchMode(SessionMode),
    Stop,
}

/// Events from the transport task toward the coordinator.
#[derive(Debug)]
pub enum SessionEvent {
    StateChanged(LinkState),
    /// One raw wire message; decoding is the receiver's job.
    Message(String),
}

enum ServeExit {
    Closed,
    ModeSwitch,
    Stop,
}

/// Owns one logical conversation channel for the lifetime of the
/// pipeline. The session id is generated by the caller once and reused
/// across every reconnect and mode switch.
pub struct SessionTransport {
    session_id: String,
    mode: SessionMode,
    state: LinkState,
    config: PipelineConfig,
    connector: Arc<dyn Connector>,
    events: mpsc::Sender<SessionEvent>,
    commands: mpsc::Receiver<SessionCommand>,
}

impl SessionTransport {
    pub fn new(
        session_id: String,
        mode: SessionMode,
        config: PipelineConfig,
        connector: Arc<dyn Connector>,
        events: mpsc::Sender<SessionEvent>,
        commands: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        Self {
            session_id,
            mode,
            state: LinkState::Disconnected,
            config,
            connector,
            events,
            commands,
        }
    }

    /// Drive the connection until stopped. Never returns early on
    /// transport failure; a broken link is a state, not an error.
    pub async fn run(mut self) {
        loop {
            self.transition(LinkTransition::ConnectRequested).await;

            match self.connector.open(&self.session_id, self.mode).await {
                Ok(duplex) => {
                    self.transition(LinkTransition::Opened).await;
                    match self.serve(duplex).await {
                        ServeExit::Stop => {
                            self.transition(LinkTransition::Stopped).await;
                            return;
                        }
                        ServeExit::ModeSwitch => {
                            self.transition(LinkTransition::LocalClosed).await;
                            // Reconnect immediately with the new mode.
                            continue;
                        }
                        ServeExit::Closed => {
                            self.transition(LinkTransition::RemoteClosed).await;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("connect failed: {}", e);
                    self.transition(LinkTransition::ConnectFailed).await;
                }
            }

            if !self.backoff().await {
                self.transition(LinkTransition::Stopped).await;
                return;
            }
        }
    }

    /// Serve one open connection until it dies or a command ends it.
    async fn serve(&mut self, mut duplex: WireDuplex) -> ServeExit {
        loop {
            tokio::select! {
                event = duplex.incoming.recv() => {
                    match event {
                        Some(WireEvent::Message(text)) => {
                            if self.events.send(SessionEvent::Message(text)).await.is_err() {
                                return ServeExit::Stop;
                            }
                        }
                        Some(WireEvent::Closed) | None => return ServeExit::Closed,
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Send(envelope)) => {
                            let wire = envelope::encode(&envelope);
                            if duplex.outgoing.send(wire).await.is_err() {
                                return ServeExit::Closed;
                            }
                        }
                        Some(SessionCommand::SwitchMode(mode)) => {
                            if mode != self.mode {
                                log::info!("switching session mode to {:?}, reconnecting", mode);
                                self.mode = mode;
                                return ServeExit::ModeSwitch;
                            }
                        }
                        Some(SessionCommand::Stop) | None => return ServeExit::Stop,
                    }
                }
            }
        }
    }

    /// Wait out the fixed reconnect delay, still answering commands: a
    /// send is rejected, a mode switch cuts the wait short, a stop ends
    /// the session. Returns false when the session should end.
    async fn backoff(&mut self) -> bool {
        let delay = self.config.reconnect_delay(self.mode);
        log::info!("reconnecting in {:?}...", delay);
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Send(_)) => {
                            log::warn!("send rejected: link is not open, dropping envelope");
                        }
                        Some(SessionCommand::SwitchMode(mode)) => {
                            self.mode = mode;
                            return true;
                        }
                        Some(SessionCommand::Stop) | None => return false,
                    }
                }
            }
        }
    }

    async fn transition(&mut self, transition: LinkTransition) {
        match self.state.apply(transition) {
            Some(next) => {
                if next != self.state {
                    log::debug!("link {:?} -> {:?}", self.state, next);
                    self.state = next;
                    let _ = self.events.send(SessionEvent::StateChanged(next)).await;
                }
            }
            None => {
                log::error!("illegal link transition {:?} from {:?}", transition, self.state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::{Duration, Instant};

    #[test]
    fn transition_table_accepts_the_lifecycle_path() {
        use LinkState::*;
        use LinkTransition::*;
        let mut state = Disconnected;
        for (transition, expected) in [
            (ConnectRequested, Connecting),
            (Opened, Open),
            (RemoteClosed, Closed),
            (ConnectRequested, Connecting),
            (ConnectFailed, Errored),
            (ConnectRequested, Connecting),
            (Opened, Open),
            (Stopped, Disconnected),
        ] {
            state = state.apply(transition).expect("legal transition");
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn transition_table_rejects_illegal_moves() {
        use LinkState::*;
        use LinkTransition::*;
        assert_eq!(Disconnected.apply(Opened), None);
        assert_eq!(Open.apply(Opened), None);
        assert_eq!(Open.apply(ConnectRequested), None);
        assert_eq!(Connecting.apply(RemoteClosed), None);
    }

    /// Records every open and keeps the inbound senders so a test can
    /// play server or cut the link.
    struct MockConnector {
        opens: Mutex<Vec<(String, SessionMode, Instant)>>,
        sent: Arc<Mutex<Vec<String>>>,
        inbound: Mutex<Vec<mpsc::Sender<WireEvent>>>,
        close_immediately: bool,
    }

    impl MockConnector {
        fn new(close_immediately: bool) -> Arc<Self> {
            Arc::new(Self {
                opens: Mutex::new(Vec::new()),
                sent: Arc::new(Mutex::new(Vec::new())),
                inbound: Mutex::new(Vec::new()),
                close_immediately,
            })
        }

        fn open_log(&self) -> Vec<(String, SessionMode, Instant)> {
            self.opens.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn open(&self, session_id: &str, mode: SessionMode) -> anyhow::Result<WireDuplex> {
            self.opens
                .lock()
                .unwrap()
                .push((session_id.to_string(), mode, Instant::now()));

            let (out_tx, mut out_rx) = mpsc::channel(8);
            let (in_tx, in_rx) = mpsc::channel(8);

            let sent = self.sent.clone();
            tokio::spawn(async move {
                while let Some(message) = out_rx.recv().await {
                    sent.lock().unwrap().push(message);
                }
            });

            if self.close_immediately {
                let _ = in_tx.send(WireEvent::Closed).await;
            }
            self.inbound.lock().unwrap().push(in_tx);

            Ok(WireDuplex {
                outgoing: out_tx,
                incoming: in_rx,
            })
        }
    }

    fn spawn_transport(
        connector: Arc<MockConnector>,
        mode: SessionMode,
    ) -> (
        mpsc::Sender<SessionCommand>,
        mpsc::Receiver<SessionEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (command_tx, command_rx) = mpsc::channel(64);
        let transport = SessionTransport::new(
            "session-under-test".to_string(),
            mode,
            PipelineConfig::default(),
            connector,
            event_tx,
            command_rx,
        );
        let handle = tokio::spawn(transport.run());
        (command_tx, event_rx, handle)
    }

    async fn wait_for_state(events: &mut mpsc::Receiver<SessionEvent>, wanted: LinkState) {
        loop {
            match events.recv().await {
                Some(SessionEvent::StateChanged(state)) if state == wanted => return,
                Some(_) => {}
                None => panic!("event channel closed before reaching {:?}", wanted),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_once_per_close_after_the_configured_delay() {
        let connector = MockConnector::new(true);
        let (commands, mut events, handle) = spawn_transport(connector.clone(), SessionMode::Text);

        // Three generations of connection: the initial one plus two
        // reconnects, each a full text-mode delay apart.
        for _ in 0..3 {
            wait_for_state(&mut events, LinkState::Open).await;
            wait_for_state(&mut events, LinkState::Closed).await;
        }

        let opens = connector.open_log();
        assert!(opens.len() >= 3);
        let text_delay = PipelineConfig::default().reconnect_delay_text;
        assert_eq!(opens[1].2 - opens[0].2, text_delay);
        assert_eq!(opens[2].2 - opens[1].2, text_delay);

        commands.send(SessionCommand::Stop).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn audio_mode_uses_the_shorter_delay() {
        let connector = MockConnector::new(true);
        let (commands, mut events, handle) = spawn_transport(connector.clone(), SessionMode::Audio);

        wait_for_state(&mut events, LinkState::Closed).await;
        wait_for_state(&mut events, LinkState::Open).await;

        let opens = connector.open_log();
        assert_eq!(
            opens[1].2 - opens[0].2,
            PipelineConfig::default().reconnect_delay_audio
        );

        commands.send(SessionCommand::Stop).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_closed_is_dropped_not_queued() {
        let connector = MockConnector::new(true);
        let (commands, mut events, handle) = spawn_transport(connector.clone(), SessionMode::Text);

        wait_for_state(&mut events, LinkState::Closed).await;

        // The link is down and waiting out the delay; this send must be
        // rejected, not delivered after the next connect.
        commands
            .send(SessionCommand::Send(Envelope::Text("late".to_string())))
            .await
            .unwrap();

        wait_for_state(&mut events, LinkState::Open).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(connector.sent.lock().unwrap().is_empty());

        commands.send(SessionCommand::Stop).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn mode_switch_reconnects_immediately_with_same_session_id() {
        let connector = MockConnector::new(false);
        let (commands, mut events, handle) = spawn_transport(connector.clone(), SessionMode::Text);

        wait_for_state(&mut events, LinkState::Open).await;

        commands
            .send(SessionCommand::SwitchMode(SessionMode::Audio))
            .await
            .unwrap();
        wait_for_state(&mut events, LinkState::Closed).await;
        wait_for_state(&mut events, LinkState::Open).await;

        let opens = connector.open_log();
        assert_eq!(opens.len(), 2);
        assert_eq!(opens[0].0, opens[1].0);
        assert_eq!(opens[0].1, SessionMode::Text);
        assert_eq!(opens[1].1, SessionMode::Audio);
        // Teardown-and-reopen, not a timed backoff.
        assert_eq!(opens[1].2, opens[0].2);

        commands.send(SessionCommand::Stop).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn open_link_delivers_messages_and_sends() {
        let connector = MockConnector::new(false);
        let (commands, mut events, handle) = spawn_transport(connector.clone(), SessionMode::Text);

        wait_for_state(&mut events, LinkState::Open).await;

        // Server speaks.
        let inbound = connector.inbound.lock().unwrap().last().unwrap().clone();
        inbound
            .send(WireEvent::Message("{\"turn_complete\": true}".to_string()))
            .await
            .unwrap();
        match events.recv().await {
            Some(SessionEvent::Message(text)) => {
                assert_eq!(text, "{\"turn_complete\": true}")
            }
            other => panic!("expected a message, got {:?}", other),
        }

        // We speak; the envelope is encoded onto the wire.
        commands
            .send(SessionCommand::Send(Envelope::Text("hi".to_string())))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = connector.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("text/plain"));

        commands.send(SessionCommand::Stop).await.unwrap();
        handle.await.unwrap();
    }
}
