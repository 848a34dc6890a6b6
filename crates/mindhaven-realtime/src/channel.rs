use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mindhaven_common::Identity;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use url::Url;
use uuid::Uuid;

use crate::backoff::ReconnectPolicy;
use crate::machine::{ChannelMachine, Effect, Input};
use crate::protocol::{InboundEvent, OutboundMessage};
use crate::traits::{ConnectionState, Dispatcher, dispatch};
use crate::transport::{Connection, Transport, TransportFrame};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("realtime channel is not open")]
    NotOpen,

    #[error("failed to encode outbound message: {0}")]
    Serialization(#[from] mindhaven_common::Error),
}

/// Everything a channel needs besides its identity and dispatcher.
pub struct ChannelOptions {
    pub endpoint: Url,
    pub transport: Arc<dyn Transport>,
    pub policy: ReconnectPolicy,
    /// Network reachability signal; `None` means always reachable.
    pub network: Option<watch::Receiver<bool>>,
}

impl ChannelOptions {
    pub fn new(endpoint: Url, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
            policy: ReconnectPolicy::default(),
            network: None,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_network(mut self, network: watch::Receiver<bool>) -> Self {
        self.network = Some(network);
        self
    }
}

enum Control {
    Expedite,
    Close,
}

enum DriverEvent {
    Opened {
        generation: u64,
        writer: mpsc::UnboundedSender<String>,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Closed {
        generation: u64,
        clean: bool,
    },
    TimerFired {
        generation: u64,
    },
}

/// State visible to handle clones without going through the driver.
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    /// Present exactly while the channel is open.
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    attempts: AtomicU32,
}

impl Shared {
    fn writer(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct HandleInner {
    id: Uuid,
    identity: Identity,
    control_tx: mpsc::UnboundedSender<Control>,
    state_rx: watch::Receiver<ConnectionState>,
    shared: Arc<Shared>,
}

/// Handle to one realtime channel. Cloning shares the same channel.
///
/// When the last clone is dropped the channel closes itself.
#[derive(Clone)]
pub struct ChannelHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.inner.id)
            .field("identity", &self.inner.identity)
            .field("state", &*self.inner.state_rx.borrow())
            .finish()
    }
}

impl ChannelHandle {
    /// Starts a channel for `identity` and returns without waiting for the
    /// connection. Must be called from within a tokio runtime.
    ///
    /// A blank identity has nobody to connect as: nothing is started and
    /// `None` is returned.
    pub fn open(
        identity: Identity,
        options: ChannelOptions,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Option<Self> {
        if identity.is_blank() {
            debug!("realtime: blank identity, not opening a channel");
            return None;
        }

        let id = Uuid::new_v4();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            state_tx,
            writer: Mutex::new(None),
            attempts: AtomicU32::new(0),
        });

        let online = options
            .network
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(true);

        let span = info_span!("realtime", channel = %id, identity = %identity);
        let mut driver = Driver {
            machine: ChannelMachine::new(options.policy, online),
            endpoint: options.endpoint,
            transport: options.transport,
            dispatcher,
            shared: Arc::clone(&shared),
            control_rx,
            events_tx,
            events_rx,
            network: options.network,
            timer: None,
            connection_task: None,
            pending_writer: None,
        };

        span.in_scope(|| {
            info!("realtime: opening channel");
            driver.step(Input::Start);
        });
        tokio::spawn(driver.run().instrument(span));

        Some(Self {
            inner: Arc::new(HandleInner {
                id,
                identity,
                control_tx,
                state_rx,
                shared,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state_rx.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.inner.state_rx.borrow().is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state_rx.borrow().is_closed()
    }

    /// Consecutive failed connection attempts in the current streak.
    pub fn attempts(&self) -> u32 {
        self.inner.shared.attempts.load(Ordering::Acquire)
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Writes `message` to the open connection.
    ///
    /// Never queues: when the channel is not open nothing is written and
    /// `SendError::NotOpen` is returned. A channel waiting out a reconnect
    /// delay is nudged to reconnect immediately.
    pub fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        let payload = message.to_json()?;

        {
            let writer = self.inner.shared.writer();
            if let Some(tx) = writer.as_ref()
                && tx.send(payload).is_ok()
            {
                debug!(channel = %self.inner.id, "realtime: message sent");
                return Ok(());
            }
        }

        warn!(channel = %self.inner.id, "realtime: send rejected, channel is not open");
        let _ = self.inner.control_tx.send(Control::Expedite);
        Err(SendError::NotOpen)
    }

    /// Closes the channel and waits for it to settle in a closed state.
    /// Cancels any pending reconnect. Calling it again is a no-op.
    pub async fn close(&self) {
        let _ = self.inner.control_tx.send(Control::Close);
        let mut state_rx = self.inner.state_rx.clone();
        let _ = state_rx.wait_for(ConnectionState::is_closed).await;
    }
}

struct Driver {
    machine: ChannelMachine,
    endpoint: Url,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<dyn Dispatcher>,
    shared: Arc<Shared>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    events_tx: mpsc::UnboundedSender<DriverEvent>,
    events_rx: mpsc::UnboundedReceiver<DriverEvent>,
    network: Option<watch::Receiver<bool>>,
    timer: Option<JoinHandle<()>>,
    connection_task: Option<JoinHandle<()>>,
    /// Writer of a connection that just reported open, waiting for the machine to accept it.
    pending_writer: Option<mpsc::UnboundedSender<String>>,
}

impl Driver {
    async fn run(mut self) {
        while !self.machine.is_terminal() {
            tokio::select! {
                control = self.control_rx.recv() => match control {
                    Some(Control::Expedite) => self.step(Input::Expedite),
                    Some(Control::Close) | None => self.step(Input::Close),
                },
                Some(event) = self.events_rx.recv() => self.on_event(event),
                online = network_changed(&mut self.network) => match online {
                    Some(online) => self.step(Input::NetworkChanged { online }),
                    None => {
                        // Nobody reports reachability any more: assume reachable.
                        self.network = None;
                        self.step(Input::NetworkChanged { online: true });
                    }
                },
            }
        }

        self.teardown();
        debug!("realtime: driver stopped");
    }

    fn on_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Opened { generation, writer } => {
                self.pending_writer = Some(writer);
                self.step(Input::Opened { generation });
                // Dropping an unclaimed writer closes the abandoned socket.
                self.pending_writer = None;
            }
            DriverEvent::Frame { generation, text } => {
                if !self.machine.accepts_frames_from(generation) {
                    debug!(generation, "realtime: dropping frame from stale connection");
                    return;
                }
                match InboundEvent::parse_json(&text) {
                    Ok(event) => {
                        debug!(kind = event.kind(), "realtime: dispatching frame");
                        dispatch(self.dispatcher.as_ref(), event);
                    }
                    Err(e) => warn!("realtime: dropping malformed frame: {e}"),
                }
            }
            DriverEvent::Closed { generation, clean } => {
                self.step(Input::Closed { generation, clean });
            }
            DriverEvent::TimerFired { generation } => {
                self.timer = None;
                self.step(Input::TimerFired { generation });
            }
        }
    }

    fn step(&mut self, input: Input) {
        for effect in self.machine.handle(input) {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Connect { generation } => self.spawn_attempt(generation),
            Effect::ScheduleReconnect { generation, delay } => {
                self.schedule_reconnect(generation, delay)
            }
            Effect::CancelTimer => {
                if let Some(timer) = self.timer.take() {
                    timer.abort();
                }
            }
            Effect::DropConnection => {
                self.shared.writer().take();
                if let Some(task) = self.connection_task.take() {
                    task.abort();
                }
            }
            Effect::Publish(state) => self.publish(state),
            Effect::Terminal(failure) => {
                error!("realtime: {failure}");
                self.dispatcher.on_terminal_failure(&failure);
            }
        }
    }

    fn publish(&mut self, state: ConnectionState) {
        if state.is_open() {
            *self.shared.writer() = self.pending_writer.take();
        }
        self.shared
            .attempts
            .store(self.machine.attempts(), Ordering::Release);
        debug!(?state, "realtime: state changed");
        self.dispatcher.on_state_change(&state);
        self.shared.state_tx.send_replace(state);
    }

    fn spawn_attempt(&mut self, generation: u64) {
        if let Some(previous) = self.connection_task.take() {
            previous.abort();
        }

        let transport = Arc::clone(&self.transport);
        let endpoint = self.endpoint.clone();
        let events = self.events_tx.clone();

        self.connection_task = Some(tokio::spawn(
            async move {
                match transport.connect(&endpoint).await {
                    Ok(connection) => relay_connection(generation, connection, events).await,
                    Err(e) => {
                        warn!(generation, "realtime: connection attempt failed: {e}");
                        let _ = events.send(DriverEvent::Closed {
                            generation,
                            clean: false,
                        });
                    }
                }
            }
            .in_current_span(),
        ));
    }

    fn schedule_reconnect(&mut self, generation: u64, delay: Duration) {
        if let Some(previous) = self.timer.take() {
            previous.abort();
        }

        let events = self.events_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(DriverEvent::TimerFired { generation });
        }));
    }

    fn teardown(&mut self) {
        self.shared.writer().take();
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(task) = self.connection_task.take() {
            task.abort();
        }
    }
}

/// Forwards everything a live connection reports to the driver, tagged with
/// the attempt's generation.
async fn relay_connection(
    generation: u64,
    connection: Connection,
    events: mpsc::UnboundedSender<DriverEvent>,
) {
    let Connection { writer, mut frames } = connection;
    if events
        .send(DriverEvent::Opened { generation, writer })
        .is_err()
    {
        return;
    }

    while let Some(frame) = frames.recv().await {
        let event = match frame {
            TransportFrame::Text(text) => DriverEvent::Frame { generation, text },
            TransportFrame::Closed { clean } => {
                let _ = events.send(DriverEvent::Closed { generation, clean });
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }

    let _ = events.send(DriverEvent::Closed {
        generation,
        clean: false,
    });
}

async fn network_changed(network: &mut Option<watch::Receiver<bool>>) -> Option<bool> {
    match network {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}
