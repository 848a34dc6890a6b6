//! Connection state machine of a realtime channel.
//!
//! Pure and synchronous: the driver feeds it inputs and carries out the
//! effects it returns. Every connection attempt and reconnect timer is tagged
//! with the generation that was current when it was started; inputs carrying
//! any other generation are ignored.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::traits::{ChannelFailure, CloseReason, ConnectionState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Input {
    Start,
    Opened { generation: u64 },
    Closed { generation: u64, clean: bool },
    TimerFired { generation: u64 },
    NetworkChanged { online: bool },
    /// A send was attempted while not open.
    Expedite,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    Connect { generation: u64 },
    ScheduleReconnect { generation: u64, delay: Duration },
    CancelTimer,
    DropConnection,
    Publish(ConnectionState),
    Terminal(ChannelFailure),
}

#[derive(Debug)]
pub(crate) struct ChannelMachine {
    state: ConnectionState,
    generation: u64,
    attempts: u32,
    policy: ReconnectPolicy,
    online: bool,
    timer_pending: bool,
    terminal_reported: bool,
}

impl ChannelMachine {
    pub(crate) fn new(policy: ReconnectPolicy, online: bool) -> Self {
        Self {
            state: ConnectionState::Idle,
            generation: 0,
            attempts: 0,
            policy,
            online,
            timer_pending: false,
            terminal_reported: false,
        }
    }

    pub(crate) fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn timer_pending(&self) -> bool {
        self.timer_pending
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.is_closed()
    }

    /// Whether a frame from `generation` belongs to the live connection.
    pub(crate) fn accepts_frames_from(&self, generation: u64) -> bool {
        generation == self.generation && self.state.is_open()
    }

    pub(crate) fn handle(&mut self, input: Input) -> Vec<Effect> {
        if self.is_terminal() {
            return Vec::new();
        }

        match input {
            Input::Start => match self.state {
                ConnectionState::Idle => self.connect(),
                _ => Vec::new(),
            },
            Input::Opened { generation } => {
                if generation != self.generation || self.state != ConnectionState::Connecting {
                    debug!(generation, "realtime: ignoring stale open");
                    return Vec::new();
                }
                self.attempts = 0;
                self.transition(ConnectionState::Open)
            }
            Input::Closed { generation, clean } => {
                if generation != self.generation {
                    debug!(generation, "realtime: ignoring stale close");
                    return Vec::new();
                }
                match self.state {
                    ConnectionState::Open if clean => {
                        info!("realtime: server closed the connection normally");
                        let mut effects = vec![Effect::DropConnection];
                        effects.extend(
                            self.transition(ConnectionState::Closed(CloseReason::ServerClosed)),
                        );
                        effects
                    }
                    ConnectionState::Open | ConnectionState::Connecting => {
                        let mut effects = vec![Effect::DropConnection];
                        effects.extend(self.begin_reconnect());
                        effects
                    }
                    _ => Vec::new(),
                }
            }
            Input::TimerFired { generation } => {
                if generation != self.generation
                    || !matches!(self.state, ConnectionState::Backoff { .. })
                {
                    return Vec::new();
                }
                self.timer_pending = false;
                if self.online {
                    self.connect()
                } else {
                    info!("realtime: network unreachable, holding reconnect");
                    self.transition(ConnectionState::Offline)
                }
            }
            Input::NetworkChanged { online } => {
                self.online = online;
                if online && self.state == ConnectionState::Offline {
                    info!("realtime: network reachable again, reconnecting");
                    self.connect()
                } else {
                    Vec::new()
                }
            }
            Input::Expedite => match self.state {
                ConnectionState::Backoff { .. } if self.online => {
                    debug!("realtime: send attempted during backoff, reconnecting now");
                    self.timer_pending = false;
                    let mut effects = vec![Effect::CancelTimer];
                    effects.extend(self.connect());
                    effects
                }
                _ => Vec::new(),
            },
            Input::Close => {
                self.generation += 1;
                let mut effects = Vec::new();
                if self.timer_pending {
                    self.timer_pending = false;
                    effects.push(Effect::CancelTimer);
                }
                effects.push(Effect::DropConnection);
                effects.extend(self.transition(ConnectionState::Closing));
                effects.extend(
                    self.transition(ConnectionState::Closed(CloseReason::CallerInitiated)),
                );
                effects
            }
        }
    }

    fn connect(&mut self) -> Vec<Effect> {
        self.generation += 1;
        let mut effects = self.transition(ConnectionState::Connecting);
        effects.push(Effect::Connect {
            generation: self.generation,
        });
        effects
    }

    fn begin_reconnect(&mut self) -> Vec<Effect> {
        if !self.online {
            info!("realtime: connection lost while offline, waiting for network");
            return self.transition(ConnectionState::Offline);
        }

        self.attempts += 1;
        if self.policy.is_exhausted(self.attempts) {
            warn!(
                attempts = self.attempts,
                "realtime: reconnect attempts exhausted, giving up"
            );
            let mut effects =
                self.transition(ConnectionState::Closed(CloseReason::MaxAttemptsExceeded));
            if !self.terminal_reported {
                self.terminal_reported = true;
                effects.push(Effect::Terminal(ChannelFailure::MaxAttemptsExceeded {
                    attempts: self.attempts,
                }));
            }
            return effects;
        }

        let delay = self.policy.delay_for_attempt(self.attempts);
        info!(
            attempt = self.attempts,
            max_attempts = self.policy.max_attempts(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "realtime: scheduling reconnect"
        );
        self.timer_pending = true;
        let mut effects = self.transition(ConnectionState::Backoff {
            attempt: self.attempts,
            delay,
        });
        effects.push(Effect::ScheduleReconnect {
            generation: self.generation,
            delay,
        });
        effects
    }

    fn transition(&mut self, next: ConnectionState) -> Vec<Effect> {
        self.state = next.clone();
        vec![Effect::Publish(next)]
    }
}
