// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! The async wrapper around [`StateMachine`]: one tokio task owns the
//! state machine exclusively and drives it from a single `select!` loop
//! over app commands, driver notifications, and its own timer.
//!
//! [`Engine`] is the crate's only public entry point — every app-facing
//! call is a cheap channel send that returns as soon as the command is
//! admitted; the actual state transition happens later on the engine's
//! task and is reported back asynchronously through the app's registered
//! callbacks.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use crate::callback::{EventCallback, SessionCallback, UsageBroadcast};
use crate::config::EngineConfig;
use crate::driver::{DataPathManager, DriverEvent, NativeDriver, RttManager};
use crate::error::EngineError;
use crate::state_machine::StateMachine;
use crate::types::{ClientId, MessageId, PeerId, PublishConfig, RttParams, SessionId, SubscribeConfig};

#[cfg(any(test, feature = "test-support"))]
use crate::state_machine::NanLifecycle;

/// Depth of the app-command and driver-event channels. Generous enough
/// that a burst of calls never blocks the caller on a slow engine tick;
/// backpressure is not a design goal here since every command is O(1) to
/// apply.
const CHANNEL_DEPTH: usize = 256;

enum EngineMsg {
    EnableUsage,
    DisableUsage,
    IsUsageEnabled(oneshot::Sender<bool>),
    Connect {
        client_id: ClientId,
        uid: u32,
        callback: Arc<dyn EventCallback>,
        config: crate::types::ConfigRequest,
    },
    Disconnect {
        client_id: ClientId,
    },
    Publish {
        client_id: ClientId,
        config: PublishConfig,
        callback: Arc<dyn SessionCallback>,
    },
    Subscribe {
        client_id: ClientId,
        config: SubscribeConfig,
        callback: Arc<dyn SessionCallback>,
    },
    UpdatePublish {
        client_id: ClientId,
        session_id: SessionId,
        config: PublishConfig,
    },
    UpdateSubscribe {
        client_id: ClientId,
        session_id: SessionId,
        config: SubscribeConfig,
    },
    TerminateSession {
        client_id: ClientId,
        session_id: SessionId,
    },
    SendMessage {
        client_id: ClientId,
        session_id: SessionId,
        peer_id: PeerId,
        payload: Vec<u8>,
        message_id: MessageId,
        retry_count: u32,
    },
    StartRanging {
        client_id: ClientId,
        session_id: SessionId,
        params: Vec<RttParams>,
        ranging_id: u32,
    },
    #[cfg(any(test, feature = "test-support"))]
    Inspect(Box<dyn FnOnce(&StateMachine) + Send>),
}

/// Handle the native driver binding posts asynchronous events through.
/// Cheap to clone; dropping every clone lets the engine's `select!` loop
/// notice the channel closed on its next event-branch poll (it keeps
/// running as long as the command channel is alive).
#[derive(Clone)]
pub struct DriverEventSink {
    events: mpsc::Sender<DriverEvent>,
}

impl DriverEventSink {
    /// Post `event` to the engine. Best-effort: if the engine has already
    /// shut down, the event is silently dropped, matching the "late
    /// notification after teardown" cases called out throughout the data
    /// model (stale responses are always discarded, never surfaced as an
    /// error to the driver binding).
    pub async fn post(&self, event: DriverEvent) {
        if self.events.send(event).await.is_err() {
            debug!("driver event dropped: engine has shut down");
        }
    }
}

/// The public handle to a running engine task.
#[derive(Clone)]
pub struct Engine {
    commands: mpsc::Sender<EngineMsg>,
}

impl Engine {
    /// Spawn the engine's task and return a handle plus the sink the
    /// native driver binding posts [`DriverEvent`]s through.
    pub fn spawn(
        driver: Arc<dyn NativeDriver>,
        data_path: Arc<dyn DataPathManager>,
        rtt: Arc<dyn RttManager>,
        broadcast: Arc<dyn UsageBroadcast>,
        config: EngineConfig,
    ) -> (Self, DriverEventSink) {
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (ev_tx, ev_rx) = mpsc::channel(CHANNEL_DEPTH);
        let sm = StateMachine::new(driver, data_path, rtt, broadcast, config);
        tokio::spawn(run_loop(sm, cmd_rx, ev_rx));
        (Self { commands: cmd_tx }, DriverEventSink { events: ev_tx })
    }

    pub async fn enable_usage(&self) -> Result<(), EngineError> {
        self.send(EngineMsg::EnableUsage).await
    }

    pub async fn disable_usage(&self) -> Result<(), EngineError> {
        self.send(EngineMsg::DisableUsage).await
    }

    pub async fn is_usage_enabled(&self) -> Result<bool, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineMsg::IsUsageEnabled(tx)).await?;
        rx.await.map_err(|_| EngineError::ShuttingDown)
    }

    pub async fn connect(
        &self,
        client_id: ClientId,
        uid: u32,
        callback: Arc<dyn EventCallback>,
        config: crate::types::ConfigRequest,
    ) -> Result<(), EngineError> {
        self.send(EngineMsg::Connect { client_id, uid, callback, config }).await
    }

    pub async fn disconnect(&self, client_id: ClientId) -> Result<(), EngineError> {
        self.send(EngineMsg::Disconnect { client_id }).await
    }

    pub async fn publish(&self, client_id: ClientId, config: PublishConfig, callback: Arc<dyn SessionCallback>) -> Result<(), EngineError> {
        self.send(EngineMsg::Publish { client_id, config, callback }).await
    }

    pub async fn subscribe(
        &self,
        client_id: ClientId,
        config: SubscribeConfig,
        callback: Arc<dyn SessionCallback>,
    ) -> Result<(), EngineError> {
        self.send(EngineMsg::Subscribe { client_id, config, callback }).await
    }

    pub async fn update_publish(&self, client_id: ClientId, session_id: SessionId, config: PublishConfig) -> Result<(), EngineError> {
        self.send(EngineMsg::UpdatePublish { client_id, session_id, config }).await
    }

    pub async fn update_subscribe(&self, client_id: ClientId, session_id: SessionId, config: SubscribeConfig) -> Result<(), EngineError> {
        self.send(EngineMsg::UpdateSubscribe { client_id, session_id, config }).await
    }

    pub async fn terminate_session(&self, client_id: ClientId, session_id: SessionId) -> Result<(), EngineError> {
        self.send(EngineMsg::TerminateSession { client_id, session_id }).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn send_message(
        &self,
        client_id: ClientId,
        session_id: SessionId,
        peer_id: PeerId,
        payload: Vec<u8>,
        message_id: MessageId,
        retry_count: u32,
    ) -> Result<(), EngineError> {
        self.send(EngineMsg::SendMessage { client_id, session_id, peer_id, payload, message_id, retry_count }).await
    }

    pub async fn start_ranging(&self, client_id: ClientId, session_id: SessionId, params: Vec<RttParams>, ranging_id: u32) -> Result<(), EngineError> {
        self.send(EngineMsg::StartRanging { client_id, session_id, params, ranging_id }).await
    }

    async fn send(&self, msg: EngineMsg) -> Result<(), EngineError> {
        self.commands.send(msg).await.map_err(|_| EngineError::ShuttingDown)
    }

    /// Run `f` against the live state machine on its own task and await
    /// the result. Test-only: replaces the original's reflection-based
    /// assertions with a closure over the same read-only snapshot methods
    /// [`StateMachine`] exposes under `test-support`.
    #[cfg(any(test, feature = "test-support"))]
    pub async fn inspect<F, R>(&self, f: F) -> Result<R, EngineError>
    where
        F: FnOnce(&StateMachine) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(EngineMsg::Inspect(Box::new(move |sm| {
            let _ = tx.send(f(sm));
        })))
        .await?;
        rx.await.map_err(|_| EngineError::ShuttingDown)
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Engine {
    pub async fn lifecycle(&self) -> Result<NanLifecycle, EngineError> {
        self.inspect(StateMachine::lifecycle).await
    }
}

async fn run_loop(mut sm: StateMachine, mut commands: mpsc::Receiver<EngineMsg>, mut events: mpsc::Receiver<DriverEvent>) {
    loop {
        let deadline = sm.next_deadline();
        let sleep = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));
        tokio::pin!(sleep);

        tokio::select! {
            msg = commands.recv() => {
                match msg {
                    Some(msg) => apply(&mut sm, msg, Instant::now()),
                    None => {
                        debug!("engine command channel closed, shutting down");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => sm.handle_driver_event(event, Instant::now()),
                    None => {
                        debug!("driver event channel closed, shutting down");
                        break;
                    }
                }
            }
            () = &mut sleep, if deadline.is_some() => {
                sm.poll_timers(Instant::now());
            }
        }
    }
}

fn apply(sm: &mut StateMachine, msg: EngineMsg, now: Instant) {
    match msg {
        EngineMsg::EnableUsage => sm.enable_usage(now),
        EngineMsg::DisableUsage => sm.disable_usage(),
        EngineMsg::IsUsageEnabled(reply) => {
            let _ = reply.send(sm.is_usage_enabled());
        }
        EngineMsg::Connect { client_id, uid, callback, config } => sm.connect(client_id, uid, callback, config, now),
        EngineMsg::Disconnect { client_id } => sm.disconnect(client_id, now),
        EngineMsg::Publish { client_id, config, callback } => sm.publish(client_id, config, callback, now),
        EngineMsg::Subscribe { client_id, config, callback } => sm.subscribe(client_id, config, callback, now),
        EngineMsg::UpdatePublish { client_id, session_id, config } => sm.update_publish(client_id, session_id, config, now),
        EngineMsg::UpdateSubscribe { client_id, session_id, config } => sm.update_subscribe(client_id, session_id, config, now),
        EngineMsg::TerminateSession { client_id, session_id } => sm.terminate_session(client_id, session_id, now),
        EngineMsg::SendMessage { client_id, session_id, peer_id, payload, message_id, retry_count } => {
            sm.send_message(client_id, session_id, peer_id, payload, message_id, retry_count, now);
        }
        EngineMsg::StartRanging { client_id, session_id, params, ranging_id } => sm.start_ranging(client_id, session_id, params, ranging_id),
        #[cfg(any(test, feature = "test-support"))]
        EngineMsg::Inspect(f) => f(sm),
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
