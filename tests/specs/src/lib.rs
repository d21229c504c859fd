// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! Test harness for scenario-level specs against the real [`Engine`], wired
//! to the in-memory driver/callback doubles from `nan-core`'s
//! `test-support` feature instead of a live NAN driver.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nan_core::test_support::{
    default_capabilities, DriverCall, MockDataPathManager, MockDriver, MockRttManager, RecordingEventCallback, RecordingSessionCallback,
    RecordingUsageBroadcast,
};
use nan_core::{DriverEvent, DriverEventSink, Engine, EngineConfig};

const POLL: Duration = Duration::from_millis(5);
const TIMEOUT: Duration = Duration::from_secs(2);

/// Poll `f` until it returns `Some`, or time out. Every engine command is
/// applied asynchronously on the engine's own task, so tests have no
/// synchronous signal that a command has landed.
pub async fn wait_for<T>(mut f: impl FnMut() -> Option<T>) -> anyhow::Result<T> {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            if let Some(v) = f() {
                return v;
            }
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .context("condition never became true within timeout")
}

/// A running [`Engine`] backed by fully in-memory doubles.
pub struct Harness {
    pub engine: Engine,
    pub sink: DriverEventSink,
    pub driver: Arc<MockDriver>,
    pub broadcast: Arc<RecordingUsageBroadcast>,
}

impl Harness {
    pub fn start() -> Self {
        let driver = Arc::new(MockDriver::new());
        let data_path = Arc::new(MockDataPathManager::new());
        let rtt = Arc::new(MockRttManager::new());
        let broadcast = Arc::new(RecordingUsageBroadcast::new());
        let (engine, sink) = Engine::spawn(driver.clone(), data_path, rtt, broadcast.clone(), EngineConfig::default());
        Self { engine, sink, driver, broadcast }
    }

    /// Waits for the most recent call matching `pick` and returns the value
    /// `pick` extracted from it (typically the transaction id).
    pub async fn wait_for_call<T>(&self, pick: impl Fn(&DriverCall) -> Option<T>) -> anyhow::Result<T> {
        wait_for(|| self.driver.calls().iter().rev().find_map(&pick)).await
    }

    /// `enableUsage` followed by the driver's capabilities response.
    pub async fn enable_usage(&self) -> anyhow::Result<()> {
        self.engine.enable_usage().await?;
        let tid = self
            .wait_for_call(|c| match c {
                DriverCall::GetCapabilities { tid } => Some(*tid),
                _ => None,
            })
            .await?;
        self.sink.post(DriverEvent::CapabilitiesResponse { tid, capabilities: default_capabilities() }).await;
        Ok(())
    }

    /// `connect` followed by the driver's `enableAndConfigure` success, if
    /// one was actually issued (a second compatible client reuses the
    /// existing configuration and gets no new driver call).
    pub async fn connect(&self, client_id: u32, uid: u32, callback: Arc<RecordingEventCallback>, config: nan_core::ConfigRequest) -> anyhow::Result<()> {
        let calls_before = self.driver.calls().len();
        self.engine.connect(client_id, uid, callback, config).await?;
        let new_tid = wait_for(|| {
            self.driver.calls()[calls_before..].iter().find_map(|c| match c {
                DriverCall::EnableAndConfigure { tid, .. } => Some(Some(*tid)),
                _ => None,
            })
        })
        .await?;
        if let Some(tid) = new_tid {
            self.sink.post(DriverEvent::ConfigSuccess { tid }).await;
        }
        Ok(())
    }

    pub async fn publish(
        &self,
        client_id: u32,
        config: nan_core::PublishConfig,
        callback: Arc<RecordingSessionCallback>,
        pub_sub_id: u32,
    ) -> anyhow::Result<()> {
        self.engine.publish(client_id, config, callback).await?;
        let tid = self
            .wait_for_call(|c| match c {
                DriverCall::Publish { tid, .. } => Some(*tid),
                _ => None,
            })
            .await?;
        self.sink.post(DriverEvent::SessionConfigSuccess { tid, is_publish: true, pub_sub_id }).await;
        Ok(())
    }

    pub async fn subscribe(
        &self,
        client_id: u32,
        config: nan_core::SubscribeConfig,
        callback: Arc<RecordingSessionCallback>,
        pub_sub_id: u32,
    ) -> anyhow::Result<()> {
        self.engine.subscribe(client_id, config, callback).await?;
        let tid = self
            .wait_for_call(|c| match c {
                DriverCall::Subscribe { tid, .. } => Some(*tid),
                _ => None,
            })
            .await?;
        self.sink.post(DriverEvent::SessionConfigSuccess { tid, is_publish: false, pub_sub_id }).await;
        Ok(())
    }

    pub async fn session_ids_for(&self, client_id: u32) -> anyhow::Result<Vec<nan_core::SessionId>> {
        Ok(self.engine.inspect(move |sm| sm.session_ids_for(client_id)).await?)
    }

    pub async fn client_ids(&self) -> anyhow::Result<Vec<nan_core::ClientId>> {
        Ok(self.engine.inspect(|sm| sm.client_ids()).await?)
    }
}
