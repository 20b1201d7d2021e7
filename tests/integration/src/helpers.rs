//! Test stack assembly
//!
//! One broker plus one persistence backend per test; each login produces
//! a fully wired [`RealtimeClient`] with its own connector, the way a
//! device would hold its own socket.

use crate::fixtures::{ApiBackend, InMemoryApi};
use anyhow::Result;
use dm_broker::{Broker, BrokerConnector};
use dm_client::RealtimeClient;
use dm_common::{RealtimeConfig, ReconnectConfig};
use dm_core::UserId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A logged-in client and the plumbing behind it
pub struct TestUser {
    pub user_id: UserId,
    pub client: RealtimeClient,
    pub connector: Arc<BrokerConnector>,
}

/// Shared broker and persistence for one test
pub struct TestStack {
    pub broker: Arc<Broker>,
    pub backend: Arc<ApiBackend>,
    config: RealtimeConfig,
}

impl TestStack {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    #[must_use]
    pub fn with_config(config: RealtimeConfig) -> Self {
        Self {
            broker: Arc::new(Broker::new()),
            backend: Arc::new(ApiBackend::new()),
            config,
        }
    }

    /// Log a fresh user in with the given token
    pub async fn login(&self, token: &str) -> Result<TestUser> {
        let user_id = UserId::random();
        self.broker.authorize(token, user_id);

        let connector = Arc::new(BrokerConnector::new(self.broker.clone()));
        let api = Arc::new(InMemoryApi::new(self.backend.clone(), user_id));
        let client = RealtimeClient::connect(
            &self.config,
            user_id,
            token,
            connector.clone(),
            api,
        )
        .await?;

        Ok(TestUser {
            user_id,
            client,
            connector,
        })
    }
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Fast reconnect tuning so lost-connection tests settle quickly
#[must_use]
pub fn test_config() -> RealtimeConfig {
    RealtimeConfig {
        reconnect: ReconnectConfig {
            base_delay_ms: 10,
            max_delay_ms: 40,
            max_attempts: 5,
        },
        ..RealtimeConfig::default()
    }
}

/// Poll a condition until it holds or the deadline passes
pub async fn wait_until<F>(deadline: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let poll = Duration::from_millis(5);
    let mut waited = Duration::ZERO;
    while waited <= deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(poll).await;
        waited += poll;
    }
    condition()
}

/// Await a future, panicking if it takes longer than the deadline
pub async fn within<F: Future>(deadline: Duration, future: F) -> F::Output {
    tokio::time::timeout(deadline, future)
        .await
        .expect("timed out")
}
