use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tonic::async_trait;
use zk_discovery::session::MemorySession;
use zk_discovery::session::MemoryStore;
use zk_discovery::AddressConsumer;
use zk_discovery::AddressUpdate;
use zk_discovery::ClientConfig;
use zk_discovery::DiscoveryClient;
use zk_discovery::ResolvedState;
use zk_discovery::WatchSubscription;

pub const KEEPALIVE: Duration = Duration::from_millis(50);
pub const WAIT: Duration = Duration::from_secs(5);

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    once_cell::sync::Lazy::force(&LOGGER_INIT);
}

pub fn client_config() -> ClientConfig {
    ClientConfig {
        keepalive_interval: KEEPALIVE,
        delivery_buffer: 16,
    }
}

pub fn connect(store: &MemoryStore) -> (DiscoveryClient, Arc<MemorySession>) {
    let session = Arc::new(store.connect());
    (DiscoveryClient::new(session.clone(), client_config()), session)
}

/// Next snapshot, sorted; panics on timeout or end of stream
pub async fn next_snapshot(subscription: &mut WatchSubscription) -> Vec<String> {
    match tokio::time::timeout(WAIT, subscription.recv()).await {
        Ok(Some(AddressUpdate::Snapshot(mut addresses))) => {
            addresses.sort();
            addresses
        }
        other => panic!("expected a snapshot, got {other:?}"),
    }
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[derive(Debug, Default)]
pub struct CollectingConsumer {
    pub updates: Mutex<Vec<Vec<String>>>,
}

impl CollectingConsumer {
    pub fn last(&self) -> Option<Vec<String>> {
        self.updates.lock().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.updates.lock().len()
    }

    pub async fn wait_for(
        &self,
        expected: &[&str],
    ) {
        let expected = strings(expected);
        let deadline = tokio::time::Instant::now() + WAIT;
        while tokio::time::Instant::now() < deadline {
            if self.last().as_ref() == Some(&expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("consumer never saw {expected:?}; last update {:?}", self.last());
    }
}

#[async_trait]
impl AddressConsumer for CollectingConsumer {
    async fn update_state(
        &self,
        state: ResolvedState,
    ) {
        let mut addresses: Vec<String> = state.addresses.into_iter().map(|a| a.addr).collect();
        addresses.sort();
        self.updates.lock().push(addresses);
    }
}
