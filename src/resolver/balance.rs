//! Feeds resolved addresses into a tonic balance channel.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tonic::async_trait;
use tower::discover::Change;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tracing::debug;
use tracing::warn;

use super::AddressConsumer;
use super::ResolvedState;

/// An [`AddressConsumer`] that turns full address sets into the
/// insert/remove changes a balance channel expects.
#[derive(Debug)]
pub struct BalanceChannelConsumer {
    tx: mpsc::Sender<Change<String, Endpoint>>,
    applied: Mutex<HashSet<String>>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

/// Creates a balance channel and the consumer that drives it
pub fn balance_channel(capacity: usize) -> (Channel, BalanceChannelConsumer) {
    let (channel, tx) = Channel::balance_channel(capacity);
    (channel, BalanceChannelConsumer::new(tx))
}

impl BalanceChannelConsumer {
    pub fn new(tx: mpsc::Sender<Change<String, Endpoint>>) -> Self {
        Self {
            tx,
            applied: Mutex::new(HashSet::new()),
            connect_timeout: None,
            request_timeout: None,
        }
    }

    pub fn with_connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Addresses currently inserted into the channel
    pub async fn applied(&self) -> HashSet<String> {
        self.applied.lock().await.clone()
    }

    fn endpoint(
        &self,
        addr: &str,
    ) -> Option<Endpoint> {
        let mut endpoint = match Endpoint::from_shared(endpoint_uri(addr)) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(%addr, "skipping unparsable address: {}", e);
                return None;
            }
        };
        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }
        if let Some(timeout) = self.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }
        Some(endpoint)
    }
}

#[async_trait]
impl AddressConsumer for BalanceChannelConsumer {
    async fn update_state(
        &self,
        state: ResolvedState,
    ) {
        let wanted: HashSet<String> = state.addresses.into_iter().map(|a| a.addr).collect();
        let mut applied = self.applied.lock().await;

        let removed: Vec<String> = applied.difference(&wanted).cloned().collect();
        for addr in removed {
            if self.tx.send(Change::Remove(addr.clone())).await.is_err() {
                debug!("balance channel dropped, ignoring update");
                return;
            }
            applied.remove(&addr);
        }

        let added: Vec<String> = wanted.difference(&applied).cloned().collect();
        for addr in added {
            let Some(endpoint) = self.endpoint(&addr) else {
                continue;
            };
            if self.tx.send(Change::Insert(addr.clone(), endpoint)).await.is_err() {
                debug!("balance channel dropped, ignoring update");
                return;
            }
            applied.insert(addr);
        }
    }
}

/// `host:port` -> `http://host:port`, leaving explicit schemes alone
pub(crate) fn endpoint_uri(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}
