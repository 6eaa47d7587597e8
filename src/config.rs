//! # Summary
//!
//! Static description of a node and the cluster around it, and the entry
//! point that wires a node's tasks together.
//!
//! Clusters are described by a JSON file shared by every node:
//!
//! ```json
//! { "nodes": { "1": "127.0.0.1:4001", "2": "127.0.0.1:4002" }, "timeout_ms": 1000 }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::error::{Error, Result};
use crate::internal;
use crate::node::Node;
use crate::shared::Shared;
use crate::storage::Storage;
use crate::thread;

const DEFAULT_TIMEOUT_MS: u64 = 1000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".")
}

/// On-disk cluster description.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Cluster {
    /// Address of every node, keyed by node ID
    pub nodes: BTreeMap<usize, String>,

    /// Liveness timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Directory holding each node's log
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Unique node ID
    id: usize,

    /// Address of every node, including this one
    nodes: BTreeMap<usize, String>,

    /// Timeout for detecting unresponsive peers
    timeout: Duration,

    /// Directory holding this node's log
    storage_dir: PathBuf,
}

impl Config {
    pub fn new(id: usize, nodes: BTreeMap<usize, String>) -> Result<Self> {
        if !nodes.contains_key(&id) {
            return Err(Error::Config(format!("node {} is not part of the cluster", id)))
        }
        if !nodes.keys().cloned().eq(1..=nodes.len()) {
            return Err(Error::Config(String::from("node IDs must be exactly 1 through the cluster size")))
        }
        Ok(Config {
            id,
            nodes,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            storage_dir: default_storage_dir(),
        })
    }

    /// Reads a JSON cluster description and picks out node `id`.
    pub fn from_file<P: AsRef<Path>>(path: P, id: usize) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let cluster: Cluster = serde_json::from_reader(std::io::BufReader::new(file))?;
        Self::from_cluster(cluster, id)
    }

    pub fn from_cluster(cluster: Cluster, id: usize) -> Result<Self> {
        let config = Config::new(id, cluster.nodes)?
            .with_timeout(Duration::from_millis(cluster.timeout_ms))
            .with_storage_dir(cluster.storage_dir);
        config.validate()?;
        Ok(config)
    }

    /// Timers and reconnect backoff all tick at fractions of the timeout.
    fn validate(&self) -> Result<()> {
        if self.timeout / 4 == Duration::from_millis(0) {
            return Err(Error::Config(format!("timeout of {:?} is too short", self.timeout)))
        }
        Ok(())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_storage_dir<P: Into<PathBuf>>(mut self, storage_dir: P) -> Self {
        self.storage_dir = storage_dir.into();
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Every node ID in ascending order.
    pub fn ids(&self) -> Vec<usize> {
        self.nodes.keys().cloned().collect()
    }

    pub fn address(&self, id: usize) -> Option<&str> {
        self.nodes.get(&id).map(String::as_str)
    }

    /// Runs this node until its log fails.
    pub async fn run(self) -> Result<()> {
        self.validate()?;
        let ids = self.ids();
        let (storage, recovered) = Storage::open(&self.storage_dir, self.id)?;
        let (event_rx, event_tx) = internal::new();
        let shared_tx = Shared::new(self.id, event_tx);

        let address = self.address(self.id).unwrap_or_default();
        let listener = TcpListener::bind(address).await?;
        info!("node {} listening on {}", self.id, address);
        tokio::spawn(thread::listen(listener, shared_tx.clone()));

        for peer_id in ids.iter().cloned().filter(|peer_id| *peer_id != self.id) {
            let queue = shared_tx.write().register_peer(peer_id);
            let address = self.address(peer_id).unwrap_or_default().to_string();
            let connector = thread::peer::Connector::new(
                self.id,
                peer_id,
                address,
                queue,
                self.timeout,
            );
            tokio::spawn(connector.run());
        }

        tokio::spawn(thread::timer::monitor(shared_tx.clone(), self.timeout));
        tokio::spawn(thread::timer::heartbeat(shared_tx.clone(), self.timeout));

        Node::new(self.id, &ids, storage, recovered, shared_tx)
            .run(event_rx)
            .await
    }
}
