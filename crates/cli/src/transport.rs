//! HTTP transport against the directory and the storage-node fragment
//! services, plus latency-based node ranking.

use std::time::{Duration, Instant};

use futures::future::join_all;
use myst_client_sdk::manifest::decode_b64;
use myst_client_sdk::StorageError;
use myst_protocol::{
    NodeDescriptor, NodesResponse, PingResponse, RetrieveFragmentResponse,
    StoreFragmentRequest, StoreFragmentResponse,
};

pub const PING_TIMEOUT: Duration = Duration::from_secs(5);
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-side client for the directory's node index.
#[derive(Clone)]
pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl DirectoryClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn nodes(
        &self,
        count: usize,
        min_space: u64,
    ) -> Result<Vec<NodeDescriptor>, StorageError> {
        let url = format!(
            "{}/nodes?count={count}&minSpace={min_space}",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .timeout(DIRECTORY_TIMEOUT)
            .send()
            .await
            .map_err(|e| StorageError::NodeUnreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::NodeUnreachable(format!(
                "directory returned {}",
                response.status()
            )));
        }
        let body: NodesResponse = response
            .json()
            .await
            .map_err(|e| StorageError::NodeUnreachable(e.to_string()))?;
        Ok(body.nodes)
    }
}

/// A directory node with its measured latency and ranking score.
#[derive(Debug, Clone)]
pub struct RankedNode {
    pub descriptor: NodeDescriptor,
    pub latency_ms: f64,
    pub score: f64,
}

impl RankedNode {
    pub fn reachable(&self) -> bool {
        self.latency_ms.is_finite()
    }
}

/// Score candidates by `latency / reliability` (lower is better) and
/// sort ascending; unreachable nodes sink to the tail with an infinite
/// score.
pub fn rank_nodes(nodes: Vec<NodeDescriptor>, latencies: Vec<Option<f64>>) -> Vec<RankedNode> {
    let mut ranked: Vec<RankedNode> = nodes
        .into_iter()
        .zip(latencies)
        .map(|(descriptor, latency)| {
            let latency_ms = latency.unwrap_or(f64::INFINITY);
            let score = latency_ms / descriptor.normalized_reliability();
            RankedNode {
                descriptor,
                latency_ms,
                score,
            }
        })
        .collect();
    ranked.sort_by(|a, b| a.score.total_cmp(&b.score));
    ranked
}

/// Per-node fragment operations.
#[derive(Clone)]
pub struct NodeClient {
    http: reqwest::Client,
}

impl NodeClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Round-trip latency of the node's `/ping`, or `None` when it does
    /// not answer in time.
    pub async fn ping(&self, base_url: &str) -> Option<f64> {
        let started = Instant::now();
        let response = self
            .http
            .get(format!("{base_url}/ping"))
            .timeout(PING_TIMEOUT)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let _: PingResponse = response.json().await.ok()?;
        Some(started.elapsed().as_secs_f64() * 1000.0)
    }

    /// Probe and rank a candidate set concurrently.
    pub async fn rank(&self, nodes: Vec<NodeDescriptor>) -> Vec<RankedNode> {
        let base_urls: Vec<String> = nodes.iter().map(|n| n.base_url()).collect();
        let latencies = join_all(base_urls.iter().map(|u| self.ping(u))).await;
        rank_nodes(nodes, latencies)
    }

    pub async fn store(
        &self,
        base_url: &str,
        request: &StoreFragmentRequest,
    ) -> Result<StoreFragmentResponse, StorageError> {
        let response = self
            .http
            .post(format!("{base_url}/store"))
            .timeout(TRANSFER_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(|e| StorageError::NodeUnreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::NodeUnreachable(format!(
                "store returned {}",
                response.status()
            )));
        }
        let body: StoreFragmentResponse = response
            .json()
            .await
            .map_err(|e| StorageError::NodeUnreachable(e.to_string()))?;
        if !body.success {
            return Err(StorageError::NodeUnreachable(
                "node rejected the fragment".to_string(),
            ));
        }
        Ok(body)
    }

    /// Fetch a fragment's ciphertext. A 404 is a soft miss; any other
    /// failure (including a node-detected corruption 500) is treated the
    /// same at the replica level.
    pub async fn retrieve(
        &self,
        base_url: &str,
        fragment_id: &str,
    ) -> Result<Vec<u8>, StorageError> {
        let response = self
            .http
            .get(format!("{base_url}/retrieve/{fragment_id}"))
            .timeout(TRANSFER_TIMEOUT)
            .send()
            .await
            .map_err(|e| StorageError::NodeUnreachable(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::FragmentNotFound);
        }
        if !response.status().is_success() {
            return Err(StorageError::NodeUnreachable(format!(
                "retrieve returned {}",
                response.status()
            )));
        }
        let body: RetrieveFragmentResponse = response
            .json()
            .await
            .map_err(|e| StorageError::NodeUnreachable(e.to_string()))?;
        if !body.success {
            return Err(StorageError::FragmentNotFound);
        }
        decode_b64(&body.data, "fragment data")
    }
}

/// Base URL for a `host:port` endpoint recorded in a manifest.
pub fn endpoint_base_url(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, reliability: f64) -> NodeDescriptor {
        NodeDescriptor {
            id: id.to_string(),
            address: "10.0.0.1".into(),
            port: 9100,
            reliability,
            available_space: None,
        }
    }

    #[test]
    fn ranking_prefers_low_latency_over_high() {
        let nodes = vec![descriptor("slow", 1.0), descriptor("fast", 1.0)];
        let ranked = rank_nodes(nodes, vec![Some(80.0), Some(10.0)]);
        assert_eq!(ranked[0].descriptor.id, "fast");
        assert_eq!(ranked[1].descriptor.id, "slow");
    }

    #[test]
    fn reliability_breaks_latency_ties() {
        let nodes = vec![descriptor("flaky", 0.5), descriptor("solid", 1.0)];
        let ranked = rank_nodes(nodes, vec![Some(20.0), Some(20.0)]);
        assert_eq!(ranked[0].descriptor.id, "solid");
    }

    #[test]
    fn unreachable_nodes_sink_to_the_tail() {
        let nodes = vec![descriptor("dead", 1.0), descriptor("alive", 0.1)];
        let ranked = rank_nodes(nodes, vec![None, Some(500.0)]);
        assert_eq!(ranked[0].descriptor.id, "alive");
        assert!(!ranked[1].reachable());
    }

    #[test]
    fn percentage_reliability_ranks_like_fraction() {
        let nodes = vec![descriptor("pct", 90.0), descriptor("frac", 0.9)];
        let ranked = rank_nodes(nodes, vec![Some(30.0), Some(30.0)]);
        assert!((ranked[0].score - ranked[1].score).abs() < 1e-9);
    }

    #[test]
    fn endpoint_base_url_prepends_scheme() {
        assert_eq!(endpoint_base_url("10.1.2.3:9100"), "http://10.1.2.3:9100");
        assert_eq!(
            endpoint_base_url("https://node.example:9100"),
            "https://node.example:9100"
        );
    }
}
