use serde::{Deserialize, Serialize};

/// Reliability values at or above this are treated as percentages.
const RELIABILITY_PERCENT_THRESHOLD: f64 = 2.0;

/// Floor for the ranking denominator so a zero-reliability node never
/// produces an infinite score on its own.
pub const RELIABILITY_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentMetadata {
    pub file_hash: String,
    pub partition_index: usize,
    pub redundancy_index: usize,
    pub double_encrypted: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFragmentRequest {
    pub fragment_id: String,
    /// Fragment ciphertext, base64-encoded.
    pub data: String,
    /// SHA-256 of the raw ciphertext bytes, hex-encoded.
    pub checksum: String,
    pub metadata: FragmentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFragmentResponse {
    pub success: bool,
    pub fragment_id: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveFragmentResponse {
    pub success: bool,
    /// Fragment ciphertext, base64-encoded.
    pub data: String,
    pub checksum: String,
    /// Absent for fragments recovered from a disk scan, where the
    /// original store request is no longer available.
    #[serde(default)]
    pub metadata: Option<FragmentMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub timestamp: u64,
    pub node_id: String,
    pub public_ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub fragment_count: usize,
    pub used_space: u64,
    pub available_space: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// One entry of the directory's `/nodes` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: String,
    pub address: String,
    pub port: u16,
    /// Either a [0,1] fraction or a [0,100] percentage depending on the
    /// directory build; normalize before ranking.
    #[serde(default = "default_reliability")]
    pub reliability: f64,
    #[serde(default)]
    pub available_space: Option<u64>,
}

fn default_reliability() -> f64 {
    1.0
}

impl NodeDescriptor {
    /// Reliability as a [epsilon, 1] fraction regardless of the scale the
    /// directory reports in.
    pub fn normalized_reliability(&self) -> f64 {
        let raw = if self.reliability >= RELIABILITY_PERCENT_THRESHOLD {
            self.reliability / 100.0
        } else {
            self.reliability
        };
        raw.clamp(RELIABILITY_EPSILON, 1.0)
    }

    /// `host:port` as recorded in recovery manifests.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Dialable base URL for the node's fragment service.
    pub fn base_url(&self) -> String {
        if self.address.contains("://") {
            format!("{}:{}", self.address, self.port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesResponse {
    pub nodes: Vec<NodeDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    pub node_id: String,
    pub address: String,
    pub port: u16,
    pub available_space: u64,
    pub total_space: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodeResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub available_space: u64,
    pub fragment_count: usize,
}

/// Best-effort notification that a fragment landed on a node, so the
/// directory can index locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentReport {
    pub fragment_id: String,
    pub node_id: String,
    pub file_hash: String,
    pub partition_index: usize,
}
