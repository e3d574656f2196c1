//! Axum fragment service: `/store`, `/retrieve/{id}`, `/ping`, and
//! `/health`. Table and used-space mutations are serialized behind one
//! `RwLock`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use myst_protocol::{
    ErrorResponse, FragmentReport, HealthResponse, PingResponse,
    RetrieveFragmentResponse, StoreFragmentRequest, StoreFragmentResponse,
};
use tokio::sync::RwLock;

use crate::directory::DirectoryClient;
use crate::store::{FragmentStore, StoreError};

pub struct AppState {
    pub store: RwLock<FragmentStore>,
    pub node_id: String,
    pub public_addr: String,
    pub directory: Option<DirectoryClient>,
    pub started_at: Instant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/store", post(store_fragment))
        .route("/retrieve/:fragment_id", get(retrieve_fragment))
        .route("/ping", get(ping))
        .route("/health", get(health))
        .with_state(state)
}

async fn store_fragment(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StoreFragmentRequest>,
) -> Response {
    let bytes = match BASE64.decode(&request.data) {
        Ok(bytes) => bytes,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("fragment data is not valid base64: {err}"),
            );
        }
    };

    let result = {
        let mut store = state.store.write().await;
        store.store(
            &request.fragment_id,
            &bytes,
            &request.checksum,
            request.metadata.clone(),
        )
    };

    match result {
        Ok(size) => {
            tracing::info!(
                fragment_id = %request.fragment_id,
                size,
                partition = request.metadata.partition_index,
                "fragment stored"
            );
            if let Some(directory) = state.directory.clone() {
                let report = FragmentReport {
                    fragment_id: request.fragment_id.clone(),
                    node_id: state.node_id.clone(),
                    file_hash: request.metadata.file_hash.clone(),
                    partition_index: request.metadata.partition_index,
                };
                tokio::spawn(async move {
                    directory.report_fragment(&report).await;
                });
            }
            Json(StoreFragmentResponse {
                success: true,
                fragment_id: request.fragment_id,
                size,
            })
            .into_response()
        }
        Err(err @ StoreError::InsufficientSpace { .. }) => {
            error_response(StatusCode::INSUFFICIENT_STORAGE, err.to_string())
        }
        Err(err @ (StoreError::ChecksumMismatch { .. } | StoreError::InvalidFragmentId)) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        Err(err) => {
            tracing::error!(%err, "fragment store failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

async fn retrieve_fragment(
    State(state): State<Arc<AppState>>,
    Path(fragment_id): Path<String>,
) -> Response {
    let result = {
        let mut store = state.store.write().await;
        store.read(&fragment_id)
    };

    match result {
        Ok((bytes, record)) => Json(RetrieveFragmentResponse {
            success: true,
            data: BASE64.encode(&bytes),
            checksum: record.checksum,
            metadata: record.metadata,
        })
        .into_response(),
        Err(StoreError::UnknownFragment) => {
            error_response(StatusCode::NOT_FOUND, "unknown fragment".to_string())
        }
        Err(err) => {
            tracing::error!(%fragment_id, %err, "fragment retrieve failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

async fn ping(State(state): State<Arc<AppState>>) -> Json<PingResponse> {
    Json(PingResponse {
        timestamp: chrono::Utc::now().timestamp_millis() as u64,
        node_id: state.node_id.clone(),
        public_ip: state.public_addr.clone(),
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = state.store.read().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: state.node_id.clone(),
        fragment_count: store.fragment_count(),
        used_space: store.used(),
        available_space: store.available(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use myst_protocol::FragmentMetadata;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(capacity_gb: u64) -> (Arc<AppState>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FragmentStore::open(dir.path(), capacity_gb).unwrap();
        let state = Arc::new(AppState {
            store: RwLock::new(store),
            node_id: "aabbccdd".to_string(),
            public_addr: "127.0.0.1:9100".to_string(),
            directory: None,
            started_at: Instant::now(),
        });
        (state, dir)
    }

    fn store_request(fragment_id: &str, payload: &[u8]) -> Request<Body> {
        let checksum = hex::encode(Sha256::digest(payload));
        let body = StoreFragmentRequest {
            fragment_id: fragment_id.to_string(),
            data: BASE64.encode(payload),
            checksum,
            metadata: FragmentMetadata {
                file_hash: "ee".repeat(32),
                partition_index: 1,
                redundancy_index: 0,
                double_encrypted: true,
                timestamp: 1_753_000_000_000,
            },
        };
        Request::post("/store")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn fragment_id(byte: u8) -> String {
        hex::encode([byte; 32])
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trip() {
        let (state, _dir) = test_state(1);
        let app = router(state);
        let id = fragment_id(1);
        let payload = b"fragment ciphertext bytes";

        let response = app
            .clone()
            .oneshot(store_request(&id, payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stored: StoreFragmentResponse = body_json(response).await;
        assert!(stored.success);
        assert_eq!(stored.size, payload.len() as u64);

        let response = app
            .oneshot(
                Request::get(format!("/retrieve/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let retrieved: RetrieveFragmentResponse = body_json(response).await;
        assert!(retrieved.success);
        assert_eq!(BASE64.decode(retrieved.data).unwrap(), payload);
        assert_eq!(retrieved.metadata.unwrap().partition_index, 1);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_a_bad_request() {
        let (state, _dir) = test_state(1);
        let mut request = store_request(&fragment_id(2), b"original");
        // Rewrite the body with a checksum that does not match the data.
        let body = StoreFragmentRequest {
            fragment_id: fragment_id(2),
            data: BASE64.encode(b"original"),
            checksum: "0".repeat(64),
            metadata: FragmentMetadata {
                file_hash: "ee".repeat(32),
                partition_index: 0,
                redundancy_index: 0,
                double_encrypted: true,
                timestamp: 0,
            },
        };
        *request.body_mut() = Body::from(serde_json::to_vec(&body).unwrap());

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn full_node_refuses_with_507() {
        let (state, _dir) = test_state(0);
        let response = router(state)
            .oneshot(store_request(&fragment_id(3), b"no room"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INSUFFICIENT_STORAGE);
    }

    #[tokio::test]
    async fn unknown_fragment_is_not_found() {
        let (state, _dir) = test_state(1);
        let response = router(state)
            .oneshot(
                Request::get(format!("/retrieve/{}", fragment_id(4)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn corrupted_fragment_is_a_server_error() {
        let (state, dir) = test_state(1);
        let app = router(Arc::clone(&state));
        let id = fragment_id(5);

        let response = app
            .clone()
            .oneshot(store_request(&id, b"pristine bytes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        std::fs::write(dir.path().join(format!("{id}.frag")), b"drifted").unwrap();

        let response = app
            .oneshot(
                Request::get(format!("/retrieve/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn ping_reports_identity() {
        let (state, _dir) = test_state(1);
        let response = router(state)
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ping: PingResponse = body_json(response).await;
        assert_eq!(ping.node_id, "aabbccdd");
        assert_eq!(ping.public_ip, "127.0.0.1:9100");
        assert!(ping.timestamp > 0);
    }

    #[tokio::test]
    async fn health_tracks_usage() {
        let (state, _dir) = test_state(1);
        let app = router(Arc::clone(&state));
        let payload = b"counted bytes";
        app.clone()
            .oneshot(store_request(&fragment_id(6), payload))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let health: HealthResponse = body_json(response).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.fragment_count, 1);
        assert_eq!(health.used_space, payload.len() as u64);
        assert_eq!(health.available_space, (1 << 30) - payload.len() as u64);
    }
}
