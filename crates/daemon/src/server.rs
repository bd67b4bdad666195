//! HTTP surface of the daemon.
//!
//! One inbound route per concern: the progress callback that spawned encoder
//! processes stream into, plus read-only stats and status endpoints.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use shrinkd_config::ServerConfig;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::progress::{EncodeProgress, ProgressParser};
use crate::scheduler::{Scheduler, SchedulerStatus};
use crate::stats::{collect_stats, EncodeStats};

/// Errors that can occur when running the HTTP server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),
}

/// Handler for POST /api/v1/encode/:entry_id
///
/// Consumes the encoder's streamed `key=value` progress lines for one entry,
/// retaining the latest snapshot. When the stream ends the scheduler frees
/// the slot and either finalizes or applies the retry policy. The response
/// is an empty JSON object regardless of outcome.
async fn encode_progress(
    State(scheduler): State<Arc<Scheduler>>,
    Path(entry_id): Path<i64>,
    body: Body,
) -> Json<serde_json::Value> {
    debug!(entry_id, "encode progress stream opened");

    let mut stream = body.into_data_stream();
    let mut parser = ProgressParser::new();
    let mut snapshot = EncodeProgress::default();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(data) => {
                parser.feed(&data, &mut snapshot);
                scheduler.record_progress(entry_id, snapshot.clone()).await;
                debug!(entry_id, out_time = ?snapshot.out_time, "encode progress");
            }
            Err(err) => {
                warn!(entry_id, error = %err, "encode progress stream aborted");
                break;
            }
        }
    }
    parser.finish(&mut snapshot);

    scheduler.complete_stream(entry_id, snapshot).await;

    Json(serde_json::json!({}))
}

/// Handler for GET /api/v1/encode/stats
///
/// Returns aggregate statistics over all finished jobs in the ledger.
async fn encode_stats(
    State(scheduler): State<Arc<Scheduler>>,
) -> Result<Json<EncodeStats>, StatusCode> {
    match collect_stats(scheduler.ledger()).await {
        Ok(stats) => Ok(Json(stats)),
        Err(err) => {
            error!(error = %err, "failed to collect encode stats");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Handler for GET /api/v1/encode/status
///
/// Returns the currently active encodes with their latest progress
/// snapshots, plus the queued entry ids.
async fn encode_status(State(scheduler): State<Arc<Scheduler>>) -> Json<SchedulerStatus> {
    Json(scheduler.status().await)
}

/// Creates the axum Router with the encode routes
pub fn create_router(scheduler: Arc<Scheduler>) -> Router {
    Router::new()
        .route("/api/v1/encode/stats", get(encode_stats))
        .route("/api/v1/encode/status", get(encode_status))
        .route("/api/v1/encode/:entry_id", post(encode_progress))
        .with_state(scheduler)
}

/// Runs the HTTP server on the configured address.
pub async fn run_server(scheduler: Arc<Scheduler>, server: &ServerConfig) -> Result<(), ServerError> {
    let app = create_router(scheduler);

    let listener = tokio::net::TcpListener::bind((server.host.as_str(), server.port)).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::encoded_path;
    use crate::encode_config::EncodeConfig;
    use crate::ledger::test_support::{create_show_entry_table, insert_show_entry, memory_ledger};
    use crate::ledger::STATE_COMPLETED;
    use crate::probe::FfmpegProbe;
    use axum::http::Request;
    use shrinkd_config::Config;
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_scheduler() -> Arc<Scheduler> {
        let ledger = memory_ledger().await;
        create_show_entry_table(&ledger).await;

        let mut config = Config::default();
        config.encoder.ffmpeg_path = "true".to_string();

        let scheduler = Arc::new(Scheduler::with_probe(
            ledger,
            config,
            FfmpegProbe::assume(true),
        ));

        EncodeConfig::refresh(scheduler.ledger().pool()).await.unwrap();
        sqlx::query("UPDATE encode_config SET enabled = 1 WHERE id = 0")
            .execute(scheduler.ledger().pool())
            .await
            .unwrap();

        scheduler
    }

    #[tokio::test]
    async fn test_progress_stream_finalizes_on_end_marker() {
        let scheduler = test_scheduler().await;
        let temp_dir = TempDir::new().unwrap();
        let original = temp_dir.path().join("episode.mkv");
        fs::write(&original, b"big original").unwrap();
        insert_show_entry(scheduler.ledger(), 1, original.to_str(), STATE_COMPLETED).await;

        scheduler.submit(1).await;
        fs::write(encoded_path(&original), b"small").unwrap();

        let app = create_router(scheduler.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/encode/1")
                    .body(Body::from(
                        "frame=100\nout_time=00:01:00.000000\nprogress=end\n",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        // empty JSON object ack
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"{}");

        // job closed and file replaced
        let job = scheduler.ledger().job(1).await.unwrap().unwrap();
        assert!(job.ended_at.is_some());
        assert_eq!(job.final_size, Some(5));
        assert_eq!(fs::read(&original).unwrap(), b"small");
    }

    #[tokio::test]
    async fn test_progress_stream_without_end_marker_applies_retry_policy() {
        let scheduler = test_scheduler().await;
        let temp_dir = TempDir::new().unwrap();
        let original = temp_dir.path().join("episode.mkv");
        fs::write(&original, b"big original").unwrap();
        insert_show_entry(scheduler.ledger(), 1, original.to_str(), STATE_COMPLETED).await;

        scheduler.submit(1).await;

        let app = create_router(scheduler.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/encode/1")
                    .body(Body::from("frame=100\nprogress=continue\n"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        // retry is off by default: the attempt is forgotten
        assert!(scheduler.ledger().job(1).await.unwrap().is_none());
        assert!(scheduler.status().await.active.is_empty());
    }

    #[tokio::test]
    async fn test_progress_ack_for_unknown_entry() {
        let scheduler = test_scheduler().await;

        let app = create_router(scheduler);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/encode/404")
                    .body(Body::from("progress=end\n"))
                    .unwrap(),
            )
            .await
            .unwrap();

        // still an empty ack; the outcome is only logged
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"{}");
    }

    #[tokio::test]
    async fn test_stats_route_on_empty_ledger() {
        let scheduler = test_scheduler().await;

        let app = create_router(scheduler);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/encode/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let stats: EncodeStats = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats, EncodeStats::default());
    }

    #[tokio::test]
    async fn test_status_route_reports_active_and_queued() {
        let scheduler = test_scheduler().await;
        sqlx::query("UPDATE encode_config SET maximum_encodes = 1 WHERE id = 0")
            .execute(scheduler.ledger().pool())
            .await
            .unwrap();

        let temp_dir = TempDir::new().unwrap();
        for id in 1..=2 {
            let path = temp_dir.path().join(format!("{}.mkv", id));
            fs::write(&path, b"content").unwrap();
            insert_show_entry(scheduler.ledger(), id, path.to_str(), STATE_COMPLETED).await;
            scheduler.submit(id).await;
        }

        let app = create_router(scheduler);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/encode/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status["active"][0]["entry_id"], 1);
        assert_eq!(status["queued"][0], 2);
    }
}
