//! HTTP request handlers
//!
//! Playback verbs are fire-and-forget: the handler spawns the operation and
//! answers 202 immediately; outcomes arrive on the event stream. Queue edits
//! answer synchronously because their validation is part of the contract.

use crate::api::server::AppContext;
use crate::error::Error;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct PlayAtRequest {
    index: usize,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    entries: Vec<QueueEntryInfo>,
    cursor: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct QueueEntryInfo {
    index: usize,
    query: String,
    meta: String,
    current: bool,
}

fn accepted() -> (StatusCode, Json<StatusResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(StatusResponse {
            status: "accepted".to_string(),
        }),
    )
}

/// POST /playback/enqueue-log - rebuild the queue from the reference log
pub async fn enqueue_log(State(ctx): State<AppContext>) -> (StatusCode, Json<StatusResponse>) {
    tokio::spawn(async move {
        if let Err(e) = ctx.sequencer.enqueue_log().await {
            warn!("enqueue-log failed: {}", e);
        }
    });
    accepted()
}

/// POST /playback/next
pub async fn next(State(ctx): State<AppContext>) -> (StatusCode, Json<StatusResponse>) {
    tokio::spawn(async move {
        if let Err(e) = ctx.sequencer.next().await {
            warn!("next failed: {}", e);
        }
    });
    accepted()
}

/// POST /playback/previous
pub async fn previous(State(ctx): State<AppContext>) -> (StatusCode, Json<StatusResponse>) {
    tokio::spawn(async move {
        if let Err(e) = ctx.sequencer.previous().await {
            warn!("previous failed: {}", e);
        }
    });
    accepted()
}

/// POST /playback/stop
pub async fn stop(State(ctx): State<AppContext>) -> (StatusCode, Json<StatusResponse>) {
    tokio::spawn(async move {
        if let Err(e) = ctx.sequencer.stop().await {
            warn!("stop failed: {}", e);
        }
    });
    accepted()
}

/// POST /playback/play-at - jump to a queue position
pub async fn play_at(
    State(ctx): State<AppContext>,
    Json(req): Json<PlayAtRequest>,
) -> Result<(StatusCode, Json<StatusResponse>), StatusCode> {
    let (entries, _) = ctx.sequencer.queue_snapshot();
    if req.index >= entries.len() {
        return Err(StatusCode::NOT_FOUND);
    }
    tokio::spawn(async move {
        if let Err(e) = ctx.sequencer.play_at(req.index).await {
            warn!("play-at failed: {}", e);
        }
    });
    Ok(accepted())
}

/// GET /playback/queue
pub async fn get_queue(State(ctx): State<AppContext>) -> Json<QueueResponse> {
    let (entries, cursor) = ctx.sequencer.queue_snapshot();
    let entries = entries
        .into_iter()
        .enumerate()
        .map(|(index, e)| QueueEntryInfo {
            index,
            query: e.query,
            meta: e.meta,
            current: cursor == Some(index),
        })
        .collect();
    Json(QueueResponse { entries, cursor })
}

/// DELETE /playback/queue/:index
pub async fn remove(
    State(ctx): State<AppContext>,
    Path(index): Path<usize>,
) -> Result<Json<StatusResponse>, StatusCode> {
    match ctx.sequencer.remove(index).await {
        Ok(()) => Ok(Json(StatusResponse {
            status: "removed".to_string(),
        })),
        Err(Error::Queue(_)) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!("remove failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /playback/queue/clear - conflicts with an in-flight transition
pub async fn clear_queue(
    State(ctx): State<AppContext>,
) -> Result<Json<StatusResponse>, StatusCode> {
    match ctx.sequencer.clear().await {
        Ok(()) => Ok(Json(StatusResponse {
            status: "cleared".to_string(),
        })),
        Err(Error::Busy) => Err(StatusCode::CONFLICT),
        Err(e) => {
            warn!("clear failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
