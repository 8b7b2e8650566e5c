//! Server-Sent Events stream of relay events

use crate::api::server::AppContext;
use crate::events::RelayEvent;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// GET /events - SSE mirror of the broadcast bus
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("new SSE client connected");
    let rx = ctx.events.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event_type_str(&event)).data(json))),
                Err(e) => {
                    warn!("failed to serialize event: {}", e);
                    None
                }
            },
            Err(e) => {
                // Lagged or closed receiver; the client just misses events
                warn!("SSE stream error: {:?}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn event_type_str(event: &RelayEvent) -> &'static str {
    match event {
        RelayEvent::TrackStarted { .. } => "TrackStarted",
        RelayEvent::Resolving { .. } => "Resolving",
        RelayEvent::ResolveFailed { .. } => "ResolveFailed",
        RelayEvent::PreloadFailed { .. } => "PreloadFailed",
        RelayEvent::EndOfQueue { .. } => "EndOfQueue",
        RelayEvent::TopOfQueue { .. } => "TopOfQueue",
        RelayEvent::QueueChanged { .. } => "QueueChanged",
        RelayEvent::TransitionBusy { .. } => "TransitionBusy",
        RelayEvent::StreamStopped { .. } => "StreamStopped",
        RelayEvent::FormatWarning { .. } => "FormatWarning",
        RelayEvent::RendererPreempted { .. } => "RendererPreempted",
        RelayEvent::PlayerError { .. } => "PlayerError",
    }
}
