//! Server-push event stream for UI subscribers.
//!
//! `GET /api/events/stream` delivers the fan-out as Server-Sent Events, one
//! JSON object per event. The subscription starts at connect time (no
//! backfill); a subscriber that lags receives a `desynchronized` event and
//! is expected to reconcile with `GET /api/calls`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tracing::debug;

use crate::state::AppState;

/// `GET /api/events/stream`
pub async fn event_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.orchestrator.hub().subscribe();

    let stream = async_stream::stream! {
        debug!("event stream subscriber connected");
        while let Some(event) = subscription.next().await {
            match serde_json::to_string(&event) {
                Ok(payload) => yield Ok(Event::default().data(payload)),
                Err(e) => {
                    // Serialize failures are a programming error; skip the
                    // event rather than killing the stream
                    tracing::error!("failed to serialize event: {e}");
                }
            }
        }
        debug!("event hub closed, ending stream");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
