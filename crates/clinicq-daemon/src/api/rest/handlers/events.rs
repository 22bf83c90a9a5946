//! Event streaming handlers

use crate::api::rest::state::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use clinicq_types::CounterId;
use futures_util::stream::{self, Stream};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Stream the notifications concerning one counter via SSE
pub async fn stream_counter_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let counter_id = CounterId::new(id);
    let rx = state.flow.subscribe();

    let stream = stream::unfold((rx, counter_id), |(mut rx, counter_id)| async move {
        loop {
            match rx.recv().await {
                Ok(envelope) if envelope.notification.counter_id == counter_id => {
                    let json = serde_json::to_string(&envelope).unwrap_or_default();
                    let event = Event::default()
                        .event(envelope.notification.status.to_string())
                        .data(json);
                    return Some((Ok(event), (rx, counter_id)));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event stream lagged");
                    return Some((Ok(Event::default().comment("lagged")), (rx, counter_id)));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
