//! Server-sent events push channel.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::{
    extract::{Query, State},
    response::sse::{self, Sse},
};
use reel_events::{EventBus, EventEnvelope};
use reel_torrent_core::InfoHash;
use serde::Deserialize;
use tracing::warn;

use crate::http::constants::SSE_KEEP_ALIVE_SECS;
use crate::http::errors::ApiError;
use crate::state::ApiState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SseQuery {
    #[serde(default)]
    pub(crate) hash: Option<String>,
}

pub(crate) async fn stream_events(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<sse::Event, Infallible>> + Send>, ApiError>
{
    let filter = query
        .hash
        .as_deref()
        .map(InfoHash::parse)
        .transpose()
        .map_err(ApiError::from)?;

    Ok(Sse::new(event_sse_stream(state.events.clone(), filter)).keep_alive(
        sse::KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS))
            .text("keep-alive"),
    ))
}

/// Session-scoped events must match the filter; engine-wide events always pass.
pub(crate) fn matches_filter(envelope: &EventEnvelope, filter: Option<&InfoHash>) -> bool {
    match (filter, envelope.event.hash()) {
        (Some(wanted), Some(hash)) => wanted.as_str() == hash,
        _ => true,
    }
}

fn event_sse_stream(
    events: EventBus,
    filter: Option<InfoHash>,
) -> impl futures_core::Stream<Item = Result<sse::Event, Infallible>> + Send {
    stream! {
        let mut subscription = events.subscribe();
        while let Some(envelope) = subscription.next().await {
            if !matches_filter(&envelope, filter.as_ref()) {
                continue;
            }
            match serde_json::to_string(&envelope) {
                Ok(payload) => {
                    yield Ok(sse::Event::default()
                        .id(envelope.id.to_string())
                        .event(envelope.event.kind())
                        .data(payload));
                }
                Err(err) => warn!(error = %err, "failed to serialise event"),
            }
        }
    }
}
