use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};

use super::{ERROR, ProgressEvent, REVIEW_REQUIRED, WORKFLOW_COMPLETED};

/// SSE event name for client routing.
fn event_name(event: &ProgressEvent) -> &'static str {
    match event.event_type.as_str() {
        ERROR => "error",
        WORKFLOW_COMPLETED => "done",
        REVIEW_REQUIRED => "review",
        _ => "message",
    }
}

pub fn build_sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send>
where
    S: Stream<Item = ProgressEvent> + Send + 'static,
{
    let stream = stream.map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());

        Ok(Event::default()
            .id(event.seq.to_string())
            .event(event_name(&event))
            .data(json))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(event_type: &str) -> ProgressEvent {
        ProgressEvent {
            run_id: "r1".into(),
            seq: 1,
            step: 0,
            event_type: event_type.into(),
            payload: serde_json::Value::Null,
            error: None,
            error_type: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(event_name(&event("error")), "error");
        assert_eq!(event_name(&event("workflow_completed")), "done");
        assert_eq!(event_name(&event("review_required")), "review");
        assert_eq!(event_name(&event("scrape_progress")), "message");
    }
}
