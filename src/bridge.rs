//! Event bridge: the bus's standing subscriber.
//!
//! Every bus event is fanned two ways: to the SSE broadcaster (delivered to
//! all stream clients) and to the subscription hub, published under
//! `sessions:<session>` when the event names a session and `global:events`
//! otherwise.

use std::sync::Arc;

use chrono::SecondsFormat;
use serde_json::json;

use crate::{
    bus::{Bus, Event},
    hub::Hub,
    sse::{SseBroadcaster, SseEvent},
};

pub const GLOBAL_TOPIC: &str = "global:events";

fn hub_topic(event: &Event) -> String {
    match &event.session {
        Some(session) => format!("sessions:{session}"),
        None => GLOBAL_TOPIC.to_string(),
    }
}

/// Wires the bridge onto the bus. Called once at startup.
pub fn attach(bus: &Bus, hub: Hub, sse: Arc<SseBroadcaster>) {
    bus.on(move |event: Event| {
        let hub = hub.clone();
        let sse = sse.clone();
        async move {
            sse.broadcast(SseEvent {
                event_type: event.event_type.clone(),
                data: json!({
                    "timestamp": event
                        .timestamp
                        .to_rfc3339_opts(SecondsFormat::Nanos, true),
                    "session": event.session.clone(),
                    "data": event.data.clone(),
                }),
            });

            hub.publish(hub_topic(&event), event.event_type, event.data);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{AllowAll, ClientInfo};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn session_events_route_to_session_topic() {
        let bus = Bus::new();
        let hub = Hub::spawn(Arc::new(AllowAll));
        let sse = SseBroadcaster::new();
        attach(&bus, hub.clone(), sse.clone());

        let info = ClientInfo::new("watcher".into(), None);
        info.subscribe(&["sessions:*".to_string(), GLOBAL_TOPIC.to_string()]);
        let mut rx = hub.register(info).await;
        let (_sse_id, mut sse_rx) = sse.subscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.emit(Event::new(
            "pane_output",
            Some("alpha".into()),
            json!({"line": "hello"}),
        ))
        .await;

        let frame: Value = serde_json::from_str(
            &timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(frame["topic"], "sessions:alpha");
        assert_eq!(frame["event_type"], "pane_output");

        let sse_event = timeout(Duration::from_secs(1), sse_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sse_event.event_type, "pane_output");
        assert_eq!(sse_event.data["session"], "alpha");
    }

    #[tokio::test]
    async fn sessionless_events_route_to_global_topic() {
        let bus = Bus::new();
        let hub = Hub::spawn(Arc::new(AllowAll));
        let sse = SseBroadcaster::new();
        attach(&bus, hub.clone(), sse.clone());

        let info = ClientInfo::new("watcher".into(), None);
        info.subscribe(&["global:*".to_string()]);
        let mut rx = hub.register(info).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.emit(Event::new("job_status", None, json!({"status": "done"})))
            .await;

        let frame: Value = serde_json::from_str(
            &timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(frame["topic"], GLOBAL_TOPIC);
    }
}
