use crate::manager::Subscription;
use crate::payload::Payload;
use async_stream::stream;
use axum::response::sse::Event;
use futures_util::{Stream, StreamExt};
use log::*;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Data of the synthetic keep-alive event. Upstream payloads are forwarded
/// as-is, so clients tell heartbeats apart by this exact shape.
pub const HEARTBEAT_DATA: &str = r#"{"type":"ping"}"#;

/// One item of a client's filtered stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Payload(Arc<Payload>),
    Heartbeat,
}

impl StreamItem {
    /// Text written after `data: ` on the wire.
    pub fn data(&self) -> &str {
        match self {
            StreamItem::Payload(payload) => payload.encoded(),
            StreamItem::Heartbeat => HEARTBEAT_DATA,
        }
    }

    pub fn to_event(&self) -> Event {
        Event::default().data(self.data())
    }
}

/// Merges a subscription's payloads with periodic heartbeats, in arrival order.
///
/// A heartbeat is emitted after a full heartbeat interval passes without any
/// item; every payload restarts that interval. The stream ends when the
/// subscription is ended upstream. Dropping the stream (the client went away)
/// drops the subscription, which deregisters it and releases the timer.
pub fn session_items(subscription: Subscription) -> impl Stream<Item = StreamItem> {
    stream! {
        let mut subscription = subscription;
        let period = subscription.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let item = tokio::select! {
                biased;

                payload = subscription.recv() => match payload {
                    Some(payload) => {
                        heartbeat.reset();
                        StreamItem::Payload(payload)
                    }
                    None => break,
                },
                _ = heartbeat.tick() => StreamItem::Heartbeat,
            };
            yield item;
        }

        debug!(
            "Session stream {} for session {} ended by upstream",
            subscription.connection_id().as_str(),
            subscription.session_id()
        );
    }
}

/// [`session_items`] rendered as axum SSE events (`data: <json>\n\n`).
pub fn session_events(
    subscription: Subscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    session_items(subscription).map(|item| Ok(item.to_event()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::detached_subscription;
    use crate::matcher::SessionMatcher;
    use serde_json::json;
    use std::time::Duration;

    const PERIOD: Duration = Duration::from_secs(25);

    fn payload_for(session_id: &str, n: u32) -> Arc<Payload> {
        Arc::new(Payload::new(json!({"sessionID": session_id, "n": n})))
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_emits_one_heartbeat_per_period() {
        let (_shared, subscription) = detached_subscription("abc", PERIOD);
        let items = session_items(subscription);
        futures_util::pin_mut!(items);
        let start = Instant::now();

        for period in 1..=3 {
            assert_eq!(items.next().await, Some(StreamItem::Heartbeat));
            assert_eq!(start.elapsed(), PERIOD * period);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_restarts_heartbeat_interval() {
        let (shared, subscription) = detached_subscription("abc", PERIOD);
        let matcher = SessionMatcher::default();
        let items = session_items(subscription);
        futures_util::pin_mut!(items);

        tokio::time::sleep(Duration::from_secs(20)).await;
        shared.registry.dispatch(&payload_for("abc", 1), &matcher);
        let sent_at = Instant::now();

        assert_eq!(items.next().await, Some(StreamItem::Payload(payload_for("abc", 1))));
        assert_eq!(items.next().await, Some(StreamItem::Heartbeat));
        assert_eq!(sent_at.elapsed(), PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payloads_keep_upstream_order_and_filtering() {
        let (shared, subscription) = detached_subscription("abc", PERIOD);
        let matcher = SessionMatcher::default();
        let items = session_items(subscription);
        futures_util::pin_mut!(items);

        for (session_id, n) in [("abc", 1), ("other", 2), ("abc", 3), ("abc", 4)] {
            shared.registry.dispatch(&payload_for(session_id, n), &matcher);
        }

        let mut received = Vec::new();
        for _ in 0..3 {
            match items.next().await {
                Some(StreamItem::Payload(payload)) => received.push(payload.value()["n"].clone()),
                other => panic!("unexpected item {other:?}"),
            }
        }
        assert_eq!(received, vec![json!(1), json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn test_stream_ends_when_registration_is_closed() {
        let (shared, subscription) = detached_subscription("abc", PERIOD);
        let items = session_items(subscription);
        futures_util::pin_mut!(items);

        shared.registry.close_all();

        assert_eq!(items.next().await, None);
    }

    #[tokio::test]
    async fn test_dropping_the_stream_deregisters_the_client() {
        let (shared, subscription) = detached_subscription("abc", PERIOD);
        let items = Box::pin(session_items(subscription));
        assert_eq!(shared.registry.session_connections("abc"), 1);

        drop(items);

        assert!(shared.registry.is_empty());
        let outcome = shared
            .registry
            .dispatch(&payload_for("abc", 1), &SessionMatcher::default());
        assert_eq!(outcome.delivered, 0);
    }

    #[test]
    fn test_wire_data() {
        assert_eq!(StreamItem::Heartbeat.data(), "{\"type\":\"ping\"}");
        assert_eq!(
            StreamItem::Payload(payload_for("abc", 7)).data(),
            "{\"sessionID\":\"abc\",\"n\":7}"
        );
    }
}
