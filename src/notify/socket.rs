//! WebSocket side of the countdown channel.
//!
//! The subscriber's first text frame must be a `join_timer` message. After
//! that the socket is driven by three tasks: the countdown, a writer that
//! forwards its events, and a reader that only watches for disconnect.
//! Whichever of writer or reader finishes first ends the subscription and
//! the others are aborted, so no countdown outlives its socket.

use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::notify::countdown::{ClientMessage, SubscriptionTracker, TimerEvent, run_countdown};

/// Serve one countdown subscription over an already-split socket.
pub async fn serve_timer<Si, St, E>(
    mut sender: Si,
    mut receiver: St,
    clock: Arc<dyn Clock>,
    tracker: SubscriptionTracker,
) where
    Si: Sink<Message> + Unpin + Send + 'static,
    St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    let _guard = tracker.track();

    let expiry = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                break serde_json::from_str::<ClientMessage>(text.as_str())
                    .ok()
                    .and_then(|msg| msg.expiry());
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => continue,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
        }
    };

    if expiry.is_none() {
        tracing::debug!("Timer subscriber sent no usable expiry");
    }

    let (tx, mut rx) = mpsc::channel::<TimerEvent>(4);
    let countdown = tokio::spawn(run_countdown(expiry, clock, tx));

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if sender
                .send(Message::Text(event.to_json().into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {},
        _ = &mut recv_task => {},
    }

    countdown.abort();
    send_task.abort();
    recv_task.abort();
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::time::Duration;

    use futures::channel::mpsc as fmpsc;

    use super::*;
    use crate::clock::SystemClock;

    fn text_of(msg: Message) -> serde_json::Value {
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    struct Client {
        outgoing: fmpsc::UnboundedSender<Result<Message, Infallible>>,
        incoming: fmpsc::UnboundedReceiver<Message>,
        task: tokio::task::JoinHandle<()>,
    }

    fn connect(tracker: &SubscriptionTracker) -> Client {
        let (server_tx, incoming) = fmpsc::unbounded::<Message>();
        let (outgoing, server_rx) = fmpsc::unbounded::<Result<Message, Infallible>>();
        let task = tokio::spawn(serve_timer(
            server_tx,
            server_rx,
            Arc::new(SystemClock),
            tracker.clone(),
        ));
        Client {
            outgoing,
            incoming,
            task,
        }
    }

    fn join(expiry: &str) -> Result<Message, Infallible> {
        Ok(Message::Text(
            format!(r#"{{"event":"join_timer","expiry":"{}"}}"#, expiry).into(),
        ))
    }

    #[tokio::test]
    async fn invalid_expiry_gets_immediate_expired() {
        let tracker = SubscriptionTracker::new();
        let mut client = connect(&tracker);

        client.outgoing.unbounded_send(join("not-a-date")).unwrap();

        let first = text_of(client.incoming.next().await.unwrap());
        assert_eq!(first["expired"], true);
        assert!(client.incoming.next().await.is_none());

        client.task.await.unwrap();
        assert_eq!(tracker.live(), 0);
    }

    #[tokio::test]
    async fn valid_expiry_streams_time_left() {
        let tracker = SubscriptionTracker::new();
        let mut client = connect(&tracker);

        let expiry = (chrono::Utc::now() + chrono::TimeDelta::minutes(30)).to_rfc3339();
        client.outgoing.unbounded_send(join(&expiry)).unwrap();

        let first = text_of(client.incoming.next().await.unwrap());
        assert_eq!(first["event"], "time_left");
        assert_eq!(first["expired"], false);
        let left = first["time_left"].as_str().unwrap();
        assert!(left.starts_with("29:") || left.starts_with("30:"), "got {left}");

        client.outgoing.close_channel();
        client.task.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_cancels_countdown() {
        let tracker = SubscriptionTracker::new();
        let mut client = connect(&tracker);

        let expiry = (chrono::Utc::now() + chrono::TimeDelta::hours(2)).to_rfc3339();
        client.outgoing.unbounded_send(join(&expiry)).unwrap();
        let _ = client.incoming.next().await.unwrap();
        assert_eq!(tracker.live(), 1);

        client
            .outgoing
            .unbounded_send(Ok(Message::Close(None)))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), client.task)
            .await
            .expect("subscription should end on close")
            .unwrap();
        assert_eq!(tracker.live(), 0);
    }

    #[tokio::test]
    async fn closing_before_join_ends_quietly() {
        let tracker = SubscriptionTracker::new();
        let mut client = connect(&tracker);

        client.outgoing.close_channel();
        client.task.await.unwrap();
        assert!(client.incoming.next().await.is_none());
        assert_eq!(tracker.live(), 0);
    }
}
