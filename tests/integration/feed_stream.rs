//! Streaming feeds against a local WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

use ratchet::feeds::order_book::OrderBookProtocol;
use ratchet::feeds::ticker::TickerProtocol;
use ratchet::feeds::StreamingFeed;

use crate::support::fast_feed_settings;

async fn local_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

#[tokio::test]
async fn test_ticker_reconnects_and_keeps_state() {
    let (listener, url) = local_listener().await;

    let server = tokio::spawn(async move {
        // First connection: one price, then the server hangs up.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text(r#"{"c":"100.0"}"#.into())).await.unwrap();
        ws.close(None).await.unwrap();

        // Second connection: a new price, then stay open.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text(r#"{"c":101.0}"#.into())).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let mut feed = StreamingFeed::new(TickerProtocol, fast_feed_settings(url));
    assert!(feed.start().await);

    let mut rx = feed.subscribe();
    timeout(Duration::from_secs(3), async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if snapshot.value.price == Some(101.0) && snapshot.connected {
                    break;
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("feed should reconnect and deliver the second price");

    let snapshot = feed.snapshot();
    assert!(snapshot.reconnects >= 1);
    assert_eq!(snapshot.value.prev_price, Some(100.0));
    // A fresh value resets the backoff to its base.
    assert_eq!(snapshot.backoff, Duration::from_millis(20));

    feed.stop().await;
    assert!(!feed.is_running());
    assert!(!feed.snapshot().connected);
    server.abort();
}

#[tokio::test]
async fn test_order_book_subscribes_and_tracks_mid() {
    let (listener, url) = local_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let subscription = match ws.next().await {
            Some(Ok(Message::Text(text))) => text.as_str().to_string(),
            other => panic!("expected a subscription frame, got {other:?}"),
        };

        let frames = [
            // Other token: ignored.
            r#"{"event_type":"best_bid_ask","asset_id":"no-a","best_bid":"0.30","best_ask":"0.34"}"#,
            r#"[{"event_type":"book","asset_id":"yes-a","bids":[{"price":"0.40","size":"5"},{"price":"0.48","size":"10"}],"asks":[{"price":"0.56","size":"3"},{"price":"0.52","size":"10"}]}]"#,
            // Implausible: ignored.
            r#"{"event_type":"best_bid_ask","asset_id":"yes-a","best_bid":"0","best_ask":"0.52"}"#,
            "not json",
            r#"{"event_type":"price_change","price_changes":[{"asset_id":"yes-a","best_bid":"0.49","best_ask":"0.53"}]}"#,
        ];
        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
        subscription
    });

    let mut feed = StreamingFeed::new(OrderBookProtocol::new("yes-a", "no-a"), fast_feed_settings(url));
    assert!(feed.start().await);

    let mut rx = feed.subscribe();
    timeout(Duration::from_secs(3), async {
        loop {
            if rx.borrow_and_update().value.best_bid == Some(0.49) {
                break;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("price change should be applied");

    let book = feed.value();
    assert_eq!(book.best_ask, Some(0.53));
    assert!((book.mid.unwrap() - 0.51).abs() < 1e-9);

    feed.stop().await;
    let subscription = timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
    let sub: serde_json::Value = serde_json::from_str(&subscription).unwrap();
    assert_eq!(sub["assets_ids"], serde_json::json!(["yes-a", "no-a"]));
    assert_eq!(sub["type"], "market");
}

#[tokio::test]
async fn test_start_without_server_returns_false_and_stops_cleanly() {
    // Bind then drop so the port is closed.
    let (listener, url) = local_listener().await;
    drop(listener);

    let mut settings = fast_feed_settings(url);
    settings.first_value_timeout = Duration::from_millis(150);
    let mut feed = StreamingFeed::new(TickerProtocol, settings);

    assert!(!feed.start().await);
    assert!(feed.is_running());
    assert!(feed.snapshot().reconnects >= 1);

    feed.stop().await;
    assert!(!feed.is_running());
    assert_eq!(feed.value().price, None);
}
