//! Engine end to end against in-memory collaborators: quoting, fills,
//! rotation with settlement, and the loss latch halting the loop.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use ratchet::engine::TickOutcome;
use ratchet::types::{OrderSide, Outcome};

use crate::support::*;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn test_start_cancels_stale_orders_and_selects_venue() {
    let gateway = Arc::new(RecordingGateway::with_mid(0.5));
    let discovery = Arc::new(ScriptedDiscovery::new(vec![open_market("b", 25), open_market("a", 10)]));
    let mut engine = quoting_engine(Arc::clone(&gateway), Arc::clone(&discovery), risk_config(50.0));

    engine.start().await;

    assert_eq!(gateway.cancel_calls(), 1);
    // Earliest future close wins regardless of listing order.
    assert_eq!(engine.current_venue().map(|v| v.venue_id.as_str()), Some("a"));
    assert!(gateway.orders().is_empty());
}

#[tokio::test]
async fn test_quotes_both_sides_and_requotes_on_drift() {
    let gateway = Arc::new(RecordingGateway::with_mid(0.5));
    let discovery = Arc::new(ScriptedDiscovery::new(vec![open_market("a", 10)]));
    let mut engine = quoting_engine(Arc::clone(&gateway), Arc::clone(&discovery), risk_config(50.0));
    engine.start().await;

    assert_eq!(engine.tick().await, TickOutcome::Continue);
    let orders = gateway.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].token_id, "yes-a");
    assert_eq!(orders[1].token_id, "no-a");
    assert!(orders.iter().all(|o| o.side == OrderSide::Buy && close(o.price, 0.47) && close(o.size, 20.0)));
    assert_eq!(gateway.open_orders(), 2);

    // Small drift: orders stay put.
    gateway.set_mid(Some(0.505));
    engine.tick().await;
    assert_eq!(gateway.orders().len(), 2);

    // Past the threshold: cancel and replace.
    let cancels = gateway.cancel_calls();
    gateway.set_mid(Some(0.6));
    engine.tick().await;
    let orders = gateway.orders();
    assert_eq!(orders.len(), 4);
    assert_eq!(gateway.cancel_calls(), cancels + 1);
    assert!(close(orders[2].price, 0.57));
    assert!(close(orders[3].price, 0.37));
    assert_eq!(gateway.open_orders(), 2);
    assert_eq!(engine.risk().last_mid(), Some(0.6));
}

#[tokio::test]
async fn test_quotes_resume_after_failed_placement() {
    let gateway = Arc::new(RecordingGateway::with_mid(0.5));
    let discovery = Arc::new(ScriptedDiscovery::new(vec![open_market("a", 10)]));
    let mut engine = quoting_engine(Arc::clone(&gateway), Arc::clone(&discovery), risk_config(50.0));
    engine.start().await;

    gateway.set_failing_posts(true);
    engine.tick().await;
    assert!(gateway.orders().is_empty());
    assert_eq!(engine.risk().last_mid(), None);
    assert_eq!(engine.risk().resting(Outcome::Yes), None);

    // Gateway recovers; the mid has not moved but quotes still go out.
    gateway.set_failing_posts(false);
    engine.tick().await;
    assert_eq!(gateway.orders().len(), 2);
    assert_eq!(gateway.open_orders(), 2);
    assert_eq!(engine.risk().last_mid(), Some(0.5));
    assert!(engine.risk().resting(Outcome::No).is_some());
}

#[tokio::test]
async fn test_no_quotes_without_a_mid() {
    let gateway = Arc::new(RecordingGateway::default());
    let discovery = Arc::new(ScriptedDiscovery::new(vec![open_market("a", 10)]));
    let mut engine = quoting_engine(Arc::clone(&gateway), Arc::clone(&discovery), risk_config(50.0));
    engine.start().await;

    engine.tick().await;
    engine.tick().await;

    assert!(gateway.orders().is_empty());
    let snapshot = engine.snapshot_handle().read().await.clone();
    assert_eq!(snapshot.mid_price, None);
    assert_eq!(snapshot.venue.map(|v| v.venue_id), Some("a".to_string()));
}

#[tokio::test]
async fn test_rotation_settles_pending_positions_exactly_once() {
    let gateway = Arc::new(RecordingGateway::with_mid(0.5));
    let discovery = Arc::new(ScriptedDiscovery::new(vec![open_market("a", 10)]));
    let mut engine = quoting_engine(Arc::clone(&gateway), Arc::clone(&discovery), risk_config(50.0));
    engine.start().await;
    engine.tick().await;

    gateway.push_fill("yes-a", OrderSide::Buy, 0.47, 20.0);
    engine.tick().await;
    assert_eq!(engine.risk().pending_count(), 1);
    assert!(close(engine.risk().inventory(Outcome::Yes), 20.0));
    assert_eq!(engine.risk().resting(Outcome::Yes), None);
    assert!(engine.risk().resting(Outcome::No).is_some());

    // Window "a" closes with YES winning; "b" opens.
    discovery.set_markets(vec![settled_market("a", "1"), open_market("b", 25)]);
    let cancels = gateway.cancel_calls();
    engine.tick().await;

    assert_eq!(engine.current_venue().map(|v| v.venue_id.as_str()), Some("b"));
    assert_eq!(discovery.market_lookups(), 1);
    assert_eq!(engine.risk().session_pnl(), dec!(10.6));
    assert_eq!(engine.risk().pending_count(), 0);
    assert!(close(engine.risk().inventory(Outcome::Yes), 0.0));
    // One cancel for the rotation, one for the first quote on "b".
    assert_eq!(gateway.cancel_calls(), cancels + 2);

    let orders = gateway.orders();
    let latest: Vec<&str> = orders[orders.len() - 2..].iter().map(|o| o.token_id.as_str()).collect();
    assert_eq!(latest, vec!["yes-b", "no-b"]);

    engine.tick().await;
    assert_eq!(discovery.market_lookups(), 1);
    assert_eq!(engine.risk().session_pnl(), dec!(10.6));

    let snapshot = engine.snapshot_handle().read().await.clone();
    assert_eq!(snapshot.session_pnl, dec!(10.6));
    assert_eq!(snapshot.pending_positions, 0);
    assert_eq!(snapshot.collateral_balance, Some(500.0));
    assert!(!snapshot.pnl_history.is_empty() && snapshot.pnl_history.len() <= 4);
}

#[tokio::test]
async fn test_unresolved_venue_settles_at_zero_after_retries() {
    let gateway = Arc::new(RecordingGateway::with_mid(0.5));
    let discovery = Arc::new(ScriptedDiscovery::new(vec![open_market("a", 10)]));
    let mut engine = quoting_engine(Arc::clone(&gateway), Arc::clone(&discovery), risk_config(50.0));
    engine.start().await;
    engine.tick().await;
    gateway.push_fill("no-a", OrderSide::Buy, 0.47, 10.0);
    engine.tick().await;
    assert_eq!(engine.risk().pending_for("a").len(), 1);

    // "a" vanishes upstream, so its lookup fails on every attempt.
    discovery.set_markets(vec![open_market("b", 25)]);
    engine.tick().await;

    assert_eq!(engine.current_venue().map(|v| v.venue_id.as_str()), Some("b"));
    assert_eq!(discovery.market_lookups(), 2);
    assert_eq!(engine.risk().session_pnl(), Decimal::ZERO);
    assert_eq!(engine.risk().pending_count(), 0);
}

#[tokio::test]
async fn test_discovery_outage_keeps_current_venue() {
    let gateway = Arc::new(RecordingGateway::with_mid(0.5));
    let discovery = Arc::new(ScriptedDiscovery::new(vec![open_market("a", 10)]));
    let mut engine = quoting_engine(Arc::clone(&gateway), Arc::clone(&discovery), risk_config(50.0));
    engine.start().await;
    engine.tick().await;
    let cancels = gateway.cancel_calls();

    discovery.set_failing(true);
    assert_eq!(engine.tick().await, TickOutcome::Continue);
    assert_eq!(engine.current_venue().map(|v| v.venue_id.as_str()), Some("a"));
    assert_eq!(gateway.cancel_calls(), cancels);
}

#[tokio::test]
async fn test_loss_latch_halts_the_loop() {
    let gateway = Arc::new(RecordingGateway::with_mid(0.5));
    let discovery = Arc::new(ScriptedDiscovery::new(vec![open_market("a", 10)]));
    let mut engine = quoting_engine(Arc::clone(&gateway), Arc::clone(&discovery), risk_config(5.0));
    engine.start().await;
    engine.tick().await;
    gateway.push_fill("yes-a", OrderSide::Buy, 0.47, 20.0);
    engine.tick().await;

    // YES loses: 20 * 0.47 = 9.40 lost against a 5.00 limit.
    discovery.set_markets(vec![settled_market("a", "0"), open_market("b", 25)]);
    engine.tick().await;
    assert!(engine.risk().is_tripped());
    assert_eq!(engine.risk().session_pnl(), dec!(-9.4));

    // Nothing is quoted on the new venue once tripped.
    assert!(gateway.orders().iter().all(|o| !o.token_id.ends_with("-b")));

    assert_eq!(engine.tick().await, TickOutcome::Halted);

    let cancels = gateway.cancel_calls();
    tokio::time::timeout(Duration::from_secs(2), engine.run(std::future::pending::<()>()))
        .await
        .expect("run should stop on its own once halted");
    assert_eq!(gateway.cancel_calls(), cancels + 1);

    let snapshot = engine.snapshot_handle().read().await.clone();
    assert!(snapshot.circuit_breaker);
    assert_eq!(snapshot.daily_pnl, dec!(-9.4));
}

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() {
    let gateway = Arc::new(RecordingGateway::with_mid(0.5));
    let discovery = Arc::new(ScriptedDiscovery::new(vec![open_market("a", 10)]));
    let mut engine = quoting_engine(Arc::clone(&gateway), Arc::clone(&discovery), risk_config(50.0));
    engine.start().await;

    tokio::time::timeout(
        Duration::from_secs(2),
        engine.run(tokio::time::sleep(Duration::from_millis(60))),
    )
    .await
    .expect("run should honour the shutdown future");

    assert!(!gateway.orders().is_empty());
    assert_eq!(gateway.open_orders(), 0);
    assert_eq!(engine.risk().resting(Outcome::Yes), None);
}

#[tokio::test]
async fn test_latency_signal_opens_position_and_settles_on_rotation() {
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        // A 2% jump on the lead source.
        for frame in [r#"{"c":"100.0"}"#, r#"{"c":"102.0"}"#] {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    let gateway = Arc::new(RecordingGateway::with_mid(0.40));
    let discovery = Arc::new(ScriptedDiscovery::new(vec![open_market("a", 10)]));
    let mut engine = latency_engine(Arc::clone(&gateway), Arc::clone(&discovery), url);
    engine.start().await;

    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            engine.tick().await;
            if !gateway.orders().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("lead jump should produce a signal");

    // bump = min(0.08, 0.02 * 2) = 0.04, ev = 0.44 / 0.40 = 1.1, size = 10 / 0.40.
    let orders = gateway.orders();
    let first = &orders[0];
    assert_eq!(first.token_id, "yes-a");
    assert_eq!(first.side, OrderSide::Buy);
    assert!(close(first.price, 0.40));
    assert!(close(first.size, 25.0));
    assert_eq!(engine.risk().pending_for("a").len(), orders.len());

    let snapshot = engine.snapshot_handle().read().await.clone();
    assert_eq!(snapshot.lead_price, Some(102.0));
    assert!(close(snapshot.lead_change_pct.unwrap(), 2.0));

    discovery.set_markets(vec![settled_market("a", "1"), open_market("b", 25)]);
    engine.tick().await;

    // Each filled-at-submission position wins 25 * (1 - 0.40).
    let expected = dec!(15) * Decimal::from(orders.len() as u64);
    assert_eq!(engine.risk().session_pnl(), expected);
    assert_eq!(engine.risk().pending_for("a").len(), 0);

    engine.shutdown().await;
    server.abort();
}
