use futures_util::{SinkExt, StreamExt};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use wickengine::domain::market::types::FeedEvent;
use wickengine::domain::ports::{EventSink, FeedConnector};
use wickengine::infrastructure::feeds::{
    ConnectionState, OkxChannel, OkxStreamConnector, ReconnectMachine, ReconnectPolicy,
};
use wickengine::infrastructure::observability::Metrics;

const TRADES: &str = r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","tradeId":"9","px":"42000.5","sz":"0.25","side":"sell","ts":"1704067200500"}]}"#;

#[derive(Default)]
struct Collecting(Mutex<Vec<FeedEvent>>);

impl EventSink for Collecting {
    fn publish(&self, event: FeedEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[test]
fn test_backoff_schedule_across_outages() {
    let mut machine = ReconnectMachine::new(ReconnectPolicy::default());
    assert_eq!(machine.state(), ConnectionState::Disconnected);

    let mut waits = Vec::new();
    for _ in 0..8 {
        machine.on_connecting();
        waits.push(machine.on_failure().as_secs());
    }
    assert_eq!(waits, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    assert_eq!(machine.state(), ConnectionState::Disconnected);

    // A successful session resets the schedule but not the total
    machine.on_connecting();
    machine.on_connected();
    assert_eq!(machine.state(), ConnectionState::Connected);
    assert_eq!(machine.consecutive_failures(), 0);
    assert_eq!(machine.on_failure(), Duration::from_secs(1));
    assert_eq!(machine.total_reconnects(), 9);
}

#[test]
fn test_jittered_waits_stay_within_ten_percent() {
    let policy = ReconnectPolicy::default();
    let mut rng = StdRng::seed_from_u64(42);
    for failures in 0..10 {
        let base = policy.delay_for(failures);
        let waited = policy.with_jitter(base, &mut rng);
        assert!(waited >= base);
        assert!(waited.as_secs_f64() <= base.as_secs_f64() * 1.1 + 1e-9);
    }
}

#[tokio::test]
async fn test_okx_connector_reconnects_after_server_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (sub_tx, mut sub_rx) = mpsc::unbounded_channel::<String>();

    // Serves one trade per connection, then hangs up
    let server = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(mut ws) = accept_async(stream).await else {
                continue;
            };
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = sub_tx.send(text.as_str().to_string());
            }
            let _ = ws.send(Message::Text(TRADES.into())).await;
            let _ = ws.close(None).await;
        }
    });

    let metrics = Metrics::new().unwrap();
    let sink = Arc::new(Collecting::default());
    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        factor: 2,
        max_delay: Duration::from_millis(40),
        jitter: 0.0,
    };
    let mut connector = OkxStreamConnector::new(
        format!("ws://{}", addr),
        OkxChannel::Trades,
        vec!["BTC-USDT".to_string()],
        sink.clone(),
        policy,
        metrics.clone(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { connector.run(shutdown_rx).await });

    let first = timeout(Duration::from_secs(5), sub_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(first.contains(r#""op":"subscribe""#));
    assert!(first.contains(r#""channel":"trades""#));
    assert!(first.contains("BTC-USDT"));

    // Same subscription again after the server hung up
    let second = timeout(Duration::from_secs(5), sub_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, second);

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    server.abort();

    assert!(Metrics::counter_value(&metrics.feed_reconnects_total, "okx_trades") >= 1.0);
    let events = sink.0.lock().unwrap();
    let ticks: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            FeedEvent::Tick(t) => Some(t),
            _ => None,
        })
        .collect();
    assert!(!ticks.is_empty());
    assert!(ticks.iter().all(|t| t.symbol == "BTC-USDT"));
}

#[tokio::test]
async fn test_unreachable_endpoint_backs_off_until_shutdown() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let metrics = Metrics::new().unwrap();
    let mut connector = OkxStreamConnector::new(
        format!("ws://{}", addr),
        OkxChannel::Books5,
        vec!["ETH-USDT".to_string()],
        Arc::new(Collecting::default()),
        ReconnectPolicy {
            base_delay: Duration::from_millis(5),
            factor: 2,
            max_delay: Duration::from_millis(20),
            jitter: 0.1,
        },
        metrics.clone(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { connector.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown_tx.send(true).unwrap();
    // Connection failures are never returned as errors
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(Metrics::counter_value(&metrics.feed_reconnects_total, "okx_orderbook") >= 2.0);
}
