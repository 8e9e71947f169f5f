use super::reconnect::{ReconnectMachine, ReconnectPolicy};
use super::sleep_or_shutdown;
use crate::domain::errors::FeedError;
use crate::domain::market::types::{FeedEvent, FeedSource};
use crate::domain::ports::{EventSink, FeedConnector};
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A REST endpoint polled on a fixed interval.
#[async_trait]
pub trait PollSource: Send {
    fn source(&self) -> FeedSource;

    fn interval(&self) -> Duration;

    /// One poll round. An error means nothing usable came back.
    async fn poll(&mut self) -> Result<Vec<FeedEvent>, FeedError>;
}

/// Drives a [`PollSource`], backing off with the reconnect policy while the
/// endpoint keeps failing.
pub struct PollingConnector<P> {
    client: P,
    sink: Arc<dyn EventSink>,
    machine: ReconnectMachine,
    metrics: Metrics,
}

impl<P: PollSource> PollingConnector<P> {
    pub fn new(client: P, sink: Arc<dyn EventSink>, policy: ReconnectPolicy, metrics: Metrics) -> Self {
        Self {
            client,
            sink,
            machine: ReconnectMachine::new(policy),
            metrics,
        }
    }

    pub fn machine(&self) -> &ReconnectMachine {
        &self.machine
    }

    /// Runs one poll and publishes the result. Returns the wait before the next poll.
    pub async fn poll_once(&mut self) -> Duration {
        let source = self.client.source();
        self.machine.on_connecting();
        match self.client.poll().await {
            Ok(events) => {
                self.machine.on_connected();
                debug!("PollingConnector: {} returned {} event(s)", source, events.len());
                for event in events {
                    self.sink.publish(event);
                }
                self.client.interval()
            }
            Err(e) => {
                let delay = self.machine.on_failure();
                let delay = self.machine.policy().with_jitter(delay, &mut rand::rng());
                self.metrics.inc_reconnects(source.as_str());
                warn!(
                    "PollingConnector: {} poll failed ({}), retry #{} in {:.1}s",
                    source,
                    e,
                    self.machine.consecutive_failures(),
                    delay.as_secs_f64()
                );
                delay
            }
        }
    }
}

#[async_trait]
impl<P: PollSource> FeedConnector for PollingConnector<P> {
    fn source(&self) -> FeedSource {
        self.client.source()
    }

    async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let source = self.client.source();
        info!(
            "PollingConnector: {} polling every {:?}",
            source,
            self.client.interval()
        );
        loop {
            let wait = tokio::select! {
                wait = self.poll_once() => wait,
                _ = shutdown.changed() => break,
            };
            if sleep_or_shutdown(wait, &mut shutdown).await {
                break;
            }
        }
        info!("PollingConnector: {} stopped", source);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::types::{MARKET_WIDE, MacroSnapshot, NormalizedSnapshot, SnapshotPayload};
    use std::sync::Mutex;

    struct Scripted {
        results: Vec<Result<Vec<FeedEvent>, FeedError>>,
    }

    #[async_trait]
    impl PollSource for Scripted {
        fn source(&self) -> FeedSource {
            FeedSource::CoinGecko
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn poll(&mut self) -> Result<Vec<FeedEvent>, FeedError> {
            self.results.remove(0)
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<FeedEvent>>);

    impl EventSink for Collect {
        fn publish(&self, event: FeedEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn failure() -> Result<Vec<FeedEvent>, FeedError> {
        Err(FeedError::TransientNetwork {
            source_name: "coingecko".to_string(),
            reason: "timeout".to_string(),
        })
    }

    #[tokio::test]
    async fn test_failures_back_off_then_recover() {
        let snapshot = FeedEvent::Snapshot(NormalizedSnapshot {
            symbol: MARKET_WIDE.to_string(),
            timestamp: 1,
            payload: SnapshotPayload::Macro(MacroSnapshot::default()),
        });
        let sink = Arc::new(Collect::default());
        let metrics = Metrics::new().unwrap();
        let policy = ReconnectPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        let mut connector = PollingConnector::new(
            Scripted {
                results: vec![failure(), failure(), failure(), Ok(vec![snapshot])],
            },
            sink.clone(),
            policy,
            metrics.clone(),
        );

        assert_eq!(connector.poll_once().await, Duration::from_secs(1));
        assert_eq!(connector.poll_once().await, Duration::from_secs(2));
        assert_eq!(connector.poll_once().await, Duration::from_secs(4));
        assert_eq!(connector.poll_once().await, Duration::from_secs(60));
        assert_eq!(connector.machine().consecutive_failures(), 0);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert_eq!(
            Metrics::counter_value(&metrics.feed_reconnects_total, "coingecko"),
            3.0
        );
    }
}
