use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::alerts::{AlertDispatcher, AlertQueue};
use crate::application::detection::WickDetector;
use crate::application::features::StandardFeatureExtractor;
use crate::application::market_data::candle_aggregator::CandleAggregator;
use crate::application::market_data::snapshot_store::SnapshotStore;
use crate::application::market_data::trade_stats::TradeStats;
use crate::application::pipeline::engine::WhaleContext;
use crate::application::pipeline::runner::run_pipeline;
use crate::application::pipeline::storage_stage::StorageStage;
use crate::application::pipeline::{DetectionPipeline, FeedHandoff};
use crate::application::validation::TickValidator;
use crate::config::Config;
use crate::domain::errors::StorageWriteError;
use crate::domain::market::types::FeedSource;
use crate::domain::ports::FeedConnector;
use crate::infrastructure::core::HttpClientFactory;
use crate::infrastructure::feeds::{
    CoinGeckoClient, CoinalyzeClient, OkxChannel, OkxStreamConnector, PollingConnector,
    ReconnectPolicy, WhaleAlertClient,
};
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::storage::JsonlRecordWriter;
use crate::infrastructure::webhook::DiscordAlertSink;

/// How long connectors, the alert task and the reporter get to stop after the core has drained
const BACKGROUND_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// A fully wired engine that has not started any task yet.
pub struct Application {
    pub config: Config,
    pub metrics: Metrics,
    pub snapshots: Arc<SnapshotStore>,
    pipeline: DetectionPipeline,
    writer: JsonlRecordWriter,
}

impl Application {
    /// Validates the configuration and wires every component.
    ///
    /// Crash recovery of leftover active segments happens here, before any
    /// connector starts.
    pub fn build(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        info!(
            "Building wick engine: symbols={:?} timeframe={} ratio>={} output={}",
            config.feeds.symbols,
            config.engine.timeframe,
            config.engine.wick_min_ratio,
            config.storage.output_dir.display()
        );

        let metrics = Metrics::new().context("Failed to register metrics")?;
        let snapshots = Arc::new(SnapshotStore::new());

        let engine = &config.engine;
        let whales = if config.feeds.whale_feed_enabled() {
            WhaleContext::Window {
                window_ms: engine.context_limits().whale_window_ms,
            }
        } else {
            info!("Application: WHALE_ALERT_KEY not set, whale features will be missing");
            WhaleContext::Disabled
        };

        let pipeline = DetectionPipeline::new(
            TickValidator::new(config.feeds.symbols.iter().cloned(), engine.reorder_tolerance_ms),
            CandleAggregator::new(
                engine.timeframe,
                engine.candle_retention,
                engine.late_trade_grace_ms,
            ),
            TradeStats::new(engine.vwap_rolling_minutes),
            WickDetector::new(engine.gate_policy(), engine.doji_body_fraction),
            Box::new(StandardFeatureExtractor::new(engine.extractor_config())),
            snapshots.clone(),
            whales,
            metrics.clone(),
        );

        let writer = JsonlRecordWriter::open(config.storage.settings())
            .with_context(|| {
                format!(
                    "Failed to open output directory {}",
                    config.storage.output_dir.display()
                )
            })?
            .with_metrics(metrics.clone());

        Ok(Self {
            config,
            metrics,
            snapshots,
            pipeline,
            writer,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.writer.run_id()
    }

    fn connectors(&self, handoff: &FeedHandoff) -> Vec<Box<dyn FeedConnector>> {
        let feeds = &self.config.feeds;
        let policy = ReconnectPolicy::default();
        let http = HttpClientFactory::create_client(Duration::from_secs(feeds.http_timeout_secs));
        let mut connectors: Vec<Box<dyn FeedConnector>> = Vec::new();

        for channel in [OkxChannel::Trades, OkxChannel::Books5] {
            connectors.push(Box::new(OkxStreamConnector::new(
                feeds.okx_ws_url.clone(),
                channel,
                feeds.symbols.clone(),
                Arc::new(handoff.for_source(channel.source())),
                policy.clone(),
                self.metrics.clone(),
            )));
        }

        connectors.push(Box::new(PollingConnector::new(
            CoinGeckoClient::new(
                http.clone(),
                feeds.coingecko_base_url.clone(),
                feeds.coingecko_api_key.clone(),
                Duration::from_secs(feeds.coingecko_interval_secs),
            ),
            Arc::new(handoff.for_source(FeedSource::CoinGecko)),
            policy.clone(),
            self.metrics.clone(),
        )));

        match &feeds.coinalyze_api_key {
            Some(key) => connectors.push(Box::new(PollingConnector::new(
                CoinalyzeClient::new(
                    http.clone(),
                    feeds.coinalyze_base_url.clone(),
                    key.clone(),
                    feeds.symbols.clone(),
                    Duration::from_secs(feeds.coinalyze_interval_secs),
                ),
                Arc::new(handoff.for_source(FeedSource::Coinalyze)),
                policy.clone(),
                self.metrics.clone(),
            ))),
            None => warn!("Application: COINALYZE_API_KEY not set, derivatives features will be missing"),
        }

        if let Some(key) = &feeds.whale_alert_key {
            connectors.push(Box::new(PollingConnector::new(
                WhaleAlertClient::new(
                    http,
                    feeds.whale_alert_base_url.clone(),
                    key.clone(),
                    feeds.symbols.clone(),
                    Duration::from_secs(feeds.whale_alert_interval_secs),
                ),
                Arc::new(handoff.for_source(FeedSource::WhaleAlert)),
                policy,
                self.metrics.clone(),
            )));
        }

        connectors
    }

    fn alert_queue(&self, shutdown: &watch::Receiver<bool>) -> Option<(AlertQueue, JoinHandle<()>)> {
        let alerts = &self.config.alerts;
        if !alerts.enabled() {
            info!("Application: no Discord webhook configured, alerts disabled");
            return None;
        }
        let http = HttpClientFactory::create_client(Duration::from_secs(
            self.config.feeds.http_timeout_secs,
        ));
        let sink = Arc::new(DiscordAlertSink::new(http, alerts.webhooks.clone()));
        let dispatcher = AlertDispatcher::new(
            sink,
            Duration::from_secs(alerts.cooldown_secs),
            self.metrics.clone(),
        )
        .with_retry(ReconnectPolicy::default(), alerts.max_attempts);

        let (tx, rx) = mpsc::channel(alerts.queue_capacity);
        let task = tokio::spawn(dispatcher.run(rx, shutdown.clone()));
        Some((
            AlertQueue::new(tx, alerts.top_features, self.metrics.clone()),
            task,
        ))
    }

    /// Spawns every task. Must be called from within a tokio runtime.
    pub fn start(self) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (reporter_tx, reporter_rx) = watch::channel(false);
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (record_tx, record_rx) = mpsc::channel(self.config.storage.record_queue_capacity);
        let (hard_stop, hard_stop_rx) = watch::channel(false);
        let mut background = Vec::new();

        let handoff = FeedHandoff::new(
            FeedSource::OkxTrades,
            tick_tx,
            self.snapshots.clone(),
            self.metrics.clone(),
        );
        for mut connector in self.connectors(&handoff) {
            let rx = shutdown_rx.clone();
            background.push(tokio::spawn(async move {
                let source = connector.source();
                if let Err(e) = connector.run(rx).await {
                    error!("Application: {} connector stopped: {:#}", source, e);
                }
            }));
        }
        drop(handoff);

        let alerts = match self.alert_queue(&shutdown_rx) {
            Some((queue, task)) => {
                background.push(task);
                Some(queue)
            }
            None => None,
        };

        let run_id = self.writer.run_id();
        let storage = StorageStage {
            writer: Box::new(self.writer),
            alerts,
            metrics: self.metrics.clone(),
            hard_stop: hard_stop_rx.clone(),
        }
        .spawn(record_rx);

        let pipeline = tokio::spawn(run_pipeline(
            self.pipeline,
            tick_rx,
            record_tx,
            Duration::from_millis(self.config.engine.close_check_ms),
            self.metrics.clone(),
            shutdown_rx,
            hard_stop_rx,
        ));

        let reporter = self.config.observability.enabled.then(|| {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.feeds.symbols.clone(),
                self.config.observability.interval_secs,
            );
            tokio::spawn(reporter.run(reporter_rx))
        });

        info!("Application: engine started (run {})", run_id);
        EngineHandle {
            metrics: self.metrics,
            run_id,
            shutdown_tx,
            reporter_tx,
            hard_stop,
            pipeline,
            storage: Some(storage),
            background,
            reporter,
        }
    }
}

/// Running engine. Dropping it without calling [`EngineHandle::shutdown`]
/// leaves the tasks running until the runtime stops.
pub struct EngineHandle {
    pub metrics: Metrics,
    pub run_id: Uuid,
    shutdown_tx: watch::Sender<bool>,
    reporter_tx: watch::Sender<bool>,
    hard_stop: watch::Sender<bool>,
    pipeline: JoinHandle<()>,
    storage: Option<JoinHandle<Result<u64, StorageWriteError>>>,
    background: Vec<JoinHandle<()>>,
    reporter: Option<JoinHandle<()>>,
}

fn storage_result(
    joined: Result<Result<u64, StorageWriteError>, tokio::task::JoinError>,
) -> Result<u64> {
    joined
        .map_err(|e| anyhow!("Storage stage panicked: {}", e))?
        .context("Durable storage failed")
}

impl EngineHandle {
    /// Resolves only if the storage stage stops before shutdown was requested,
    /// which means a write was exhausted. Cancel-safe.
    pub async fn storage_stopped(&mut self) -> Result<()> {
        let Some(handle) = self.storage.as_mut() else {
            return std::future::pending().await;
        };
        let joined = handle.await;
        self.storage = None;
        storage_result(joined).map(|written| {
            warn!(
                "EngineHandle: storage stage ended unexpectedly after {} records",
                written
            );
        })
    }

    /// Stops connectors, lets queued ticks and records drain for up to
    /// `grace`, then discards whatever is left. Returns the storage error if
    /// durable writing failed at any point.
    pub async fn shutdown(self, grace: Duration) -> Result<()> {
        let EngineHandle {
            metrics,
            shutdown_tx,
            reporter_tx,
            hard_stop,
            mut pipeline,
            mut storage,
            background,
            reporter,
            ..
        } = self;

        info!("EngineHandle: shutdown requested (grace {:?})", grace);
        let _ = shutdown_tx.send(true);

        let drained = tokio::time::timeout(grace, async {
            if let Err(e) = (&mut pipeline).await {
                error!("EngineHandle: pipeline task failed: {}", e);
            }
            match storage.as_mut() {
                Some(handle) => Some(handle.await),
                None => None,
            }
        })
        .await;

        let storage_outcome = match drained {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "EngineHandle: grace period of {:?} expired, discarding undrained records",
                    grace
                );
                let _ = hard_stop.send(true);
                if !pipeline.is_finished() {
                    match tokio::time::timeout(BACKGROUND_STOP_TIMEOUT, &mut pipeline).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!("EngineHandle: pipeline task failed: {}", e),
                        Err(_) => {
                            error!("EngineHandle: pipeline ignored the hard stop, aborting it");
                            pipeline.abort();
                        }
                    }
                }
                match storage.take() {
                    Some(handle) => Some(handle.await),
                    None => None,
                }
            }
        };

        for task in background {
            if tokio::time::timeout(BACKGROUND_STOP_TIMEOUT, task).await.is_err() {
                warn!("EngineHandle: a background task did not stop in time");
            }
        }

        let _ = reporter_tx.send(true);
        if let Some(reporter) = reporter {
            let _ = tokio::time::timeout(BACKGROUND_STOP_TIMEOUT, reporter).await;
        }

        match storage_outcome {
            Some(joined) => {
                let written = storage_result(joined)?;
                info!(
                    "EngineHandle: stopped cleanly, {} records written ({} total this run)",
                    written,
                    metrics.records_written_total.get()
                );
                Ok(())
            }
            // Already reported through storage_stopped
            None => Ok(()),
        }
    }
}
