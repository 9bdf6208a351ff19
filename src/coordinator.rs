//! Poll-and-merge coordinator.
//!
//! Owns the dashboard state. Network work runs in spawned tasks whose only
//! effect is sending a [`CoordinatorEvent`] back; state changes happen in
//! [`Coordinator::apply`], called from the UI loop.

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::alert::AlertConfig;
use crate::analysis::AnalysisRequester;
use crate::error::{AlertError, FetchError};
use crate::market_data::MarketDataSource;
use crate::models::{ChartSeries, MarketAnalysis, PriceSnapshot, RefreshState, TimeRange};

#[derive(Debug, Clone, Default)]
pub struct DashboardState {
    pub price: Option<PriceSnapshot>,
    pub chart: ChartSeries,
    pub analysis: Option<MarketAnalysis>,
    pub analysis_loading: bool,
    pub alert: AlertConfig,
    pub refresh: RefreshState,
    pub range: TimeRange,
}

#[derive(Debug)]
pub enum CoordinatorEvent {
    /// Emitted by the poll timer.
    Tick,
    Fetched {
        generation: u64,
        range: TimeRange,
        silent: bool,
        outcome: Result<(PriceSnapshot, ChartSeries), FetchError>,
    },
    AnalysisReady {
        generation: u64,
        analysis: MarketAnalysis,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinatorOptions {
    /// Drop the current analysis when the range changes so the next
    /// successful refresh requests a new one.
    pub reanalyze_on_range_change: bool,
}

/// Keeps the poll timer alive; dropping it stops the polling.
pub struct PollTimer {
    handle: JoinHandle<()>,
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct Coordinator {
    market: Arc<dyn MarketDataSource>,
    analyst: Arc<dyn AnalysisRequester>,
    options: CoordinatorOptions,
    state: DashboardState,
    tx: mpsc::UnboundedSender<CoordinatorEvent>,
    rx: mpsc::UnboundedReceiver<CoordinatorEvent>,
    last_generation: u64,
    applied_generation: u64,
    fetches_in_flight: usize,
    visible_fetches: usize,
    analyses_in_flight: usize,
    /// Bumped when a range switch invalidates the current analysis.
    analysis_generation: u64,
    current_analyses: usize,
}

impl Coordinator {
    pub fn new(
        market: Arc<dyn MarketDataSource>,
        analyst: Arc<dyn AnalysisRequester>,
        range: TimeRange,
        options: CoordinatorOptions,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            market,
            analyst,
            options,
            state: DashboardState {
                range,
                ..DashboardState::default()
            },
            tx,
            rx,
            last_generation: 0,
            applied_generation: 0,
            fetches_in_flight: 0,
            visible_fetches: 0,
            analyses_in_flight: 0,
            analysis_generation: 0,
            current_analyses: 0,
        }
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    #[cfg(test)]
    pub fn is_idle(&self) -> bool {
        self.fetches_in_flight == 0 && self.analyses_in_flight == 0
    }

    // --- Scheduling ---

    /// Runs the initial visible refresh and starts background polling.
    pub fn start(&mut self, period: Duration) -> PollTimer {
        self.refresh(false);
        self.start_polling(period)
    }

    /// Emits a [`CoordinatorEvent::Tick`] every `period`, first one after a full period.
    pub fn start_polling(&self, period: Duration) -> PollTimer {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(CoordinatorEvent::Tick).is_err() {
                    break;
                }
            }
        });
        info!(?period, "polling started");
        PollTimer { handle }
    }

    // --- Operations ---

    /// Fetches price and chart for the selected range. A silent refresh leaves
    /// the loading indicator alone.
    pub fn refresh(&mut self, silent: bool) {
        if !silent {
            self.state.refresh.loading = true;
            self.visible_fetches += 1;
        }
        self.last_generation += 1;
        self.fetches_in_flight += 1;

        let generation = self.last_generation;
        let range = self.state.range;
        let market = Arc::clone(&self.market);
        let tx = self.tx.clone();
        debug!(generation, %range, silent, "refresh started");

        tokio::spawn(async move {
            let fetch = async {
                futures::future::try_join(market.fetch_price(), market.fetch_chart(range)).await
            };
            let outcome = match AssertUnwindSafe(fetch).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Aborted),
            };
            let _ = tx.send(CoordinatorEvent::Fetched {
                generation,
                range,
                silent,
                outcome,
            });
        });
    }

    /// Requests a fresh analysis of the current data. Returns false when there
    /// is nothing to analyze yet.
    pub fn request_analysis(&mut self) -> bool {
        let Some(snapshot) = self.state.price.clone() else {
            return false;
        };
        if self.state.chart.is_empty() {
            return false;
        }

        self.state.analysis_loading = true;
        self.analyses_in_flight += 1;
        self.current_analyses += 1;

        let generation = self.analysis_generation;
        let history = self.state.chart.clone();
        let analyst = Arc::clone(&self.analyst);
        let tx = self.tx.clone();
        debug!(points = history.len(), "analysis requested");

        tokio::spawn(async move {
            let request = analyst.analyze(&snapshot, &history);
            let analysis = match AssertUnwindSafe(request).catch_unwind().await {
                Ok(analysis) => analysis,
                Err(_) => {
                    warn!("analysis task panicked, using fallback");
                    MarketAnalysis::unavailable()
                }
            };
            let _ = tx.send(CoordinatorEvent::AnalysisReady {
                generation,
                analysis,
            });
        });
        true
    }

    /// Switches the chart range and reloads. Selecting the current range does nothing.
    pub fn set_range(&mut self, range: TimeRange) -> bool {
        if range == self.state.range {
            return false;
        }
        info!(from = %self.state.range, to = %range, "range changed");
        self.state.range = range;
        self.state.chart.clear();
        if self.options.reanalyze_on_range_change {
            // Requests still in flight describe the old range.
            self.analysis_generation += 1;
            self.current_analyses = 0;
            self.state.analysis = None;
            self.state.analysis_loading = false;
        }
        self.refresh(false);
        true
    }

    pub fn enable_alert(&mut self, input: &str) -> Result<(), AlertError> {
        self.state.alert.enable(input)?;
        info!(target_price = ?self.state.alert.target_price, "price alert armed");
        Ok(())
    }

    pub fn disable_alert(&mut self) {
        self.state.alert.disable();
        info!("price alert disabled");
    }

    pub fn toggle_alert(&mut self, input: &str) -> Result<(), AlertError> {
        self.state.alert.toggle(input)?;
        info!(
            enabled = self.state.alert.enabled,
            target_price = ?self.state.alert.target_price,
            "price alert toggled"
        );
        Ok(())
    }

    pub fn dismiss_alert(&mut self) {
        self.state.alert.dismiss();
    }

    // --- Event handling ---

    /// Waits for the next completion or timer tick.
    #[cfg(test)]
    pub async fn next_event(&mut self) -> Option<CoordinatorEvent> {
        self.rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<CoordinatorEvent> {
        self.rx.try_recv().ok()
    }

    /// Applies events until no fetch or analysis is outstanding.
    #[cfg(test)]
    pub async fn settle(&mut self) {
        while !self.is_idle() {
            match self.rx.recv().await {
                Some(event) => self.apply(event),
                None => break,
            }
        }
    }

    pub fn apply(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Tick => self.refresh(true),
            CoordinatorEvent::Fetched {
                generation,
                range,
                silent,
                outcome,
            } => self.apply_fetch(generation, range, silent, outcome),
            CoordinatorEvent::AnalysisReady {
                generation,
                analysis,
            } => {
                self.analyses_in_flight = self.analyses_in_flight.saturating_sub(1);
                if generation != self.analysis_generation {
                    debug!(generation, "discarding analysis of a previous range");
                    return;
                }
                self.current_analyses = self.current_analyses.saturating_sub(1);
                self.state.analysis_loading = self.current_analyses > 0;
                self.state.analysis = Some(analysis);
            }
        }
    }

    fn apply_fetch(
        &mut self,
        generation: u64,
        range: TimeRange,
        silent: bool,
        outcome: Result<(PriceSnapshot, ChartSeries), FetchError>,
    ) {
        self.fetches_in_flight = self.fetches_in_flight.saturating_sub(1);
        if !silent {
            self.visible_fetches = self.visible_fetches.saturating_sub(1);
            if self.visible_fetches == 0 {
                self.state.refresh.loading = false;
            }
        }

        // Out-of-order completion or a range the user already left.
        if generation <= self.applied_generation || range != self.state.range {
            debug!(generation, %range, "discarding stale fetch result");
            return;
        }
        self.applied_generation = generation;

        let (snapshot, chart) = match outcome {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, generation, "market data refresh failed");
                self.state.refresh.last_error = Some(e.user_message());
                return;
            }
        };

        let price = snapshot.price;
        self.state.price = Some(snapshot);
        self.state.chart = chart;
        self.state.refresh.last_updated = Some(Utc::now());
        self.state.refresh.last_error = None;

        if self.state.alert.evaluate(price) {
            info!(price, target_price = ?self.state.alert.target_price, "price alert triggered");
        }

        if self.state.analysis.is_none() && !self.state.analysis_loading {
            self.request_analysis();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChartPoint, Sentiment};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeMarket {
        prices: Mutex<Vec<f64>>,
        fail: Mutex<bool>,
        chart_len: usize,
        chart_calls: Mutex<Vec<TimeRange>>,
    }

    impl FakeMarket {
        fn with_price(price: f64) -> Self {
            Self {
                prices: Mutex::new(vec![price]),
                chart_len: 5,
                ..Self::default()
            }
        }

        fn set_price(&self, price: f64) {
            *self.prices.lock().unwrap() = vec![price];
        }

        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        fn chart_calls(&self) -> Vec<TimeRange> {
            self.chart_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketDataSource for FakeMarket {
        async fn fetch_price(&self) -> Result<PriceSnapshot, FetchError> {
            if *self.fail.lock().unwrap() {
                return Err(FetchError::Status(503));
            }
            let price = self.prices.lock().unwrap()[0];
            Ok(PriceSnapshot {
                price,
                volume_24h: 5_000_000_000.0,
                change_24h_pct: 3.5,
                observed_at: Utc::now(),
            })
        }

        async fn fetch_chart(&self, range: TimeRange) -> Result<ChartSeries, FetchError> {
            self.chart_calls.lock().unwrap().push(range);
            let base = range.index() as f64;
            Ok((0..self.chart_len)
                .map(|i| ChartPoint {
                    timestamp_ms: i as i64 * 1000,
                    price: base + i as f64 * 0.01,
                    volume: 1.0,
                })
                .collect())
        }
    }

    struct FakeAnalyst {
        calls: AtomicUsize,
        result: MarketAnalysis,
    }

    impl FakeAnalyst {
        fn bullish() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: MarketAnalysis {
                    sentiment: Sentiment::Bullish,
                    summary: "much up".to_string(),
                    support_level: None,
                    resistance_level: None,
                    support_price: Some(0.15),
                    resistance_price: Some(0.25),
                },
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisRequester for FakeAnalyst {
        async fn analyze(&self, _: &PriceSnapshot, _: &[ChartPoint]) -> MarketAnalysis {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct PanickingAnalyst;

    #[async_trait]
    impl AnalysisRequester for PanickingAnalyst {
        async fn analyze(&self, _: &PriceSnapshot, _: &[ChartPoint]) -> MarketAnalysis {
            panic!("analysis blew up");
        }
    }

    struct PanickingMarket;

    #[async_trait]
    impl MarketDataSource for PanickingMarket {
        async fn fetch_price(&self) -> Result<PriceSnapshot, FetchError> {
            panic!("price feed blew up");
        }

        async fn fetch_chart(&self, _: TimeRange) -> Result<ChartSeries, FetchError> {
            panic!("chart feed blew up");
        }
    }

    fn coordinator(
        market: &Arc<FakeMarket>,
        analyst: &Arc<FakeAnalyst>,
    ) -> Coordinator {
        Coordinator::new(
            market.clone(),
            analyst.clone(),
            TimeRange::H24,
            CoordinatorOptions::default(),
        )
    }

    #[tokio::test]
    async fn successful_refresh_replaces_price_and_chart() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);

        coord.refresh(false);
        assert!(coord.state().refresh.loading);
        coord.settle().await;

        let state = coord.state();
        assert!(!state.refresh.loading);
        assert_eq!(state.price.as_ref().unwrap().price, 0.2);
        assert_eq!(state.chart.len(), 5);
        assert!(state.refresh.last_updated.is_some());
        assert!(state.refresh.last_error.is_none());
    }

    #[tokio::test]
    async fn silent_refresh_never_shows_loading() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);

        coord.refresh(true);
        assert!(!coord.state().refresh.loading);
        coord.settle().await;
        assert!(!coord.state().refresh.loading);
        assert!(coord.state().price.is_some());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_data_and_sets_error() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);
        coord.refresh(false);
        coord.settle().await;
        let before = coord.state().price.clone();

        market.set_failing(true);
        market.set_price(0.9);
        coord.refresh(false);
        coord.settle().await;

        let state = coord.state();
        assert!(!state.refresh.loading);
        assert_eq!(state.price, before);
        assert_eq!(state.chart.len(), 5);
        assert!(state.refresh.last_error.is_some());

        market.set_failing(false);
        coord.refresh(true);
        coord.settle().await;
        assert!(coord.state().refresh.last_error.is_none());
        assert_eq!(coord.state().price.as_ref().unwrap().price, 0.9);
    }

    #[tokio::test]
    async fn failed_refresh_does_not_evaluate_alert_or_analyze() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        market.set_failing(true);
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);
        coord.enable_alert("0.1").unwrap();

        coord.refresh(false);
        coord.settle().await;

        assert!(!coord.state().alert.triggered);
        assert_eq!(analyst.calls(), 0);
        assert!(coord.state().analysis.is_none());
    }

    #[tokio::test]
    async fn alert_triggers_when_price_reaches_target() {
        let market = Arc::new(FakeMarket::with_price(0.20));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);

        coord.enable_alert("0.15").unwrap();
        coord.refresh(false);
        coord.settle().await;
        assert!(coord.state().alert.triggered);

        coord.disable_alert();
        assert!(!coord.state().alert.triggered);
        coord.enable_alert("0.25").unwrap();
        coord.refresh(false);
        coord.settle().await;
        assert!(!coord.state().alert.triggered);
    }

    #[tokio::test]
    async fn alert_fires_once_until_dismissed() {
        let market = Arc::new(FakeMarket::with_price(0.20));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);
        coord.enable_alert("0.15").unwrap();

        coord.refresh(true);
        coord.settle().await;
        assert!(coord.state().alert.triggered);

        for _ in 0..3 {
            coord.refresh(true);
            coord.settle().await;
            assert!(coord.state().alert.triggered);
        }

        coord.dismiss_alert();
        assert!(coord.state().alert.enabled);
        assert!(!coord.state().alert.triggered);

        coord.refresh(true);
        coord.settle().await;
        assert!(coord.state().alert.triggered);
    }

    #[tokio::test]
    async fn invalid_alert_target_is_rejected() {
        let market = Arc::new(FakeMarket::with_price(0.20));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);

        assert!(coord.toggle_alert("much wow").is_err());
        assert_eq!(coord.state().alert, AlertConfig::default());

        coord.toggle_alert("0.3").unwrap();
        assert!(coord.state().alert.enabled);
        coord.toggle_alert("").unwrap();
        assert!(!coord.state().alert.enabled);
    }

    #[tokio::test]
    async fn analysis_is_auto_requested_only_when_absent() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);

        coord.refresh(false);
        coord.settle().await;
        assert_eq!(analyst.calls(), 1);
        assert_eq!(
            coord.state().analysis.as_ref().unwrap().sentiment,
            Sentiment::Bullish
        );
        assert!(!coord.state().analysis_loading);

        for _ in 0..3 {
            coord.refresh(true);
            coord.settle().await;
        }
        assert_eq!(analyst.calls(), 1);

        assert!(coord.request_analysis());
        assert!(coord.state().analysis_loading);
        coord.settle().await;
        assert_eq!(analyst.calls(), 2);
        assert!(!coord.state().analysis_loading);
    }

    #[tokio::test]
    async fn overlapping_refreshes_request_analysis_once() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);

        coord.refresh(false);
        coord.refresh(true);
        coord.settle().await;
        assert_eq!(analyst.calls(), 1);
    }

    #[tokio::test]
    async fn manual_analysis_needs_data() {
        let market = Arc::new(FakeMarket::default());
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);

        assert!(!coord.request_analysis());
        assert!(!coord.state().analysis_loading);

        // Price present but chart empty.
        market.set_price(0.2);
        coord.refresh(false);
        coord.settle().await;
        assert!(coord.state().chart.is_empty());
        assert!(!coord.request_analysis());
        assert_eq!(analyst.calls(), 0);
    }

    #[tokio::test]
    async fn panicking_analyst_resolves_to_fallback() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let mut coord = Coordinator::new(
            market.clone(),
            Arc::new(PanickingAnalyst),
            TimeRange::H24,
            CoordinatorOptions::default(),
        );

        coord.refresh(false);
        coord.settle().await;

        let analysis = coord.state().analysis.clone().unwrap();
        assert_eq!(analysis.sentiment, Sentiment::Neutral);
        assert!(analysis.is_unavailable());
        assert!(!coord.state().analysis_loading);
    }

    #[tokio::test]
    async fn range_switch_refreshes_once_and_keeps_analysis() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);
        coord.refresh(false);
        coord.settle().await;
        assert_eq!(analyst.calls(), 1);

        assert!(coord.set_range(TimeRange::D7));
        assert!(coord.state().refresh.loading);
        assert!(coord.state().chart.is_empty());
        assert!(coord.state().analysis.is_some());
        coord.settle().await;

        assert_eq!(market.chart_calls(), [TimeRange::H24, TimeRange::D7]);
        assert_eq!(analyst.calls(), 1);
        assert_eq!(coord.state().range, TimeRange::D7);
        assert_eq!(coord.state().chart[0].price, TimeRange::D7.index() as f64);
        assert!(!coord.state().refresh.loading);
    }

    #[tokio::test]
    async fn selecting_current_range_is_a_no_op() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);

        assert!(!coord.set_range(TimeRange::H24));
        assert!(coord.is_idle());
        assert!(market.chart_calls().is_empty());
    }

    #[tokio::test]
    async fn reanalyze_option_refreshes_analysis_on_range_change() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = Coordinator::new(
            market.clone(),
            analyst.clone(),
            TimeRange::H24,
            CoordinatorOptions {
                reanalyze_on_range_change: true,
            },
        );
        coord.refresh(false);
        coord.settle().await;

        coord.set_range(TimeRange::Y1);
        assert!(coord.state().analysis.is_none());
        coord.settle().await;
        assert_eq!(analyst.calls(), 2);
        assert!(coord.state().analysis.is_some());
    }

    #[tokio::test]
    async fn range_switch_discards_analysis_still_in_flight() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = Coordinator::new(
            market.clone(),
            analyst.clone(),
            TimeRange::H24,
            CoordinatorOptions {
                reanalyze_on_range_change: true,
            },
        );

        // Apply only the fetch so the 24h analysis is still pending.
        coord.refresh(false);
        let fetched = coord.next_event().await.unwrap();
        assert!(matches!(fetched, CoordinatorEvent::Fetched { .. }));
        coord.apply(fetched);
        assert!(coord.state().analysis_loading);

        coord.set_range(TimeRange::Y1);
        assert!(coord.state().analysis.is_none());
        assert!(!coord.state().analysis_loading);
        coord.settle().await;

        assert_eq!(analyst.calls(), 2);
        assert_eq!(coord.state().range, TimeRange::Y1);
        assert!(coord.state().analysis.is_some());
        assert!(!coord.state().analysis_loading);
    }

    #[tokio::test]
    async fn late_analysis_of_old_range_is_dropped() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = Coordinator::new(
            market.clone(),
            analyst.clone(),
            TimeRange::H24,
            CoordinatorOptions {
                reanalyze_on_range_change: true,
            },
        );
        coord.set_range(TimeRange::D7);
        coord.settle().await;

        coord.apply(CoordinatorEvent::AnalysisReady {
            generation: 0,
            analysis: MarketAnalysis::unavailable(),
        });
        let analysis = coord.state().analysis.as_ref().unwrap();
        assert_eq!(analysis.sentiment, Sentiment::Bullish);
    }

    #[tokio::test]
    async fn panicking_fetch_clears_loading_and_reports_error() {
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = Coordinator::new(
            Arc::new(PanickingMarket),
            analyst.clone(),
            TimeRange::H24,
            CoordinatorOptions::default(),
        );

        coord.refresh(false);
        assert!(coord.state().refresh.loading);
        coord.settle().await;

        let state = coord.state();
        assert!(!state.refresh.loading);
        assert!(state.refresh.last_error.is_some());
        assert!(state.price.is_none());
        assert_eq!(analyst.calls(), 0);
    }

    #[tokio::test]
    async fn silent_completion_keeps_pending_visible_refresh_loading() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);

        coord.refresh(false);
        coord.refresh(true);

        let mut events = Vec::new();
        while events.len() < 2 {
            events.push(coord.next_event().await.unwrap());
        }
        // Silent (newer) result first.
        events.sort_by_key(|e| match e {
            CoordinatorEvent::Fetched { generation, .. } => std::cmp::Reverse(*generation),
            _ => std::cmp::Reverse(0),
        });
        let mut events = events.into_iter();

        coord.apply(events.next().unwrap());
        assert!(coord.state().refresh.loading);
        assert!(coord.state().price.is_some());

        coord.apply(events.next().unwrap());
        assert!(!coord.state().refresh.loading);
        coord.settle().await;
        assert!(!coord.state().refresh.loading);
    }

    #[tokio::test]
    async fn stale_results_are_discarded() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);

        // Refresh for 24h, then switch to 30d before either completes.
        coord.refresh(false);
        coord.set_range(TimeRange::D30);

        let mut events = Vec::new();
        while events.len() < 2 {
            events.push(coord.next_event().await.unwrap());
        }
        // Deliver the newer generation first, then the older 24h result.
        events.sort_by_key(|e| match e {
            CoordinatorEvent::Fetched { generation, .. } => std::cmp::Reverse(*generation),
            _ => std::cmp::Reverse(0),
        });
        for event in events {
            coord.apply(event);
        }
        coord.settle().await;

        let state = coord.state();
        assert_eq!(state.range, TimeRange::D30);
        assert_eq!(state.chart[0].price, TimeRange::D30.index() as f64);
        assert!(!state.refresh.loading);
    }

    #[tokio::test]
    async fn result_for_abandoned_range_is_ignored() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);

        coord.apply(CoordinatorEvent::Fetched {
            generation: 99,
            range: TimeRange::Y10,
            silent: true,
            outcome: Err(FetchError::Status(500)),
        });
        assert!(coord.state().refresh.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_drive_silent_refreshes() {
        let market = Arc::new(FakeMarket::with_price(0.2));
        let analyst = Arc::new(FakeAnalyst::bullish());
        let mut coord = coordinator(&market, &analyst);

        let timer = coord.start(Duration::from_secs(60));
        assert!(coord.state().refresh.loading);
        coord.settle().await;
        assert_eq!(market.chart_calls().len(), 1);

        let event = coord.next_event().await.unwrap();
        assert!(matches!(event, CoordinatorEvent::Tick));
        coord.apply(event);
        assert!(!coord.state().refresh.loading);
        coord.settle().await;
        assert_eq!(market.chart_calls().len(), 2);

        drop(timer);
        let next = tokio::time::timeout(Duration::from_secs(600), coord.next_event()).await;
        assert!(next.is_err(), "timer kept ticking after drop");
    }
}
