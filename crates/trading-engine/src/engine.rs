//! Tick-driven trading loop.
//!
//! Each tick runs a fixed sequence of phases: refresh quotes and equity,
//! take profits in tranches, evaluate stops, consult the drawdown monitor
//! and circuit breaker, then consider one new entry. Gateway failures are
//! absorbed at the call site and retried naturally on a later tick; only
//! book-invariant violations abort a tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use broker_core::gateway::{
    CandidateSource, MarketDataClient, Notifier, OrderGateway, RegimeSource, TradeJournal,
};
use broker_core::types::{
    AlertEvent, Candle, DailySummary, MarketRegime, OrderReceipt, OrderRequest, OrderSide,
    Position, TradeCandidate, TradeReason, TradeRecord,
};
use broker_core::{Error, Result};
use risk_manager::{
    average_true_range, AlertLevel, BreakerStatus, BreakerTrip, CircuitBreaker, DrawdownMonitor,
    DrawdownStatus, DynamicStopCalculator, KellyCalculator, PositionReducer, PositionSizer,
    PositionSnapshot, SizeContext, StopLevels,
};

use crate::book::PositionBook;
use crate::settings::AgentSettings;

/// Engine loop parameters. Risk-component configuration lives with the
/// components themselves; this is only what the loop needs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum simultaneous open positions.
    pub max_positions: usize,
    /// Maximum new entries per trading day.
    pub max_trades_per_day: u32,
    /// Pause between ticks.
    pub tick_interval: Duration,
    /// Pause after a failed tick.
    pub error_backoff: Duration,
    /// Session open, UTC.
    pub market_start: NaiveTime,
    /// Session close, UTC.
    pub market_end: NaiveTime,
    /// Flatten everything this many minutes before the close. Zero or
    /// negative disables the time exit.
    pub time_exit_minutes: i64,
    /// Candidates below this volume ratio are skipped.
    pub min_volume_ratio: Decimal,
    /// Candidates that already moved more than this fraction are skipped.
    pub max_change_pct: Decimal,
    /// Gain at which the first profit tranche fires.
    pub partial_first_pct: Decimal,
    /// Fraction of the position sold by the first tranche.
    pub partial_first_ratio: Decimal,
    /// Gain at which the remainder is sold.
    pub partial_second_pct: Decimal,
    /// Derive stops and targets from ATR instead of fixed percentages.
    pub use_dynamic_stops: bool,
    /// Trail stops behind the high-water mark.
    pub use_trailing_stop: bool,
    /// Stop distance when dynamic stops are disabled.
    pub stop_loss_pct: Decimal,
    /// Target distance when dynamic stops are disabled.
    pub take_profit_pct: Decimal,
    /// Daily returns pulled from the journal for Kelly sizing.
    pub kelly_history_days: u32,
    /// OHLCV days fetched for ATR and volatility estimates.
    pub atr_history_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_positions: 5,
            max_trades_per_day: 10,
            tick_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(10),
            market_start: NaiveTime::from_hms_opt(13, 30, 0).unwrap_or(NaiveTime::MIN),
            market_end: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN),
            time_exit_minutes: 15,
            min_volume_ratio: Decimal::new(15, 1),   // 1.5x
            max_change_pct: Decimal::new(8, 2),      // 8%
            partial_first_pct: Decimal::new(5, 2),   // +5%
            partial_first_ratio: Decimal::new(5, 1), // half
            partial_second_pct: Decimal::new(10, 2), // +10%
            use_dynamic_stops: true,
            use_trailing_stop: true,
            stop_loss_pct: Decimal::new(3, 2),
            take_profit_pct: Decimal::new(8, 2),
            kelly_history_days: 60,
            atr_history_days: 30,
        }
    }
}

/// The phases of one tick, in execution order. Cancellation is honored
/// between phases, never inside one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RefreshQuotes,
    TakeProfits,
    EvaluateStops,
    AdmissionGate,
    EnterPositions,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::RefreshQuotes,
        Phase::TakeProfits,
        Phase::EvaluateStops,
        Phase::AdmissionGate,
        Phase::EnterPositions,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::RefreshQuotes => "refresh_quotes",
            Phase::TakeProfits => "take_profits",
            Phase::EvaluateStops => "evaluate_stops",
            Phase::AdmissionGate => "admission_gate",
            Phase::EnterPositions => "enter_positions",
        }
    }
}

/// Lifetime counters for one engine instance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub ticks: u64,
    pub orders_submitted: u64,
    pub orders_rejected: u64,
    pub entries_opened: u64,
    pub partial_sales: u64,
    pub positions_closed: u64,
    pub tick_errors: u64,
}

/// The decision-and-execution core. Owns the position book and every risk
/// component; all external access goes through the gateway traits.
pub struct TradingEngine {
    config: EngineConfig,
    market_data: Arc<dyn MarketDataClient>,
    gateway: Arc<dyn OrderGateway>,
    candidates: Arc<dyn CandidateSource>,
    journal: Option<Arc<dyn TradeJournal>>,
    notifier: Option<Arc<dyn Notifier>>,
    regime: Option<Arc<dyn RegimeSource>>,
    book: PositionBook,
    kelly: KellyCalculator,
    sizer: PositionSizer,
    stops: DynamicStopCalculator,
    drawdown: DrawdownMonitor,
    breaker: CircuitBreaker,
    reducer: PositionReducer,
    stats: EngineStats,
    equity: Decimal,
    last_alert: AlertLevel,
    last_breaker_stage: u8,
    trading_day: Option<NaiveDate>,
    entries_today: u32,
    day_trades: u32,
    day_wins: u32,
    day_losses: u32,
    day_realized: Decimal,
    day_open_equity: Decimal,
    day_candidates: Vec<TradeCandidate>,
    candidates_day: Option<NaiveDate>,
    /// Symbols bought or exited today; never re-entered the same day.
    symbols_traded_today: HashSet<String>,
    /// Per-symbol daily ATR, refreshed once per trading day.
    atr_cache: HashMap<String, (NaiveDate, Decimal)>,
    shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl TradingEngine {
    /// Build an engine with default risk components. Use
    /// [`TradingEngine::from_settings`] for a fully configured instance.
    /// Journal, notifier, and regime source are attached through the
    /// `with_*` builders; the engine runs the same without them.
    pub fn new(
        config: EngineConfig,
        market_data: Arc<dyn MarketDataClient>,
        gateway: Arc<dyn OrderGateway>,
        candidates: Arc<dyn CandidateSource>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            market_data,
            gateway,
            candidates,
            journal: None,
            notifier: None,
            regime: None,
            book: PositionBook::new(),
            kelly: KellyCalculator::new(Default::default()),
            sizer: PositionSizer::new(Default::default()),
            stops: DynamicStopCalculator::new(Default::default()),
            drawdown: DrawdownMonitor::new(Default::default()),
            breaker: CircuitBreaker::new(Default::default()),
            reducer: PositionReducer::new(Default::default()),
            stats: EngineStats::default(),
            equity: Decimal::ZERO,
            last_alert: AlertLevel::Normal,
            last_breaker_stage: 0,
            trading_day: None,
            entries_today: 0,
            day_trades: 0,
            day_wins: 0,
            day_losses: 0,
            day_realized: Decimal::ZERO,
            day_open_equity: Decimal::ZERO,
            day_candidates: Vec::new(),
            candidates_day: None,
            symbols_traded_today: HashSet::new(),
            atr_cache: HashMap::new(),
            shutdown_rx,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Build an engine wired from loaded settings.
    pub fn from_settings(
        settings: &AgentSettings,
        market_data: Arc<dyn MarketDataClient>,
        gateway: Arc<dyn OrderGateway>,
        candidates: Arc<dyn CandidateSource>,
    ) -> Result<Self> {
        let config = settings.engine_config()?;
        let mut engine = Self::new(config, market_data, gateway, candidates);
        engine.kelly = KellyCalculator::new(settings.kelly.clone());
        engine.sizer = PositionSizer::new(settings.sizer.clone());
        engine.stops = DynamicStopCalculator::new(settings.stops.clone());
        engine.drawdown = DrawdownMonitor::new(settings.drawdown.clone());
        engine.breaker = CircuitBreaker::new(settings.breaker.clone());
        engine.reducer = PositionReducer::new(settings.reducer.clone());
        Ok(engine)
    }

    /// Attach a trade journal. Without one, trade records and daily
    /// summaries are dropped and Kelly sizes without history.
    pub fn with_journal(mut self, journal: Arc<dyn TradeJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Attach a notifier for alert events.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Attach an optional regime detector. The engine behaves identically
    /// without one; sizing just skips the regime adjustment.
    pub fn with_regime(mut self, regime: Arc<dyn RegimeSource>) -> Self {
        self.regime = Some(regime);
        self
    }

    /// Sender half of the shutdown signal. Available exactly once.
    pub fn take_shutdown_handle(&mut self) -> Option<watch::Sender<bool>> {
        self.shutdown_tx.take()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.breaker.status()
    }

    pub fn breaker_history(&self) -> Vec<BreakerTrip> {
        self.breaker.history()
    }

    pub fn drawdown_status(&self) -> Option<DrawdownStatus> {
        self.drawdown.status()
    }

    /// Manually trip the breaker at `stage` and run the matching position
    /// reduction, exactly as an automatic trip would.
    pub async fn force_breaker_trigger(&mut self, stage: u8) -> Result<BreakerStatus> {
        let status = self.breaker.force_trigger(stage);
        if status.just_triggered {
            self.notify(AlertEvent::BreakerTriggered {
                stage: status.stage,
                position_reduction: status.position_reduction,
            })
            .await;
            self.respond_to_trigger(status.stage, status.position_reduction)
                .await?;
        }
        self.last_breaker_stage = status.stage;
        Ok(status)
    }

    /// Manually release the breaker, clearing its stage.
    pub async fn force_breaker_release(&mut self) -> BreakerStatus {
        let status = self.breaker.force_release();
        self.notify(AlertEvent::BreakerReleased).await;
        self.last_breaker_stage = status.stage;
        status
    }

    /// Run until shutdown is signalled. Ticks only inside market hours;
    /// a failed tick backs off and the loop continues.
    pub async fn run(&mut self) -> Result<()> {
        let balance = self.gateway.balance().await?;
        if balance.total_equity <= Decimal::ZERO {
            return Err(Error::Config {
                message: format!(
                    "account equity must be positive to trade, got {}",
                    balance.total_equity
                ),
            });
        }
        self.equity = balance.total_equity;
        self.day_open_equity = self.equity;
        self.drawdown.update(self.equity, Utc::now());
        info!(equity = %self.equity, "trading engine started");

        loop {
            if self.shutdown_requested() {
                break;
            }
            if !self.in_market_hours(Utc::now()) {
                debug!("outside market hours");
                self.idle(self.config.tick_interval).await;
                continue;
            }
            match self.tick().await {
                Ok(()) => self.idle(self.config.tick_interval).await,
                Err(err) => {
                    self.stats.tick_errors += 1;
                    error!(error = %err, "tick failed");
                    self.idle(self.config.error_backoff).await;
                }
            }
        }

        info!(ticks = self.stats.ticks, "trading engine stopped");
        Ok(())
    }

    /// Run the phases of a single tick. Public so a host can drive the
    /// engine one tick at a time.
    pub async fn tick(&mut self) -> Result<()> {
        self.stats.ticks += 1;
        self.roll_trading_day().await;
        for phase in Phase::ALL {
            if self.shutdown_requested() {
                info!(phase = phase.name(), "shutdown requested, stopping mid-tick");
                break;
            }
            debug!(phase = phase.name(), "phase start");
            match phase {
                Phase::RefreshQuotes => self.refresh_quotes().await?,
                Phase::TakeProfits => self.take_profits().await?,
                Phase::EvaluateStops => self.evaluate_stops().await?,
                Phase::AdmissionGate => self.admission_gate().await?,
                Phase::EnterPositions => self.enter_positions().await?,
            }
        }
        Ok(())
    }

    // Private methods

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    async fn idle(&mut self, duration: Duration) {
        let mut shutdown = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = shutdown.changed() => {}
        }
    }

    fn in_market_hours(&self, now: DateTime<Utc>) -> bool {
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = now.time();
        time >= self.config.market_start && time < self.config.market_end
    }

    fn near_market_close(&self, now: DateTime<Utc>) -> bool {
        if self.config.time_exit_minutes <= 0 {
            return false;
        }
        let remaining = self.config.market_end.signed_duration_since(now.time());
        remaining >= chrono::Duration::zero()
            && remaining <= chrono::Duration::minutes(self.config.time_exit_minutes)
    }

    /// Close out the previous trading day, if any, and reset daily state.
    async fn roll_trading_day(&mut self) {
        let today = Utc::now().date_naive();
        if self.trading_day == Some(today) {
            return;
        }
        if let Some(prev) = self.trading_day {
            let return_pct = if self.day_open_equity > Decimal::ZERO {
                (self.equity - self.day_open_equity) / self.day_open_equity
            } else {
                Decimal::ZERO
            };
            let summary = DailySummary {
                date: prev,
                realized_pnl: self.day_realized,
                return_pct,
                trades: self.day_trades,
                wins: self.day_wins,
                losses: self.day_losses,
            };
            info!(
                date = %prev,
                realized = %self.day_realized,
                return_pct = %return_pct,
                trades = self.day_trades,
                "daily summary"
            );
            if let Some(journal) = &self.journal {
                if let Err(err) = journal.record_daily_summary(&summary).await {
                    warn!(error = %err, "daily summary write failed");
                }
            }
        }
        self.trading_day = Some(today);
        self.entries_today = 0;
        self.day_trades = 0;
        self.day_wins = 0;
        self.day_losses = 0;
        self.day_realized = Decimal::ZERO;
        self.day_open_equity = self.equity;
        self.symbols_traded_today.clear();
    }

    /// Phase 1: refresh account equity, mark every open position, and keep
    /// per-symbol ATR current (once per day).
    async fn refresh_quotes(&mut self) -> Result<()> {
        match self.gateway.balance().await {
            Ok(balance) => {
                self.equity = balance.total_equity;
                if self.day_open_equity.is_zero() {
                    self.day_open_equity = self.equity;
                }
                let status = self.drawdown.update(self.equity, Utc::now());
                if status.alert_level > self.last_alert {
                    warn!(
                        level = %status.alert_level,
                        drawdown = %status.current_drawdown,
                        "drawdown alert level escalated"
                    );
                    self.notify(AlertEvent::DrawdownAlert {
                        level: status.alert_level.to_string(),
                        current_drawdown: status.current_drawdown,
                    })
                    .await;
                }
                self.last_alert = status.alert_level;
            }
            Err(err) => warn!(error = %err, "balance refresh failed, keeping last equity"),
        }

        for position in self.book.open_positions() {
            match self.market_data.current_price(&position.symbol).await {
                Ok(quote) => {
                    self.book
                        .update(&position.symbol, |p| p.update_price(quote.price));
                }
                Err(err) => {
                    warn!(symbol = %position.symbol, error = %err, "quote refresh failed");
                }
            }
            self.refresh_symbol_atr(&position.symbol).await;
        }
        Ok(())
    }

    /// Phase 2: sell half at the first profit target, everything at the
    /// second. The first tranche fires at most once per position.
    async fn take_profits(&mut self) -> Result<()> {
        for position in self.book.open_positions() {
            let gain = position.unrealized_return();
            if gain >= self.config.partial_second_pct {
                info!(
                    symbol = %position.symbol,
                    gain = %gain,
                    "second profit target hit, closing position"
                );
                self.submit_sell(&position, position.quantity, TradeReason::TakeProfit)
                    .await?;
            } else if !position.partial_sold && gain >= self.config.partial_first_pct {
                let tranche = (position.quantity * self.config.partial_first_ratio).floor();
                if tranche >= Decimal::ONE && tranche < position.quantity {
                    info!(
                        symbol = %position.symbol,
                        gain = %gain,
                        tranche = %tranche,
                        "first profit target hit, selling partial"
                    );
                    self.submit_sell(&position, tranche, TradeReason::PartialProfit)
                        .await?;
                } else {
                    debug!(symbol = %position.symbol, "position too small for a partial sale");
                }
            }
        }
        Ok(())
    }

    /// Phase 3: trailing-stop ratchet, hard stops, and the time exit near
    /// the close. Any hit closes the remaining shares.
    async fn evaluate_stops(&mut self) -> Result<()> {
        let near_close = self.near_market_close(Utc::now());
        for position in self.book.open_positions() {
            let price = position.current_price;
            let mut trigger: Option<TradeReason> = None;

            if self.config.use_trailing_stop {
                if let Some(update) = self.stops.update_trailing(&position.symbol, price) {
                    if update.stop > position.stop_loss {
                        self.book
                            .update(&position.symbol, |p| p.raise_stop(update.stop));
                    }
                    if update.triggered {
                        trigger = Some(if update.activated {
                            TradeReason::TrailingStop
                        } else {
                            TradeReason::StopLoss
                        });
                    }
                }
            }
            if trigger.is_none() && price <= position.stop_loss {
                trigger = Some(TradeReason::StopLoss);
            }
            if trigger.is_none() && near_close {
                debug!(symbol = %position.symbol, "flattening before the close");
                trigger = Some(TradeReason::TimeExit);
            }

            if let Some(reason) = trigger {
                // Re-read: an earlier phase may have sold part of this position.
                if let Some(current) = self.book.get(&position.symbol) {
                    info!(
                        symbol = %current.symbol,
                        reason = ?reason,
                        stop = %current.stop_loss,
                        price = %price,
                        "exit triggered"
                    );
                    self.submit_sell(&current, current.quantity, reason).await?;
                }
            }
        }
        Ok(())
    }

    /// Phase 4: feed the latest drawdown status into the circuit breaker
    /// and run the reduction response on a fresh trip.
    async fn admission_gate(&mut self) -> Result<()> {
        let Some(dd) = self.drawdown.status() else {
            return Ok(());
        };
        let status = self.breaker.check(&dd);
        if status.just_triggered {
            warn!(
                stage = status.stage,
                drawdown = %dd.current_drawdown,
                "circuit breaker tripped"
            );
            self.notify(AlertEvent::BreakerTriggered {
                stage: status.stage,
                position_reduction: status.position_reduction,
            })
            .await;
            self.respond_to_trigger(status.stage, status.position_reduction)
                .await?;
        } else if self.last_breaker_stage > 0 && status.stage == 0 {
            info!("circuit breaker released");
            self.notify(AlertEvent::BreakerReleased).await;
        }
        self.last_breaker_stage = status.stage;
        Ok(())
    }

    /// Phase 5: consider one new entry from today's ranked candidates.
    async fn enter_positions(&mut self) -> Result<()> {
        let breaker = self.breaker.status();
        if !breaker.can_trade {
            debug!(stage = breaker.stage, "entries halted by circuit breaker");
            return Ok(());
        }
        if self.book.len() >= self.config.max_positions {
            debug!("at position capacity");
            return Ok(());
        }
        if self.entries_today >= self.config.max_trades_per_day {
            debug!("daily trade limit reached");
            return Ok(());
        }
        if self.equity <= Decimal::ZERO {
            return Ok(());
        }
        self.ensure_candidates().await;

        let returns = match &self.journal {
            Some(journal) => match journal.daily_returns(self.config.kelly_history_days).await {
                Ok(returns) => returns,
                Err(err) => {
                    warn!(error = %err, "journal history unavailable, sizing without it");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        let regime = self.detect_regime().await;

        let candidates = self.day_candidates.clone();
        for candidate in &candidates {
            if self.book.contains(&candidate.symbol)
                || self.symbols_traded_today.contains(&candidate.symbol)
            {
                continue;
            }
            if candidate.volume_ratio < self.config.min_volume_ratio {
                debug!(symbol = %candidate.symbol, "volume ratio below threshold");
                continue;
            }
            if candidate.change_pct.abs() > self.config.max_change_pct {
                debug!(symbol = %candidate.symbol, "already moved too far today");
                continue;
            }

            let quote = match self.market_data.current_price(&candidate.symbol).await {
                Ok(quote) => quote,
                Err(err) => {
                    warn!(symbol = %candidate.symbol, error = %err, "quote unavailable");
                    continue;
                }
            };
            let entry = quote.price;
            if entry <= Decimal::ZERO {
                continue;
            }
            let candles = match self
                .market_data
                .ohlcv(&candidate.symbol, self.config.atr_history_days)
                .await
            {
                Ok(candles) => candles,
                Err(err) => {
                    debug!(symbol = %candidate.symbol, error = %err, "no history, using fallbacks");
                    Vec::new()
                }
            };
            let levels = self.entry_levels(entry, &candles);

            let mut ctx = SizeContext::new(self.equity, entry, levels.stop);
            ctx.atr = levels.atr;
            ctx.realized_volatility = realized_volatility(&candles);
            ctx.signal_strength = Some(candidate.signal_strength());
            ctx.kelly = Some(self.kelly.calculate(&returns, Some(candidate.confidence)));
            ctx.regime = regime;
            ctx.open_risk = self.book.open_risk_value() / self.equity;

            let mut decision = self.sizer.size(&ctx);
            if breaker.position_reduction > Decimal::ZERO {
                let scale = (Decimal::ONE - breaker.position_reduction).max(Decimal::ZERO);
                decision.fraction *= scale;
                decision.notional *= scale;
            }
            if decision.is_zero() {
                debug!(symbol = %candidate.symbol, "sizer declined entry");
                continue;
            }
            let quantity = decision.shares(entry);
            if quantity < Decimal::ONE {
                debug!(symbol = %candidate.symbol, "sized below one share");
                continue;
            }

            let request = OrderRequest::market(candidate.symbol.clone(), OrderSide::Buy, quantity);
            info!(
                symbol = %candidate.symbol,
                quantity = %quantity,
                notional = %decision.notional,
                stop = %levels.stop,
                target = %levels.target,
                "submitting entry order"
            );
            match self.gateway.place_order(&request).await {
                Ok(receipt) => {
                    self.stats.orders_submitted += 1;
                    self.day_trades += 1;
                    self.record_entry(&receipt, &levels).await?;
                }
                Err(err) => {
                    self.stats.orders_rejected += 1;
                    warn!(symbol = %candidate.symbol, error = %err, "entry order failed");
                }
            }
            // One order attempt per tick, filled or not.
            break;
        }
        Ok(())
    }

    fn entry_levels(&self, entry: Decimal, candles: &[Candle]) -> StopLevels {
        if self.config.use_dynamic_stops {
            self.stops.compute_levels(entry, candles)
        } else {
            StopLevels {
                stop: entry * (Decimal::ONE - self.config.stop_loss_pct),
                target: entry * (Decimal::ONE + self.config.take_profit_pct),
                atr: None,
                fallback: true,
            }
        }
    }

    /// Book a filled entry, arm its trailing stop, and record it.
    async fn record_entry(&mut self, receipt: &OrderReceipt, levels: &StopLevels) -> Result<()> {
        let fill = receipt.fill_price;
        // Levels were computed from the quote; a worse fill could invert them.
        let stop = if levels.stop < fill {
            levels.stop
        } else {
            fill * (Decimal::ONE - self.config.stop_loss_pct)
        };
        let target = if levels.target > fill {
            levels.target
        } else {
            fill * (Decimal::ONE + self.config.take_profit_pct)
        };

        let position = Position::open(
            receipt.symbol.clone(),
            receipt.quantity,
            fill,
            stop,
            target,
        )
        .map_err(Error::Validation)?;
        if self.config.use_trailing_stop {
            self.stops
                .arm_trailing(&receipt.symbol, fill, stop, levels.atr);
        }
        self.book.open(position)?;
        self.entries_today += 1;
        self.stats.entries_opened += 1;
        self.symbols_traded_today.insert(receipt.symbol.clone());
        info!(
            symbol = %receipt.symbol,
            quantity = %receipt.quantity,
            fill = %fill,
            "position opened"
        );

        self.record(TradeRecord::new(
            receipt.symbol.clone(),
            OrderSide::Buy,
            receipt.quantity,
            fill,
            TradeReason::Entry,
            None,
        ))
        .await;
        self.notify(AlertEvent::PositionOpened {
            symbol: receipt.symbol.clone(),
            quantity: receipt.quantity,
            price: fill,
        })
        .await;
        Ok(())
    }

    /// Sell `quantity` of an open position. Selling everything closes it.
    /// A gateway rejection is absorbed; the condition that prompted the
    /// sell re-fires on a later tick.
    async fn submit_sell(
        &mut self,
        position: &Position,
        quantity: Decimal,
        reason: TradeReason,
    ) -> Result<()> {
        let quantity = quantity.min(position.quantity);
        if quantity <= Decimal::ZERO {
            return Ok(());
        }
        let request = OrderRequest::market(position.symbol.clone(), OrderSide::Sell, quantity);
        let receipt = match self.gateway.place_order(&request).await {
            Ok(receipt) => receipt,
            Err(err) => {
                self.stats.orders_rejected += 1;
                warn!(
                    symbol = %position.symbol,
                    reason = ?reason,
                    error = %err,
                    "sell order failed"
                );
                return Ok(());
            }
        };
        self.stats.orders_submitted += 1;
        self.day_trades += 1;
        let fill = receipt.fill_price;
        let before = position.realized_pnl;

        if quantity == position.quantity {
            let closed = self.book.close(&position.symbol, fill)?;
            let delta = closed.realized_pnl - before;
            self.day_realized += delta;
            if closed.realized_pnl > Decimal::ZERO {
                self.day_wins += 1;
            } else if closed.realized_pnl < Decimal::ZERO {
                self.day_losses += 1;
            }
            self.stats.positions_closed += 1;
            self.stops.remove_trailing(&position.symbol);
            self.symbols_traded_today.insert(position.symbol.clone());
            info!(
                symbol = %position.symbol,
                reason = ?reason,
                realized = %closed.realized_pnl,
                "position closed"
            );
            self.record(TradeRecord::new(
                position.symbol.clone(),
                OrderSide::Sell,
                quantity,
                fill,
                reason,
                Some(delta),
            ))
            .await;
            self.notify(AlertEvent::PositionClosed {
                symbol: position.symbol.clone(),
                realized_pnl: closed.realized_pnl,
                reason,
            })
            .await;
        } else {
            self.book.apply_partial_sale(&position.symbol, quantity, fill)?;
            let after = self
                .book
                .get(&position.symbol)
                .map(|p| p.realized_pnl)
                .unwrap_or(before);
            let delta = after - before;
            self.day_realized += delta;
            self.stats.partial_sales += 1;
            info!(
                symbol = %position.symbol,
                quantity = %quantity,
                price = %fill,
                realized = %delta,
                "partial sale filled"
            );
            self.record(TradeRecord::new(
                position.symbol.clone(),
                OrderSide::Sell,
                quantity,
                fill,
                reason,
                Some(delta),
            ))
            .await;
            if reason == TradeReason::PartialProfit {
                self.notify(AlertEvent::PartialProfitTaken {
                    symbol: position.symbol.clone(),
                    quantity_sold: quantity,
                    price: fill,
                })
                .await;
            }
        }
        Ok(())
    }

    /// Execute the reduction plan for a fresh breaker trip. Stage 3 is a
    /// full liquidation; lower stages shed the configured fraction.
    async fn respond_to_trigger(&mut self, stage: u8, reduction: Decimal) -> Result<()> {
        let snapshots = self.reduction_snapshots();
        if snapshots.is_empty() {
            return Ok(());
        }
        let plan = if stage >= 3 {
            self.reducer.emergency_plan(&snapshots)
        } else {
            self.reducer.build_plan(&snapshots, reduction)
        };
        if plan.orders.is_empty() {
            return Ok(());
        }
        warn!(
            orders = plan.orders.len(),
            planned_value = %plan.planned_value,
            strategy = ?plan.strategy,
            "executing reduction plan"
        );
        for order in &plan.orders {
            if let Some(current) = self.book.get(&order.symbol) {
                self.submit_sell(&current, order.quantity, TradeReason::RiskReduction)
                    .await?;
            }
        }
        Ok(())
    }

    fn reduction_snapshots(&self) -> Vec<PositionSnapshot> {
        self.book
            .open_positions()
            .iter()
            .map(|position| PositionSnapshot {
                symbol: position.symbol.clone(),
                quantity: position.quantity,
                current_price: position.current_price,
                unrealized_return: position.unrealized_return(),
                volatility: self.atr_cache.get(&position.symbol).and_then(|(_, atr)| {
                    if position.current_price > Decimal::ZERO {
                        Some(atr / position.current_price)
                    } else {
                        None
                    }
                }),
                correlation: None,
            })
            .collect()
    }

    /// Pull the day's ranked candidates once; a failed fetch retries on
    /// the next tick.
    async fn ensure_candidates(&mut self) {
        let today = Utc::now().date_naive();
        if self.candidates_day == Some(today) {
            return;
        }
        match self.candidates.ranked_candidates().await {
            Ok(list) => {
                info!(count = list.len(), "daily candidates loaded");
                self.day_candidates = list;
                self.candidates_day = Some(today);
            }
            Err(err) => warn!(error = %err, "candidate refresh failed, retrying next tick"),
        }
    }

    async fn detect_regime(&self) -> Option<MarketRegime> {
        let source = self.regime.as_ref()?;
        match source.detect_regime().await {
            Ok(reading) => Some(reading.regime),
            Err(err) => {
                debug!(error = %err, "regime detection failed, sizing without it");
                None
            }
        }
    }

    /// Refresh a symbol's ATR once per trading day, feeding the trailing
    /// ratchet a current volatility estimate.
    async fn refresh_symbol_atr(&mut self, symbol: &str) {
        if !self.config.use_trailing_stop && !self.config.use_dynamic_stops {
            return;
        }
        let today = Utc::now().date_naive();
        if self
            .atr_cache
            .get(symbol)
            .is_some_and(|(day, _)| *day == today)
        {
            return;
        }
        match self
            .market_data
            .ohlcv(symbol, self.config.atr_history_days)
            .await
        {
            Ok(candles) => {
                if let Some(atr) = average_true_range(&candles, self.stops.config().atr_period) {
                    self.atr_cache.insert(symbol.to_string(), (today, atr));
                    self.stops.refresh_atr(symbol, atr);
                }
            }
            Err(err) => debug!(symbol, error = %err, "atr refresh failed"),
        }
    }

    /// Journal and notifier are one-way sinks; a failure is logged and
    /// never affects the trade that produced it.
    async fn record(&self, record: TradeRecord) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(err) = journal.record_trade(&record).await {
            warn!(error = %err, "journal write failed");
        }
    }

    async fn notify(&self, event: AlertEvent) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(err) = notifier.notify(&event).await {
            debug!(error = %err, "notifier delivery failed");
        }
    }
}

/// Sample standard deviation of daily close-to-close returns.
fn realized_volatility(candles: &[Candle]) -> Option<Decimal> {
    let closes: Vec<f64> = candles.iter().filter_map(|c| c.close.to_f64()).collect();
    if closes.len() < 3 {
        return None;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|pair| pair[0] != 0.0)
        .map(|pair| (pair[1] - pair[0]) / pair[0])
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|r| (r - mean).powi(2))
        .sum::<f64>()
        / (returns.len() - 1) as f64;
    Decimal::from_f64_retain(variance.sqrt())
}
