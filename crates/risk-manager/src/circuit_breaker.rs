//! Staged circuit breaker driven by drawdown status.
//!
//! The breaker owns no market state of its own; every transition happens
//! inside [`CircuitBreaker::check`] from the drawdown snapshot it is
//! handed. The engine consults the resulting [`BreakerStatus`] before
//! risking new capital.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::drawdown::{AlertLevel, DrawdownStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Daily drawdown that trips stage 1.
    pub daily_loss_cap: Decimal,
    /// Weekly drawdown that trips stage 2.
    pub weekly_loss_cap: Decimal,
    /// All-time max drawdown that trips stage 3.
    pub max_drawdown_cap: Decimal,
    pub cooldown_hours: i64,
    /// Recovery (drop in current drawdown since the trip) that releases
    /// the breaker before the cooldown clock runs out.
    pub auto_release_profit: Decimal,
    /// Bounded trip-history length.
    pub history_len: usize,
    pub enabled: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            daily_loss_cap: Decimal::new(3, 2),   // 3%
            weekly_loss_cap: Decimal::new(8, 2),  // 8%
            max_drawdown_cap: Decimal::new(15, 2), // 15%
            cooldown_hours: 24,
            auto_release_profit: Decimal::new(5, 2), // 5% recovery
            history_len: 32,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Trading unrestricted.
    Active,
    /// Loss limits breached and still present.
    Triggered,
    /// Limits no longer breached; waiting out the clock.
    Cooldown,
}

/// What tripped the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripCause {
    DailyLoss,
    WeeklyLoss,
    CriticalAlert,
    MaxDrawdown,
    Manual,
}

/// One entry in the bounded trip history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerTrip {
    pub id: Uuid,
    pub stage: u8,
    pub cause: TripCause,
    /// Current drawdown at the moment of the trip.
    pub drawdown: Decimal,
    pub at: DateTime<Utc>,
}

/// Snapshot handed to the engine after every check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    /// 0 when released, otherwise 1 to 3.
    pub stage: u8,
    /// Fraction of new-entry size to shave off (1.0 halts entries).
    pub position_reduction: Decimal,
    /// False only at stage 3.
    pub can_trade: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub triggered_at: Option<DateTime<Utc>>,
    /// True exactly once per trip or escalation, so callers can run
    /// their response (reduction plan, notification) a single time.
    pub just_triggered: bool,
}

/// Escalating admission control. Owned by the engine and consulted once
/// per tick; all mutation happens through `&mut self`.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    stage: u8,
    cooldown_until: Option<DateTime<Utc>>,
    triggered_at: Option<DateTime<Utc>>,
    /// Current drawdown when the episode tripped; recovery is measured
    /// against this.
    drawdown_at_trigger: Decimal,
    /// Max drawdown already acknowledged by a released episode. Because
    /// max drawdown never decreases, stage 3 only re-trips once it sinks
    /// deeper than this.
    max_drawdown_floor: Decimal,
    history: VecDeque<BreakerTrip>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Active,
            stage: 0,
            cooldown_until: None,
            triggered_at: None,
            drawdown_at_trigger: Decimal::ZERO,
            max_drawdown_floor: Decimal::ZERO,
            history: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Current status without evaluating anything.
    pub fn status(&self) -> BreakerStatus {
        self.snapshot(false)
    }

    /// Recorded trips, oldest first.
    pub fn history(&self) -> Vec<BreakerTrip> {
        self.history.iter().cloned().collect()
    }

    /// Evaluate releases and triggers against a fresh drawdown snapshot.
    /// Release conditions run first so a recovered breaker re-arms in the
    /// same call that observes the recovery.
    pub fn check(&mut self, drawdown: &DrawdownStatus) -> BreakerStatus {
        if !self.config.enabled {
            return self.snapshot(false);
        }

        let now = Utc::now();
        match self.state {
            BreakerState::Active => {}
            BreakerState::Triggered => {
                if self.recovered(drawdown) {
                    self.release(drawdown, "drawdown recovered");
                }
            }
            BreakerState::Cooldown => {
                let elapsed = self
                    .cooldown_until
                    .map(|until| now >= until)
                    .unwrap_or(true);
                if elapsed {
                    self.release(drawdown, "cooldown elapsed");
                } else if self.recovered(drawdown) {
                    self.release(drawdown, "drawdown recovered");
                }
            }
        }

        let mut just_triggered = false;
        match self.evaluate_stage(drawdown) {
            Some((stage, cause)) => {
                // Stages only escalate within an episode.
                if stage > self.stage {
                    self.trip(stage, cause, drawdown, now);
                    just_triggered = true;
                }
            }
            None => {
                if self.state == BreakerState::Triggered {
                    // Limits cleared but not enough recovery: wait out
                    // the cooldown clock.
                    self.state = BreakerState::Cooldown;
                }
            }
        }

        self.snapshot(just_triggered)
    }

    /// Manual trip, bypassing the drawdown evaluation.
    pub fn force_trigger(&mut self, stage: u8) -> BreakerStatus {
        let stage = stage.clamp(1, 3);
        let now = Utc::now();
        self.state = BreakerState::Triggered;
        self.stage = stage;
        self.triggered_at = Some(now);
        self.cooldown_until = Some(now + Duration::hours(self.config.cooldown_hours));
        self.push_trip(BreakerTrip {
            id: Uuid::new_v4(),
            stage,
            cause: TripCause::Manual,
            drawdown: self.drawdown_at_trigger,
            at: now,
        });
        warn!(stage, "circuit breaker forced");
        self.snapshot(true)
    }

    /// Manual release back to unrestricted trading.
    pub fn force_release(&mut self) -> BreakerStatus {
        self.state = BreakerState::Active;
        self.stage = 0;
        self.cooldown_until = None;
        self.triggered_at = None;
        self.drawdown_at_trigger = Decimal::ZERO;
        info!("circuit breaker released manually");
        self.snapshot(false)
    }

    fn recovered(&self, drawdown: &DrawdownStatus) -> bool {
        self.drawdown_at_trigger - drawdown.current_drawdown >= self.config.auto_release_profit
    }

    fn evaluate_stage(&self, drawdown: &DrawdownStatus) -> Option<(u8, TripCause)> {
        if drawdown.max_drawdown > self.config.max_drawdown_cap
            && drawdown.max_drawdown > self.max_drawdown_floor
        {
            Some((3, TripCause::MaxDrawdown))
        } else if drawdown.weekly_drawdown > self.config.weekly_loss_cap {
            Some((2, TripCause::WeeklyLoss))
        } else if drawdown.alert_level == AlertLevel::Critical {
            Some((2, TripCause::CriticalAlert))
        } else if drawdown.daily_drawdown > self.config.daily_loss_cap {
            Some((1, TripCause::DailyLoss))
        } else {
            None
        }
    }

    fn trip(&mut self, stage: u8, cause: TripCause, drawdown: &DrawdownStatus, now: DateTime<Utc>) {
        self.state = BreakerState::Triggered;
        self.stage = stage;
        self.triggered_at = Some(now);
        self.cooldown_until = Some(now + Duration::hours(self.config.cooldown_hours));
        self.drawdown_at_trigger = self.drawdown_at_trigger.max(drawdown.current_drawdown);
        self.push_trip(BreakerTrip {
            id: Uuid::new_v4(),
            stage,
            cause,
            drawdown: drawdown.current_drawdown,
            at: now,
        });
        warn!(
            stage,
            ?cause,
            drawdown = %drawdown.current_drawdown,
            "circuit breaker tripped"
        );
    }

    fn release(&mut self, drawdown: &DrawdownStatus, reason: &str) {
        self.max_drawdown_floor = self.max_drawdown_floor.max(drawdown.max_drawdown);
        self.state = BreakerState::Active;
        self.stage = 0;
        self.cooldown_until = None;
        self.triggered_at = None;
        self.drawdown_at_trigger = Decimal::ZERO;
        info!(reason, "circuit breaker released");
    }

    fn push_trip(&mut self, trip: BreakerTrip) {
        self.history.push_back(trip);
        while self.history.len() > self.config.history_len {
            self.history.pop_front();
        }
    }

    fn snapshot(&self, just_triggered: bool) -> BreakerStatus {
        BreakerStatus {
            state: self.state,
            stage: self.stage,
            position_reduction: stage_reduction(self.stage),
            can_trade: self.stage < 3,
            cooldown_until: self.cooldown_until,
            triggered_at: self.triggered_at,
            just_triggered,
        }
    }
}

/// New-entry size reduction per stage.
fn stage_reduction(stage: u8) -> Decimal {
    match stage {
        0 => Decimal::ZERO,
        1 => Decimal::new(50, 2),
        2 => Decimal::new(75, 2),
        _ => Decimal::ONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_status() -> DrawdownStatus {
        DrawdownStatus::default()
    }

    fn daily_breach() -> DrawdownStatus {
        DrawdownStatus {
            current_drawdown: Decimal::new(4, 2),
            daily_drawdown: Decimal::new(4, 2),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_status_stays_active() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        let status = breaker.check(&clean_status());

        assert_eq!(status.state, BreakerState::Active);
        assert_eq!(status.stage, 0);
        assert_eq!(status.position_reduction, Decimal::ZERO);
        assert!(status.can_trade);
        assert!(!status.just_triggered);
    }

    #[test]
    fn test_daily_breach_trips_stage_one() {
        // 4% daily loss against the 3% cap
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        let status = breaker.check(&daily_breach());

        assert_eq!(status.state, BreakerState::Triggered);
        assert_eq!(status.stage, 1);
        assert_eq!(status.position_reduction, Decimal::new(50, 2));
        assert!(status.can_trade);
        assert!(status.just_triggered);
        assert!(status.cooldown_until.is_some());
    }

    #[test]
    fn test_max_drawdown_trips_stage_three() {
        // 16% max drawdown against the 15% cap halts trading entirely
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        let status = breaker.check(&DrawdownStatus {
            current_drawdown: Decimal::new(16, 2),
            max_drawdown: Decimal::new(16, 2),
            ..Default::default()
        });

        assert_eq!(status.stage, 3);
        assert_eq!(status.position_reduction, Decimal::ONE);
        assert!(!status.can_trade);
    }

    #[test]
    fn test_weekly_breach_trips_stage_two() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        let status = breaker.check(&DrawdownStatus {
            current_drawdown: Decimal::new(9, 2),
            weekly_drawdown: Decimal::new(9, 2),
            ..Default::default()
        });

        assert_eq!(status.stage, 2);
        assert_eq!(status.position_reduction, Decimal::new(75, 2));
        assert!(status.can_trade);
    }

    #[test]
    fn test_critical_alert_trips_stage_two() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        let status = breaker.check(&DrawdownStatus {
            alert_level: AlertLevel::Critical,
            ..Default::default()
        });

        assert_eq!(status.stage, 2);
        assert_eq!(status.state, BreakerState::Triggered);
    }

    #[test]
    fn test_stage_escalates_but_never_downgrades() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());

        let first = breaker.check(&daily_breach());
        assert_eq!(first.stage, 1);

        // Weekly cap also breached: escalate to stage 2
        let second = breaker.check(&DrawdownStatus {
            current_drawdown: Decimal::new(6, 2),
            daily_drawdown: Decimal::new(4, 2),
            weekly_drawdown: Decimal::new(9, 2),
            ..Default::default()
        });
        assert_eq!(second.stage, 2);
        assert!(second.just_triggered);

        // Weekly clears but daily persists and recovery stays under the
        // release bar: stage holds at 2
        let third = breaker.check(&DrawdownStatus {
            current_drawdown: Decimal::new(5, 2),
            daily_drawdown: Decimal::new(4, 2),
            ..Default::default()
        });
        assert_eq!(third.stage, 2);
        assert!(!third.just_triggered);
        assert_eq!(breaker.history().len(), 2);
    }

    #[test]
    fn test_cleared_limits_move_to_cooldown_then_release() {
        let mut breaker = CircuitBreaker::new(BreakerConfig {
            cooldown_hours: 0,
            ..Default::default()
        });

        breaker.check(&daily_breach());
        assert_eq!(breaker.state(), BreakerState::Triggered);

        // Limits cleared but only 2% recovered: wait in cooldown
        let waiting = breaker.check(&DrawdownStatus {
            current_drawdown: Decimal::new(2, 2),
            ..Default::default()
        });
        assert_eq!(waiting.state, BreakerState::Cooldown);
        assert_eq!(waiting.stage, 1);
        assert!(waiting.can_trade);

        // Zero-hour cooldown has already elapsed by the next check
        let released = breaker.check(&clean_status());
        assert_eq!(released.state, BreakerState::Active);
        assert_eq!(released.stage, 0);
        assert_eq!(released.position_reduction, Decimal::ZERO);
    }

    #[test]
    fn test_recovery_releases_before_cooldown() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());

        // Trip at 9% current drawdown
        breaker.check(&DrawdownStatus {
            current_drawdown: Decimal::new(9, 2),
            weekly_drawdown: Decimal::new(9, 2),
            ..Default::default()
        });

        // Back to 2%: recovery of 7% clears the 5% auto-release bar while
        // the 24h cooldown is still running
        let released = breaker.check(&DrawdownStatus {
            current_drawdown: Decimal::new(2, 2),
            ..Default::default()
        });
        assert_eq!(released.state, BreakerState::Active);
        assert_eq!(released.stage, 0);
        assert!(released.can_trade);
    }

    #[test]
    fn test_released_max_drawdown_does_not_retrip() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());

        breaker.check(&DrawdownStatus {
            current_drawdown: Decimal::new(16, 2),
            max_drawdown: Decimal::new(16, 2),
            ..Default::default()
        });
        assert_eq!(breaker.status().stage, 3);

        // Max drawdown never decreases, so after recovery the same 16%
        // reading must not re-trip stage 3 forever.
        let released = breaker.check(&DrawdownStatus {
            current_drawdown: Decimal::new(2, 2),
            max_drawdown: Decimal::new(16, 2),
            ..Default::default()
        });
        assert_eq!(released.state, BreakerState::Active);
        assert_eq!(released.stage, 0);

        // A deeper drawdown is a new breach
        let retripped = breaker.check(&DrawdownStatus {
            current_drawdown: Decimal::new(17, 2),
            max_drawdown: Decimal::new(17, 2),
            ..Default::default()
        });
        assert_eq!(retripped.stage, 3);
        assert!(retripped.just_triggered);
    }

    #[test]
    fn test_force_trigger_and_release() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());

        let forced = breaker.force_trigger(2);
        assert_eq!(forced.state, BreakerState::Triggered);
        assert_eq!(forced.stage, 2);
        assert_eq!(forced.position_reduction, Decimal::new(75, 2));
        assert!(matches!(
            breaker.history().last().map(|t| t.cause),
            Some(TripCause::Manual)
        ));

        let released = breaker.force_release();
        assert_eq!(released.state, BreakerState::Active);
        assert_eq!(released.stage, 0);
    }

    #[test]
    fn test_force_trigger_clamps_stage() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        let status = breaker.force_trigger(9);
        assert_eq!(status.stage, 3);
        assert!(!status.can_trade);
    }

    #[test]
    fn test_disabled_breaker_never_trips() {
        let mut breaker = CircuitBreaker::new(BreakerConfig {
            enabled: false,
            ..Default::default()
        });

        let status = breaker.check(&DrawdownStatus {
            current_drawdown: Decimal::new(50, 2),
            max_drawdown: Decimal::new(50, 2),
            daily_drawdown: Decimal::new(50, 2),
            ..Default::default()
        });
        assert_eq!(status.state, BreakerState::Active);
        assert!(status.can_trade);
    }

    #[test]
    fn test_trip_history_stays_bounded() {
        let mut breaker = CircuitBreaker::new(BreakerConfig {
            history_len: 2,
            ..Default::default()
        });

        for _ in 0..3 {
            breaker.force_trigger(1);
            breaker.force_release();
        }
        assert_eq!(breaker.history().len(), 2);
    }
}
