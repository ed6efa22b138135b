//! Equity-curve tracking: peak/trough drawdowns, trailing-window
//! drawdowns and alert levels.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawdownConfig {
    /// Bounded equity-history length, sized for one trading year.
    pub history_len: usize,
    /// Current-drawdown alert thresholds.
    pub caution_threshold: Decimal,
    pub warning_threshold: Decimal,
    pub critical_threshold: Decimal,
    /// Trailing-window loss limits.
    pub daily_limit: Decimal,
    pub weekly_limit: Decimal,
    pub monthly_limit: Decimal,
    pub max_consecutive_loss_days: u32,
}

impl Default for DrawdownConfig {
    fn default() -> Self {
        Self {
            history_len: 252,
            caution_threshold: Decimal::new(5, 2),  // 5%
            warning_threshold: Decimal::new(10, 2), // 10%
            critical_threshold: Decimal::new(15, 2), // 15%
            daily_limit: Decimal::new(3, 2),  // 3%
            weekly_limit: Decimal::new(8, 2), // 8%
            monthly_limit: Decimal::new(12, 2), // 12%
            max_consecutive_loss_days: 5,
        }
    }
}

/// Severity ladder; ordering follows declaration order so `max` picks
/// the worse level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    #[default]
    Normal,
    Caution,
    Warning,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Caution => "caution",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Snapshot produced by every equity update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownStatus {
    /// Decline from the all-time peak, in [0, 1].
    pub current_drawdown: Decimal,
    /// Worst decline seen so far; never decreases.
    pub max_drawdown: Decimal,
    pub peak_value: Decimal,
    pub daily_drawdown: Decimal,
    pub weekly_drawdown: Decimal,
    pub monthly_drawdown: Decimal,
    pub consecutive_loss_days: u32,
    pub alert_level: AlertLevel,
    pub as_of: DateTime<Utc>,
}

impl Default for DrawdownStatus {
    fn default() -> Self {
        Self {
            current_drawdown: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            peak_value: Decimal::ZERO,
            daily_drawdown: Decimal::ZERO,
            weekly_drawdown: Decimal::ZERO,
            monthly_drawdown: Decimal::ZERO,
            consecutive_loss_days: 0,
            alert_level: AlertLevel::Normal,
            as_of: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
struct EquityPoint {
    value: Decimal,
    at: DateTime<Utc>,
}

/// Tracks the equity curve. Timestamps are passed in rather than read
/// from the clock so replays and tests are deterministic.
#[derive(Debug)]
pub struct DrawdownMonitor {
    config: DrawdownConfig,
    history: VecDeque<EquityPoint>,
    peak: Decimal,
    max_drawdown: Decimal,
    consecutive_loss_days: u32,
    current_day: Option<NaiveDate>,
    day_open: Decimal,
    last_value: Decimal,
    last_status: Option<DrawdownStatus>,
}

impl DrawdownMonitor {
    pub fn new(config: DrawdownConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            peak: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            consecutive_loss_days: 0,
            current_day: None,
            day_open: Decimal::ZERO,
            last_value: Decimal::ZERO,
            last_status: None,
        }
    }

    pub fn config(&self) -> &DrawdownConfig {
        &self.config
    }

    /// Most recent status, if any update has happened.
    pub fn status(&self) -> Option<DrawdownStatus> {
        self.last_status.clone()
    }

    /// Wipe all tracked state, for test isolation and restarts.
    pub fn reset(&mut self) {
        self.history.clear();
        self.peak = Decimal::ZERO;
        self.max_drawdown = Decimal::ZERO;
        self.consecutive_loss_days = 0;
        self.current_day = None;
        self.day_open = Decimal::ZERO;
        self.last_value = Decimal::ZERO;
        self.last_status = None;
    }

    /// Record one equity observation and recompute every drawdown metric.
    /// Updates must arrive in timestamp order.
    pub fn update(&mut self, value: Decimal, at: DateTime<Utc>) -> DrawdownStatus {
        let date = at.date_naive();
        match self.current_day {
            None => {
                self.current_day = Some(date);
                self.day_open = value;
            }
            Some(day) if date != day => {
                // The previous day just closed at last_value.
                if self.last_value < self.day_open {
                    self.consecutive_loss_days += 1;
                } else if self.last_value > self.day_open {
                    self.consecutive_loss_days = 0;
                }
                self.current_day = Some(date);
                self.day_open = value;
            }
            Some(_) => {}
        }

        if value > self.peak {
            self.peak = value;
            // A fresh high water mark clears the loss streak.
            self.consecutive_loss_days = 0;
        }

        self.history.push_back(EquityPoint { value, at });
        while self.history.len() > self.config.history_len {
            self.history.pop_front();
        }

        let current_drawdown = if self.peak > Decimal::ZERO {
            ((self.peak - value) / self.peak).clamp(Decimal::ZERO, Decimal::ONE)
        } else {
            Decimal::ZERO
        };
        self.max_drawdown = self.max_drawdown.max(current_drawdown);

        let daily_drawdown = self.window_drawdown(value, at, 1);
        let weekly_drawdown = self.window_drawdown(value, at, 7);
        let monthly_drawdown = self.window_drawdown(value, at, 30);

        let alert_level = self.alert_level(
            current_drawdown,
            daily_drawdown,
            weekly_drawdown,
            monthly_drawdown,
        );

        let status = DrawdownStatus {
            current_drawdown,
            max_drawdown: self.max_drawdown,
            peak_value: self.peak,
            daily_drawdown,
            weekly_drawdown,
            monthly_drawdown,
            consecutive_loss_days: self.consecutive_loss_days,
            alert_level,
            as_of: at,
        };

        self.last_value = value;
        self.last_status = Some(status.clone());
        status
    }

    /// Decline from the highest equity inside the trailing window ending
    /// at `at`. The just-recorded point is part of the window.
    fn window_drawdown(&self, value: Decimal, at: DateTime<Utc>, days: i64) -> Decimal {
        let cutoff = at - Duration::days(days);
        let mut window_max = value;
        for point in self.history.iter().rev() {
            if point.at < cutoff {
                break;
            }
            if point.value > window_max {
                window_max = point.value;
            }
        }
        if window_max <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((window_max - value) / window_max).clamp(Decimal::ZERO, Decimal::ONE)
    }

    /// Worst severity across every configured condition.
    fn alert_level(
        &self,
        current: Decimal,
        daily: Decimal,
        weekly: Decimal,
        monthly: Decimal,
    ) -> AlertLevel {
        let mut level = if current >= self.config.critical_threshold {
            AlertLevel::Critical
        } else if current >= self.config.warning_threshold {
            AlertLevel::Warning
        } else if current >= self.config.caution_threshold {
            AlertLevel::Caution
        } else {
            AlertLevel::Normal
        };

        if daily > self.config.daily_limit {
            level = level.max(AlertLevel::Warning);
        }
        if weekly > self.config.weekly_limit {
            level = level.max(AlertLevel::Warning);
        }
        if monthly > self.config.monthly_limit {
            level = level.max(AlertLevel::Critical);
        }
        if self.consecutive_loss_days >= self.config.max_consecutive_loss_days {
            level = level.max(AlertLevel::Caution);
        }
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn monday_afternoon() -> DateTime<Utc> {
        // 2026-03-02 is a Monday
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
    }

    fn equity(thousands: i64) -> Decimal {
        Decimal::new(thousands * 1_000, 0)
    }

    #[test]
    fn test_tracks_peak_and_current_drawdown() {
        let mut monitor = DrawdownMonitor::new(DrawdownConfig::default());
        let t = monday_afternoon();

        monitor.update(equity(100), t);
        monitor.update(equity(105), t + Duration::hours(1));
        let status = monitor.update(Decimal::new(94_500, 0), t + Duration::hours(2));

        assert_eq!(status.peak_value, equity(105));
        // (105000 - 94500) / 105000 = 0.10
        assert_eq!(status.current_drawdown, Decimal::new(10, 2));
        assert_eq!(status.max_drawdown, Decimal::new(10, 2));
    }

    #[test]
    fn test_max_drawdown_never_decreases() {
        let mut monitor = DrawdownMonitor::new(DrawdownConfig::default());
        let t = monday_afternoon();

        monitor.update(equity(100), t);
        monitor.update(equity(90), t + Duration::hours(1));
        let recovered = monitor.update(equity(100), t + Duration::hours(2));

        assert_eq!(recovered.current_drawdown, Decimal::ZERO);
        assert_eq!(recovered.max_drawdown, Decimal::new(10, 2));

        let higher = monitor.update(equity(110), t + Duration::hours(3));
        assert_eq!(higher.peak_value, equity(110));
        assert_eq!(higher.max_drawdown, Decimal::new(10, 2));
    }

    #[test]
    fn test_history_stays_bounded() {
        let mut monitor = DrawdownMonitor::new(DrawdownConfig {
            history_len: 5,
            ..Default::default()
        });
        let t = monday_afternoon();

        for i in 0..10 {
            monitor.update(equity(100), t + Duration::minutes(i));
        }
        assert_eq!(monitor.history.len(), 5);
    }

    #[test]
    fn test_daily_window_breach_raises_warning() {
        let mut monitor = DrawdownMonitor::new(DrawdownConfig::default());
        let t = monday_afternoon();

        monitor.update(equity(100), t);
        let status = monitor.update(equity(96), t + Duration::hours(2));

        // 4% on the day, above the 3% daily limit
        assert_eq!(status.daily_drawdown, Decimal::new(4, 2));
        assert_eq!(status.alert_level, AlertLevel::Warning);
    }

    #[test]
    fn test_windows_exclude_old_points() {
        let mut monitor = DrawdownMonitor::new(DrawdownConfig::default());
        let t = monday_afternoon();

        monitor.update(equity(120), t - Duration::days(10));
        monitor.update(equity(100), t - Duration::days(8));
        let status = monitor.update(equity(98), t);

        // The 120k peak is outside both the daily and weekly windows
        assert_eq!(status.daily_drawdown, Decimal::ZERO);
        assert_eq!(status.weekly_drawdown, Decimal::ZERO);
        // but still inside the monthly window and the all-time peak
        assert!(status.monthly_drawdown > Decimal::new(12, 2));
        assert!(status.current_drawdown > Decimal::new(18, 2));
        assert_eq!(status.alert_level, AlertLevel::Critical);
    }

    #[test]
    fn test_consecutive_loss_days_count_and_reset() {
        let mut monitor = DrawdownMonitor::new(DrawdownConfig::default());
        let t = monday_afternoon();

        // Monday: opens 100k, closes 99k
        monitor.update(equity(100), t);
        monitor.update(equity(99), t + Duration::hours(3));

        // Tuesday roll counts Monday as a loss day
        let tuesday = monitor.update(equity(99), t + Duration::days(1));
        assert_eq!(tuesday.consecutive_loss_days, 1);
        monitor.update(equity(98), t + Duration::days(1) + Duration::hours(3));

        // Wednesday roll counts Tuesday too
        let wednesday = monitor.update(equity(98), t + Duration::days(2));
        assert_eq!(wednesday.consecutive_loss_days, 2);
        monitor.update(
            Decimal::new(99_500, 0),
            t + Duration::days(2) + Duration::hours(3),
        );

        // Wednesday finished positive, so Thursday's roll resets the streak
        let thursday = monitor.update(Decimal::new(99_500, 0), t + Duration::days(3));
        assert_eq!(thursday.consecutive_loss_days, 0);
    }

    #[test]
    fn test_new_peak_clears_loss_streak() {
        let mut monitor = DrawdownMonitor::new(DrawdownConfig::default());
        let t = monday_afternoon();

        monitor.update(equity(100), t);
        monitor.update(equity(99), t + Duration::hours(3));
        let rolled = monitor.update(equity(99), t + Duration::days(1));
        assert_eq!(rolled.consecutive_loss_days, 1);

        let peaked = monitor.update(equity(101), t + Duration::days(1) + Duration::hours(1));
        assert_eq!(peaked.consecutive_loss_days, 0);
    }

    #[test]
    fn test_loss_streak_raises_caution() {
        let mut monitor = DrawdownMonitor::new(DrawdownConfig {
            max_consecutive_loss_days: 2,
            ..Default::default()
        });
        let t = monday_afternoon();

        monitor.update(equity(100), t);
        monitor.update(equity(99), t + Duration::hours(3));
        monitor.update(equity(99), t + Duration::days(1));
        monitor.update(equity(98), t + Duration::days(1) + Duration::hours(3));
        let status = monitor.update(equity(98), t + Duration::days(2));

        assert_eq!(status.consecutive_loss_days, 2);
        assert_eq!(status.alert_level, AlertLevel::Caution);
    }

    #[test]
    fn test_alert_ladder_on_current_drawdown() {
        let mut monitor = DrawdownMonitor::new(DrawdownConfig::default());
        let t = monday_afternoon();

        monitor.update(equity(100), t);

        // Spread the declines out so no trailing-window limit fires
        let caution = monitor.update(equity(95), t + Duration::days(2));
        assert_eq!(caution.current_drawdown, Decimal::new(5, 2));
        assert_eq!(caution.alert_level, AlertLevel::Caution);

        let warning = monitor.update(equity(90), t + Duration::days(20));
        assert_eq!(warning.current_drawdown, Decimal::new(10, 2));
        assert_eq!(warning.alert_level, AlertLevel::Warning);

        let critical = monitor.update(equity(85), t + Duration::days(60));
        assert_eq!(critical.current_drawdown, Decimal::new(15, 2));
        assert_eq!(critical.alert_level, AlertLevel::Critical);
    }

    #[test]
    fn test_drawdown_clamped_to_unit_range() {
        let mut monitor = DrawdownMonitor::new(DrawdownConfig::default());
        let t = monday_afternoon();

        monitor.update(equity(100), t);
        let wiped = monitor.update(Decimal::new(-5_000, 0), t + Duration::hours(1));

        assert_eq!(wiped.current_drawdown, Decimal::ONE);
        assert_eq!(wiped.max_drawdown, Decimal::ONE);
        assert_eq!(wiped.alert_level, AlertLevel::Critical);
    }

    #[test]
    fn test_status_and_reset() {
        let mut monitor = DrawdownMonitor::new(DrawdownConfig::default());
        assert!(monitor.status().is_none());

        monitor.update(equity(100), monday_afternoon());
        assert!(monitor.status().is_some());

        monitor.reset();
        assert!(monitor.status().is_none());
        assert_eq!(monitor.history.len(), 0);
    }

    #[test]
    fn test_alert_levels_order_by_severity() {
        assert!(AlertLevel::Critical > AlertLevel::Warning);
        assert!(AlertLevel::Warning > AlertLevel::Caution);
        assert!(AlertLevel::Caution > AlertLevel::Normal);
        assert_eq!(AlertLevel::Warning.to_string(), "warning");
    }
}
