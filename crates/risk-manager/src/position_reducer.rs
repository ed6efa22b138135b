//! Builds ordered liquidation plans when the circuit breaker demands a
//! portfolio reduction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which positions get cut first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionStrategy {
    /// Largest unrealized loss first.
    #[default]
    WorstPerformer,
    /// Most correlated with the rest of the book first.
    HighestCorrelation,
    /// Most volatile first.
    HighestVolatility,
    /// Trim every position by the same fraction.
    Proportional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerConfig {
    pub strategy: ReductionStrategy,
    /// Cap on a single sell as a fraction of that position's value.
    pub max_order_pct: Decimal,
    /// Value left standing in any reduced position.
    pub min_residual_value: Decimal,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            strategy: ReductionStrategy::default(),
            max_order_pct: Decimal::new(30, 2), // 30% per order
            min_residual_value: Decimal::new(1_000, 0),
        }
    }
}

/// Read-only view of one open position, as the reducer needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub quantity: Decimal,
    pub current_price: Decimal,
    pub unrealized_return: Decimal,
    pub volatility: Option<Decimal>,
    pub correlation: Option<Decimal>,
}

impl PositionSnapshot {
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.current_price
    }
}

/// One sell in a reduction plan. Quantities are whole shares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReductionOrder {
    pub symbol: String,
    pub quantity: Decimal,
    pub estimated_value: Decimal,
    pub full_close: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReductionPlan {
    pub id: Uuid,
    pub strategy: ReductionStrategy,
    /// Sells in execution order.
    pub orders: Vec<ReductionOrder>,
    /// Value the caller asked to shed.
    pub target_value: Decimal,
    /// Value the orders actually shed; never exceeds the target outside
    /// emergency mode.
    pub planned_value: Decimal,
    pub total_reduction_pct: Decimal,
    pub emergency: bool,
    pub created_at: DateTime<Utc>,
}

impl ReductionPlan {
    fn empty(strategy: ReductionStrategy, target_value: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy,
            orders: Vec::new(),
            target_value,
            planned_value: Decimal::ZERO,
            total_reduction_pct: Decimal::ZERO,
            emergency: false,
            created_at: Utc::now(),
        }
    }
}

/// Plans are built on demand and never persisted; execution is the
/// engine's job.
#[derive(Debug, Clone)]
pub struct PositionReducer {
    config: ReducerConfig,
}

impl PositionReducer {
    pub fn new(config: ReducerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReducerConfig {
        &self.config
    }

    /// Plan sells worth `reduction_pct` of the current portfolio value,
    /// honoring the per-order cap and minimum residual.
    pub fn build_plan(
        &self,
        positions: &[PositionSnapshot],
        reduction_pct: Decimal,
    ) -> ReductionPlan {
        let reduction_pct = reduction_pct.clamp(Decimal::ZERO, Decimal::ONE);
        let portfolio_value: Decimal = positions.iter().map(|p| p.market_value()).sum();
        let target_value = portfolio_value * reduction_pct;

        let mut plan = ReductionPlan::empty(self.config.strategy, target_value);
        if target_value <= Decimal::ZERO || positions.is_empty() {
            return plan;
        }

        if self.config.strategy == ReductionStrategy::Proportional {
            for position in positions {
                let desired = position.market_value() * reduction_pct;
                if let Some(order) = self.capped_order(position, desired) {
                    plan.planned_value += order.estimated_value;
                    plan.orders.push(order);
                }
            }
        } else {
            let mut ranked: Vec<&PositionSnapshot> = positions.iter().collect();
            self.rank(&mut ranked);

            let mut remaining = target_value;
            for position in ranked {
                if remaining <= Decimal::ZERO {
                    break;
                }
                if let Some(order) = self.capped_order(position, remaining) {
                    remaining -= order.estimated_value;
                    plan.planned_value += order.estimated_value;
                    plan.orders.push(order);
                }
            }
        }

        if portfolio_value > Decimal::ZERO {
            plan.total_reduction_pct = plan.planned_value / portfolio_value;
        }
        plan
    }

    /// Liquidate everything, ignoring every cap.
    pub fn emergency_plan(&self, positions: &[PositionSnapshot]) -> ReductionPlan {
        let portfolio_value: Decimal = positions.iter().map(|p| p.market_value()).sum();
        let mut plan = ReductionPlan::empty(self.config.strategy, portfolio_value);
        plan.emergency = true;

        for position in positions {
            if position.quantity <= Decimal::ZERO {
                continue;
            }
            plan.planned_value += position.market_value();
            plan.orders.push(ReductionOrder {
                symbol: position.symbol.clone(),
                quantity: position.quantity,
                estimated_value: position.market_value(),
                full_close: true,
            });
        }

        if portfolio_value > Decimal::ZERO {
            plan.total_reduction_pct = Decimal::ONE;
        }
        plan
    }

    fn rank(&self, positions: &mut [&PositionSnapshot]) {
        match self.config.strategy {
            ReductionStrategy::WorstPerformer => {
                positions.sort_by(|a, b| a.unrealized_return.cmp(&b.unrealized_return));
            }
            ReductionStrategy::HighestCorrelation => {
                positions.sort_by(|a, b| {
                    b.correlation
                        .unwrap_or(Decimal::ZERO)
                        .cmp(&a.correlation.unwrap_or(Decimal::ZERO))
                });
            }
            ReductionStrategy::HighestVolatility => {
                positions.sort_by(|a, b| {
                    b.volatility
                        .unwrap_or(Decimal::ZERO)
                        .cmp(&a.volatility.unwrap_or(Decimal::ZERO))
                });
            }
            ReductionStrategy::Proportional => {}
        }
    }

    /// Sell order for up to `desired` value of one position, bounded by
    /// the per-order cap and the residual floor. `None` when less than a
    /// whole share survives the caps.
    fn capped_order(
        &self,
        position: &PositionSnapshot,
        desired: Decimal,
    ) -> Option<ReductionOrder> {
        if position.current_price <= Decimal::ZERO || position.quantity <= Decimal::ZERO {
            return None;
        }

        let value = position.market_value();
        let order_cap = value * self.config.max_order_pct;
        let residual_cap = (value - self.config.min_residual_value).max(Decimal::ZERO);
        let allowed = desired.min(order_cap).min(residual_cap);

        let quantity = (allowed / position.current_price).floor();
        if quantity < Decimal::ONE {
            return None;
        }

        Some(ReductionOrder {
            symbol: position.symbol.clone(),
            quantity,
            estimated_value: quantity * position.current_price,
            full_close: quantity >= position.quantity,
        })
    }
}
