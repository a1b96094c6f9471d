//! Stop-loss hierarchy
//!
//! Three trip-wires that force liquidation independently of the trailing
//! machines:
//!
//! - **cascade** (short books): price rises above the highest entry by the
//!   cascade percentage, every lot is covered
//! - **portfolio**: aggregate unrealized loss over cost basis reaches the limit
//! - **individual**: per-lot loss, or average-cost loss which closes every lot
//!
//! Levels are checked against the bar's adverse extreme (low when long,
//! high when short). A level fills at its stop price, or at the open when the
//! bar gapped through it. The first full-liquidation level wins.

use chrono::NaiveDate;

use crate::config::{StopLossConfig, StopLossReference};
use crate::ledger::LotLedger;
use crate::{Direction, Lot, LotId, PriceBar, StopLossLevel};

/// Lots to liquidate at one fill price
#[derive(Debug, Clone, PartialEq)]
pub struct StopLossTrigger {
    pub level: StopLossLevel,
    pub fill_price: f64,
    pub lot_ids: Vec<LotId>,
}

/// Stop-loss settings using builder pattern
#[derive(Debug, Clone, Default)]
pub struct StopLossHierarchy {
    pub direction: Direction,
    pub individual_percent: Option<f64>,
    pub individual_reference: StopLossReference,
    pub portfolio_percent: Option<f64>,
    pub cascade_percent: Option<f64>,
}

impl StopLossHierarchy {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            ..Default::default()
        }
    }

    pub fn from_config(direction: Direction, config: &StopLossConfig) -> Self {
        Self::new(direction)
            .with_individual(config.individual_percent, config.individual_reference)
            .with_portfolio(config.portfolio_percent)
            .with_cascade(config.cascade_percent)
    }

    /// Set the per-lot or average-cost loss limit
    pub fn with_individual(mut self, percent: Option<f64>, reference: StopLossReference) -> Self {
        self.individual_percent = percent;
        self.individual_reference = reference;
        self
    }

    /// Set the aggregate loss limit
    pub fn with_portfolio(mut self, percent: Option<f64>) -> Self {
        self.portfolio_percent = percent;
        self
    }

    /// Set the short-side cover limit above the highest entry
    pub fn with_cascade(mut self, percent: Option<f64>) -> Self {
        self.cascade_percent = percent;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.individual_percent.is_some()
            || self.portfolio_percent.is_some()
            || (self.cascade_percent.is_some() && self.direction == Direction::Short)
    }

    /// Evaluate every level for `bar`. Lots bought on the bar's date are
    /// exempt: they were opened at its close.
    pub fn evaluate(&self, ledger: &LotLedger, bar: &PriceBar) -> Vec<StopLossTrigger> {
        let lots: Vec<&Lot> = seasoned_lots(ledger, bar.date).collect();
        if lots.is_empty() || !self.is_enabled() {
            return Vec::new();
        }

        if let Some(trigger) = self.cascade(&lots, bar) {
            return vec![trigger];
        }
        if let Some(pct) = self.portfolio_percent {
            if let Some(trigger) = self.aggregate(&lots, bar, pct, StopLossLevel::Portfolio) {
                return vec![trigger];
            }
        }
        match (self.individual_percent, self.individual_reference) {
            (Some(pct), StopLossReference::AverageCost) => self
                .aggregate(&lots, bar, pct, StopLossLevel::Individual)
                .into_iter()
                .collect(),
            (Some(pct), StopLossReference::PerLot) => lots
                .iter()
                .filter_map(|lot| {
                    let level = self.loss_level(lot.purchase_price, pct);
                    self.breached(bar, level).then(|| StopLossTrigger {
                        level: StopLossLevel::Individual,
                        fill_price: self.fill_price(bar, level),
                        lot_ids: vec![lot.id],
                    })
                })
                .collect(),
            (None, _) => Vec::new(),
        }
    }

    fn cascade(&self, lots: &[&Lot], bar: &PriceBar) -> Option<StopLossTrigger> {
        if self.direction != Direction::Short {
            return None;
        }
        let pct = self.cascade_percent?;
        let highest = lots.iter().map(|l| l.purchase_price).reduce(f64::max)?;
        let level = highest * (1.0 + pct);
        (bar.high > level).then(|| StopLossTrigger {
            level: StopLossLevel::Cascade,
            fill_price: bar.open.max(level),
            lot_ids: lots.iter().map(|l| l.id).collect(),
        })
    }

    /// Loss of the lots' average cost reaching `pct` closes all of them
    fn aggregate(
        &self,
        lots: &[&Lot],
        bar: &PriceBar,
        pct: f64,
        level_kind: StopLossLevel,
    ) -> Option<StopLossTrigger> {
        let shares: f64 = lots.iter().map(|l| l.shares).sum();
        if shares <= 0.0 {
            return None;
        }
        let average = lots.iter().map(|l| l.cost_basis()).sum::<f64>() / shares;
        let level = self.loss_level(average, pct);
        self.breached(bar, level).then(|| StopLossTrigger {
            level: level_kind,
            fill_price: self.fill_price(bar, level),
            lot_ids: lots.iter().map(|l| l.id).collect(),
        })
    }

    /// Price at which an entry at `entry` has lost `pct`
    fn loss_level(&self, entry: f64, pct: f64) -> f64 {
        match self.direction {
            Direction::Long => entry * (1.0 - pct),
            Direction::Short => entry * (1.0 + pct),
        }
    }

    fn breached(&self, bar: &PriceBar, level: f64) -> bool {
        match self.direction {
            Direction::Long => bar.low <= level,
            Direction::Short => bar.high >= level,
        }
    }

    fn fill_price(&self, bar: &PriceBar, level: f64) -> f64 {
        match self.direction {
            Direction::Long => bar.open.min(level),
            Direction::Short => bar.open.max(level),
        }
    }
}

/// Lots opened strictly before `date`
pub fn seasoned_lots(ledger: &LotLedger, date: NaiveDate) -> impl Iterator<Item = &Lot> {
    ledger.lots().iter().filter(move |l| l.purchase_date < date)
}
