//! Daily simulation step
//!
//! All mutable state of one security lives in [`SimulationContext`].
//! [`advance_day`] consumes one bar and moves the context forward:
//!
//! 1. validate the bar and extend the history
//! 2. update (or on day 0 reset) the extremum tracker
//! 3. trailing sell; a sell ends trading for the day
//! 4. trailing buy
//! 5. stop-loss hierarchy
//! 6. adaptive controller on its schedule
//! 7. equity point
//!
//! The step is deterministic: identical bars and parameters always produce
//! identical logs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adaptive::{AdaptationEvent, AdaptiveController};
use crate::capital::CapitalAllocator;
use crate::config::{AdaptationConfig, Config, StrategyParams};
use crate::error::{ConfigError, EngineError};
use crate::extremum::{ExtremumState, ExtremumTracker};
use crate::grid::GridPolicy;
use crate::ledger::LotLedger;
use crate::momentum::MomentumGate;
use crate::profit::{self, ProfitPolicy};
use crate::risk::{StopLossHierarchy, StopLossTrigger};
use crate::trailing::{FillDecision, TrailingBuyOrder, TrailingSellOrder, TrailingUpdate};
use crate::{
    BlockReason, BlockedBuy, EquityPoint, Lot, LotFill, LotId, LotSource, PriceBar, Side, TradeTrigger,
    Transaction,
};

/// Serializable view of the context attached to unrecoverable errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub symbol: String,
    pub day_index: usize,
    pub last_date: Option<NaiveDate>,
    pub lots: Vec<Lot>,
    pub extremum: Option<ExtremumState>,
    pub buy_order: Option<TrailingBuyOrder>,
    pub sell_order: Option<TrailingSellOrder>,
    pub params: StrategyParams,
    pub consecutive_buys: u32,
    pub consecutive_sells: u32,
    pub realized_pnl: f64,
}

/// What happened on one simulated day
#[derive(Debug, Clone, PartialEq)]
pub struct DayReport {
    pub day_index: usize,
    pub date: NaiveDate,
    pub transactions: Vec<Transaction>,
    pub blocked_buy: Option<BlockedBuy>,
    pub adaptation: Option<AdaptationEvent>,
    pub equity: EquityPoint,
}

/// Owned simulation state of one security
#[derive(Debug, Clone)]
pub struct SimulationContext {
    symbol: String,
    params: StrategyParams,
    initial_capital: f64,
    ledger: LotLedger,
    tracker: ExtremumTracker,
    buy_order: Option<TrailingBuyOrder>,
    sell_order: Option<TrailingSellOrder>,
    controller: AdaptiveController,
    history: Vec<PriceBar>,
    transactions: Vec<Transaction>,
    adaptation_events: Vec<AdaptationEvent>,
    blocked_buys: Vec<BlockedBuy>,
    equity_curve: Vec<EquityPoint>,
    consecutive_buys: u32,
    consecutive_sells: u32,
    last_buy_date: Option<NaiveDate>,
    dynamic_reference_price: Option<f64>,
}

impl SimulationContext {
    /// Build a context from validated parameters
    pub fn new(
        symbol: impl Into<String>,
        params: StrategyParams,
        adaptation: AdaptationConfig,
        initial_capital: f64,
    ) -> Result<Self, EngineError> {
        params.validate()?;
        adaptation.validate()?;
        params.check_capital(initial_capital)?;

        Ok(Self {
            symbol: symbol.into(),
            ledger: LotLedger::new(params.direction),
            params,
            initial_capital,
            tracker: ExtremumTracker::new(),
            buy_order: None,
            sell_order: None,
            controller: AdaptiveController::new(adaptation),
            history: Vec::new(),
            transactions: Vec::new(),
            adaptation_events: Vec::new(),
            blocked_buys: Vec::new(),
            equity_curve: Vec::new(),
            consecutive_buys: 0,
            consecutive_sells: 0,
            last_buy_date: None,
            dynamic_reference_price: None,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        config.validate()?;
        Self::new(
            config.symbol.clone(),
            config.strategy.clone(),
            config.adaptation.clone(),
            config.initial_capital(),
        )
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Active parameters (rewritten by the adaptive controller)
    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn ledger(&self) -> &LotLedger {
        &self.ledger
    }

    pub fn tracker(&self) -> &ExtremumTracker {
        &self.tracker
    }

    pub fn buy_order(&self) -> Option<&TrailingBuyOrder> {
        self.buy_order.as_ref()
    }

    pub fn sell_order(&self) -> Option<&TrailingSellOrder> {
        self.sell_order.as_ref()
    }

    pub fn controller(&self) -> &AdaptiveController {
        &self.controller
    }

    pub fn history(&self) -> &[PriceBar] {
        &self.history
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn adaptation_events(&self) -> &[AdaptationEvent] {
        &self.adaptation_events
    }

    pub fn blocked_buys(&self) -> &[BlockedBuy] {
        &self.blocked_buys
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn days_processed(&self) -> usize {
        self.history.len()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            symbol: self.symbol.clone(),
            day_index: self.history.len(),
            last_date: self.history.last().map(|b| b.date),
            lots: self.ledger.lots().to_vec(),
            extremum: self.tracker.state().copied(),
            buy_order: self.buy_order.clone(),
            sell_order: self.sell_order.clone(),
            params: self.params.clone(),
            consecutive_buys: self.consecutive_buys,
            consecutive_sells: self.consecutive_sells,
            realized_pnl: self.ledger.realized_pnl().to_f64(),
        }
    }

    fn gate(&self) -> MomentumGate {
        MomentumGate::from(self.params.momentum)
    }

    fn record_buy(&mut self) {
        self.consecutive_buys += 1;
        self.consecutive_sells = 0;
    }

    fn record_sell(&mut self) {
        self.consecutive_sells += 1;
        self.consecutive_buys = 0;
    }

    /// Seed reconstructed lots on the first bar
    fn seed_initial_lots(
        &mut self,
        bar: &PriceBar,
        allocator: &mut dyn CapitalAllocator,
    ) -> Result<(), EngineError> {
        let seeded = self.params.seeded_cost();
        if !allocator.can_deploy(seeded) {
            return Err(ConfigError::CapitalBelowSeededLots {
                capital: allocator.available(),
                seeded,
            }
            .into());
        }
        for lot in self.params.initial_lots.clone() {
            let date = lot.date.unwrap_or(bar.date);
            allocator.deploy(lot.price * lot.shares)?;
            let id = self
                .ledger
                .add_lot(lot.price, lot.shares, date, LotSource::Reconstructed)?;
            debug!(
                symbol = %self.symbol,
                lot = id,
                price = format!("{:.2}", lot.price),
                shares = format!("{:.4}", lot.shares),
                "Seeded reconstructed lot"
            );
        }
        Ok(())
    }

    /// Trailing sell. Returns the executed sell, if any.
    fn evaluate_sell(
        &mut self,
        bar: &PriceBar,
        day_index: usize,
        allocator: &mut dyn CapitalAllocator,
    ) -> Result<Option<Transaction>, EngineError> {
        let price = bar.close;
        let direction = self.params.direction;
        let profit_policy = ProfitPolicy::from_params(&self.params);
        let requirement = profit_policy.effective_requirement(self.consecutive_sells);

        if self.sell_order.is_none() {
            if !self.params.sell_enabled || self.ledger.is_empty() {
                return Ok(None);
            }
            let Some(extremes) = self.tracker.state().copied() else {
                return Ok(None);
            };
            let eligible = profit_policy.eligible_lots(&self.ledger, price, requirement);
            let activation = self.gate().sell_activation(&self.params);
            self.sell_order = TrailingSellOrder::try_activate(
                direction,
                price,
                bar.date,
                &extremes,
                activation,
                self.params.trailing_sell_pullback_percent,
                eligible,
            );
            if let Some(order) = &self.sell_order {
                debug!(
                    symbol = %self.symbol,
                    price = format!("{:.2}", price),
                    stop = format!("{:.2}", order.stop_price),
                    lots = order.lot_ids.len(),
                    "Trailing sell activated"
                );
            }
            return Ok(None);
        }
        let Some(order) = self.sell_order.as_mut() else {
            return Ok(None);
        };

        match order.update(direction, price, self.params.trailing_sell_pullback_percent) {
            TrailingUpdate::Triggered => {}
            TrailingUpdate::Trailed { from, to } => {
                debug!(
                    symbol = %self.symbol,
                    from = format!("{:.2}", from),
                    to = format!("{:.2}", to),
                    "Trailing sell stop raised"
                );
                return Ok(None);
            }
            TrailingUpdate::Hold | TrailingUpdate::Cancelled => return Ok(None),
        }

        let stop_price = order.stop_price;
        let recorded = order.lot_ids.clone();
        let eligible_now = profit_policy.eligible_lots(&self.ledger, price, requirement);
        let candidates: Vec<_> = recorded
            .into_iter()
            .filter(|id| eligible_now.contains(id))
            .collect();
        let selected = profit::select_lots(&self.ledger, &candidates, self.params.max_lots_to_sell);
        let limit = profit_policy
            .reference_price(&self.ledger, &selected)
            .filter(|_| !selected.is_empty())
            .map(|reference| {
                profit::limit_price(
                    direction,
                    reference,
                    requirement,
                    stop_price,
                    self.params.slippage_allowance,
                )
            });
        let selected_ids: Vec<_> = selected.iter().map(|l| l.id).collect();

        let decision = match &self.sell_order {
            Some(order) => order.fill_decision(direction, price, self.params.order_type, limit),
            None => FillDecision::Cancel,
        };
        match decision {
            FillDecision::Wait => {
                debug!(
                    symbol = %self.symbol,
                    price = format!("{:.2}", price),
                    limit = ?limit,
                    "Trailing sell waiting for limit"
                );
                Ok(None)
            }
            FillDecision::Cancel => {
                debug!(symbol = %self.symbol, price = format!("{:.2}", price), "Trailing sell cancelled");
                self.sell_order = None;
                Ok(None)
            }
            FillDecision::Fill => {
                let tx = self.close_lots(
                    &selected_ids,
                    price,
                    bar.date,
                    day_index,
                    TradeTrigger::TrailingStop,
                    allocator,
                )?;
                info!(
                    symbol = %self.symbol,
                    date = %bar.date,
                    price = format!("{:.2}", price),
                    lots = tx.lots.len(),
                    pnl = format!("{:.2}", tx.realized_pnl),
                    "SELL executed"
                );
                self.sell_order = None;
                self.tracker.reset(price, bar.date);
                Ok(Some(tx))
            }
        }
    }

    /// Trailing buy. Returns the executed buy or the blocked attempt.
    fn evaluate_buy(
        &mut self,
        bar: &PriceBar,
        day_index: usize,
        allocator: &mut dyn CapitalAllocator,
    ) -> Result<(Option<Transaction>, Option<BlockedBuy>), EngineError> {
        let price = bar.close;
        let direction = self.params.direction;
        let gate = self.gate();
        let lot_cap = gate.lot_cap(&self.params);
        let rebound = self.params.trailing_buy_rebound_percent;

        if self.buy_order.is_none() {
            let delay_ok = self
                .last_buy_date
                .map_or(true, |last| (bar.date - last).num_days() >= self.params.entry_delay_days);
            let cap_ok = lot_cap.map_or(true, |cap| self.ledger.len() < cap);
            if !self.params.buy_enabled || !delay_ok || !cap_ok {
                return Ok((None, None));
            }
            let Some(extremes) = self.tracker.state().copied() else {
                return Ok((None, None));
            };
            self.buy_order = TrailingBuyOrder::try_activate(
                direction,
                price,
                bar.date,
                &extremes,
                gate.buy_activation(&self.params),
                rebound,
            );
            if let Some(order) = &self.buy_order {
                debug!(
                    symbol = %self.symbol,
                    price = format!("{:.2}", price),
                    stop = format!("{:.2}", order.stop_price),
                    "Trailing buy activated"
                );
            }
            return Ok((None, None));
        }
        let Some(order) = self.buy_order.as_mut() else {
            return Ok((None, None));
        };

        match order.update(direction, price, rebound, self.params.order_type) {
            TrailingUpdate::Triggered => {}
            TrailingUpdate::Cancelled => {
                debug!(
                    symbol = %self.symbol,
                    price = format!("{:.2}", price),
                    reference = format!("{:.2}", order.reference_price),
                    "Trailing buy cancelled past reference"
                );
                self.buy_order = None;
                return Ok((None, None));
            }
            TrailingUpdate::Trailed { from, to } => {
                debug!(
                    symbol = %self.symbol,
                    from = format!("{:.2}", from),
                    to = format!("{:.2}", to),
                    "Trailing buy stop lowered"
                );
                return Ok((None, None));
            }
            TrailingUpdate::Hold => return Ok((None, None)),
        }

        // Triggered: the order is consumed whether or not the gates pass
        self.buy_order = None;

        if let Some(reason) = self.buy_block_reason(price, lot_cap, gate, allocator) {
            warn!(
                symbol = %self.symbol,
                date = %bar.date,
                price = format!("{:.2}", price),
                reason = ?reason,
                "Buy blocked"
            );
            let blocked = BlockedBuy {
                date: bar.date,
                day_index,
                price,
                reason,
            };
            self.blocked_buys.push(blocked.clone());
            return Ok((None, Some(blocked)));
        }

        let amount = self.params.lot_size_usd;
        let shares = amount / price;
        allocator.deploy(amount)?;
        let lot_id = self
            .ledger
            .add_lot(price, shares, bar.date, LotSource::Platform)?;
        self.record_buy();
        self.last_buy_date = Some(bar.date);
        self.tracker.reset(price, bar.date);

        info!(
            symbol = %self.symbol,
            date = %bar.date,
            price = format!("{:.2}", price),
            shares = format!("{:.4}", shares),
            lots = self.ledger.len(),
            "BUY executed"
        );

        Ok((
            Some(Transaction {
                date: bar.date,
                day_index,
                side: Side::Buy,
                trigger: TradeTrigger::TrailingStop,
                price,
                shares,
                lots: vec![LotFill {
                    lot_id,
                    purchase_price: price,
                    shares,
                    realized_pnl: 0.0,
                }],
                realized_pnl: 0.0,
            }),
            None,
        ))
    }

    /// Gates in order: lot cap, grid spacing, momentum P&L, capital
    fn buy_block_reason(
        &self,
        price: f64,
        lot_cap: Option<usize>,
        gate: MomentumGate,
        allocator: &dyn CapitalAllocator,
    ) -> Option<BlockReason> {
        if let Some(max_lots) = lot_cap {
            if self.ledger.len() >= max_lots {
                return Some(BlockReason::LotLimit { max_lots });
            }
        }

        let grid = GridPolicy::from_params(&self.params);
        let grid_size =
            grid.effective_size(price, self.dynamic_reference_price, self.consecutive_buys);
        if !grid.admits(&self.ledger, price, grid_size) {
            return Some(BlockReason::GridSpacing { grid_size });
        }

        if let Err(unrealized_pnl) = gate.check_buy(&self.ledger, price) {
            return Some(BlockReason::MomentumPnl { unrealized_pnl });
        }

        let requested = self.params.lot_size_usd;
        if !allocator.can_deploy(requested) {
            return Some(BlockReason::CapitalExhausted {
                requested,
                available: allocator.available(),
            });
        }
        None
    }

    /// Close whole lots at `price` and build the sell transaction
    fn close_lots(
        &mut self,
        lot_ids: &[LotId],
        price: f64,
        date: NaiveDate,
        day_index: usize,
        trigger: TradeTrigger,
        allocator: &mut dyn CapitalAllocator,
    ) -> Result<Transaction, EngineError> {
        let mut fills = Vec::with_capacity(lot_ids.len());
        for &id in lot_ids {
            let fill = self.ledger.close_lot(id, price)?;
            allocator.release(fill.purchase_price * fill.shares);
            fills.push(fill);
        }
        self.record_sell();

        let shares = fills.iter().map(|f| f.shares).sum();
        let realized_pnl = fills.iter().map(|f| f.realized_pnl).sum();
        Ok(Transaction {
            date,
            day_index,
            side: Side::Sell,
            trigger,
            price,
            shares,
            lots: fills,
            realized_pnl,
        })
    }

    fn apply_stop_losses(
        &mut self,
        bar: &PriceBar,
        day_index: usize,
        allocator: &mut dyn CapitalAllocator,
    ) -> Result<Vec<Transaction>, EngineError> {
        let hierarchy = StopLossHierarchy::from_config(self.params.direction, &self.params.stop_loss);
        if !hierarchy.is_enabled() {
            return Ok(Vec::new());
        }

        let triggers: Vec<StopLossTrigger> = hierarchy.evaluate(&self.ledger, bar);
        if triggers.is_empty() {
            return Ok(Vec::new());
        }

        let mut executed = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            let tx = self.close_lots(
                &trigger.lot_ids,
                trigger.fill_price,
                bar.date,
                day_index,
                TradeTrigger::StopLoss(trigger.level),
                allocator,
            )?;
            warn!(
                symbol = %self.symbol,
                date = %bar.date,
                level = ?trigger.level,
                price = format!("{:.2}", trigger.fill_price),
                lots = tx.lots.len(),
                pnl = format!("{:.2}", tx.realized_pnl),
                "Stop-loss liquidation"
            );
            executed.push(tx);
        }

        self.buy_order = None;
        self.sell_order = None;
        self.tracker.reset(bar.close, bar.date);
        Ok(executed)
    }

    fn equity_point(&self, bar: &PriceBar) -> EquityPoint {
        let realized = self.ledger.realized_pnl().to_f64();
        let unrealized = self.ledger.unrealized_pnl(bar.close);
        EquityPoint {
            date: bar.date,
            price: bar.close,
            total_shares: self.ledger.total_shares(),
            cost_basis: self.ledger.cost_basis(),
            realized_pnl: realized,
            unrealized_pnl: unrealized,
            value: self.initial_capital + realized + unrealized,
        }
    }
}

/// Advance the simulation by one trading day.
///
/// Invalid or out-of-order bars are unrecoverable and carry the day index
/// and a snapshot of the state before the bar. Insufficient data for an
/// adaptation check and blocked buys are absorbed here.
pub fn advance_day(
    ctx: &mut SimulationContext,
    bar: PriceBar,
    allocator: &mut dyn CapitalAllocator,
) -> Result<DayReport, EngineError> {
    let day_index = ctx.history.len();

    if let Err(reason) = bar.validate() {
        return Err(EngineError::InvalidBar {
            day_index,
            date: bar.date,
            reason,
            snapshot: Box::new(ctx.snapshot()),
        });
    }
    if let Some(previous) = ctx.history.last().map(|b| b.date) {
        if bar.date <= previous {
            return Err(EngineError::OutOfOrderBar {
                day_index,
                date: bar.date,
                previous,
                snapshot: Box::new(ctx.snapshot()),
            });
        }
    }

    ctx.history.push(bar.clone());

    if day_index == 0 {
        ctx.seed_initial_lots(&bar, allocator)?;
        ctx.tracker.reset(bar.close, bar.date);
        ctx.dynamic_reference_price = ctx.params.dynamic_reference_price.or(Some(bar.close));
    } else {
        ctx.tracker.update(bar.close, bar.date);
    }

    let mut transactions = Vec::new();
    let mut blocked_buy = None;

    let sold = ctx.evaluate_sell(&bar, day_index, allocator)?;
    match sold {
        Some(tx) => transactions.push(tx),
        None => {
            let (bought, blocked) = ctx.evaluate_buy(&bar, day_index, allocator)?;
            transactions.extend(bought);
            blocked_buy = blocked;
        }
    }

    transactions.extend(ctx.apply_stop_losses(&bar, day_index, allocator)?);
    ctx.transactions.extend(transactions.iter().cloned());

    let mut adaptation = None;
    if ctx.controller.is_due(day_index) {
        match ctx
            .controller
            .check(day_index, &ctx.history, &ctx.transactions, &mut ctx.params)
        {
            Ok(event) => {
                ctx.adaptation_events.push(event.clone());
                adaptation = Some(event);
            }
            Err(EngineError::InsufficientData {
                required,
                available,
            }) => {
                debug!(
                    symbol = %ctx.symbol,
                    day = day_index,
                    required,
                    available,
                    "Skipping adaptation check"
                );
            }
            Err(e) => return Err(e),
        }
    }

    let equity = ctx.equity_point(&bar);
    ctx.equity_curve.push(equity.clone());

    Ok(DayReport {
        day_index,
        date: bar.date,
        transactions,
        blocked_buy,
        adaptation,
        equity,
    })
}
