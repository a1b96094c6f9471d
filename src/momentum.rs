//! Momentum gate
//!
//! A configuration overlay rather than a state machine: zero activation on
//! the toggled sides, no lot cap for buys, and buys beyond the first gated
//! on positive unrealized P&L.

use crate::config::{MomentumConfig, StrategyParams};
use crate::ledger::LotLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MomentumGate {
    pub buy: bool,
    pub sell: bool,
}

impl From<MomentumConfig> for MomentumGate {
    fn from(config: MomentumConfig) -> Self {
        Self {
            buy: config.buy,
            sell: config.sell,
        }
    }
}

impl MomentumGate {
    /// Buy activation threshold; momentum always wins over adapted values
    pub fn buy_activation(&self, params: &StrategyParams) -> f64 {
        if self.buy {
            0.0
        } else {
            params.trailing_buy_activation_percent
        }
    }

    pub fn sell_activation(&self, params: &StrategyParams) -> f64 {
        if self.sell {
            0.0
        } else {
            params.trailing_sell_activation_percent
        }
    }

    /// Open-lot cap, `None` when momentum buying removes it
    pub fn lot_cap(&self, params: &StrategyParams) -> Option<usize> {
        (!self.buy).then_some(params.max_lots)
    }

    /// P&L gate for buys. The first buy into an empty ledger is exempt.
    /// On rejection returns the unrealized P&L that failed the check.
    pub fn check_buy(&self, ledger: &LotLedger, price: f64) -> Result<(), f64> {
        if !self.buy || ledger.is_empty() {
            return Ok(());
        }
        let pnl = ledger.unrealized_pnl(price);
        if pnl > 0.0 {
            Ok(())
        } else {
            Err(pnl)
        }
    }
}
