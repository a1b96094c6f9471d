//! Lot ledger
//!
//! Owns the open lots of one security and the P&L arithmetic over them.
//! A lot never survives with zero shares: full removal deletes it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::{Direction, Lot, LotFill, LotId, LotSource, Money};

/// Remaining quantity below which a partially sold lot is treated as closed
const SHARE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotLedger {
    direction: Direction,
    lots: Vec<Lot>,
    next_id: LotId,
    realized_pnl: Money,
    shares_bought: f64,
    shares_sold: f64,
}

impl LotLedger {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            lots: Vec::new(),
            next_id: 1,
            realized_pnl: Money::ZERO,
            shares_bought: 0.0,
            shares_sold: 0.0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Open a new lot and return its id
    pub fn add_lot(
        &mut self,
        price: f64,
        shares: f64,
        date: NaiveDate,
        source: LotSource,
    ) -> Result<LotId, LedgerError> {
        if !(shares.is_finite() && shares > 0.0) {
            return Err(LedgerError::InvalidQuantity(shares));
        }
        if !(price.is_finite() && price > 0.0) {
            return Err(LedgerError::InvalidQuantity(price));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.lots.push(Lot {
            id,
            purchase_price: price,
            shares,
            purchase_date: date,
            source,
        });
        self.shares_bought += shares;
        Ok(id)
    }

    /// Remove `shares` from a lot at `exit_price`, deleting it when emptied.
    /// Returns the fill with the realized P&L of the removed quantity.
    pub fn remove_shares(
        &mut self,
        lot_id: LotId,
        shares: f64,
        exit_price: f64,
    ) -> Result<LotFill, LedgerError> {
        if !(shares.is_finite() && shares > 0.0) {
            return Err(LedgerError::InvalidQuantity(shares));
        }
        let index = self
            .lots
            .iter()
            .position(|l| l.id == lot_id)
            .ok_or(LedgerError::UnknownLot(lot_id))?;

        let lot = &mut self.lots[index];
        if shares > lot.shares + SHARE_EPSILON {
            return Err(LedgerError::InsufficientShares {
                lot_id,
                requested: shares,
                available: lot.shares,
            });
        }

        let removed = shares.min(lot.shares);
        let realized = self.direction.pnl(lot.purchase_price, exit_price, removed);
        let fill = LotFill {
            lot_id,
            purchase_price: lot.purchase_price,
            shares: removed,
            realized_pnl: realized,
        };

        lot.shares -= removed;
        if lot.shares <= SHARE_EPSILON {
            self.lots.remove(index);
        }
        self.realized_pnl += Money::from_f64(realized);
        self.shares_sold += removed;
        Ok(fill)
    }

    /// Close a whole lot
    pub fn close_lot(&mut self, lot_id: LotId, exit_price: f64) -> Result<LotFill, LedgerError> {
        let shares = self
            .get(lot_id)
            .map(|l| l.shares)
            .ok_or(LedgerError::UnknownLot(lot_id))?;
        self.remove_shares(lot_id, shares, exit_price)
    }

    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    pub fn get(&self, lot_id: LotId) -> Option<&Lot> {
        self.lots.iter().find(|l| l.id == lot_id)
    }

    pub fn len(&self) -> usize {
        self.lots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    pub fn total_shares(&self) -> f64 {
        self.lots.iter().map(|l| l.shares).sum()
    }

    pub fn cost_basis(&self) -> f64 {
        self.lots.iter().map(Lot::cost_basis).sum()
    }

    /// Share-weighted mean purchase price, 0 for an empty ledger
    pub fn average_cost(&self) -> f64 {
        let shares = self.total_shares();
        if shares <= 0.0 {
            return 0.0;
        }
        self.cost_basis() / shares
    }

    /// Mark-to-market P&L of the open lots, 0 for an empty ledger
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.lots
            .iter()
            .map(|l| self.direction.pnl(l.purchase_price, price, l.shares))
            .sum()
    }

    pub fn realized_pnl(&self) -> Money {
        self.realized_pnl
    }

    /// All-time shares added by buys and seeding
    pub fn shares_bought(&self) -> f64 {
        self.shares_bought
    }

    /// All-time shares removed by sells and liquidations
    pub fn shares_sold(&self) -> f64 {
        self.shares_sold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_empty_ledger_queries() {
        let ledger = LotLedger::new(Direction::Long);
        assert_eq!(ledger.average_cost(), 0.0);
        assert_eq!(ledger.unrealized_pnl(123.0), 0.0);
    }

    #[test]
    fn test_average_cost_and_pnl() {
        let mut ledger = LotLedger::new(Direction::Long);
        ledger.add_lot(40.0, 10.0, day(1), LotSource::Platform).unwrap();
        ledger.add_lot(60.0, 10.0, day(2), LotSource::Platform).unwrap();

        assert_relative_eq!(ledger.average_cost(), 50.0);
        assert_relative_eq!(ledger.unrealized_pnl(55.0), 100.0);
        assert_relative_eq!(ledger.total_shares(), 20.0);
    }

    #[test]
    fn test_partial_and_full_removal() {
        let mut ledger = LotLedger::new(Direction::Long);
        let id = ledger.add_lot(50.0, 10.0, day(1), LotSource::Platform).unwrap();

        let fill = ledger.remove_shares(id, 4.0, 60.0).unwrap();
        assert_relative_eq!(fill.realized_pnl, 40.0);
        assert_relative_eq!(ledger.get(id).unwrap().shares, 6.0);

        ledger.remove_shares(id, 6.0, 45.0).unwrap();
        assert!(ledger.get(id).is_none());
        assert!(ledger.is_empty());
        assert_relative_eq!(ledger.realized_pnl().to_f64(), 10.0);
        assert_relative_eq!(ledger.shares_bought() - ledger.shares_sold(), 0.0);
    }

    #[test]
    fn test_removal_errors() {
        let mut ledger = LotLedger::new(Direction::Long);
        let id = ledger.add_lot(50.0, 1.0, day(1), LotSource::Platform).unwrap();
        assert_eq!(
            ledger.remove_shares(99, 1.0, 50.0),
            Err(LedgerError::UnknownLot(99))
        );
        assert!(matches!(
            ledger.remove_shares(id, 2.0, 50.0),
            Err(LedgerError::InsufficientShares { .. })
        ));
        assert!(ledger.add_lot(50.0, 0.0, day(1), LotSource::Platform).is_err());
    }

    #[test]
    fn test_short_pnl() {
        let mut ledger = LotLedger::new(Direction::Short);
        let id = ledger.add_lot(100.0, 2.0, day(1), LotSource::Platform).unwrap();
        assert_relative_eq!(ledger.unrealized_pnl(90.0), 20.0);
        let fill = ledger.close_lot(id, 110.0).unwrap();
        assert_relative_eq!(fill.realized_pnl, -20.0);
    }
}
