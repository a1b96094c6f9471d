//! Capital allocation seam
//!
//! The engine asks the allocator before every buy and notifies it after every
//! sell or liquidation. Pools shared across securities are arbitrated by the
//! caller; the engine only reports usage.

use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::Money;

pub trait CapitalAllocator {
    /// Capital still free to deploy
    fn available(&self) -> f64;

    /// Capital currently tied up in open lots
    fn deployed(&self) -> f64;

    fn can_deploy(&self, amount: f64) -> bool {
        amount <= self.available() + 1e-9
    }

    /// Reserve `amount` for a buy
    fn deploy(&mut self, amount: f64) -> Result<(), EngineError>;

    /// Return the cost basis of closed lots
    fn release(&mut self, amount: f64);
}

/// Fixed allocation for a single security
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedCapitalPool {
    total: Money,
    deployed: Money,
}

impl FixedCapitalPool {
    pub fn new(total: f64) -> Self {
        Self {
            total: Money::from_f64(total),
            deployed: Money::ZERO,
        }
    }

    pub fn total(&self) -> f64 {
        self.total.to_f64()
    }
}

impl CapitalAllocator for FixedCapitalPool {
    fn available(&self) -> f64 {
        (self.total - self.deployed).max(Money::ZERO).to_f64()
    }

    fn deployed(&self) -> f64 {
        self.deployed.to_f64()
    }

    fn deploy(&mut self, amount: f64) -> Result<(), EngineError> {
        if !self.can_deploy(amount) {
            return Err(EngineError::CapitalExhausted {
                requested: amount,
                available: self.available(),
            });
        }
        self.deployed += Money::from_f64(amount);
        Ok(())
    }

    fn release(&mut self, amount: f64) {
        self.deployed = (self.deployed - Money::from_f64(amount))
            .max(Money::ZERO)
            .round_dp(8);
        // Sub-cent residue from float cost bases is released with the last lot
        if self.deployed < Money::from_decimal(dec!(0.01)) {
            self.deployed = Money::ZERO;
        }
    }
}
