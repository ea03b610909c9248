//! # Capital Allocation
//!
//! $$
//! a_i=\operatorname{round}(w_i C),\qquad a_{i^\*}\mathrel{+}=C-\textstyle\sum_j a_j,\quad i^\*=\arg\max_i w_i
//! $$
//!
//! Whole-currency amounts per symbol that add up to the invested cash exactly.

use super::error::PortfolioError;
use super::error::Result;
use super::types::PortfolioResult;

/// Cash assigned to one symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct Allocation {
  pub symbol: String,
  pub weight: f64,
  /// Whole currency units.
  pub amount: u64,
  /// `weight * 100`.
  pub percentage: f64,
}

/// Turns optimal weights into currency amounts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationBuilder {
  cash: u64,
}

impl AllocationBuilder {
  pub fn new(cash: u64) -> Self {
    Self { cash }
  }

  pub fn cash(&self) -> u64 {
    self.cash
  }

  /// Allocations sorted by weight, largest first (input order on ties).
  ///
  /// Rounding residue goes to the largest position; if that would make it
  /// negative the rest carries on to the next-largest ones.
  pub fn build(&self, symbols: &[String], result: &PortfolioResult) -> Result<Vec<Allocation>> {
    let weights = &result.weights;
    if weights.len() != symbols.len() {
      return Err(PortfolioError::DimensionMismatch {
        expected: symbols.len(),
        actual: weights.len(),
      });
    }
    if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
      return Err(PortfolioError::invalid_config(format!(
        "allocation weights must be finite and non-negative, got {w}"
      )));
    }

    let cash = i64::try_from(self.cash)
      .map_err(|_| PortfolioError::invalid_config(format!("cash {} is too large", self.cash)))?;

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]));

    let mut amounts: Vec<i64> = weights
      .iter()
      .map(|w| (w * self.cash as f64).round() as i64)
      .collect();

    let mut residual = cash - amounts.iter().sum::<i64>();
    for &i in &order {
      if residual == 0 {
        break;
      }
      let adjusted = amounts[i] + residual;
      if adjusted >= 0 {
        amounts[i] = adjusted;
        residual = 0;
      } else {
        amounts[i] = 0;
        residual = adjusted;
      }
    }

    Ok(
      order
        .into_iter()
        .map(|i| Allocation {
          symbol: symbols[i].clone(),
          weight: weights[i],
          amount: amounts[i].max(0) as u64,
          percentage: weights[i] * 100.0,
        })
        .collect(),
    )
  }
}

/// Summed percentage and amount over `allocations`.
pub fn allocation_totals(allocations: &[Allocation]) -> (f64, u64) {
  allocations
    .iter()
    .fold((0.0, 0), |(pct, amount), a| (pct + a.percentage, amount + a.amount))
}
