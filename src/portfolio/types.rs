//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}\in\Delta} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Shared bounds, metric and result containers for portfolio optimization.

use super::error::PortfolioError;
use super::error::Result;

/// Slack allowed when checking that bounds admit a fully invested portfolio.
const FEASIBILITY_SLACK: f64 = 1e-12;

/// Per-asset weight bounds. Weights are always long-only and unlevered, so
/// every bound lies in `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub enum WeightBounds {
  /// Same `[lower, upper]` interval for every asset.
  Uniform { lower: f64, upper: f64 },
  /// One `(lower, upper)` interval per asset, in symbol order.
  PerAsset(Vec<(f64, f64)>),
}

impl Default for WeightBounds {
  fn default() -> Self {
    Self::long_only()
  }
}

impl WeightBounds {
  /// No shorting, no leverage: `[0, 1]` per asset.
  pub fn long_only() -> Self {
    Self::Uniform {
      lower: 0.0,
      upper: 1.0,
    }
  }

  /// Long-only with a common cap on every position.
  pub fn capped(upper: f64) -> Self {
    Self::Uniform { lower: 0.0, upper }
  }

  /// Check interval sanity without knowing the asset count.
  pub fn validate(&self) -> Result<()> {
    match self {
      Self::Uniform { lower, upper } => check_interval(None, *lower, *upper),
      Self::PerAsset(intervals) => {
        if intervals.is_empty() {
          return Err(PortfolioError::invalid_config(
            "per-asset bounds must not be empty",
          ));
        }
        for (i, &(lower, upper)) in intervals.iter().enumerate() {
          check_interval(Some(i), lower, upper)?;
        }
        Ok(())
      }
    }
  }

  /// Expand to one interval per asset and check that a fully invested
  /// portfolio exists inside them.
  pub fn resolve(&self, n: usize) -> Result<Vec<(f64, f64)>> {
    self.validate()?;

    let intervals = match self {
      Self::Uniform { lower, upper } => vec![(*lower, *upper); n],
      Self::PerAsset(intervals) => {
        if intervals.len() != n {
          return Err(PortfolioError::DimensionMismatch {
            expected: n,
            actual: intervals.len(),
          });
        }
        intervals.clone()
      }
    };

    let lower_sum: f64 = intervals.iter().map(|(lo, _)| lo).sum();
    let upper_sum: f64 = intervals.iter().map(|(_, hi)| hi).sum();

    if lower_sum > 1.0 + FEASIBILITY_SLACK {
      return Err(PortfolioError::invalid_config(format!(
        "lower bounds sum to {lower_sum}, above full investment"
      )));
    }
    if upper_sum < 1.0 - FEASIBILITY_SLACK {
      return Err(PortfolioError::invalid_config(format!(
        "upper bounds sum to {upper_sum}, below full investment"
      )));
    }

    Ok(intervals)
  }
}

fn check_interval(asset: Option<usize>, lower: f64, upper: f64) -> Result<()> {
  let label = match asset {
    Some(i) => format!("bounds for asset {i}"),
    None => "bounds".to_string(),
  };

  if !lower.is_finite() || !upper.is_finite() {
    return Err(PortfolioError::invalid_config(format!(
      "{label} must be finite"
    )));
  }
  if lower > upper {
    return Err(PortfolioError::invalid_config(format!(
      "{label}: lower {lower} exceeds upper {upper}"
    )));
  }
  if lower < 0.0 || upper > 1.0 {
    return Err(PortfolioError::invalid_config(format!(
      "{label} must lie within [0, 1], got [{lower}, {upper}]"
    )));
  }

  Ok(())
}

/// Expected return, volatility and Sharpe ratio of one weight vector.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PortfolioStats {
  /// `w · mu`.
  pub expected_return: f64,
  /// `sqrt(w' Σ w)`.
  pub volatility: f64,
  /// `(expected_return - risk_free) / volatility`, or `0.0` for a riskless mix.
  pub sharpe: f64,
}

/// Output of a portfolio optimization run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortfolioResult {
  /// Final portfolio weights.
  pub weights: Vec<f64>,
  /// Model expected portfolio return (annualized if inputs are annualized).
  pub expected_return: f64,
  /// Model portfolio volatility.
  pub volatility: f64,
  /// Sharpe ratio computed as `(expected_return - risk_free) / volatility`.
  pub sharpe: f64,
}

impl PortfolioResult {
  pub(crate) fn from_stats(weights: Vec<f64>, stats: PortfolioStats) -> Self {
    Self {
      weights,
      expected_return: stats.expected_return,
      volatility: stats.volatility,
      sharpe: stats.sharpe,
    }
  }

  /// Metrics of this result without the weights.
  pub fn stats(&self) -> PortfolioStats {
    PortfolioStats {
      expected_return: self.expected_return,
      volatility: self.volatility,
      sharpe: self.sharpe,
    }
  }
}

/// Random feasible portfolios used to chart the feasible region.
///
/// Diagnostic only; the reported optimum always comes from the optimizer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulationPopulation {
  /// Samples in draw order.
  pub samples: Vec<PortfolioResult>,
}

impl SimulationPopulation {
  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &PortfolioResult> {
    self.samples.iter()
  }

  /// Sample with the highest Sharpe ratio (first one on ties).
  pub fn max_sharpe(&self) -> Option<&PortfolioResult> {
    self
      .samples
      .iter()
      .fold(None, |best: Option<&PortfolioResult>, s| match best {
        Some(b) if b.sharpe >= s.sharpe => Some(b),
        _ => Some(s),
      })
  }

  /// Sample with the lowest volatility (first one on ties).
  pub fn min_volatility(&self) -> Option<&PortfolioResult> {
    self
      .samples
      .iter()
      .fold(None, |best: Option<&PortfolioResult>, s| match best {
        Some(b) if b.volatility <= s.volatility => Some(b),
        _ => Some(s),
      })
  }

  /// True when `result` ties or beats every sampled Sharpe ratio within `tol`.
  pub fn is_dominated_by(&self, result: &PortfolioResult, tol: f64) -> bool {
    self
      .max_sharpe()
      .map_or(true, |best| result.sharpe + tol >= best.sharpe)
  }
}
