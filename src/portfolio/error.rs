//! # Portfolio Errors
//!
//! $$
//! \text{run} : \text{inputs} \to \text{PortfolioResult} \ \cup \ \text{PortfolioError}
//! $$
//!
//! Every error is terminal for the current optimization run. Nothing in the
//! crate retries or degrades to a partial result.

use thiserror::Error;

/// Result alias used across the portfolio module.
pub type Result<T> = std::result::Result<T, PortfolioError>;

/// Error kinds surfaced by estimation, evaluation, optimization and sampling.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortfolioError {
  /// Fewer usable symbols than required after dropping short histories.
  #[error("insufficient data: {remaining} usable symbols, need at least {required} (excluded: {excluded:?})")]
  InsufficientData {
    remaining: usize,
    required: usize,
    excluded: Vec<String>,
  },

  /// Too few aligned return periods to estimate moments.
  #[error("insufficient history: {observations} return periods, need at least {required}")]
  InsufficientHistory { observations: usize, required: usize },

  /// Portfolio variance (or covariance spectrum) negative beyond tolerance.
  #[error("degenerate variance: {variance:e} is negative beyond tolerance")]
  DegenerateVariance { variance: f64 },

  /// Solver did not converge within its budget.
  #[error("optimization failed after {iterations} iterations: {reason} (projected gradient {projected_gradient:e})")]
  OptimizationFailed {
    reason: String,
    iterations: u64,
    last_weights: Vec<f64>,
    projected_gradient: f64,
  },

  /// Out-of-range configuration detected before any computation.
  #[error("invalid configuration: {0}")]
  InvalidConfiguration(String),

  /// Malformed price table (shape, dates, non-positive prices).
  #[error("invalid price table: {0}")]
  InvalidPriceTable(String),

  /// Covariance matrix that is non-finite or not symmetric.
  #[error("invalid covariance matrix: {0}")]
  InvalidCovariance(String),

  /// Vector/matrix lengths disagree.
  #[error("dimension mismatch: expected {expected}, got {actual}")]
  DimensionMismatch { expected: usize, actual: usize },

  /// Mean vector and covariance matrix list different symbols or orderings.
  #[error("symbol mismatch between mean vector {mean:?} and covariance matrix {covariance:?}")]
  SymbolMismatch {
    mean: Vec<String>,
    covariance: Vec<String>,
  },
}

impl PortfolioError {
  pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
    Self::InvalidConfiguration(message.into())
  }

  pub(crate) fn invalid_table(message: impl Into<String>) -> Self {
    Self::InvalidPriceTable(message.into())
  }

  pub(crate) fn invalid_covariance(message: impl Into<String>) -> Self {
    Self::InvalidCovariance(message.into())
  }
}
