//! # Portfolio Metrics
//!
//! $$
//! \mu_p=\mathbf w^\top\mu,\qquad \sigma_p=\sqrt{\mathbf w^\top\Sigma\mathbf w},\qquad
//! S=\frac{\mu_p-r_f}{\sigma_p}
//! $$
//!
//! Pure evaluation of a weight vector against annualized moments.

use ndarray::ArrayView1;
use ndarray::ArrayView2;

use super::data::check_aligned;
use super::data::CovarianceMatrix;
use super::data::MeanVector;
use super::error::PortfolioError;
use super::error::Result;
use super::types::PortfolioStats;

/// Volatility at or below which a weight mix is treated as riskless.
///
/// The Sharpe ratio of such a mix is reported as `0.0` instead of an
/// unbounded quotient.
pub const VOLATILITY_EPSILON: f64 = 1e-12;

/// Negative variance tolerated as rounding noise before it is reported.
pub const VARIANCE_TOLERANCE: f64 = 1e-10;

/// Expected return, volatility and Sharpe ratio of `weights`.
pub fn evaluate(
  weights: &[f64],
  mean: &MeanVector,
  covariance: &CovarianceMatrix,
  risk_free: f64,
) -> Result<PortfolioStats> {
  check_aligned(mean, covariance)?;
  if weights.len() != mean.len() {
    return Err(PortfolioError::DimensionMismatch {
      expected: mean.len(),
      actual: weights.len(),
    });
  }

  portfolio_stats(
    ArrayView1::from(weights),
    mean.values().view(),
    covariance.values().view(),
    risk_free,
  )
}

/// Unchecked core of [`evaluate`]; lengths must already agree.
pub(crate) fn portfolio_stats(
  w: ArrayView1<f64>,
  mu: ArrayView1<f64>,
  cov: ArrayView2<f64>,
  risk_free: f64,
) -> Result<PortfolioStats> {
  let expected_return = w.dot(&mu);
  let variance = w.dot(&cov.dot(&w));

  if variance < -VARIANCE_TOLERANCE || variance.is_nan() {
    return Err(PortfolioError::DegenerateVariance { variance });
  }

  let volatility = variance.max(0.0).sqrt();
  let sharpe = if volatility > VOLATILITY_EPSILON {
    (expected_return - risk_free) / volatility
  } else {
    0.0
  };

  Ok(PortfolioStats {
    expected_return,
    volatility,
    sharpe,
  })
}
