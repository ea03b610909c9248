//! # Portfolio Optimizers
//!
//! $$
//! \max_{\mathbf{w}} \ \frac{\mathbf w^\top\mu-r_f}{\sqrt{\mathbf w^\top\Sigma\mathbf w}}
//! \quad\text{s.t.}\quad \textstyle\sum_i w_i=1,\ l_i\le w_i\le u_i
//! $$
//!
//! Tangency (maximum Sharpe) portfolio over the bounded simplex.

use std::time::Duration;
use std::time::Instant;

use argmin::core::CostFunction;
use argmin::core::Error;
use argmin::core::Executor;
use argmin::core::Gradient;
use argmin::core::State;
use argmin::core::TerminationReason;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use tracing::debug;

use super::data::check_aligned;
use super::data::CovarianceMatrix;
use super::data::MeanVector;
use super::error::PortfolioError;
use super::error::Result;
use super::metrics::evaluate;
use super::metrics::portfolio_stats;
use super::metrics::VOLATILITY_EPSILON;
use super::solver::in_bounded_simplex;
use super::solver::project_bounded_simplex;
use super::solver::SolverConfig;
use super::solver::SpectralProjectedGradient;
use super::types::PortfolioResult;
use super::types::WeightBounds;

/// Negative Sharpe ratio with its analytic gradient.
#[derive(Clone)]
struct SharpeObjective {
  mu: Array1<f64>,
  cov: Array2<f64>,
  risk_free: f64,
}

impl CostFunction for SharpeObjective {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, Error> {
    let stats = portfolio_stats(
      ArrayView1::from(x.as_slice()),
      self.mu.view(),
      self.cov.view(),
      self.risk_free,
    )?;
    Ok(-stats.sharpe)
  }
}

impl Gradient for SharpeObjective {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  /// `-(mu / sigma - (mu'w - r_f) Σw / sigma^3)`; zero where the mix is riskless.
  fn gradient(&self, x: &Self::Param) -> std::result::Result<Self::Gradient, Error> {
    let w = ArrayView1::from(x.as_slice());
    let sigma_w = self.cov.dot(&w);
    let variance = w.dot(&sigma_w).max(0.0);
    let volatility = variance.sqrt();

    if volatility <= VOLATILITY_EPSILON {
      return Ok(vec![0.0; x.len()]);
    }

    let excess = w.dot(&self.mu) - self.risk_free;
    let vol3 = volatility * variance;

    Ok(
      self
        .mu
        .iter()
        .zip(sigma_w.iter())
        .map(|(m, s)| -(m / volatility - excess * s / vol3))
        .collect(),
    )
  }
}

/// Relative Sharpe margin another start must beat to replace the incumbent.
const SHARPE_TIE: f64 = 1e-10;

/// Equal weights followed by each asset's corner, all projected onto the
/// bounds, without duplicates.
fn starting_points(intervals: &[(f64, f64)]) -> Vec<Vec<f64>> {
  let n = intervals.len();
  let mut starts = vec![project_bounded_simplex(&vec![1.0 / n as f64; n], intervals)];

  for i in 0..n {
    let mut corner = vec![0.0; n];
    corner[i] = 1.0;
    let start = project_bounded_simplex(&corner, intervals);
    if !starts.contains(&start) {
      starts.push(start);
    }
  }

  starts
}

/// One SPG run from `start`. Anything but convergence is `OptimizationFailed`.
///
/// Errors raised by the objective keep their own variant. An error raised by
/// the executor itself takes the solver state with it, so it is reported
/// with `start` as the last weights and zero iterations.
fn run_from<O>(
  objective: O,
  start: Vec<f64>,
  intervals: &[(f64, f64)],
  config: &SolverConfig,
  timeout: Option<Duration>,
) -> Result<Vec<f64>>
where
  O: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  let solver = SpectralProjectedGradient::new(intervals.to_vec(), config.tolerance, config.stall_tolerance);
  let init = start.clone();
  let mut executor = Executor::new(objective, solver)
    .configure(|state| state.param(init).max_iters(config.max_iters));
  if let Some(timeout) = timeout {
    executor = executor.timeout(timeout);
  }

  let res = executor.run().map_err(|err| match err.downcast::<PortfolioError>() {
    Ok(portfolio_err) => portfolio_err,
    Err(other) => PortfolioError::OptimizationFailed {
      reason: other.to_string(),
      iterations: 0,
      last_weights: start.clone(),
      projected_gradient: f64::NAN,
    },
  })?;

  let state = res.state();
  let iterations = state.get_iter();
  let projected_gradient = res.solver().projected_gradient();
  let weights = state
    .get_best_param()
    .or(state.param.as_ref())
    .cloned()
    .unwrap_or(start);

  let reason = match state.get_termination_reason() {
    Some(TerminationReason::SolverConverged) => {
      debug!(iterations, projected_gradient, "start converged");
      return Ok(weights);
    }
    Some(reason) => reason.text().to_string(),
    None => "solver stopped without a termination reason".to_string(),
  };

  Err(PortfolioError::OptimizationFailed {
    reason,
    iterations,
    last_weights: weights,
    projected_gradient,
  })
}

/// Maximize the Sharpe ratio of a fully invested portfolio within `bounds`.
///
/// The solver is local, and when every excess return is negative the
/// objective has a local maximum at several corners. It is therefore run
/// from equal weights and from every corner of the feasible set, and the
/// converged run with the highest Sharpe ratio wins (earlier starts win
/// ties). `config.timeout` bounds all runs together.
///
/// If no start converges, the failure of the first start is returned as
/// [`PortfolioError::OptimizationFailed`]; no fallback weights are returned.
pub fn maximize_sharpe(
  mean: &MeanVector,
  covariance: &CovarianceMatrix,
  risk_free: f64,
  bounds: &WeightBounds,
  config: &SolverConfig,
) -> Result<PortfolioResult> {
  check_aligned(mean, covariance)?;
  config.validate()?;
  if !risk_free.is_finite() {
    return Err(PortfolioError::invalid_config(format!(
      "risk-free rate must be finite, got {risk_free}"
    )));
  }

  let n = mean.len();
  if n == 0 {
    return Err(PortfolioError::InsufficientData {
      remaining: 0,
      required: 1,
      excluded: Vec::new(),
    });
  }
  let intervals = bounds.resolve(n)?;

  if n == 1 {
    let weights = vec![1.0];
    let stats = evaluate(&weights, mean, covariance, risk_free)?;
    return Ok(PortfolioResult::from_stats(weights, stats));
  }

  let objective = SharpeObjective {
    mu: mean.values().clone(),
    cov: covariance.values().clone(),
    risk_free,
  };
  let starts = starting_points(&intervals);
  let deadline = config.timeout.map(|timeout| Instant::now() + timeout);

  let mut best: Option<PortfolioResult> = None;
  let mut first_failure = None;
  let mut converged = 0usize;

  for start in starts.iter() {
    let remaining = match deadline {
      Some(deadline) => {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
          first_failure.get_or_insert(PortfolioError::OptimizationFailed {
            reason: "Timeout reached".to_string(),
            iterations: 0,
            last_weights: start.clone(),
            projected_gradient: f64::NAN,
          });
          break;
        }
        Some(left)
      }
      None => None,
    };

    let weights = match run_from(objective.clone(), start.clone(), &intervals, config, remaining) {
      Ok(weights) => weights,
      Err(failure @ PortfolioError::OptimizationFailed { .. }) => {
        first_failure.get_or_insert(failure);
        continue;
      }
      Err(err) => return Err(err),
    };
    converged += 1;

    // Clip rounding residue back onto the bounded simplex.
    let weights = if in_bounded_simplex(&weights, &intervals, 1e-12) {
      weights
    } else {
      project_bounded_simplex(&weights, &intervals)
    };
    let stats = evaluate(&weights, mean, covariance, risk_free)?;

    let improves = best.as_ref().map_or(true, |incumbent| {
      stats.sharpe > incumbent.sharpe + SHARPE_TIE * incumbent.sharpe.abs().max(1.0)
    });
    if improves {
      best = Some(PortfolioResult::from_stats(weights, stats));
    }
  }

  let Some(result) = best else {
    return Err(first_failure.unwrap_or_else(|| PortfolioError::OptimizationFailed {
      reason: "no starting point was tried".to_string(),
      iterations: 0,
      last_weights: Vec::new(),
      projected_gradient: f64::NAN,
    }));
  };

  debug!(
    starts = starts.len(),
    converged,
    sharpe = result.sharpe,
    volatility = result.volatility,
    "sharpe optimization converged"
  );

  Ok(result)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn symbols(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("S{i}")).collect()
  }

  fn moments(mu: Array1<f64>, cov: Array2<f64>) -> (MeanVector, CovarianceMatrix) {
    let names = symbols(mu.len());
    (
      MeanVector::new(names.clone(), mu).unwrap(),
      CovarianceMatrix::new(names, cov).unwrap(),
    )
  }

  fn three_assets() -> (MeanVector, CovarianceMatrix) {
    moments(
      array![0.10, 0.15, 0.05],
      array![
        [0.040, 0.005, 0.004],
        [0.005, 0.020, 0.003],
        [0.004, 0.003, 0.030]
      ],
    )
  }

  #[test]
  fn favours_best_return_to_risk_asset() {
    let (mean, cov) = three_assets();
    let result = maximize_sharpe(&mean, &cov, 0.02, &WeightBounds::default(), &SolverConfig::default()).unwrap();

    let argmax = result
      .weights
      .iter()
      .enumerate()
      .max_by(|a, b| a.1.total_cmp(b.1))
      .map(|(i, _)| i)
      .unwrap();
    assert_eq!(argmax, 1);

    let equal = evaluate(&[1.0 / 3.0; 3], &mean, &cov, 0.02).unwrap();
    assert!(result.sharpe > equal.sharpe);
  }

  #[test]
  fn weights_are_fully_invested_and_metrics_consistent() {
    let (mean, cov) = three_assets();
    let result = maximize_sharpe(&mean, &cov, 0.02, &WeightBounds::default(), &SolverConfig::default()).unwrap();

    assert!(in_bounded_simplex(&result.weights, &[(0.0, 1.0); 3], 1e-9));
    let stats = evaluate(&result.weights, &mean, &cov, 0.02).unwrap();
    assert_eq!(stats, result.stats());
  }

  #[test]
  fn matches_closed_form_tangency_portfolio() {
    let (mean, cov) = moments(array![0.10, 0.20], array![[0.04, 0.01], [0.01, 0.09]]);
    let result = maximize_sharpe(&mean, &cov, 0.02, &WeightBounds::default(), &SolverConfig::default()).unwrap();

    // Σ^{-1}(mu - r_f) normalized to unit sum.
    assert_abs_diff_eq!(result.weights[0], 0.0054 / 0.0118, epsilon = 1e-5);
    assert_abs_diff_eq!(result.weights[1], 0.0064 / 0.0118, epsilon = 1e-5);
  }

  #[test]
  fn repeated_runs_are_identical() {
    let (mean, cov) = three_assets();
    let config = SolverConfig::default();
    let a = maximize_sharpe(&mean, &cov, 0.02, &WeightBounds::default(), &config).unwrap();
    let b = maximize_sharpe(&mean, &cov, 0.02, &WeightBounds::default(), &config).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn single_asset_takes_everything() {
    let (mean, cov) = moments(array![0.08], array![[0.04]]);
    let result = maximize_sharpe(&mean, &cov, 0.0, &WeightBounds::default(), &SolverConfig::default()).unwrap();

    assert_eq!(result.weights, vec![1.0]);
    assert_abs_diff_eq!(result.volatility, 0.2, epsilon = 1e-15);
    assert_abs_diff_eq!(result.sharpe, 0.4, epsilon = 1e-12);
  }

  #[test]
  fn identical_assets_receive_identical_weights() {
    let (mean, cov) = moments(
      array![0.12, 0.12, 0.06],
      array![
        [0.04, 0.01, 0.00],
        [0.01, 0.04, 0.00],
        [0.00, 0.00, 0.02]
      ],
    );
    let result = maximize_sharpe(&mean, &cov, 0.0, &WeightBounds::default(), &SolverConfig::default()).unwrap();
    assert_abs_diff_eq!(result.weights[0], result.weights[1], epsilon = 1e-9);
  }

  #[test]
  fn caps_are_respected() {
    let (mean, cov) = three_assets();
    let result = maximize_sharpe(&mean, &cov, 0.02, &WeightBounds::capped(0.4), &SolverConfig::default()).unwrap();

    assert!(in_bounded_simplex(&result.weights, &[(0.0, 0.4); 3], 1e-9));
    assert_abs_diff_eq!(result.weights[1], 0.4, epsilon = 1e-6);
  }

  #[test]
  fn exhausted_budget_is_an_error() {
    let (mean, cov) = three_assets();
    let config = SolverConfig {
      max_iters: 1,
      ..SolverConfig::default()
    };
    let err = maximize_sharpe(&mean, &cov, 0.02, &WeightBounds::default(), &config).unwrap_err();

    match err {
      PortfolioError::OptimizationFailed {
        iterations,
        last_weights,
        ..
      } => {
        assert_eq!(iterations, 1);
        assert_eq!(last_weights.len(), 3);
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn infeasible_bounds_are_rejected() {
    let (mean, cov) = three_assets();
    let err = maximize_sharpe(&mean, &cov, 0.02, &WeightBounds::capped(0.2), &SolverConfig::default()).unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidConfiguration(_)));
  }

  #[test]
  fn uncorrelated_twins_split_evenly() {
    let (mean, cov) = moments(
      array![0.12, 0.12, 0.06],
      array![
        [0.04, 0.00, 0.00],
        [0.00, 0.04, 0.00],
        [0.00, 0.00, 0.03]
      ],
    );
    let result = maximize_sharpe(&mean, &cov, 0.0, &WeightBounds::default(), &SolverConfig::default()).unwrap();

    // Σ^{-1} mu = [3, 3, 2].
    assert_abs_diff_eq!(result.weights[0], result.weights[1], epsilon = 1e-9);
    assert_abs_diff_eq!(result.weights[0], 0.375, epsilon = 1e-5);
    assert_abs_diff_eq!(result.weights[2], 0.25, epsilon = 1e-5);
  }

  fn losing_assets() -> (MeanVector, CovarianceMatrix) {
    // Vols [0.40, 0.10, 0.25, 0.20], pairwise correlation 0.2.
    moments(
      array![-0.08, -0.03, -0.12, -0.05],
      array![
        [0.1600, 0.0080, 0.0200, 0.0160],
        [0.0080, 0.0100, 0.0050, 0.0040],
        [0.0200, 0.0050, 0.0625, 0.0100],
        [0.0160, 0.0040, 0.0100, 0.0400]
      ],
    )
  }

  #[test]
  fn negative_excess_returns_pick_the_best_corner() {
    let (mean, cov) = losing_assets();
    let result = maximize_sharpe(&mean, &cov, 0.0, &WeightBounds::default(), &SolverConfig::default()).unwrap();

    // Sharpe by corner: -0.2, -0.3, -0.48, -0.25.
    assert_abs_diff_eq!(result.weights[0], 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(result.sharpe, -0.2, epsilon = 1e-9);

    let equal = evaluate(&[0.25; 4], &mean, &cov, 0.0).unwrap();
    assert!(result.sharpe > equal.sharpe);
  }

  #[test]
  fn starting_points_cover_equal_weights_and_corners() {
    let starts = starting_points(&[(0.0, 1.0); 3]);
    assert_eq!(starts.len(), 4);
    assert!(starts.iter().all(|s| in_bounded_simplex(s, &[(0.0, 1.0); 3], 1e-12)));
    assert_abs_diff_eq!(starts[0][1], 1.0 / 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(starts[2][1], 1.0, epsilon = 1e-12);

    let capped = starting_points(&[(0.0, 0.4); 3]);
    assert_eq!(capped.len(), 4);
    assert!(capped.iter().all(|s| in_bounded_simplex(s, &[(0.0, 0.4); 3], 1e-12)));
    assert_abs_diff_eq!(capped[1][0], 0.4, epsilon = 1e-12);
  }

  #[test]
  fn timeout_is_an_optimization_failure() {
    let (mean, cov) = three_assets();
    let config = SolverConfig {
      timeout: Some(Duration::from_nanos(1)),
      ..SolverConfig::default()
    };
    let err = maximize_sharpe(&mean, &cov, 0.02, &WeightBounds::default(), &config).unwrap_err();

    match err {
      PortfolioError::OptimizationFailed {
        reason,
        last_weights,
        ..
      } => {
        assert_eq!(reason, "Timeout reached");
        assert_eq!(last_weights.len(), 3);
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  /// Objective whose backend is gone.
  struct Unavailable;

  impl CostFunction for Unavailable {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, _x: &Self::Param) -> std::result::Result<Self::Output, Error> {
      Err(Error::msg("objective unavailable"))
    }
  }

  impl Gradient for Unavailable {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, x: &Self::Param) -> std::result::Result<Self::Gradient, Error> {
      Ok(vec![0.0; x.len()])
    }
  }

  #[test]
  fn executor_error_reports_the_start() {
    let start = vec![0.5, 0.5];
    let err = run_from(Unavailable, start.clone(), &[(0.0, 1.0); 2], &SolverConfig::default(), None).unwrap_err();

    match err {
      PortfolioError::OptimizationFailed {
        reason,
        iterations,
        last_weights,
        ..
      } => {
        assert_eq!(reason, "objective unavailable");
        assert_eq!(iterations, 0);
        assert_eq!(last_weights, start);
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn objective_errors_keep_their_variant() {
    let (mean, _) = three_assets();
    let objective = SharpeObjective {
      mu: mean.values().clone(),
      cov: Array2::from_elem((3, 3), -1.0),
      risk_free: 0.0,
    };
    let err = run_from(objective, vec![1.0 / 3.0; 3], &[(0.0, 1.0); 3], &SolverConfig::default(), None).unwrap_err();
    assert!(matches!(err, PortfolioError::DegenerateVariance { .. }));
  }

  #[test]
  fn gradient_matches_finite_differences() {
    let (mean, cov) = three_assets();
    let objective = SharpeObjective {
      mu: mean.values().clone(),
      cov: cov.values().clone(),
      risk_free: 0.02,
    };
    let x = vec![0.2, 0.5, 0.3];
    let g = objective.gradient(&x).unwrap();

    let h = 1e-6;
    for i in 0..3 {
      let mut up = x.clone();
      let mut down = x.clone();
      up[i] += h;
      down[i] -= h;
      let fd = (objective.cost(&up).unwrap() - objective.cost(&down).unwrap()) / (2.0 * h);
      assert_abs_diff_eq!(g[i], fd, epsilon = 1e-6);
    }
  }
}
