//! # Spectral Projected Gradient
//!
//! $$
//! \mathbf x_{k+1}=\mathbf x_k+\alpha_k\big(P_\Omega(\mathbf x_k-\lambda_k\nabla f(\mathbf x_k))-\mathbf x_k\big),\qquad
//! \Omega=\{\mathbf x:\textstyle\sum_i x_i=1,\ l_i\le x_i\le u_i\}
//! $$
//!
//! Birgin–Martínez–Raydan SPG with a non-monotone (Grippo) line search,
//! specialised to the bounded simplex and driven by argmin's `Executor`.

use std::collections::VecDeque;
use std::time::Duration;

use argmin::core::ArgminError;
use argmin::core::CostFunction;
use argmin::core::Error;
use argmin::core::Gradient;
use argmin::core::IterState;
use argmin::core::Problem;
use argmin::core::Solver;
use argmin::core::TerminationReason;
use argmin::core::TerminationStatus;
use argmin::core::KV;

use super::error::PortfolioError;
use super::error::Result;

type SpgState = IterState<Vec<f64>, Vec<f64>, (), (), (), f64>;

/// Iteration budget and tolerances for the Sharpe optimizer.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverConfig {
  /// Maximum SPG iterations before the run is reported as failed.
  pub max_iters: u64,
  /// Converged once `||P(w - g) - w||_inf` falls to this value.
  pub tolerance: f64,
  /// Projected-gradient level at which a stalled line search still counts
  /// as converged.
  pub stall_tolerance: f64,
  /// Optional wall-clock budget.
  pub timeout: Option<Duration>,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      max_iters: 5000,
      tolerance: 1e-8,
      stall_tolerance: 1e-5,
      timeout: None,
    }
  }
}

impl SolverConfig {
  pub fn validate(&self) -> Result<()> {
    if self.max_iters == 0 {
      return Err(PortfolioError::invalid_config("max_iters must be positive"));
    }
    if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
      return Err(PortfolioError::invalid_config(format!(
        "tolerance must be positive, got {}",
        self.tolerance
      )));
    }
    if !(self.stall_tolerance.is_finite() && self.stall_tolerance >= self.tolerance) {
      return Err(PortfolioError::invalid_config(format!(
        "stall_tolerance must be finite and at least tolerance, got {}",
        self.stall_tolerance
      )));
    }
    if self.timeout == Some(Duration::ZERO) {
      return Err(PortfolioError::invalid_config("timeout must be non-zero"));
    }
    Ok(())
  }
}

/// Euclidean projection of `v` onto `{x : sum(x) = 1, lo_i <= x_i <= hi_i}`.
///
/// The projection is `clamp(v_i - tau, lo_i, hi_i)` for the unique shift
/// `tau` restoring the unit sum; `tau` is found by bisection. Bounds must be
/// feasible (`sum(lo) <= 1 <= sum(hi)`).
pub fn project_bounded_simplex(v: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
  let shifted_sum = |tau: f64| -> f64 {
    v.iter()
      .zip(bounds)
      .map(|(&vi, &(lo, hi))| (vi - tau).clamp(lo, hi))
      .sum()
  };

  // At tau_lo every coordinate sits on its upper bound, at tau_hi on its lower.
  let mut tau_lo = v
    .iter()
    .zip(bounds)
    .map(|(&vi, &(_, hi))| vi - hi)
    .fold(f64::INFINITY, f64::min);
  let mut tau_hi = v
    .iter()
    .zip(bounds)
    .map(|(&vi, &(lo, _))| vi - lo)
    .fold(f64::NEG_INFINITY, f64::max);

  for _ in 0..200 {
    let mid = 0.5 * (tau_lo + tau_hi);
    if mid <= tau_lo || mid >= tau_hi {
      break;
    }
    if shifted_sum(mid) > 1.0 {
      tau_lo = mid;
    } else {
      tau_hi = mid;
    }
  }

  let tau = 0.5 * (tau_lo + tau_hi);
  v.iter()
    .zip(bounds)
    .map(|(&vi, &(lo, hi))| (vi - tau).clamp(lo, hi))
    .collect()
}

/// True when `w` lies in the bounded simplex up to `tol`.
pub fn in_bounded_simplex(w: &[f64], bounds: &[(f64, f64)], tol: f64) -> bool {
  let sum: f64 = w.iter().sum();
  (sum - 1.0).abs() <= tol
    && w
      .iter()
      .zip(bounds)
      .all(|(&wi, &(lo, hi))| wi >= lo - tol && wi <= hi + tol)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn inf_norm_diff(a: &[f64], b: &[f64]) -> f64 {
  a.iter()
    .zip(b)
    .map(|(x, y)| (x - y).abs())
    .fold(0.0, f64::max)
}

/// Spectral projected gradient solver over a bounded simplex.
#[derive(Clone, Debug)]
pub struct SpectralProjectedGradient {
  bounds: Vec<(f64, f64)>,
  tolerance: f64,
  stall_tolerance: f64,
  /// Non-monotone memory (Grippo window).
  memory: usize,
  /// Armijo sufficient-decrease constant.
  gamma: f64,
  lambda_min: f64,
  lambda_max: f64,
  max_backtracks: usize,
  lambda: f64,
  history: VecDeque<f64>,
  projected_gradient: f64,
  stalled: bool,
}

impl SpectralProjectedGradient {
  pub fn new(bounds: Vec<(f64, f64)>, tolerance: f64, stall_tolerance: f64) -> Self {
    Self {
      bounds,
      tolerance,
      stall_tolerance,
      memory: 10,
      gamma: 1e-4,
      lambda_min: 1e-10,
      lambda_max: 1e10,
      max_backtracks: 60,
      lambda: 1.0,
      history: VecDeque::with_capacity(10),
      projected_gradient: f64::INFINITY,
      stalled: false,
    }
  }

  /// `||P(x - g) - x||_inf` at the latest iterate.
  pub fn projected_gradient(&self) -> f64 {
    self.projected_gradient
  }

  pub fn project(&self, v: &[f64]) -> Vec<f64> {
    project_bounded_simplex(v, &self.bounds)
  }

  fn stationarity(&self, x: &[f64], g: &[f64]) -> f64 {
    let trial: Vec<f64> = x.iter().zip(g).map(|(xi, gi)| xi - gi).collect();
    inf_norm_diff(&self.project(&trial), x)
  }

  fn remember(&mut self, cost: f64) {
    if self.history.len() == self.memory {
      self.history.pop_front();
    }
    self.history.push_back(cost);
  }
}

impl<O> Solver<O, SpgState> for SpectralProjectedGradient
where
  O: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  const NAME: &'static str = "Spectral Projected Gradient";

  fn init(&mut self, problem: &mut Problem<O>, mut state: SpgState) -> std::result::Result<(SpgState, Option<KV>), Error> {
    let x0 = state.take_param().ok_or_else(|| ArgminError::NotInitialized {
      text: "initial weights required".to_string(),
    })?;
    if x0.len() != self.bounds.len() {
      return Err(
        ArgminError::InvalidParameter {
          text: format!("{} weights for {} bounds", x0.len(), self.bounds.len()),
        }
        .into(),
      );
    }

    let x = self.project(&x0);
    let cost = problem.cost(&x)?;
    let grad = problem.gradient(&x)?;

    self.projected_gradient = self.stationarity(&x, &grad);
    self.lambda = if self.projected_gradient > 0.0 {
      (1.0 / self.projected_gradient).clamp(self.lambda_min, self.lambda_max)
    } else {
      1.0
    };
    self.history.clear();
    self.remember(cost);
    self.stalled = false;

    Ok((state.param(x).cost(cost).gradient(grad), None))
  }

  fn next_iter(&mut self, problem: &mut Problem<O>, mut state: SpgState) -> std::result::Result<(SpgState, Option<KV>), Error> {
    let x = state.take_param().ok_or_else(|| ArgminError::NotInitialized {
      text: "missing current weights".to_string(),
    })?;
    let g = state.take_gradient().ok_or_else(|| ArgminError::NotInitialized {
      text: "missing current gradient".to_string(),
    })?;
    let cost = state.get_cost();

    let trial: Vec<f64> = x.iter().zip(&g).map(|(xi, gi)| xi - self.lambda * gi).collect();
    let d: Vec<f64> = self
      .project(&trial)
      .iter()
      .zip(&x)
      .map(|(p, xi)| p - xi)
      .collect();
    let gtd = dot(&g, &d);
    let reference = self.history.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut alpha = 1.0;
    let mut accepted = None;
    for _ in 0..self.max_backtracks {
      let candidate: Vec<f64> = x.iter().zip(&d).map(|(xi, di)| xi + alpha * di).collect();
      let candidate_cost = problem.cost(&candidate)?;

      if candidate_cost <= reference + self.gamma * alpha * gtd {
        accepted = Some((candidate, candidate_cost));
        break;
      }

      // Safeguarded quadratic interpolation along d.
      let denom = candidate_cost - cost - alpha * gtd;
      let quadratic = if denom > 0.0 {
        -0.5 * alpha * alpha * gtd / denom
      } else {
        f64::NAN
      };
      alpha = if quadratic >= 0.1 * alpha && quadratic <= 0.9 * alpha {
        quadratic
      } else {
        0.5 * alpha
      };
    }

    let Some((x_new, cost_new)) = accepted else {
      self.stalled = true;
      return Ok((state.param(x).cost(cost).gradient(g), None));
    };

    let g_new = problem.gradient(&x_new)?;
    let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
    let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
    let sty = dot(&s, &y);
    self.lambda = if sty > 0.0 {
      (dot(&s, &s) / sty).clamp(self.lambda_min, self.lambda_max)
    } else {
      self.lambda_max
    };

    self.projected_gradient = self.stationarity(&x_new, &g_new);
    self.remember(cost_new);

    Ok((state.param(x_new).cost(cost_new).gradient(g_new), None))
  }

  fn terminate(&mut self, _state: &SpgState) -> TerminationStatus {
    if self.projected_gradient <= self.tolerance {
      return TerminationStatus::Terminated(TerminationReason::SolverConverged);
    }
    if self.stalled {
      // Remaining decrease is below floating-point resolution of the cost.
      return if self.projected_gradient <= self.stall_tolerance {
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
      } else {
        TerminationStatus::Terminated(TerminationReason::SolverExit(
          "line search stalled".to_string(),
        ))
      };
    }
    TerminationStatus::NotTerminated
  }
}
