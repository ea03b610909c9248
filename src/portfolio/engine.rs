//! # Portfolio Engine
//!
//! $$
//! \text{prices}\xrightarrow{\ \hat\mu,\hat\Sigma\ }\mathbf w^\*\xrightarrow{\ C\ }\text{allocation}
//! $$
//!
//! High-level orchestration of estimation, optimization, sampling and
//! cash allocation under one validated configuration.

use tracing::info;
use tracing::warn;

use super::allocation::Allocation;
use super::allocation::AllocationBuilder;
use super::data::estimate_returns;
use super::data::PriceTable;
use super::data::ReturnEstimate;
use super::error::PortfolioError;
use super::error::Result;
use super::metrics::evaluate;
use super::monte_carlo::sample_portfolios;
use super::monte_carlo::MonteCarloConfig;
use super::optimizers::maximize_sharpe;
use super::solver::SolverConfig;
use super::types::PortfolioResult;
use super::types::PortfolioStats;
use super::types::SimulationPopulation;
use super::types::WeightBounds;

/// Sharpe gap tolerated between the optimum and the best random sample.
pub const DOMINANCE_TOLERANCE: f64 = 1e-3;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioEngineConfig {
  /// Return periods per year used to annualize moments.
  pub periods_per_year: f64,
  /// Risk-free rate used in Sharpe computations.
  pub risk_free: f64,
  /// Trailing window applied to price tables; `None` keeps the full history.
  pub lookback_years: Option<u32>,
  /// Minimum return periods per symbol and after alignment.
  pub min_observations: usize,
  /// Per-asset weight bounds.
  pub bounds: WeightBounds,
  pub solver: SolverConfig,
  pub monte_carlo: MonteCarloConfig,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      periods_per_year: 252.0,
      risk_free: 0.0,
      lookback_years: Some(2),
      min_observations: 30,
      bounds: WeightBounds::default(),
      solver: SolverConfig::default(),
      monte_carlo: MonteCarloConfig::default(),
    }
  }
}

impl PortfolioEngineConfig {
  /// Reject out-of-range settings before any data is touched.
  pub fn validate(&self) -> Result<()> {
    if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
      return Err(PortfolioError::invalid_config(format!(
        "periods_per_year must be positive, got {}",
        self.periods_per_year
      )));
    }
    if !self.risk_free.is_finite() {
      return Err(PortfolioError::invalid_config(format!(
        "risk_free must be finite, got {}",
        self.risk_free
      )));
    }
    if self.lookback_years == Some(0) {
      return Err(PortfolioError::invalid_config(
        "lookback_years must be positive when set",
      ));
    }
    if self.min_observations < 2 {
      return Err(PortfolioError::invalid_config(format!(
        "min_observations must be at least 2, got {}",
        self.min_observations
      )));
    }
    self.bounds.validate()?;
    self.solver.validate()?;
    self.monte_carlo.validate()
  }
}

/// Everything produced by one [`PortfolioEngine::run`].
#[derive(Clone, Debug)]
pub struct OptimizationRun {
  pub estimate: ReturnEstimate,
  pub optimal: PortfolioResult,
  pub population: SimulationPopulation,
}

impl OptimizationRun {
  /// Symbols in weight order.
  pub fn symbols(&self) -> &[String] {
    self.estimate.symbols()
  }

  /// Whether the optimum ties or beats every random sample.
  pub fn optimum_dominates(&self) -> bool {
    self
      .population
      .is_dominated_by(&self.optimal, DOMINANCE_TOLERANCE)
  }
}

/// Single entry-point engine for Sharpe-maximizing allocation.
#[derive(Clone, Debug)]
pub struct PortfolioEngine {
  config: PortfolioEngineConfig,
}

impl PortfolioEngine {
  /// Construct an engine, validating the configuration eagerly.
  pub fn new(config: PortfolioEngineConfig) -> Result<Self> {
    config.validate()?;
    Ok(Self { config })
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  /// Annualized moments over the configured lookback window.
  pub fn estimate(&self, table: &PriceTable) -> Result<ReturnEstimate> {
    let window = match self.config.lookback_years {
      Some(years) => table.lookback(years),
      None => table.clone(),
    };
    estimate_returns(
      &window,
      self.config.periods_per_year,
      self.config.min_observations,
    )
  }

  pub fn evaluate(&self, weights: &[f64], estimate: &ReturnEstimate) -> Result<PortfolioStats> {
    evaluate(
      weights,
      &estimate.mean,
      &estimate.covariance,
      self.config.risk_free,
    )
  }

  /// Maximum-Sharpe portfolio for `estimate`.
  pub fn optimize(&self, estimate: &ReturnEstimate) -> Result<PortfolioResult> {
    maximize_sharpe(
      &estimate.mean,
      &estimate.covariance,
      self.config.risk_free,
      &self.config.bounds,
      &self.config.solver,
    )
  }

  /// Random feasible portfolios for `estimate`.
  pub fn simulate(&self, estimate: &ReturnEstimate) -> Result<SimulationPopulation> {
    sample_portfolios(
      &estimate.mean,
      &estimate.covariance,
      self.config.risk_free,
      &self.config.bounds,
      &self.config.monte_carlo,
    )
  }

  pub fn allocate(
    &self,
    estimate: &ReturnEstimate,
    result: &PortfolioResult,
    cash: u64,
  ) -> Result<Vec<Allocation>> {
    AllocationBuilder::new(cash).build(estimate.symbols(), result)
  }

  /// Estimate, optimize and sample in one pass.
  pub fn run(&self, table: &PriceTable) -> Result<OptimizationRun> {
    let estimate = self.estimate(table)?;
    let optimal = self.optimize(&estimate)?;
    let population = self.simulate(&estimate)?;

    let run = OptimizationRun {
      estimate,
      optimal,
      population,
    };

    if !run.optimum_dominates() {
      warn!(
        optimal_sharpe = run.optimal.sharpe,
        best_sample_sharpe = run.population.max_sharpe().map(|s| s.sharpe),
        "random sample beats the optimized portfolio"
      );
    }
    info!(
      symbols = run.symbols().len(),
      excluded = run.estimate.excluded.len(),
      observations = run.estimate.observations,
      sharpe = run.optimal.sharpe,
      expected_return = run.optimal.expected_return,
      volatility = run.optimal.volatility,
      "portfolio optimization finished"
    );

    Ok(run)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use tracing_test::traced_test;

  use super::*;
  use crate::portfolio::fixtures::synthetic_table;

  fn small_config() -> PortfolioEngineConfig {
    PortfolioEngineConfig {
      monte_carlo: MonteCarloConfig {
        count: 2000,
        ..MonteCarloConfig::default()
      },
      ..PortfolioEngineConfig::default()
    }
  }

  #[test]
  fn default_config_is_valid() {
    assert!(PortfolioEngine::new(PortfolioEngineConfig::default()).is_ok());
  }

  #[test]
  fn invalid_configs_are_rejected_up_front() {
    let cases = [
      PortfolioEngineConfig {
        periods_per_year: 0.0,
        ..PortfolioEngineConfig::default()
      },
      PortfolioEngineConfig {
        risk_free: f64::NAN,
        ..PortfolioEngineConfig::default()
      },
      PortfolioEngineConfig {
        lookback_years: Some(0),
        ..PortfolioEngineConfig::default()
      },
      PortfolioEngineConfig {
        min_observations: 1,
        ..PortfolioEngineConfig::default()
      },
      PortfolioEngineConfig {
        bounds: WeightBounds::capped(1.2),
        ..PortfolioEngineConfig::default()
      },
      PortfolioEngineConfig {
        solver: SolverConfig {
          tolerance: 0.0,
          ..SolverConfig::default()
        },
        ..PortfolioEngineConfig::default()
      },
      PortfolioEngineConfig {
        monte_carlo: MonteCarloConfig {
          count: 0,
          ..MonteCarloConfig::default()
        },
        ..PortfolioEngineConfig::default()
      },
    ];

    for config in cases {
      let err = PortfolioEngine::new(config).unwrap_err();
      assert!(matches!(err, PortfolioError::InvalidConfiguration(_)));
    }
  }

  #[test]
  #[traced_test]
  fn run_produces_dominant_fully_invested_portfolio() {
    let table = synthetic_table(&[0.30, 0.15, 0.22, 0.10], &[0.12, 0.08, 0.10, 0.05], 400, 17);
    let engine = PortfolioEngine::new(small_config()).unwrap();
    let run = engine.run(&table).unwrap();

    assert_eq!(run.symbols().len(), 4);
    assert_eq!(run.population.len(), 2000);
    assert_abs_diff_eq!(run.optimal.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    assert!(run.optimal.weights.iter().all(|w| *w >= 0.0));
    assert!(run.optimum_dominates());

    let stats = engine.evaluate(&run.optimal.weights, &run.estimate).unwrap();
    assert_eq!(stats, run.optimal.stats());
    assert!(logs_contain("portfolio optimization finished"));
    assert!(!logs_contain("random sample beats the optimized portfolio"));
  }

  #[test]
  fn run_is_deterministic() {
    let table = synthetic_table(&[0.25, 0.15, 0.20], &[0.10, 0.06, 0.08], 300, 23);
    let engine = PortfolioEngine::new(small_config()).unwrap();

    let a = engine.run(&table).unwrap();
    let b = engine.run(&table).unwrap();
    assert_eq!(a.optimal, b.optimal);
    assert_eq!(a.population, b.population);
  }

  #[test]
  fn estimate_applies_lookback() {
    let table = synthetic_table(&[0.1, 0.05], &[0.2, 0.1], 1000, 31);

    let windowed = PortfolioEngine::new(small_config()).unwrap();
    assert_eq!(windowed.estimate(&table).unwrap().observations, 730);

    let full = PortfolioEngine::new(PortfolioEngineConfig {
      lookback_years: None,
      ..small_config()
    })
    .unwrap();
    assert_eq!(full.estimate(&table).unwrap().observations, 999);
  }

  #[test]
  fn allocate_spends_all_cash() {
    let table = synthetic_table(&[0.25, 0.15, 0.20], &[0.10, 0.06, 0.08], 300, 29);
    let engine = PortfolioEngine::new(small_config()).unwrap();
    let estimate = engine.estimate(&table).unwrap();
    let optimal = engine.optimize(&estimate).unwrap();

    let allocations = engine.allocate(&estimate, &optimal, 25_000).unwrap();
    assert_eq!(allocations.len(), 3);
    assert_eq!(allocations.iter().map(|a| a.amount).sum::<u64>(), 25_000);
    assert!(allocations.windows(2).all(|w| w[0].weight >= w[1].weight));
  }

  #[test]
  fn short_history_is_reported() {
    let table = synthetic_table(&[0.1, 0.05], &[0.2, 0.1], 20, 3);
    let engine = PortfolioEngine::new(small_config()).unwrap();

    assert!(matches!(
      engine.run(&table),
      Err(PortfolioError::InsufficientData { remaining: 0, .. })
    ));
  }
}
