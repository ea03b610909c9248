//! # Monte Carlo Portfolio Sampling
//!
//! $$
//! \mathbf w^{(k)}=\frac{\mathbf u^{(k)}}{\mathbf 1^\top\mathbf u^{(k)}},\qquad
//! u^{(k)}_i\sim\mathcal U[0,1)\ \text{or}\ \operatorname{Exp}(1)
//! $$
//!
//! Random feasible portfolios for charting the risk/return cloud and for
//! checking that the optimizer dominates them. Each sample owns an RNG
//! seeded from `(seed, k)`, so results do not depend on thread scheduling.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rand_distr::Exp1;
use rayon::prelude::*;
use tracing::debug;

use super::data::check_aligned;
use super::data::CovarianceMatrix;
use super::data::MeanVector;
use super::error::PortfolioError;
use super::error::Result;
use super::metrics::portfolio_stats;
use super::solver::in_bounded_simplex;
use super::solver::project_bounded_simplex;
use super::types::PortfolioResult;
use super::types::SimulationPopulation;
use super::types::WeightBounds;

/// Distribution of the raw draws normalized into weights.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WeightSampling {
  /// Independent `U[0, 1)` draws divided by their sum.
  #[default]
  Uniform,
  /// Unit exponentials divided by their sum, i.e. a flat Dirichlet.
  Dirichlet,
}

/// Configuration for random portfolio sampling.
#[derive(Clone, Debug, PartialEq)]
pub struct MonteCarloConfig {
  pub count: usize,
  pub seed: u64,
  pub sampling: WeightSampling,
}

impl Default for MonteCarloConfig {
  fn default() -> Self {
    Self {
      count: 10_000,
      seed: 42,
      sampling: WeightSampling::Uniform,
    }
  }
}

impl MonteCarloConfig {
  pub fn validate(&self) -> Result<()> {
    if self.count == 0 {
      return Err(PortfolioError::invalid_config(
        "monte carlo sample count must be positive",
      ));
    }
    Ok(())
  }
}

/// SplitMix64 finalizer over `seed + (k + 1) * golden`.
fn sample_seed(seed: u64, k: u64) -> u64 {
  let mut z = seed.wrapping_add(k.wrapping_add(1).wrapping_mul(0x9e3779b97f4a7c15));
  z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
  z ^ (z >> 31)
}

fn draw_weights(rng: &mut StdRng, n: usize, sampling: WeightSampling) -> Vec<f64> {
  let raw: Vec<f64> = match sampling {
    WeightSampling::Uniform => (0..n).map(|_| rng.random::<f64>()).collect(),
    WeightSampling::Dirichlet => (0..n).map(|_| rng.sample::<f64, _>(Exp1)).collect(),
  };

  let sum: f64 = raw.iter().sum();
  if sum > 0.0 {
    raw.iter().map(|x| x / sum).collect()
  } else {
    vec![1.0 / n as f64; n]
  }
}

/// Draw `config.count` feasible portfolios and evaluate each one.
///
/// Draws that violate `bounds` are projected onto the bounded simplex.
pub fn sample_portfolios(
  mean: &MeanVector,
  covariance: &CovarianceMatrix,
  risk_free: f64,
  bounds: &WeightBounds,
  config: &MonteCarloConfig,
) -> Result<SimulationPopulation> {
  check_aligned(mean, covariance)?;
  config.validate()?;

  let n = mean.len();
  if n == 0 {
    return Err(PortfolioError::InsufficientData {
      remaining: 0,
      required: 1,
      excluded: Vec::new(),
    });
  }
  let intervals = bounds.resolve(n)?;
  let mu = mean.values().view();
  let cov = covariance.values().view();

  let samples = (0..config.count)
    .into_par_iter()
    .map(|k| -> Result<PortfolioResult> {
      let mut rng = StdRng::seed_from_u64(sample_seed(config.seed, k as u64));
      let mut weights = draw_weights(&mut rng, n, config.sampling);
      if !in_bounded_simplex(&weights, &intervals, 1e-12) {
        weights = project_bounded_simplex(&weights, &intervals);
      }

      let stats = portfolio_stats(weights.as_slice().into(), mu, cov, risk_free)?;
      Ok(PortfolioResult::from_stats(weights, stats))
    })
    .collect::<Result<Vec<_>>>()?;

  let population = SimulationPopulation { samples };
  debug!(
    count = population.len(),
    best_sharpe = population.max_sharpe().map(|s| s.sharpe),
    "sampled random portfolios"
  );

  Ok(population)
}
