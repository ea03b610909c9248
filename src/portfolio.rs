//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Mean-variance estimation, Sharpe-ratio optimization, random portfolio
//! sampling and cash allocation.

pub mod allocation;
pub mod data;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod monte_carlo;
pub mod optimizers;
pub mod solver;
pub mod types;

pub use allocation::allocation_totals;
pub use allocation::Allocation;
pub use allocation::AllocationBuilder;
pub use data::estimate_returns;
pub use data::returns_matrix;
pub use data::CovarianceMatrix;
pub use data::MeanVector;
pub use data::PriceTable;
pub use data::ReturnEstimate;
pub use engine::OptimizationRun;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use error::PortfolioError;
pub use error::Result;
pub use metrics::evaluate;
pub use monte_carlo::sample_portfolios;
pub use monte_carlo::MonteCarloConfig;
pub use monte_carlo::WeightSampling;
pub use optimizers::maximize_sharpe;
pub use solver::SolverConfig;
pub use types::PortfolioResult;
pub use types::PortfolioStats;
pub use types::SimulationPopulation;
pub use types::WeightBounds;
