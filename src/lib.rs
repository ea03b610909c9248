//! # mpt-rs
//!
//! $$
//! \mathbf w^\*=\arg\max_{\mathbf 1^\top\mathbf w=1,\ \mathbf 0\le\mathbf w\le\mathbf 1}
//! \frac{\mathbf w^\top\hat\mu-r_f}{\sqrt{\mathbf w^\top\hat\Sigma\mathbf w}}
//! $$
//!
//! Sharpe-ratio maximizing allocation from daily closes: annualized moment
//! estimation, a projected-gradient tangency solver, random-portfolio
//! sampling and whole-currency cash allocation.

pub mod portfolio;
pub mod sources;
pub mod traits;

pub use portfolio::PortfolioEngine;
pub use portfolio::PortfolioEngineConfig;
pub use portfolio::PortfolioError;
pub use sources::CsvPriceSource;
pub use traits::PriceSourceExt;
