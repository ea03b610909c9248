//! # Portfolio Data
//!
//! $$
//! r_t=\frac{p_t-p_{t-1}}{p_{t-1}},\qquad
//! \hat\mu = P\,\bar r,\qquad \hat\Sigma = \frac{P}{T-1}\sum_t (r_t-\bar r)(r_t-\bar r)^\top
//! $$
//!
//! Price tables, simple-return matrices and annualized moment estimation.

use chrono::Days;
use chrono::NaiveDate;
use nalgebra::DMatrix;
use ndarray::s;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;
use tracing::debug;
use tracing::warn;

use super::error::PortfolioError;
use super::error::Result;

/// Relative tolerance for `Σ_ij == Σ_ji`.
const SYMMETRY_TOLERANCE: f64 = 1e-9;
/// Smallest eigenvalue allowed, relative to the spectral radius.
const PSD_TOLERANCE: f64 = 1e-10;

/// Daily closes indexed by ascending date (rows) and symbol (columns).
///
/// A missing close is stored as `NaN`; present closes are finite and positive.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceTable {
  dates: Vec<NaiveDate>,
  symbols: Vec<String>,
  prices: Array2<f64>,
}

impl PriceTable {
  pub fn new(dates: Vec<NaiveDate>, symbols: Vec<String>, prices: Array2<f64>) -> Result<Self> {
    if prices.nrows() != dates.len() {
      return Err(PortfolioError::invalid_table(format!(
        "{} price rows for {} dates",
        prices.nrows(),
        dates.len()
      )));
    }
    if prices.ncols() != symbols.len() {
      return Err(PortfolioError::invalid_table(format!(
        "{} price columns for {} symbols",
        prices.ncols(),
        symbols.len()
      )));
    }
    if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
      return Err(PortfolioError::invalid_table(format!(
        "dates must be strictly ascending ({} then {})",
        w[0], w[1]
      )));
    }
    for (j, symbol) in symbols.iter().enumerate() {
      if symbol.trim().is_empty() {
        return Err(PortfolioError::invalid_table(format!(
          "symbol in column {j} is empty"
        )));
      }
      if symbols[..j].contains(symbol) {
        return Err(PortfolioError::invalid_table(format!(
          "duplicate symbol {symbol}"
        )));
      }
    }
    if let Some(((i, j), p)) = prices
      .indexed_iter()
      .find(|(_, p)| !p.is_nan() && !(p.is_finite() && **p > 0.0))
    {
      return Err(PortfolioError::invalid_table(format!(
        "price {p} for {} on {} is not a positive number",
        symbols[j], dates[i]
      )));
    }

    Ok(Self {
      dates,
      symbols,
      prices,
    })
  }

  /// Build from per-symbol columns where `None` marks a missing close.
  pub fn from_columns(dates: Vec<NaiveDate>, columns: Vec<(String, Vec<Option<f64>>)>) -> Result<Self> {
    let n_rows = dates.len();
    let mut prices = Array2::from_elem((n_rows, columns.len()), f64::NAN);
    let mut symbols = Vec::with_capacity(columns.len());

    for (j, (symbol, closes)) in columns.into_iter().enumerate() {
      if closes.len() != n_rows {
        return Err(PortfolioError::invalid_table(format!(
          "{symbol} has {} closes for {n_rows} dates",
          closes.len()
        )));
      }
      for (i, close) in closes.into_iter().enumerate() {
        if let Some(p) = close {
          prices[[i, j]] = p;
        }
      }
      symbols.push(symbol);
    }

    Self::new(dates, symbols, prices)
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn symbols(&self) -> &[String] {
    &self.symbols
  }

  pub fn prices(&self) -> &Array2<f64> {
    &self.prices
  }

  /// Number of dates.
  pub fn len(&self) -> usize {
    self.dates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.dates.is_empty()
  }

  pub fn column(&self, symbol: &str) -> Option<ArrayView1<'_, f64>> {
    self
      .symbols
      .iter()
      .position(|s| s == symbol)
      .map(|j| self.prices.column(j))
  }

  /// Rows dated within `years * 365` calendar days of the last date.
  pub fn lookback(&self, years: u32) -> Self {
    let Some(&last) = self.dates.last() else {
      return self.clone();
    };

    let start = last
      .checked_sub_days(Days::new(365 * u64::from(years)))
      .unwrap_or(NaiveDate::MIN);
    let first = self.dates.partition_point(|d| *d < start);
    let rows: Vec<usize> = (first..self.dates.len()).collect();
    let cols: Vec<usize> = (0..self.symbols.len()).collect();

    self.select(&rows, &cols)
  }

  /// Each column divided by its first present close. Missing stays `NaN`.
  pub fn normalized(&self) -> Array2<f64> {
    let mut out = self.prices.clone();
    for mut col in out.columns_mut() {
      let base = col.iter().copied().find(|p| p.is_finite());
      if let Some(base) = base {
        col.mapv_inplace(|p| p / base);
      }
    }
    out
  }

  /// Columns for `symbols`, in the requested order.
  pub fn with_symbols(&self, symbols: &[String]) -> Result<Self> {
    let cols = symbols
      .iter()
      .map(|s| {
        self
          .symbols
          .iter()
          .position(|known| known == s)
          .ok_or_else(|| PortfolioError::invalid_table(format!("unknown symbol {s}")))
      })
      .collect::<Result<Vec<_>>>()?;

    Self::new(
      self.dates.clone(),
      symbols.to_vec(),
      self.prices.select(Axis(1), &cols),
    )
  }

  fn select(&self, rows: &[usize], cols: &[usize]) -> Self {
    Self {
      dates: rows.iter().map(|&i| self.dates[i]).collect(),
      symbols: cols.iter().map(|&j| self.symbols[j].clone()).collect(),
      prices: self.prices.select(Axis(0), rows).select(Axis(1), cols),
    }
  }
}

/// Annualized expected return per symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct MeanVector {
  symbols: Vec<String>,
  values: Array1<f64>,
}

impl MeanVector {
  pub fn new(symbols: Vec<String>, values: Array1<f64>) -> Result<Self> {
    if symbols.len() != values.len() {
      return Err(PortfolioError::DimensionMismatch {
        expected: symbols.len(),
        actual: values.len(),
      });
    }
    if values.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::invalid_table("mean returns must be finite"));
    }

    Ok(Self { symbols, values })
  }

  pub fn symbols(&self) -> &[String] {
    &self.symbols
  }

  pub fn values(&self) -> &Array1<f64> {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn get(&self, symbol: &str) -> Option<f64> {
    self
      .symbols
      .iter()
      .position(|s| s == symbol)
      .map(|i| self.values[i])
  }
}

/// Annualized symmetric positive semi-definite covariance over symbols.
#[derive(Clone, Debug, PartialEq)]
pub struct CovarianceMatrix {
  symbols: Vec<String>,
  values: Array2<f64>,
}

impl CovarianceMatrix {
  pub fn new(symbols: Vec<String>, values: Array2<f64>) -> Result<Self> {
    let n = symbols.len();
    if values.nrows() != n || values.ncols() != n {
      return Err(PortfolioError::DimensionMismatch {
        expected: n,
        actual: values.nrows().max(values.ncols()),
      });
    }
    if values.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::invalid_covariance("entries must be finite"));
    }

    for i in 0..n {
      for j in (i + 1)..n {
        let (a, b) = (values[[i, j]], values[[j, i]]);
        if (a - b).abs() > SYMMETRY_TOLERANCE * a.abs().max(b.abs()).max(1.0) {
          return Err(PortfolioError::invalid_covariance(format!(
            "entries ({i}, {j}) = {a} and ({j}, {i}) = {b} differ"
          )));
        }
      }
    }

    if n > 0 {
      let eigenvalues = DMatrix::from_fn(n, n, |i, j| values[[i, j]]).symmetric_eigenvalues();
      let min_eig = eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
      let radius = eigenvalues.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
      if min_eig < -PSD_TOLERANCE * radius.max(1.0) {
        return Err(PortfolioError::DegenerateVariance { variance: min_eig });
      }
    }

    Ok(Self { symbols, values })
  }

  pub fn symbols(&self) -> &[String] {
    &self.symbols
  }

  pub fn values(&self) -> &Array2<f64> {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.symbols.len()
  }

  pub fn is_empty(&self) -> bool {
    self.symbols.is_empty()
  }

  /// Diagonal entry for asset `i`.
  pub fn variance(&self, i: usize) -> f64 {
    self.values[[i, i]]
  }

  /// Correlation matrix implied by the covariance. Zero-variance assets get
  /// zero off-diagonal correlation.
  pub fn correlation(&self) -> Array2<f64> {
    let n = self.len();
    let sigmas: Vec<f64> = (0..n).map(|i| self.variance(i).max(0.0).sqrt()).collect();

    Array2::from_shape_fn((n, n), |(i, j)| {
      let denom = sigmas[i] * sigmas[j];
      if i == j {
        1.0
      } else if denom > 1e-15 {
        (self.values[[i, j]] / denom).clamp(-1.0, 1.0)
      } else {
        0.0
      }
    })
  }
}

/// Moments estimated from one price table.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnEstimate {
  pub mean: MeanVector,
  pub covariance: CovarianceMatrix,
  /// Symbols dropped for insufficient history, in table order.
  pub excluded: Vec<String>,
  /// Return periods behind the estimate.
  pub observations: usize,
}

impl ReturnEstimate {
  pub fn symbols(&self) -> &[String] {
    self.mean.symbols()
  }
}

pub(crate) fn check_aligned(mean: &MeanVector, covariance: &CovarianceMatrix) -> Result<()> {
  if mean.symbols() != covariance.symbols() {
    return Err(PortfolioError::SymbolMismatch {
      mean: mean.symbols().to_vec(),
      covariance: covariance.symbols().to_vec(),
    });
  }
  Ok(())
}

/// Period-over-period simple returns, one row fewer than `prices`.
pub fn returns_matrix(prices: &Array2<f64>) -> Array2<f64> {
  if prices.nrows() < 2 {
    return Array2::zeros((0, prices.ncols()));
  }

  let prev = prices.slice(s![..-1, ..]);
  let next = prices.slice(s![1.., ..]);
  (&next - &prev) / &prev
}

/// Sample covariance (`ddof = 1`) of the columns of `returns`.
fn sample_covariance(returns: &Array2<f64>, mean: &Array1<f64>) -> Array2<f64> {
  let centered = returns - mean;
  let cov = centered.t().dot(&centered) / (returns.nrows() - 1) as f64;
  (&cov + &cov.t()) * 0.5
}

/// Annualized mean vector and covariance matrix from daily closes.
///
/// Symbols with fewer than `min_observations + 1` closes are dropped, then
/// dates where any remaining symbol lacks a close are dropped.
pub fn estimate_returns(
  table: &PriceTable,
  periods_per_year: f64,
  min_observations: usize,
) -> Result<ReturnEstimate> {
  if !periods_per_year.is_finite() || periods_per_year <= 0.0 {
    return Err(PortfolioError::invalid_config(format!(
      "periods_per_year must be positive, got {periods_per_year}"
    )));
  }
  if min_observations < 2 {
    return Err(PortfolioError::invalid_config(format!(
      "min_observations must be at least 2, got {min_observations}"
    )));
  }

  let prices = table.prices();
  let mut kept = Vec::with_capacity(table.symbols().len());
  let mut excluded = Vec::new();

  for (j, symbol) in table.symbols().iter().enumerate() {
    let present = prices.column(j).iter().filter(|p| p.is_finite()).count();
    if present < min_observations + 1 {
      warn!(
        symbol = %symbol,
        present,
        required = min_observations + 1,
        "dropping symbol with insufficient price history"
      );
      excluded.push(symbol.clone());
    } else {
      kept.push(j);
    }
  }

  if kept.len() < 2 {
    return Err(PortfolioError::InsufficientData {
      remaining: kept.len(),
      required: 2,
      excluded,
    });
  }

  let rows: Vec<usize> = (0..table.len())
    .filter(|&i| kept.iter().all(|&j| prices[[i, j]].is_finite()))
    .collect();
  if rows.len() < table.len() {
    debug!(
      dropped = table.len() - rows.len(),
      "dropping dates with missing closes"
    );
  }

  let aligned = table.select(&rows, &kept);
  let returns = returns_matrix(aligned.prices());
  let observations = returns.nrows();

  if observations < min_observations {
    return Err(PortfolioError::InsufficientHistory {
      observations,
      required: min_observations,
    });
  }

  let period_mean = returns
    .mean_axis(Axis(0))
    .ok_or(PortfolioError::InsufficientHistory {
      observations,
      required: min_observations,
    })?;
  let covariance = sample_covariance(&returns, &period_mean) * periods_per_year;
  let mean = period_mean * periods_per_year;

  let symbols = aligned.symbols().to_vec();
  debug!(
    symbols = symbols.len(),
    observations, "estimated annualized return moments"
  );

  Ok(ReturnEstimate {
    mean: MeanVector::new(symbols.clone(), mean)?,
    covariance: CovarianceMatrix::new(symbols, covariance)?,
    excluded,
    observations,
  })
}
