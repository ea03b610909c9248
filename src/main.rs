use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use mpt_rs::portfolio::allocation_totals;
use mpt_rs::portfolio::Allocation;
use mpt_rs::portfolio::OptimizationRun;
use mpt_rs::portfolio::PriceTable;
use mpt_rs::portfolio::WeightBounds;
use mpt_rs::CsvPriceSource;
use mpt_rs::PortfolioEngine;
use mpt_rs::PortfolioEngineConfig;
use mpt_rs::PriceSourceExt;
use prettytable::row;
use prettytable::Cell;
use prettytable::Row;
use prettytable::Table;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Positions below this weight are left out of the allocation table.
const DISPLAY_THRESHOLD: f64 = 0.001;

#[derive(Parser)]
#[command(name = "mpt-rs")]
#[command(about = "Sharpe-maximizing portfolio allocation from daily closes")]
struct Cli {
  /// CSV with a `date` column followed by one close column per symbol
  prices: PathBuf,

  /// Cash to invest, in whole currency units
  cash: u64,

  /// Restrict to these symbols (comma separated)
  #[arg(long, value_delimiter = ',')]
  symbols: Vec<String>,

  /// Annual risk-free rate
  #[arg(long, default_value_t = 0.0)]
  risk_free: f64,

  /// Trailing window in years
  #[arg(long, default_value_t = 2)]
  lookback_years: u32,

  /// Use the whole file instead of a trailing window
  #[arg(long)]
  full_history: bool,

  /// Cap on every position
  #[arg(long)]
  max_weight: Option<f64>,

  /// Number of random portfolios to sample
  #[arg(long, default_value_t = 10_000)]
  samples: usize,

  /// Seed for the random portfolios
  #[arg(long, default_value_t = 42)]
  seed: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer())
    .with(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let cli = Cli::parse();

  let mut config = PortfolioEngineConfig {
    risk_free: cli.risk_free,
    lookback_years: (!cli.full_history).then_some(cli.lookback_years),
    ..PortfolioEngineConfig::default()
  };
  if let Some(cap) = cli.max_weight {
    config.bounds = WeightBounds::capped(cap);
  }
  config.monte_carlo.count = cli.samples;
  config.monte_carlo.seed = cli.seed;

  let engine = PortfolioEngine::new(config)?;
  let table = CsvPriceSource::new(&cli.prices).load_symbols(&cli.symbols)?;
  let run = engine.run(&table)?;
  let allocations = engine.allocate(&run.estimate, &run.optimal, cli.cash)?;

  print_performance(&run);
  print_assets(&table, &run);
  print_allocations(&allocations);
  print_correlation(&run);
  print_simulation(&run);

  Ok(())
}

fn print_performance(run: &OptimizationRun) {
  let mut table = Table::new();
  table.set_titles(row!["Metric", "Value"]);
  table.add_row(row![
    "Expected annual return",
    format!("{:.2}%", run.optimal.expected_return * 100.0)
  ]);
  table.add_row(row![
    "Annual volatility",
    format!("{:.2}%", run.optimal.volatility * 100.0)
  ]);
  table.add_row(row!["Sharpe ratio", format!("{:.4}", run.optimal.sharpe)]);
  table.add_row(row!["Return periods", run.estimate.observations]);
  if !run.estimate.excluded.is_empty() {
    table.add_row(row!["Excluded", run.estimate.excluded.join(", ")]);
  }
  table.printstd();
}

/// Per-symbol growth over the loaded file next to its estimated return.
fn print_assets(prices: &PriceTable, run: &OptimizationRun) {
  let normalized = prices.normalized();

  let mut table = Table::new();
  table.set_titles(row!["Symbol", "Last close", "Growth", "Expected annual return"]);
  for (j, symbol) in prices.symbols().iter().enumerate() {
    let last_close = prices
      .column(symbol)
      .and_then(|col| col.iter().rev().copied().find(|p| p.is_finite()));
    let growth = normalized.column(j).iter().rev().copied().find(|g| g.is_finite());

    table.add_row(row![
      symbol,
      last_close.map_or("-".to_string(), |p| format!("{p:.2}")),
      growth.map_or("-".to_string(), |g| format!("{:.2}%", (g - 1.0) * 100.0)),
      run
        .estimate
        .mean
        .get(symbol)
        .map_or("excluded".to_string(), |m| format!("{:.2}%", m * 100.0))
    ]);
  }
  table.printstd();
}

fn print_allocations(allocations: &[Allocation]) {
  let mut table = Table::new();
  table.set_titles(row!["Symbol", "Weight", "Amount"]);
  for a in allocations.iter().filter(|a| a.weight > DISPLAY_THRESHOLD) {
    table.add_row(row![a.symbol, format!("{:.2}%", a.percentage), a.amount]);
  }
  let (percentage, amount) = allocation_totals(allocations);
  table.add_row(row!["Total", format!("{percentage:.2}%"), amount]);
  table.printstd();
}

fn print_correlation(run: &OptimizationRun) {
  let symbols = run.symbols();
  let corr = run.estimate.covariance.correlation();

  let mut table = Table::new();
  let mut titles = vec![Cell::new("")];
  titles.extend(symbols.iter().map(|s| Cell::new(s)));
  table.set_titles(Row::new(titles));

  for (i, symbol) in symbols.iter().enumerate() {
    let mut cells = vec![Cell::new(symbol)];
    cells.extend(corr.row(i).iter().map(|c| Cell::new(&format!("{c:.2}"))));
    table.add_row(Row::new(cells));
  }
  table.printstd();
}

fn print_simulation(run: &OptimizationRun) {
  let mut table = Table::new();
  table.set_titles(row!["Monte Carlo", "Sharpe", "Volatility"]);
  if let Some(best) = run.population.max_sharpe() {
    table.add_row(row![
      "Best sampled Sharpe",
      format!("{:.4}", best.sharpe),
      format!("{:.2}%", best.volatility * 100.0)
    ]);
  }
  if let Some(calm) = run.population.min_volatility() {
    table.add_row(row![
      "Lowest sampled volatility",
      format!("{:.4}", calm.sharpe),
      format!("{:.2}%", calm.volatility * 100.0)
    ]);
  }
  table.add_row(row![
    "Optimized",
    format!("{:.4}", run.optimal.sharpe),
    format!("{:.2}%", run.optimal.volatility * 100.0)
  ]);
  table.add_row(row![
    "Samples",
    run.population.len(),
    if run.optimum_dominates() { "optimum dominates" } else { "optimum beaten" }
  ]);
  table.printstd();
}
