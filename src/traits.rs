//! # Traits
//!
//! $$
//! \mathcal S:\ \text{source}\to(\text{dates}\times\text{symbols}\to\mathbb R_{>0}\cup\{\varnothing\})
//! $$
//!
use anyhow::Result;

use crate::portfolio::PriceTable;

/// Anything that can hand over a table of daily closes.
pub trait PriceSourceExt {
  fn load(&self) -> Result<PriceTable>;

  /// Closes for `symbols` only, in that order. An empty slice keeps all.
  fn load_symbols(&self, symbols: &[String]) -> Result<PriceTable> {
    let table = self.load()?;
    if symbols.is_empty() {
      return Ok(table);
    }
    Ok(table.with_symbols(symbols)?)
  }

  /// Closes within the trailing `years * 365` days.
  fn load_trailing(&self, years: u32) -> Result<PriceTable> {
    Ok(self.load()?.lookback(years))
  }
}
