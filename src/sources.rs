//! # Price Sources
//!
//! $$
//! \texttt{date},\ s_1,\dots,s_N\ \mapsto\ P\in(\mathbb R_{>0}\cup\{\text{NaN}\})^{T\times N}
//! $$
//!
//! Wide CSV files of daily closes: a `date` column in ISO format followed by
//! one column per symbol. An empty cell marks a missing close.

use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use chrono::NaiveDate;

use crate::portfolio::PriceTable;
use crate::traits::PriceSourceExt;

/// Closes read from a CSV file on disk.
#[derive(Clone, Debug)]
pub struct CsvPriceSource {
  path: PathBuf,
}

impl CsvPriceSource {
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Parse a wide price CSV. Rows may come in any date order.
  pub fn from_reader<R: Read>(reader: R) -> Result<PriceTable> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    if headers.len() < 2 {
      bail!("price csv needs a date column and at least one symbol column");
    }
    let symbols = headers[1..].to_vec();

    let mut rows: Vec<(NaiveDate, Vec<Option<f64>>)> = Vec::new();
    for (line, record) in reader.records().enumerate() {
      let record = record?;
      let raw_date = record.get(0).unwrap_or_default().trim();
      let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d")
        .with_context(|| format!("row {}: bad date {raw_date:?}", line + 1))?;

      let closes = record
        .iter()
        .skip(1)
        .map(|cell| {
          let cell = cell.trim();
          if cell.is_empty() {
            Ok(None)
          } else {
            cell
              .parse::<f64>()
              .map(Some)
              .with_context(|| format!("row {}: bad price {cell:?}", line + 1))
          }
        })
        .collect::<Result<Vec<_>>>()?;
      if closes.len() != symbols.len() {
        bail!(
          "row {}: expected {} prices, found {}",
          line + 1,
          symbols.len(),
          closes.len()
        );
      }
      rows.push((date, closes));
    }
    rows.sort_by_key(|(date, _)| *date);

    let dates = rows.iter().map(|(date, _)| *date).collect();
    let columns = symbols
      .into_iter()
      .enumerate()
      .map(|(j, symbol)| (symbol, rows.iter().map(|(_, closes)| closes[j]).collect()))
      .collect();

    Ok(PriceTable::from_columns(dates, columns)?)
  }
}

impl PriceSourceExt for CsvPriceSource {
  fn load(&self) -> Result<PriceTable> {
    let file = std::fs::File::open(&self.path)
      .with_context(|| format!("opening {}", self.path.display()))?;
    Self::from_reader(file).with_context(|| format!("reading {}", self.path.display()))
  }
}
