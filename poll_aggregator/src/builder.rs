pub use crate::config::*;

use chrono::{NaiveDate, NaiveDateTime};
use log::debug;

/// A builder for assembling polls out of a table of strings.
///
/// The header is checked when the builder is created, and every row is
/// parsed when it is added. Readers of the different file formats only need
/// to produce strings.
///
/// ```
/// use poll_aggregator::builder::Builder;
/// use poll_aggregator::{AggregationError, AggregationOptions};
///
/// let header: Vec<String> = [
///     "candidato",
///     "intencao_voto_pct",
///     "desvio_padrao_pct",
///     "instituto",
///     "data",
///     "amostra",
/// ]
/// .iter()
/// .map(|s| s.to_string())
/// .collect();
/// let mut builder = Builder::from_header(&header)?;
///
/// let row: Vec<String> = ["Lula", "37.0", "2.0", "Quaest", "2026-02-19", "2500"]
///     .iter()
///     .map(|s| s.to_string())
///     .collect();
/// builder.add_row(&row)?;
///
/// let res = builder.aggregate(&AggregationOptions::DEFAULT_OPTIONS)?;
/// assert_eq!(res.aggregates[0].num_polls, 1);
///
/// # Ok::<(), AggregationError>(())
/// ```
#[derive(Debug)]
pub struct Builder {
    pub(crate) _columns: ColumnPositions,
    pub(crate) _polls: Vec<PollRecord>,
    // The line of the next row. The header is line 1.
    pub(crate) _line: usize,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub(crate) struct ColumnPositions {
    candidate: usize,
    intention: usize,
    sigma: usize,
    institute: usize,
    date: usize,
    sample: usize,
}

impl Builder {
    /// Checks that all the required columns are present.
    ///
    /// The error lists all the missing columns, sorted by name.
    pub fn from_header(header: &[String]) -> Result<Builder, AggregationError> {
        let columns = column_positions(header)?;
        debug!("Builder::from_header: columns: {:?}", columns);
        Ok(Builder {
            _columns: columns,
            _polls: Vec::new(),
            _line: 2,
        })
    }

    /// Parses a row of the table and adds the corresponding poll.
    ///
    /// Extra fields are ignored.
    pub fn add_row(&mut self, row: &[String]) -> Result<(), AggregationError> {
        let line = self._line;
        self.add_row_at(row, line)
    }

    /// Same as [`Builder::add_row`], for readers that know the line of the row
    /// in the file (when blank lines are skipped).
    pub fn add_row_at(&mut self, row: &[String], line: usize) -> Result<(), AggregationError> {
        self._line = line + 1;
        let c = self._columns;
        let field = |idx: usize| row_field(row, idx, line);
        let parse_error = |column: &str, value: &str| AggregationError::Parse {
            column: column.to_string(),
            value: value.to_string(),
            line,
        };

        let intention_s = field(c.intention)?;
        let intention_pct =
            parse_finite(intention_s).ok_or_else(|| parse_error("intencao_voto_pct", intention_s))?;

        let sigma_s = field(c.sigma)?;
        let reported_sigma_pct =
            parse_finite(sigma_s).ok_or_else(|| parse_error("desvio_padrao_pct", sigma_s))?;

        let date_s = field(c.date)?;
        let date = parse_date(date_s).ok_or_else(|| parse_error("data", date_s))?;

        let sample_s = field(c.sample)?;
        let sample_size = parse_count(sample_s).ok_or_else(|| parse_error("amostra", sample_s))?;

        self.add_poll(PollRecord {
            candidate: field(c.candidate)?.to_string(),
            intention_pct,
            reported_sigma_pct,
            institute: field(c.institute)?.to_string(),
            date,
            sample_size,
        });
        Ok(())
    }

    /// Moves to the next line without adding a poll, for blank lines.
    pub fn skip_row(&mut self) {
        self._line += 1;
    }

    pub fn add_poll(&mut self, poll: PollRecord) {
        self._polls.push(poll);
    }

    pub fn polls(&self) -> &[PollRecord] {
        &self._polls
    }

    pub fn aggregate(
        &self,
        options: &AggregationOptions,
    ) -> Result<AggregationResult, AggregationError> {
        crate::aggregate_polls(&self._polls, options)
    }
}

// One lookup for all the columns: either every position, or the sorted missing names.
fn column_positions(header: &[String]) -> Result<ColumnPositions, AggregationError> {
    let position = |name: &str| header.iter().position(|h| h.trim() == name);
    match REQUIRED_COLUMNS.map(position) {
        [Some(candidate), Some(intention), Some(sigma), Some(institute), Some(date), Some(sample)] => {
            Ok(ColumnPositions {
                candidate,
                intention,
                sigma,
                institute,
                date,
                sample,
            })
        }
        found => {
            let mut missing: Vec<String> = REQUIRED_COLUMNS
                .iter()
                .zip(found.iter())
                .filter(|(_, pos)| pos.is_none())
                .map(|(c, _)| c.to_string())
                .collect();
            missing.sort();
            Err(AggregationError::Schema { missing })
        }
    }
}

fn row_field(row: &[String], idx: usize, line: usize) -> Result<&str, AggregationError> {
    row.get(idx)
        .map(|s| s.trim())
        .ok_or(AggregationError::RowTooShort { line })
}

/// Parses a calendar date.
///
/// Accepts `YYYY-MM-DD` and `YYYY/MM/DD`, optionally followed by a time of the
/// day (which is dropped).
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    None
}

// `f64::from_str` accepts "NaN" and "inf", which would poison the weighted statistics.
fn parse_finite(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|x| x.is_finite())
}

// Sample sizes are sometimes exported as floats (2000.0).
fn parse_count(s: &str) -> Option<u64> {
    if let Ok(x) = s.parse::<u64>() {
        return Some(x);
    }
    match s.parse::<f64>() {
        Ok(x) if x >= 0.0 && x.fract() == 0.0 && x.is_finite() => Some(x as u64),
        _ => None,
    }
}
