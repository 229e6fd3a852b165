// ********* Input data structures ***********

use std::error::Error;
use std::fmt::Display;

use chrono::NaiveDate;

/// The columns that every poll table must provide.
///
/// The names follow the header of the published poll files. Other columns
/// may be present and are ignored.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "candidato",
    "intencao_voto_pct",
    "desvio_padrao_pct",
    "instituto",
    "data",
    "amostra",
];

/// One poll, as published by one institute for one candidate.
#[derive(PartialEq, Debug, Clone)]
pub struct PollRecord {
    pub candidate: String,
    /// Voting intention, in percent (expected between 0 and 100).
    pub intention_pct: f64,
    /// The standard deviation reported by the institute, in percent.
    pub reported_sigma_pct: f64,
    pub institute: String,
    pub date: NaiveDate,
    pub sample_size: u64,
}

/// Options that control the aggregation.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct AggregationOptions {
    /// If true, the polls flagged as outliers are removed before computing
    /// the aggregate. They are reported in both cases.
    pub remove_outliers: bool,
    /// A poll is an outlier when its z-score is strictly above this value.
    pub z_threshold: f64,
}

impl AggregationOptions {
    pub const DEFAULT_OPTIONS: AggregationOptions = AggregationOptions {
        remove_outliers: false,
        z_threshold: 2.0,
    };
}

impl Default for AggregationOptions {
    fn default() -> Self {
        AggregationOptions::DEFAULT_OPTIONS
    }
}

// ******** Output data structures *********

/// The aggregated estimate for one candidate.
#[derive(PartialEq, Debug, Clone)]
pub struct CandidateAggregate {
    pub candidate: String,
    /// Recency-weighted mean of the voting intentions.
    pub intention_pct: f64,
    /// Quadrature sum of the mean reported deviation and of the deviation
    /// between institutes.
    pub sigma_pct: f64,
    pub num_polls: usize,
    pub total_sample: u64,
    /// The most recent date across the whole input (not only this candidate).
    pub reference_date: NaiveDate,
}

/// A poll that deviates too much from the weighted mean of its candidate.
#[derive(PartialEq, Debug, Clone)]
pub struct OutlierRecord {
    pub poll: PollRecord,
    pub z_score: f64,
    /// The weighted mean of the candidate when the poll was flagged.
    pub weighted_mean_pct: f64,
    /// The deviation between institutes when the poll was flagged.
    pub between_sigma_pct: f64,
}

#[derive(PartialEq, Debug, Clone)]
pub struct AggregationResult {
    /// Sorted by candidate name.
    pub aggregates: Vec<CandidateAggregate>,
    /// Grouped by candidate, in the order of detection.
    pub outliers: Vec<OutlierRecord>,
    /// None only when the input is empty.
    pub reference_date: Option<NaiveDate>,
}

/// Errors that stop the aggregation. No partial result is returned.
#[derive(PartialEq, Debug, Clone)]
pub enum AggregationError {
    /// Some required columns are missing. The names are sorted.
    Schema { missing: Vec<String> },
    /// A value could not be parsed. The line number counts the header as line 1.
    Parse {
        column: String,
        value: String,
        line: usize,
    },
    RowTooShort { line: usize },
    InvalidThreshold(f64),
    /// All the polls of a candidate are too old to carry any weight.
    ZeroWeight { candidate: String },
}

impl Error for AggregationError {}

impl Display for AggregationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationError::Schema { missing } => {
                write!(f, "Missing columns in the poll table: {:?}", missing)
            }
            AggregationError::Parse {
                column,
                value,
                line,
            } => write!(
                f,
                "Could not parse value {:?} of column {} (line {})",
                value, column, line
            ),
            AggregationError::RowTooShort { line } => {
                write!(f, "Line {} has fewer fields than the header", line)
            }
            AggregationError::InvalidThreshold(z) => {
                write!(f, "The z-score threshold must be a positive number, got {}", z)
            }
            AggregationError::ZeroWeight { candidate } => write!(
                f,
                "The polls of {} are too old compared to the most recent poll: their weights sum to zero",
                candidate
            ),
        }
    }
}
