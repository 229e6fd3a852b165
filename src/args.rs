use clap::{Parser, Subcommand};

/// This program aggregates election polls and simulates the outcome of a two-round election.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) A configuration file in JSON format. The options given on the
    /// command line take precedence over the ones in the file.
    #[clap(short, long, value_parser, global = true)]
    pub config: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Aggregates the polls of each candidate into a single estimate.
    Aggregate(AggregateArgs),
    /// Runs a Monte Carlo simulation of both rounds from aggregated polls.
    Simulate(SimulateArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct AggregateArgs {
    /// (file path, default data/pesquisas.csv) The file containing the polls.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (default csv) The type of the input: csv or xlsx.
    #[clap(long, value_parser)]
    pub input_type: Option<String>,

    /// (default: first worksheet) When using an Excel file, indicates the name of the worksheet to use.
    #[clap(long, value_parser)]
    pub excel_worksheet_name: Option<String>,

    /// (file path, default data/pesquisas_agregadas.csv) Where the aggregate is written, in CSV format.
    #[clap(short, long, value_parser)]
    pub output: Option<String>,

    /// (file path, optional) If specified, the detected outliers are also written to this file in CSV format.
    #[clap(long, value_parser)]
    pub outliers: Option<String>,

    /// If passed as an argument, the outliers are removed before computing the aggregate.
    #[clap(long, takes_value = false)]
    pub remove_outliers: bool,

    /// (default 2.0) The z-score above which a poll is an outlier.
    #[clap(long, value_parser)]
    pub z_threshold: Option<f64>,

    /// (file path) A reference file containing the expected summary in JSON format. If provided,
    /// pollmc will check that the computed summary matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SimulateArgs {
    /// (file path, default data/pesquisas_agregadas.csv) The aggregated polls. The order of the
    /// rows defines the finalists of the second round.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (default 40000) The number of simulated elections.
    #[clap(long, value_parser)]
    pub n_sim: Option<usize>,

    /// (default 42) The seed of the random generator.
    #[clap(long, value_parser)]
    pub seed: Option<u64>,

    /// (default dirichlet) How the first-round shares are drawn: dirichlet or normal.
    #[clap(long, value_parser)]
    pub model: Option<String>,

    /// (YYYY-MM-DD, default 2026-10-04) The day of the first round.
    #[clap(long, value_parser)]
    pub election_date: Option<String>,

    /// (YYYY-MM-DD, default today) The day the simulation is run.
    #[clap(long, value_parser)]
    pub as_of: Option<String>,

    /// (file path, 'stdout' or empty) If specified, the summary of the simulation will be written
    /// in JSON format to the given location.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (directory, optional) If specified, every draw of both rounds is written in CSV format
    /// to this directory.
    #[clap(long, value_parser)]
    pub draws_dir: Option<String>,

    /// (file path) A reference file containing the expected summary in JSON format. If provided,
    /// pollmc will check that the computed summary matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,
}
