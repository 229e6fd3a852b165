use log::{debug, info, warn};

use poll_aggregator::builder::{parse_date, Builder};
use poll_aggregator::simulation::*;
use poll_aggregator::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::{AggregateArgs, SimulateArgs};
use crate::pollmc::config_reader::*;

pub mod config_reader;
mod io_common;
mod io_csv;
mod io_excel;
mod report;

pub const DEFAULT_POLLS_PATH: &str = "data/pesquisas.csv";
pub const DEFAULT_AGGREGATE_PATH: &str = "data/pesquisas_agregadas.csv";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PollError {
    #[snafu(display("Error opening file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("The workbook {path} has no worksheet {sheet}"))]
    EmptyExcel { path: String, sheet: String },
    #[snafu(display("Line {lineno}: could not understand cell {content}"))]
    ExcelWrongCellType { lineno: usize, content: String },
    #[snafu(display("Error opening file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error reading a line of {path}"))]
    CsvLineParse { source: csv::Error, path: String },
    #[snafu(display("Error writing {path}"))]
    CsvWrite { source: csv::Error, path: String },
    #[snafu(display("Error writing {path}"))]
    Writing {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Invalid polls: {source}"))]
    Aggregation { source: AggregationError },
    #[snafu(display("Simulation failed: {source}"))]
    Simulation { source: SimulationError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type PollResult<T> = Result<T, PollError>;

/// Reads the configuration file if one is provided.
pub fn read_config(path: &Option<String>) -> PollResult<PollmcConfig> {
    match path {
        Some(p) => read_config_file(p),
        None => Ok(PollmcConfig::default()),
    }
}

// ******** Aggregation *********

/// The aggregation options, after merging the command line and the configuration file.
#[derive(PartialEq, Debug, Clone)]
struct AggregationRun {
    input: String,
    input_type: String,
    excel_worksheet_name: Option<String>,
    output: String,
    outliers_output: Option<String>,
    options: AggregationOptions,
    reference: Option<String>,
}

fn resolve_aggregation(args: &AggregateArgs, config: &PollmcConfig) -> AggregationRun {
    let c = config.aggregation.clone().unwrap_or_default();
    let input = args
        .input
        .clone()
        .or(c.input)
        .unwrap_or_else(|| DEFAULT_POLLS_PATH.to_string());
    let input_type = args
        .input_type
        .clone()
        .or(c.input_type)
        .unwrap_or_else(|| default_input_type(&input));
    AggregationRun {
        input,
        input_type,
        excel_worksheet_name: args.excel_worksheet_name.clone().or(c.excel_worksheet_name),
        output: args
            .output
            .clone()
            .or(c.output)
            .unwrap_or_else(|| DEFAULT_AGGREGATE_PATH.to_string()),
        outliers_output: args.outliers.clone().or(c.outliers_output),
        options: AggregationOptions {
            remove_outliers: args.remove_outliers || c.remove_outliers.unwrap_or(false),
            z_threshold: args
                .z_threshold
                .or(c.z_threshold)
                .unwrap_or(AggregationOptions::DEFAULT_OPTIONS.z_threshold),
        },
        reference: args.reference.clone(),
    }
}

fn default_input_type(path: &str) -> String {
    if path.to_lowercase().ends_with(".xlsx") {
        "xlsx".to_string()
    } else {
        "csv".to_string()
    }
}

fn read_polls(run: &AggregationRun) -> PollResult<Builder> {
    info!(
        "Attempting to read polls file {:?} ({})",
        run.input, run.input_type
    );
    match run.input_type.as_str() {
        "csv" => io_csv::read_csv_polls(&run.input),
        "xlsx" | "excel" => io_excel::read_excel_polls(&run.input, &run.excel_worksheet_name),
        x => whatever!("Input type not implemented {:?}", x),
    }
}

fn build_aggregation_js(result: &AggregationResult, options: &AggregationOptions) -> JSValue {
    let candidates: Vec<JSValue> = result
        .aggregates
        .iter()
        .map(|a| {
            json!({
                "candidate": a.candidate,
                "intentionPct": a.intention_pct,
                "sigmaPct": a.sigma_pct,
                "numPolls": a.num_polls,
                "totalSample": a.total_sample,
            })
        })
        .collect();
    let outliers: Vec<JSValue> = result
        .outliers
        .iter()
        .map(|o| {
            json!({
                "candidate": o.poll.candidate,
                "institute": o.poll.institute,
                "date": o.poll.date.to_string(),
                "intentionPct": o.poll.intention_pct,
                "zScore": o.z_score,
                "weightedMeanPct": o.weighted_mean_pct,
                "betweenSigmaPct": o.between_sigma_pct,
            })
        })
        .collect();
    round_floats(json!({
        "config": {
            "removeOutliers": options.remove_outliers,
            "zThreshold": options.z_threshold,
        },
        "referenceDate": result.reference_date.map(|d| d.to_string()),
        "candidates": candidates,
        "outliers": outliers,
    }))
}

pub fn run_aggregation(args: &AggregateArgs, config: &PollmcConfig) -> PollResult<()> {
    let run = resolve_aggregation(args, config);
    info!("aggregation: {:?}", run);

    let builder = read_polls(&run)?;
    debug!("run_aggregation: read {} polls", builder.polls().len());
    let result = builder.aggregate(&run.options).context(AggregationSnafu {})?;

    io_csv::write_aggregates(&run.output, &result.aggregates)?;
    if let Some(p) = &run.outliers_output {
        io_csv::write_outliers(p, &result.outliers)?;
    }

    println!(
        "Aggregation done: {} candidates processed",
        result.aggregates.len()
    );
    println!("Output file: {}", run.output);
    if result.outliers.is_empty() {
        println!("No outlier detected");
    } else {
        for o in result.outliers.iter() {
            println!("{}", report::outlier_alert(o));
        }
    }

    if let Some(reference_p) = &run.reference {
        check_reference(&build_aggregation_js(&result, &run.options), reference_p)?;
    }
    Ok(())
}

// ******** Simulation *********

#[derive(PartialEq, Debug, Clone)]
struct SimulationRun {
    input: String,
    settings: SimulationSettings,
    out: Option<String>,
    draws_dir: Option<String>,
    reference: Option<String>,
}

fn read_date(s: &str, what: &str) -> PollResult<NaiveDate> {
    match parse_date(s) {
        Some(d) => Ok(d),
        None => whatever!("Cannot understand the {} {:?}: expected YYYY-MM-DD", what, s),
    }
}

fn resolve_simulation(
    args: &SimulateArgs,
    config: &PollmcConfig,
    today: NaiveDate,
) -> PollResult<SimulationRun> {
    let c = config.simulation.clone().unwrap_or_default();
    let as_of = match args.as_of.clone().or(c.as_of) {
        Some(s) => read_date(&s, "date of the simulation")?,
        None => today,
    };
    let mut settings = SimulationSettings::new(as_of);
    if let Some(s) = args.election_date.clone().or(c.election_date) {
        settings.election_date = read_date(&s, "election date")?;
    }
    if let Some(n) = args.n_sim.or(c.num_simulations) {
        settings.num_simulations = n;
    }
    if let Some(seed) = args.seed.or(c.seed) {
        settings.seed = seed;
    }
    settings.model = match args.model.clone().or(c.model).as_deref() {
        None | Some("dirichlet") => VoteShareModel::Dirichlet,
        Some("normal") => VoteShareModel::Normal,
        Some(x) => whatever!("Cannot use model {:?}: expected dirichlet or normal", x),
    };
    if let Some(labels) = c.invalid_labels {
        settings.invalid_labels = labels;
    }
    if let Some(t) = c.transfer_concentration {
        settings.transfer_concentration = t;
    }
    if let Some(m) = c.close_race_margin_pct {
        settings.close_race_margin_pct = m;
    }
    Ok(SimulationRun {
        input: args
            .input
            .clone()
            .or(c.input)
            .unwrap_or_else(|| DEFAULT_AGGREGATE_PATH.to_string()),
        settings,
        out: args.out.clone().or(c.out),
        draws_dir: args.draws_dir.clone().or(c.draws_directory),
        reference: args.reference.clone(),
    })
}

fn build_simulation_js(
    summary: &SimulationSummary,
    settings: &SimulationSettings,
    sigma: f64,
    base_sigma: f64,
) -> JSValue {
    let first_round: Vec<JSValue> = summary
        .first_round
        .iter()
        .map(|c| {
            json!({
                "candidate": c.name,
                "meanPct": c.mean_pct,
                "p5Pct": c.low_pct,
                "p95Pct": c.high_pct,
            })
        })
        .collect();
    let wins: Vec<JSValue> = summary
        .first_round_wins
        .iter()
        .map(|(name, p)| json!({"candidate": name, "probabilityPct": p}))
        .collect();
    let second_round: JSValue = match &summary.second_round {
        Some(s) => {
            let finalists: Vec<JSValue> = s
                .finalists
                .iter()
                .map(|f| {
                    json!({
                        "candidate": f.name,
                        "meanPct": f.mean_pct,
                        "stdPct": f.std_pct,
                        "winProbabilityPct": f.win_probability_pct,
                    })
                })
                .collect();
            json!({
                "finalists": finalists,
                "closeRaceProbabilityPct": s.close_race_probability_pct,
            })
        }
        None => JSValue::Null,
    };
    round_floats(json!({
        "config": {
            "numSimulations": summary.num_simulations,
            "seed": settings.seed,
            "model": format!("{:?}", settings.model).to_lowercase(),
            "electionDate": settings.election_date.to_string(),
            "asOf": settings.as_of.to_string(),
            "sigmaPct": sigma,
            "baseSigmaPct": base_sigma,
        },
        "firstRound": {
            "candidates": first_round,
            "winProbabilities": wins,
            "runoffProbabilityPct": summary.runoff_probability_pct,
            "leader": {
                "candidate": summary.leader.0,
                "winProbabilityPct": summary.leader.1,
            },
        },
        "secondRound": second_round,
    }))
}

pub fn run_simulation(args: &SimulateArgs, config: &PollmcConfig) -> PollResult<()> {
    let today = chrono::Local::now().date_naive();
    let run = resolve_simulation(args, config, today)?;
    info!("simulation: {:?}", run);

    let estimates = io_csv::read_estimates(&run.input)?;
    let mut simulator = Simulator::new(&estimates, &run.settings).context(SimulationSnafu {})?;
    let first = simulator
        .simulate_first_round()
        .context(SimulationSnafu {})?;
    let second = simulator
        .simulate_second_round()
        .context(SimulationSnafu {})?;
    let summary = summarize(
        &first,
        second.as_ref(),
        run.settings.close_race_margin_pct,
    );

    println!(
        "{}",
        report::simulation_report(
            &summary,
            run.settings.days_to_election(),
            simulator.sigma(),
            simulator.base_sigma(),
            run.settings.close_race_margin_pct,
        )
    );

    if let Some(dir) = &run.draws_dir {
        let p: PathBuf = [dir.as_str(), "resultados_1turno.csv"].iter().collect();
        io_csv::write_first_round_draws(&p.display().to_string(), &first)?;
        if let Some(s) = &second {
            let p: PathBuf = [dir.as_str(), "resultados_2turno.csv"].iter().collect();
            io_csv::write_second_round_draws(&p.display().to_string(), s)?;
        }
    }

    let result_js = build_simulation_js(
        &summary,
        &run.settings,
        simulator.sigma(),
        simulator.base_sigma(),
    );
    let pretty_js = serde_json::to_string_pretty(&result_js).context(ParsingJsonSnafu {})?;
    match run.out.as_deref() {
        None | Some("") => {}
        Some("stdout") => println!("{}", pretty_js),
        Some(path) => {
            io_common::create_parent_dir(path)?;
            fs::write(path, &pretty_js).context(WritingSnafu { path })?;
            info!("Summary written to {:?}", path);
        }
    }

    if let Some(reference_p) = &run.reference {
        check_reference(&result_js, reference_p)?;
    }
    Ok(())
}

// ******** Reference comparison *********

// The summaries keep 4 decimals, so that they are read back exactly from a reference file.
fn round_floats(js: JSValue) -> JSValue {
    match js {
        JSValue::Number(n) if n.is_f64() => match n.as_f64() {
            Some(x) => json!((x * 10_000.0).round() / 10_000.0),
            None => JSValue::Number(n),
        },
        JSValue::Array(xs) => JSValue::Array(xs.into_iter().map(round_floats).collect()),
        JSValue::Object(m) => {
            JSValue::Object(m.into_iter().map(|(k, v)| (k, round_floats(v))).collect())
        }
        x => x,
    }
}

fn check_reference(computed: &JSValue, reference_path: &str) -> PollResult<()> {
    let summary_ref = read_summary(reference_path)?;
    debug!("summary: {:?}", summary_ref);
    let pretty_js_stats = serde_json::to_string_pretty(computed).context(ParsingJsonSnafu {})?;
    let pretty_js_summary_ref =
        serde_json::to_string_pretty(&summary_ref).context(ParsingJsonSnafu {})?;
    if pretty_js_summary_ref != pretty_js_stats {
        warn!("Found differences with the reference string");
        print_diff(
            pretty_js_summary_ref.as_str(),
            pretty_js_stats.as_ref(),
            "\n",
        );
        whatever!("Difference detected between calculated summary and reference summary")
    }
    info!("The summary matches the reference {:?}", reference_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    const POLLS: &str = "candidato,intencao_voto_pct,desvio_padrao_pct,instituto,data,amostra
Candidato X,31.0,2.0,I1,2026-02-18,2000
Candidato X,32.0,2.0,I2,2026-02-19,2000
Candidato X,45.0,2.0,I3,2026-02-20,2000
Lula,36.0,2.0,Quaest,2026-02-19,2500
Lula,37.0,2.0,PoderData,2026-02-20,2200
";

    fn aggregate_args(input: &str, output: &str) -> AggregateArgs {
        AggregateArgs {
            input: Some(input.to_string()),
            input_type: None,
            excel_worksheet_name: None,
            output: Some(output.to_string()),
            outliers: None,
            remove_outliers: true,
            z_threshold: Some(1.2),
            reference: None,
        }
    }

    fn simulate_args(input: &str) -> SimulateArgs {
        SimulateArgs {
            input: Some(input.to_string()),
            n_sim: Some(500),
            seed: Some(7),
            model: None,
            election_date: Some("2026-10-04".to_string()),
            as_of: Some("2026-10-04".to_string()),
            out: None,
            draws_dir: None,
            reference: None,
        }
    }

    #[test]
    fn command_line_overrides_config() {
        let config: PollmcConfig = serde_json::from_str(
            r#"{"aggregation": {"input": "a.csv", "output": "b.csv", "zThreshold": 3.0, "removeOutliers": true}}"#,
        )
        .unwrap();
        let mut args = aggregate_args("polls.xlsx", "out.csv");
        args.remove_outliers = false;
        args.z_threshold = None;
        let run = resolve_aggregation(&args, &config);
        assert_eq!(run.input, "polls.xlsx");
        assert_eq!(run.input_type, "xlsx");
        assert_eq!(run.output, "out.csv");
        assert_eq!(run.options.z_threshold, 3.0);
        assert!(run.options.remove_outliers);

        let run = resolve_aggregation(&args, &PollmcConfig::default());
        assert_eq!(run.options, AggregationOptions::DEFAULT_OPTIONS);
    }

    #[test]
    fn simulation_defaults() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let args = SimulateArgs {
            input: None,
            n_sim: None,
            seed: None,
            model: Some("normal".to_string()),
            election_date: None,
            as_of: None,
            out: None,
            draws_dir: None,
            reference: None,
        };
        let run = resolve_simulation(&args, &PollmcConfig::default(), today).unwrap();
        assert_eq!(run.input, DEFAULT_AGGREGATE_PATH);
        assert_eq!(run.settings.as_of, today);
        assert_eq!(run.settings.model, VoteShareModel::Normal);
        assert_eq!(run.settings.num_simulations, 40_000);

        let mut bad = args.clone();
        bad.model = Some("pymc".to_string());
        assert!(resolve_simulation(&bad, &PollmcConfig::default(), today).is_err());
        let mut bad = args;
        bad.election_date = Some("4 de outubro".to_string());
        assert!(resolve_simulation(&bad, &PollmcConfig::default(), today).is_err());
    }

    #[test]
    fn aggregate_then_simulate() {
        let input = temp_path("pollmc_test_e2e_polls.csv");
        let output = temp_path("pollmc_test_e2e_out/aggregate.csv");
        let outliers = temp_path("pollmc_test_e2e_out/outliers.csv");
        let summary = temp_path("pollmc_test_e2e_out/summary.json");
        fs::write(&input, POLLS).unwrap();

        let mut args = aggregate_args(&input, &output);
        args.outliers = Some(outliers.clone());
        run_aggregation(&args, &PollmcConfig::default()).unwrap();

        let content = fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "candidato,intencao_voto_pct,desvio_padrao_pct,n_pesquisas,amostra_total,data_referencia"
        );
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("Candidato X,"));
        assert!(lines[1].ends_with(",2,4000,2026-02-20"));
        assert!(lines[2].ends_with(",2,4700,2026-02-20"));

        let outlier_lines = fs::read_to_string(&outliers).unwrap();
        assert_eq!(outlier_lines.lines().count(), 2);
        assert!(outlier_lines.contains("I3"));

        let mut sim = simulate_args(&output);
        sim.out = Some(summary.clone());
        run_simulation(&sim, &PollmcConfig::default()).unwrap();
        let js: JSValue = serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
        assert_eq!(js["config"]["numSimulations"], json!(500));
        assert_eq!(js["secondRound"]["finalists"][0]["candidate"], json!("Candidato X"));

        // The same seed gives the same summary.
        sim.out = None;
        sim.reference = Some(summary.clone());
        run_simulation(&sim, &PollmcConfig::default()).unwrap();

        sim.seed = Some(8);
        assert!(run_simulation(&sim, &PollmcConfig::default()).is_err());
    }

    #[test]
    fn schema_errors_are_reported() {
        let input = temp_path("pollmc_test_missing_columns.csv");
        fs::write(&input, "candidato,intencao_voto_pct,data\nA,30,2026-02-20\n").unwrap();
        let args = aggregate_args(&input, &temp_path("pollmc_test_missing_columns_out.csv"));
        let res = run_aggregation(&args, &PollmcConfig::default());
        match res {
            Err(PollError::Aggregation {
                source: AggregationError::Schema { missing },
            }) => assert_eq!(missing, vec!["amostra", "desvio_padrao_pct", "instituto"]),
            x => panic!("unexpected result {:?}", x),
        }
    }

    #[test]
    fn summaries_are_rounded() {
        let js = round_floats(json!({"a": [1.23456789, 2], "b": {"c": 0.1 + 0.2}}));
        assert_eq!(js, json!({"a": [1.2346, 2], "b": {"c": 0.3}}));
    }

    #[test]
    fn unknown_input_type() {
        let mut args = aggregate_args("polls.csv", "out.csv");
        args.input_type = Some("parquet".to_string());
        let res = run_aggregation(&args, &PollmcConfig::default());
        assert!(matches!(res, Err(PollError::Whatever { .. })));
    }
}
