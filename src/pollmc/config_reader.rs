use crate::pollmc::*;

use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;

/// Options of `pollmc aggregate`. Every field can be overridden on the command line.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub input: Option<String>,
    #[serde(rename = "inputType")]
    pub input_type: Option<String>,
    #[serde(rename = "excelWorksheetName")]
    pub excel_worksheet_name: Option<String>,
    pub output: Option<String>,
    #[serde(rename = "outliersOutput")]
    pub outliers_output: Option<String>,
    #[serde(rename = "removeOutliers")]
    pub remove_outliers: Option<bool>,
    #[serde(rename = "zThreshold")]
    pub z_threshold: Option<f64>,
}

/// Options of `pollmc simulate`.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub input: Option<String>,
    #[serde(rename = "numSimulations")]
    pub num_simulations: Option<usize>,
    pub seed: Option<u64>,
    pub model: Option<String>,
    #[serde(rename = "electionDate")]
    pub election_date: Option<String>,
    #[serde(rename = "asOf")]
    pub as_of: Option<String>,
    #[serde(rename = "invalidLabels")]
    pub invalid_labels: Option<Vec<String>>,
    #[serde(rename = "transferConcentration")]
    pub transfer_concentration: Option<[f64; 3]>,
    #[serde(rename = "closeRaceMarginPct")]
    pub close_race_margin_pct: Option<f64>,
    pub out: Option<String>,
    #[serde(rename = "drawsDirectory")]
    pub draws_directory: Option<String>,
}

#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollmcConfig {
    pub aggregation: Option<AggregationConfig>,
    pub simulation: Option<SimulationConfig>,
}

pub fn read_config_file(path: &str) -> PollResult<PollmcConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let config: PollmcConfig =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    info!("config: {:?}", config);
    Ok(config)
}

pub fn read_summary(path: &str) -> PollResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(js)
}
