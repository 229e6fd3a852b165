/*!
Monte Carlo simulation of a two-round election.

The simulators only consume the mean and the deviation of each candidate,
usually taken from the output of [`crate::aggregate_polls`].

- the first round draws the vote shares of all the candidates (including
  blank and null votes) and records the winner among the valid candidates;
- the second round opposes the first two valid candidates (in input order)
  and transfers the votes of the other valid candidates between the two
  finalists and abstention.
*/

use std::error::Error;
use std::fmt::Display;

use chrono::NaiveDate;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Dirichlet, Distribution, Normal};

use crate::config::CandidateAggregate;

// ********* Input data structures ***********

#[derive(PartialEq, Debug, Clone)]
pub struct CandidateEstimate {
    pub name: String,
    pub mean_pct: f64,
    pub sigma_pct: f64,
}

impl From<&CandidateAggregate> for CandidateEstimate {
    fn from(agg: &CandidateAggregate) -> Self {
        CandidateEstimate {
            name: agg.candidate.clone(),
            mean_pct: agg.intention_pct,
            sigma_pct: agg.sigma_pct,
        }
    }
}

/// How the first-round vote shares are drawn.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum VoteShareModel {
    /// Independent normal draws, clipped at zero and normalized to 100%.
    Normal,
    /// A Dirichlet draw: the shares are always positive and sum to 100%.
    Dirichlet,
}

#[derive(PartialEq, Debug, Clone)]
pub struct SimulationSettings {
    pub num_simulations: usize,
    pub seed: u64,
    pub model: VoteShareModel,
    pub election_date: NaiveDate,
    /// The day the simulation is run. The uncertainty grows with the time
    /// left until the election.
    pub as_of: NaiveDate,
    /// A candidate whose name contains one of these labels counts as blank
    /// or null votes. It never wins and is left out of the valid votes.
    pub invalid_labels: Vec<String>,
    /// Dirichlet concentration of the transfer of the other candidates'
    /// votes to (first finalist, second finalist, abstention).
    pub transfer_concentration: [f64; 3],
    /// A second round is close when the margin is below this value.
    pub close_race_margin_pct: f64,
}

impl SimulationSettings {
    pub const DEFAULT_NUM_SIMULATIONS: usize = 40_000;
    pub const DEFAULT_SEED: u64 = 42;

    pub fn default_election_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 4).unwrap_or(NaiveDate::MIN)
    }

    /// The default settings for a simulation run on the given day.
    pub fn new(as_of: NaiveDate) -> SimulationSettings {
        SimulationSettings {
            num_simulations: SimulationSettings::DEFAULT_NUM_SIMULATIONS,
            seed: SimulationSettings::DEFAULT_SEED,
            model: VoteShareModel::Dirichlet,
            election_date: SimulationSettings::default_election_date(),
            as_of,
            invalid_labels: vec!["Brancos".to_string(), "Nulos".to_string()],
            transfer_concentration: [40.0, 35.0, 25.0],
            close_race_margin_pct: 3.0,
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub enum SimulationError {
    NoCandidates,
    NoValidCandidate,
    InvalidParameter(String),
}

impl Error for SimulationError {}

impl Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::NoCandidates => write!(f, "No candidate to simulate"),
            SimulationError::NoValidCandidate => {
                write!(f, "All the candidates are blank or null votes")
            }
            SimulationError::InvalidParameter(msg) => {
                write!(f, "Invalid simulation parameter: {}", msg)
            }
        }
    }
}

// ******** Output data structures *********

#[derive(PartialEq, Debug, Clone)]
pub struct FirstRoundDraw {
    /// The share of every candidate, in input order. Sums to 100.
    pub shares: Vec<f64>,
    /// The share of every valid candidate among the valid votes. Sums to 100.
    pub valid_shares: Vec<f64>,
    /// Index of the winner in the list of candidates.
    pub winner: usize,
    pub needs_runoff: bool,
}

#[derive(PartialEq, Debug, Clone)]
pub struct FirstRound {
    pub candidates: Vec<String>,
    /// Indexes of the valid candidates, in input order.
    pub valid: Vec<usize>,
    pub draws: Vec<FirstRoundDraw>,
}

#[derive(PartialEq, Debug, Clone, Copy)]
pub struct SecondRoundDraw {
    pub first_pct: f64,
    pub second_pct: f64,
    pub first_wins: bool,
    pub margin_pct: f64,
}

#[derive(PartialEq, Debug, Clone)]
pub struct SecondRound {
    pub first: String,
    pub second: String,
    pub draws: Vec<SecondRoundDraw>,
}

// ******** Simulation *********

/// Widens the deviation with the time left until the election.
///
/// The deviation grows with the square root of the number of days (in
/// months), and never goes below the base deviation. After the election day,
/// the base deviation is returned.
pub fn temporal_sigma(base_sigma: f64, election_date: NaiveDate, as_of: NaiveDate) -> f64 {
    let days_left = (election_date - as_of).num_days();
    if days_left < 0 {
        return base_sigma;
    }
    let factor = (days_left as f64 / 30.0).sqrt();
    base_sigma.max(base_sigma * factor)
}

pub fn is_valid_candidate(name: &str, invalid_labels: &[String]) -> bool {
    !invalid_labels.iter().any(|l| name.contains(l.as_str()))
}

pub struct Simulator {
    candidates: Vec<CandidateEstimate>,
    valid: Vec<usize>,
    settings: SimulationSettings,
    base_sigma: f64,
    sigma: f64,
    rng: StdRng,
}

impl Simulator {
    /// Prepares a simulation. The order of the candidates matters: the first
    /// two valid candidates are the finalists of the second round.
    pub fn new(
        candidates: &[CandidateEstimate],
        settings: &SimulationSettings,
    ) -> Result<Simulator, SimulationError> {
        if candidates.is_empty() {
            return Err(SimulationError::NoCandidates);
        }
        let valid: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| is_valid_candidate(&c.name, &settings.invalid_labels))
            .map(|(idx, _)| idx)
            .collect();
        if valid.is_empty() {
            return Err(SimulationError::NoValidCandidate);
        }
        if settings.num_simulations == 0 {
            return Err(SimulationError::InvalidParameter(
                "the number of simulations must be positive".to_string(),
            ));
        }
        if let Some(c) = candidates
            .iter()
            .find(|c| !(c.mean_pct.is_finite() && c.mean_pct >= 0.0))
        {
            return Err(SimulationError::InvalidParameter(format!(
                "invalid mean for {}: {}",
                c.name, c.mean_pct
            )));
        }

        let base_sigma =
            candidates.iter().map(|c| c.sigma_pct).sum::<f64>() / candidates.len() as f64;
        if !(base_sigma.is_finite() && base_sigma > 0.0) {
            return Err(SimulationError::InvalidParameter(format!(
                "the mean deviation must be positive, got {}",
                base_sigma
            )));
        }
        let sigma = temporal_sigma(base_sigma, settings.election_date, settings.as_of);
        info!(
            "Simulator: {} candidates ({} valid), {} days until the election, sigma {:.2}% (base: {:.2}%)",
            candidates.len(),
            valid.len(),
            settings.days_to_election(),
            sigma,
            base_sigma
        );

        Ok(Simulator {
            candidates: candidates.to_vec(),
            valid,
            settings: settings.clone(),
            base_sigma,
            sigma,
            rng: StdRng::seed_from_u64(settings.seed),
        })
    }

    /// The deviation used for the draws, after the temporal adjustment.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn base_sigma(&self) -> f64 {
        self.base_sigma
    }

    pub fn simulate_first_round(&mut self) -> Result<FirstRound, SimulationError> {
        let n = self.settings.num_simulations;
        info!(
            "Simulating the first round ({} draws, model {:?})",
            n, self.settings.model
        );
        let mut draws: Vec<FirstRoundDraw> = Vec::with_capacity(n);
        match self.settings.model {
            VoteShareModel::Normal => {
                let normals = self
                    .candidates
                    .iter()
                    .map(|c| normal(c.mean_pct, self.sigma))
                    .collect::<Result<Vec<Normal<f64>>, SimulationError>>()?;
                for _ in 0..n {
                    let votes: Vec<f64> = normals
                        .iter()
                        .map(|d| d.sample(&mut self.rng).max(0.0))
                        .collect();
                    draws.push(self.first_round_draw(normalize_pct(&votes)));
                }
            }
            VoteShareModel::Dirichlet => {
                let concentration = 100.0 / self.sigma;
                let alphas: Vec<f64> = self
                    .candidates
                    .iter()
                    .map(|c| c.mean_pct * concentration)
                    .collect();
                debug!("simulate_first_round: dirichlet alphas: {:?}", alphas);
                let dirichlet = dirichlet(&alphas)?;
                for _ in 0..n {
                    let proportions: Vec<f64> = dirichlet.sample(&mut self.rng);
                    let shares: Vec<f64> = proportions.iter().map(|p| p * 100.0).collect();
                    draws.push(self.first_round_draw(shares));
                }
            }
        }
        Ok(FirstRound {
            candidates: self.candidates.iter().map(|c| c.name.clone()).collect(),
            valid: self.valid.clone(),
            draws,
        })
    }

    fn first_round_draw(&self, shares: Vec<f64>) -> FirstRoundDraw {
        let valid_votes: Vec<f64> = self.valid.iter().map(|idx| shares[*idx]).collect();
        let valid_shares = normalize_pct(&valid_votes);
        // The first candidate wins a tie.
        let mut best = 0;
        for (pos, s) in valid_shares.iter().enumerate() {
            if *s > valid_shares[best] {
                best = pos;
            }
        }
        let needs_runoff = valid_shares[best] < 50.0;
        FirstRoundDraw {
            shares,
            winner: self.valid[best],
            valid_shares,
            needs_runoff,
        }
    }

    /// Simulates the second round between the first two valid candidates.
    ///
    /// Returns None if there are fewer than two valid candidates.
    pub fn simulate_second_round(&mut self) -> Result<Option<SecondRound>, SimulationError> {
        if self.valid.len() < 2 {
            warn!("Fewer than 2 valid candidates, skipping the second round");
            return Ok(None);
        }
        let (idx1, idx2) = (self.valid[0], self.valid[1]);
        let others_mean: f64 = self.valid[2..]
            .iter()
            .map(|idx| self.candidates[*idx].mean_pct)
            .sum();
        let (c1, c2) = (&self.candidates[idx1], &self.candidates[idx2]);
        info!(
            "Simulating the second round: {} vs {} (others: {:.2}%)",
            c1.name, c2.name, others_mean
        );

        let d1 = normal(c1.mean_pct, self.sigma)?;
        let d2 = normal(c2.mean_pct, self.sigma)?;
        let d_others = normal(others_mean, self.sigma)?;
        let transfers = dirichlet(&self.settings.transfer_concentration)?;

        let n = self.settings.num_simulations;
        let mut draws: Vec<SecondRoundDraw> = Vec::with_capacity(n);
        for _ in 0..n {
            let x1 = d1.sample(&mut self.rng);
            let x2 = d2.sample(&mut self.rng);
            let others = d_others.sample(&mut self.rng);
            let t: Vec<f64> = transfers.sample(&mut self.rng);

            let v1 = (x1 + others * t[0]).max(0.0);
            let v2 = (x2 + others * t[1]).max(0.0);
            let total = v1 + v2;
            let first_pct = if total > 0.0 { v1 / total * 100.0 } else { 50.0 };
            let second_pct = 100.0 - first_pct;
            draws.push(SecondRoundDraw {
                first_pct,
                second_pct,
                first_wins: first_pct > second_pct,
                margin_pct: (first_pct - second_pct).abs(),
            });
        }
        Ok(Some(SecondRound {
            first: c1.name.clone(),
            second: c2.name.clone(),
            draws,
        }))
    }
}

impl SimulationSettings {
    pub fn days_to_election(&self) -> i64 {
        (self.election_date - self.as_of).num_days()
    }
}

fn normal(mean: f64, sigma: f64) -> Result<Normal<f64>, SimulationError> {
    Normal::new(mean, sigma).map_err(|e| {
        SimulationError::InvalidParameter(format!("normal({}, {}): {:?}", mean, sigma, e))
    })
}

fn dirichlet(alphas: &[f64]) -> Result<Dirichlet<f64>, SimulationError> {
    if alphas.len() < 2 || alphas.iter().any(|a| !(a.is_finite() && *a > 0.0)) {
        return Err(SimulationError::InvalidParameter(format!(
            "dirichlet concentrations must be at least 2 positive numbers, got {:?}",
            alphas
        )));
    }
    Dirichlet::new(alphas)
        .map_err(|e| SimulationError::InvalidParameter(format!("dirichlet: {:?}", e)))
}

// Scales the values so that they sum to 100. Without any vote, the shares are equal.
fn normalize_pct(values: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter().map(|v| v / total * 100.0).collect()
    } else {
        vec![100.0 / values.len() as f64; values.len()]
    }
}

// ******** Summary *********

#[derive(PartialEq, Debug, Clone)]
pub struct CandidateSummary {
    pub name: String,
    pub mean_pct: f64,
    /// 5th percentile
    pub low_pct: f64,
    /// 95th percentile
    pub high_pct: f64,
}

#[derive(PartialEq, Debug, Clone)]
pub struct FinalistSummary {
    pub name: String,
    pub mean_pct: f64,
    pub std_pct: f64,
    pub win_probability_pct: f64,
}

#[derive(PartialEq, Debug, Clone)]
pub struct SecondRoundSummary {
    pub finalists: Vec<FinalistSummary>,
    pub close_race_probability_pct: f64,
}

#[derive(PartialEq, Debug, Clone)]
pub struct SimulationSummary {
    pub num_simulations: usize,
    pub first_round: Vec<CandidateSummary>,
    /// Valid candidates that won at least one draw, most likely first.
    pub first_round_wins: Vec<(String, f64)>,
    pub runoff_probability_pct: f64,
    /// The first valid candidate, and the probability that it gets more than
    /// half of the valid votes.
    pub leader: (String, f64),
    pub second_round: Option<SecondRoundSummary>,
}

/// Linear interpolation between the closest ranks, `q` in [0, 1].
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

// Sample standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|x| (x - m) * (x - m)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

fn frequency_pct(count: usize, total: usize) -> f64 {
    count as f64 / total as f64 * 100.0
}

pub fn summarize(
    first: &FirstRound,
    second: Option<&SecondRound>,
    close_race_margin_pct: f64,
) -> SimulationSummary {
    let n = first.draws.len();

    let first_round: Vec<CandidateSummary> = first
        .candidates
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let shares: Vec<f64> = first.draws.iter().map(|d| d.shares[idx]).collect();
            CandidateSummary {
                name: name.clone(),
                mean_pct: mean(&shares),
                low_pct: percentile(&shares, 0.05),
                high_pct: percentile(&shares, 0.95),
            }
        })
        .collect();

    let mut first_round_wins: Vec<(String, f64)> = first
        .valid
        .iter()
        .map(|idx| {
            let wins = first.draws.iter().filter(|d| d.winner == *idx).count();
            (first.candidates[*idx].clone(), frequency_pct(wins, n))
        })
        .filter(|(_, p)| *p > 0.0)
        .collect();
    first_round_wins.sort_by(|a, b| b.1.total_cmp(&a.1));

    let runoffs = first.draws.iter().filter(|d| d.needs_runoff).count();
    // The leader is the first valid candidate, at position 0 of the valid shares.
    let leader_wins = first
        .draws
        .iter()
        .filter(|d| d.valid_shares[0] > 50.0)
        .count();
    let leader = (
        first.candidates[first.valid[0]].clone(),
        frequency_pct(leader_wins, n),
    );

    let second_round = second.map(|s| {
        let m = s.draws.len();
        let firsts: Vec<f64> = s.draws.iter().map(|d| d.first_pct).collect();
        let seconds: Vec<f64> = s.draws.iter().map(|d| d.second_pct).collect();
        let first_wins = s.draws.iter().filter(|d| d.first_wins).count();
        let close = s
            .draws
            .iter()
            .filter(|d| d.margin_pct < close_race_margin_pct)
            .count();
        SecondRoundSummary {
            finalists: vec![
                FinalistSummary {
                    name: s.first.clone(),
                    mean_pct: mean(&firsts),
                    std_pct: std_dev(&firsts),
                    win_probability_pct: frequency_pct(first_wins, m),
                },
                FinalistSummary {
                    name: s.second.clone(),
                    mean_pct: mean(&seconds),
                    std_pct: std_dev(&seconds),
                    win_probability_pct: frequency_pct(m - first_wins, m),
                },
            ],
            close_race_probability_pct: frequency_pct(close, m),
        }
    });

    SimulationSummary {
        num_simulations: n,
        first_round,
        first_round_wins,
        runoff_probability_pct: frequency_pct(runoffs, n),
        leader,
        second_round,
    }
}
