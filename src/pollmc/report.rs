use std::fmt::Write;

use crate::pollmc::*;

const SEPARATOR: &str = "============================================================";

pub fn outlier_alert(o: &OutlierRecord) -> String {
    format!(
        "OUTLIER DETECTED: {} reports {} at {:.2}% (mean: {:.2}% ± {:.2}pp, z={:.2})",
        o.poll.institute,
        o.poll.candidate,
        o.poll.intention_pct,
        o.weighted_mean_pct,
        o.between_sigma_pct,
        o.z_score
    )
}

/// The human-readable report of a simulation.
pub fn simulation_report(
    summary: &SimulationSummary,
    days_to_election: i64,
    sigma: f64,
    base_sigma: f64,
    close_race_margin_pct: f64,
) -> String {
    let mut s = String::new();
    // Writing to a String cannot fail.
    let _ = write_report(
        &mut s,
        summary,
        days_to_election,
        sigma,
        base_sigma,
        close_race_margin_pct,
    );
    s
}

fn write_report(
    s: &mut String,
    summary: &SimulationSummary,
    days_to_election: i64,
    sigma: f64,
    base_sigma: f64,
    close_race_margin_pct: f64,
) -> std::fmt::Result {
    writeln!(s, "{}", SEPARATOR)?;
    writeln!(s, "  ELECTION MONTE CARLO: {} draws", summary.num_simulations)?;
    writeln!(s, "{}", SEPARATOR)?;
    writeln!(
        s,
        "Days until the election: {}, sigma: {:.2}% (base: {:.2}%)",
        days_to_election, sigma, base_sigma
    )?;

    writeln!(s, "\nFirst round, total votes:")?;
    for c in summary.first_round.iter() {
        writeln!(
            s,
            "  {:22} {:5.2}%  90% interval: [{:.2}% - {:.2}%]",
            c.name, c.mean_pct, c.low_pct, c.high_pct
        )?;
    }

    writeln!(s, "\nFirst round, probability of the most votes:")?;
    for (name, p) in summary.first_round_wins.iter() {
        writeln!(s, "  {:22} {:.2}%", name, p)?;
    }
    writeln!(
        s,
        "\nProbability of a second round: {:.2}%",
        summary.runoff_probability_pct
    )?;
    writeln!(
        s,
        "{} wins in the first round: {:.2}%",
        summary.leader.0, summary.leader.1
    )?;

    match &summary.second_round {
        Some(second) => {
            writeln!(s, "\nSecond round:")?;
            for f in second.finalists.iter() {
                writeln!(s, "  {:22} {:.2}% ± {:.2}%", f.name, f.mean_pct, f.std_pct)?;
            }
            writeln!(s, "\nSecond round, probability of victory:")?;
            for f in second.finalists.iter() {
                writeln!(s, "  {:22} {:.2}%", f.name, f.win_probability_pct)?;
            }
            writeln!(
                s,
                "\nRace closer than {}pp: {:.2}% of the scenarios",
                close_race_margin_pct, second.close_race_probability_pct
            )?;
        }
        None => writeln!(s, "\nNo second round: fewer than 2 valid candidates")?,
    }
    write!(s, "{}", SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_format() {
        let o = OutlierRecord {
            poll: PollRecord {
                candidate: "Candidato X".to_string(),
                intention_pct: 45.0,
                reported_sigma_pct: 2.0,
                institute: "I3".to_string(),
                date: NaiveDate::from_ymd_opt(2026, 2, 20).unwrap(),
                sample_size: 2000,
            },
            z_score: 1.2695,
            weighted_mean_pct: 36.678,
            between_sigma_pct: 6.554,
        };
        assert_eq!(
            outlier_alert(&o),
            "OUTLIER DETECTED: I3 reports Candidato X at 45.00% (mean: 36.68% ± 6.55pp, z=1.27)"
        );
    }

    #[test]
    fn report_without_second_round() {
        let summary = SimulationSummary {
            num_simulations: 10,
            first_round: vec![CandidateSummary {
                name: "Lula".to_string(),
                mean_pct: 60.0,
                low_pct: 55.0,
                high_pct: 65.0,
            }],
            first_round_wins: vec![("Lula".to_string(), 100.0)],
            runoff_probability_pct: 0.0,
            leader: ("Lula".to_string(), 100.0),
            second_round: None,
        };
        let report = simulation_report(&summary, 30, 2.0, 2.0, 3.0);
        assert!(report.contains("ELECTION MONTE CARLO: 10 draws"));
        assert!(report.contains("Lula wins in the first round: 100.00%"));
        assert!(report.contains("No second round"));
        assert!(report.ends_with(SEPARATOR));
    }
}
