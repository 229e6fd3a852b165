// Primitives for reading and writing CSV files.

use std::fs::File;

use csv::{ReaderBuilder, Writer, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::pollmc::io_common::create_parent_dir;
use crate::pollmc::*;

pub fn read_csv_polls(path: &str) -> PollResult<Builder> {
    let contents = fs::read(path)
        .map_err(csv::Error::from)
        .context(CsvOpenSnafu { path })?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(contents.as_slice());
    let header: Vec<String> = rdr
        .headers()
        .context(CsvLineParseSnafu { path })?
        .iter()
        .map(|s| s.to_string())
        .collect();
    debug!("read_csv_polls: header: {:?}", header);
    let mut builder = Builder::from_header(&header).context(AggregationSnafu {})?;

    for line_r in rdr.records() {
        let line = line_r.context(CsvLineParseSnafu { path })?;
        let fields: Vec<String> = line.iter().map(|s| s.to_string()).collect();
        let added = match line.position() {
            Some(pos) => builder.add_row_at(&fields, record_line(&contents, pos)),
            None => builder.add_row(&fields),
        };
        added.context(AggregationSnafu {})?;
    }
    info!(
        "read_csv_polls: read {} polls from {:?}",
        builder.polls().len(),
        path
    );
    Ok(builder)
}

// The position of a record is taken before the blank lines that precede it
// are skipped.
fn record_line(contents: &[u8], pos: &csv::Position) -> usize {
    let start = (pos.byte() as usize).min(contents.len());
    let blank_lines = contents[start..]
        .iter()
        .take_while(|b| **b == b'\n' || **b == b'\r')
        .filter(|b| **b == b'\n')
        .count();
    pos.line() as usize + blank_lines
}

#[derive(Debug, Serialize)]
struct AggregateRow<'a> {
    candidato: &'a str,
    intencao_voto_pct: f64,
    desvio_padrao_pct: f64,
    n_pesquisas: usize,
    amostra_total: u64,
    data_referencia: String,
}

#[derive(Debug, Serialize)]
struct OutlierRow<'a> {
    candidato: &'a str,
    instituto: &'a str,
    data: String,
    intencao_voto_pct: f64,
    desvio_padrao_pct: f64,
    amostra: u64,
    z_score: f64,
    media_ponderada_pct: f64,
    sigma_entre_pct: f64,
}

fn create_writer(path: &str) -> PollResult<Writer<File>> {
    create_parent_dir(path)?;
    WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context(CsvWriteSnafu { path })
}

// The header is written by serialize() with the first row only.
fn write_header(wtr: &mut Writer<File>, path: &str, header: &[&str]) -> PollResult<()> {
    wtr.write_record(header).context(CsvWriteSnafu { path })
}

fn flush(mut wtr: Writer<File>, path: &str) -> PollResult<()> {
    wtr.flush().context(WritingSnafu { path })
}

pub fn write_aggregates(path: &str, aggregates: &[CandidateAggregate]) -> PollResult<()> {
    let mut wtr = create_writer(path)?;
    if aggregates.is_empty() {
        write_header(
            &mut wtr,
            path,
            &[
                "candidato",
                "intencao_voto_pct",
                "desvio_padrao_pct",
                "n_pesquisas",
                "amostra_total",
                "data_referencia",
            ],
        )?;
    }
    for a in aggregates.iter() {
        wtr.serialize(AggregateRow {
            candidato: &a.candidate,
            intencao_voto_pct: a.intention_pct,
            desvio_padrao_pct: a.sigma_pct,
            n_pesquisas: a.num_polls,
            amostra_total: a.total_sample,
            data_referencia: a.reference_date.format("%Y-%m-%d").to_string(),
        })
        .context(CsvWriteSnafu { path })?;
    }
    flush(wtr, path)?;
    info!("write_aggregates: {} rows written to {:?}", aggregates.len(), path);
    Ok(())
}

pub fn write_outliers(path: &str, outliers: &[OutlierRecord]) -> PollResult<()> {
    let mut wtr = create_writer(path)?;
    if outliers.is_empty() {
        write_header(
            &mut wtr,
            path,
            &[
                "candidato",
                "instituto",
                "data",
                "intencao_voto_pct",
                "desvio_padrao_pct",
                "amostra",
                "z_score",
                "media_ponderada_pct",
                "sigma_entre_pct",
            ],
        )?;
    }
    for o in outliers.iter() {
        wtr.serialize(OutlierRow {
            candidato: &o.poll.candidate,
            instituto: &o.poll.institute,
            data: o.poll.date.format("%Y-%m-%d").to_string(),
            intencao_voto_pct: o.poll.intention_pct,
            desvio_padrao_pct: o.poll.reported_sigma_pct,
            amostra: o.poll.sample_size,
            z_score: o.z_score,
            media_ponderada_pct: o.weighted_mean_pct,
            sigma_entre_pct: o.between_sigma_pct,
        })
        .context(CsvWriteSnafu { path })?;
    }
    flush(wtr, path)?;
    info!("write_outliers: {} rows written to {:?}", outliers.len(), path);
    Ok(())
}

#[derive(Debug, Deserialize)]
struct EstimateRow {
    candidato: String,
    intencao_voto_pct: f64,
    desvio_padrao_pct: f64,
}

/// Reads the candidates of a simulation, in file order.
pub fn read_estimates(path: &str) -> PollResult<Vec<CandidateEstimate>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context(CsvOpenSnafu { path })?;
    let mut res: Vec<CandidateEstimate> = Vec::new();
    for row_r in rdr.deserialize() {
        let row: EstimateRow = row_r.context(CsvLineParseSnafu { path })?;
        debug!("read_estimates: {:?}", row);
        res.push(CandidateEstimate {
            name: row.candidato,
            mean_pct: row.intencao_voto_pct,
            sigma_pct: row.desvio_padrao_pct,
        });
    }
    info!("read_estimates: {} candidates read from {:?}", res.len(), path);
    Ok(res)
}

/// One row per draw: the share of every candidate, the share of the valid
/// candidates among the valid votes, the winner and whether a runoff is needed.
pub fn write_first_round_draws(path: &str, first: &FirstRound) -> PollResult<()> {
    let mut wtr = create_writer(path)?;
    let mut header: Vec<String> = first.candidates.clone();
    header.extend(
        first
            .valid
            .iter()
            .map(|idx| format!("{}_val", first.candidates[*idx])),
    );
    header.push("vencedor".to_string());
    header.push("tem_2turno".to_string());
    wtr.write_record(&header).context(CsvWriteSnafu { path })?;

    for d in first.draws.iter() {
        let mut record: Vec<String> = d.shares.iter().map(|x| x.to_string()).collect();
        record.extend(d.valid_shares.iter().map(|x| x.to_string()));
        record.push(first.candidates[d.winner].clone());
        record.push(d.needs_runoff.to_string());
        wtr.write_record(&record).context(CsvWriteSnafu { path })?;
    }
    flush(wtr, path)?;
    info!(
        "write_first_round_draws: {} draws written to {:?}",
        first.draws.len(),
        path
    );
    Ok(())
}

pub fn write_second_round_draws(path: &str, second: &SecondRound) -> PollResult<()> {
    let mut wtr = create_writer(path)?;
    wtr.write_record(&[
        format!("{}_2T", second.first),
        format!("{}_2T", second.second),
        "vencedor_2T".to_string(),
        "diferenca".to_string(),
    ])
    .context(CsvWriteSnafu { path })?;
    for d in second.draws.iter() {
        let winner = if d.first_wins {
            &second.first
        } else {
            &second.second
        };
        wtr.write_record(&[
            d.first_pct.to_string(),
            d.second_pct.to_string(),
            winner.clone(),
            d.margin_pct.to_string(),
        ])
        .context(CsvWriteSnafu { path })?;
    }
    flush(wtr, path)?;
    info!(
        "write_second_round_draws: {} draws written to {:?}",
        second.draws.len(),
        path
    );
    Ok(())
}
