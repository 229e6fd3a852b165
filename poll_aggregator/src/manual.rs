/*!

This is the long-form manual for `poll_aggregator` and `pollmc`.

## Input format

The polls are read from a table (CSV, or the first sheet of an Excel `.xlsx`
workbook) with one row per poll and per candidate:

```text
candidato,intencao_voto_pct,desvio_padrao_pct,instituto,data,amostra
Lula,38.0,2.0,Datafolha,2026-02-18,2000
Lula,36.0,2.0,Quaest,2026-02-19,2500
Flávio Bolsonaro,29.0,2.0,Datafolha,2026-02-18,2000
```

All six columns are mandatory, in any order. Other columns (for example
`fonte`) are ignored. Dates are written `YYYY-MM-DD`.

## Aggregation

For every candidate, the polls are averaged with a weight that decays with
their age: a poll published `d` days before the most recent poll of the whole
file gets the weight `exp(-d / 7)`.

The deviation of the aggregate combines two sources of error:
- the average deviation reported by the institutes (same weights);
- the weighted deviation of the polls around the weighted mean, which
  measures how much the institutes disagree.

The two are added in quadrature.

### Outliers

A poll is an outlier when it is more than `z` deviations between institutes
away from the weighted mean (`z = 2` by default). Candidates with a single
poll, or with polls that all agree, never have outliers.

The outliers are always reported. With `--remove-outliers`, they are removed
and the aggregate is computed again, until no outlier is left. If all the
remaining polls of a candidate would be removed at once, nothing is removed
and the aggregate uses all the polls of that candidate.

The aggregate file has the columns:

```text
candidato,intencao_voto_pct,desvio_padrao_pct,n_pesquisas,amostra_total,data_referencia
```

## Simulation

`pollmc simulate` reads an aggregate file and runs a Monte Carlo simulation
of the two rounds. The order of the rows matters: the first two valid
candidates are the finalists of the second round. Rows whose candidate name
contains `Brancos` or `Nulos` are blank and null votes.

The deviation used for the draws is the average deviation of the candidates,
widened by `sqrt(days until the election / 30)` when the election is more than
a month away.

Two models are available for the first round:
* `dirichlet` (default): the shares are drawn from a Dirichlet distribution
  with concentrations `mean * 100 / sigma`;
* `normal`: every share is drawn independently, clipped at 0 and
  normalized to 100%.

In the second round, the votes of the other valid candidates are split between
the two finalists and abstention, following a Dirichlet distribution with
concentrations `[40, 35, 25]` by default.

## Configuration

All the options can also be given in a JSON file with `--config`. The command
line takes precedence.

```json
{
  "aggregation": {
    "input": "data/pesquisas.csv",
    "output": "data/pesquisas_agregadas.csv",
    "removeOutliers": true,
    "zThreshold": 2.0
  },
  "simulation": {
    "input": "data/pesquisas_agregadas.csv",
    "numSimulations": 40000,
    "seed": 42,
    "model": "dirichlet",
    "electionDate": "2026-10-04",
    "invalidLabels": ["Brancos", "Nulos"],
    "transferConcentration": [40, 35, 25],
    "closeRaceMarginPct": 3.0
  }
}
```

 */
