/*!

This is the long-form manual for `electoral_clustering` and `elanalyze`.

## Input formats

The following formats are supported:
* `csv` Comma Separated Values, long format
* `xlsx` the same columns in an Excel worksheet

### `csv`

One row per (election, municipality, party), as published by the electoral
statistics offices:

```text
Convocatoria,Provincia,Municipio,Partido,nombre_representativo,Votos,Censo,Abstención,Nº votantes
Convocatoria 2015/03,Sevilla,Utrera,PSOE-A,PSOE,9000,40000,12000,28000
Convocatoria 2015/03,Sevilla,Utrera,PP,PP,5000,40000,12000,28000
```

Notes:
- rows without a municipality, or with the municipality `Dato no disponible`,
  are provincial aggregates and are dropped.
- the party is read from `Partido` when present, from `nombre_representativo`
  otherwise, and mapped to a canonical name (`PSOE`, `PP`, `VOX`, `Cs`,
  `Podemos`, `IU`, `Adelante Andalucía`, ...). Anything unknown becomes `Otros`.
- the census and the abstention are repeated on every party row. They are
  counted once per municipality.
- the identifier of a unit is `Provincia/Municipio`.

The features of a unit are the votes of every party divided by the census,
plus the abstention divided by the census (feature `Abstencion`).

### `xlsx`

The same columns as `csv`, in the first worksheet of the file, or in the
worksheet named by `excelWorksheetName` (or `--excel-worksheet-name`).

### Labels

The supervised mode reads the historical targets from a CSV file with a
header. The identifier column (default `id`) must match the unit identifiers
and the target column (default `target`) must contain numbers.

```text
id,target
Sevilla/Utrera,0.42
```

## Configuration

`elanalyze` comes with sensible defaults. Every option can be given on the
command line or in a configuration file in JSON:

```json
{
  "outputSettings": {
    "analysisName": "Andalucía 2015-2018",
    "outputDirectory": "output",
    "summaryFile": "summary.json",
    "tableFile": "units.csv"
  },
  "dataSources": [{ "provider": "csv", "filePath": "normalizado.csv" }],
  "selection": {
    "startElection": "Convocatoria 2015/03",
    "endElection": "Convocatoria 2018/12",
    "province": null,
    "municipality": null
  },
  "rules": {
    "clusterCount": 3,
    "maxIterations": 100,
    "mode": "unsupervised",
    "randomSeed": null,
    "missingData": "exclude",
    "minLabeledPerCluster": 3,
    "ridgePenalty": 1.0
  }
}
```

The paths are relative to the directory of the configuration file.

`--list-elections` prints the elections found in the data sources, for
example `Convocatoria 2015/03`, and exits.

Rules:
- `clusterCount` (number, default 5): the number of clusters. It may not
  exceed the number of units.
- `maxIterations` (number, default 100): the clustering stops there and the
  summary carries a `NotConverged` caveat.
- `mode`: `unsupervised` (score from the principal axis) or `supervised`
  (ridge regression on the labels, which are then required).
- `randomSeed` (number or string, optional): breaks the distance ties with a
  permutation derived from the seed instead of the lowest index.
- `missingData`: `exclude` (drop the unit) or `imputeMean`.
- `minLabeledPerCluster` (default 3): below this, a cluster uses the fit over
  all the labeled units.
- `ridgePenalty` (default 1.0): must be positive.

Selection:
- `startElection` is required. When `endElection` is also given, the units
  must appear in both elections and the vote transfers between the two are
  estimated, by cluster and for all the units.
- `province` and `municipality` restrict the units.

## Output

The summary is a JSON document with the echo of the configuration, the
caveats, one profile per cluster, one record per unit and the transfer
matrices. Shares, scores and confidences are written as strings with four
decimals, and the transferred votes are rounded to the unit. Every transfer
matrix carries `highlights`: the parties keeping more than 60% of their
voters (`retention`), and the parties sending more than 10% of their voters
to the abstention (`toAbstention`) or to VOX (`toVox`). Passing
`--reference` compares the summary with a previous one and fails on any
difference.

The table is a CSV file with one row per unit, the features being the
normalized ones:

```text
unit_id,cluster,score,confidence,model,PSOE,PP,...,Abstencion
```

`model` is `centroid`, `observed`, `global` or `cluster:N`.

 */
