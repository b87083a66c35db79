// Primitives for reading and writing CSV files.

use std::collections::BTreeMap;
use std::fs::File;

use crate::analysis::{
    io_common::{parse_number, LongFormatColumns},
    *,
};

/// Reads a long-format file: one row per election, municipality and party.
pub fn read_csv_rows(path: String, _cfs: &FileSource) -> BCliResult<Vec<VoteRow>> {
    let mut rdr = open_reader(&path)?;
    let header: Vec<String> = rdr
        .headers()
        .context(CsvLineParseSnafu { lineno: 1usize })?
        .iter()
        .map(|s| s.to_string())
        .collect();
    let columns = LongFormatColumns::from_header(&header, &path)?;

    let mut res: Vec<VoteRow> = Vec::new();
    for (idx, line_r) in rdr.into_records().enumerate() {
        // The header is on line 1.
        let lineno = idx + 2;
        let line = line_r.context(CsvLineParseSnafu { lineno })?;
        let cells: Vec<String> = line.iter().map(|s| s.to_string()).collect();
        let row = columns.read_row(&cells, lineno)?;
        res.push(row);
    }
    info!("read_csv_rows: {:?}: {} rows", path, res.len());
    Ok(res)
}

/// Reads the historical targets of the supervised mode.
pub fn read_csv_labels(path: String, labels: &LabelSource) -> BCliResult<BTreeMap<String, f64>> {
    let id_column = labels.id_column.clone().unwrap_or_else(|| "id".to_string());
    let target_column = labels
        .target_column
        .clone()
        .unwrap_or_else(|| "target".to_string());
    let mut rdr = open_reader(&path)?;
    let header: Vec<String> = rdr
        .headers()
        .context(CsvLineParseSnafu { lineno: 1usize })?
        .iter()
        .map(|s| s.trim().to_string())
        .collect();
    let position = |name: &String| -> BCliResult<usize> {
        match header.iter().position(|h| h == name) {
            Some(idx) => Ok(idx),
            None => Err(Box::new(AnalysisCliError::MissingColumn {
                name: name.clone(),
                path: path.clone(),
            })),
        }
    };
    let id_idx = position(&id_column)?;
    let target_idx = position(&target_column)?;

    let mut res: BTreeMap<String, f64> = BTreeMap::new();
    for (idx, line_r) in rdr.records().enumerate() {
        let lineno = idx + 2;
        let line = line_r.context(CsvLineParseSnafu { lineno })?;
        let id = line
            .get(id_idx)
            .context(LineTooShortSnafu { lineno })?
            .trim()
            .to_string();
        let target_s = line.get(target_idx).context(LineTooShortSnafu { lineno })?;
        match parse_number(target_s, lineno)? {
            Some(target) => {
                if res.insert(id.clone(), target).is_some() {
                    warn!("read_csv_labels: line {}: duplicate label for {}", lineno, id);
                }
            }
            None => debug!("read_csv_labels: line {}: no target for {}", lineno, id),
        }
    }
    info!("read_csv_labels: {:?}: {} labels", path, res.len());
    Ok(res)
}

/// Writes the flat table of the records.
pub fn write_csv_table(path: &str, table: &FlatTable) -> BCliResult<()> {
    let mut wtr = csv::Writer::from_path(path).context(CsvOpenSnafu {
        path: path.to_string(),
    })?;
    wtr.write_record(&table.header)
        .context(CsvWriteSnafu {
            path: path.to_string(),
        })?;
    for row in table.rows.iter() {
        wtr.write_record(row).context(CsvWriteSnafu {
            path: path.to_string(),
        })?;
    }
    wtr.flush().context(WritingOutputSnafu {
        path: path.to_string(),
    })?;
    info!("write_csv_table: {} rows written to {:?}", table.rows.len(), path);
    Ok(())
}

fn open_reader(path: &String) -> CliResult<csv::Reader<File>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .context(CsvOpenSnafu { path: path.clone() })
}
