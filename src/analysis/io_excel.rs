use calamine::DataType;

use crate::analysis::{io_common::LongFormatColumns, *};

/// Reads the long format from an Excel worksheet.
pub fn read_excel_rows(path: String, cfs: &FileSource) -> BCliResult<Vec<VoteRow>> {
    let wrange = get_range(&path, cfs)?;
    let mut iter = wrange.rows();
    let header_cells = iter.next().context(EmptyExcelSnafu {})?;
    let header: Vec<String> = header_cells
        .iter()
        .enumerate()
        .map(|(idx, c)| read_cell(c, 1, idx))
        .collect::<BCliResult<_>>()?;
    debug!("read_excel_rows: header: {:?}", header);
    let columns = LongFormatColumns::from_header(&header, &path)?;

    let mut res: Vec<VoteRow> = Vec::new();
    for (idx, row) in iter.enumerate() {
        let lineno = idx + 2;
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(col, c)| read_cell(c, lineno, col))
            .collect::<BCliResult<_>>()?;
        if cells.iter().all(|c| c.is_empty()) {
            debug!("read_excel_rows: skipping empty row {}", lineno);
            continue;
        }
        res.push(columns.read_row(&cells, lineno)?);
    }
    info!("read_excel_rows: {:?}: {} rows", path, res.len());
    Ok(res)
}

fn read_cell(cell: &DataType, lineno: usize, col: usize) -> BCliResult<String> {
    match cell {
        DataType::String(s) => Ok(s.clone()),
        DataType::Float(f) => Ok(f.to_string()),
        DataType::Int(i) => Ok(i.to_string()),
        DataType::Empty => Ok("".to_string()),
        _ => Err(Box::new(AnalysisCliError::ExcelWrongCellType {
            lineno: lineno as u64,
            content: format!("column {}: {:?}", col + 1, cell),
        })),
    }
}

fn get_range(path: &String, cfs: &FileSource) -> BCliResult<calamine::Range<DataType>> {
    let worksheet_name_o = cfs.excel_worksheet_name.clone();
    debug!(
        "read_excel_rows: path: {:?} worksheet: {:?}",
        &path, &worksheet_name_o
    );
    let p = path.clone();
    let mut workbook: Xlsx<_> =
        open_workbook(p).context(OpeningExcelSnafu { path: path.clone() })?;

    // A worksheet name was provided, use it.
    if let Some(worksheet_name) = worksheet_name_o {
        let wrange = workbook
            .worksheet_range(&worksheet_name)
            .context(MissingWorksheetSnafu {
                name: worksheet_name.clone(),
            })?
            .context(OpeningExcelSnafu { path: path.clone() })?;
        Ok(wrange)
    } else {
        let all_worksheets = workbook.worksheets();
        match all_worksheets.as_slice() {
            [] => Err(Box::new(AnalysisCliError::EmptyExcel {})),
            [(worksheet_name, wrange), ..] => {
                if all_worksheets.len() > 1 {
                    warn!(
                        "read_excel_rows: {:?} has {} worksheets, using the first one ({:?})",
                        path,
                        all_worksheets.len(),
                        worksheet_name
                    );
                }
                Ok(wrange.clone())
            }
        }
    }
}
