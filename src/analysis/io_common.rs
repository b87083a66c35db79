// Primitives shared by the readers of the long format.

use std::collections::HashMap;
use std::path::Path;

use crate::analysis::*;

pub const UNAVAILABLE_MUNICIPALITY: &str = "Dato no disponible";

pub const COL_ELECTION: &str = "Convocatoria";
pub const COL_PROVINCE: &str = "Provincia";
pub const COL_MUNICIPALITY: &str = "Municipio";
pub const COL_PARTY: &str = "Partido";
pub const COL_PARTY_SHORT: &str = "nombre_representativo";
pub const COL_VOTES: &str = "Votos";
pub const COL_CENSUS: &str = "Censo";
pub const COL_ABSTENTION: &str = "Abstención";
pub const COL_VOTERS: &str = "Nº votantes";

pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// The identifier of a unit.
pub fn unit_id(province: &str, municipality: &str) -> String {
    format!("{}/{}", province, municipality)
}

/// Maps the many spellings of the electoral lists to a short set of names.
///
/// The regional parties are never merged together. The order of the checks
/// matters: some acronyms are substrings of longer names.
pub fn canonical_party(name: &str) -> String {
    let n = name.trim().to_uppercase();
    let res = match n.as_str() {
        "" => "Otros",
        s if s.contains("ADELANTE") || s.contains("AA") => "Adelante Andalucía",
        s if s.contains("AXSI") || s.contains("ANDALUCIA POR SI") => "AxSi",
        s if s == "PA" || s == "PSA" || s.contains("PARTIDO ANDALUCISTA") => "PA",
        s if s == "CA"
            || s.contains("COALICION ANDALUCISTA")
            || s.contains("COALICIÓN ANDALUCISTA") =>
        {
            "CA"
        }
        s if s == "NA" || s.contains("NACION ANDALUZA") || s.contains("NACIÓN ANDALUZA") => "NA",
        s if s.contains("PCPA") => "PCPA",
        s if s.contains("RISA") => "RISA",
        s if s.contains("IZAR") => "IZAR",
        s if s.contains("PRAO") => "PRAO",
        s if s.contains("PNDEA") => "PNdeA",
        s if s.contains("PSOE") => "PSOE",
        s if s.contains("PP") || s.contains("POPULAR") => "PP",
        s if s.contains("VOX") => "VOX",
        s if s.contains("CIUDADANOS") || s.contains("CS") => "Cs",
        s if s.contains("PODEMOS") => "Podemos",
        s if s.contains("IULV") || s.contains("IZQUIERDA UNIDA") || s.contains("IU") => "IU",
        _ => "Otros",
    };
    res.to_string()
}

/// A number cell. Empty cells are missing values.
pub fn parse_number(cell: &str, lineno: usize) -> BCliResult<Option<f64>> {
    let s = cell.trim();
    if s.is_empty() {
        return Ok(None);
    }
    match s.parse::<f64>() {
        Ok(x) => Ok(Some(x)),
        Err(_) => Err(Box::new(AnalysisCliError::ParsingNumber {
            lineno,
            content: s.to_string(),
        })),
    }
}

/// The positions of the columns of the long format.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct LongFormatColumns {
    election: usize,
    province: usize,
    municipality: usize,
    party: Option<usize>,
    party_short: Option<usize>,
    votes: usize,
    census: usize,
    abstention: usize,
    voters: Option<usize>,
}

impl LongFormatColumns {
    pub fn from_header(header: &[String], path: &str) -> BCliResult<LongFormatColumns> {
        let positions: HashMap<&str, usize> = header
            .iter()
            .enumerate()
            .map(|(idx, h)| (h.trim().trim_start_matches('\u{feff}'), idx))
            .collect();
        let required = |name: &str| -> BCliResult<usize> {
            match positions.get(name) {
                Some(idx) => Ok(*idx),
                None => Err(Box::new(AnalysisCliError::MissingColumn {
                    name: name.to_string(),
                    path: path.to_string(),
                })),
            }
        };
        let res = LongFormatColumns {
            election: required(COL_ELECTION)?,
            province: required(COL_PROVINCE)?,
            municipality: required(COL_MUNICIPALITY)?,
            party: positions.get(COL_PARTY).cloned(),
            party_short: positions.get(COL_PARTY_SHORT).cloned(),
            votes: required(COL_VOTES)?,
            census: required(COL_CENSUS)?,
            abstention: required(COL_ABSTENTION)?,
            voters: positions.get(COL_VOTERS).cloned(),
        };
        if res.party.is_none() && res.party_short.is_none() {
            return Err(Box::new(AnalysisCliError::MissingColumn {
                name: COL_PARTY.to_string(),
                path: path.to_string(),
            }));
        }
        debug!("LongFormatColumns: {:?}", res);
        Ok(res)
    }

    /// Parses one data row. The line number is only used for the messages.
    pub fn read_row(&self, cells: &[String], lineno: usize) -> BCliResult<VoteRow> {
        let municipality = match cell(cells, self.municipality, lineno)?.trim() {
            "" => None,
            s => Some(s.to_string()),
        };
        let party_raw = opt_cell(cells, self.party)
            .or_else(|| opt_cell(cells, self.party_short))
            .unwrap_or("");
        let voters = match self.voters {
            Some(idx) => parse_number(cell(cells, idx, lineno)?, lineno)?,
            None => None,
        };
        Ok(VoteRow {
            election: cell(cells, self.election, lineno)?.trim().to_string(),
            province: cell(cells, self.province, lineno)?.trim().to_string(),
            municipality,
            party: canonical_party(party_raw),
            votes: parse_number(cell(cells, self.votes, lineno)?, lineno)?.unwrap_or(0.0),
            census: parse_number(cell(cells, self.census, lineno)?, lineno)?.unwrap_or(f64::NAN),
            abstention: parse_number(cell(cells, self.abstention, lineno)?, lineno)?
                .unwrap_or(f64::NAN),
            voters: voters.unwrap_or(f64::NAN),
        })
    }
}

fn cell(cells: &[String], idx: usize, lineno: usize) -> BCliResult<&str> {
    match cells.get(idx) {
        Some(s) => Ok(s.as_str()),
        None => Err(Box::new(AnalysisCliError::LineTooShort { lineno })),
    }
}

fn opt_cell(cells: &[String], idx: Option<usize>) -> Option<&str> {
    idx.and_then(|i| cells.get(i))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn party_names() {
        assert_eq!(canonical_party("PSOE-A"), "PSOE");
        assert_eq!(canonical_party("PARTIDO POPULAR"), "PP");
        assert_eq!(canonical_party("PP"), "PP");
        assert_eq!(canonical_party("C's"), "Otros");
        assert_eq!(canonical_party("CIUDADANOS-PARTIDO DE LA CIUDADANIA"), "Cs");
        assert_eq!(canonical_party("ADELANTE ANDALUCÍA"), "Adelante Andalucía");
        assert_eq!(canonical_party("PA"), "PA");
        assert_eq!(canonical_party("IULV-CA"), "IU");
        assert_eq!(canonical_party("AXSI"), "AxSi");
        assert_eq!(canonical_party("vox"), "VOX");
        assert_eq!(canonical_party("UPyD"), "Otros");
        assert_eq!(canonical_party(""), "Otros");
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number(" 12 ", 1).unwrap(), Some(12.0));
        assert_eq!(parse_number("", 1).unwrap(), None);
        assert!(parse_number("doce", 1).is_err());
    }

    fn header() -> Vec<String> {
        [
            "Convocatoria",
            "Provincia",
            "Municipio",
            "Partido",
            "nombre_representativo",
            "Votos",
            "Censo",
            "Abstención",
            "Nº votantes",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn reads_a_row() {
        let cols = LongFormatColumns::from_header(&header(), "x.csv").unwrap();
        let cells: Vec<String> = [
            "Convocatoria 2015/03",
            "Sevilla",
            "Utrera",
            "",
            "PSOE",
            "120",
            "1000",
            "",
            "400",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let row = cols.read_row(&cells, 2).unwrap();
        assert_eq!(row.party, "PSOE");
        assert_eq!(row.votes, 120.0);
        assert!(row.abstention.is_nan());
        assert_eq!(row.municipality, Some("Utrera".to_string()));
        assert!(cols.read_row(&cells[..4], 3).is_err());
    }

    #[test]
    fn missing_column() {
        let h: Vec<String> = header().into_iter().filter(|h| h != "Censo").collect();
        assert!(matches!(
            LongFormatColumns::from_header(&h, "x.csv").map_err(|e| *e),
            Err(AnalysisCliError::MissingColumn { .. })
        ));
    }
}
