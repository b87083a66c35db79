// From the long format to one tally per unit and election.

use std::collections::{BTreeMap, BTreeSet};

use crate::analysis::{
    io_common::{unit_id, UNAVAILABLE_MUNICIPALITY},
    *,
};

pub const ABSTENTION_FEATURE: &str = "Abstencion";

/// The results of one unit in one election.
#[derive(PartialEq, Debug, Clone)]
pub struct UnitTally {
    pub province: String,
    pub municipality: String,
    /// Votes by canonical party.
    pub votes: BTreeMap<String, f64>,
    pub census: f64,
    pub abstention: f64,
}

impl UnitTally {
    /// Share of the census. An empty census counts as 1.
    fn share(&self, count: f64) -> f64 {
        let denominator = if self.census == 0.0 { 1.0 } else { self.census };
        count / denominator
    }
}

/// The tallies of the start election and, if selected, of the end election.
///
/// With an end election, only the units present in both are kept.
#[derive(PartialEq, Debug, Clone)]
pub struct ElectionTables {
    pub start: BTreeMap<String, UnitTally>,
    pub end: Option<BTreeMap<String, UnitTally>>,
}

pub fn build_tables(rows: &[VoteRow], selection: &Selection) -> BCliResult<ElectionTables> {
    let mut start = tally_election(rows, &selection.start_election, selection);
    info!(
        "build_tables: {} units in {:?}",
        start.len(),
        selection.start_election
    );
    if start.is_empty() {
        return Err(Box::new(AnalysisCliError::NoRecords {
            election: selection.start_election.clone(),
        }));
    }
    let end = match selection.end_election.as_ref() {
        None => None,
        Some(election) => {
            let mut end = tally_election(rows, election, selection);
            info!("build_tables: {} units in {:?}", end.len(), election);
            if end.is_empty() {
                return Err(Box::new(AnalysisCliError::NoRecords {
                    election: election.clone(),
                }));
            }
            let only_start: Vec<String> = start
                .keys()
                .filter(|id| !end.contains_key(*id))
                .cloned()
                .collect();
            let only_end: Vec<String> = end
                .keys()
                .filter(|id| !start.contains_key(*id))
                .cloned()
                .collect();
            if !only_start.is_empty() || !only_end.is_empty() {
                warn!(
                    "build_tables: dropping units present in a single election: {:?} {:?}",
                    only_start, only_end
                );
            }
            for id in only_start.iter() {
                start.remove(id);
            }
            for id in only_end.iter() {
                end.remove(id);
            }
            if start.is_empty() {
                return Err(Box::new(AnalysisCliError::NoRecords {
                    election: format!("{} and {}", selection.start_election, election),
                }));
            }
            Some(end)
        }
    };
    Ok(ElectionTables { start, end })
}

/// The distinct elections of the rows, sorted.
pub fn election_names(rows: &[VoteRow]) -> Vec<String> {
    let names: BTreeSet<&String> = rows.iter().map(|r| &r.election).collect();
    names.into_iter().cloned().collect()
}

fn tally_election(
    rows: &[VoteRow],
    election: &str,
    selection: &Selection,
) -> BTreeMap<String, UnitTally> {
    let mut res: BTreeMap<String, UnitTally> = BTreeMap::new();
    // The census and the abstention are repeated on every party row. They are
    // only counted once per distinct (census, abstention, voters).
    let mut seen_stats: BTreeMap<String, BTreeSet<(u64, u64, u64)>> = BTreeMap::new();
    let mut skipped: usize = 0;
    for row in rows.iter().filter(|r| r.election == election) {
        let municipality = match row.municipality.as_deref() {
            None | Some(UNAVAILABLE_MUNICIPALITY) => {
                skipped += 1;
                continue;
            }
            Some(m) => m,
        };
        if let Some(p) = selection.province.as_ref() {
            if *p != row.province {
                continue;
            }
        }
        if let Some(m) = selection.municipality.as_ref() {
            if m != municipality {
                continue;
            }
        }
        let id = unit_id(&row.province, municipality);
        let tally = res.entry(id.clone()).or_insert_with(|| UnitTally {
            province: row.province.clone(),
            municipality: municipality.to_string(),
            votes: BTreeMap::new(),
            census: 0.0,
            abstention: 0.0,
        });
        *tally.votes.entry(row.party.clone()).or_insert(0.0) += row.votes;
        let key = (
            row.census.to_bits(),
            row.abstention.to_bits(),
            row.voters.to_bits(),
        );
        if seen_stats.entry(id).or_insert_with(BTreeSet::new).insert(key) {
            tally.census += row.census;
            tally.abstention += row.abstention;
        }
    }
    if skipped > 0 {
        debug!(
            "tally_election: {:?}: {} aggregation rows skipped",
            election, skipped
        );
    }
    res
}

fn parties(tallies: &BTreeMap<String, UnitTally>) -> Vec<String> {
    let names: BTreeSet<&String> = tallies.values().flat_map(|t| t.votes.keys()).collect();
    names.into_iter().cloned().collect()
}

/// The features of every unit in the start election: the votes of each party
/// and the abstention, as shares of the census.
pub fn build_dataset(tables: &ElectionTables) -> BCliResult<Dataset> {
    let mut feature_names = parties(&tables.start);
    feature_names.push(ABSTENTION_FEATURE.to_string());
    let units: Vec<ElectoralUnit> = tables
        .start
        .iter()
        .map(|(id, t)| {
            let mut features: Vec<f64> = feature_names
                .iter()
                .take(feature_names.len() - 1)
                .map(|p| t.share(t.votes.get(p).cloned().unwrap_or(0.0)))
                .collect();
            features.push(t.share(t.abstention));
            ElectoralUnit {
                id: id.clone(),
                region: Some(t.province.clone()),
                municipality_code: None,
                features,
            }
        })
        .collect();
    debug!("build_dataset: features: {:?}", feature_names);
    let dataset = Dataset::new(&feature_names, units)
        .context(AnalysisSnafu {})?
        .with_abstention_feature(ABSTENTION_FEATURE)
        .context(AnalysisSnafu {})?;
    Ok(dataset)
}

/// The vote counts of the two elections, by unit, for the transfer estimation.
#[derive(PartialEq, Debug, Clone)]
pub struct TransferRows {
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    pub rows: BTreeMap<String, (Vec<f64>, Vec<f64>)>,
}

impl TransferRows {
    /// Total votes of every source, over the given units.
    pub fn source_totals<'a, I>(&self, ids: I) -> Vec<f64>
    where
        I: Iterator<Item = &'a String>,
    {
        let mut res = vec![0.0; self.sources.len()];
        for id in ids {
            if let Some((src, _)) = self.rows.get(id) {
                for (acc, x) in res.iter_mut().zip(src.iter()) {
                    *acc += x;
                }
            }
        }
        res
    }
}

pub fn transfer_rows(
    start: &BTreeMap<String, UnitTally>,
    end: &BTreeMap<String, UnitTally>,
) -> TransferRows {
    let counts = |t: &UnitTally, names: &[String]| -> Vec<f64> {
        let mut v: Vec<f64> = names
            .iter()
            .map(|p| t.votes.get(p).cloned().unwrap_or(0.0))
            .collect();
        v.push(if t.abstention.is_finite() { t.abstention } else { 0.0 });
        v
    };
    let source_parties = parties(start);
    let target_parties = parties(end);
    let rows: BTreeMap<String, (Vec<f64>, Vec<f64>)> = start
        .iter()
        .filter_map(|(id, s)| {
            end.get(id)
                .map(|e| (id.clone(), (counts(s, &source_parties), counts(e, &target_parties))))
        })
        .collect();
    let with_abstention = |mut names: Vec<String>| {
        names.push(ABSTENTION_FEATURE.to_string());
        names
    };
    TransferRows {
        sources: with_abstention(source_parties),
        targets: with_abstention(target_parties),
        rows,
    }
}
