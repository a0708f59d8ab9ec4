//! Election identity resolver.
//!
//! Turns the flat per-station results export into the election, race,
//! candidate, candidacy, voting station and result tables. Pure: the same
//! input always yields the same ids.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::config::{ElectionConfig, ElectionSource};
use crate::error::{EtlError, Result};
use crate::model::{
    Candidacy, Candidate, Election, ElectionResult, Race, RaceType, VotingStation,
};
use crate::normalize::{collapse_whitespace, field, parse_count, parse_ward, TopicTable};
use crate::reader::{RawRow, SkippedRow};

#[derive(Debug, Clone, PartialEq)]
pub struct ElectionTables {
    pub election: Election,
    pub races: Vec<Race>,
    pub candidates: Vec<Candidate>,
    pub candidacies: Vec<Candidacy>,
    pub stations: Vec<VotingStation>,
    pub results: Vec<ElectionResult>,
    /// Rows dropped as malformed results
    pub dropped: Vec<SkippedRow>,
}

impl ElectionTables {
    /// Vote sums per (station code, race id).
    pub fn station_totals(&self) -> BTreeMap<(String, i32), i64> {
        let mut totals = BTreeMap::new();
        for r in &self.results {
            *totals
                .entry((r.station_code.clone(), r.race_id))
                .or_insert(0) += r.votes;
        }
        totals
    }
}

/// One export row after field coercion, before identities are assigned.
#[derive(Debug)]
struct ResultRow {
    line: u64,
    race_type: RaceType,
    ward_number: i32,
    candidate: String,
    station_code: String,
    station_name: String,
    station_type: String,
    votes: i64,
}

fn malformed(line: u64, reason: impl Into<String>) -> EtlError {
    EtlError::MalformedResult {
        line,
        reason: reason.into(),
    }
}

/// Dedup key for candidate names: whitespace collapsed, case-folded.
fn candidate_key(name: &str) -> String {
    collapse_whitespace(name).to_lowercase()
}

/// Column positions of the results export.
struct Columns {
    office: usize,
    ward: usize,
    candidate: usize,
    station_code: usize,
    station_name: usize,
    station_type: usize,
    votes: usize,
}

impl Columns {
    fn locate(table: &TopicTable, src: &ElectionSource) -> Result<Self> {
        Ok(Self {
            office: table.column(&src.office_type)?,
            ward: table.column(&src.ward)?,
            candidate: table.column(&src.candidate)?,
            station_code: table.column(&src.station_code)?,
            station_name: table.column(&src.station_name)?,
            station_type: table.column(&src.station_type)?,
            votes: table.column(&src.votes)?,
        })
    }
}

fn coerce_row(row: &RawRow, cols: &Columns, ward_number: i32) -> Result<ResultRow> {
    let office_raw = field(row, cols.office);
    let race_type = RaceType::parse(office_raw)
        .ok_or_else(|| malformed(row.line, format!("unknown office type {office_raw:?}")))?;
    let candidate = collapse_whitespace(field(row, cols.candidate));
    if candidate.is_empty() {
        return Err(malformed(row.line, "blank candidate name"));
    }
    let station_code = field(row, cols.station_code).trim().to_string();
    if station_code.is_empty() {
        return Err(malformed(row.line, "blank voting station code"));
    }
    let votes = parse_count(field(row, cols.votes), row.line, "votes")
        .map_err(|e| malformed(row.line, e.to_string()))?;
    Ok(ResultRow {
        line: row.line,
        race_type,
        ward_number,
        candidate,
        station_code,
        station_name: collapse_whitespace(field(row, cols.station_name)),
        station_type: collapse_whitespace(field(row, cols.station_type)),
        votes,
    })
}

/// The single election row, straight from configuration.
pub fn election_row(config: &ElectionConfig) -> Election {
    Election {
        election_id: config.election_id,
        year: config.year,
        election_type: config.election_type.clone(),
        election_date: config.election_date,
    }
}

pub fn resolve(
    table: &TopicTable,
    src: &ElectionSource,
    config: &ElectionConfig,
) -> Result<ElectionTables> {
    let cols = Columns::locate(table, src)?;

    let mut dropped = Vec::new();
    let mut parsed = Vec::with_capacity(table.rows.len());

    // Pass 1: coerce fields. Ward errors abort; anything else drops the row.
    for row in &table.rows {
        if row.fields.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let ward_number = parse_ward(field(row, cols.ward))?;
        match coerce_row(row, &cols, ward_number) {
            Ok(r) => parsed.push(r),
            Err(e) => dropped.push(SkippedRow {
                line: row.line,
                reason: e.to_string(),
            }),
        }
    }

    // Pass 2: races, then per-row identities.
    let mut races = Vec::new();
    if parsed.iter().any(|r| r.race_type == RaceType::Mayor) {
        races.push(Race {
            race_id: 1,
            election_id: config.election_id,
            race_type: RaceType::Mayor,
            ward_number: None,
        });
    }
    // Every ward in the export gets a councillor race, even one that only
    // appears in mayoral rows.
    let council_wards: BTreeSet<i32> = parsed.iter().map(|r| r.ward_number).collect();
    for w in council_wards {
        races.push(Race {
            race_id: races.len() as i32 + 1,
            election_id: config.election_id,
            race_type: RaceType::Councillor,
            ward_number: Some(w),
        });
    }
    let race_ids: HashMap<(RaceType, Option<i32>), i32> = races
        .iter()
        .map(|r| ((r.race_type, r.ward_number), r.race_id))
        .collect();

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut candidate_ids: HashMap<String, i32> = HashMap::new();
    let mut candidacies = Vec::new();
    let mut seen_candidacies = HashSet::new();
    let mut stations: Vec<VotingStation> = Vec::new();
    let mut station_wards: HashMap<String, i32> = HashMap::new();
    let mut results = Vec::new();
    let mut seen_results = HashSet::new();

    for row in parsed {
        let race_ward = match row.race_type {
            RaceType::Mayor => None,
            RaceType::Councillor => Some(row.ward_number),
        };
        let Some(&race_id) = race_ids.get(&(row.race_type, race_ward)) else {
            continue;
        };

        if let Some(&known) = station_wards.get(&row.station_code) {
            if known != row.ward_number {
                dropped.push(SkippedRow {
                    line: row.line,
                    reason: malformed(
                        row.line,
                        format!(
                            "station {} listed under ward {} and ward {}",
                            row.station_code, known, row.ward_number
                        ),
                    )
                    .to_string(),
                });
                continue;
            }
        }

        let key = candidate_key(&row.candidate);
        let next_id = candidates.len() as i32 + 1;
        let candidate_id = *candidate_ids.entry(key).or_insert_with(|| {
            candidates.push(Candidate {
                candidate_id: next_id,
                name: row.candidate.clone(),
            });
            next_id
        });

        if !seen_results.insert((row.station_code.clone(), candidate_id, race_id)) {
            dropped.push(SkippedRow {
                line: row.line,
                reason: malformed(row.line, "duplicate result for station, candidate and race")
                    .to_string(),
            });
            continue;
        }

        if !station_wards.contains_key(&row.station_code) {
            station_wards.insert(row.station_code.clone(), row.ward_number);
            stations.push(VotingStation {
                station_code: row.station_code.clone(),
                ward_number: row.ward_number,
                station_name: row.station_name,
                station_type: row.station_type,
            });
        }

        let candidacy = Candidacy {
            candidate_id,
            race_id,
        };
        if seen_candidacies.insert(candidacy.clone()) {
            candidacies.push(candidacy);
        }

        results.push(ElectionResult {
            station_code: row.station_code,
            candidate_id,
            race_id,
            votes: row.votes,
        });
    }

    for d in &dropped {
        debug!(line = d.line, reason = %d.reason, "dropped election result");
    }
    if !dropped.is_empty() {
        warn!(file = %table.file, dropped = dropped.len(), "dropped malformed election results");
    }
    info!(
        races = races.len(),
        candidates = candidates.len(),
        stations = stations.len(),
        results = results.len(),
        "resolved election identities"
    );

    Ok(ElectionTables {
        election: election_row(config),
        races,
        candidates,
        candidacies,
        stations,
        results,
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasetsConfig;
    use crate::reader::{read_bytes, LATIN1};

    const HEADER: &str =
        "officetype,ward,candidatename,votingstationcode,votingstation,votingstationtype,votes\n";

    fn resolve_csv(body: &str) -> Result<ElectionTables> {
        let csv = format!("{HEADER}{body}");
        let table = TopicTable::from(read_bytes("results.csv", csv.as_bytes(), LATIN1).unwrap());
        let cfg = DatasetsConfig::builtin().unwrap();
        resolve(&table, &cfg.election_results, &cfg.election)
    }

    // -------------------------------------------------------------------------
    // CANDIDATE IDENTITY
    // -------------------------------------------------------------------------

    #[test]
    fn test_one_candidate_across_stations() {
        let body: String = (1..=10)
            .map(|i| {
                format!(
                    "COUNCILLOR,WARD 3,Jane Smith,S{i:03},Station {i},Regular,{}\n",
                    i * 10
                )
            })
            .collect();
        let tables = resolve_csv(&body).unwrap();
        assert_eq!(tables.candidates.len(), 1);
        assert_eq!(tables.candidates[0].name, "Jane Smith");
        assert_eq!(tables.results.len(), 10);
        assert_eq!(tables.candidacies.len(), 1);
        assert_eq!(tables.stations.len(), 10);
        assert!(tables.results.iter().all(|r| r.candidate_id == 1));
    }

    #[test]
    fn test_candidate_names_merge_on_case_and_whitespace() {
        let tables = resolve_csv(
            "MAYOR,1,Jane Smith,A1,Hall,Regular,5\n\
             MAYOR,1,JANE  SMITH,A2,School,Regular,7\n\
             MAYOR,1,john doe,A1,Hall,Regular,3\n",
        )
        .unwrap();
        let names: Vec<&str> = tables.candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Jane Smith", "john doe"]);
        assert_eq!(tables.results[1].candidate_id, 1);
    }

    // -------------------------------------------------------------------------
    // RACES
    // -------------------------------------------------------------------------

    #[test]
    fn test_race_structure() {
        let tables = resolve_csv(
            "COUNCILLOR,WARD 7,A,S1,x,Regular,1\n\
             MAYOR,WARD 7,M,S1,x,Regular,2\n\
             COUNCILLOR,WARD 2,B,S2,y,Advance,3\n\
             MAYOR,WARD 2,M,S2,y,Advance,4\n",
        )
        .unwrap();
        let races: Vec<(i32, RaceType, Option<i32>)> = tables
            .races
            .iter()
            .map(|r| (r.race_id, r.race_type, r.ward_number))
            .collect();
        assert_eq!(
            races,
            vec![
                (1, RaceType::Mayor, None),
                (2, RaceType::Councillor, Some(2)),
                (3, RaceType::Councillor, Some(7)),
            ]
        );
        // one mayoral candidacy despite two stations
        assert_eq!(tables.candidacies.len(), 3);
        assert_eq!(tables.stations.len(), 2);
    }

    #[test]
    fn test_mayor_only_ward_gets_councillor_race() {
        let tables = resolve_csv(
            "MAYOR,1,M,S1,x,Regular,5\n\
             COUNCILLOR,1,A,S1,x,Regular,4\n\
             MAYOR,2,M,S2,y,Regular,6\n",
        )
        .unwrap();
        let council: Vec<Option<i32>> = tables
            .races
            .iter()
            .filter(|r| r.race_type == RaceType::Councillor)
            .map(|r| r.ward_number)
            .collect();
        assert_eq!(council, vec![Some(1), Some(2)]);
        // no councillor rows for ward 2, so its race has no candidacies
        assert_eq!(tables.candidacies.len(), 2);
        assert!(tables.results.iter().all(|r| r.race_id != 3));
    }

    #[test]
    fn test_no_mayor_rows_means_no_mayor_race() {
        let tables = resolve_csv("COUNCILLOR,1,A,S1,x,Regular,1\n").unwrap();
        assert_eq!(tables.races.len(), 1);
        assert_eq!(tables.races[0].race_id, 1);
        assert_eq!(tables.races[0].race_type, RaceType::Councillor);
    }

    // -------------------------------------------------------------------------
    // VOTES
    // -------------------------------------------------------------------------

    #[test]
    fn test_vote_sum_invariant() {
        let tables = resolve_csv(
            "MAYOR,1,A,S1,x,Regular,\"1,200\"\n\
             MAYOR,1,B,S1,x,Regular,300\n\
             MAYOR,2,A,S2,y,Regular,50\n\
             COUNCILLOR,1,C,S1,x,Regular,900\n",
        )
        .unwrap();
        let totals = tables.station_totals();
        assert_eq!(totals[&("S1".to_string(), 1)], 1500);
        assert_eq!(totals[&("S2".to_string(), 1)], 50);
        assert_eq!(totals[&("S1".to_string(), 2)], 900);
        let grand: i64 = totals.values().sum();
        assert_eq!(grand, tables.results.iter().map(|r| r.votes).sum::<i64>());
    }

    #[test]
    fn test_malformed_votes_dropped_and_counted() {
        let tables = resolve_csv(
            "MAYOR,1,A,S1,x,Regular,10\n\
             MAYOR,1,B,S1,x,Regular,ten\n\
             MAYOR,1,C,S1,x,Regular,-4\n",
        )
        .unwrap();
        assert_eq!(tables.results.len(), 1);
        assert_eq!(tables.dropped.len(), 2);
        assert_eq!(tables.dropped[0].line, 3);
        // dropped rows never create candidates
        assert_eq!(tables.candidates.len(), 1);
    }

    #[test]
    fn test_conflicting_rows_dropped() {
        let tables = resolve_csv(
            "MAYOR,1,A,S1,x,Regular,10\n\
             MAYOR,1,A,S1,x,Regular,11\n\
             MAYOR,2,A,S1,x,Regular,12\n\
             TRUSTEE,1,Z,S1,x,Regular,1\n\
             MAYOR,1,,S1,x,Regular,1\n",
        )
        .unwrap();
        assert_eq!(tables.results.len(), 1);
        assert_eq!(tables.results[0].votes, 10);
        assert_eq!(tables.dropped.len(), 4);
        assert!(tables.dropped.iter().any(|d| d.reason.contains("unknown office type")));
    }

    #[test]
    fn test_invalid_ward_is_fatal() {
        let err = resolve_csv("MAYOR,WARD,A,S1,x,Regular,10\n").unwrap_err();
        assert!(matches!(err, EtlError::InvalidWardIdentifier { .. }));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let body = "COUNCILLOR,4,B,S9,x,Regular,1\n\
                    MAYOR,4,A,S9,x,Regular,2\n\
                    COUNCILLOR,1,C,S1,y,Regular,3\n";
        assert_eq!(resolve_csv(body).unwrap(), resolve_csv(body).unwrap());
    }

    #[test]
    fn test_election_from_config() {
        let tables = resolve_csv("MAYOR,1,A,S1,x,Regular,1\n").unwrap();
        assert_eq!(tables.election.year, 2021);
        assert_eq!(tables.election.election_type, "Municipal");
        assert!(tables.races.iter().all(|r| r.election_id == tables.election.election_id));
    }
}
