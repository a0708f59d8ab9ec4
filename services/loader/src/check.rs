//! Consistency checker.
//!
//! Inspects a loaded database and reports what it finds. Query failures
//! are recorded in the report, never raised.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::schema::{EXPECTED_TABLES, WARD_SCOPED_TABLES};

const SAMPLE_ROWS: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct TableCheck {
    pub table: &'static str,
    pub exists: bool,
    pub row_count: Option<i64>,
    pub sample: Vec<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WardCompleteness {
    pub missing: Vec<i32>,
    pub duplicates: Vec<i32>,
}

impl WardCompleteness {
    pub fn from_numbers(numbers: &[i32], ward_count: i32) -> Self {
        let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
        for &n in numbers {
            *counts.entry(n).or_insert(0) += 1;
        }
        Self {
            missing: (1..=ward_count).filter(|n| !counts.contains_key(n)).collect(),
            duplicates: counts
                .into_iter()
                .filter(|(_, c)| *c > 1)
                .map(|(n, _)| n)
                .collect(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.duplicates.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrphanCheck {
    /// e.g. `election_result.race_id -> race`
    pub relation: String,
    pub orphans: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckReport {
    pub tables: Vec<TableCheck>,
    pub wards: Option<WardCompleteness>,
    pub orphans: Vec<OrphanCheck>,
    /// Per-ward vote totals through `voting_station`
    pub ward_votes: Vec<(i32, i64)>,
    pub errors: Vec<String>,
}

impl CheckReport {
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for t in &self.tables {
            if !t.exists {
                issues.push(format!("table {} does not exist", t.table));
            } else if let Some(e) = &t.error {
                issues.push(format!("table {}: {}", t.table, e));
            } else if t.row_count == Some(0) {
                issues.push(format!("table {} is empty", t.table));
            }
        }
        match &self.wards {
            Some(w) => {
                if !w.missing.is_empty() {
                    issues.push(format!("wards missing: {:?}", w.missing));
                }
                if !w.duplicates.is_empty() {
                    issues.push(format!("wards duplicated: {:?}", w.duplicates));
                }
            }
            None => issues.push("ward completeness not checked".to_string()),
        }
        for o in self.orphans.iter().filter(|o| o.orphans > 0) {
            issues.push(format!("{} orphan rows in {}", o.orphans, o.relation));
        }
        if self.ward_votes.is_empty() {
            issues.push("no per-ward vote totals".to_string());
        }
        issues.extend(self.errors.iter().cloned());
        issues
    }

    pub fn passed(&self) -> bool {
        self.issues().is_empty()
    }

    /// Issues are advisory unless the caller asked for a strict check.
    pub fn blocks(&self, strict: bool) -> bool {
        strict && !self.passed()
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Consistency Check ===")?;
        for t in &self.tables {
            let status = match (t.exists, t.row_count) {
                (false, _) => "MISSING".to_string(),
                (true, Some(n)) => format!("{} rows", n),
                (true, None) => "unreadable".to_string(),
            };
            writeln!(f, "  {:<22} {}", t.table, status)?;
            for row in &t.sample {
                writeln!(f, "      {}", row)?;
            }
        }

        if let Some(w) = &self.wards {
            writeln!(
                f,
                "\nWard completeness: {}",
                if w.is_complete() { "OK" } else { "FAILED" }
            )?;
        }
        if !self.orphans.is_empty() {
            writeln!(f, "\nReferential integrity:")?;
            for o in &self.orphans {
                writeln!(f, "  {:<45} {} orphans", o.relation, o.orphans)?;
            }
        }
        if !self.ward_votes.is_empty() {
            writeln!(f, "\nVotes by ward:")?;
            for (ward, votes) in &self.ward_votes {
                writeln!(f, "  Ward {:<3} {}", ward, votes)?;
            }
        }

        let issues = self.issues();
        if issues.is_empty() {
            writeln!(f, "\nPASSED")
        } else {
            writeln!(f, "\nFAILED ({} issues)", issues.len())?;
            for issue in issues {
                writeln!(f, "  - {}", issue)?;
            }
            Ok(())
        }
    }
}

// =============================================================================
// Queries
// =============================================================================

pub async fn run_checks(pool: &PgPool, ward_count: i32) -> CheckReport {
    let mut report = CheckReport::default();

    for &table in EXPECTED_TABLES {
        report.tables.push(check_table(pool, table).await);
    }

    match sqlx::query_scalar::<_, i32>("SELECT ward_number FROM ward ORDER BY ward_number")
        .fetch_all(pool)
        .await
    {
        Ok(numbers) => report.wards = Some(WardCompleteness::from_numbers(&numbers, ward_count)),
        Err(e) => report.errors.push(format!("ward completeness: {}", e)),
    }

    for (relation, sql) in orphan_queries() {
        match sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await {
            Ok(orphans) => report.orphans.push(OrphanCheck { relation, orphans }),
            Err(e) => report.errors.push(format!("{}: {}", relation, e)),
        }
    }

    let votes_sql = r#"
        SELECT vs.ward_number, SUM(er.votes)::bigint AS total_votes
        FROM election_result er
        JOIN voting_station vs ON vs.station_code = er.station_code
        GROUP BY vs.ward_number
        ORDER BY vs.ward_number
    "#;
    match sqlx::query_as::<_, (i32, i64)>(votes_sql).fetch_all(pool).await {
        Ok(rows) => report.ward_votes = rows,
        Err(e) => report.errors.push(format!("votes by ward: {}", e)),
    }

    let issues = report.issues();
    if issues.is_empty() {
        info!("consistency check passed");
    } else {
        warn!(issues = issues.len(), "consistency check found issues");
    }
    report
}

async fn check_table(pool: &PgPool, table: &'static str) -> TableCheck {
    let mut check = TableCheck {
        table,
        exists: false,
        row_count: None,
        sample: Vec::new(),
        error: None,
    };

    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name = $1
        )
        "#,
    )
    .bind(table)
    .fetch_one(pool)
    .await;
    match exists {
        Ok(e) => check.exists = e,
        Err(e) => {
            check.error = Some(e.to_string());
            return check;
        }
    }
    if !check.exists {
        return check;
    }

    let count_sql = format!("SELECT COUNT(*) FROM {}", table);
    match sqlx::query_scalar::<_, i64>(&count_sql).fetch_one(pool).await {
        Ok(n) => check.row_count = Some(n),
        Err(e) => {
            check.error = Some(e.to_string());
            return check;
        }
    }

    let sample_sql = format!(
        "SELECT row_to_json(t) FROM (SELECT * FROM {} LIMIT {}) t",
        table, SAMPLE_ROWS
    );
    match sqlx::query_scalar::<_, Value>(&sample_sql).fetch_all(pool).await {
        Ok(rows) => check.sample = rows,
        Err(e) => check.error = Some(e.to_string()),
    }
    check
}

/// Election relations as (child, key, parent); the parent key has the same name.
const ELECTION_RELATIONS: &[(&str, &str, &str)] = &[
    ("election_result", "station_code", "voting_station"),
    ("election_result", "candidate_id", "candidate"),
    ("election_result", "race_id", "race"),
    ("candidacy", "candidate_id", "candidate"),
    ("candidacy", "race_id", "race"),
];

/// (relation, SQL counting rows whose foreign key has no parent).
fn orphan_queries() -> Vec<(String, String)> {
    let mut queries: Vec<(String, String)> = WARD_SCOPED_TABLES
        .iter()
        .map(|&t| (t, "ward_number", "ward"))
        .chain(ELECTION_RELATIONS.iter().copied())
        .map(|(child, key, parent)| {
            let sql = format!(
                "SELECT COUNT(*) FROM {child} c WHERE NOT EXISTS \
                 (SELECT 1 FROM {parent} p WHERE p.{key} = c.{key})"
            );
            (format!("{}.{} -> {}", child, key, parent), sql)
        })
        .collect();
    // the mayoral race has no ward
    queries.push((
        "race.ward_number -> ward".to_string(),
        "SELECT COUNT(*) FROM race c WHERE c.ward_number IS NOT NULL AND NOT EXISTS \
         (SELECT 1 FROM ward p WHERE p.ward_number = c.ward_number)"
            .to_string(),
    ));
    queries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &'static str, rows: i64) -> TableCheck {
        TableCheck {
            table: name,
            exists: true,
            row_count: Some(rows),
            sample: Vec::new(),
            error: None,
        }
    }

    fn healthy() -> CheckReport {
        CheckReport {
            tables: vec![table("ward", 14), table("election_result", 3000)],
            wards: Some(WardCompleteness::from_numbers(&(1..=14).collect::<Vec<_>>(), 14)),
            orphans: vec![OrphanCheck {
                relation: "election_result.race_id -> race".to_string(),
                orphans: 0,
            }],
            ward_votes: vec![(1, 12_000), (2, 9_500)],
            errors: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // WARD COMPLETENESS
    // -------------------------------------------------------------------------

    #[test]
    fn test_ward_completeness_ok() {
        let w = WardCompleteness::from_numbers(&(1..=14).collect::<Vec<_>>(), 14);
        assert!(w.is_complete());
    }

    #[test]
    fn test_ward_completeness_missing_and_duplicate() {
        let w = WardCompleteness::from_numbers(&[1, 2, 2, 4], 4);
        assert_eq!(w.missing, vec![3]);
        assert_eq!(w.duplicates, vec![2]);
        assert!(!w.is_complete());
    }

    // -------------------------------------------------------------------------
    // REPORT
    // -------------------------------------------------------------------------

    #[test]
    fn test_healthy_report_passes() {
        let report = healthy();
        assert!(report.passed());
        assert!(report.to_string().contains("PASSED"));
    }

    #[test]
    fn test_missing_table_and_orphans_fail() {
        let mut report = healthy();
        report.tables.push(TableCheck {
            exists: false,
            row_count: None,
            ..table("candidacy", 0)
        });
        report.orphans[0].orphans = 3;
        let issues = report.issues();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("candidacy does not exist"));
        assert!(issues[1].contains("3 orphan rows"));
        assert!(report.to_string().contains("FAILED (2 issues)"));
    }

    #[test]
    fn test_empty_votes_fail() {
        let mut report = healthy();
        report.ward_votes.clear();
        assert!(!report.passed());
    }

    #[test]
    fn test_query_errors_are_issues() {
        let mut report = healthy();
        report.errors.push("votes by ward: relation does not exist".to_string());
        assert!(!report.passed());
    }

    #[test]
    fn test_issues_only_block_strict_checks() {
        let mut report = healthy();
        report.tables.push(table("ward_crime", 0));
        assert!(!report.passed());
        assert!(!report.blocks(false));
        assert!(report.blocks(true));
        assert!(!healthy().blocks(true));
    }

    #[test]
    fn test_orphan_queries_cover_relations() {
        let queries = orphan_queries();
        assert_eq!(queries.len(), WARD_SCOPED_TABLES.len() + 6);
        let (relation, sql) = &queries[0];
        assert_eq!(relation, "ward_population.ward_number -> ward");
        assert!(sql.contains("FROM ward_population c WHERE NOT EXISTS"));
        assert!(queries
            .iter()
            .any(|(r, _)| r == "election_result.station_code -> voting_station"));
    }
}
