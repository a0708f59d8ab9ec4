//! Postgres writer.
//!
//! `Store` owns the connection pool for the lifetime of a run. Every table
//! is written in its own transaction and reported as a [`TableOutcome`];
//! a failed table never stops the ones after it.

use std::fmt;

use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::query_builder::Separated;
use sqlx::{PgPool, QueryBuilder};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{EtlError, Result};
use crate::model::{
    Candidacy, Candidate, CommunityService, Election, ElectionResult, Race, VotingStation, Ward,
    WardAgeGender, WardCrime, WardDisorder, WardEducation, WardIncome, WardLabourForce,
    WardPopulation, WardRecreation, WardTransitStops, WardTransportMode,
};
use crate::schema::{truncate_sql, SCHEMA};

/// Rows per INSERT statement; keeps the widest table under the bind limit.
const BATCH_ROWS: usize = 1000;

pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect with bounded retry and a fixed delay between attempts.
    pub async fn connect(config: &Config) -> Result<Self> {
        let url = config
            .db_url()
            .map_err(|e| EtlError::Config(e.to_string()))?;
        let attempts = config.connect_retries.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(url)
                .await;
            match result {
                Ok(pool) => {
                    info!(attempt, "database connected");
                    return Ok(Self { pool });
                }
                Err(e) if attempt < attempts => {
                    warn!(attempt, attempts, error = %e, "database connection failed, retrying");
                    tokio::time::sleep(config.connect_delay).await;
                }
                Err(source) => {
                    return Err(EtlError::ConnectionFailure {
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("schema migrated");
        Ok(())
    }

    pub async fn truncate(&self) -> Result<()> {
        let sql = truncate_sql();
        sqlx::query(&sql).execute(&self.pool).await?;
        info!("pipeline tables truncated");
        Ok(())
    }

    /// Insert `rows` into `T::TABLE` in one transaction.
    pub async fn write_table<T: TableRows>(&self, rows: &[T]) -> TableOutcome {
        match self.insert_rows(rows).await {
            Ok(n) => {
                info!(table = T::TABLE, rows = n, "table loaded");
                TableOutcome::new(T::TABLE, TableStatus::Loaded(n))
            }
            Err(e) => {
                warn!(table = T::TABLE, error = %e, "table load failed");
                TableOutcome::new(T::TABLE, TableStatus::Failed(e.to_string()))
            }
        }
    }

    async fn insert_rows<T: TableRows>(&self, rows: &[T]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for chunk in rows.chunks(BATCH_ROWS) {
            let mut qb = insert_statement(chunk);
            inserted += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }
}

fn insert_statement<T: TableRows>(rows: &[T]) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        T::TABLE,
        T::COLUMNS.join(", ")
    ));
    qb.push_values(rows, |mut b, row| row.bind_row(&mut b));
    qb
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TableStatus {
    Loaded(u64),
    /// Rows that would have been written
    DryRun(usize),
    Failed(String),
    /// Not attempted because a table it depends on failed
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableOutcome {
    pub table: &'static str,
    pub status: TableStatus,
}

impl TableOutcome {
    pub fn new(table: &'static str, status: TableStatus) -> Self {
        Self { table, status }
    }

    pub fn failed(table: &'static str, reason: impl Into<String>) -> Self {
        Self::new(table, TableStatus::Failed(reason.into()))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, TableStatus::Loaded(_) | TableStatus::DryRun(_))
    }
}

impl fmt::Display for TableOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            TableStatus::Loaded(n) => write!(f, "{:<22} loaded {} rows", self.table, n),
            TableStatus::DryRun(n) => write!(f, "{:<22} {} rows (dry run)", self.table, n),
            TableStatus::Failed(reason) => write!(f, "{:<22} FAILED: {}", self.table, reason),
            TableStatus::Skipped(reason) => write!(f, "{:<22} SKIPPED: {}", self.table, reason),
        }
    }
}

// =============================================================================
// Row binding
// =============================================================================

/// A row type with a target table. Column order in `COLUMNS` matches the
/// order `bind_row` pushes values.
pub trait TableRows {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>);
}

impl TableRows for Ward {
    const TABLE: &'static str = "ward";
    const COLUMNS: &'static [&'static str] = &["ward_number", "ward_name"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.ward_number).push_bind(self.ward_name.clone());
    }
}

impl TableRows for WardPopulation {
    const TABLE: &'static str = "ward_population";
    const COLUMNS: &'static [&'static str] =
        &["ward_number", "total", "density", "total_households"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.ward_number)
            .push_bind(self.total)
            .push_bind(self.density)
            .push_bind(self.total_households);
    }
}

impl TableRows for WardCrime {
    const TABLE: &'static str = "ward_crime";
    const COLUMNS: &'static [&'static str] = &["ward_number", "total", "rate_per_1000"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.ward_number)
            .push_bind(self.total)
            .push_bind(self.rate_per_1000);
    }
}

impl TableRows for WardDisorder {
    const TABLE: &'static str = "ward_disorder";
    const COLUMNS: &'static [&'static str] = &["ward_number", "total", "rate_per_1000"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.ward_number)
            .push_bind(self.total)
            .push_bind(self.rate_per_1000);
    }
}

impl TableRows for WardAgeGender {
    const TABLE: &'static str = "ward_age_gender";
    const COLUMNS: &'static [&'static str] =
        &["ward_number", "age_group", "male_count", "female_count", "total"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.ward_number)
            .push_bind(self.age_group.clone())
            .push_bind(self.male_count)
            .push_bind(self.female_count)
            .push_bind(self.total);
    }
}

impl TableRows for WardEducation {
    const TABLE: &'static str = "ward_education";
    const COLUMNS: &'static [&'static str] =
        &["ward_number", "education_level", "count", "percent"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.ward_number)
            .push_bind(self.education_level.clone())
            .push_bind(self.count)
            .push_bind(self.percent);
    }
}

impl TableRows for WardIncome {
    const TABLE: &'static str = "ward_income";
    const COLUMNS: &'static [&'static str] = &["ward_number", "income_group", "household_count"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.ward_number)
            .push_bind(self.income_group.clone())
            .push_bind(self.household_count);
    }
}

impl TableRows for WardLabourForce {
    const TABLE: &'static str = "ward_labour_force";
    const COLUMNS: &'static [&'static str] = &[
        "ward_number",
        "gender",
        "eligible",
        "in_labour_force",
        "employed",
        "self_employed",
        "unemployed",
        "not_in_labour_force",
        "participation_rate",
        "employment_rate",
        "unemployment_rate",
    ];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.ward_number)
            .push_bind(self.gender.clone())
            .push_bind(self.eligible)
            .push_bind(self.in_labour_force)
            .push_bind(self.employed)
            .push_bind(self.self_employed)
            .push_bind(self.unemployed)
            .push_bind(self.not_in_labour_force)
            .push_bind(self.participation_rate)
            .push_bind(self.employment_rate)
            .push_bind(self.unemployment_rate);
    }
}

impl TableRows for WardTransportMode {
    const TABLE: &'static str = "ward_transport_mode";
    const COLUMNS: &'static [&'static str] = &["ward_number", "transport_mode", "count", "percent"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.ward_number)
            .push_bind(self.transport_mode.clone())
            .push_bind(self.count)
            .push_bind(self.percent);
    }
}

impl TableRows for WardTransitStops {
    const TABLE: &'static str = "ward_transit_stops";
    const COLUMNS: &'static [&'static str] = &["ward_number", "total", "active", "inactive"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.ward_number)
            .push_bind(self.total)
            .push_bind(self.active)
            .push_bind(self.inactive);
    }
}

impl TableRows for WardRecreation {
    const TABLE: &'static str = "ward_recreation";
    const COLUMNS: &'static [&'static str] = &["ward_number", "facility_type", "count"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.ward_number)
            .push_bind(self.facility_type.clone())
            .push_bind(self.count);
    }
}

impl TableRows for CommunityService {
    const TABLE: &'static str = "community_services";
    const COLUMNS: &'static [&'static str] = &["ward_number", "service_type", "count"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.ward_number)
            .push_bind(self.service_type.clone())
            .push_bind(self.count);
    }
}

impl TableRows for Election {
    const TABLE: &'static str = "election";
    const COLUMNS: &'static [&'static str] =
        &["election_id", "year", "election_type", "election_date"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.election_id)
            .push_bind(self.year)
            .push_bind(self.election_type.clone())
            .push_bind(self.election_date);
    }
}

impl TableRows for Race {
    const TABLE: &'static str = "race";
    const COLUMNS: &'static [&'static str] = &["race_id", "election_id", "type", "ward_number"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.race_id)
            .push_bind(self.election_id)
            .push_bind(self.race_type.as_str())
            .push_bind(self.ward_number);
    }
}

impl TableRows for Candidate {
    const TABLE: &'static str = "candidate";
    const COLUMNS: &'static [&'static str] = &["candidate_id", "name"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.candidate_id).push_bind(self.name.clone());
    }
}

impl TableRows for Candidacy {
    const TABLE: &'static str = "candidacy";
    const COLUMNS: &'static [&'static str] = &["candidate_id", "race_id"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.candidate_id).push_bind(self.race_id);
    }
}

impl TableRows for VotingStation {
    const TABLE: &'static str = "voting_station";
    const COLUMNS: &'static [&'static str] =
        &["station_code", "ward_number", "station_name", "station_type"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.station_code.clone())
            .push_bind(self.ward_number)
            .push_bind(self.station_name.clone())
            .push_bind(self.station_type.clone());
    }
}

impl TableRows for ElectionResult {
    const TABLE: &'static str = "election_result";
    const COLUMNS: &'static [&'static str] = &["station_code", "candidate_id", "race_id", "votes"];

    fn bind_row(&self, b: &mut Separated<'_, 'static, Postgres, &'static str>) {
        b.push_bind(self.station_code.clone())
            .push_bind(self.candidate_id)
            .push_bind(self.race_id)
            .push_bind(self.votes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ward_dimension, RaceType};

    #[test]
    fn test_insert_statement_shape() {
        let wards = ward_dimension(2);
        let qb = insert_statement(&wards);
        assert!(qb
            .sql()
            .starts_with("INSERT INTO ward (ward_number, ward_name) VALUES"));
        assert!(qb.sql().contains("($1, $2), ($3, $4)"));
    }

    #[test]
    fn test_race_binds_type_column() {
        let races = vec![Race {
            race_id: 1,
            election_id: 1,
            race_type: RaceType::Mayor,
            ward_number: None,
        }];
        let qb = insert_statement(&races);
        assert!(qb.sql().contains("(race_id, election_id, type, ward_number)"));
    }

    #[test]
    fn test_batch_stays_under_bind_limit() {
        let widest = WardLabourForce::COLUMNS.len();
        assert!(BATCH_ROWS * widest < u16::MAX as usize);
    }

    #[test]
    fn test_every_column_exists_in_schema() {
        let columns: &[(&str, &[&str])] = &[
            (WardPopulation::TABLE, WardPopulation::COLUMNS),
            (WardLabourForce::TABLE, WardLabourForce::COLUMNS),
            (CommunityService::TABLE, CommunityService::COLUMNS),
            (ElectionResult::TABLE, ElectionResult::COLUMNS),
            (VotingStation::TABLE, VotingStation::COLUMNS),
        ];
        for (table, cols) in columns {
            let start = SCHEMA
                .find(&format!("CREATE TABLE IF NOT EXISTS {} (", table))
                .unwrap();
            let body = &SCHEMA[start..start + SCHEMA[start..].find(");").unwrap()];
            for col in *cols {
                assert!(body.contains(col), "{}.{} missing from DDL", table, col);
            }
        }
    }

    #[test]
    fn test_outcome_display() {
        let ok = TableOutcome::new("ward", TableStatus::Loaded(14));
        assert!(ok.is_ok());
        assert!(ok.to_string().contains("loaded 14 rows"));
        let failed = TableOutcome::failed("race", "duplicate key");
        assert!(!failed.is_ok());
        assert!(failed.to_string().contains("FAILED: duplicate key"));
    }
}
