//! Load orchestration.
//!
//! Topics run in a fixed order, each one read, mapped, validated and
//! written on its own. A topic that fails is recorded in the
//! [`LoadReport`] and the run moves on.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{error, info};

use crate::config::{Config, DatasetsConfig};
use crate::election::{election_row, resolve};
use crate::error::Result;
use crate::mapper::{
    map_age_gender, map_category, map_labour_force, map_population, map_rate,
    map_transit_stops, validate_wards, Mapped,
};
use crate::model::{
    ward_dimension, Candidacy, Candidate, CommunityService, ElectionResult, Race,
    VotingStation, Ward, WardCrime, WardDisorder, WardEducation, WardIncome, WardRecreation,
    WardScoped, WardTransportMode,
};
use crate::normalize::TopicTable;
use crate::reader::{read_file, LATIN1};
use crate::store::{Store, TableOutcome, TableRows, TableStatus};

/// Tables whose failure makes the whole run fail.
pub const CRITICAL_TABLES: &[&str] = &[
    "ward",
    "election",
    "race",
    "candidate",
    "candidacy",
    "voting_station",
    "election_result",
];

#[derive(Debug, Clone, PartialEq)]
pub struct TopicReport {
    pub topic: &'static str,
    pub file: String,
    pub content_hash: Option<String>,
    pub rows_read: usize,
    pub fallback_rows: usize,
    pub skipped: usize,
    pub error: Option<String>,
    pub tables: Vec<TableOutcome>,
}

impl TopicReport {
    fn new(topic: &'static str, file: &str) -> Self {
        Self {
            topic,
            file: file.to_string(),
            content_hash: None,
            rows_read: 0,
            fallback_rows: 0,
            skipped: 0,
            error: None,
            tables: Vec::new(),
        }
    }

    fn record_read(&mut self, table: &TopicTable) {
        self.content_hash = Some(table.content_hash.clone());
        self.rows_read = table.rows.len();
        self.fallback_rows = table.fallback_rows;
        self.skipped += table.read_skipped.len();
    }

    fn fail(&mut self, tables: &[&'static str], reason: String) {
        error!(topic = self.topic, file = %self.file, error = %reason, "topic failed");
        for &table in tables {
            self.tables.push(TableOutcome::failed(table, reason.clone()));
        }
        self.error = Some(reason);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub topics: Vec<TopicReport>,
}

impl LoadReport {
    pub fn outcomes(&self) -> impl Iterator<Item = &TableOutcome> {
        self.topics.iter().flat_map(|t| t.tables.iter())
    }

    pub fn outcome(&self, table: &str) -> Option<&TableOutcome> {
        self.outcomes().find(|o| o.table == table)
    }

    pub fn has_critical_failure(&self) -> bool {
        CRITICAL_TABLES
            .iter()
            .any(|t| self.outcome(t).is_some_and(|o| !o.is_ok()))
    }

    pub fn total_skipped(&self) -> usize {
        self.topics.iter().map(|t| t.skipped).sum()
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Load Summary ===")?;
        for topic in &self.topics {
            write!(
                f,
                "\n[{}] {} read {} rows, skipped {}",
                topic.topic, topic.file, topic.rows_read, topic.skipped
            )?;
            if topic.fallback_rows > 0 {
                write!(f, ", {} decoded as Latin-1", topic.fallback_rows)?;
            }
            writeln!(f)?;
            if let Some(hash) = &topic.content_hash {
                writeln!(f, "  {}", hash)?;
            }
            if let Some(e) = &topic.error {
                writeln!(f, "  error: {}", e)?;
            }
            for outcome in &topic.tables {
                writeln!(f, "  {}", outcome)?;
            }
        }
        let failed = self.outcomes().filter(|o| !o.is_ok()).count();
        writeln!(
            f,
            "\n{} tables, {} not loaded, {} rows skipped",
            self.outcomes().count(),
            failed,
            self.total_skipped()
        )?;
        if self.has_critical_failure() {
            writeln!(f, "CRITICAL: a ward or election table did not load")?;
        }
        Ok(())
    }
}

/// One load run. `store` is `None` for a dry run.
pub struct Pipeline<'a> {
    config: &'a Config,
    datasets: &'a DatasetsConfig,
    store: Option<&'a Store>,
    known_wards: BTreeSet<i32>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, datasets: &'a DatasetsConfig, store: Option<&'a Store>) -> Self {
        Self {
            config,
            datasets,
            store,
            known_wards: (1..=datasets.ward_count).collect(),
        }
    }

    pub async fn run(&self) -> LoadReport {
        let ds = self.datasets;
        let mut report = LoadReport::default();

        report.topics.push(self.load_wards().await);

        report.topics.push(
            self.ward_topic("population", &ds.population.file, |t| {
                map_population(t, &ds.population)
            })
            .await,
        );
        report.topics.push(
            self.ward_topic("crime", &ds.crime.file, |t| {
                map_rate(t, &ds.crime).map(Mapped::convert::<WardCrime>)
            })
            .await,
        );
        report.topics.push(
            self.ward_topic("disorder", &ds.disorder.file, |t| {
                map_rate(t, &ds.disorder).map(Mapped::convert::<WardDisorder>)
            })
            .await,
        );
        report.topics.push(
            self.ward_topic("age_gender", &ds.age_gender.file, |t| {
                map_age_gender(t, &ds.age_gender)
            })
            .await,
        );
        report.topics.push(
            self.ward_topic("education", &ds.education.file, |t| {
                map_category(t, &ds.education).map(Mapped::convert::<WardEducation>)
            })
            .await,
        );
        report.topics.push(
            self.ward_topic("income", &ds.income.file, |t| {
                map_category(t, &ds.income).map(Mapped::convert::<WardIncome>)
            })
            .await,
        );
        report.topics.push(
            self.ward_topic("labour_force", &ds.labour_force.file, |t| {
                map_labour_force(t, &ds.labour_force)
            })
            .await,
        );
        report.topics.push(
            self.ward_topic("transport_mode", &ds.transport_mode.file, |t| {
                map_category(t, &ds.transport_mode).map(Mapped::convert::<WardTransportMode>)
            })
            .await,
        );
        report.topics.push(
            self.ward_topic("transit_stops", &ds.transit_stops.file, |t| {
                map_transit_stops(t, &ds.transit_stops)
            })
            .await,
        );
        report.topics.push(
            self.ward_topic("recreation", &ds.recreation.file, |t| {
                map_category(t, &ds.recreation).map(Mapped::convert::<WardRecreation>)
            })
            .await,
        );
        report.topics.push(
            self.ward_topic("community_services", &ds.community_services.file, |t| {
                map_category(t, &ds.community_services).map(Mapped::convert::<CommunityService>)
            })
            .await,
        );

        report.topics.push(self.load_election().await);

        info!(
            topics = report.topics.len(),
            skipped = report.total_skipped(),
            critical_failure = report.has_critical_failure(),
            "load finished"
        );
        report
    }

    fn read(&self, file: &str) -> Result<TopicTable> {
        let raw = read_file(&self.config.source_path(file), LATIN1)?;
        info!(file, rows = raw.rows.len(), encoding = raw.encoding.name(), "read source file");
        Ok(TopicTable::from(raw))
    }

    async fn write<T: TableRows>(&self, rows: &[T]) -> TableOutcome {
        match self.store {
            Some(store) => store.write_table(rows).await,
            None => TableOutcome::new(T::TABLE, TableStatus::DryRun(rows.len())),
        }
    }

    async fn load_wards(&self) -> TopicReport {
        let wards: Vec<Ward> = ward_dimension(self.datasets.ward_count);
        let mut report = TopicReport::new("ward", "-");
        report.rows_read = wards.len();
        report.tables.push(self.write(&wards).await);
        report
    }

    async fn ward_topic<T, F>(&self, topic: &'static str, file: &str, map: F) -> TopicReport
    where
        T: TableRows + WardScoped,
        F: FnOnce(&TopicTable) -> Result<Mapped<T>>,
    {
        let mut report = TopicReport::new(topic, file);

        let table = match self.read(file) {
            Ok(t) => t,
            Err(e) => {
                report.fail(&[T::TABLE], e.to_string());
                return report;
            }
        };
        report.record_read(&table);

        let mapped = match map(&table) {
            Ok(m) => m,
            Err(e) => {
                report.fail(&[T::TABLE], e.to_string());
                return report;
            }
        };
        report.skipped += mapped.skipped.len();

        if let Err(e) = validate_wards(T::TABLE, &mapped.rows, &self.known_wards) {
            report.fail(&[T::TABLE], e.to_string());
            return report;
        }

        info!(topic, rows = mapped.rows.len(), skipped = report.skipped, "topic mapped");
        report.tables.push(self.write(&mapped.rows).await);
        report
    }

    async fn load_election(&self) -> TopicReport {
        let src = &self.datasets.election_results;
        let mut report = TopicReport::new("election", &src.file);
        let dependents = [
            Race::TABLE,
            Candidate::TABLE,
            VotingStation::TABLE,
            Candidacy::TABLE,
            ElectionResult::TABLE,
        ];

        let resolved = self.read(&src.file).and_then(|table| {
            report.record_read(&table);
            resolve(&table, src, &self.datasets.election)
        });

        let election = match &resolved {
            Ok(tables) => [tables.election.clone()],
            Err(_) => [election_row(&self.datasets.election)],
        };
        let election_outcome = self.write(&election).await;
        let election_ok = election_outcome.is_ok();
        report.tables.push(election_outcome);

        let tables = match resolved {
            Ok(t) => t,
            Err(e) => {
                report.fail(&dependents, e.to_string());
                return report;
            }
        };
        report.skipped += tables.dropped.len();
        let total_votes: i64 = tables.station_totals().values().sum();
        info!(results = tables.results.len(), total_votes, "election resolved");

        let race = if election_ok {
            self.write(&tables.races).await
        } else {
            skipped(Race::TABLE, "election")
        };
        let candidate = self.write(&tables.candidates).await;
        let stations_valid =
            validate_wards(VotingStation::TABLE, &tables.stations, &self.known_wards);
        let station = match stations_valid {
            Ok(()) => self.write(&tables.stations).await,
            Err(e) => TableOutcome::failed(VotingStation::TABLE, e.to_string()),
        };

        let candidacy = match failed_dependency(&[&race, &candidate]) {
            None => self.write(&tables.candidacies).await,
            Some(dep) => skipped(Candidacy::TABLE, dep),
        };
        let result = match failed_dependency(&[&race, &candidate, &station]) {
            None => self.write(&tables.results).await,
            Some(dep) => skipped(ElectionResult::TABLE, dep),
        };

        report.tables.extend([race, candidate, station, candidacy, result]);
        report
    }
}

fn failed_dependency(deps: &[&TableOutcome]) -> Option<&'static str> {
    deps.iter().find(|o| !o.is_ok()).map(|o| o.table)
}

fn skipped(table: &'static str, dependency: &str) -> TableOutcome {
    TableOutcome::new(
        table,
        TableStatus::Skipped(format!("{} did not load", dependency)),
    )
}
