//! Runtime configuration.
//!
//! Connection settings come from the environment (with `.env` support);
//! dataset file names and source column names come from a JSON datasets
//! file so a new export revision is a config change, not a code change.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Built-in datasets file for the 2021 Calgary exports.
const DEFAULT_DATASETS: &str = include_str!("../config/datasets.json");

#[derive(Debug, Clone)]
pub struct Config {
    /// Only required by commands that touch the database
    pub db_url: Option<String>,
    pub data_dir: PathBuf,
    pub datasets_path: Option<PathBuf>,
    pub connect_retries: u32,
    pub connect_delay: Duration,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            db_url: std::env::var("DB_URL").ok(),
            data_dir: PathBuf::from(
                std::env::var("DATA_DIR").unwrap_or_else(|_| "./datasets".to_string()),
            ),
            datasets_path: std::env::var("DATASETS_CONFIG").ok().map(PathBuf::from),
            connect_retries: std::env::var("DB_CONNECT_RETRIES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            connect_delay: Duration::from_secs(
                std::env::var("DB_CONNECT_DELAY_SECS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3),
            ),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
        })
    }

    pub fn db_url(&self) -> Result<&str> {
        self.db_url.as_deref().context("DB_URL env var missing")
    }

    /// Datasets file from `DATASETS_CONFIG`, or the built-in one.
    pub fn datasets(&self) -> Result<DatasetsConfig> {
        match &self.datasets_path {
            Some(path) => DatasetsConfig::from_path(path),
            None => DatasetsConfig::builtin(),
        }
    }

    pub fn source_path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }
}

// =============================================================================
// Datasets file
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetsConfig {
    pub version: String,
    /// Wards are numbered `1..=ward_count`. The schema only enforces the
    /// lower bound; mapped rows are checked against this count.
    pub ward_count: i32,
    pub election: ElectionConfig,
    pub population: PopulationSource,
    pub crime: RateSource,
    pub disorder: RateSource,
    pub age_gender: AgeGenderSource,
    pub education: CategorySource,
    pub income: CategorySource,
    pub labour_force: LabourForceSource,
    pub transport_mode: CategorySource,
    pub transit_stops: TransitSource,
    pub recreation: CategorySource,
    pub community_services: CategorySource,
    pub election_results: ElectionSource,
}

impl DatasetsConfig {
    pub fn builtin() -> Result<Self> {
        serde_json::from_str(DEFAULT_DATASETS).context("Built-in datasets config is invalid")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read datasets config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse datasets config {}", path.display()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElectionConfig {
    pub election_id: i32,
    pub year: i32,
    pub election_type: String,
    pub election_date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PopulationSource {
    pub file: String,
    pub ward: String,
    pub total: String,
    #[serde(default)]
    pub density: Option<String>,
    #[serde(default)]
    pub households: Option<String>,
}

/// Crime and disorder share one shape: a count and a per-1,000 rate.
#[derive(Debug, Clone, Deserialize)]
pub struct RateSource {
    pub file: String,
    pub ward: String,
    pub total: String,
    pub rate: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgeGenderSource {
    pub file: String,
    pub ward: String,
    pub age_group: String,
    pub male: String,
    pub female: String,
    pub total: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorySource {
    pub file: String,
    pub ward: String,
    #[serde(flatten)]
    pub layout: CategoryLayout,
}

/// How a category topic is laid out in its export.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum CategoryLayout {
    /// One column per category; every column that is not the ward key,
    /// the total column or listed in `exclude` is a category.
    Wide {
        #[serde(default)]
        exclude: Vec<String>,
        #[serde(default)]
        total_column: Option<String>,
        #[serde(default)]
        skip_zero: bool,
    },
    /// Already narrow: a category column plus count and optional percent.
    Long {
        category: String,
        count: String,
        #[serde(default)]
        percent: Option<String>,
        /// Category value marking a per-ward total row, dropped on load.
        #[serde(default)]
        total_label: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabourForceSource {
    pub file: String,
    pub ward: String,
    pub gender: String,
    pub eligible: String,
    pub in_labour_force: String,
    pub employed: String,
    pub self_employed: String,
    pub unemployed: String,
    pub not_in_labour_force: String,
    pub participation_rate: String,
    pub employment_rate: String,
    pub unemployment_rate: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitSource {
    pub file: String,
    pub ward: String,
    pub total: String,
    pub active: String,
    pub inactive: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElectionSource {
    pub file: String,
    pub office_type: String,
    pub ward: String,
    pub candidate: String,
    pub station_code: String,
    pub station_name: String,
    pub station_type: String,
    pub votes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_datasets_parse() {
        let cfg: DatasetsConfig = serde_json::from_str(DEFAULT_DATASETS).unwrap();
        assert_eq!(cfg.ward_count, 14);
        assert_eq!(cfg.election.year, 2021);
        assert_eq!(
            cfg.election.election_date,
            NaiveDate::from_ymd_opt(2021, 10, 18).unwrap()
        );
        assert_eq!(cfg.transit_stops.ward, "ward_num");
    }

    #[test]
    fn test_builtin_layouts() {
        let cfg = DatasetsConfig::builtin().unwrap();
        assert!(matches!(cfg.income.layout, CategoryLayout::Wide { skip_zero: false, .. }));
        assert!(matches!(cfg.recreation.layout, CategoryLayout::Wide { skip_zero: true, .. }));
        match &cfg.education.layout {
            CategoryLayout::Long { category, total_label, .. } => {
                assert_eq!(category, "category");
                assert_eq!(total_label.as_deref(), Some("Total"));
            }
            other => panic!("expected long layout, got {:?}", other),
        }
    }

    #[test]
    fn test_wide_layout_defaults() {
        let json = r#"{"file": "x.csv", "ward": "ward", "layout": "wide"}"#;
        let src: CategorySource = serde_json::from_str(json).unwrap();
        assert_eq!(
            src.layout,
            CategoryLayout::Wide {
                exclude: vec![],
                total_column: None,
                skip_zero: false
            }
        );
    }
}
