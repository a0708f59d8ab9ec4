//! Row types of the normalized schema, one struct per table.

use chrono::NaiveDate;

/// Rows keyed by a ward; validated against the ward dimension before writing.
pub trait WardScoped {
    fn ward_number(&self) -> i32;
}

macro_rules! ward_scoped {
    ($($ty:ty),* $(,)?) => {
        $(impl WardScoped for $ty {
            fn ward_number(&self) -> i32 {
                self.ward_number
            }
        })*
    };
}

ward_scoped!(
    WardPopulation,
    WardAgeGender,
    WardCrime,
    WardDisorder,
    WardEducation,
    WardIncome,
    WardLabourForce,
    WardTransportMode,
    WardTransitStops,
    WardRecreation,
    CommunityService,
    VotingStation,
);

#[derive(Debug, Clone, PartialEq)]
pub struct Ward {
    pub ward_number: i32,
    pub ward_name: String,
}

/// The ward dimension: wards `1..=count`, named "Ward n".
pub fn ward_dimension(count: i32) -> Vec<Ward> {
    (1..=count)
        .map(|n| Ward {
            ward_number: n,
            ward_name: format!("Ward {n}"),
        })
        .collect()
}

// =============================================================================
// Demographic fact tables
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct WardPopulation {
    pub ward_number: i32,
    pub total: i64,
    pub density: Option<f64>,
    pub total_households: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WardAgeGender {
    pub ward_number: i32,
    pub age_group: String,
    pub male_count: i64,
    pub female_count: i64,
    pub total: i64,
}

/// Count plus rate per 1,000 residents; shared by crime and disorder.
#[derive(Debug, Clone, PartialEq)]
pub struct RateRow {
    pub ward_number: i32,
    pub total: i64,
    pub rate_per_1000: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WardCrime {
    pub ward_number: i32,
    pub total: i64,
    pub rate_per_1000: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WardDisorder {
    pub ward_number: i32,
    pub total: i64,
    pub rate_per_1000: f64,
}

impl From<RateRow> for WardCrime {
    fn from(r: RateRow) -> Self {
        Self {
            ward_number: r.ward_number,
            total: r.total,
            rate_per_1000: r.rate_per_1000,
        }
    }
}

impl From<RateRow> for WardDisorder {
    fn from(r: RateRow) -> Self {
        Self {
            ward_number: r.ward_number,
            total: r.total,
            rate_per_1000: r.rate_per_1000,
        }
    }
}

/// One (ward, category) measure from a category topic, wide or long.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRow {
    pub ward_number: i32,
    pub category: String,
    pub count: i64,
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WardEducation {
    pub ward_number: i32,
    pub education_level: String,
    pub count: i64,
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WardIncome {
    pub ward_number: i32,
    pub income_group: String,
    pub household_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WardTransportMode {
    pub ward_number: i32,
    pub transport_mode: String,
    pub count: i64,
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WardRecreation {
    pub ward_number: i32,
    pub facility_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommunityService {
    pub ward_number: i32,
    pub service_type: String,
    pub count: i64,
}

impl From<CategoryRow> for WardEducation {
    fn from(r: CategoryRow) -> Self {
        Self {
            ward_number: r.ward_number,
            education_level: r.category,
            count: r.count,
            percent: r.percent,
        }
    }
}

impl From<CategoryRow> for WardIncome {
    fn from(r: CategoryRow) -> Self {
        Self {
            ward_number: r.ward_number,
            income_group: r.category,
            household_count: r.count,
        }
    }
}

impl From<CategoryRow> for WardTransportMode {
    fn from(r: CategoryRow) -> Self {
        Self {
            ward_number: r.ward_number,
            transport_mode: r.category,
            count: r.count,
            percent: r.percent,
        }
    }
}

impl From<CategoryRow> for WardRecreation {
    fn from(r: CategoryRow) -> Self {
        Self {
            ward_number: r.ward_number,
            facility_type: r.category,
            count: r.count,
        }
    }
}

impl From<CategoryRow> for CommunityService {
    fn from(r: CategoryRow) -> Self {
        Self {
            ward_number: r.ward_number,
            service_type: r.category,
            count: r.count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WardLabourForce {
    pub ward_number: i32,
    pub gender: String,
    pub eligible: i64,
    pub in_labour_force: i64,
    pub employed: i64,
    pub self_employed: i64,
    pub unemployed: i64,
    pub not_in_labour_force: i64,
    pub participation_rate: f64,
    pub employment_rate: f64,
    pub unemployment_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WardTransitStops {
    pub ward_number: i32,
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
}

// =============================================================================
// Election dimension and fact tables
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Election {
    pub election_id: i32,
    pub year: i32,
    pub election_type: String,
    pub election_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RaceType {
    Mayor,
    Councillor,
}

impl RaceType {
    pub fn as_str(self) -> &'static str {
        match self {
            RaceType::Mayor => "MAYOR",
            RaceType::Councillor => "COUNCILLOR",
        }
    }

    /// Office type as written in the results export, any case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MAYOR" => Some(RaceType::Mayor),
            "COUNCILLOR" | "COUNCILOR" => Some(RaceType::Councillor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Race {
    pub race_id: i32,
    pub election_id: i32,
    pub race_type: RaceType,
    /// `None` for the mayoral race
    pub ward_number: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub candidate_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidacy {
    pub candidate_id: i32,
    pub race_id: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VotingStation {
    pub station_code: String,
    pub ward_number: i32,
    pub station_name: String,
    pub station_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElectionResult {
    pub station_code: String,
    pub candidate_id: i32,
    pub race_id: i32,
    pub votes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ward_dimension_is_complete() {
        let wards = ward_dimension(14);
        let numbers: Vec<i32> = wards.iter().map(|w| w.ward_number).collect();
        assert_eq!(numbers, (1..=14).collect::<Vec<_>>());
        assert_eq!(wards[6].ward_name, "Ward 7");
    }

    #[test]
    fn test_race_type_parse() {
        assert_eq!(RaceType::parse("MAYOR"), Some(RaceType::Mayor));
        assert_eq!(RaceType::parse(" Councillor "), Some(RaceType::Councillor));
        assert_eq!(RaceType::parse("PUBLIC SCHOOL TRUSTEE"), None);
        assert_eq!(RaceType::Councillor.as_str(), "COUNCILLOR");
    }
}
