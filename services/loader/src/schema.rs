//! Normalized schema DDL.

/// Pipeline tables in load order. The checker walks the same list.
pub const EXPECTED_TABLES: &[&str] = &[
    "ward",
    "ward_population",
    "ward_crime",
    "ward_disorder",
    "ward_age_gender",
    "ward_education",
    "ward_income",
    "ward_labour_force",
    "ward_transport_mode",
    "ward_transit_stops",
    "ward_recreation",
    "community_services",
    "election",
    "race",
    "candidate",
    "candidacy",
    "voting_station",
    "election_result",
];

/// Ward-scoped tables, checked for orphans against `ward`.
pub const WARD_SCOPED_TABLES: &[&str] = &[
    "ward_population",
    "ward_crime",
    "ward_disorder",
    "ward_age_gender",
    "ward_education",
    "ward_income",
    "ward_labour_force",
    "ward_transport_mode",
    "ward_transit_stops",
    "ward_recreation",
    "community_services",
    "voting_station",
];

/// Idempotent DDL for every pipeline table.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ward (
    ward_number INTEGER PRIMARY KEY CHECK (ward_number >= 1),
    ward_name   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ward_population (
    ward_number      INTEGER PRIMARY KEY REFERENCES ward(ward_number),
    total            BIGINT NOT NULL CHECK (total >= 0),
    density          DOUBLE PRECISION CHECK (density >= 0),
    total_households BIGINT CHECK (total_households >= 0)
);

CREATE TABLE IF NOT EXISTS ward_crime (
    ward_number   INTEGER PRIMARY KEY REFERENCES ward(ward_number),
    total         BIGINT NOT NULL CHECK (total >= 0),
    rate_per_1000 DOUBLE PRECISION NOT NULL CHECK (rate_per_1000 >= 0)
);

CREATE TABLE IF NOT EXISTS ward_disorder (
    ward_number   INTEGER PRIMARY KEY REFERENCES ward(ward_number),
    total         BIGINT NOT NULL CHECK (total >= 0),
    rate_per_1000 DOUBLE PRECISION NOT NULL CHECK (rate_per_1000 >= 0)
);

CREATE TABLE IF NOT EXISTS ward_age_gender (
    ward_number  INTEGER NOT NULL REFERENCES ward(ward_number),
    age_group    TEXT NOT NULL,
    male_count   BIGINT NOT NULL CHECK (male_count >= 0),
    female_count BIGINT NOT NULL CHECK (female_count >= 0),
    total        BIGINT NOT NULL CHECK (total >= 0),
    PRIMARY KEY (ward_number, age_group)
);

CREATE TABLE IF NOT EXISTS ward_education (
    ward_number     INTEGER NOT NULL REFERENCES ward(ward_number),
    education_level TEXT NOT NULL,
    count           BIGINT NOT NULL CHECK (count >= 0),
    percent         DOUBLE PRECISION CHECK (percent >= 0),
    PRIMARY KEY (ward_number, education_level)
);

CREATE TABLE IF NOT EXISTS ward_income (
    ward_number     INTEGER NOT NULL REFERENCES ward(ward_number),
    income_group    TEXT NOT NULL,
    household_count BIGINT NOT NULL CHECK (household_count >= 0),
    PRIMARY KEY (ward_number, income_group)
);

CREATE TABLE IF NOT EXISTS ward_labour_force (
    ward_number         INTEGER NOT NULL REFERENCES ward(ward_number),
    gender              TEXT NOT NULL,
    eligible            BIGINT NOT NULL CHECK (eligible >= 0),
    in_labour_force     BIGINT NOT NULL CHECK (in_labour_force >= 0),
    employed            BIGINT NOT NULL CHECK (employed >= 0),
    self_employed       BIGINT NOT NULL CHECK (self_employed >= 0),
    unemployed          BIGINT NOT NULL CHECK (unemployed >= 0),
    not_in_labour_force BIGINT NOT NULL CHECK (not_in_labour_force >= 0),
    participation_rate  DOUBLE PRECISION NOT NULL CHECK (participation_rate >= 0),
    employment_rate     DOUBLE PRECISION NOT NULL CHECK (employment_rate >= 0),
    unemployment_rate   DOUBLE PRECISION NOT NULL CHECK (unemployment_rate >= 0),
    PRIMARY KEY (ward_number, gender)
);

CREATE TABLE IF NOT EXISTS ward_transport_mode (
    ward_number    INTEGER NOT NULL REFERENCES ward(ward_number),
    transport_mode TEXT NOT NULL,
    count          BIGINT NOT NULL CHECK (count >= 0),
    percent        DOUBLE PRECISION CHECK (percent >= 0),
    PRIMARY KEY (ward_number, transport_mode)
);

CREATE TABLE IF NOT EXISTS ward_transit_stops (
    ward_number INTEGER PRIMARY KEY REFERENCES ward(ward_number),
    total       BIGINT NOT NULL CHECK (total >= 0),
    active      BIGINT NOT NULL CHECK (active >= 0),
    inactive    BIGINT NOT NULL CHECK (inactive >= 0)
);

CREATE TABLE IF NOT EXISTS ward_recreation (
    ward_number   INTEGER NOT NULL REFERENCES ward(ward_number),
    facility_type TEXT NOT NULL,
    count         BIGINT NOT NULL CHECK (count >= 0),
    PRIMARY KEY (ward_number, facility_type)
);

CREATE TABLE IF NOT EXISTS community_services (
    ward_number  INTEGER NOT NULL REFERENCES ward(ward_number),
    service_type TEXT NOT NULL,
    count        BIGINT NOT NULL CHECK (count >= 0),
    PRIMARY KEY (ward_number, service_type)
);

CREATE TABLE IF NOT EXISTS election (
    election_id   INTEGER PRIMARY KEY,
    year          INTEGER NOT NULL,
    election_type TEXT NOT NULL,
    election_date DATE NOT NULL
);

CREATE TABLE IF NOT EXISTS race (
    race_id     INTEGER PRIMARY KEY,
    election_id INTEGER NOT NULL REFERENCES election(election_id),
    type        TEXT NOT NULL CHECK (type IN ('MAYOR', 'COUNCILLOR')),
    ward_number INTEGER REFERENCES ward(ward_number),
    CHECK ((type = 'MAYOR') = (ward_number IS NULL))
);

CREATE UNIQUE INDEX IF NOT EXISTS race_one_mayor
    ON race (election_id) WHERE type = 'MAYOR';
CREATE UNIQUE INDEX IF NOT EXISTS race_one_councillor_per_ward
    ON race (election_id, ward_number) WHERE type = 'COUNCILLOR';

CREATE TABLE IF NOT EXISTS candidate (
    candidate_id INTEGER PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS candidacy (
    candidate_id INTEGER NOT NULL REFERENCES candidate(candidate_id),
    race_id      INTEGER NOT NULL REFERENCES race(race_id),
    PRIMARY KEY (candidate_id, race_id)
);

CREATE TABLE IF NOT EXISTS voting_station (
    station_code TEXT PRIMARY KEY,
    ward_number  INTEGER NOT NULL REFERENCES ward(ward_number),
    station_name TEXT NOT NULL,
    station_type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS election_result (
    station_code TEXT NOT NULL REFERENCES voting_station(station_code),
    candidate_id INTEGER NOT NULL REFERENCES candidate(candidate_id),
    race_id      INTEGER NOT NULL REFERENCES race(race_id),
    votes        BIGINT NOT NULL CHECK (votes >= 0),
    PRIMARY KEY (station_code, candidate_id, race_id)
);

CREATE INDEX IF NOT EXISTS election_result_race ON election_result (race_id);
"#;

/// Empty every pipeline table for a clean append-mode reload.
pub fn truncate_sql() -> String {
    format!(
        "TRUNCATE TABLE {} RESTART IDENTITY CASCADE",
        EXPECTED_TABLES.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creates_every_expected_table() {
        for table in EXPECTED_TABLES {
            let ddl = format!("CREATE TABLE IF NOT EXISTS {} (", table);
            assert!(SCHEMA.contains(&ddl), "missing DDL for {}", table);
        }
    }

    #[test]
    fn test_ward_scoped_tables_reference_ward() {
        for table in WARD_SCOPED_TABLES {
            assert!(EXPECTED_TABLES.contains(table));
        }
        assert_eq!(SCHEMA.matches("REFERENCES ward(ward_number)").count(), 13);
    }

    #[test]
    fn test_ward_upper_bound_left_to_config() {
        assert!(SCHEMA.contains("ward_number INTEGER PRIMARY KEY CHECK (ward_number >= 1)"));
        assert!(!SCHEMA.contains("BETWEEN"));
    }

    #[test]
    fn test_truncate_sql() {
        let sql = truncate_sql();
        assert!(sql.starts_with("TRUNCATE TABLE ward, ward_population"));
        assert!(sql.ends_with("election_result RESTART IDENTITY CASCADE"));
    }
}
