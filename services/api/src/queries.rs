//! Query catalog: the dataset browser views and the curated
//! correlation queries. All derived measures live here, not in the loader.

/// Assumed household income per bracket, used for the weighted average.
/// The open-ended top bracket is pinned at 250k.
pub const INCOME_MIDPOINTS: &[(&str, f64)] = &[
    ("Under $20,000", 10_000.0),
    ("$20,000 to $39,999", 30_000.0),
    ("$40,000 to $59,999", 50_000.0),
    ("$60,000 to $79,999", 70_000.0),
    ("$80,000 to $99,999", 90_000.0),
    ("$100,000 to $124,999", 112_500.0),
    ("$125,000 to $149,999", 137_500.0),
    ("$150,000 to $199,999", 175_000.0),
    ("$200,000 and over", 250_000.0),
];

#[derive(Debug, Clone)]
pub struct NamedQuery {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub sql: String,
    /// Row order, over the query's output columns.
    pub order_by: &'static str,
}

impl NamedQuery {
    fn new(
        id: &'static str,
        title: &'static str,
        description: &'static str,
        body: &str,
        order_by: &'static str,
    ) -> Self {
        Self {
            id,
            title,
            description,
            sql: format!("{}\nORDER BY {}", body.trim(), order_by),
            order_by,
        }
    }

    /// Wrap the query so Postgres returns its rows as one JSON array, in order.
    pub fn as_json_array(&self) -> String {
        format!(
            "SELECT COALESCE(json_agg(q ORDER BY {}), '[]'::json) FROM ({}) q",
            self.order_by, self.sql
        )
    }
}

/// Mayoral votes per ward over ward population, as a percentage.
const MAYORAL_TURNOUT: &str = r#"
    SELECT
        vs.ward_number,
        wp.total AS population,
        SUM(er.votes) AS total_votes,
        ROUND(100.0 * SUM(er.votes)::numeric / NULLIF(wp.total, 0), 2) AS turnout_rate
    FROM election_result er
    JOIN voting_station vs ON er.station_code = vs.station_code
    JOIN ward_population wp ON vs.ward_number = wp.ward_number
    JOIN race r ON er.race_id = r.race_id
    WHERE r.type = 'MAYOR'
    GROUP BY vs.ward_number, wp.total
"#;

// =============================================================================
// Dataset browser
// =============================================================================

/// Browsable tables with their natural ordering.
const DATASET_TABLES: &[(&str, &str, &str)] = &[
    ("ward", "Ward dimension", "ward_number"),
    ("ward_population", "Population per ward", "ward_number"),
    ("ward_age_gender", "Population by age group and gender", "ward_number, age_group"),
    ("ward_crime", "Crime counts and rate per 1,000 residents", "ward_number"),
    ("ward_disorder", "Disorder counts and rate per 1,000 residents", "ward_number"),
    ("ward_education", "Highest education level", "ward_number, education_level"),
    ("ward_income", "Households by income bracket", "ward_number, income_group"),
    ("ward_labour_force", "Labour force by gender", "ward_number, gender"),
    ("ward_transport_mode", "Commute transport mode", "ward_number, transport_mode"),
    ("ward_transit_stops", "Transit stops", "ward_number"),
    ("ward_recreation", "Recreation facilities by type", "ward_number, facility_type"),
    ("community_services", "Community services by type", "ward_number, service_type"),
    ("election", "Elections", "election_id"),
    ("race", "Races", "race_id"),
    ("candidate", "Candidates", "candidate_id"),
    ("candidacy", "Candidate per race", "race_id, candidate_id"),
    ("voting_station", "Voting stations", "station_code"),
    (
        "election_result",
        "Votes per station, candidate and race",
        "race_id, station_code, candidate_id",
    ),
];

pub fn datasets() -> Vec<NamedQuery> {
    let mut views: Vec<NamedQuery> = DATASET_TABLES
        .iter()
        .map(|&(name, description, order)| {
            NamedQuery::new(name, name, description, &format!("SELECT * FROM {}", name), order)
        })
        .collect();
    views.push(turnout());
    views.push(winners());
    views
}

pub fn dataset(name: &str) -> Option<NamedQuery> {
    datasets().into_iter().find(|q| q.id == name)
}

pub fn turnout() -> NamedQuery {
    NamedQuery::new(
        "turnout",
        "Turnout",
        "Stations, votes, population and turnout per ward",
        r#"
        SELECT
            vs.ward_number,
            COUNT(DISTINCT er.station_code) AS num_stations,
            SUM(er.votes) AS total_votes,
            wp.total AS population,
            ROUND(100.0 * (SUM(er.votes) FILTER (WHERE r.type = 'MAYOR'))::numeric
                  / NULLIF(wp.total, 0), 2) AS turnout_rate_percent
        FROM election_result er
        JOIN voting_station vs ON er.station_code = vs.station_code
        JOIN race r ON er.race_id = r.race_id
        LEFT JOIN ward_population wp ON vs.ward_number = wp.ward_number
        GROUP BY vs.ward_number, wp.total
        "#,
        "ward_number",
    )
}

pub fn winners() -> NamedQuery {
    NamedQuery::new(
        "winners",
        "Winners",
        "Winner of every race",
        r#"
        WITH race_results AS (
            SELECT
                r.race_id,
                r.type AS race_type,
                r.ward_number,
                CASE WHEN r.type = 'MAYOR' THEN 'City-wide'
                     ELSE 'Ward ' || r.ward_number::text END AS race_scope,
                c.name AS candidate_name,
                SUM(er.votes) AS total_votes,
                RANK() OVER (PARTITION BY r.race_id ORDER BY SUM(er.votes) DESC) AS rank
            FROM election_result er
            JOIN candidate c ON er.candidate_id = c.candidate_id
            JOIN race r ON er.race_id = r.race_id
            GROUP BY r.race_id, r.type, r.ward_number, c.name
        )
        SELECT race_type, ward_number, race_scope, candidate_name AS winner, total_votes
        FROM race_results
        WHERE rank = 1
        "#,
        "CASE race_type WHEN 'MAYOR' THEN 0 ELSE 1 END, ward_number",
    )
}

/// Population, rates, mayoral turnout and top mayoral candidate for `$1`.
pub const WARD_DETAIL: &str = r#"
    SELECT
        w.ward_number,
        w.ward_name,
        wp.total AS population,
        wc.rate_per_1000 AS crime_rate,
        wd.rate_per_1000 AS disorder_rate,
        (
            SELECT ROUND(100.0 * SUM(er.votes)::numeric / NULLIF(wp.total, 0), 2)
            FROM election_result er
            JOIN voting_station vs ON er.station_code = vs.station_code
            JOIN race r ON er.race_id = r.race_id
            WHERE vs.ward_number = w.ward_number AND r.type = 'MAYOR'
        ) AS turnout_rate,
        (
            SELECT c.name
            FROM election_result er
            JOIN candidate c ON er.candidate_id = c.candidate_id
            JOIN voting_station vs ON er.station_code = vs.station_code
            JOIN race r ON er.race_id = r.race_id
            WHERE vs.ward_number = w.ward_number AND r.type = 'MAYOR'
            GROUP BY c.name
            ORDER BY SUM(er.votes) DESC
            LIMIT 1
        ) AS top_mayoral_candidate
    FROM ward w
    LEFT JOIN ward_population wp ON w.ward_number = wp.ward_number
    LEFT JOIN ward_crime wc ON w.ward_number = wc.ward_number
    LEFT JOIN ward_disorder wd ON w.ward_number = wd.ward_number
    WHERE w.ward_number = $1
"#;

// =============================================================================
// Curated correlations
// =============================================================================

fn income_midpoints_values() -> String {
    INCOME_MIDPOINTS
        .iter()
        .map(|(label, mid)| format!("('{}', {:.1})", label.replace('\'', "''"), mid))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn curated() -> Vec<NamedQuery> {
    vec![
        NamedQuery::new(
            "population_turnout",
            "Population vs Turnout",
            "Whether larger wards turn out at different rates",
            MAYORAL_TURNOUT,
            "population",
        ),
        NamedQuery::new(
            "income_diversity",
            "Income Mix vs Turnout",
            "Share of low and high income households against turnout",
            &format!(
                r#"WITH income_stats AS (
    SELECT
        ward_number,
        SUM(household_count) AS total_households,
        SUM(CASE WHEN income_group IN ('Under $20,000', '$20,000 to $39,999')
            THEN household_count ELSE 0 END) AS low_income,
        SUM(CASE WHEN income_group = '$200,000 and over'
            THEN household_count ELSE 0 END) AS high_income
    FROM ward_income
    GROUP BY ward_number
),
turnout AS ({})
SELECT
    i.ward_number,
    ROUND(100.0 * i.low_income / NULLIF(i.total_households, 0), 1) AS low_income_pct,
    ROUND(100.0 * i.high_income / NULLIF(i.total_households, 0), 1) AS high_income_pct,
    t.turnout_rate
FROM income_stats i
JOIN turnout t ON i.ward_number = t.ward_number"#,
                MAYORAL_TURNOUT.trim()
            ),
            "ward_number",
        ),
        NamedQuery::new(
            "weighted_income",
            "Average Household Income vs Turnout",
            "Household-weighted income from bracket midpoints against turnout",
            &format!(
                r#"WITH midpoints(income_group, midpoint) AS (VALUES {}),
weighted AS (
    SELECT
        wi.ward_number,
        ROUND((SUM(wi.household_count * m.midpoint)
               / NULLIF(SUM(wi.household_count), 0))::numeric, 0) AS avg_household_income
    FROM ward_income wi
    JOIN midpoints m ON m.income_group = wi.income_group
    GROUP BY wi.ward_number
),
turnout AS ({})
SELECT w.ward_number, w.avg_household_income, t.turnout_rate
FROM weighted w
JOIN turnout t ON w.ward_number = t.ward_number"#,
                income_midpoints_values(),
                MAYORAL_TURNOUT.trim()
            ),
            "ward_number",
        ),
        NamedQuery::new(
            "safety_profile",
            "Safety Profile",
            "Crime and disorder rates per 1,000 residents",
            r#"
            SELECT
                wc.ward_number,
                wc.rate_per_1000 AS crime_rate,
                wd.rate_per_1000 AS disorder_rate,
                ROUND(((wc.rate_per_1000 + wd.rate_per_1000) / 2)::numeric, 1)
                    AS combined_safety_index
            FROM ward_crime wc
            JOIN ward_disorder wd ON wc.ward_number = wd.ward_number
            "#,
            "combined_safety_index DESC",
        ),
        NamedQuery::new(
            "mayoral_geography",
            "Mayoral Support by Ward",
            "Votes per ward for the six strongest mayoral candidates",
            r#"
            WITH candidate_votes AS (
                SELECT vs.ward_number, c.name AS candidate_name, SUM(er.votes) AS votes
                FROM election_result er
                JOIN candidate c ON er.candidate_id = c.candidate_id
                JOIN race r ON er.race_id = r.race_id
                JOIN voting_station vs ON er.station_code = vs.station_code
                WHERE r.type = 'MAYOR'
                GROUP BY vs.ward_number, c.name
            ),
            top_candidates AS (
                SELECT candidate_name
                FROM candidate_votes
                GROUP BY candidate_name
                ORDER BY SUM(votes) DESC
                LIMIT 6
            )
            SELECT cv.ward_number, cv.candidate_name, cv.votes
            FROM candidate_votes cv
            WHERE cv.candidate_name IN (SELECT candidate_name FROM top_candidates)
            "#,
            "ward_number, votes DESC",
        ),
        NamedQuery::new(
            "employment_engagement",
            "Employment vs Turnout",
            "Average employment rate against turnout",
            &format!(
                r#"WITH employment AS (
    SELECT ward_number, AVG(employment_rate) AS avg_employment_rate
    FROM ward_labour_force
    GROUP BY ward_number
),
turnout AS ({})
SELECT e.ward_number, e.avg_employment_rate, t.turnout_rate
FROM employment e
JOIN turnout t ON e.ward_number = t.ward_number"#,
                MAYORAL_TURNOUT.trim()
            ),
            "ward_number",
        ),
        NamedQuery::new(
            "service_quality",
            "Service Access",
            "Community services and recreation facilities per 1,000 residents",
            r#"
            WITH service_counts AS (
                SELECT ward_number, SUM(count) AS total_services
                FROM community_services
                GROUP BY ward_number
            ),
            recreation_counts AS (
                SELECT ward_number, SUM(count) AS total_recreation
                FROM ward_recreation
                GROUP BY ward_number
            )
            SELECT
                wp.ward_number,
                wp.total AS population,
                COALESCE(sc.total_services, 0) AS services,
                COALESCE(rc.total_recreation, 0) AS recreation,
                COALESCE(ts.active, 0) AS transit_stops,
                ROUND((COALESCE(sc.total_services, 0) + COALESCE(rc.total_recreation, 0))
                      * 1000.0 / NULLIF(wp.total, 0), 2) AS services_per_1000
            FROM ward_population wp
            LEFT JOIN service_counts sc ON wp.ward_number = sc.ward_number
            LEFT JOIN recreation_counts rc ON wp.ward_number = rc.ward_number
            LEFT JOIN ward_transit_stops ts ON wp.ward_number = ts.ward_number
            "#,
            "services_per_1000 DESC NULLS LAST",
        ),
    ]
}

pub fn curated_by_id(id: &str) -> Option<NamedQuery> {
    curated().into_iter().find(|q| q.id == id)
}
