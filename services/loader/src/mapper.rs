//! Schema mapper: normalized topic tables to typed fact rows.
//!
//! Row-level coercion failures and duplicate keys are skipped and counted;
//! a missing column or an unparseable ward key fails the whole topic.
//! No derived measures are computed here.

use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;

use tracing::warn;

use crate::config::{
    AgeGenderSource, CategoryLayout, CategorySource, LabourForceSource, PopulationSource,
    RateSource, TransitSource,
};
use crate::error::{EtlError, Result};
use crate::model::{
    CategoryRow, RateRow, WardAgeGender, WardLabourForce, WardPopulation, WardScoped,
    WardTransitStops,
};
use crate::normalize::{
    canonical_header, collapse_whitespace, field, parse_count, parse_measure,
    parse_optional_count, parse_optional_measure, parse_ward, TopicTable,
};
use crate::reader::{RawRow, SkippedRow};

/// Tolerance when comparing pivoted category sums with a wide row's total.
const ROUND_TRIP_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct Mapped<T> {
    pub rows: Vec<T>,
    pub skipped: Vec<SkippedRow>,
}

impl<T> Mapped<T> {
    pub fn convert<U: From<T>>(self) -> Mapped<U> {
        Mapped {
            rows: self.rows.into_iter().map(U::from).collect(),
            skipped: self.skipped,
        }
    }
}

/// Apply `f` to every source row. Row-level errors and repeated keys become
/// skips; any other error aborts the topic.
fn map_rows<T, K, F>(table: &TopicTable, key: impl Fn(&T) -> K, mut f: F) -> Result<Mapped<T>>
where
    K: Eq + Hash,
    F: FnMut(&RawRow) -> Result<Vec<T>>,
{
    let mut rows = Vec::new();
    let mut skipped = Vec::new();
    let mut seen = HashSet::new();

    for row in &table.rows {
        if row.fields.iter().all(|f| f.trim().is_empty()) {
            skipped.push(SkippedRow {
                line: row.line,
                reason: "blank row".to_string(),
            });
            continue;
        }
        match f(row) {
            Ok(items) => {
                for item in items {
                    if seen.insert(key(&item)) {
                        rows.push(item);
                    } else {
                        skipped.push(SkippedRow {
                            line: row.line,
                            reason: "duplicate key".to_string(),
                        });
                    }
                }
            }
            Err(e) if e.is_row_level() => skipped.push(SkippedRow {
                line: row.line,
                reason: e.to_string(),
            }),
            Err(e) => return Err(e),
        }
    }

    if !skipped.is_empty() {
        warn!(file = %table.file, skipped = skipped.len(), "skipped rows while mapping");
    }
    Ok(Mapped { rows, skipped })
}

/// Reject rows whose ward is not in the ward dimension.
pub fn validate_wards<T: WardScoped>(
    table: &'static str,
    rows: &[T],
    known: &BTreeSet<i32>,
) -> Result<()> {
    let unknown: BTreeSet<i32> = rows
        .iter()
        .map(WardScoped::ward_number)
        .filter(|w| !known.contains(w))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(EtlError::LoadFailure {
            table,
            reason: format!("ward numbers not in the ward dimension: {:?}", unknown),
        })
    }
}

// =============================================================================
// Narrow topics
// =============================================================================

pub fn map_population(
    table: &TopicTable,
    src: &PopulationSource,
) -> Result<Mapped<WardPopulation>> {
    let ward = table.column(&src.ward)?;
    let total = table.column(&src.total)?;
    let density = table.optional_column(src.density.as_deref())?;
    let households = table.optional_column(src.households.as_deref())?;

    map_rows(table, |r: &WardPopulation| r.ward_number, |row| {
        Ok(vec![WardPopulation {
            ward_number: parse_ward(field(row, ward))?,
            total: parse_count(field(row, total), row.line, &src.total)?,
            density: match density {
                Some(i) => parse_optional_measure(field(row, i), row.line, "density")?,
                None => None,
            },
            total_households: match households {
                Some(i) => parse_optional_count(field(row, i), row.line, "households")?,
                None => None,
            },
        }])
    })
}

/// Crime and disorder: the rate is already per 1,000 residents and passes through.
pub fn map_rate(table: &TopicTable, src: &RateSource) -> Result<Mapped<RateRow>> {
    let ward = table.column(&src.ward)?;
    let total = table.column(&src.total)?;
    let rate = table.column(&src.rate)?;

    map_rows(table, |r: &RateRow| r.ward_number, |row| {
        Ok(vec![RateRow {
            ward_number: parse_ward(field(row, ward))?,
            total: parse_count(field(row, total), row.line, &src.total)?,
            rate_per_1000: parse_measure(field(row, rate), row.line, &src.rate)?,
        }])
    })
}

pub fn map_age_gender(table: &TopicTable, src: &AgeGenderSource) -> Result<Mapped<WardAgeGender>> {
    let ward = table.column(&src.ward)?;
    let age_group = table.column(&src.age_group)?;
    let male = table.column(&src.male)?;
    let female = table.column(&src.female)?;
    let total = table.column(&src.total)?;

    map_rows(
        table,
        |r: &WardAgeGender| (r.ward_number, r.age_group.clone()),
        |row| {
            let group = collapse_whitespace(field(row, age_group));
            if group.is_empty() {
                return Err(EtlError::MalformedRow {
                    line: row.line,
                    reason: "blank age group".to_string(),
                });
            }
            Ok(vec![WardAgeGender {
                ward_number: parse_ward(field(row, ward))?,
                age_group: group,
                male_count: parse_count(field(row, male), row.line, &src.male)?,
                female_count: parse_count(field(row, female), row.line, &src.female)?,
                total: parse_count(field(row, total), row.line, &src.total)?,
            }])
        },
    )
}

pub fn map_labour_force(
    table: &TopicTable,
    src: &LabourForceSource,
) -> Result<Mapped<WardLabourForce>> {
    let ward = table.column(&src.ward)?;
    let gender = table.column(&src.gender)?;
    let count_cols = [
        (table.column(&src.eligible)?, src.eligible.as_str()),
        (table.column(&src.in_labour_force)?, src.in_labour_force.as_str()),
        (table.column(&src.employed)?, src.employed.as_str()),
        (table.column(&src.self_employed)?, src.self_employed.as_str()),
        (table.column(&src.unemployed)?, src.unemployed.as_str()),
        (table.column(&src.not_in_labour_force)?, src.not_in_labour_force.as_str()),
    ];
    let rate_cols = [
        (table.column(&src.participation_rate)?, src.participation_rate.as_str()),
        (table.column(&src.employment_rate)?, src.employment_rate.as_str()),
        (table.column(&src.unemployment_rate)?, src.unemployment_rate.as_str()),
    ];

    map_rows(
        table,
        |r: &WardLabourForce| (r.ward_number, r.gender.clone()),
        |row| {
            let ward_number = parse_ward(field(row, ward))?;
            let mut counts = [0i64; 6];
            for (slot, (idx, name)) in counts.iter_mut().zip(count_cols.iter()) {
                *slot = parse_count(field(row, *idx), row.line, name)?;
            }
            let mut rates = [0f64; 3];
            for (slot, (idx, name)) in rates.iter_mut().zip(rate_cols.iter()) {
                *slot = parse_measure(field(row, *idx), row.line, name)?;
            }
            Ok(vec![WardLabourForce {
                ward_number,
                gender: collapse_whitespace(field(row, gender)),
                eligible: counts[0],
                in_labour_force: counts[1],
                employed: counts[2],
                self_employed: counts[3],
                unemployed: counts[4],
                not_in_labour_force: counts[5],
                participation_rate: rates[0],
                employment_rate: rates[1],
                unemployment_rate: rates[2],
            }])
        },
    )
}

pub fn map_transit_stops(
    table: &TopicTable,
    src: &TransitSource,
) -> Result<Mapped<WardTransitStops>> {
    let ward = table.column(&src.ward)?;
    let total = table.column(&src.total)?;
    let active = table.column(&src.active)?;
    let inactive = table.column(&src.inactive)?;

    map_rows(table, |r: &WardTransitStops| r.ward_number, |row| {
        Ok(vec![WardTransitStops {
            ward_number: parse_ward(field(row, ward))?,
            total: parse_count(field(row, total), row.line, &src.total)?,
            active: parse_count(field(row, active), row.line, &src.active)?,
            inactive: parse_count(field(row, inactive), row.line, &src.inactive)?,
        }])
    })
}

// =============================================================================
// Category topics
// =============================================================================

/// Map a category topic to (ward, category) rows, pivoting wide exports.
pub fn map_category(table: &TopicTable, src: &CategorySource) -> Result<Mapped<CategoryRow>> {
    let ward = table.column(&src.ward)?;
    let key = |r: &CategoryRow| (r.ward_number, r.category.clone());

    match &src.layout {
        CategoryLayout::Wide {
            exclude,
            total_column,
            skip_zero,
        } => {
            let total = table.optional_column(total_column.as_deref())?;
            let excluded: HashSet<String> = exclude.iter().map(|c| canonical_header(c)).collect();
            let categories: Vec<(usize, &str)> = table
                .headers
                .iter()
                .enumerate()
                .filter(|(i, h)| {
                    *i != ward && Some(*i) != total && !h.is_empty() && !excluded.contains(*h)
                })
                .map(|(i, _)| (i, table.labels[i].as_str()))
                .collect();

            map_rows(table, key, |row| {
                let ward_number = parse_ward(field(row, ward))?;
                let mut out = Vec::with_capacity(categories.len());
                let mut sum = 0i64;
                for (idx, label) in &categories {
                    let count = parse_count(field(row, *idx), row.line, label)?;
                    sum += count;
                    if *skip_zero && count == 0 {
                        continue;
                    }
                    out.push(CategoryRow {
                        ward_number,
                        category: label.to_string(),
                        count,
                        percent: None,
                    });
                }
                if let Some(t) = total {
                    if let Ok(expected) = parse_measure(field(row, t), row.line, "total") {
                        if (sum as f64 - expected).abs() > ROUND_TRIP_TOLERANCE {
                            warn!(
                                file = %table.file,
                                line = row.line,
                                ward = ward_number,
                                sum,
                                expected,
                                "category sum does not match row total"
                            );
                        }
                    }
                }
                Ok(out)
            })
        }
        CategoryLayout::Long {
            category,
            count,
            percent,
            total_label,
        } => {
            let category_idx = table.column(category)?;
            let count_idx = table.column(count)?;
            let percent_idx = table.optional_column(percent.as_deref())?;

            map_rows(table, key, |row| {
                let label = collapse_whitespace(field(row, category_idx));
                let is_total = total_label
                    .as_deref()
                    .is_some_and(|t| label.eq_ignore_ascii_case(t));
                if label.is_empty() || is_total {
                    return Ok(Vec::new());
                }
                Ok(vec![CategoryRow {
                    ward_number: parse_ward(field(row, ward))?,
                    count: parse_count(field(row, count_idx), row.line, count)?,
                    percent: match percent_idx {
                        Some(i) => parse_optional_measure(field(row, i), row.line, "percent")?,
                        None => None,
                    },
                    category: label,
                }])
            })
        }
    }
}
