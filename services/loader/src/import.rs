//! Generic replace-mode import.
//!
//! Loads every CSV in a directory into a table of its own, named after the
//! file, with column types inferred from the data. Each table is dropped
//! and recreated in one transaction. Nothing here knows about wards.

use std::fmt;
use std::path::{Path, PathBuf};

use sqlx::postgres::Postgres;
use sqlx::{PgPool, QueryBuilder};
use tracing::{info, warn};

use crate::error::{ReadError, Result};
use crate::normalize::canonical_header;
use crate::reader::{read_file, RawTable, LATIN1};

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BINDS: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    BigInt,
    Double,
    Text,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
        }
    }
}

fn is_null(raw: &str) -> bool {
    raw.trim().is_empty()
}

fn numeric_text(raw: &str) -> String {
    raw.trim().replace(',', "")
}

fn as_integer(raw: &str) -> Option<i64> {
    numeric_text(raw).parse().ok()
}

fn as_double(raw: &str) -> Option<f64> {
    numeric_text(raw).parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Narrowest type that holds every non-blank value. All-blank columns are TEXT.
pub fn infer_type<'a>(values: impl IntoIterator<Item = &'a str>) -> ColumnType {
    let mut seen = false;
    let mut ty = ColumnType::BigInt;
    for v in values.into_iter().filter(|v| !is_null(v)) {
        seen = true;
        if ty == ColumnType::BigInt && as_integer(v).is_none() {
            ty = ColumnType::Double;
        }
        if ty == ColumnType::Double && as_double(v).is_none() {
            return ColumnType::Text;
        }
    }
    if seen {
        ty
    } else {
        ColumnType::Text
    }
}

/// `_Ward_Crime.csv` -> `ward_crime`.
pub fn table_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    canonical_header(&stem).trim_matches('_').to_string()
}

/// Canonical column names, with blanks and repeats made unique.
pub fn column_names(headers: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(headers.len());
    for (i, h) in headers.iter().enumerate() {
        let mut name = canonical_header(h);
        if name.is_empty() {
            name = format!("column_{}", i + 1);
        }
        let base = name.clone();
        let mut n = 2;
        while names.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        names.push(name);
    }
    names
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn create_table_sql(table: &str, columns: &[(String, ColumnType)]) -> String {
    let cols: Vec<String> = columns
        .iter()
        .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql()))
        .collect();
    format!("CREATE TABLE {} ({})", quote_ident(table), cols.join(", "))
}

// =============================================================================
// Import
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub file: String,
    pub table: String,
    pub result: std::result::Result<u64, String>,
    pub skipped: usize,
}

impl fmt::Display for ImportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(n) => write!(
                f,
                "{} -> {}: {} rows ({} skipped)",
                self.file, self.table, n, self.skipped
            ),
            Err(e) => write!(f, "{} -> {}: FAILED: {}", self.file, self.table, e),
        }
    }
}

/// Import every `*.csv` under `dir`, in file name order.
pub async fn import_dir(pool: &PgPool, dir: &Path) -> Result<Vec<ImportOutcome>> {
    let open_err = |source| ReadError::Open {
        path: dir.to_path_buf(),
        source,
    };
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(open_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        })
        .collect();
    files.sort();

    let mut outcomes = Vec::with_capacity(files.len());
    for path in files {
        outcomes.push(import_file(pool, &path).await);
    }
    Ok(outcomes)
}

pub async fn import_file(pool: &PgPool, path: &Path) -> ImportOutcome {
    let table = table_name(path);
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let raw = match read_file(path, LATIN1) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(file = %file, error = %e, "import read failed");
            return ImportOutcome {
                file,
                table,
                result: Err(e.to_string()),
                skipped: 0,
            };
        }
    };

    let skipped = raw.skipped.len();
    let result = replace_table(pool, &table, &raw)
        .await
        .map_err(|e| e.to_string());
    match &result {
        Ok(n) => info!(file = %file, table = %table, rows = n, "imported"),
        Err(e) => warn!(file = %file, table = %table, error = %e, "import failed"),
    }
    ImportOutcome {
        file,
        table,
        result,
        skipped,
    }
}

async fn replace_table(pool: &PgPool, table: &str, raw: &RawTable) -> Result<u64> {
    let names = column_names(&raw.headers);
    let columns: Vec<(String, ColumnType)> = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let values = raw
                .rows
                .iter()
                .map(|r| r.fields.get(i).map_or("", String::as_str));
            (name, infer_type(values))
        })
        .collect();

    let mut tx = pool.begin().await?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", quote_ident(table)))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&create_table_sql(table, &columns))
        .execute(&mut *tx)
        .await?;

    let column_list: Vec<String> = columns.iter().map(|(n, _)| quote_ident(n)).collect();
    let batch = (MAX_BINDS / columns.len().max(1)).max(1);
    let mut inserted = 0;
    for chunk in raw.rows.chunks(batch) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            quote_ident(table),
            column_list.join(", ")
        ));
        qb.push_values(chunk, |mut b, row| {
            for (i, (_, ty)) in columns.iter().enumerate() {
                let value = row.fields.get(i).map_or("", String::as_str);
                let present = !is_null(value);
                match ty {
                    ColumnType::BigInt => {
                        b.push_bind(if present { as_integer(value) } else { None });
                    }
                    ColumnType::Double => {
                        b.push_bind(if present { as_double(value) } else { None });
                    }
                    ColumnType::Text => {
                        b.push_bind(present.then(|| value.trim().to_string()));
                    }
                }
            }
        });
        inserted += qb.build().execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // TYPE INFERENCE
    // -------------------------------------------------------------------------

    #[test]
    fn test_infer_integer() {
        assert_eq!(infer_type(["1", "2", "", "1,200"]), ColumnType::BigInt);
    }

    #[test]
    fn test_infer_double() {
        assert_eq!(infer_type(["1", "2.5", " "]), ColumnType::Double);
    }

    #[test]
    fn test_infer_text() {
        assert_eq!(infer_type(["1", "2.5", "WARD 3"]), ColumnType::Text);
        assert_eq!(infer_type(["", ""]), ColumnType::Text);
        assert_eq!(infer_type(["inf"]), ColumnType::Text);
    }

    // -------------------------------------------------------------------------
    // NAMING
    // -------------------------------------------------------------------------

    #[test]
    fn test_table_name_from_file() {
        assert_eq!(table_name(Path::new("data/_Ward_Crime.csv")), "ward_crime");
        assert_eq!(
            table_name(Path::new("Ward Household Income.CSV")),
            "ward_household_income"
        );
    }

    #[test]
    fn test_column_names_unique() {
        let headers: Vec<String> = ["Ward", "Total", "", "total", "Ward"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            column_names(&headers),
            vec!["ward", "total", "column_3", "total_2", "ward_2"]
        );
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("ward"), "\"ward\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(
            "ward_crime",
            &[
                ("ward".to_string(), ColumnType::Text),
                ("total".to_string(), ColumnType::BigInt),
                ("rate".to_string(), ColumnType::Double),
            ],
        );
        assert_eq!(
            sql,
            "CREATE TABLE \"ward_crime\" \
             (\"ward\" TEXT, \"total\" BIGINT, \"rate\" DOUBLE PRECISION)"
        );
    }
}
