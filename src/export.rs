//! Canonical entity report.
//!
//! One row per deduplicated entity:
//!
//! ```text
//! canonicalName,entityType,variations,occurrenceCounts
//! "Forzza, R.C.",Pessoa,"FORZZA, R.C.;R.C. FORZZA",12;3
//! ```
//!
//! `variations` and `occurrenceCounts` are `;`-joined in the same order, so
//! both lists always have the same length. A `;` inside a variation is
//! written as `,` to keep that alignment. Confidences are not exported.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Result as IoResult, Write};
use std::path::Path;
use std::str::FromStr;

use log::info;

use crate::entity::CanonicalEntity;
use crate::error::{ColetorResult, ValidationError};
use crate::storage::CanonicalStore;

/// Report header columns.
pub const COLUMNS: [&str; 4] = ["canonicalName", "entityType", "variations", "occurrenceCounts"];

const LIST_SEPARATOR: char = ';';

/// Field delimiter of the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-separated with RFC 4180 quoting.
    #[default]
    Csv,
    /// Tab-separated; tabs and newlines inside fields become spaces.
    Tsv,
}

impl ExportFormat {
    const fn delimiter(self) -> char {
        match self {
            Self::Csv => ',',
            Self::Tsv => '\t',
        }
    }

    fn field(self, value: &str) -> String {
        match self {
            Self::Csv => {
                if value.contains([',', '"', '\n', '\r']) {
                    format!("\"{}\"", value.replace('"', "\"\""))
                } else {
                    value.to_string()
                }
            }
            Self::Tsv => value.replace(['\t', '\n', '\r'], " "),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "tsv" | "tab" => Ok(Self::Tsv),
            other => Err(ValidationError::InvalidConfig {
                reason: format!("unknown export format '{other}' (expected csv or tsv)"),
            }),
        }
    }
}

/// Counts of a written report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Entity rows written.
    pub rows: usize,
    /// Variations written across all rows.
    pub variations: usize,
}

/// Writes the report for `entities` to `out`.
pub fn write_report<W: Write>(entities: &[CanonicalEntity], format: ExportFormat, out: W) -> IoResult<ExportSummary> {
    let mut out = BufWriter::new(out);
    let delimiter = format.delimiter();
    let mut summary = ExportSummary::default();

    writeln!(out, "{}", COLUMNS.join(&delimiter.to_string()))?;
    for entity in entities {
        let variations: Vec<String> = entity
            .variations
            .iter()
            .map(|v| v.variation_text.replace(LIST_SEPARATOR, ","))
            .collect();
        let counts: Vec<String> = entity
            .variations
            .iter()
            .map(|v| v.occurrence_count.to_string())
            .collect();

        writeln!(
            out,
            "{}{delimiter}{}{delimiter}{}{delimiter}{}",
            format.field(&entity.canonical_name),
            format.field(entity.entity_type.as_str()),
            format.field(&variations.join(";")),
            format.field(&counts.join(";")),
        )?;
        summary.rows += 1;
        summary.variations += variations.len();
    }
    out.flush()?;
    Ok(summary)
}

/// Writes the deduplicated contents of `store` to `path`, creating parent
/// directories as needed.
///
/// # Errors
/// `Storage` if the store cannot be read, `Export` if the file cannot be written.
pub fn export_store(store: &dyn CanonicalStore, path: &Path, format: ExportFormat) -> ColetorResult<ExportSummary> {
    let entities = store.export_deduplicated()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let summary = write_report(&entities, format, File::create(path)?)?;
    info!(
        "exported {} entities ({} variations) to {}",
        summary.rows,
        summary.variations,
        path.display()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::entity::EntityType;
    use crate::storage::InMemoryCanonicalStore;

    fn forzza() -> CanonicalEntity {
        let mut entity = CanonicalEntity::seed("Forzza, R.C.", EntityType::Pessoa, 0.9, "FORZZA, R.C.");
        entity.observe("R.C. FORZZA", 1.0, Utc::now());
        entity.observe("FORZZA, R.C.", 1.0, Utc::now());
        entity
    }

    fn render(entities: &[CanonicalEntity], format: ExportFormat) -> String {
        let mut buf = Vec::new();
        write_report(entities, format, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_csv_quotes_commas() {
        let text = render(&[forzza()], ExportFormat::Csv);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "canonicalName,entityType,variations,occurrenceCounts");
        assert_eq!(lines[1], "\"Forzza, R.C.\",Pessoa,\"FORZZA, R.C.;R.C. FORZZA\",2;1");
    }

    #[test]
    fn test_tsv_is_unquoted() {
        let text = render(&[forzza()], ExportFormat::Tsv);
        assert_eq!(
            text.lines().nth(1).unwrap(),
            "Forzza, R.C.\tPessoa\tFORZZA, R.C.;R.C. FORZZA\t2;1"
        );
    }

    #[test]
    fn test_lists_stay_aligned() {
        let mut entity = CanonicalEntity::seed("Silva, J.", EntityType::Pessoa, 0.9, "SILVA; J.");
        entity.observe("SILVA, J.", 0.8, Utc::now());
        let text = render(&[entity], ExportFormat::Tsv);
        let row: Vec<&str> = text.lines().nth(1).unwrap().split('\t').collect();
        assert_eq!(row[2].split(';').count(), row[3].split(';').count());
    }

    #[test]
    fn test_embedded_quotes_doubled() {
        let entity = CanonicalEntity::seed("EQUIPE \"PPBIO\"", EntityType::GrupoPessoas, 0.8, "EQUIPE \"PPBIO\"");
        let text = render(&[entity], ExportFormat::Csv);
        assert!(text.contains("\"EQUIPE \"\"PPBIO\"\"\""));
    }

    #[test]
    fn test_export_store_merges_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.csv");
        let store = InMemoryCanonicalStore::new();
        store.upsert(forzza()).unwrap();
        let summary = export_store(&store, &path, ExportFormat::Csv).unwrap();
        assert_eq!(summary, ExportSummary { rows: 1, variations: 2 });
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("TSV".parse::<ExportFormat>().unwrap(), ExportFormat::Tsv);
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }
}
