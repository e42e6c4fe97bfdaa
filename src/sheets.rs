//! Almacén de hojas de cálculo (planificación, informes diarios, técnicos).
//!
//! El motor sólo depende del trait `SheetStore`; `DirSheetStore` lee las
//! exportaciones CSV sincronizadas en un directorio local
//! (`<root>/<carpeta>/<título>.csv`). La autenticación contra el almacén
//! remoto queda fuera de este crate.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use regex::Regex;
use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{EngineError, EngineResult};
use crate::models::{Record, Table};

pub const DATE_COLUMN: &str = "date";

/// Hoja disponible en una carpeta del almacén.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetEntry {
    pub id: String,
    pub title: String,
}

pub trait SheetStore: Send + Sync {
    /// Hojas de una carpeta, ordenadas por título.
    fn list(&self, folder: &str) -> impl Future<Output = EngineResult<Vec<SheetEntry>>> + Send;

    /// Contenido tabular de una hoja.
    fn get(&self, id: &str) -> impl Future<Output = EngineResult<Table>> + Send;
}

#[derive(Debug, Clone)]
pub struct DirSheetStore {
    root: PathBuf,
}

impl DirSheetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn sheet_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.csv"))
    }
}

impl SheetStore for DirSheetStore {
    async fn list(&self, folder: &str) -> EngineResult<Vec<SheetEntry>> {
        let dir = self.root.join(folder);
        if !dir.is_dir() {
            return Err(EngineError::external(
                "sheets",
                format!("La carpeta no existe: {}", dir.display()),
            ));
        }

        let mut entries: Vec<SheetEntry> = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| is_csv(e.path()))
            .filter_map(|e| {
                let title = e.path().file_stem()?.to_string_lossy().to_string();
                Some(SheetEntry {
                    id: format!("{}/{}", folder.trim_end_matches('/'), title),
                    title,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.title.cmp(&b.title));
        debug!("{} hojas encontradas en {}", entries.len(), dir.display());
        Ok(entries)
    }

    async fn get(&self, id: &str) -> EngineResult<Table> {
        let path = self.sheet_path(id);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            EngineError::external("sheets", format!("No se pudo leer {}: {e}", path.display()))
        })?;
        parse_csv_table(&content)
            .map_err(|e| EngineError::external("sheets", format!("CSV inválido en {}: {e:#}", path.display())))
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Interpreta un CSV con cabecera. La columna `date`, si existe, se parsea.
pub fn parse_csv_table(content: &str) -> Result<Table> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());
    let columns: Vec<String> = reader
        .headers()
        .context("cabecera ausente")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("fila {} inválida", line + 2))?;
        let values = columns
            .iter()
            .cloned()
            .zip(record.iter().map(|cell| cell.to_string()))
            .collect();
        let mut row = Record { values, date: None };
        row.date = row.get(DATE_COLUMN).and_then(parse_date);
        rows.push(row);
    }
    Ok(Table { columns, rows })
}

/// Si la hoja no trae columna `date`, todas sus filas toman la fecha del título.
pub fn apply_title_date(mut table: Table, title: &str) -> Table {
    if table.has_column(DATE_COLUMN) {
        return table;
    }
    if let Some(date) = date_from_title(title) {
        let formatted = date.format("%d-%m-%Y").to_string();
        table.columns.push(DATE_COLUMN.to_string());
        for row in &mut table.rows {
            row.values.insert(DATE_COLUMN.to_string(), formatted.clone());
            row.date = Some(date);
        }
    }
    table
}

const DATE_FORMATS: [&str; 5] = ["%d-%m-%Y", "%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d.%m.%Y"];

/// Fechas en los formatos habituales de las hojas; ignora una hora final.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let candidates = [raw, raw.get(..10).unwrap_or(raw)];
    candidates.iter().find_map(|candidate| {
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
    })
}

/// Primera fecha `DD-MM-YYYY` contenida en un título de hoja.
pub fn date_from_title(title: &str) -> Option<NaiveDate> {
    static TITLE_DATE: OnceLock<Regex> = OnceLock::new();
    let re = TITLE_DATE
        .get_or_init(|| Regex::new(r"\d{2}-\d{2}-\d{4}").expect("regex de fecha válida"));
    re.find(title)
        .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%d-%m-%Y").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn dates_in_several_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 6, 1);
        assert_eq!(parse_date("01-06-2025"), expected);
        assert_eq!(parse_date("2025-06-01"), expected);
        assert_eq!(parse_date("01/06/2025"), expected);
        assert_eq!(parse_date("2025-06-01 08:30:00"), expected);
        assert_eq!(parse_date("juin"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn csv_rows_get_parsed_dates() {
        let table = parse_csv_table(
            "date,client,equipement_installee\n01-06-2025,Acme,\"Camera:2\"\nbad,Beta,\n",
        )
        .unwrap();
        assert_eq!(table.columns, vec!["date", "client", "equipement_installee"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].date, NaiveDate::from_ymd_opt(2025, 6, 1));
        assert_eq!(table.rows[0].get("equipement_installee"), Some("Camera:2"));
        assert_eq!(table.rows[1].date, None);
    }

    #[test]
    fn title_date_fills_missing_column() {
        let table = parse_csv_table("client\nAcme\n").unwrap();
        let table = apply_title_date(table, "Rapport 12-07-2025");
        assert!(table.has_column(DATE_COLUMN));
        assert_eq!(table.rows[0].date, NaiveDate::from_ymd_opt(2025, 7, 12));
        assert_eq!(table.rows[0].get(DATE_COLUMN), Some("12-07-2025"));
    }

    #[tokio::test]
    async fn dir_store_lists_and_reads_sheets() {
        let tmp = TempDir::new().unwrap();
        let planning = tmp.path().join("planning");
        fs::create_dir_all(&planning).unwrap();
        fs::write(planning.join("13-07-2025.csv"), "equipe,equipment\nA,Camera:1\n").unwrap();
        fs::write(planning.join("12-07-2025.csv"), "equipe,equipment\nB,Cable:3\n").unwrap();
        fs::write(planning.join("notes.txt"), "ignorado").unwrap();

        let store = DirSheetStore::new(tmp.path());
        let entries = store.list("planning").await.unwrap();
        let titles: Vec<_> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["12-07-2025", "13-07-2025"]);

        let table = store.get(&entries[0].id).await.unwrap();
        assert_eq!(table.rows[0].get("equipment"), Some("Cable:3"));
    }

    #[tokio::test]
    async fn missing_sheet_is_an_external_failure() {
        let tmp = TempDir::new().unwrap();
        let store = DirSheetStore::new(tmp.path());
        assert!(matches!(
            store.get("reports/daily").await,
            Err(EngineError::ExternalService { .. })
        ));
        assert!(store.list("planning").await.is_err());
    }
}
