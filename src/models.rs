//! Modelos de dominio: entidades del catálogo, chunks, criterios de filtro,
//! tablas de registros y resultados de análisis.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tier de indexación: campos estructurados (CSV) o texto de documentos (PDF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Structured,
    Document,
}

impl SourceTier {
    pub fn label(&self) -> &'static str {
        match self {
            SourceTier::Structured => "csv",
            SourceTier::Document => "pdf",
        }
    }
}

/// Un producto del catálogo tal y como lo entrega el cargador tabular.
/// `structured` ya viene aplanado: un elemento por campo o segmento `|`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub code: String,
    pub name: String,
    pub structured: Vec<String>,
    pub document: Option<String>,
}

impl Entity {
    /// Campos de texto que alimentan el índice del tier indicado.
    pub fn tier_fields(&self, tier: SourceTier) -> Vec<&str> {
        match tier {
            SourceTier::Structured => self.structured.iter().map(String::as_str).collect(),
            SourceTier::Document => self.document.as_deref().into_iter().collect(),
        }
    }
}

/// Trozo de texto indexable con los metadatos de su entidad.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub text: String,
    pub entity_id: String,
    pub source: SourceTier,
}

/// Fragmento de fuente devuelto junto a una respuesta.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSnippet {
    pub tier: SourceTier,
    pub score: f64,
    pub text: String,
}

/// Respuesta del camino de preguntas abiertas sobre un producto.
#[derive(Debug, Clone, Serialize)]
pub struct QaAnswer {
    pub product_code: String,
    pub answer: String,
    pub sources: Vec<SourceSnippet>,
}

// ---------------------------------------------------------------------------
// Criterios de filtro
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    List,
    Total,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DateRange {
    /// Fecha inicial inclusiva (YYYY-MM-DD).
    #[schemars(with = "String")]
    pub start: NaiveDate,
    /// Fecha final inclusiva (YYYY-MM-DD).
    #[schemars(with = "String")]
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Restricciones opcionales extraídas de una pregunta libre.
/// Un campo ausente significa "no filtrar por esta dimensión".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FilterCriteria {
    pub date_range: Option<DateRange>,
    /// Mes 1-12.
    pub month: Option<u32>,
    pub year: Option<i32>,
    pub client: Option<String>,
    /// Nombre del jefe de obra (chef_chantier).
    pub site_manager: Option<String>,
    /// Sólo si se pregunta por un equipo concreto (p. ej. "camera").
    pub equipment_type: Option<String>,
    pub work_type: Option<String>,
    pub constraint: Option<String>,
    /// "list" para qué/mostrar/listar, "total" para recuentos.
    pub aggregation_mode: Option<AggregationMode>,
    /// Número de BL.
    pub delivery_note: Option<String>,
}

impl FilterCriteria {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn wants_aggregation(&self) -> bool {
        matches!(
            self.aggregation_mode,
            Some(AggregationMode::List) | Some(AggregationMode::Total)
        )
    }
}

// ---------------------------------------------------------------------------
// Recuento de equipos
// ---------------------------------------------------------------------------

/// Suma de tokens `nombre:cantidad` acumulada entre filas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EquipmentTally {
    counts: HashMap<String, u64>,
}

impl EquipmentTally {
    /// Suma saturada: un recuento enorme pero bien formado no desborda.
    pub fn add(&mut self, name: &str, count: u64) {
        let total = self.counts.entry(name.to_string()).or_insert(0);
        *total = total.saturating_add(count);
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.counts.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Resúmenes analíticos: cantidad descendente, empates por nombre.
    pub fn ranked(&self) -> Vec<(String, u64)> {
        let mut items: Vec<_> = self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items
    }

    /// Inventarios simples: orden alfabético.
    pub fn inventory(&self) -> Vec<(String, u64)> {
        let mut items: Vec<_> = self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items
    }
}

impl<const N: usize> From<[(&str, u64); N]> for EquipmentTally {
    fn from(items: [(&str, u64); N]) -> Self {
        let mut tally = Self::default();
        for (name, count) in items {
            tally.add(name, count);
        }
        tally
    }
}

// ---------------------------------------------------------------------------
// Tablas de registros (planificación, informes diarios, técnicos)
// ---------------------------------------------------------------------------

/// Una fila de una hoja, con la fecha ya interpretada si existe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub values: BTreeMap<String, String>,
    pub date: Option<NaiveDate>,
}

impl Record {
    /// Valor no vacío de la columna (las celdas "nan" se tratan como vacías).
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
    }

    pub fn get_or_na(&self, column: &str) -> &str {
        self.get(column).unwrap_or("N/A")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Hay columna de fecha interpretada si al menos una fila tiene fecha.
    pub fn has_dates(&self) -> bool {
        self.rows.iter().any(|r| r.date.is_some())
    }

    /// Copia con las mismas columnas y sólo las filas que cumplen `keep`.
    pub fn retain(&self, keep: impl Fn(&Record) -> bool) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Une varias hojas en una sola tabla (columnas en orden de aparición).
    pub fn concat(tables: Vec<Table>) -> Table {
        let mut merged = Table::default();
        for table in tables {
            for column in table.columns {
                if !merged.has_column(&column) {
                    merged.columns.push(column);
                }
            }
            merged.rows.extend(table.rows);
        }
        merged
    }
}

// ---------------------------------------------------------------------------
// Análisis de conformidad sobre productos seleccionados
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Yes,
    No,
    Unclear,
    Error,
}

/// Fila de la tabla de resultados: una por producto analizado.
#[derive(Debug, Clone, Serialize)]
pub struct ConformanceRow {
    pub code: String,
    pub verdict: Verdict,
    pub justification: String,
    pub sources: String,
    pub tier: Option<SourceTier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    #[default]
    Search,
    Followup,
    Custom,
}

/// Entrada de historial devuelta a la capa de UI.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub query: String,
    pub analyzed_entities: Vec<String>,
    pub result_table: Vec<ConformanceRow>,
    pub kind: AnalysisKind,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new(query: &str, kind: AnalysisKind, result_table: Vec<ConformanceRow>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.to_string(),
            analyzed_entities: result_table.iter().map(|row| row.code.clone()).collect(),
            result_table,
            kind,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_orderings() {
        let tally = EquipmentTally::from([("Switch", 2), ("Camera", 5), ("Cable", 2)]);
        assert_eq!(
            tally.ranked(),
            vec![
                ("Camera".to_string(), 5),
                ("Cable".to_string(), 2),
                ("Switch".to_string(), 2)
            ]
        );
        let names: Vec<_> = tally.inventory().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Cable", "Camera", "Switch"]);
    }

    #[test]
    fn record_treats_nan_as_missing() {
        let mut values = BTreeMap::new();
        values.insert("client".to_string(), "nan".to_string());
        values.insert("chef_chantier".to_string(), " Karim ".to_string());
        let record = Record { values, date: None };
        assert_eq!(record.get("client"), None);
        assert_eq!(record.get_or_na("client"), "N/A");
        assert_eq!(record.get("chef_chantier"), Some("Karim"));
    }

    #[test]
    fn empty_criteria_requests_no_aggregation() {
        let criteria = FilterCriteria::default();
        assert!(criteria.is_empty());
        assert!(!criteria.wants_aggregation());
    }

    #[test]
    fn analysis_record_lists_analyzed_codes() {
        let row = ConformanceRow {
            code: "DS-2CD2143G2-I".to_string(),
            verdict: Verdict::Yes,
            justification: "Oui, IP67".to_string(),
            sources: String::new(),
            tier: Some(SourceTier::Structured),
        };
        let record = AnalysisRecord::new("IP67 ?", AnalysisKind::Custom, vec![row]);
        assert_eq!(record.analyzed_entities, vec!["DS-2CD2143G2-I"]);
        assert_eq!(record.kind, AnalysisKind::Custom);
    }
}
