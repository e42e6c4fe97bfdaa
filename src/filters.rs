//! Extracción de `FilterCriteria` a partir de una pregunta libre mediante una
//! llamada de completion con un esquema JSON estricto.
//!
//! Es un paso aproximado: ante cualquier fallo se devuelve un filtro vacío
//! (equivalente a "no filtrar") y nunca un error.

use std::future::Future;

use chrono::NaiveDate;
use schemars::schema_for;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::llm::Completer;
use crate::models::{AggregationMode, DateRange, FilterCriteria};
use crate::sheets::parse_date;

/// Tabla canónica de alias de meses (inglés y francés, con y sin acentos).
const MONTH_ALIASES: &[(&str, u32)] = &[
    ("january", 1), ("janvier", 1), ("jan", 1),
    ("february", 2), ("février", 2), ("fevrier", 2), ("feb", 2), ("fév", 2),
    ("march", 3), ("mars", 3), ("mar", 3),
    ("april", 4), ("avril", 4), ("apr", 4), ("avr", 4),
    ("may", 5), ("mai", 5),
    ("june", 6), ("juin", 6), ("jun", 6),
    ("july", 7), ("juillet", 7), ("jul", 7), ("juil", 7),
    ("august", 8), ("août", 8), ("aout", 8), ("aug", 8),
    ("september", 9), ("septembre", 9), ("sep", 9), ("sept", 9),
    ("october", 10), ("octobre", 10), ("oct", 10),
    ("november", 11), ("novembre", 11), ("nov", 11),
    ("december", 12), ("décembre", 12), ("decembre", 12), ("dec", 12), ("déc", 12),
];

/// Número de mes a partir de un nombre o número ("july", "juillet", "7", "07").
pub fn month_from_alias(raw: &str) -> Option<u32> {
    let key = raw.trim().trim_end_matches('.').to_lowercase();
    if let Ok(n) = key.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    MONTH_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, n)| *n)
}

pub trait FilterExtractor: Send + Sync {
    fn extract(&self, query: &str) -> impl Future<Output = FilterCriteria> + Send;
}

/// Extractor respaldado por una llamada de completion.
#[derive(Debug, Clone)]
pub struct CompletionExtractor<C> {
    completer: C,
}

impl<C: Completer> CompletionExtractor<C> {
    pub fn new(completer: C) -> Self {
        Self { completer }
    }
}

impl<C: Completer> FilterExtractor for CompletionExtractor<C> {
    async fn extract(&self, query: &str) -> FilterCriteria {
        let prompt = filter_prompt(query);
        match self.completer.complete(&prompt).await {
            Ok(response) => {
                let criteria = parse_filter_response(&response);
                debug!("Filtros extraídos: {:?}", criteria);
                criteria
            }
            Err(e) => {
                warn!("No se pudieron extraer filtros ({e}). Se continúa sin filtrar.");
                FilterCriteria::default()
            }
        }
    }
}

pub fn filter_prompt(query: &str) -> String {
    let schema = serde_json::to_string_pretty(&schema_for!(FilterCriteria))
        .unwrap_or_else(|_| "{}".to_string());
    format!(
        r#"Analyze this query and extract filtering information.

Query: {query}

Return ONE JSON object that follows this JSON schema:
{schema}

Rules:
- Use null for every field that is not mentioned.
- month: number 1-12. Recognize month names in English and French (july/juillet = 7, august/août = 8).
- year: four-digit number.
- date_range: {{"start": "YYYY-MM-DD", "end": "YYYY-MM-DD"}} or null.
- site_manager: the chef_chantier name.
- equipment_type: ONLY when the user asks about a PARTICULAR equipment (e.g. "camera", "alarme"). Never use the word "equipment" itself.
- aggregation_mode: "list" if the user asks what/show/list, "total" if the user asks for counts or totals, otherwise null.
- If the user asks "what equipment" without a type, set equipment_type to null and aggregation_mode to "list".
- delivery_note: BL number or null.

Return ONLY valid JSON, nothing else."#
    )
}

/// Quita un bloque ```json ... ``` (o ``` ... ```) alrededor de la respuesta.
pub fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    // Etiqueta `json`, vaya o no seguida de salto de línea.
    let after = match after.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &after[4..],
        _ => after,
    };
    // Otra etiqueta de lenguaje opcional en la primera línea.
    let body = match after.find('\n') {
        Some(nl) if !after[..nl].trim().contains('{') => &after[nl + 1..],
        _ => after,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Parsea la respuesta del LLM. Cualquier error produce un filtro vacío.
pub fn parse_filter_response(response: &str) -> FilterCriteria {
    match try_parse_filters(strip_code_fence(response)) {
        Ok(criteria) => criteria,
        Err(e) => {
            warn!("No se pudo parsear el JSON de filtros. Error: {}. Respuesta LLM: '{}'", e, response);
            FilterCriteria::default()
        }
    }
}

/// Forma cruda que acepta las variantes que devuelve el LLM
/// (mes como nombre, año como texto, "aggregation" en lugar de "aggregation_mode"...).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFilters {
    date_range: Option<Value>,
    month: Option<Value>,
    year: Option<Value>,
    client: Option<Value>,
    site_manager: Option<Value>,
    equipment_type: Option<Value>,
    work_type: Option<Value>,
    constraint: Option<Value>,
    #[serde(alias = "aggregation")]
    aggregation_mode: Option<Value>,
    delivery_note: Option<Value>,
}

fn try_parse_filters(json: &str) -> EngineResult<FilterCriteria> {
    let raw: RawFilters =
        serde_json::from_str(json).map_err(|e| EngineError::Parse(e.to_string()))?;

    Ok(FilterCriteria {
        date_range: raw.date_range.as_ref().and_then(date_range_value),
        month: raw.month.as_ref().and_then(month_value),
        year: raw.year.as_ref().and_then(year_value),
        client: raw.client.as_ref().and_then(text_value),
        site_manager: raw.site_manager.as_ref().and_then(text_value),
        equipment_type: raw
            .equipment_type
            .as_ref()
            .and_then(text_value)
            .filter(|e| !matches!(e.to_lowercase().as_str(), "equipment" | "equipement" | "équipement")),
        work_type: raw.work_type.as_ref().and_then(text_value),
        constraint: raw.constraint.as_ref().and_then(text_value),
        aggregation_mode: raw.aggregation_mode.as_ref().and_then(aggregation_value),
        delivery_note: raw.delivery_note.as_ref().and_then(text_value),
    })
}

fn text_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() || text.eq_ignore_ascii_case("null") || text.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(text)
    }
}

fn month_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|m| u32::try_from(m).ok()).filter(|m| (1..=12).contains(m)),
        Value::String(s) => month_from_alias(s),
        _ => None,
    }
}

fn year_value(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn aggregation_value(value: &Value) -> Option<AggregationMode> {
    match text_value(value)?.to_lowercase().as_str() {
        "list" | "show" => Some(AggregationMode::List),
        "total" | "count" | "sum" => Some(AggregationMode::Total),
        "none" => Some(AggregationMode::None),
        _ => None,
    }
}

fn date_range_value(value: &Value) -> Option<DateRange> {
    let start = value.get("start").and_then(Value::as_str).and_then(parse_date);
    let end = value.get("end").and_then(Value::as_str).and_then(parse_date);
    match (start, end) {
        (Some(start), Some(end)) if start <= end => Some(DateRange { start, end }),
        (Some(start), Some(end)) => Some(DateRange { start: end, end: start }),
        (Some(day), None) | (None, Some(day)) => Some(single_day(day)),
        (None, None) => None,
    }
}

fn single_day(day: NaiveDate) -> DateRange {
    DateRange { start: day, end: day }
}
