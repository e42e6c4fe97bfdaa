//! Clasificación de preguntas del asistente de técnicos y despacho a la
//! herramienta correspondiente.
//!
//! Prioridad de las reglas: informe de una fecha > planificación de una
//! fecha > análisis de varias fechas > búsqueda de técnico (por defecto).

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    error::EngineError,
    filters::{month_from_alias, FilterExtractor},
    llm::{Completer, Embedder},
    sheets::SheetStore,
    tools::{find_date, ToolContext},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    EntityLookup,
    SingleDateReport,
    SingleDatePlan,
    MultiDateMerged,
}

impl Route {
    pub fn label(&self) -> &'static str {
        match self {
            Route::EntityLookup => "technician_search",
            Route::SingleDateReport => "daily_report_search",
            Route::SingleDatePlan => "planning_date_search",
            Route::MultiDateMerged => "merged_data_search",
        }
    }
}

// Palabras completas: "entre" no debe casar con "entreprise" ni "centre",
// ni "équipe" con "équipements".
fn report_words() -> &'static Regex {
    static REPORT: OnceLock<Regex> = OnceLock::new();
    REPORT.get_or_init(|| {
        Regex::new(
            r"\b(rapport|report|journalier|daily|install\w*|retour|return\w*|clients?|chantiers?|reste à faire|contraintes?|constraints?|observations?)\b",
        )
        .expect("regex de informe válida")
    })
}

fn plan_words() -> &'static Regex {
    static PLAN: OnceLock<Regex> = OnceLock::new();
    PLAN.get_or_init(|| {
        Regex::new(
            r"\b(planning|planifi\w*|plan|prévue?s?|scheduled|véhicules?|vehicles?|voitures?|missions?|équipes?|teams?)\b",
        )
        .expect("regex de planificación válida")
    })
}

fn period_words() -> &'static Regex {
    static PERIOD: OnceLock<Regex> = OnceLock::new();
    PERIOD.get_or_init(|| {
        Regex::new(
            r"\b(mois|months?|périodes?|periods?|semaines?|weeks?|années?|years?|depuis|since|between|entre|tous les|all reports|total)\b",
        )
        .expect("regex de periodo válida")
    })
}

/// Un nombre de mes completo ("juillet", "august"...) también indica un periodo.
/// "sept" se excluye: en francés es casi siempre el número.
fn mentions_month(query: &str) -> bool {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| (word.chars().count() >= 4 && *word != "sept") || *word == "mai")
        .any(|word| !word.chars().all(|c| c.is_ascii_digit()) && month_from_alias(word).is_some())
}

pub fn classify(query: &str) -> Route {
    let q = query.to_lowercase();
    let has_date = find_date(&q).is_some();

    if has_date && report_words().is_match(&q) {
        Route::SingleDateReport
    } else if has_date && plan_words().is_match(&q) {
        Route::SingleDatePlan
    } else if period_words().is_match(&q) || mentions_month(&q) {
        Route::MultiDateMerged
    } else if has_date {
        Route::SingleDateReport
    } else {
        Route::EntityLookup
    }
}

/// Respuesta del router junto a la herramienta usada.
#[derive(Debug, Clone, Serialize)]
pub struct RoutedAnswer {
    pub route: Route,
    pub answer: String,
    pub failed: bool,
}

/// Clasifica y ejecuta. Nunca falla: cualquier error de la herramienta se
/// devuelve como texto.
pub async fn dispatch<E, C, S, X>(ctx: &ToolContext<'_, E, C, S, X>, query: &str) -> RoutedAnswer
where
    E: Embedder,
    C: Completer,
    S: SheetStore,
    X: FilterExtractor,
{
    let route = classify(query);
    info!("Pregunta dirigida a '{}': {}", route.label(), query);

    let result = match route {
        Route::EntityLookup => ctx.technician_lookup(query).await,
        Route::SingleDateReport => ctx.single_date_report(query).await,
        Route::SingleDatePlan => ctx.single_date_plan(query).await,
        Route::MultiDateMerged => ctx.multi_date_merged(query).await,
    };

    match result {
        Ok(answer) => RoutedAnswer {
            route,
            answer,
            failed: false,
        },
        // Que los filtros no dejen filas es una respuesta normal.
        Err(e @ EngineError::EmptyResult(_)) => RoutedAnswer {
            route,
            answer: e.to_string(),
            failed: false,
        },
        Err(e) => {
            warn!("La herramienta '{}' falló: {}", route.label(), e);
            RoutedAnswer {
                route,
                answer: format!("Error en la herramienta {}: {}", route.label(), e),
                failed: true,
            }
        }
    }
}
