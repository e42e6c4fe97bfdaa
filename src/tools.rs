//! Herramientas del asistente de técnicos: directorio de técnicos, informe
//! diario de una fecha, planificación de una fecha y análisis de todos los
//! informes diarios.
//!
//! Cada herramienta devuelve `EngineResult<String>`; el router se encarga de
//! convertir cualquier error en una respuesta legible.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    config::SheetsConfig,
    error::{EngineError, EngineResult},
    filters::FilterExtractor,
    llm::{Completer, Embedder},
    models::{Chunk, FilterCriteria, Record, SourceTier, Table},
    reports::{
        aggregate_column, apply_filters, format_tally, EquipmentView, TallyOrder, INSTALLED_COLUMN,
        PLANNING_EQUIPMENT_COLUMN, RETURNED_COLUMN,
    },
    retry::{with_retry, RetryPolicy},
    sheets::{apply_title_date, parse_date, SheetEntry, SheetStore, DATE_COLUMN},
    vector_store::{embed_query, VectorIndex},
};

const NO_DATE: &str = "NO_DATE";
const TECHNICIAN_TOP_K: usize = 3;
const SINGLE_DATE_TOP_K: usize = 10;
const MERGED_SAMPLE_ROWS: usize = 100;
const MERGED_TOP_K: usize = 20;

const EQUIPMENT_WORDS: [&str; 4] = ["equipment", "equipement", "équipement", "matériel"];
const INVENTORY_WORDS: [&str; 6] = ["list", "all", "total", "liste", "tous", "tout"];

/// Primera fecha explícita de la pregunta (`DD-MM-YYYY`, `DD/MM/YYYY` o `YYYY-MM-DD`).
pub fn find_date(query: &str) -> Option<NaiveDate> {
    static DATE: OnceLock<Regex> = OnceLock::new();
    let re = DATE.get_or_init(|| {
        Regex::new(r"\b(\d{2}[-/]\d{2}[-/]\d{4}|\d{4}-\d{2}-\d{2})\b").expect("regex de fecha válida")
    });
    re.find_iter(query).find_map(|m| parse_date(m.as_str()))
}

fn mentions_any(query: &str, words: &[&str]) -> bool {
    words.iter().any(|w| query.contains(w))
}

fn format_rows(rows: &[Record], columns: &[&str]) -> String {
    rows.iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| format!("{c}: {}", row.get_or_na(c)))
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn technician_text(row: &Record) -> String {
    ["nom", "telephone", "mail", "equipement"]
        .iter()
        .map(|c| row.get_or_na(c))
        .collect::<Vec<_>>()
        .join(" ")
}

const PLANNING_COLUMNS: [&str; 6] = ["equipe", "travaux", "voiture", "conducetur", "frais_mission", "equipment"];

fn planning_text(row: &Record, date: &str) -> String {
    format!(
        "Date: {date} | Team/Person: {} | Work Type: {} | Vehicle: {} | Driver: {} | Mission Expenses: {} | Equipment: {}",
        row.get_or_na("equipe"),
        row.get_or_na("travaux"),
        row.get_or_na("voiture"),
        row.get_or_na("conducetur"),
        row.get_or_na("frais_mission"),
        row.get_or_na(PLANNING_EQUIPMENT_COLUMN),
    )
}

const REPORT_COLUMNS: [&str; 13] = [
    "date",
    "client",
    "nom_BL",
    "chef_chantier",
    "heure_entree",
    "heure_sortie",
    "action_previsionelle_a_executer",
    "equipement_installee",
    "contrainte_visees",
    "reste_a_faire",
    "observation",
    "besoin_ressentis_pour_demain",
    "equipement_retour",
];

fn report_text(row: &Record) -> String {
    format!(
        "Date: {} | Client: {} | BL: {} | Manager: {} | Time: {}-{} | Action: {} | Equipment Installed: {} | Constraints: {} | Remaining: {} | Observations: {} | Needs: {} | Equipment Returned: {}",
        row.get_or_na(DATE_COLUMN),
        row.get_or_na("client"),
        row.get_or_na("nom_BL"),
        row.get_or_na("chef_chantier"),
        row.get_or_na("heure_entree"),
        row.get_or_na("heure_sortie"),
        row.get_or_na("action_previsionelle_a_executer"),
        row.get_or_na(INSTALLED_COLUMN),
        row.get_or_na("contrainte_visees"),
        row.get_or_na("reste_a_faire"),
        row.get_or_na("observation"),
        row.get_or_na("besoin_ressentis_pour_demain"),
        row.get_or_na(RETURNED_COLUMN),
    )
}

/// Dependencias compartidas por las herramientas.
pub struct ToolContext<'a, E, C, S, X> {
    pub embedder: &'a E,
    pub completer: &'a C,
    pub store: &'a S,
    pub extractor: &'a X,
    pub sheets: &'a SheetsConfig,
    pub retry: &'a RetryPolicy,
}

impl<'a, E, C, S, X> ToolContext<'a, E, C, S, X>
where
    E: Embedder,
    C: Completer,
    S: SheetStore,
    X: FilterExtractor,
{
    async fn load_sheet(&self, id: &str) -> EngineResult<Table> {
        with_retry(self.retry, "sheets", || self.store.get(id)).await
    }

    async fn list_sheets(&self, folder: &str) -> EngineResult<Vec<SheetEntry>> {
        with_retry(self.retry, "sheets", || self.store.list(folder)).await
    }

    /// Fecha de la pregunta: primero por expresión regular y, si no hay,
    /// pidiéndosela al modelo (`NO_DATE` si no encuentra ninguna).
    pub async fn extract_date(&self, query: &str) -> EngineResult<Option<NaiveDate>> {
        if let Some(date) = find_date(query) {
            return Ok(Some(date));
        }
        let prompt = format!(
            "Extract the date from the query and return it in DD-MM-YYYY format.\n\
- If no date is found, return {NO_DATE}\n\
- Only return the date, nothing else.\n\n\
Query: {query}"
        );
        let response = self.completer.complete(&prompt).await?;
        if response.contains(NO_DATE) {
            return Ok(None);
        }
        Ok(find_date(&response).or_else(|| parse_date(&response)))
    }

    /// Índice efímero sobre las filas; devuelve las `k` más parecidas a la pregunta.
    async fn retrieve_rows<'r>(
        &self,
        rows: &'r [Record],
        texts: Vec<String>,
        query: &str,
        k: usize,
    ) -> EngineResult<Vec<&'r Record>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.embedder.embed(&texts).await?;
        let chunks = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                text,
                entity_id: i.to_string(),
                source: SourceTier::Structured,
            })
            .collect();
        let index = VectorIndex::build(chunks, vectors)?;
        let query_vec = embed_query(self.embedder, query).await?;
        Ok(index
            .query(&query_vec, k.min(rows.len()))
            .into_iter()
            .filter_map(|hit| hit.chunk.entity_id.parse::<usize>().ok())
            .filter_map(|i| rows.get(i))
            .collect())
    }

    /// Contacto, teléfono o material de un técnico.
    pub async fn technician_lookup(&self, query: &str) -> EngineResult<String> {
        let table = self.load_sheet(&self.sheets.technicians_sheet).await?;
        if table.is_empty() {
            return Ok("No hay datos de técnicos disponibles.".to_string());
        }
        let texts: Vec<String> = table.rows.iter().map(technician_text).collect();
        let hits = self.retrieve_rows(&table.rows, texts, query, TECHNICIAN_TOP_K).await?;
        let information = hits
            .iter()
            .enumerate()
            .map(|(i, row)| format!("{}. {}", i + 1, technician_text(row)))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Based on the following information, answer the user's question precisely and concisely.\n\n\
User Question: {query}\n\nInformation:\n{information}\n\nAnswer:"
        );
        self.completer.complete(&prompt).await
    }

    /// Informe diario de una fecha concreta.
    pub async fn single_date_report(&self, query: &str) -> EngineResult<String> {
        let Some(date) = self.extract_date(query).await? else {
            return Ok("Indique una fecha para consultar el informe diario.".to_string());
        };
        let date_label = date.format("%d-%m-%Y").to_string();

        let table = self.load_sheet(&self.sheets.daily_report_sheet).await?;
        let table = if table.has_dates() {
            table.retain(|row| row.date == Some(date))
        } else {
            table
        };
        if table.is_empty() {
            return Err(EngineError::EmptyResult(format!("informe diario del {date_label}")));
        }

        let q = query.to_lowercase();
        let view = EquipmentView::from_query(&q);
        let inventory = mentions_any(&q, &EQUIPMENT_WORDS) && mentions_any(&q, &INVENTORY_WORDS);
        if inventory || view.show_returned {
            let mut sections = Vec::new();
            if view.show_installed {
                let installed = aggregate_column(&table, INSTALLED_COLUMN);
                if !installed.is_empty() {
                    sections.push(format!(
                        "Equipment installed:\n{}",
                        format_tally(&installed, TallyOrder::Inventory)
                    ));
                }
            }
            if view.show_returned {
                let returned = aggregate_column(&table, RETURNED_COLUMN);
                if !returned.is_empty() {
                    sections.push(format!(
                        "Equipment returned:\n{}",
                        format_tally(&returned, TallyOrder::Inventory)
                    ));
                }
            }
            if sections.is_empty() {
                return Ok(format!("No hay información de equipos para el {date_label}."));
            }
            let prompt = format!(
                "Format this equipment list based on the user's question.\n\n\
User Question: {query}\nDate: {date_label}\n\n{}\n\nProvide a natural response with the formatted list.",
                sections.join("\n\n")
            );
            return self.completer.complete(&prompt).await;
        }

        let texts: Vec<String> = table.rows.iter().map(report_text).collect();
        let hits = self.retrieve_rows(&table.rows, texts, query, SINGLE_DATE_TOP_K).await?;
        let retrieved: Vec<Record> = hits.into_iter().cloned().collect();
        let prompt = format!(
            "You are a daily report assistant. Based on the retrieved daily report data, answer the user's question clearly and naturally.\n\n\
User Question: {query}\nDate: {date_label}\n\nRetrieved Daily Report Data:\n{}\n\n\
Instructions:\n\
- Answer the question directly and concisely\n\
- If asked about a specific client, focus only on that client's work\n\
- If asked about constraints or problems, highlight those issues\n\
- If asked about remaining work, list what's left to do\n\
- If asked about time spent, calculate from entry/exit times\n\
- Be specific with client names, actions, and equipment\n\nAnswer:",
            format_rows(&retrieved, &REPORT_COLUMNS)
        );
        self.completer.complete(&prompt).await
    }

    /// Planificación de una fecha: la hoja cuyo título contiene la fecha.
    pub async fn single_date_plan(&self, query: &str) -> EngineResult<String> {
        let entries = self.list_sheets(&self.sheets.planning_folder).await?;
        if entries.is_empty() {
            return Ok("No se encontraron hojas de planificación.".to_string());
        }
        let available = entries
            .iter()
            .map(|e| e.title.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let date = self.extract_date(query).await?;
        let entry = date.and_then(|d| {
            let label = d.format("%d-%m-%Y").to_string();
            entries.iter().find(|e| e.title.contains(&label))
        });
        let Some(entry) = entry else {
            return Ok(format!(
                "No se encontró planificación para la fecha indicada. Fechas disponibles: {available}"
            ));
        };
        info!("Planificación seleccionada: {}", entry.title);

        let table = self.load_sheet(&entry.id).await?;
        if table.is_empty() {
            return Err(EngineError::EmptyResult(format!("planificación {}", entry.title)));
        }

        let q = query.to_lowercase();
        if mentions_any(&q, &INVENTORY_WORDS)
            && (mentions_any(&q, &EQUIPMENT_WORDS) || mentions_any(&q, &["needed", "required"]))
        {
            let totals = aggregate_column(&table, PLANNING_EQUIPMENT_COLUMN);
            if totals.is_empty() {
                return Ok(format!("No hay información de equipos para {}.", entry.title));
            }
            let prompt = format!(
                "Format this equipment list in a clear, professional way based on the user's question.\n\n\
User Question: {query}\nDate: {}\n\nEquipment totals:\n{}\n\nProvide a natural response with the formatted list.",
                entry.title,
                format_tally(&totals, TallyOrder::Inventory)
            );
            return self.completer.complete(&prompt).await;
        }

        let texts: Vec<String> = table.rows.iter().map(|row| planning_text(row, &entry.title)).collect();
        let hits = self.retrieve_rows(&table.rows, texts, query, SINGLE_DATE_TOP_K).await?;
        let retrieved: Vec<Record> = hits.into_iter().cloned().collect();
        let prompt = format!(
            "You are a planning assistant. Based on the retrieved planning data, answer the user's question clearly and naturally.\n\n\
User Question: {query}\nDate: {}\n\nRetrieved Planning Data:\n{}\n\n\
Instructions:\n\
- Answer the question directly and concisely\n\
- If asked about a specific person, focus only on that person's information\n\
- If asked about vehicles or expenses, provide those specific details\n\
- For lists, use bullet points\n\nAnswer:",
            entry.title,
            format_rows(&retrieved, &PLANNING_COLUMNS)
        );
        self.completer.complete(&prompt).await
    }

    /// Todas las hojas de la carpeta de informes unidas en una tabla. Una hoja
    /// ilegible se omite.
    pub async fn load_all_reports(&self) -> EngineResult<Table> {
        let entries = self.list_sheets(&self.sheets.reports_folder).await?;
        let mut tables = Vec::with_capacity(entries.len());
        for entry in &entries {
            match self.load_sheet(&entry.id).await {
                Ok(table) => {
                    debug!("✓ {} filas de {}", table.len(), entry.title);
                    tables.push(apply_title_date(table, &entry.title));
                }
                Err(e) => warn!("✗ Error cargando {}: {}", entry.title, e),
            }
        }
        let merged = Table::concat(tables);
        info!("{} filas de {} hojas de informes", merged.len(), entries.len());
        Ok(merged)
    }

    /// Preguntas sobre varias fechas: filtros extraídos de la pregunta,
    /// recuentos de equipos o recuperación sobre las filas filtradas.
    pub async fn multi_date_merged(&self, query: &str) -> EngineResult<String> {
        let criteria = self.extractor.extract(query).await;
        info!("Filtros extraídos: {:?}", criteria);

        let reports = self.load_all_reports().await?;
        if reports.is_empty() {
            return Ok("No hay datos de informes diarios disponibles.".to_string());
        }
        let filtered = apply_filters(&reports, &criteria);
        if filtered.is_empty() {
            return Err(EngineError::EmptyResult(describe_criteria(&criteria)));
        }

        let q = query.to_lowercase();
        if criteria.wants_aggregation() && mentions_any(&q, &EQUIPMENT_WORDS) {
            let view = EquipmentView::from_query(&q);
            let mut sections = Vec::new();
            if view.show_installed {
                let installed = aggregate_column(&filtered, INSTALLED_COLUMN);
                if !installed.is_empty() {
                    sections.push(format!(
                        "Equipment Installed:\n{}",
                        format_tally(&installed, TallyOrder::Ranked)
                    ));
                }
            }
            if view.show_returned {
                let returned = aggregate_column(&filtered, RETURNED_COLUMN);
                if !returned.is_empty() {
                    sections.push(format!(
                        "Equipment Returned:\n{}",
                        format_tally(&returned, TallyOrder::Ranked)
                    ));
                }
            }
            if sections.is_empty() {
                return Ok("No se encontró información de equipos para los criterios indicados.".to_string());
            }
            let prompt = format!(
                "Format this equipment data based on the user's question.\n\n\
User Question: {query}\nFilters Applied: {}\nTotal Records: {}\n\n{}\n\nProvide a clear, natural response with summary.",
                describe_criteria(&criteria),
                filtered.len(),
                sections.join("\n\n")
            );
            return self.completer.complete(&prompt).await;
        }

        let sample = &filtered.rows[..filtered.len().min(MERGED_SAMPLE_ROWS)];
        let texts: Vec<String> = sample.iter().map(report_text).collect();
        let hits = self.retrieve_rows(sample, texts, query, MERGED_TOP_K).await?;
        let retrieved: Vec<Record> = hits.into_iter().cloned().collect();
        let prompt = format!(
            "You are a daily report analyst. Answer the user's question based on the data.\n\n\
User Question: {query}\nTotal matching records: {}\nSample size: {}\n\nData:\n{}\n\n\
Provide a comprehensive, clear answer with specific details.",
            filtered.len(),
            retrieved.len(),
            format_rows(&retrieved, &REPORT_COLUMNS)
        );
        self.completer.complete(&prompt).await
    }
}

/// Filtros aplicados en forma legible (JSON sin campos nulos).
pub fn describe_criteria(criteria: &FilterCriteria) -> String {
    match serde_json::to_value(criteria) {
        Ok(serde_json::Value::Object(map)) => {
            let set: serde_json::Map<_, _> = map.into_iter().filter(|(_, v)| !v.is_null()).collect();
            serde_json::Value::Object(set).to_string()
        }
        _ => format!("{criteria:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AggregationMode;
    use crate::sheets::DirSheetStore;
    use crate::testing::{FixedExtractor, HashEmbedder, ScriptedCompleter};
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write(root: &Path, id: &str, content: &str) {
        let path = root.join(format!("{id}.csv"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(
            root,
            "technicians",
            "nom,telephone,mail,equipement\nKarim Benali,0611223344,karim@example.com,Perceuse\nSofia Haddad,0655667788,sofia@example.com,Nacelle\n",
        );
        write(
            root,
            "reports/daily",
            "date,client,chef_chantier,equipement_installee,equipement_retour\n\
12-07-2025,Acme,Karim,\"Camera:2,Cable:1\",\"Switch:1\"\n\
12-07-2025,Beta,Sofia,\"Camera:1\",\n\
13-07-2025,Gamma,Karim,\"Alarme:1\",\n",
        );
        write(root, "planning/planning 12-07-2025", "equipe,travaux,equipment\nA,Pose,\"Camera:2\"\nB,Câblage,\"Camera:1,Cable:5\"\n");
        write(root, "reports/rapport 01-06-2025", "client,equipement_installee\nAcme,\"Camera:2\"\n");
        write(
            root,
            "reports/rapport juin",
            "date,client,equipement_installee\n02-06-2025,Beta,\"Camera:1,Cable:4\"\n03-07-2025,Gamma,\"Alarme:2\"\n",
        );
        tmp
    }

    fn sheets(root: &Path) -> SheetsConfig {
        SheetsConfig {
            root: root.to_path_buf(),
            technicians_sheet: "technicians".to_string(),
            planning_folder: "planning".to_string(),
            reports_folder: "reports".to_string(),
            daily_report_sheet: "reports/daily".to_string(),
        }
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn explicit_dates_are_found() {
        let expected = NaiveDate::from_ymd_opt(2025, 7, 12);
        assert_eq!(find_date("rapport du 12-07-2025 svp"), expected);
        assert_eq!(find_date("planning 12/07/2025"), expected);
        assert_eq!(find_date("on 2025-07-12?"), expected);
        assert_eq!(find_date("en juillet"), None);
    }

    #[tokio::test]
    async fn date_falls_back_to_the_model() {
        let tmp = fixture();
        let sheets = sheets(tmp.path());
        let store = DirSheetStore::new(tmp.path());
        let completer = ScriptedCompleter::new("NO_DATE").rule("douze juillet", "12-07-2025");
        let extractor = FixedExtractor(FilterCriteria::default());
        let retry = retry();
        let ctx = ToolContext {
            embedder: &HashEmbedder::default(),
            completer: &completer,
            store: &store,
            extractor: &extractor,
            sheets: &sheets,
            retry: &retry,
        };
        assert_eq!(
            ctx.extract_date("le douze juillet 2025").await.unwrap(),
            NaiveDate::from_ymd_opt(2025, 7, 12)
        );
        assert_eq!(ctx.extract_date("aujourd'hui").await.unwrap(), None);
    }

    #[tokio::test]
    async fn report_inventory_for_one_date() {
        let tmp = fixture();
        let sheets = sheets(tmp.path());
        let store = DirSheetStore::new(tmp.path());
        let completer = ScriptedCompleter::new("OK");
        let extractor = FixedExtractor(FilterCriteria::default());
        let retry = retry();
        let ctx = ToolContext {
            embedder: &HashEmbedder::default(),
            completer: &completer,
            store: &store,
            extractor: &extractor,
            sheets: &sheets,
            retry: &retry,
        };

        let answer = ctx
            .single_date_report("liste des équipements installés le 12-07-2025")
            .await
            .unwrap();
        assert_eq!(answer, "OK");
        assert_eq!(completer.calls_containing("• Cable: 1\n• Camera: 3"), 1);
        assert_eq!(completer.calls_containing("Equipment returned"), 0);

        ctx.single_date_report("matériel en retour le 12-07-2025").await.unwrap();
        assert_eq!(completer.calls_containing("Equipment returned:\n• Switch: 1"), 1);
    }

    #[tokio::test]
    async fn report_without_rows_for_the_date_is_empty_result() {
        let tmp = fixture();
        let sheets = sheets(tmp.path());
        let store = DirSheetStore::new(tmp.path());
        let completer = ScriptedCompleter::new("OK");
        let extractor = FixedExtractor(FilterCriteria::default());
        let retry = retry();
        let ctx = ToolContext {
            embedder: &HashEmbedder::default(),
            completer: &completer,
            store: &store,
            extractor: &extractor,
            sheets: &sheets,
            retry: &retry,
        };
        assert!(matches!(
            ctx.single_date_report("rapport du 01-01-2024").await,
            Err(EngineError::EmptyResult(_))
        ));
    }

    #[tokio::test]
    async fn plan_inventory_and_unknown_date() {
        let tmp = fixture();
        let sheets = sheets(tmp.path());
        let store = DirSheetStore::new(tmp.path());
        let completer = ScriptedCompleter::new("OK");
        let extractor = FixedExtractor(FilterCriteria::default());
        let retry = retry();
        let ctx = ToolContext {
            embedder: &HashEmbedder::default(),
            completer: &completer,
            store: &store,
            extractor: &extractor,
            sheets: &sheets,
            retry: &retry,
        };

        ctx.single_date_plan("total equipment needed on 12-07-2025").await.unwrap();
        assert_eq!(completer.calls_containing("• Cable: 5\n• Camera: 3"), 1);

        let missing = ctx.single_date_plan("planning du 20-07-2025").await.unwrap();
        assert!(missing.contains("planning 12-07-2025"), "{missing}");
    }

    #[tokio::test]
    async fn technician_lookup_uses_top_rows() {
        let tmp = fixture();
        let sheets = sheets(tmp.path());
        let store = DirSheetStore::new(tmp.path());
        let completer = ScriptedCompleter::new("0655667788");
        let extractor = FixedExtractor(FilterCriteria::default());
        let retry = retry();
        let ctx = ToolContext {
            embedder: &HashEmbedder::default(),
            completer: &completer,
            store: &store,
            extractor: &extractor,
            sheets: &sheets,
            retry: &retry,
        };

        let answer = ctx.technician_lookup("téléphone de Sofia Haddad").await.unwrap();
        assert_eq!(answer, "0655667788");
        assert!(completer.prompts()[0].contains("1. Sofia Haddad 0655667788"));
    }

    #[tokio::test]
    async fn june_totals_across_merged_reports() {
        let tmp = fixture();
        let sheets = sheets(tmp.path());
        let store = DirSheetStore::new(tmp.path());
        let completer = ScriptedCompleter::new("OK");
        let extractor = FixedExtractor(FilterCriteria {
            month: Some(6),
            aggregation_mode: Some(AggregationMode::Total),
            ..Default::default()
        });
        let retry = retry();
        let ctx = ToolContext {
            embedder: &HashEmbedder::default(),
            completer: &completer,
            store: &store,
            extractor: &extractor,
            sheets: &sheets,
            retry: &retry,
        };

        ctx.multi_date_merged("total equipment installed in june").await.unwrap();
        let prompt = &completer.prompts()[0];
        assert!(prompt.contains("Total Records: 2"), "{prompt}");
        assert!(prompt.contains("• Cable: 4\n• Camera: 3"), "{prompt}");
        assert!(!prompt.contains("Alarme"));
    }

    #[tokio::test]
    async fn merged_filters_to_nothing() {
        let tmp = fixture();
        let sheets = sheets(tmp.path());
        let store = DirSheetStore::new(tmp.path());
        let completer = ScriptedCompleter::new("OK");
        let extractor = FixedExtractor(FilterCriteria {
            client: Some("Inconnu".to_string()),
            ..Default::default()
        });
        let retry = retry();
        let ctx = ToolContext {
            embedder: &HashEmbedder::default(),
            completer: &completer,
            store: &store,
            extractor: &extractor,
            sheets: &sheets,
            retry: &retry,
        };

        let err = ctx.multi_date_merged("travaux pour Inconnu").await.unwrap_err();
        assert!(err.to_string().contains("\"client\":\"Inconnu\""), "{err}");
    }
}
