//! Filtrado de filas por `FilterCriteria` y agregación de los tokens
//! `nombre:cantidad` de las columnas de equipos.

use tracing::debug;

use crate::models::{EquipmentTally, FilterCriteria, Record, Table};

pub const INSTALLED_COLUMN: &str = "equipement_installee";
pub const RETURNED_COLUMN: &str = "equipement_retour";
pub const PLANNING_EQUIPMENT_COLUMN: &str = "equipment";
pub const CLIENT_COLUMN: &str = "client";
pub const SITE_MANAGER_COLUMN: &str = "chef_chantier";

/// Columnas donde se busca `equipment_type`.
pub const EQUIPMENT_COLUMNS: [&str; 2] = [INSTALLED_COLUMN, RETURNED_COLUMN];

/// Aplica los filtros en orden fijo (mes, año, rango, cliente, jefe de obra,
/// tipo de equipo), de forma conjuntiva. Un filtro cuya columna no existe
/// no hace nada.
pub fn apply_filters(table: &Table, criteria: &FilterCriteria) -> Table {
    let mut filtered = table.clone();
    debug!("Filtrando {} filas con {:?}", filtered.len(), criteria);

    if filtered.has_dates() {
        if let Some(month) = criteria.month {
            filtered = filtered.retain(|r| r.date.map(|d| chrono::Datelike::month(&d)) == Some(month));
            debug!("Tras filtro de mes ({month}): {} filas", filtered.len());
        }
        if let Some(year) = criteria.year {
            filtered = filtered.retain(|r| r.date.map(|d| chrono::Datelike::year(&d)) == Some(year));
            debug!("Tras filtro de año ({year}): {} filas", filtered.len());
        }
        if let Some(range) = criteria.date_range {
            filtered = filtered.retain(|r| r.date.map(|d| range.contains(d)).unwrap_or(false));
            debug!("Tras filtro de rango: {} filas", filtered.len());
        }
    }

    if let Some(client) = &criteria.client {
        filtered = substring_filter(filtered, &[CLIENT_COLUMN], client);
    }
    if let Some(manager) = &criteria.site_manager {
        filtered = substring_filter(filtered, &[SITE_MANAGER_COLUMN], manager);
    }
    if let Some(equipment) = &criteria.equipment_type {
        filtered = substring_filter(filtered, &EQUIPMENT_COLUMNS, equipment);
    }

    filtered
}

/// Conserva las filas en las que alguna de `columns` contiene `needle`
/// (sin distinguir mayúsculas). Sin columnas presentes, no filtra.
fn substring_filter(table: Table, columns: &[&str], needle: &str) -> Table {
    let present: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| table.has_column(c))
        .collect();
    let needle = needle.trim().to_lowercase();
    if present.is_empty() || needle.is_empty() {
        return table;
    }
    let filtered = table.retain(|row| {
        present.iter().any(|column| {
            row.get(column)
                .map(|value| value.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
    });
    debug!("Tras filtro '{needle}' en {:?}: {} filas", present, filtered.len());
    filtered
}

/// Acumula una celda `Camera:3, Cable:2` en `tally`. Los tokens mal formados
/// (sin ':' o con cantidad no entera) se ignoran uno a uno.
pub fn parse_tally_tokens(raw: &str, tally: &mut EquipmentTally) {
    for token in raw.split(',') {
        let Some((name, count)) = token.trim().split_once(':') else {
            continue;
        };
        let name = name.trim();
        match count.trim().parse::<u64>() {
            Ok(count) if !name.is_empty() => tally.add(name, count),
            _ => continue,
        }
    }
}

pub fn tally_rows<'a>(rows: impl IntoIterator<Item = &'a Record>, column: &str) -> EquipmentTally {
    let mut tally = EquipmentTally::default();
    for row in rows {
        if let Some(raw) = row.get(column) {
            parse_tally_tokens(raw, &mut tally);
        }
    }
    tally
}

pub fn aggregate_column(table: &Table, column: &str) -> EquipmentTally {
    if !table.has_column(column) {
        return EquipmentTally::default();
    }
    tally_rows(&table.rows, column)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyOrder {
    /// Cantidad descendente ("lo más usado").
    Ranked,
    /// Alfabético (inventario).
    Inventory,
}

/// Lista con viñetas `• nombre: cantidad`.
pub fn format_tally(tally: &EquipmentTally, order: TallyOrder) -> String {
    let items = match order {
        TallyOrder::Ranked => tally.ranked(),
        TallyOrder::Inventory => tally.inventory(),
    };
    items
        .iter()
        .map(|(name, count)| format!("• {name}: {count}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Qué columnas de equipos mostrar para una pregunta. Ambas pueden estar
/// activas a la vez; si la pregunta no indica nada se muestran las instaladas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EquipmentView {
    pub show_installed: bool,
    pub show_returned: bool,
}

impl EquipmentView {
    pub fn from_query(query: &str) -> Self {
        let q = query.to_lowercase();
        let show_returned = ["return", "retour", "rendu", "devuelto"]
            .iter()
            .any(|k| q.contains(k));
        let show_installed = ["installed", "installé", "installe", "utilisé", "used", "posé"]
            .iter()
            .any(|k| q.contains(k));
        Self {
            show_installed: show_installed || !show_returned,
            show_returned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregationMode, DateRange};
    use crate::sheets::parse_csv_table;
    use chrono::NaiveDate;

    fn reports() -> Table {
        parse_csv_table(
            "date,client,chef_chantier,equipement_installee,equipement_retour\n\
             01-06-2025,Acme Sécurité,Karim,\"Camera:2\",\n\
             02-06-2025,Beta Logistique,Sofia,\"Camera:1,Cable:4\",\"Switch:1\"\n\
             15-07-2025,ACME Sécurité,Karim,\"Alarme:1\",\"Camera:1\"\n\
             20-07-2024,Gamma,Sofia,\"Cable:10\",\n",
        )
        .unwrap()
    }

    fn codes(table: &Table) -> Vec<String> {
        table
            .rows
            .iter()
            .map(|r| r.get("date").unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn sums_repeated_names() {
        let mut tally = EquipmentTally::default();
        parse_tally_tokens("Camera:3,Cable:2,Camera:1", &mut tally);
        assert_eq!(tally, EquipmentTally::from([("Camera", 4), ("Cable", 2)]));
    }

    #[test]
    fn malformed_tokens_are_skipped() {
        let mut tally = EquipmentTally::default();
        parse_tally_tokens("Camera:3,BadToken,Cable:x", &mut tally);
        assert_eq!(tally, EquipmentTally::from([("Camera", 3)]));

        parse_tally_tokens(" , :4, Dome : 2 ,Bullet:-1", &mut tally);
        assert_eq!(tally.get("Dome"), Some(2));
        assert_eq!(tally.get("Bullet"), None);
        assert_eq!(tally.len(), 2);
    }

    #[test]
    fn huge_counts_saturate_instead_of_overflowing() {
        let mut tally = EquipmentTally::default();
        parse_tally_tokens("Camera:18446744073709551615,Camera:1,Cable:2", &mut tally);
        assert_eq!(tally.get("Camera"), Some(u64::MAX));
        assert_eq!(tally.get("Cable"), Some(2));
        assert_eq!(format_tally(&tally, TallyOrder::Ranked).lines().count(), 2);
    }

    #[test]
    fn empty_criteria_returns_table_unchanged() {
        let table = reports();
        assert_eq!(apply_filters(&table, &FilterCriteria::default()), table);
    }

    #[test]
    fn month_and_year_filters() {
        let table = reports();
        let july = FilterCriteria {
            month: Some(7),
            ..Default::default()
        };
        assert_eq!(codes(&apply_filters(&table, &july)), vec!["15-07-2025", "20-07-2024"]);

        let july_2025 = FilterCriteria {
            month: Some(7),
            year: Some(2025),
            ..Default::default()
        };
        assert_eq!(codes(&apply_filters(&table, &july_2025)), vec!["15-07-2025"]);
    }

    #[test]
    fn date_range_is_inclusive() {
        let criteria = FilterCriteria {
            date_range: Some(DateRange {
                start: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                end: NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(),
            }),
            ..Default::default()
        };
        assert_eq!(
            codes(&apply_filters(&reports(), &criteria)),
            vec!["02-06-2025", "15-07-2025"]
        );
    }

    #[test]
    fn text_filters_are_case_insensitive_substrings() {
        let criteria = FilterCriteria {
            client: Some("acme".to_string()),
            site_manager: Some("KARIM".to_string()),
            ..Default::default()
        };
        assert_eq!(
            codes(&apply_filters(&reports(), &criteria)),
            vec!["01-06-2025", "15-07-2025"]
        );
    }

    #[test]
    fn equipment_type_matches_any_equipment_column() {
        let criteria = FilterCriteria {
            equipment_type: Some("switch".to_string()),
            ..Default::default()
        };
        assert_eq!(codes(&apply_filters(&reports(), &criteria)), vec!["02-06-2025"]);

        let camera = FilterCriteria {
            equipment_type: Some("camera".to_string()),
            ..Default::default()
        };
        // 15-07 sólo tiene la cámara en la columna de retorno.
        assert_eq!(
            codes(&apply_filters(&reports(), &camera)),
            vec!["01-06-2025", "02-06-2025", "15-07-2025"]
        );
    }

    #[test]
    fn filters_without_column_are_noops() {
        let table = parse_csv_table("equipe,equipment\nA,Camera:1\nB,Cable:2\n").unwrap();
        let criteria = FilterCriteria {
            month: Some(6),
            client: Some("acme".to_string()),
            equipment_type: Some("camera".to_string()),
            ..Default::default()
        };
        assert_eq!(apply_filters(&table, &criteria), table);
    }

    #[test]
    fn filtering_to_nothing_is_not_an_error() {
        let criteria = FilterCriteria {
            client: Some("inexistant".to_string()),
            ..Default::default()
        };
        assert!(apply_filters(&reports(), &criteria).is_empty());
    }

    #[test]
    fn june_total_scenario() {
        let table = parse_csv_table(
            "date,equipement_installee\n01-06-2025,\"Camera:2\"\n02-06-2025,\"Camera:1,Cable:4\"\n",
        )
        .unwrap();
        let criteria = FilterCriteria {
            month: Some(6),
            aggregation_mode: Some(AggregationMode::Total),
            ..Default::default()
        };
        let filtered = apply_filters(&table, &criteria);
        assert_eq!(filtered.len(), 2);
        assert!(criteria.wants_aggregation());
        assert_eq!(
            aggregate_column(&filtered, INSTALLED_COLUMN),
            EquipmentTally::from([("Camera", 3), ("Cable", 4)])
        );
    }

    #[test]
    fn tally_presentation_orders() {
        let tally = EquipmentTally::from([("Cable", 4), ("Camera", 3), ("Alarme", 3)]);
        assert_eq!(
            format_tally(&tally, TallyOrder::Ranked),
            "• Cable: 4\n• Alarme: 3\n• Camera: 3"
        );
        assert_eq!(
            format_tally(&tally, TallyOrder::Inventory),
            "• Alarme: 3\n• Cable: 4\n• Camera: 3"
        );
    }

    #[test]
    fn equipment_view_flags() {
        let both = EquipmentView::from_query("equipment installed and returned in july");
        assert!(both.show_installed && both.show_returned);

        let returned = EquipmentView::from_query("matériel en retour ce mois");
        assert!(!returned.show_installed && returned.show_returned);

        let default = EquipmentView::from_query("what equipment in june");
        assert!(default.show_installed && !default.show_returned);
    }
}
