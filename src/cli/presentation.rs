//! CLI presentation: report types and their text rendering.

use crate::context::EditTypeClosure;
use crate::repository::StatisticsSnapshot;
use crate::types::{EntityType, Id};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize)]
pub struct TypeCount {
    pub entity_type: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResidentSize {
    pub root: Id,
    pub entities: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub rows: Vec<TypeCount>,
    pub residents: Vec<ResidentSize>,
    pub statistics: StatisticsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedSummary {
    pub configuration: Id,
    pub name: String,
    pub monsters: usize,
    pub character_classes: usize,
    pub account: Id,
}

fn names(types: &BTreeSet<EntityType>) -> String {
    if types.is_empty() {
        return "-".to_string();
    }
    types.iter().map(|ty| ty.name()).collect::<Vec<_>>().join("\n")
}

pub fn format_closure_text(closure: &EditTypeClosure) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Editable", "Back-references", "Read-only"]);
    table.add_row(vec![
        names(&closure.edit_types),
        names(&closure.back_reference_types),
        names(&closure.read_only_types),
    ]);

    let mut out = format!("Edit closure of {}\n{}\n", closure.root, table);
    if let Some(navigation) = closure.parent_collection_navigation {
        out.push_str(&format!("Held by aggregate root collection: {}\n", navigation));
    }
    out
}

pub fn format_stats_text(report: &StatsReport) -> String {
    let mut rows = Table::new();
    rows.load_preset(UTF8_BORDERS_ONLY);
    rows.set_header(vec!["Entity type", "Rows"]);
    for count in &report.rows {
        rows.add_row(vec![count.entity_type.clone(), count.rows.to_string()]);
    }

    let mut out = format!("{}\n", rows);
    if !report.residents.is_empty() {
        let mut residents = Table::new();
        residents.load_preset(UTF8_BORDERS_ONLY);
        residents.set_header(vec!["Aggregate root", "Cached entities"]);
        for resident in &report.residents {
            residents.add_row(vec![resident.root.to_string(), resident.entities.to_string()]);
        }
        out.push_str(&format!("{}\n", residents));
    }
    out.push_str(&format!(
        "Full-table loads: {}  Aggregate populations: {}\n",
        report.statistics.full_loads, report.statistics.aggregate_populations
    ));
    out
}

pub fn format_seed_summary(summary: &SeedSummary) -> String {
    format!(
        "Seeded '{}' ({})\n  monsters: {}\n  character classes: {}\n  demo account: {}",
        summary.name, summary.configuration, summary.monsters, summary.character_classes, summary.account
    )
}
