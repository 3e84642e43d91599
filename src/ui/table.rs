use crate::query::IndexResult;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
pub struct EntryRow {
    #[tabled(rename = "Kind")]
    pub kind: &'static str,
    #[tabled(rename = "Entry")]
    pub entry: String,
}

pub fn stats_table(stats: &[(&str, String)]) -> String {
    if stats.is_empty() {
        return String::new();
    }
    let rows: Vec<TableRow> = stats
        .iter()
        .map(|(label, value)| TableRow {
            metric: label.to_string(),
            value: value.clone(),
        })
        .collect();
    Table::new(&rows).with(Style::rounded()).to_string()
}

/// One row per coordinate child: project, internal, external, unknown, sources.
pub fn entries_table(result: &IndexResult) -> String {
    let mut rows = Vec::new();
    for project in &result.projects {
        rows.push(EntryRow {
            kind: "project",
            entry: format!("{} ({})", project.project, project.target),
        });
    }
    for internal in &result.internal {
        rows.push(EntryRow {
            kind: "internal",
            entry: internal.clone(),
        });
    }
    for external in &result.external {
        rows.push(EntryRow {
            kind: "external",
            entry: external.clone(),
        });
    }
    for unknown in &result.unknown {
        rows.push(EntryRow {
            kind: "unknown",
            entry: unknown.clone(),
        });
    }
    if let Some(sources) = &result.sources {
        rows.push(EntryRow {
            kind: "sources",
            entry: sources.clone(),
        });
    }
    if rows.is_empty() {
        return String::new();
    }
    Table::new(&rows).with(Style::rounded()).to_string()
}
