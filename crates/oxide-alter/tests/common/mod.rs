#![allow(dead_code)]

use std::collections::BTreeMap;

use oxide_alter::prelude::*;

pub fn presets() -> Vec<PlatformInfo> {
    ["generic", "postgresql", "mysql", "sqlite"]
        .into_iter()
        .filter_map(PlatformInfo::preset)
        .collect()
}

pub fn db(tables: Vec<Table>) -> Database {
    tables.into_iter().fold(Database::new("test"), Database::table)
}

pub fn id_column() -> Column {
    Column::new("id", LogicalType::Integer).primary_key().required()
}

/// Compares and plans, accepting row loss.
pub fn plan_with(old: &Database, new: &Database, caps: &PlatformInfo) -> Result<AlterationScript> {
    let changes = ModelComparator::new(caps).compare(old, new)?;
    AlterationPlanner::new(caps)
        .with_options(PlannerOptions::accepting_row_loss())
        .plan(&changes)
}

pub fn plan_ok(old: &Database, new: &Database, caps: &PlatformInfo) -> AlterationScript {
    plan_with(old, new, caps)
        .unwrap_or_else(|e| panic!("Failed to plan on {}: {e}", caps.name))
}

/// Applies `script` to `old` and returns what is left to change.
pub fn remaining(
    old: &Database,
    new: &Database,
    caps: &PlatformInfo,
    script: &AlterationScript,
) -> ChangeSet {
    let mut state = SchemaState::for_platform(old.clone(), caps);
    state
        .apply_script(script)
        .unwrap_or_else(|e| panic!("Failed to apply on {}: {e}\n{script:#?}", caps.name));
    ModelComparator::new(caps)
        .compare(&state.into_database(), new)
        .unwrap_or_else(|e| panic!("Applied model is invalid on {}: {e}", caps.name))
}

pub fn assert_round_trip(old: &Database, new: &Database, caps: &PlatformInfo) -> AlterationScript {
    let script = plan_ok(old, new, caps);
    let left = remaining(old, new, caps, &script);
    assert!(
        left.is_empty(),
        "Script on {} left changes: {:?}",
        caps.name,
        left.changes()
    );
    script
}

pub type Row = BTreeMap<String, Option<String>>;

/// Rows of every table, keyed by lowercase names.
///
/// Only the effects planned steps have on existing values are modelled: new
/// columns start out NULL or at their default, backfills fill NULLs, and
/// tightening a column that still holds NULL fails.
#[derive(Debug, Default)]
pub struct Rows {
    tables: BTreeMap<String, Vec<Row>>,
}

impl Rows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: &str, values: &[(&str, Option<&str>)]) {
        let row = values
            .iter()
            .map(|(c, v)| (c.to_ascii_lowercase(), v.map(str::to_string)))
            .collect();
        self.tables
            .entry(table.to_ascii_lowercase())
            .or_default()
            .push(row);
    }

    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables
            .get(&table.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn value(&self, table: &str, row: usize, column: &str) -> Option<&str> {
        self.rows(table)[row]
            .get(&column.to_ascii_lowercase())
            .and_then(|v| v.as_deref())
    }

    pub fn apply_script(&mut self, script: &AlterationScript) -> std::result::Result<(), String> {
        script.steps().try_for_each(|step| self.apply(step))
    }

    pub fn apply(&mut self, step: &Step) -> std::result::Result<(), String> {
        let key = step.table().to_ascii_lowercase();
        match step {
            Step::Change(Change::TableAdded { .. }) => {
                self.tables.insert(key, Vec::new());
            }
            Step::Change(Change::TableRemoved { .. }) => {
                self.tables.remove(&key);
            }
            Step::Change(Change::ColumnAdded { column, .. }) => {
                let rows = self.tables.entry(key).or_default();
                if column.required && column.default.is_none() && !rows.is_empty() {
                    return Err(format!("NOT NULL column '{}' added without value", column.name));
                }
                for row in rows {
                    row.insert(column.name.to_ascii_lowercase(), column.default.clone());
                }
            }
            Step::Change(Change::ColumnRemoved { column, .. }) => {
                for row in self.tables.entry(key).or_default() {
                    row.remove(&column.name.to_ascii_lowercase());
                }
            }
            Step::Change(Change::ColumnRequiredChanged {
                column,
                required: true,
                ..
            }) => {
                let column = column.to_ascii_lowercase();
                let has_null = self
                    .tables
                    .entry(key)
                    .or_default()
                    .iter()
                    .any(|row| row.get(&column).map_or(true, Option::is_none));
                if has_null {
                    return Err(format!("Column '{column}' still holds NULL"));
                }
            }
            Step::Backfill { column, fill, .. } => {
                let column = column.to_ascii_lowercase();
                for (n, row) in self.tables.entry(key).or_default().iter_mut().enumerate() {
                    let value = row.entry(column.clone()).or_insert(None);
                    if value.is_none() {
                        *value = Some(match fill {
                            Fill::Default(v) => v.clone(),
                            Fill::Identity => (n + 1).to_string(),
                        });
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}
