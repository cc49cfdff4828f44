//! Replays planned steps onto a schema model.
//!
//! [`SchemaState`] is the reference interpretation of every [`Change`] and
//! [`Step`]. It is strict: a step that does not fit the current model (a
//! missing table, a column still covered by an index, a primary key that is
//! not the expected one) is an [`AlterError::InvalidState`], which is how a
//! badly ordered script shows up. Applying a complete script to the source
//! model yields a model the comparator finds equal to the target.

use tracing::debug;

use crate::capability::Capabilities;
use crate::change::Change;
use crate::error::{AlterError, Result};
use crate::plan::{AlterationScript, Step};
use crate::schema::{names_equal, Column, Database, Table};

/// A schema model that steps are applied to.
#[derive(Debug, Clone)]
pub struct SchemaState {
    database: Database,
    case_sensitive: bool,
    indices_supported: bool,
}

impl SchemaState {
    /// Creates a state over `database`.
    #[must_use]
    pub fn new(database: Database, case_sensitive: bool) -> Self {
        Self {
            database,
            case_sensitive,
            indices_supported: true,
        }
    }

    /// Creates a state that matches identifiers and tracks indexes the way
    /// `caps` does.
    #[must_use]
    pub fn for_platform(database: Database, caps: &dyn Capabilities) -> Self {
        Self {
            database,
            case_sensitive: caps.identifiers_case_sensitive(),
            indices_supported: caps.indices_supported(),
        }
    }

    /// Returns the current model.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Consumes and returns the model.
    #[must_use]
    pub fn into_database(self) -> Database {
        self.database
    }

    /// Applies every step of a script, in order.
    pub fn apply_script(&mut self, script: &AlterationScript) -> Result<()> {
        for phase in &script.phases {
            debug!(stage = %phase.stage, steps = phase.steps.len(), "Applying phase");
            for step in &phase.steps {
                self.apply_step(step)?;
            }
        }
        Ok(())
    }

    /// Applies a single step.
    pub fn apply_step(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Change(change) => self.apply_change(change),
            Step::Backfill { table, column, .. } => {
                let cs = self.case_sensitive;
                let t = self.table(table)?;
                if t.get_column(column, cs).is_none() {
                    return Err(missing_column(table, column));
                }
                Ok(())
            }
            Step::RebuildTable { table, order } => self.reorder(table, order),
        }
    }

    /// Applies a single change.
    pub fn apply_change(&mut self, change: &Change) -> Result<()> {
        let cs = self.case_sensitive;
        match change {
            Change::TableAdded { table } => {
                if self.database.get_table(&table.name, cs).is_some() {
                    return Err(AlterError::InvalidState(format!(
                        "Table '{}' already exists",
                        table.name
                    )));
                }
                self.database.tables.push(table.clone());
            }

            Change::TableRemoved { table } => {
                let referrer = self.database.tables.iter().find(|t| {
                    !names_equal(&t.name, &table.name, cs)
                        && t.foreign_keys
                            .iter()
                            .any(|fk| names_equal(&fk.foreign_table, &table.name, cs))
                });
                if let Some(referrer) = referrer {
                    return Err(AlterError::InvalidState(format!(
                        "Table '{}' is still referenced by table '{}'",
                        table.name, referrer.name
                    )));
                }
                let idx = self
                    .database
                    .tables
                    .iter()
                    .position(|t| names_equal(&t.name, &table.name, cs))
                    .ok_or_else(|| missing_table(&table.name))?;
                self.database.tables.remove(idx);
            }

            Change::ColumnAdded {
                table,
                column,
                position,
            } => {
                let t = self.table_mut(table)?;
                if t.get_column(&column.name, cs).is_some() {
                    return Err(AlterError::InvalidState(format!(
                        "Column '{}' already exists in table '{}'",
                        column.name, table
                    )));
                }
                match position {
                    Some(idx) => {
                        let idx = (*idx).min(t.columns.len());
                        t.columns.insert(idx, column.clone());
                    }
                    None => t.columns.push(column.clone()),
                }
            }

            Change::ColumnRemoved { table, column } => self.remove_column(table, &column.name)?,

            Change::ColumnOrderChanged { table, order } => self.reorder(table, order)?,

            Change::ColumnTypeChanged {
                table,
                column,
                to,
                to_sizing,
                ..
            } => {
                let c = self.column_mut(table, column)?;
                c.ty = *to;
                c.size = to_sizing.size;
                c.scale = to_sizing.scale;
            }

            Change::ColumnSizeChanged {
                table, column, to, ..
            } => {
                let c = self.column_mut(table, column)?;
                c.size = to.size;
                c.scale = to.scale;
            }

            Change::ColumnRequiredChanged {
                table,
                column,
                required,
            } => self.column_mut(table, column)?.required = *required,

            Change::ColumnAutoIncrementChanged {
                table,
                column,
                auto_increment,
            } => self.column_mut(table, column)?.auto_increment = *auto_increment,

            Change::ColumnDefaultChanged {
                table, column, to, ..
            } => self.column_mut(table, column)?.default = to.clone(),

            Change::PrimaryKeyChanged { table, from, to } => {
                let t = self.table_mut(table)?;
                let current = t.primary_key();
                let matches = current.len() == from.len()
                    && from
                        .iter()
                        .all(|f| current.iter().any(|c| names_equal(c, f, cs)));
                if !matches {
                    return Err(AlterError::InvalidState(format!(
                        "Primary key of table '{}' is ({}), expected ({})",
                        table,
                        current.join(", "),
                        from.join(", ")
                    )));
                }
                if let Some(name) = to.iter().find(|n| t.get_column(n, cs).is_none()) {
                    return Err(missing_column(table, name));
                }
                for column in &mut t.columns {
                    column.primary_key = to.iter().any(|n| names_equal(n, &column.name, cs));
                }
            }

            Change::IndexAdded { table, index } => {
                let t = self.table_mut(table)?;
                if t.indexes.iter().any(|i| i.identifies(index, cs)) {
                    return Err(AlterError::InvalidState(format!(
                        "Index '{}' already exists in table '{}'",
                        index.label(),
                        table
                    )));
                }
                if let Some(column) = index.columns.iter().find(|c| t.get_column(c, cs).is_none()) {
                    return Err(missing_column(table, column));
                }
                t.indexes.push(index.clone());
            }

            Change::IndexRemoved { table, index } => {
                let t = self.table_mut(table)?;
                let idx = t
                    .indexes
                    .iter()
                    .position(|i| i.identifies(index, cs))
                    .ok_or_else(|| missing_index(table, &index.label()))?;
                t.indexes.remove(idx);
            }

            Change::IndexColumnsChanged { table, from, to } => {
                let t = self.table_mut(table)?;
                let existing = t
                    .indexes
                    .iter_mut()
                    .find(|i| i.identifies(from, cs))
                    .ok_or_else(|| missing_index(table, &from.label()))?;
                *existing = to.clone();
            }

            Change::ForeignKeyAdded { table, foreign_key } => {
                let foreign = self
                    .database
                    .get_table(&foreign_key.foreign_table, cs)
                    .ok_or_else(|| missing_table(&foreign_key.foreign_table))?;
                if let Some(r) = foreign_key
                    .references
                    .iter()
                    .find(|r| foreign.get_column(&r.foreign, cs).is_none())
                {
                    return Err(missing_column(&foreign_key.foreign_table, &r.foreign));
                }

                let t = self.table_mut(table)?;
                if t.foreign_keys.iter().any(|fk| fk.identifies(foreign_key, cs)) {
                    return Err(AlterError::InvalidState(format!(
                        "Foreign key '{}' already exists in table '{}'",
                        foreign_key.label(),
                        table
                    )));
                }
                if let Some(r) = foreign_key
                    .references
                    .iter()
                    .find(|r| t.get_column(&r.local, cs).is_none())
                {
                    return Err(missing_column(table, &r.local));
                }
                t.foreign_keys.push(foreign_key.clone());
            }

            Change::ForeignKeyRemoved { table, foreign_key } => {
                let t = self.table_mut(table)?;
                let idx = t
                    .foreign_keys
                    .iter()
                    .position(|fk| fk.identifies(foreign_key, cs))
                    .ok_or_else(|| missing_foreign_key(table, &foreign_key.label()))?;
                let removed = t.foreign_keys.remove(idx);
                // the backing index goes with the constraint
                t.indexes.retain(|i| !removed.is_backed_by(i, cs));
            }

            Change::ForeignKeyReferencesChanged { table, from, to } => {
                let t = self.table_mut(table)?;
                let existing = t
                    .foreign_keys
                    .iter_mut()
                    .find(|fk| fk.identifies(from, cs))
                    .ok_or_else(|| missing_foreign_key(table, &from.label()))?;
                *existing = to.clone();
            }
        }
        Ok(())
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.database
            .get_table(name, self.case_sensitive)
            .ok_or_else(|| missing_table(name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.database
            .get_table_mut(name, self.case_sensitive)
            .ok_or_else(|| missing_table(name))
    }

    fn column_mut(&mut self, table: &str, column: &str) -> Result<&mut Column> {
        let cs = self.case_sensitive;
        self.table_mut(table)?
            .get_column_mut(column, cs)
            .ok_or_else(|| missing_column(table, column))
    }

    fn remove_column(&mut self, table: &str, column: &str) -> Result<()> {
        let cs = self.case_sensitive;
        let inbound = self
            .database
            .tables
            .iter()
            .flat_map(|t| t.foreign_keys.iter().map(move |fk| (t, fk)))
            .find(|(t, fk)| {
                fk.uses_foreign(table, column, cs)
                    || (names_equal(&t.name, table, cs) && fk.uses_local(column, cs))
            });
        if let Some((owner, fk)) = inbound {
            return Err(AlterError::InvalidState(format!(
                "Column '{}.{}' is still used by foreign key '{}' of table '{}'",
                table,
                column,
                fk.label(),
                owner.name
            )));
        }

        let indices_supported = self.indices_supported;
        let t = self.table_mut(table)?;
        let idx = t
            .ordinal_of(column, cs)
            .ok_or_else(|| missing_column(table, column))?;
        if t.columns[idx].primary_key {
            return Err(AlterError::InvalidState(format!(
                "Column '{table}.{column}' is still part of the primary key"
            )));
        }
        if indices_supported {
            if let Some(index) = t.indexes.iter().find(|i| i.covers(column, cs)) {
                return Err(AlterError::InvalidState(format!(
                    "Column '{}.{}' is still covered by index '{}'",
                    table,
                    column,
                    index.label()
                )));
            }
        } else {
            t.indexes.retain(|i| !i.covers(column, cs));
        }
        t.columns.remove(idx);
        Ok(())
    }

    fn reorder(&mut self, table: &str, order: &[String]) -> Result<()> {
        let cs = self.case_sensitive;
        let t = self.table_mut(table)?;
        if order.len() != t.columns.len() {
            return Err(AlterError::InvalidState(format!(
                "Column order for table '{}' names {} columns, table has {}",
                table,
                order.len(),
                t.columns.len()
            )));
        }

        let mut remaining = std::mem::take(&mut t.columns);
        let mut reordered = Vec::with_capacity(remaining.len());
        for name in order {
            match remaining.iter().position(|c| names_equal(&c.name, name, cs)) {
                Some(idx) => reordered.push(remaining.remove(idx)),
                None => {
                    reordered.append(&mut remaining);
                    t.columns = reordered;
                    return Err(missing_column(table, name));
                }
            }
        }
        t.columns = reordered;
        Ok(())
    }
}

fn missing_table(name: &str) -> AlterError {
    AlterError::InvalidState(format!("Table '{name}' does not exist"))
}

fn missing_column(table: &str, column: &str) -> AlterError {
    AlterError::InvalidState(format!(
        "Column '{column}' does not exist in table '{table}'"
    ))
}

fn missing_index(table: &str, index: &str) -> AlterError {
    AlterError::InvalidState(format!("Index '{index}' does not exist in table '{table}'"))
}

fn missing_foreign_key(table: &str, foreign_key: &str) -> AlterError {
    AlterError::InvalidState(format!(
        "Foreign key '{foreign_key}' does not exist in table '{table}'"
    ))
}
