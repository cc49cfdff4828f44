//! Structural changes between two schema snapshots.
//!
//! A [`Change`] names its table and column by identifier and owns copies of
//! any definitions it carries, so it stays meaningful after the models it was
//! derived from are gone.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::{Column, Database, ForeignKey, Index, LogicalType, Sizing, Table};

/// A single structural difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    /// A table exists only in the new model. Its foreign keys are reported
    /// separately as [`Change::ForeignKeyAdded`].
    TableAdded {
        /// Table definition, without foreign keys.
        table: Table,
    },

    /// A table exists only in the old model. Its foreign keys are reported
    /// separately as [`Change::ForeignKeyRemoved`].
    TableRemoved {
        /// Table definition, without foreign keys.
        table: Table,
    },

    /// A column exists only in the new table.
    ColumnAdded {
        /// Table name.
        table: String,
        /// Column definition.
        column: Column,
        /// Ordinal position to insert at; `None` appends.
        position: Option<usize>,
    },

    /// A column exists only in the old table.
    ColumnRemoved {
        /// Table name.
        table: String,
        /// Column definition as it was.
        column: Column,
    },

    /// The relative order of the columns changed.
    ColumnOrderChanged {
        /// Table name.
        table: String,
        /// Every column name in the new ordinal order.
        order: Vec<String>,
    },

    /// The column's type changed. The new sizing travels with it.
    ColumnTypeChanged {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Type before.
        from: LogicalType,
        /// Type after.
        to: LogicalType,
        /// Sizing before.
        from_sizing: Sizing,
        /// Sizing after.
        to_sizing: Sizing,
    },

    /// The column's size, precision or scale changed; the type did not.
    ColumnSizeChanged {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Sizing before.
        from: Sizing,
        /// Sizing after.
        to: Sizing,
    },

    /// The column became required or nullable.
    ColumnRequiredChanged {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// New required-ness.
        required: bool,
    },

    /// The column gained or lost its identity property.
    ColumnAutoIncrementChanged {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// New identity status.
        auto_increment: bool,
    },

    /// The column's default value changed.
    ColumnDefaultChanged {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Default before.
        from: Option<String>,
        /// Default after.
        to: Option<String>,
    },

    /// The primary key's column set changed.
    PrimaryKeyChanged {
        /// Table name.
        table: String,
        /// Key columns before, in declaration order; empty when there was no key.
        from: Vec<String>,
        /// Key columns after, in declaration order; empty when the key goes away.
        to: Vec<String>,
    },

    /// An index or unique constraint exists only in the new table.
    IndexAdded {
        /// Table name.
        table: String,
        /// Index definition.
        index: Index,
    },

    /// An index or unique constraint exists only in the old table.
    IndexRemoved {
        /// Table name.
        table: String,
        /// Index definition as it was.
        index: Index,
    },

    /// A same-named index covers different columns.
    IndexColumnsChanged {
        /// Table name.
        table: String,
        /// Index before.
        from: Index,
        /// Index after.
        to: Index,
    },

    /// A foreign key exists only in the new table.
    ForeignKeyAdded {
        /// Owning table name.
        table: String,
        /// Constraint definition.
        foreign_key: ForeignKey,
    },

    /// A foreign key exists only in the old table.
    ForeignKeyRemoved {
        /// Owning table name.
        table: String,
        /// Constraint definition as it was.
        foreign_key: ForeignKey,
    },

    /// A same-named foreign key targets different columns or actions.
    ForeignKeyReferencesChanged {
        /// Owning table name.
        table: String,
        /// Constraint before.
        from: ForeignKey,
        /// Constraint after.
        to: ForeignKey,
    },
}

/// The variant of a [`Change`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    TableAdded,
    TableRemoved,
    ColumnAdded,
    ColumnRemoved,
    ColumnOrderChanged,
    ColumnTypeChanged,
    ColumnSizeChanged,
    ColumnRequiredChanged,
    ColumnAutoIncrementChanged,
    ColumnDefaultChanged,
    PrimaryKeyChanged,
    IndexAdded,
    IndexRemoved,
    IndexColumnsChanged,
    ForeignKeyAdded,
    ForeignKeyRemoved,
    ForeignKeyReferencesChanged,
}

impl Change {
    /// Returns the variant.
    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::TableAdded { .. } => ChangeKind::TableAdded,
            Self::TableRemoved { .. } => ChangeKind::TableRemoved,
            Self::ColumnAdded { .. } => ChangeKind::ColumnAdded,
            Self::ColumnRemoved { .. } => ChangeKind::ColumnRemoved,
            Self::ColumnOrderChanged { .. } => ChangeKind::ColumnOrderChanged,
            Self::ColumnTypeChanged { .. } => ChangeKind::ColumnTypeChanged,
            Self::ColumnSizeChanged { .. } => ChangeKind::ColumnSizeChanged,
            Self::ColumnRequiredChanged { .. } => ChangeKind::ColumnRequiredChanged,
            Self::ColumnAutoIncrementChanged { .. } => ChangeKind::ColumnAutoIncrementChanged,
            Self::ColumnDefaultChanged { .. } => ChangeKind::ColumnDefaultChanged,
            Self::PrimaryKeyChanged { .. } => ChangeKind::PrimaryKeyChanged,
            Self::IndexAdded { .. } => ChangeKind::IndexAdded,
            Self::IndexRemoved { .. } => ChangeKind::IndexRemoved,
            Self::IndexColumnsChanged { .. } => ChangeKind::IndexColumnsChanged,
            Self::ForeignKeyAdded { .. } => ChangeKind::ForeignKeyAdded,
            Self::ForeignKeyRemoved { .. } => ChangeKind::ForeignKeyRemoved,
            Self::ForeignKeyReferencesChanged { .. } => ChangeKind::ForeignKeyReferencesChanged,
        }
    }

    /// Name of the table the change applies to.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::TableAdded { table } | Self::TableRemoved { table } => &table.name,
            Self::ColumnAdded { table, .. }
            | Self::ColumnRemoved { table, .. }
            | Self::ColumnOrderChanged { table, .. }
            | Self::ColumnTypeChanged { table, .. }
            | Self::ColumnSizeChanged { table, .. }
            | Self::ColumnRequiredChanged { table, .. }
            | Self::ColumnAutoIncrementChanged { table, .. }
            | Self::ColumnDefaultChanged { table, .. }
            | Self::PrimaryKeyChanged { table, .. }
            | Self::IndexAdded { table, .. }
            | Self::IndexRemoved { table, .. }
            | Self::IndexColumnsChanged { table, .. }
            | Self::ForeignKeyAdded { table, .. }
            | Self::ForeignKeyRemoved { table, .. }
            | Self::ForeignKeyReferencesChanged { table, .. } => table,
        }
    }

    /// Name of the column the change applies to, for column-level changes.
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::ColumnAdded { column, .. } | Self::ColumnRemoved { column, .. } => {
                Some(&column.name)
            }
            Self::ColumnTypeChanged { column, .. }
            | Self::ColumnSizeChanged { column, .. }
            | Self::ColumnRequiredChanged { column, .. }
            | Self::ColumnAutoIncrementChanged { column, .. }
            | Self::ColumnDefaultChanged { column, .. } => Some(column),
            _ => None,
        }
    }

    /// Returns a human-readable description of this change.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::TableAdded { table } => format!("Add table '{}'", table.name),
            Self::TableRemoved { table } => format!("Remove table '{}'", table.name),
            Self::ColumnAdded {
                table,
                column,
                position,
            } => match position {
                Some(at) => format!(
                    "Add column '{}' to table '{}' at position {}",
                    column.name, table, at
                ),
                None => format!("Add column '{}' to table '{}'", column.name, table),
            },
            Self::ColumnRemoved { table, column } => {
                format!("Remove column '{}' from table '{}'", column.name, table)
            }
            Self::ColumnOrderChanged { table, order } => {
                format!("Reorder columns of table '{}' to ({})", table, order.join(", "))
            }
            Self::ColumnTypeChanged {
                table,
                column,
                from,
                to,
                from_sizing,
                to_sizing,
            } => format!(
                "Change type of '{}.{}' from {}{} to {}{}",
                table, column, from, from_sizing, to, to_sizing
            ),
            Self::ColumnSizeChanged {
                table,
                column,
                from,
                to,
            } => format!("Change size of '{}.{}' from {} to {}", table, column, from, to),
            Self::ColumnRequiredChanged {
                table,
                column,
                required,
            } => format!(
                "Make '{}.{}' {}",
                table,
                column,
                if *required { "required" } else { "nullable" }
            ),
            Self::ColumnAutoIncrementChanged {
                table,
                column,
                auto_increment,
            } => format!(
                "{} identity on '{}.{}'",
                if *auto_increment { "Enable" } else { "Disable" },
                table,
                column
            ),
            Self::ColumnDefaultChanged {
                table,
                column,
                from,
                to,
            } => format!(
                "Change default of '{}.{}' from {} to {}",
                table,
                column,
                from.as_deref().unwrap_or("none"),
                to.as_deref().unwrap_or("none")
            ),
            Self::PrimaryKeyChanged { table, from, to } => match (from.is_empty(), to.is_empty()) {
                (true, _) => format!("Create primary key ({}) on '{}'", to.join(", "), table),
                (false, true) => format!("Drop primary key ({}) of '{}'", from.join(", "), table),
                (false, false) => format!(
                    "Change primary key of '{}' from ({}) to ({})",
                    table,
                    from.join(", "),
                    to.join(", ")
                ),
            },
            Self::IndexAdded { table, index } => {
                format!("Add index '{}' to table '{}'", index.label(), table)
            }
            Self::IndexRemoved { table, index } => {
                format!("Remove index '{}' from table '{}'", index.label(), table)
            }
            Self::IndexColumnsChanged { table, from, to } => format!(
                "Change columns of index '{}' on '{}' from ({}) to ({})",
                from.label(),
                table,
                from.columns.join(", "),
                to.columns.join(", ")
            ),
            Self::ForeignKeyAdded { table, foreign_key } => format!(
                "Add foreign key '{}' to table '{}'",
                foreign_key.label(),
                table
            ),
            Self::ForeignKeyRemoved { table, foreign_key } => format!(
                "Remove foreign key '{}' from table '{}'",
                foreign_key.label(),
                table
            ),
            Self::ForeignKeyReferencesChanged { table, from, .. } => format!(
                "Change references of foreign key '{}' on '{}'",
                from.label(),
                table
            ),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// The comparator's output: every change between two models.
///
/// The set also keeps owned snapshots of both models. The planner uses them
/// to find constraints that cover an altered column but did not change
/// themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    changes: Vec<Change>,
    source: Database,
    target: Database,
}

impl ChangeSet {
    pub(crate) fn new(changes: Vec<Change>, source: Database, target: Database) -> Self {
        Self {
            changes,
            source,
            target,
        }
    }

    /// Returns the changes, in deterministic comparator order.
    #[must_use]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Iterates over the changes.
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// Returns true if the models are structurally identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Changes of one kind.
    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(move |c| c.kind() == kind)
    }

    /// The model the changes start from.
    #[must_use]
    pub fn source(&self) -> &Database {
        &self.source
    }

    /// The model the changes lead to.
    #[must_use]
    pub fn target(&self) -> &Database {
        &self.target
    }

    /// Consumes the set, returning the changes.
    #[must_use]
    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_and_column_accessors() {
        let change = Change::ColumnAdded {
            table: "t".into(),
            column: Column::new("c", LogicalType::Integer),
            position: None,
        };
        assert_eq!(change.kind(), ChangeKind::ColumnAdded);
        assert_eq!(change.table(), "t");
        assert_eq!(change.column(), Some("c"));

        let change = Change::TableAdded {
            table: Table::new("orders"),
        };
        assert_eq!(change.table(), "orders");
        assert_eq!(change.column(), None);
    }

    #[test]
    fn test_descriptions() {
        let change = Change::ColumnSizeChanged {
            table: "t".into(),
            column: "c".into(),
            from: Sizing {
                size: Some(20),
                scale: None,
            },
            to: Sizing {
                size: Some(32),
                scale: None,
            },
        };
        assert_eq!(change.to_string(), "Change size of 't.c' from (20) to (32)");

        let change = Change::PrimaryKeyChanged {
            table: "t".into(),
            from: vec!["a".into()],
            to: Vec::new(),
        };
        assert_eq!(change.description(), "Drop primary key (a) of 't'");
    }

    #[test]
    fn test_change_set_filters_by_kind() {
        let set = ChangeSet::new(
            vec![
                Change::IndexRemoved {
                    table: "t".into(),
                    index: Index::named("i").column("c"),
                },
                Change::ColumnRemoved {
                    table: "t".into(),
                    column: Column::new("c", LogicalType::Integer),
                },
            ],
            Database::default(),
            Database::default(),
        );
        assert_eq!(set.len(), 2);
        assert_eq!(set.of_kind(ChangeKind::IndexRemoved).count(), 1);
        assert_eq!(set.of_kind(ChangeKind::TableAdded).count(), 0);
    }
}
