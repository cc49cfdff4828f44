//! Error types for comparison and planning.
//!
//! Hard failures are [`AlterError`] values. Data-loss findings are not errors:
//! they travel with the planned script as [`LossyOperation`] warnings so a
//! caller can tell them apart from a refusal to plan.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::{Capability, DroppedKeyValues};
use crate::schema::{LogicalType, Sizing};

/// Errors that can occur while comparing or planning.
#[derive(Debug, thiserror::Error)]
pub enum AlterError {
    /// An input model breaks a structural invariant.
    #[error("Invalid schema model: {0}")]
    Validation(#[from] ValidationError),

    /// A change cannot be sequenced under the platform's capabilities.
    #[error("Unsupported operation: {0}")]
    Unsupported(#[from] UnsupportedOperation),

    /// A change or step does not fit the schema it is applied to.
    #[error("Invalid schema state: {0}")]
    InvalidState(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Multiple errors occurred.
    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<AlterError>),
}

impl AlterError {
    /// Folds a list of errors into a single error, if there is any.
    ///
    /// One error is returned as-is; several are wrapped in [`AlterError::Multiple`].
    pub(crate) fn collect<E: Into<Self>>(errors: Vec<E>) -> Option<Self> {
        let mut errors: Vec<Self> = errors.into_iter().map(Into::into).collect();
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Returns every validation error carried by this error.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<&ValidationError> {
        match self {
            Self::Validation(e) => vec![e],
            Self::Multiple(errors) => errors.iter().flat_map(Self::validation_errors).collect(),
            _ => Vec::new(),
        }
    }

    /// Returns every unsupported operation carried by this error.
    #[must_use]
    pub fn unsupported_operations(&self) -> Vec<&UnsupportedOperation> {
        match self {
            Self::Unsupported(e) => vec![e],
            Self::Multiple(errors) => errors
                .iter()
                .flat_map(Self::unsupported_operations)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A malformed input model, detected before any comparison.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A table, column or constraint has an empty name.
    #[error("Empty {entity} name in '{database}'")]
    EmptyName {
        /// Database the entity belongs to.
        database: String,
        /// Kind of entity, with its owner where known.
        entity: String,
    },

    /// Two tables share a name.
    #[error("Duplicate table '{table}'")]
    DuplicateTable {
        /// The repeated table name.
        table: String,
    },

    /// A table has no columns.
    #[error("Table '{table}' has no columns")]
    NoColumns {
        /// Table name.
        table: String,
    },

    /// Two columns of one table share a name.
    #[error("Duplicate column '{column}' in table '{table}'")]
    DuplicateColumn {
        /// Table name.
        table: String,
        /// The repeated column name.
        column: String,
    },

    /// Two indexes of one table share a name.
    #[error("Duplicate index '{index}' in table '{table}'")]
    DuplicateIndex {
        /// Table name.
        table: String,
        /// The repeated index name.
        index: String,
    },

    /// Two foreign keys of one table share a name.
    #[error("Duplicate foreign key '{foreign_key}' in table '{table}'")]
    DuplicateForeignKey {
        /// Table name.
        table: String,
        /// The repeated constraint name.
        foreign_key: String,
    },

    /// An index lists no columns.
    #[error("Index '{index}' of table '{table}' has no columns")]
    EmptyIndex {
        /// Table name.
        table: String,
        /// Index name, or its position for unnamed indexes.
        index: String,
    },

    /// An index references a column the table does not declare.
    #[error("Index '{index}' of table '{table}' references unknown column '{column}'")]
    UnknownIndexColumn {
        /// Table name.
        table: String,
        /// Index name, or its position for unnamed indexes.
        index: String,
        /// The dangling column reference.
        column: String,
    },

    /// A foreign key has no reference pairs.
    #[error("Foreign key '{foreign_key}' of table '{table}' has no references")]
    EmptyForeignKey {
        /// Table name.
        table: String,
        /// Constraint name, or its position for unnamed keys.
        foreign_key: String,
    },

    /// A foreign key points at a table the model does not contain.
    #[error("Foreign key '{foreign_key}' of table '{table}' references unknown table '{foreign_table}'")]
    UnknownForeignTable {
        /// Table name.
        table: String,
        /// Constraint name, or its position for unnamed keys.
        foreign_key: String,
        /// The missing target table.
        foreign_table: String,
    },

    /// A foreign key's local side names a column the table does not declare.
    #[error("Foreign key '{foreign_key}' of table '{table}' references unknown local column '{column}'")]
    UnknownLocalColumn {
        /// Table name.
        table: String,
        /// Constraint name, or its position for unnamed keys.
        foreign_key: String,
        /// The dangling column reference.
        column: String,
    },

    /// A foreign key's foreign side names a column the target table does not declare.
    #[error("Foreign key '{foreign_key}' of table '{table}' references unknown column '{column}' in '{foreign_table}'")]
    UnknownForeignColumn {
        /// Table name.
        table: String,
        /// Constraint name, or its position for unnamed keys.
        foreign_key: String,
        /// The target table.
        foreign_table: String,
        /// The dangling column reference.
        column: String,
    },

    /// An identifier exceeds the platform's maximum length.
    #[error("Identifier '{identifier}' is longer than {max} characters")]
    IdentifierTooLong {
        /// The offending identifier.
        identifier: String,
        /// The platform limit.
        max: usize,
    },

    /// A decimal column declares a scale larger than its precision.
    #[error("Column '{column}' of table '{table}' has scale {scale} larger than precision {precision}")]
    InvalidScale {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Declared precision.
        precision: u32,
        /// Declared scale.
        scale: u32,
    },
}

/// A change the planner cannot sequence on the target platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedOperation {
    /// Table the change applies to.
    pub table: String,
    /// Column the change applies to, if it is column-level.
    pub column: Option<String>,
    /// Capability the platform lacks.
    pub capability: Capability,
    /// Short description of the refused change.
    pub reason: String,
}

impl UnsupportedOperation {
    pub(crate) fn new(
        table: impl Into<String>,
        column: Option<&str>,
        capability: Capability,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.map(str::to_string),
            capability,
            reason: reason.into(),
        }
    }

    /// Returns `table` or `table.column`.
    #[must_use]
    pub fn entity(&self) -> String {
        match &self.column {
            Some(column) => format!("{}.{}", self.table, column),
            None => self.table.clone(),
        }
    }
}

impl fmt::Display for UnsupportedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on '{}' (requires {})",
            self.reason,
            self.entity(),
            self.capability
        )
    }
}

impl std::error::Error for UnsupportedOperation {}

/// What existing data a lossy step may discard or null out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossKind {
    /// The table and all its rows are dropped.
    TableDropped,
    /// The column and its values are dropped.
    ColumnDropped,
    /// The column is converted to a type that cannot hold every old value.
    TypeNarrowed {
        /// Type before the change.
        from: LogicalType,
        /// Type after the change.
        to: LogicalType,
    },
    /// The column's size, precision or scale shrinks.
    SizeNarrowed {
        /// Sizing before the change.
        from: Sizing,
        /// Sizing after the change.
        to: Sizing,
    },
    /// A required column without default is added to a table that may hold rows.
    RequiredWithoutDefault,
    /// A nullable column without default becomes required; rows holding NULL are rejected.
    NullsRejected,
    /// The primary key loses columns; rows may collide on the narrower key.
    PrimaryKeyNarrowed {
        /// What the platform does with the colliding rows.
        outcome: DroppedKeyValues,
    },
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableDropped => write!(f, "table dropped"),
            Self::ColumnDropped => write!(f, "column dropped"),
            Self::TypeNarrowed { from, to } => write!(f, "type narrowed from {from} to {to}"),
            Self::SizeNarrowed { from, to } => write!(f, "size narrowed from {from} to {to}"),
            Self::RequiredWithoutDefault => write!(f, "required column added without default"),
            Self::NullsRejected => write!(f, "NULL values rejected by new NOT NULL"),
            Self::PrimaryKeyNarrowed { outcome } => {
                write!(f, "primary key narrowed, duplicate key {outcome}")
            }
        }
    }
}

/// A warning attached to a planned script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossyOperation {
    /// Table the step applies to.
    pub table: String,
    /// Column the step applies to, if it is column-level.
    pub column: Option<String>,
    /// What data may be lost.
    pub kind: LossKind,
    /// Whether the lossy step is part of the script or was held back.
    pub planned: bool,
}

impl fmt::Display for LossyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "{}.{}: {}", self.table, column, self.kind)?,
            None => write!(f, "{}: {}", self.table, self.kind)?,
        }
        if !self.planned {
            write!(f, " (not planned)")?;
        }
        Ok(())
    }
}

/// Result type for alteration operations.
pub type Result<T> = std::result::Result<T, AlterError>;
