//! Platform capability descriptors.
//!
//! The planner never branches on a platform name. Everything it needs to know
//! about the target database is asked through [`Capabilities`], so supporting
//! a new platform means supplying a descriptor, typically a [`PlatformInfo`]
//! loaded from JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::LogicalType;

/// What a platform does with rows whose key values no longer fit after a
/// primary key loses columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroppedKeyValues {
    /// Colliding rows are deleted.
    #[default]
    RowsDeleted,
    /// The dropped key values are set to NULL and rows are kept.
    ValuesNulled,
}

impl fmt::Display for DroppedKeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RowsDeleted => "rows deleted",
            Self::ValuesNulled => "values nulled",
        })
    }
}

/// Names of the capability queries, used to report what a platform lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    NonPrimaryKeyIdentityColumns,
    MultipleIdentityColumns,
    PrimaryKeyColumnsHaveToBeRequired,
    PrimaryKeyColumnTypeAlteration,
    IdentityStatusAlteration,
}

impl Capability {
    /// Name of the query that reports this capability.
    #[must_use]
    pub const fn query_name(self) -> &'static str {
        match self {
            Self::NonPrimaryKeyIdentityColumns => "non_primary_key_identity_columns_supported",
            Self::MultipleIdentityColumns => "multiple_identity_columns_supported",
            Self::PrimaryKeyColumnsHaveToBeRequired => "primary_key_columns_have_to_be_required",
            Self::PrimaryKeyColumnTypeAlteration => "primary_key_column_type_alterable",
            Self::IdentityStatusAlteration => "identity_status_alterable",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query_name())
    }
}

/// Read-only description of what a target platform supports.
pub trait Capabilities: Send + Sync {
    /// Returns the platform name.
    fn name(&self) -> &str;

    /// Whether identifiers compare case-sensitively.
    fn identifiers_case_sensitive(&self) -> bool;

    /// Longest identifier the platform accepts, if limited.
    fn max_identifier_length(&self) -> Option<usize>;

    /// Whether the platform supports indexes at all.
    fn indices_supported(&self) -> bool;

    /// Whether an identity column may be outside the primary key.
    fn non_primary_key_identity_columns_supported(&self) -> bool;

    /// Whether a table may have more than one identity column.
    fn multiple_identity_columns_supported(&self) -> bool;

    /// Whether an identity column may share the primary key with ordinary columns.
    fn mixing_identity_and_normal_primary_key_columns_supported(&self) -> bool;

    /// Whether primary key columns must be declared NOT NULL.
    fn primary_key_columns_have_to_be_required(&self) -> bool;

    /// Whether primary key columns are NOT NULL without being declared so.
    fn primary_key_column_automatically_required(&self) -> bool;

    /// Whether a column used by a foreign key can be altered in place.
    fn foreign_key_columns_alterable(&self) -> bool;

    /// Whether a column covered by an index can be altered in place.
    fn indexed_columns_alterable(&self) -> bool;

    /// Whether a NOT NULL column with a default can be added in one statement.
    fn required_column_with_default_addable(&self) -> bool;

    /// Whether a column can be added at a given position.
    fn column_position_on_add_supported(&self) -> bool;

    /// Whether existing columns can be reordered without a table rebuild.
    fn column_reorder_supported(&self) -> bool;

    /// Whether a primary key column's type or size can ever be changed.
    fn primary_key_column_type_alterable(&self) -> bool;

    /// Whether an existing column can gain or lose its identity property.
    fn identity_status_alterable(&self) -> bool;

    /// What happens to rows that collide when the primary key narrows.
    fn dropped_key_values(&self) -> DroppedKeyValues;

    /// The type the platform actually stores for `ty`.
    ///
    /// Types mapping to the same native type compare equal.
    fn native_type(&self, ty: LogicalType) -> LogicalType {
        ty
    }
}

/// Serializable capability descriptor.
///
/// Missing fields in JSON take the permissive [`PlatformInfo::generic`] values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformInfo {
    pub name: String,
    pub identifiers_case_sensitive: bool,
    pub max_identifier_length: Option<usize>,
    pub indices_supported: bool,
    pub non_primary_key_identity_columns_supported: bool,
    pub multiple_identity_columns_supported: bool,
    pub mixing_identity_and_normal_primary_key_columns_supported: bool,
    pub primary_key_columns_have_to_be_required: bool,
    pub primary_key_column_automatically_required: bool,
    pub foreign_key_columns_alterable: bool,
    pub indexed_columns_alterable: bool,
    pub required_column_with_default_addable: bool,
    pub column_position_on_add_supported: bool,
    pub column_reorder_supported: bool,
    pub primary_key_column_type_alterable: bool,
    pub identity_status_alterable: bool,
    pub dropped_key_values: DroppedKeyValues,
    /// Logical types stored as another logical type.
    pub native_types: BTreeMap<LogicalType, LogicalType>,
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self::generic()
    }
}

impl PlatformInfo {
    /// A platform that supports every operation in place.
    #[must_use]
    pub fn generic() -> Self {
        Self {
            name: "generic".to_string(),
            identifiers_case_sensitive: false,
            max_identifier_length: None,
            indices_supported: true,
            non_primary_key_identity_columns_supported: true,
            multiple_identity_columns_supported: true,
            mixing_identity_and_normal_primary_key_columns_supported: true,
            primary_key_columns_have_to_be_required: false,
            primary_key_column_automatically_required: false,
            foreign_key_columns_alterable: true,
            indexed_columns_alterable: true,
            required_column_with_default_addable: true,
            column_position_on_add_supported: true,
            column_reorder_supported: true,
            primary_key_column_type_alterable: true,
            identity_status_alterable: true,
            dropped_key_values: DroppedKeyValues::RowsDeleted,
            native_types: BTreeMap::new(),
        }
    }

    /// PostgreSQL.
    #[must_use]
    pub fn postgresql() -> Self {
        use LogicalType as T;

        Self {
            name: "postgresql".to_string(),
            max_identifier_length: Some(63),
            primary_key_column_automatically_required: true,
            foreign_key_columns_alterable: false,
            column_position_on_add_supported: false,
            column_reorder_supported: false,
            native_types: BTreeMap::from([
                (T::Bit, T::Boolean),
                (T::TinyInt, T::SmallInt),
                (T::Float, T::Double),
                (T::Numeric, T::Decimal),
                (T::LongVarchar, T::Clob),
                (T::Binary, T::Blob),
                (T::VarBinary, T::Blob),
                (T::LongVarBinary, T::Blob),
            ]),
            ..Self::generic()
        }
    }

    /// MySQL with InnoDB tables.
    #[must_use]
    pub fn mysql() -> Self {
        use LogicalType as T;

        Self {
            name: "mysql".to_string(),
            max_identifier_length: Some(64),
            non_primary_key_identity_columns_supported: false,
            multiple_identity_columns_supported: false,
            primary_key_columns_have_to_be_required: true,
            primary_key_column_automatically_required: true,
            foreign_key_columns_alterable: false,
            dropped_key_values: DroppedKeyValues::ValuesNulled,
            native_types: BTreeMap::from([
                (T::Boolean, T::Bit),
                (T::Real, T::Float),
                (T::Numeric, T::Decimal),
            ]),
            ..Self::generic()
        }
    }

    /// SQLite, which alters most things by rebuilding the table.
    #[must_use]
    pub fn sqlite() -> Self {
        use LogicalType as T;

        Self {
            name: "sqlite".to_string(),
            non_primary_key_identity_columns_supported: false,
            multiple_identity_columns_supported: false,
            mixing_identity_and_normal_primary_key_columns_supported: false,
            foreign_key_columns_alterable: false,
            indexed_columns_alterable: false,
            column_position_on_add_supported: false,
            column_reorder_supported: false,
            primary_key_column_type_alterable: false,
            identity_status_alterable: false,
            native_types: BTreeMap::from([
                (T::Bit, T::BigInt),
                (T::Boolean, T::BigInt),
                (T::TinyInt, T::BigInt),
                (T::SmallInt, T::BigInt),
                (T::Integer, T::BigInt),
                (T::Real, T::Double),
                (T::Float, T::Double),
                (T::Numeric, T::Decimal),
                (T::Char, T::Clob),
                (T::Varchar, T::Clob),
                (T::LongVarchar, T::Clob),
                (T::Binary, T::Blob),
                (T::VarBinary, T::Blob),
                (T::LongVarBinary, T::Blob),
            ]),
            ..Self::generic()
        }
    }

    /// Loads a descriptor from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Looks up a preset by name.
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "generic" => Some(Self::generic()),
            "postgresql" | "postgres" => Some(Self::postgresql()),
            "mysql" => Some(Self::mysql()),
            "sqlite" => Some(Self::sqlite()),
            _ => None,
        }
    }
}

impl Capabilities for PlatformInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn identifiers_case_sensitive(&self) -> bool {
        self.identifiers_case_sensitive
    }

    fn max_identifier_length(&self) -> Option<usize> {
        self.max_identifier_length
    }

    fn indices_supported(&self) -> bool {
        self.indices_supported
    }

    fn non_primary_key_identity_columns_supported(&self) -> bool {
        self.non_primary_key_identity_columns_supported
    }

    fn multiple_identity_columns_supported(&self) -> bool {
        self.multiple_identity_columns_supported
    }

    fn mixing_identity_and_normal_primary_key_columns_supported(&self) -> bool {
        self.mixing_identity_and_normal_primary_key_columns_supported
    }

    fn primary_key_columns_have_to_be_required(&self) -> bool {
        self.primary_key_columns_have_to_be_required
    }

    fn primary_key_column_automatically_required(&self) -> bool {
        self.primary_key_column_automatically_required
    }

    fn foreign_key_columns_alterable(&self) -> bool {
        self.foreign_key_columns_alterable
    }

    fn indexed_columns_alterable(&self) -> bool {
        self.indexed_columns_alterable
    }

    fn required_column_with_default_addable(&self) -> bool {
        self.required_column_with_default_addable
    }

    fn column_position_on_add_supported(&self) -> bool {
        self.column_position_on_add_supported
    }

    fn column_reorder_supported(&self) -> bool {
        self.column_reorder_supported
    }

    fn primary_key_column_type_alterable(&self) -> bool {
        self.primary_key_column_type_alterable
    }

    fn identity_status_alterable(&self) -> bool {
        self.identity_status_alterable
    }

    fn dropped_key_values(&self) -> DroppedKeyValues {
        self.dropped_key_values
    }

    fn native_type(&self, ty: LogicalType) -> LogicalType {
        self.native_types.get(&ty).copied().unwrap_or(ty)
    }
}
