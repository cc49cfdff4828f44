//! Schema model types.
//!
//! These types describe the structure of a database schema snapshot. The
//! comparator reads two snapshots and never mutates them; only
//! [`SchemaState`](crate::state::SchemaState) edits a model, and it does so on
//! its own copy.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Returns whether two identifiers denote the same entity.
#[must_use]
pub fn names_equal(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

/// Normalized lookup key for an identifier.
pub(crate) fn name_key(name: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        name.to_string()
    } else {
        name.to_ascii_lowercase()
    }
}

fn lists_equal(a: &[String], b: &[String], case_sensitive: bool) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| names_equal(x, y, case_sensitive))
}

/// Broad grouping of logical types used for conversion checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    /// BIT, BOOLEAN.
    Boolean,
    /// Integer types.
    Integral,
    /// Approximate numeric types.
    Floating,
    /// Exact numeric types with precision and scale.
    Decimal,
    /// Character types.
    Text,
    /// Binary types.
    Binary,
    /// Date and time types.
    Temporal,
}

/// Platform-independent column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalType {
    Bit,
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Float,
    Double,
    Decimal,
    Numeric,
    Char,
    Varchar,
    LongVarchar,
    Clob,
    Binary,
    VarBinary,
    LongVarBinary,
    Blob,
    Date,
    Time,
    Timestamp,
}

impl LogicalType {
    /// Returns the type's family.
    #[must_use]
    pub const fn family(self) -> TypeFamily {
        match self {
            Self::Bit | Self::Boolean => TypeFamily::Boolean,
            Self::TinyInt | Self::SmallInt | Self::Integer | Self::BigInt => TypeFamily::Integral,
            Self::Real | Self::Float | Self::Double => TypeFamily::Floating,
            Self::Decimal | Self::Numeric => TypeFamily::Decimal,
            Self::Char | Self::Varchar | Self::LongVarchar | Self::Clob => TypeFamily::Text,
            Self::Binary | Self::VarBinary | Self::LongVarBinary | Self::Blob => {
                TypeFamily::Binary
            }
            Self::Date | Self::Time | Self::Timestamp => TypeFamily::Temporal,
        }
    }

    /// Whether the type takes a size (length).
    #[must_use]
    pub const fn has_size(self) -> bool {
        matches!(
            self,
            Self::Char | Self::Varchar | Self::Binary | Self::VarBinary
        )
    }

    /// Whether the type takes a precision and scale.
    #[must_use]
    pub const fn has_precision_and_scale(self) -> bool {
        matches!(self, Self::Decimal | Self::Numeric)
    }

    /// Whether default values of this type compare numerically.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self.family(),
            TypeFamily::Integral | TypeFamily::Floating | TypeFamily::Decimal
        )
    }

    /// Position within the family; larger holds more.
    const fn rank(self) -> u8 {
        match self {
            Self::Bit | Self::Boolean => 0,
            Self::TinyInt => 0,
            Self::SmallInt => 1,
            Self::Integer => 2,
            Self::BigInt => 3,
            Self::Real => 0,
            Self::Float | Self::Double => 1,
            Self::Decimal | Self::Numeric => 0,
            Self::Char | Self::Binary => 0,
            Self::Varchar | Self::VarBinary => 1,
            Self::LongVarchar | Self::LongVarBinary => 2,
            Self::Clob | Self::Blob => 3,
            Self::Date | Self::Time => 0,
            Self::Timestamp => 1,
        }
    }

    /// Whether every value of `self` converts to `target` without loss.
    ///
    /// Sizes are not considered here; see [`Sizing::narrows_to`].
    #[must_use]
    pub fn widens_to(self, target: Self) -> bool {
        use TypeFamily as F;

        if self == target {
            return true;
        }
        match (self.family(), target.family()) {
            (F::Boolean, F::Boolean) | (F::Decimal, F::Decimal) => true,
            (F::Integral | F::Floating | F::Boolean, F::Integral) => {
                self.family() != F::Floating && target.rank() >= self.rank()
            }
            (F::Integral, F::Decimal) | (F::Boolean, F::Decimal) => true,
            (F::Integral, F::Floating) => self != Self::BigInt && target != Self::Real,
            (F::Floating, F::Floating) => target.rank() >= self.rank(),
            (F::Text, F::Text) | (F::Binary, F::Binary) => target.rank() >= self.rank(),
            // anything has a textual form in a long character column
            (_, F::Text) => target.rank() >= 2,
            (F::Temporal, F::Temporal) => self == Self::Date && target == Self::Timestamp,
            _ => false,
        }
    }

    /// Returns the JDBC-style type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bit => "BIT",
            Self::Boolean => "BOOLEAN",
            Self::TinyInt => "TINYINT",
            Self::SmallInt => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Real => "REAL",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Decimal => "DECIMAL",
            Self::Numeric => "NUMERIC",
            Self::Char => "CHAR",
            Self::Varchar => "VARCHAR",
            Self::LongVarchar => "LONGVARCHAR",
            Self::Clob => "CLOB",
            Self::Binary => "BINARY",
            Self::VarBinary => "VARBINARY",
            Self::LongVarBinary => "LONGVARBINARY",
            Self::Blob => "BLOB",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size, or precision and scale, of a column.
///
/// `None` means the platform default applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sizing {
    /// Length, or precision for decimal types.
    pub size: Option<u32>,
    /// Scale for decimal types.
    pub scale: Option<u32>,
}

impl Sizing {
    /// Whether converting from `self` to `target` can truncate values.
    ///
    /// Unknown (platform default) sizes never count as narrowing.
    #[must_use]
    pub fn narrows_to(&self, target: &Self) -> bool {
        let shrinks =
            |from: Option<u32>, to: Option<u32>| matches!((from, to), (Some(a), Some(b)) if b < a);
        let integer_digits = |s: &Self| s.size.map(|p| p.saturating_sub(s.scale.unwrap_or(0)));

        shrinks(self.size, target.size)
            || shrinks(self.scale, target.scale)
            || shrinks(integer_digits(self), integer_digits(target))
    }
}

impl fmt::Display for Sizing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.size, self.scale) {
            (Some(size), Some(scale)) => write!(f, "({size},{scale})"),
            (Some(size), None) => write!(f, "({size})"),
            (None, Some(scale)) => write!(f, "(,{scale})"),
            (None, None) => write!(f, "(default)"),
        }
    }
}

/// A default value interpreted for comparison under a column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedDefault {
    /// Numeric value; `2` and `2.00` are equal.
    Numeric(Decimal),
    /// Boolean value.
    Boolean(bool),
    /// Anything else, compared by exact content.
    Text(String),
}

impl TypedDefault {
    /// Interprets `raw` as a default of type `ty`.
    #[must_use]
    pub fn parse(raw: &str, ty: LogicalType) -> Self {
        let trimmed = raw.trim();
        if ty.is_numeric() {
            if let Ok(value) =
                Decimal::from_str(trimmed).or_else(|_| Decimal::from_scientific(trimmed))
            {
                return Self::Numeric(value);
            }
        } else if ty.family() == TypeFamily::Boolean {
            match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" => return Self::Boolean(true),
                "false" | "0" => return Self::Boolean(false),
                _ => {}
            }
        }
        Self::Text(raw.to_string())
    }
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted/updated).
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl fmt::Display for ForeignKeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        })
    }
}

/// A column definition. Its ordinal position is its index in [`Table::columns`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Logical type.
    #[serde(rename = "type")]
    pub ty: LogicalType,
    /// Length, or precision for decimal types.
    #[serde(default)]
    pub size: Option<u32>,
    /// Scale for decimal types.
    #[serde(default)]
    pub scale: Option<u32>,
    /// Whether the column rejects NULL.
    #[serde(default)]
    pub required: bool,
    /// Whether this column is part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Whether the platform generates the column's values.
    #[serde(default)]
    pub auto_increment: bool,
    /// Default value as written in the schema description.
    #[serde(default)]
    pub default: Option<String>,
}

impl Column {
    /// Creates a nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: LogicalType) -> Self {
        Self {
            name: name.into(),
            ty,
            size: None,
            scale: None,
            required: false,
            primary_key: false,
            auto_increment: false,
            default: None,
        }
    }

    /// Sets the length.
    #[must_use]
    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets precision and scale.
    #[must_use]
    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.size = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the column as part of the primary key.
    ///
    /// Required-ness is left alone; platforms differ on whether key
    /// columns must be declared NOT NULL.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Sets the column to auto-increment.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Returns the size aspect of the column.
    #[must_use]
    pub fn sizing(&self) -> Sizing {
        Sizing {
            size: self.size,
            scale: self.scale,
        }
    }

    /// Returns the default interpreted under the column's own type.
    #[must_use]
    pub fn typed_default(&self) -> Option<TypedDefault> {
        self.default
            .as_deref()
            .map(|raw| TypedDefault::parse(raw, self.ty))
    }
}

/// An index or unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name; unnamed indexes are matched by their columns.
    #[serde(default)]
    pub name: Option<String>,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether this is a unique constraint.
    #[serde(default)]
    pub unique: bool,
}

impl Index {
    /// Creates a named, non-unique index.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            columns: Vec::new(),
            unique: false,
        }
    }

    /// Creates an unnamed, non-unique index.
    #[must_use]
    pub fn unnamed() -> Self {
        Self {
            name: None,
            columns: Vec::new(),
            unique: false,
        }
    }

    /// Appends a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(name.into());
        self
    }

    /// Marks the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Name for messages: the name, or the column list.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("({})", self.columns.join(", ")),
        }
    }

    /// Whether both indexes cover the same ordered columns.
    #[must_use]
    pub fn same_columns(&self, other: &Self, case_sensitive: bool) -> bool {
        lists_equal(&self.columns, &other.columns, case_sensitive)
    }

    /// Whether `other` denotes the same index: equal names when both are
    /// named, otherwise identical columns.
    #[must_use]
    pub fn identifies(&self, other: &Self, case_sensitive: bool) -> bool {
        match (&self.name, &other.name) {
            (Some(a), Some(b)) => names_equal(a, b, case_sensitive),
            _ => self.same_columns(other, case_sensitive),
        }
    }

    /// Whether the index covers `column`.
    #[must_use]
    pub fn covers(&self, column: &str, case_sensitive: bool) -> bool {
        self.columns
            .iter()
            .any(|c| names_equal(c, column, case_sensitive))
    }
}

/// One `(local, foreign)` column pair of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Column in the owning table.
    pub local: String,
    /// Column in the referenced table.
    pub foreign: String,
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    #[serde(default)]
    pub name: Option<String>,
    /// Referenced table name.
    pub foreign_table: String,
    /// Column pairs, in order.
    pub references: Vec<Reference>,
    /// Action on delete.
    #[serde(default)]
    pub on_delete: ForeignKeyAction,
    /// Action on update.
    #[serde(default)]
    pub on_update: ForeignKeyAction,
}

impl ForeignKey {
    /// Creates a named foreign key to `foreign_table`.
    #[must_use]
    pub fn named(name: impl Into<String>, foreign_table: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::unnamed(foreign_table)
        }
    }

    /// Creates an unnamed foreign key to `foreign_table`.
    #[must_use]
    pub fn unnamed(foreign_table: impl Into<String>) -> Self {
        Self {
            name: None,
            foreign_table: foreign_table.into(),
            references: Vec::new(),
            on_delete: ForeignKeyAction::default(),
            on_update: ForeignKeyAction::default(),
        }
    }

    /// Appends a reference pair.
    #[must_use]
    pub fn reference(mut self, local: impl Into<String>, foreign: impl Into<String>) -> Self {
        self.references.push(Reference {
            local: local.into(),
            foreign: foreign.into(),
        });
        self
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Sets the ON UPDATE action.
    #[must_use]
    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = action;
        self
    }

    /// Name for messages: the name, or the target and local columns.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!(
                "({}) -> {}",
                self.local_columns().join(", "),
                self.foreign_table
            ),
        }
    }

    /// Local column names, in order.
    #[must_use]
    pub fn local_columns(&self) -> Vec<String> {
        self.references.iter().map(|r| r.local.clone()).collect()
    }

    /// Whether both keys target the same table through the same column pairs.
    #[must_use]
    pub fn same_references(&self, other: &Self, case_sensitive: bool) -> bool {
        names_equal(&self.foreign_table, &other.foreign_table, case_sensitive)
            && self.references.len() == other.references.len()
            && self.references.iter().zip(&other.references).all(|(a, b)| {
                names_equal(&a.local, &b.local, case_sensitive)
                    && names_equal(&a.foreign, &b.foreign, case_sensitive)
            })
    }

    /// Whether both keys are the same constraint with the same definition.
    #[must_use]
    pub fn same_definition(&self, other: &Self, case_sensitive: bool) -> bool {
        self.same_references(other, case_sensitive)
            && self.on_delete == other.on_delete
            && self.on_update == other.on_update
    }

    /// Whether `other` denotes the same constraint: equal names when both
    /// are named, otherwise identical references.
    #[must_use]
    pub fn identifies(&self, other: &Self, case_sensitive: bool) -> bool {
        match (&self.name, &other.name) {
            (Some(a), Some(b)) => names_equal(a, b, case_sensitive),
            _ => self.same_references(other, case_sensitive),
        }
    }

    /// Whether `index` shares this key's name and exact local columns.
    ///
    /// Such an index is the key's physical backing index on some platforms.
    #[must_use]
    pub fn is_backed_by(&self, index: &Index, case_sensitive: bool) -> bool {
        match (&self.name, &index.name) {
            (Some(a), Some(b)) => {
                names_equal(a, b, case_sensitive)
                    && lists_equal(&self.local_columns(), &index.columns, case_sensitive)
            }
            _ => false,
        }
    }

    /// Whether `column` of the owning table is a local column.
    #[must_use]
    pub fn uses_local(&self, column: &str, case_sensitive: bool) -> bool {
        self.references
            .iter()
            .any(|r| names_equal(&r.local, column, case_sensitive))
    }

    /// Whether `column` of `table` is referenced on the foreign side.
    #[must_use]
    pub fn uses_foreign(&self, table: &str, column: &str, case_sensitive: bool) -> bool {
        names_equal(&self.foreign_table, table, case_sensitive)
            && self
                .references
                .iter()
                .any(|r| names_equal(&r.foreign, column, case_sensitive))
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Column definitions, in ordinal order.
    pub columns: Vec<Column>,
    /// Indexes and unique constraints.
    #[serde(default)]
    pub indexes: Vec<Index>,
    /// Foreign key definitions.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    /// Creates a new table with no columns.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Adds a column to the table.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds an index or unique constraint.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str, case_sensitive: bool) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| names_equal(&c.name, name, case_sensitive))
    }

    /// Gets a mutable column by name.
    #[must_use]
    pub fn get_column_mut(&mut self, name: &str, case_sensitive: bool) -> Option<&mut Column> {
        self.columns
            .iter_mut()
            .find(|c| names_equal(&c.name, name, case_sensitive))
    }

    /// Ordinal position of a column.
    #[must_use]
    pub fn ordinal_of(&self, name: &str, case_sensitive: bool) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| names_equal(&c.name, name, case_sensitive))
    }

    /// Primary key column names, in declaration order.
    #[must_use]
    pub fn primary_key(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Column names, in ordinal order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Returns a copy without foreign keys.
    #[must_use]
    pub fn without_foreign_keys(&self) -> Self {
        Self {
            foreign_keys: Vec::new(),
            ..self.clone()
        }
    }
}

/// A database schema snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    /// Database name.
    #[serde(default)]
    pub name: String,
    /// All tables in the database.
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl Database {
    /// Creates a new empty database.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Vec::new(),
        }
    }

    /// Adds a table to the schema.
    #[must_use]
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Gets a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str, case_sensitive: bool) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| names_equal(&t.name, name, case_sensitive))
    }

    /// Gets a mutable table by name.
    #[must_use]
    pub fn get_table_mut(&mut self, name: &str, case_sensitive: bool) -> Option<&mut Table> {
        self.tables
            .iter_mut()
            .find(|t| names_equal(&t.name, name, case_sensitive))
    }

    /// Foreign keys of other tables, or of `table` itself, that point at `table`.
    pub fn foreign_keys_into<'a>(
        &'a self,
        table: &'a str,
        case_sensitive: bool,
    ) -> impl Iterator<Item = (&'a Table, &'a ForeignKey)> + 'a {
        self.tables.iter().flat_map(move |owner| {
            owner
                .foreign_keys
                .iter()
                .filter(move |fk| names_equal(&fk.foreign_table, table, case_sensitive))
                .map(move |fk| (owner, fk))
        })
    }
}
