//! Structural checks run on every model before it is compared.

use std::collections::BTreeSet;

use crate::capability::Capabilities;
use crate::error::{AlterError, Result, ValidationError};
use crate::schema::{name_key, Database, Table};

/// Validates a model against the structural invariants.
///
/// All problems are collected; one problem is returned as
/// [`AlterError::Validation`], several as [`AlterError::Multiple`].
pub fn validate(database: &Database, caps: &dyn Capabilities) -> Result<()> {
    match AlterError::collect(validation_errors(database, caps)) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Returns every invariant violation of `database`.
#[must_use]
pub fn validation_errors(database: &Database, caps: &dyn Capabilities) -> Vec<ValidationError> {
    let mut checker = Checker {
        database,
        case_sensitive: caps.identifiers_case_sensitive(),
        max_len: caps.max_identifier_length(),
        errors: Vec::new(),
    };
    checker.run();
    checker.errors
}

struct Checker<'a> {
    database: &'a Database,
    case_sensitive: bool,
    max_len: Option<usize>,
    errors: Vec<ValidationError>,
}

impl Checker<'_> {
    fn run(&mut self) {
        let mut seen = BTreeSet::new();
        for table in &self.database.tables {
            if !self.check_name(&table.name, "table") {
                continue;
            }
            if !seen.insert(name_key(&table.name, self.case_sensitive)) {
                self.errors.push(ValidationError::DuplicateTable {
                    table: table.name.clone(),
                });
            }
            self.check_table(table);
        }
    }

    /// Reports empty or over-long identifiers; returns whether the name is usable.
    fn check_name(&mut self, name: &str, entity: &str) -> bool {
        if name.trim().is_empty() {
            self.errors.push(ValidationError::EmptyName {
                database: self.database.name.clone(),
                entity: entity.to_string(),
            });
            return false;
        }
        if let Some(max) = self.max_len {
            if name.chars().count() > max {
                self.errors.push(ValidationError::IdentifierTooLong {
                    identifier: name.to_string(),
                    max,
                });
            }
        }
        true
    }

    fn check_table(&mut self, table: &Table) {
        if table.columns.is_empty() {
            self.errors.push(ValidationError::NoColumns {
                table: table.name.clone(),
            });
        }

        let mut seen = BTreeSet::new();
        for column in &table.columns {
            if !self.check_name(&column.name, &format!("column of table '{}'", table.name)) {
                continue;
            }
            if !seen.insert(name_key(&column.name, self.case_sensitive)) {
                self.errors.push(ValidationError::DuplicateColumn {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
            if let (true, Some(precision), Some(scale)) =
                (column.ty.has_precision_and_scale(), column.size, column.scale)
            {
                if scale > precision {
                    self.errors.push(ValidationError::InvalidScale {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        precision,
                        scale,
                    });
                }
            }
        }

        self.check_indexes(table);
        self.check_foreign_keys(table);
    }

    fn check_indexes(&mut self, table: &Table) {
        let mut names = BTreeSet::new();
        for (position, index) in table.indexes.iter().enumerate() {
            let label = match &index.name {
                Some(name) => {
                    if !self.check_name(name, &format!("index of table '{}'", table.name)) {
                        continue;
                    }
                    if !names.insert(name_key(name, self.case_sensitive)) {
                        self.errors.push(ValidationError::DuplicateIndex {
                            table: table.name.clone(),
                            index: name.clone(),
                        });
                    }
                    name.clone()
                }
                None => format!("#{position}"),
            };

            if index.columns.is_empty() {
                self.errors.push(ValidationError::EmptyIndex {
                    table: table.name.clone(),
                    index: label,
                });
                continue;
            }
            for column in &index.columns {
                if table.get_column(column, self.case_sensitive).is_none() {
                    self.errors.push(ValidationError::UnknownIndexColumn {
                        table: table.name.clone(),
                        index: label.clone(),
                        column: column.clone(),
                    });
                }
            }
        }
    }

    fn check_foreign_keys(&mut self, table: &Table) {
        let mut names = BTreeSet::new();
        for (position, fk) in table.foreign_keys.iter().enumerate() {
            let label = match &fk.name {
                Some(name) => {
                    if !self.check_name(name, &format!("foreign key of table '{}'", table.name)) {
                        continue;
                    }
                    if !names.insert(name_key(name, self.case_sensitive)) {
                        self.errors.push(ValidationError::DuplicateForeignKey {
                            table: table.name.clone(),
                            foreign_key: name.clone(),
                        });
                    }
                    name.clone()
                }
                None => format!("#{position}"),
            };

            if fk.references.is_empty() {
                self.errors.push(ValidationError::EmptyForeignKey {
                    table: table.name.clone(),
                    foreign_key: label,
                });
                continue;
            }

            for reference in &fk.references {
                if table.get_column(&reference.local, self.case_sensitive).is_none() {
                    self.errors.push(ValidationError::UnknownLocalColumn {
                        table: table.name.clone(),
                        foreign_key: label.clone(),
                        column: reference.local.clone(),
                    });
                }
            }

            let Some(target) = self
                .database
                .get_table(&fk.foreign_table, self.case_sensitive)
            else {
                self.errors.push(ValidationError::UnknownForeignTable {
                    table: table.name.clone(),
                    foreign_key: label,
                    foreign_table: fk.foreign_table.clone(),
                });
                continue;
            };
            for reference in &fk.references {
                if target.get_column(&reference.foreign, self.case_sensitive).is_none() {
                    self.errors.push(ValidationError::UnknownForeignColumn {
                        table: table.name.clone(),
                        foreign_key: label.clone(),
                        foreign_table: fk.foreign_table.clone(),
                        column: reference.foreign.clone(),
                    });
                }
            }
        }
    }
}
