//! Model comparator.
//!
//! Compares two validated schema snapshots and reports every structural
//! difference as a [`Change`]. Tables and columns are matched by
//! case-normalized name; indexes and foreign keys by name when both sides
//! carry one, otherwise by their ordered columns.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::capability::{Capabilities, PlatformInfo};
use crate::change::{Change, ChangeSet};
use crate::error::{AlterError, Result};
use crate::schema::{
    name_key, names_equal, Column, Database, ForeignKey, Index, Table, TypedDefault,
};
use crate::validate::validation_errors;

/// Compares two models on the generic platform.
pub fn compare(old: &Database, new: &Database) -> Result<ChangeSet> {
    ModelComparator::new(&PlatformInfo::generic()).compare(old, new)
}

/// Compares schema models under a platform's identifier and type rules.
pub struct ModelComparator<'a> {
    caps: &'a dyn Capabilities,
    case_sensitive: bool,
}

/// Result of pairing two constraint lists.
struct Matching {
    /// `(old, new)` index pairs, in new order.
    pairs: Vec<(usize, usize)>,
    /// Old entries without a partner.
    removed: Vec<usize>,
    /// New entries without a partner.
    added: Vec<usize>,
}

/// Pairs entries by name when both are named, then pairs the rest by `same`
/// when at least one side is unnamed.
fn match_by_name_then<T>(
    old: &[T],
    new: &[T],
    name: impl Fn(&T) -> Option<&str>,
    same: impl Fn(&T, &T) -> bool,
    case_sensitive: bool,
) -> Matching {
    let mut old_taken = vec![false; old.len()];
    let mut partner: Vec<Option<usize>> = vec![None; new.len()];

    for (j, n) in new.iter().enumerate() {
        let Some(new_name) = name(n) else { continue };
        let found = old.iter().enumerate().position(|(i, o)| {
            !old_taken[i]
                && name(o).is_some_and(|old_name| names_equal(old_name, new_name, case_sensitive))
        });
        if let Some(i) = found {
            old_taken[i] = true;
            partner[j] = Some(i);
        }
    }

    for (j, n) in new.iter().enumerate() {
        if partner[j].is_some() {
            continue;
        }
        let found = old.iter().enumerate().position(|(i, o)| {
            !old_taken[i] && !(name(o).is_some() && name(n).is_some()) && same(o, n)
        });
        if let Some(i) = found {
            old_taken[i] = true;
            partner[j] = Some(i);
        }
    }

    Matching {
        pairs: partner
            .iter()
            .enumerate()
            .filter_map(|(j, i)| i.map(|i| (i, j)))
            .collect(),
        removed: (0..old.len()).filter(|&i| !old_taken[i]).collect(),
        added: (0..new.len()).filter(|&j| partner[j].is_none()).collect(),
    }
}

impl<'a> ModelComparator<'a> {
    /// Creates a comparator for the given platform.
    #[must_use]
    pub fn new(caps: &'a dyn Capabilities) -> Self {
        Self {
            caps,
            case_sensitive: caps.identifiers_case_sensitive(),
        }
    }

    /// Validates both models and returns the changes leading from `old` to `new`.
    pub fn compare(&self, old: &Database, new: &Database) -> Result<ChangeSet> {
        let mut errors = validation_errors(old, self.caps);
        errors.extend(validation_errors(new, self.caps));
        if let Some(err) = AlterError::collect(errors) {
            return Err(err);
        }

        let old_tables = self.keyed(old);
        let new_tables = self.keyed(new);
        let mut changes = Vec::new();

        for (key, table) in &old_tables {
            if new_tables.contains_key(key) {
                continue;
            }
            for fk in &table.foreign_keys {
                changes.push(Change::ForeignKeyRemoved {
                    table: table.name.clone(),
                    foreign_key: fk.clone(),
                });
            }
            changes.push(Change::TableRemoved {
                table: table.without_foreign_keys(),
            });
        }

        for (key, table) in &new_tables {
            if old_tables.contains_key(key) {
                continue;
            }
            changes.push(Change::TableAdded {
                table: table.without_foreign_keys(),
            });
            for fk in &table.foreign_keys {
                changes.push(Change::ForeignKeyAdded {
                    table: table.name.clone(),
                    foreign_key: fk.clone(),
                });
            }
        }

        for (key, new_table) in &new_tables {
            if let Some(old_table) = old_tables.get(key) {
                let before = changes.len();
                self.compare_table(old_table, new_table, &mut changes);
                if changes.len() > before {
                    debug!(
                        table = %new_table.name,
                        changes = changes.len() - before,
                        "Table differs"
                    );
                }
            }
        }

        debug!(
            platform = self.caps.name(),
            changes = changes.len(),
            "Compared schema models"
        );
        Ok(ChangeSet::new(changes, old.clone(), new.clone()))
    }

    fn keyed<'d>(&self, database: &'d Database) -> BTreeMap<String, &'d Table> {
        database
            .tables
            .iter()
            .map(|t| (name_key(&t.name, self.case_sensitive), t))
            .collect()
    }

    fn compare_table(&self, old: &Table, new: &Table, out: &mut Vec<Change>) {
        self.compare_foreign_keys(old, new, out);
        if self.caps.indices_supported() {
            self.compare_indexes(old, new, out);
        }
        self.compare_columns(old, new, out);
        self.compare_primary_key(old, new, out);
        self.compare_column_order(old, new, out);
    }

    fn compare_foreign_keys(&self, old: &Table, new: &Table, out: &mut Vec<Change>) {
        let cs = self.case_sensitive;
        let matching = match_by_name_then(
            &old.foreign_keys,
            &new.foreign_keys,
            |fk: &ForeignKey| fk.name.as_deref(),
            |a, b| a.same_references(b, cs),
            cs,
        );

        for i in matching.removed {
            out.push(Change::ForeignKeyRemoved {
                table: new.name.clone(),
                foreign_key: old.foreign_keys[i].clone(),
            });
        }
        for (i, j) in matching.pairs {
            let (from, to) = (&old.foreign_keys[i], &new.foreign_keys[j]);
            if !from.same_definition(to, cs) {
                out.push(Change::ForeignKeyReferencesChanged {
                    table: new.name.clone(),
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }
        for j in matching.added {
            out.push(Change::ForeignKeyAdded {
                table: new.name.clone(),
                foreign_key: new.foreign_keys[j].clone(),
            });
        }
    }

    fn compare_indexes(&self, old: &Table, new: &Table, out: &mut Vec<Change>) {
        let cs = self.case_sensitive;
        let matching = match_by_name_then(
            &old.indexes,
            &new.indexes,
            |index: &Index| index.name.as_deref(),
            |a, b| a.same_columns(b, cs),
            cs,
        );

        for i in matching.removed {
            let index = &old.indexes[i];
            // dropping the foreign key takes its backing index with it
            let goes_with_key = old.foreign_keys.iter().any(|fk| {
                fk.is_backed_by(index, cs) && !new.foreign_keys.iter().any(|f| f.identifies(fk, cs))
            });
            if goes_with_key {
                continue;
            }
            out.push(Change::IndexRemoved {
                table: new.name.clone(),
                index: index.clone(),
            });
        }
        for (i, j) in matching.pairs {
            let (from, to) = (&old.indexes[i], &new.indexes[j]);
            if from.unique != to.unique {
                out.push(Change::IndexRemoved {
                    table: new.name.clone(),
                    index: from.clone(),
                });
                out.push(Change::IndexAdded {
                    table: new.name.clone(),
                    index: to.clone(),
                });
            } else if !from.same_columns(to, cs) {
                out.push(Change::IndexColumnsChanged {
                    table: new.name.clone(),
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }
        for j in matching.added {
            out.push(Change::IndexAdded {
                table: new.name.clone(),
                index: new.indexes[j].clone(),
            });
        }
    }

    fn compare_columns(&self, old: &Table, new: &Table, out: &mut Vec<Change>) {
        let cs = self.case_sensitive;

        for column in &old.columns {
            if new.get_column(&column.name, cs).is_none() {
                out.push(Change::ColumnRemoved {
                    table: new.name.clone(),
                    column: column.clone(),
                });
            }
        }

        let is_new = |c: &Column| old.get_column(&c.name, cs).is_none();
        for (position, column) in new.columns.iter().enumerate() {
            if !is_new(column) {
                continue;
            }
            let appends = new.columns[position..].iter().all(is_new);
            out.push(Change::ColumnAdded {
                table: new.name.clone(),
                column: column.clone(),
                position: if appends { None } else { Some(position) },
            });
        }

        for column in &new.columns {
            if let Some(before) = old.get_column(&column.name, cs) {
                self.compare_column(&new.name, before, column, out);
            }
        }
    }

    fn effectively_required(&self, column: &Column) -> bool {
        column.required
            || (column.primary_key && self.caps.primary_key_column_automatically_required())
    }

    fn compare_column(&self, table: &str, old: &Column, new: &Column, out: &mut Vec<Change>) {
        let name = new.name.clone();

        if self.caps.native_type(old.ty) != self.caps.native_type(new.ty) {
            out.push(Change::ColumnTypeChanged {
                table: table.to_string(),
                column: name.clone(),
                from: old.ty,
                to: new.ty,
                from_sizing: old.sizing(),
                to_sizing: new.sizing(),
            });
        } else if (new.ty.has_size() || new.ty.has_precision_and_scale())
            && old.sizing() != new.sizing()
        {
            out.push(Change::ColumnSizeChanged {
                table: table.to_string(),
                column: name.clone(),
                from: old.sizing(),
                to: new.sizing(),
            });
        }

        // after the key step the column keeps its declared required-ness
        let required = self.effectively_required(new);
        let after_key_step = old.required
            || (new.primary_key && self.caps.primary_key_column_automatically_required());
        let key_moved = old.primary_key != new.primary_key && after_key_step != required;
        if self.effectively_required(old) != required || key_moved {
            out.push(Change::ColumnRequiredChanged {
                table: table.to_string(),
                column: name.clone(),
                required,
            });
        }

        if old.auto_increment != new.auto_increment {
            out.push(Change::ColumnAutoIncrementChanged {
                table: table.to_string(),
                column: name.clone(),
                auto_increment: new.auto_increment,
            });
        }

        // both defaults are read under the new type
        let typed = |c: &Column| {
            c.default
                .as_deref()
                .map(|raw| TypedDefault::parse(raw, new.ty))
        };
        if typed(old) != typed(new) {
            out.push(Change::ColumnDefaultChanged {
                table: table.to_string(),
                column: name,
                from: old.default.clone(),
                to: new.default.clone(),
            });
        }
    }

    fn compare_primary_key(&self, old: &Table, new: &Table, out: &mut Vec<Change>) {
        let from = old.primary_key();
        let to = new.primary_key();
        let key_set = |names: &[String]| -> BTreeSet<String> {
            names
                .iter()
                .map(|n| name_key(n, self.case_sensitive))
                .collect()
        };

        // key order is declaration order, which ColumnOrderChanged covers
        if key_set(&from) != key_set(&to) {
            out.push(Change::PrimaryKeyChanged {
                table: new.name.clone(),
                from,
                to,
            });
        }
    }

    fn compare_column_order(&self, old: &Table, new: &Table, out: &mut Vec<Change>) {
        let cs = self.case_sensitive;
        let common = |from: &Table, other: &Table| -> Vec<String> {
            from.columns
                .iter()
                .filter(|c| other.get_column(&c.name, cs).is_some())
                .map(|c| name_key(&c.name, cs))
                .collect()
        };

        if common(old, new) != common(new, old) {
            out.push(Change::ColumnOrderChanged {
                table: new.name.clone(),
                order: new.column_names(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeKind;
    use crate::schema::{ForeignKeyAction, LogicalType, Sizing};

    fn pk(name: &str) -> Column {
        Column::new(name, LogicalType::Integer).primary_key().required()
    }

    fn col(name: &str) -> Column {
        Column::new(name, LogicalType::Varchar).size(32)
    }

    fn db(tables: Vec<Table>) -> Database {
        tables.into_iter().fold(Database::new("test"), Database::table)
    }

    fn kinds(set: &ChangeSet) -> Vec<ChangeKind> {
        set.iter().map(Change::kind).collect()
    }

    #[test]
    fn test_identical_models_are_empty() {
        let model = db(vec![Table::new("t")
            .column(pk("id"))
            .column(col("name"))
            .index(Index::named("t_name").column("name"))]);
        assert!(compare(&model, &model).unwrap().is_empty());
    }

    #[test]
    fn test_tables_match_case_insensitively() {
        let old = db(vec![Table::new("Orders").column(pk("ID"))]);
        let new = db(vec![Table::new("orders").column(pk("id"))]);
        assert!(compare(&old, &new).unwrap().is_empty());

        let sensitive = PlatformInfo {
            identifiers_case_sensitive: true,
            ..PlatformInfo::generic()
        };
        let set = ModelComparator::new(&sensitive).compare(&old, &new).unwrap();
        assert_eq!(kinds(&set), vec![ChangeKind::TableRemoved, ChangeKind::TableAdded]);
    }

    #[test]
    fn test_added_table_reports_foreign_keys_separately() {
        let old = db(vec![Table::new("parent").column(pk("id"))]);
        let new = db(vec![
            Table::new("parent").column(pk("id")),
            Table::new("child")
                .column(pk("id"))
                .column(Column::new("parent_id", LogicalType::Integer))
                .foreign_key(ForeignKey::named("fk_parent", "parent").reference("parent_id", "id")),
        ]);

        let set = compare(&old, &new).unwrap();
        assert_eq!(kinds(&set), vec![ChangeKind::TableAdded, ChangeKind::ForeignKeyAdded]);
        match &set.changes()[0] {
            Change::TableAdded { table } => assert!(table.foreign_keys.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_numeric_defaults_compare_by_value() {
        let old = db(vec![Table::new("t")
            .column(pk("id"))
            .column(Column::new("v", LogicalType::Decimal).precision(10, 2).default_value("2"))]);
        let new = db(vec![Table::new("t")
            .column(pk("id"))
            .column(
                Column::new("v", LogicalType::Decimal)
                    .precision(10, 2)
                    .default_value("2.00"),
            )]);
        assert!(compare(&old, &new).unwrap().is_empty());

        let text_old = db(vec![Table::new("t")
            .column(pk("id"))
            .column(col("v").default_value("2"))]);
        let text_new = db(vec![Table::new("t")
            .column(pk("id"))
            .column(col("v").default_value("2.00"))]);
        assert_eq!(
            kinds(&compare(&text_old, &text_new).unwrap()),
            vec![ChangeKind::ColumnDefaultChanged]
        );
    }

    #[test]
    fn test_size_change_only_when_type_unchanged() {
        let old = db(vec![Table::new("t").column(pk("id")).column(col("v").size(20))]);
        let new = db(vec![Table::new("t").column(pk("id")).column(col("v").size(32))]);
        let set = compare(&old, &new).unwrap();
        assert_eq!(
            set.changes(),
            &[Change::ColumnSizeChanged {
                table: "t".into(),
                column: "v".into(),
                from: Sizing { size: Some(20), scale: None },
                to: Sizing { size: Some(32), scale: None },
            }]
        );

        let new = db(vec![Table::new("t")
            .column(pk("id"))
            .column(Column::new("v", LogicalType::Char).size(40))]);
        assert_eq!(kinds(&compare(&old, &new).unwrap()), vec![ChangeKind::ColumnTypeChanged]);
    }

    #[test]
    fn test_native_type_equivalence_hides_type_changes() {
        let table = |ty| Table::new("t").column(pk("id")).column(Column::new("n", ty));
        let old = db(vec![table(LogicalType::Integer)]);
        let new = db(vec![table(LogicalType::BigInt)]);

        let sqlite = PlatformInfo::sqlite();
        assert!(ModelComparator::new(&sqlite).compare(&old, &new).unwrap().is_empty());
        assert_eq!(kinds(&compare(&old, &new).unwrap()), vec![ChangeKind::ColumnTypeChanged]);
    }

    #[test]
    fn test_automatically_required_primary_key() {
        let old = db(vec![
            Table::new("t").column(Column::new("id", LogicalType::Integer).primary_key())
        ]);
        let new = db(vec![Table::new("t").column(pk("id"))]);

        assert_eq!(kinds(&compare(&old, &new).unwrap()), vec![ChangeKind::ColumnRequiredChanged]);
        let postgres = PlatformInfo::postgresql();
        assert!(ModelComparator::new(&postgres).compare(&old, &new).unwrap().is_empty());
    }

    #[test]
    fn test_column_leaving_key_keeps_declared_required() {
        let v = || Column::new("v", LogicalType::Integer);
        let old = db(vec![Table::new("t").column(pk("id")).column(v().primary_key())]);
        let new = db(vec![Table::new("t").column(pk("id")).column(v().required())]);

        let postgres = PlatformInfo::postgresql();
        let set = ModelComparator::new(&postgres).compare(&old, &new).unwrap();
        assert_eq!(
            set.changes(),
            &[
                Change::ColumnRequiredChanged {
                    table: "t".into(),
                    column: "v".into(),
                    required: true,
                },
                Change::PrimaryKeyChanged {
                    table: "t".into(),
                    from: vec!["id".into(), "v".into()],
                    to: vec!["id".into()],
                },
            ]
        );
    }

    #[test]
    fn test_index_matching_by_name_and_columns() {
        let old = db(vec![Table::new("t")
            .column(pk("id"))
            .column(col("a"))
            .column(col("b"))
            .index(Index::named("same_name").column("a"))
            .index(Index::named("old_name").column("b"))
            .index(Index::unnamed().column("a").column("b"))]);
        let new = db(vec![Table::new("t")
            .column(pk("id"))
            .column(col("a"))
            .column(col("b"))
            .index(Index::named("same_name").column("b"))
            .index(Index::named("new_name").column("b"))
            .index(Index::named("now_named").column("a").column("b"))]);

        let set = compare(&old, &new).unwrap();
        assert_eq!(
            kinds(&set),
            vec![
                ChangeKind::IndexRemoved,
                ChangeKind::IndexColumnsChanged,
                ChangeKind::IndexAdded,
            ]
        );
    }

    #[test]
    fn test_unique_flag_change_is_remove_and_add() {
        let old = db(vec![Table::new("t")
            .column(pk("id"))
            .column(col("a"))
            .index(Index::named("i").column("a"))]);
        let new = db(vec![Table::new("t")
            .column(pk("id"))
            .column(col("a"))
            .index(Index::named("i").column("a").unique())]);
        assert_eq!(
            kinds(&compare(&old, &new).unwrap()),
            vec![ChangeKind::IndexRemoved, ChangeKind::IndexAdded]
        );
    }

    #[test]
    fn test_foreign_key_and_backing_index_removed_once() {
        let parent = Table::new("other").column(pk("id"));
        let old = db(vec![
            parent.clone(),
            Table::new("t")
                .column(pk("id"))
                .column(Column::new("ref_id", LogicalType::Integer))
                .index(Index::named("test").column("ref_id"))
                .foreign_key(ForeignKey::named("test", "other").reference("ref_id", "id")),
        ]);
        let new = db(vec![
            parent,
            Table::new("t")
                .column(pk("id"))
                .column(Column::new("ref_id", LogicalType::Integer)),
        ]);

        let set = compare(&old, &new).unwrap();
        assert_eq!(kinds(&set), vec![ChangeKind::ForeignKeyRemoved]);
    }

    #[test]
    fn test_backing_index_removed_while_foreign_key_stays() {
        let child = || {
            Table::new("t")
                .column(pk("id"))
                .column(Column::new("ref_id", LogicalType::Integer))
                .foreign_key(ForeignKey::named("test", "other").reference("ref_id", "id"))
        };
        let parent = Table::new("other").column(pk("id"));
        let old = db(vec![
            parent.clone(),
            child().index(Index::named("test").column("ref_id")),
        ]);
        let new = db(vec![parent, child()]);

        let set = compare(&old, &new).unwrap();
        assert_eq!(kinds(&set), vec![ChangeKind::IndexRemoved]);
    }

    #[test]
    fn test_foreign_key_action_change() {
        let parent = Table::new("p").column(pk("id"));
        let child = |action| {
            Table::new("c")
                .column(pk("id"))
                .column(Column::new("p_id", LogicalType::Integer))
                .foreign_key(ForeignKey::named("fk", "p").reference("p_id", "id").on_delete(action))
        };
        let old = db(vec![parent.clone(), child(ForeignKeyAction::NoAction)]);
        let new = db(vec![parent, child(ForeignKeyAction::Cascade)]);

        assert_eq!(
            kinds(&compare(&old, &new).unwrap()),
            vec![ChangeKind::ForeignKeyReferencesChanged]
        );
    }

    #[test]
    fn test_column_positions_and_order() {
        let old = db(vec![Table::new("t").column(pk("id")).column(col("a")).column(col("b"))]);

        let inserted = db(vec![Table::new("t")
            .column(pk("id"))
            .column(col("x"))
            .column(col("a"))
            .column(col("b"))
            .column(col("y"))]);
        let set = compare(&old, &inserted).unwrap();
        let positions: Vec<_> = set
            .iter()
            .filter_map(|c| match c {
                Change::ColumnAdded {
                    column, position, ..
                } => Some((column.name.as_str(), *position)),
                _ => None,
            })
            .collect();
        assert_eq!(positions, vec![("x", Some(1)), ("y", None)]);

        let reordered = db(vec![Table::new("t")
            .column(pk("id"))
            .column(col("b"))
            .column(col("a"))]);
        let set = compare(&old, &reordered).unwrap();
        assert_eq!(
            set.changes(),
            &[Change::ColumnOrderChanged {
                table: "t".into(),
                order: vec!["id".into(), "b".into(), "a".into()],
            }]
        );
    }

    #[test]
    fn test_primary_key_membership() {
        let old = db(vec![Table::new("t").column(pk("id")).column(col("a").required())]);
        let new = db(vec![Table::new("t")
            .column(pk("id"))
            .column(col("a").required().primary_key())]);

        let set = compare(&old, &new).unwrap();
        assert_eq!(
            set.changes(),
            &[Change::PrimaryKeyChanged {
                table: "t".into(),
                from: vec!["id".into()],
                to: vec!["id".into(), "a".into()],
            }]
        );
    }

    #[test]
    fn test_validation_runs_on_both_models() {
        let good = db(vec![Table::new("t").column(pk("id"))]);
        let bad = db(vec![Table::new("t")
            .column(pk("id"))
            .index(Index::named("i").column("missing"))]);

        let err = compare(&good, &bad).unwrap_err();
        assert!(matches!(err, AlterError::Validation(_)));
        let err = compare(&bad, &bad).unwrap_err();
        assert_eq!(err.validation_errors().len(), 2);
    }
}
