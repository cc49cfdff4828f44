//! Alteration planner.
//!
//! Turns a [`ChangeSet`] into an [`AlterationScript`]: ordered phases of steps
//! that can each be applied as one unit. Every step is assigned to a fixed
//! [`Stage`]; the stage order encodes the sequencing constraints (constraints
//! are dropped before the columns they cover change, tables exist before
//! foreign keys point at them, and so on). Inside a phase, steps are ordered
//! by table name, then column ordinal, then the order they were planned in.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::capability::{Capabilities, Capability};
use crate::change::{Change, ChangeSet};
use crate::error::{AlterError, LossKind, LossyOperation, Result, UnsupportedOperation};
use crate::schema::{name_key, names_equal, Column, Database, ForeignKey, Index, Table};

/// Plans `changes` for `caps` with default options.
pub fn plan(changes: &ChangeSet, caps: &dyn Capabilities) -> Result<AlterationScript> {
    AlterationPlanner::new(caps).plan(changes)
}

/// Caller decisions the planner cannot make on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerOptions {
    /// Plan NOT NULL for newly added required columns that have no default,
    /// accepting that existing rows may be rejected.
    pub accept_row_loss: bool,
}

impl PlannerOptions {
    /// Options that accept row loss.
    #[must_use]
    pub fn accepting_row_loss() -> Self {
        Self {
            accept_row_loss: true,
        }
    }
}

/// Fixed stages of a script, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DropForeignKeys,
    DropIndexes,
    DropPrimaryKeys,
    DropTables,
    CreateTables,
    DropColumns,
    AddColumns,
    AlterColumnTypes,
    AlterColumns,
    AlterDefaults,
    Backfill,
    TightenColumns,
    CreatePrimaryKeys,
    CreateIndexes,
    CreateForeignKeys,
    Reorder,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DropForeignKeys => "drop foreign keys",
            Self::DropIndexes => "drop indexes",
            Self::DropPrimaryKeys => "drop primary keys",
            Self::DropTables => "drop tables",
            Self::CreateTables => "create tables",
            Self::DropColumns => "drop columns",
            Self::AddColumns => "add columns",
            Self::AlterColumnTypes => "alter column types",
            Self::AlterColumns => "alter columns",
            Self::AlterDefaults => "alter defaults",
            Self::Backfill => "backfill",
            Self::TightenColumns => "tighten columns",
            Self::CreatePrimaryKeys => "create primary keys",
            Self::CreateIndexes => "create indexes",
            Self::CreateForeignKeys => "create foreign keys",
            Self::Reorder => "reorder",
        })
    }
}

/// Value written into existing rows by a backfill step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fill {
    /// Rows holding NULL receive the column's default.
    Default(String),
    /// Rows receive generated identity values.
    Identity,
}

/// One unit of work for the external executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    /// A structural change.
    Change(Change),
    /// Populate a column of existing rows.
    Backfill {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// What to write.
        fill: Fill,
    },
    /// Recreate the table with its columns in `order`, copying the rows.
    RebuildTable {
        /// Table name.
        table: String,
        /// Every column name, in the new order.
        order: Vec<String>,
    },
}

impl Step {
    /// Name of the table the step applies to.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Change(change) => change.table(),
            Self::Backfill { table, .. } | Self::RebuildTable { table, .. } => table,
        }
    }

    /// Name of the column the step applies to, for column-level steps.
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Change(change) => change.column(),
            Self::Backfill { column, .. } => Some(column),
            Self::RebuildTable { .. } => None,
        }
    }

    /// Returns the change, if this step is one.
    #[must_use]
    pub fn as_change(&self) -> Option<&Change> {
        match self {
            Self::Change(change) => Some(change),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Change(change) => write!(f, "{change}"),
            Self::Backfill {
                table,
                column,
                fill: Fill::Default(value),
            } => write!(f, "Backfill '{table}.{column}' with default {value}"),
            Self::Backfill {
                table,
                column,
                fill: Fill::Identity,
            } => write!(f, "Backfill '{table}.{column}' with identity values"),
            Self::RebuildTable { table, order } => {
                write!(f, "Rebuild table '{}' as ({})", table, order.join(", "))
            }
        }
    }
}

/// Steps safe to apply together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// The stage the phase realizes.
    pub stage: Stage,
    /// Steps in execution order.
    pub steps: Vec<Step>,
}

/// The planner's output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterationScript {
    /// Phases in execution order.
    pub phases: Vec<Phase>,
    /// Steps that may lose data, planned or held back.
    pub warnings: Vec<LossyOperation>,
}

impl AlterationScript {
    /// Returns true if there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// All steps, in execution order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.phases.iter().flat_map(|p| p.steps.iter())
    }

    /// All structural changes, in execution order.
    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.steps().filter_map(Step::as_change)
    }

    /// Index of the first phase holding a step that matches.
    pub fn phase_of(&self, predicate: impl Fn(&Step) -> bool) -> Option<usize> {
        self.phases
            .iter()
            .position(|p| p.steps.iter().any(&predicate))
    }

    /// Whether any planned step may lose data.
    #[must_use]
    pub fn is_lossy(&self) -> bool {
        self.warnings.iter().any(|w| w.planned)
    }
}

/// Sequences changes under a platform's capabilities.
pub struct AlterationPlanner<'a> {
    caps: &'a dyn Capabilities,
    options: PlannerOptions,
}

impl<'a> AlterationPlanner<'a> {
    /// Creates a planner with default options.
    #[must_use]
    pub fn new(caps: &'a dyn Capabilities) -> Self {
        Self {
            caps,
            options: PlannerOptions::default(),
        }
    }

    /// Sets the planner options.
    #[must_use]
    pub fn with_options(mut self, options: PlannerOptions) -> Self {
        self.options = options;
        self
    }

    /// Plans the changes.
    ///
    /// Fails with every [`UnsupportedOperation`] found rather than emitting a
    /// partial script.
    pub fn plan(&self, changes: &ChangeSet) -> Result<AlterationScript> {
        let mut builder = PlanBuilder::new(self.caps, &self.options, changes);

        builder.check_capabilities();
        for change in changes {
            builder.place(change);
        }
        builder.protect_altered_columns();
        builder.protect_primary_keys();
        builder.restore_backing_indexes();
        builder.unify_index_drops();
        builder.order_columns();

        if let Some(err) = AlterError::collect(std::mem::take(&mut builder.errors)) {
            return Err(err);
        }

        let script = builder.finish();
        debug!(
            platform = self.caps.name(),
            phases = script.phases.len(),
            steps = script.steps().count(),
            warnings = script.warnings.len(),
            "Planned alteration script"
        );
        Ok(script)
    }
}

struct Entry {
    table_key: String,
    ordinal: usize,
    seq: usize,
    step: Step,
}

struct PlanBuilder<'p> {
    caps: &'p dyn Capabilities,
    options: &'p PlannerOptions,
    cs: bool,
    changes: &'p ChangeSet,
    source: &'p Database,
    target: &'p Database,
    buckets: BTreeMap<Stage, Vec<Entry>>,
    seq: usize,
    warnings: Vec<LossyOperation>,
    errors: Vec<UnsupportedOperation>,
    /// `(table, column)` keys whose definition changes in place or goes away.
    altered: BTreeSet<(String, String)>,
    /// Tables whose primary key is dropped, with the old key columns.
    key_drops: Vec<(String, Vec<String>)>,
    /// Tables whose primary key is recreated.
    key_rebuilds: BTreeSet<String>,
    reorders: BTreeMap<String, (String, Vec<String>)>,
    /// Tables whose added columns lost their position.
    repositioned: BTreeMap<String, String>,
}

impl<'p> PlanBuilder<'p> {
    fn new(
        caps: &'p dyn Capabilities,
        options: &'p PlannerOptions,
        changes: &'p ChangeSet,
    ) -> Self {
        let cs = caps.identifiers_case_sensitive();
        let key_rebuilds = changes
            .iter()
            .filter_map(|c| match c {
                Change::PrimaryKeyChanged { table, to, .. } if !to.is_empty() => {
                    Some(name_key(table, cs))
                }
                _ => None,
            })
            .collect();

        Self {
            caps,
            options,
            cs,
            changes,
            source: changes.source(),
            target: changes.target(),
            buckets: BTreeMap::new(),
            seq: 0,
            warnings: Vec::new(),
            errors: Vec::new(),
            altered: BTreeSet::new(),
            key_drops: Vec::new(),
            key_rebuilds,
            reorders: BTreeMap::new(),
            repositioned: BTreeMap::new(),
        }
    }

    fn push(&mut self, stage: Stage, step: Step) {
        let table_key = name_key(step.table(), self.cs);
        let ordinal = self.ordinal(&step);
        self.seq += 1;
        self.buckets.entry(stage).or_default().push(Entry {
            table_key,
            ordinal,
            seq: self.seq,
            step,
        });
    }

    fn push_change(&mut self, stage: Stage, change: Change) {
        self.push(stage, Step::Change(change));
    }

    /// Column position used as tie-break; table-level steps sort after columns.
    fn ordinal(&self, step: &Step) -> usize {
        let Some(column) = step.column() else {
            return usize::MAX;
        };
        [self.target, self.source]
            .iter()
            .find_map(|db| {
                db.get_table(step.table(), self.cs)
                    .and_then(|t| t.ordinal_of(column, self.cs))
            })
            .unwrap_or(usize::MAX)
    }

    fn warn(&mut self, table: &str, column: Option<&str>, kind: LossKind, planned: bool) {
        self.warnings.push(LossyOperation {
            table: table.to_string(),
            column: column.map(str::to_string),
            kind,
            planned,
        });
    }

    fn unsupported(&mut self, table: &str, column: &str, capability: Capability, reason: &str) {
        let err = UnsupportedOperation::new(table, Some(column), capability, reason);
        if !self.errors.contains(&err) {
            self.errors.push(err);
        }
    }

    fn target_column(&self, table: &str, column: &str) -> Option<&'p Column> {
        self.target
            .get_table(table, self.cs)?
            .get_column(column, self.cs)
    }

    fn source_column(&self, table: &str, column: &str) -> Option<&'p Column> {
        self.source
            .get_table(table, self.cs)?
            .get_column(column, self.cs)
    }

    fn mark_altered(&mut self, table: &str, column: &str) {
        self.altered
            .insert((name_key(table, self.cs), name_key(column, self.cs)));
    }

    /// Whether the identity change of `column` must share the key's phase.
    fn merges_identity(&self, table: &str, column: &Column) -> bool {
        column.primary_key
            && column.auto_increment
            && !self
                .caps
                .mixing_identity_and_normal_primary_key_columns_supported()
            && self.key_rebuilds.contains(&name_key(table, self.cs))
    }

    /// Whether an existing column gains identity inside the key's phase.
    fn gains_identity_with_key(&self, table: &str, column: &str) -> bool {
        let cs = self.cs;
        self.target_column(table, column)
            .is_some_and(|c| self.merges_identity(table, c))
            && self.changes.iter().any(|c| {
                matches!(c, Change::ColumnAutoIncrementChanged {
                    table: t,
                    column: n,
                    auto_increment: true,
                } if names_equal(t, table, cs) && names_equal(n, column, cs))
            })
    }

    fn tightened(&self, table: &str, column: &str) -> bool {
        let cs = self.cs;
        self.changes.iter().any(|c| {
            matches!(c, Change::ColumnRequiredChanged {
                table: t,
                column: n,
                required: true,
            } if names_equal(t, table, cs) && names_equal(n, column, cs))
        })
    }

    fn has_step(&self, stage: Stage, predicate: impl Fn(&Step) -> bool) -> bool {
        self.buckets
            .get(&stage)
            .is_some_and(|entries| entries.iter().any(|e| predicate(&e.step)))
    }

    fn foreign_key_dropped(&self, table: &str, fk: &ForeignKey) -> bool {
        let cs = self.cs;
        self.has_step(Stage::DropForeignKeys, |step| {
            matches!(step, Step::Change(Change::ForeignKeyRemoved { table: t, foreign_key })
                if names_equal(t, table, cs) && foreign_key.identifies(fk, cs))
        })
    }

    fn foreign_key_added(&self, table: &str, fk: &ForeignKey) -> bool {
        let cs = self.cs;
        self.has_step(Stage::CreateForeignKeys, |step| {
            matches!(step, Step::Change(Change::ForeignKeyAdded { table: t, foreign_key })
                if names_equal(t, table, cs) && foreign_key.identifies(fk, cs))
        })
    }

    fn index_dropped(&self, table: &str, index: &Index) -> bool {
        let cs = self.cs;
        self.has_step(Stage::DropIndexes, |step| {
            matches!(step, Step::Change(Change::IndexRemoved { table: t, index: i })
                if names_equal(t, table, cs) && i.identifies(index, cs))
        })
    }

    fn index_added(&self, table: &str, index: &Index) -> bool {
        let cs = self.cs;
        self.has_step(Stage::CreateIndexes, |step| {
            matches!(step, Step::Change(Change::IndexAdded { table: t, index: i })
                if names_equal(t, table, cs) && i.identifies(index, cs))
        })
    }

    fn dropped_foreign_keys(&self) -> Vec<(String, ForeignKey)> {
        self.buckets
            .get(&Stage::DropForeignKeys)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| match &e.step {
                        Step::Change(Change::ForeignKeyRemoved { table, foreign_key }) => {
                            Some((table.clone(), foreign_key.clone()))
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reports changes whose target state the platform cannot hold.
    fn check_capabilities(&mut self) {
        let cs = self.cs;
        let caps = self.caps;
        let mut touched: BTreeMap<String, (String, BTreeSet<String>)> = BTreeMap::new();
        let mut touch = |table: &str, column: &str| {
            touched
                .entry(name_key(table, cs))
                .or_insert_with(|| (table.to_string(), BTreeSet::new()))
                .1
                .insert(name_key(column, cs));
        };

        let mut refused = Vec::new();
        for change in self.changes {
            match change {
                Change::TableAdded { table } => {
                    for column in &table.columns {
                        touch(&table.name, &column.name);
                    }
                }
                Change::ColumnAdded { table, column, .. } => touch(table, &column.name),
                Change::ColumnRequiredChanged { table, column, .. } => touch(table, column),
                Change::ColumnAutoIncrementChanged { table, column, .. } => {
                    touch(table, column);
                    if !caps.identity_status_alterable() {
                        refused.push((
                            table.clone(),
                            column.clone(),
                            Capability::IdentityStatusAlteration,
                            "identity status change",
                        ));
                    }
                }
                Change::PrimaryKeyChanged { table, from, to } => {
                    for column in from.iter().chain(to) {
                        touch(table, column);
                    }
                }
                Change::ColumnTypeChanged { table, column, .. }
                | Change::ColumnSizeChanged { table, column, .. } => {
                    let keyed = [
                        self.source_column(table, column),
                        self.target_column(table, column),
                    ]
                    .into_iter()
                    .flatten()
                    .any(|c| c.primary_key);
                    if keyed && !caps.primary_key_column_type_alterable() {
                        refused.push((
                            table.clone(),
                            column.clone(),
                            Capability::PrimaryKeyColumnTypeAlteration,
                            "primary key column type change",
                        ));
                    }
                }
                _ => {}
            }
        }

        for (table, column, capability, reason) in refused {
            self.unsupported(&table, &column, capability, reason);
        }

        for (table_name, columns) in touched.values() {
            let Some(table) = self.target.get_table(table_name, cs) else {
                continue;
            };
            let identities = table.columns.iter().filter(|c| c.auto_increment).count();
            for column in &table.columns {
                if !columns.contains(&name_key(&column.name, cs)) {
                    continue;
                }
                if column.auto_increment
                    && !column.primary_key
                    && !caps.non_primary_key_identity_columns_supported()
                {
                    self.unsupported(
                        &table.name,
                        &column.name,
                        Capability::NonPrimaryKeyIdentityColumns,
                        "identity column outside the primary key",
                    );
                }
                if column.auto_increment
                    && identities > 1
                    && !caps.multiple_identity_columns_supported()
                {
                    self.unsupported(
                        &table.name,
                        &column.name,
                        Capability::MultipleIdentityColumns,
                        "second identity column",
                    );
                }
                if column.primary_key
                    && !column.required
                    && caps.primary_key_columns_have_to_be_required()
                    && !caps.primary_key_column_automatically_required()
                {
                    self.unsupported(
                        &table.name,
                        &column.name,
                        Capability::PrimaryKeyColumnsHaveToBeRequired,
                        "nullable primary key column",
                    );
                }
            }
        }
    }

    /// Assigns a change to its stage, expanding it into several steps where needed.
    fn place(&mut self, change: &Change) {
        match change {
            Change::TableAdded { .. } => self.push_change(Stage::CreateTables, change.clone()),
            Change::TableRemoved { table } => {
                self.warn(&table.name, None, LossKind::TableDropped, true);
                self.push_change(Stage::DropTables, change.clone());
            }
            Change::ColumnAdded {
                table,
                column,
                position,
            } => self.place_added_column(table, column, *position),
            Change::ColumnRemoved { table, column } => {
                self.mark_altered(table, &column.name);
                self.warn(table, Some(&column.name), LossKind::ColumnDropped, true);
                self.push_change(Stage::DropColumns, change.clone());
            }
            Change::ColumnOrderChanged { table, order } => {
                self.reorders
                    .insert(name_key(table, self.cs), (table.clone(), order.clone()));
            }
            Change::ColumnTypeChanged {
                table,
                column,
                from,
                to,
                from_sizing,
                to_sizing,
            } => {
                self.mark_altered(table, column);
                if !from.widens_to(*to) {
                    let kind = LossKind::TypeNarrowed { from: *from, to: *to };
                    self.warn(table, Some(column), kind, true);
                } else if from_sizing.narrows_to(to_sizing) {
                    let kind = LossKind::SizeNarrowed {
                        from: *from_sizing,
                        to: *to_sizing,
                    };
                    self.warn(table, Some(column), kind, true);
                }
                self.push_change(Stage::AlterColumnTypes, change.clone());
            }
            Change::ColumnSizeChanged {
                table,
                column,
                from,
                to,
            } => {
                self.mark_altered(table, column);
                if from.narrows_to(to) {
                    let kind = LossKind::SizeNarrowed { from: *from, to: *to };
                    self.warn(table, Some(column), kind, true);
                }
                self.push_change(Stage::AlterColumnTypes, change.clone());
            }
            Change::ColumnRequiredChanged {
                table,
                column,
                required,
            } => {
                if !*required {
                    self.push_change(Stage::AlterColumns, change.clone());
                    return;
                }
                // tightened together with the identity change
                if self.gains_identity_with_key(table, column) {
                    return;
                }
                let target = self.target_column(table, column);
                let fill = match target {
                    Some(c) if c.auto_increment => Some(Fill::Identity),
                    Some(c) => c.default.clone().map(Fill::Default),
                    None => None,
                };
                match fill {
                    Some(fill) => self.push(
                        Stage::Backfill,
                        Step::Backfill {
                            table: table.clone(),
                            column: column.clone(),
                            fill,
                        },
                    ),
                    None => self.warn(table, Some(column), LossKind::NullsRejected, true),
                }
                self.push_change(Stage::TightenColumns, change.clone());
            }
            Change::ColumnAutoIncrementChanged { table, column, .. } => {
                if !self.gains_identity_with_key(table, column) {
                    self.push_change(Stage::AlterColumns, change.clone());
                    return;
                }
                self.push_change(Stage::CreatePrimaryKeys, change.clone());
                if self.tightened(table, column) {
                    self.push(
                        Stage::CreatePrimaryKeys,
                        Step::Backfill {
                            table: table.clone(),
                            column: column.clone(),
                            fill: Fill::Identity,
                        },
                    );
                    self.push_change(
                        Stage::CreatePrimaryKeys,
                        Change::ColumnRequiredChanged {
                            table: table.clone(),
                            column: column.clone(),
                            required: true,
                        },
                    );
                }
            }
            Change::ColumnDefaultChanged { .. } => {
                self.push_change(Stage::AlterDefaults, change.clone());
            }
            Change::PrimaryKeyChanged { table, from, to } => {
                if !from.is_empty() {
                    self.key_drops.push((table.clone(), from.clone()));
                    self.push_change(
                        Stage::DropPrimaryKeys,
                        Change::PrimaryKeyChanged {
                            table: table.clone(),
                            from: from.clone(),
                            to: Vec::new(),
                        },
                    );
                }
                if !to.is_empty() {
                    let cs = self.cs;
                    let narrowed = from
                        .iter()
                        .any(|c| !to.iter().any(|t| names_equal(c, t, cs)));
                    if narrowed {
                        let kind = LossKind::PrimaryKeyNarrowed {
                            outcome: self.caps.dropped_key_values(),
                        };
                        self.warn(table, None, kind, true);
                    }
                    self.push_change(
                        Stage::CreatePrimaryKeys,
                        Change::PrimaryKeyChanged {
                            table: table.clone(),
                            from: Vec::new(),
                            to: to.clone(),
                        },
                    );
                }
            }
            Change::IndexAdded { .. } => self.push_change(Stage::CreateIndexes, change.clone()),
            Change::IndexRemoved { .. } => self.push_change(Stage::DropIndexes, change.clone()),
            Change::IndexColumnsChanged { table, from, to } => {
                self.push_change(
                    Stage::DropIndexes,
                    Change::IndexRemoved {
                        table: table.clone(),
                        index: from.clone(),
                    },
                );
                self.push_change(
                    Stage::CreateIndexes,
                    Change::IndexAdded {
                        table: table.clone(),
                        index: to.clone(),
                    },
                );
            }
            Change::ForeignKeyAdded { .. } => {
                self.push_change(Stage::CreateForeignKeys, change.clone());
            }
            Change::ForeignKeyRemoved { .. } => {
                self.push_change(Stage::DropForeignKeys, change.clone());
            }
            Change::ForeignKeyReferencesChanged { table, from, to } => {
                self.push_change(
                    Stage::DropForeignKeys,
                    Change::ForeignKeyRemoved {
                        table: table.clone(),
                        foreign_key: from.clone(),
                    },
                );
                self.push_change(
                    Stage::CreateForeignKeys,
                    Change::ForeignKeyAdded {
                        table: table.clone(),
                        foreign_key: to.clone(),
                    },
                );
            }
        }
    }

    fn place_added_column(&mut self, table: &str, column: &Column, position: Option<usize>) {
        let position = if position.is_some() && !self.caps.column_position_on_add_supported() {
            self.repositioned
                .insert(name_key(table, self.cs), table.to_string());
            None
        } else {
            position
        };
        let added = |column: Column| {
            Step::Change(Change::ColumnAdded {
                table: table.to_string(),
                column,
                position,
            })
        };
        let backfill = |fill: Fill| Step::Backfill {
            table: table.to_string(),
            column: column.name.clone(),
            fill,
        };
        let tighten = || {
            Step::Change(Change::ColumnRequiredChanged {
                table: table.to_string(),
                column: column.name.clone(),
                required: true,
            })
        };

        // key membership is established by the primary key step
        let mut definition = Column {
            primary_key: false,
            ..column.clone()
        };

        if column.auto_increment {
            if self.merges_identity(table, column) {
                definition.auto_increment = false;
                definition.required = false;
                self.push(Stage::AddColumns, added(definition));
                self.push_change(
                    Stage::CreatePrimaryKeys,
                    Change::ColumnAutoIncrementChanged {
                        table: table.to_string(),
                        column: column.name.clone(),
                        auto_increment: true,
                    },
                );
                self.push(Stage::CreatePrimaryKeys, backfill(Fill::Identity));
                if column.required {
                    self.push(Stage::CreatePrimaryKeys, tighten());
                }
            } else {
                self.push(Stage::AddColumns, added(definition));
                self.push(Stage::Backfill, backfill(Fill::Identity));
            }
            return;
        }

        if !column.required {
            self.push(Stage::AddColumns, added(definition));
            return;
        }

        match &column.default {
            Some(_) if self.caps.required_column_with_default_addable() => {
                self.push(Stage::AddColumns, added(definition));
            }
            Some(value) => {
                definition.required = false;
                self.push(Stage::AddColumns, added(definition));
                self.push(Stage::Backfill, backfill(Fill::Default(value.clone())));
                self.push(Stage::TightenColumns, tighten());
            }
            None => {
                definition.required = false;
                self.push(Stage::AddColumns, added(definition));
                let planned = self.options.accept_row_loss;
                self.warn(
                    table,
                    Some(&column.name),
                    LossKind::RequiredWithoutDefault,
                    planned,
                );
                if planned {
                    self.push(Stage::TightenColumns, tighten());
                }
            }
        }
    }

    /// Drops a foreign key for the duration of the script, re-adding it at
    /// the end if the target model still has it unchanged.
    fn drop_foreign_key_temporarily(&mut self, owner: &str, fk: &ForeignKey, reason: &str) {
        if self.foreign_key_dropped(owner, fk) {
            return;
        }
        trace!(
            table = owner,
            foreign_key = %fk.label(),
            reason,
            "Dropping foreign key temporarily"
        );
        self.push_change(
            Stage::DropForeignKeys,
            Change::ForeignKeyRemoved {
                table: owner.to_string(),
                foreign_key: fk.clone(),
            },
        );

        let cs = self.cs;
        let survivor = self.target.get_table(owner, cs).and_then(|t| {
            t.foreign_keys
                .iter()
                .find(|f| f.identifies(fk, cs) && f.same_definition(fk, cs))
        });
        if let Some(survivor) = survivor {
            if !self.foreign_key_added(owner, survivor) {
                self.push_change(
                    Stage::CreateForeignKeys,
                    Change::ForeignKeyAdded {
                        table: owner.to_string(),
                        foreign_key: survivor.clone(),
                    },
                );
            }
        }
    }

    fn drop_index_temporarily(&mut self, table: &str, index: &Index) {
        if self.index_dropped(table, index) {
            return;
        }
        trace!(table, index = %index.label(), "Dropping index temporarily");
        self.push_change(
            Stage::DropIndexes,
            Change::IndexRemoved {
                table: table.to_string(),
                index: index.clone(),
            },
        );
        self.readd_index(table, index);
    }

    /// Re-creates `index` at the end if the target model still has it unchanged.
    fn readd_index(&mut self, table: &str, index: &Index) {
        let cs = self.cs;
        let survivor = self.target.get_table(table, cs).and_then(|t| {
            t.indexes.iter().find(|i| {
                i.identifies(index, cs) && i.same_columns(index, cs) && i.unique == index.unique
            })
        });
        if let Some(survivor) = survivor {
            if !self.index_added(table, survivor) {
                self.push_change(
                    Stage::CreateIndexes,
                    Change::IndexAdded {
                        table: table.to_string(),
                        index: survivor.clone(),
                    },
                );
            }
        }
    }

    /// Drops constraints covering columns the platform cannot alter while constrained.
    fn protect_altered_columns(&mut self) {
        if self.altered.is_empty() {
            return;
        }
        let cs = self.cs;
        let source = self.source;
        let is_altered = |table: &str, column: &str| {
            self.altered
                .contains(&(name_key(table, cs), name_key(column, cs)))
        };

        let mut foreign_keys = Vec::new();
        if !self.caps.foreign_key_columns_alterable() {
            for owner in &source.tables {
                for fk in &owner.foreign_keys {
                    let covered = fk.references.iter().any(|r| {
                        is_altered(&owner.name, &r.local)
                            || is_altered(&fk.foreign_table, &r.foreign)
                    });
                    if covered {
                        foreign_keys.push((owner.name.as_str(), fk));
                    }
                }
            }
        }

        let mut indexes = Vec::new();
        if !self.caps.indexed_columns_alterable() && self.caps.indices_supported() {
            for table in &source.tables {
                for index in &table.indexes {
                    if index.columns.iter().any(|c| is_altered(&table.name, c)) {
                        indexes.push((table.name.as_str(), index));
                    }
                }
            }
        }

        for (owner, fk) in foreign_keys {
            self.drop_foreign_key_temporarily(owner, fk, "column alteration");
        }
        for (table, index) in indexes {
            self.drop_index_temporarily(table, index);
        }
    }

    /// Drops foreign keys referencing a primary key that is about to be dropped.
    fn protect_primary_keys(&mut self) {
        let cs = self.cs;
        let source = self.source;
        let drops = self.key_drops.clone();
        let mut inbound = Vec::new();
        for (table, key) in &drops {
            for (owner, fk) in source.foreign_keys_into(table, cs) {
                let references_key = fk
                    .references
                    .iter()
                    .any(|r| key.iter().any(|k| names_equal(&r.foreign, k, cs)));
                if references_key {
                    inbound.push((owner.name.as_str(), fk));
                }
            }
        }
        for (owner, fk) in inbound {
            self.drop_foreign_key_temporarily(owner, fk, "primary key rebuild");
        }
    }

    /// Dropping a foreign key drops its backing index; re-create the ones the
    /// target model keeps.
    fn restore_backing_indexes(&mut self) {
        if !self.caps.indices_supported() {
            return;
        }
        let cs = self.cs;
        let source = self.source;
        for (table, fk) in self.dropped_foreign_keys() {
            let backing = source
                .get_table(&table, cs)
                .and_then(|t| t.indexes.iter().find(|i| fk.is_backed_by(i, cs)));
            if let Some(index) = backing {
                self.readd_index(&table, index);
            }
        }
    }

    /// Removing a foreign key also removes its backing index.
    fn unify_index_drops(&mut self) {
        let cs = self.cs;
        let dropped = self.dropped_foreign_keys();
        if let Some(entries) = self.buckets.get_mut(&Stage::DropIndexes) {
            entries.retain(|e| match &e.step {
                Step::Change(Change::IndexRemoved { table, index }) => !dropped
                    .iter()
                    .any(|(t, fk)| names_equal(t, table, cs) && fk.is_backed_by(index, cs)),
                _ => true,
            });
        }
    }

    /// Schedules the final reorder or rebuild for tables whose column order
    /// the other steps do not produce.
    fn order_columns(&mut self) {
        let mut tables = self.repositioned.clone();
        for (key, (name, _)) in &self.reorders {
            tables.insert(key.clone(), name.clone());
        }

        for (key, name) in tables {
            let order = match self.reorders.get(&key) {
                Some((_, order)) => order.clone(),
                None => self
                    .target
                    .get_table(&name, self.cs)
                    .map(Table::column_names)
                    .unwrap_or_default(),
            };
            let step = if self.caps.column_reorder_supported() {
                Step::Change(Change::ColumnOrderChanged { table: name, order })
            } else {
                Step::RebuildTable { table: name, order }
            };
            self.push(Stage::Reorder, step);
        }
    }

    fn finish(self) -> AlterationScript {
        let phases = self
            .buckets
            .into_iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(stage, mut entries)| {
                entries.sort_by(|a, b| {
                    (&a.table_key, a.ordinal, a.seq).cmp(&(&b.table_key, b.ordinal, b.seq))
                });
                Phase {
                    stage,
                    steps: entries.into_iter().map(|e| e.step).collect(),
                }
            })
            .collect();

        AlterationScript {
            phases,
            warnings: self.warnings,
        }
    }
}
