//! End-to-end alteration scenarios.
//!
//! Each test compares two models, plans the result for one or more
//! platforms, and checks both the shape of the script and its effect on
//! existing rows.

mod common;

use common::*;
use oxide_alter::prelude::*;
use pretty_assertions::assert_eq;

fn roundtrip_table(extra: Option<Column>) -> Database {
    let pk = Column::new("pk", LogicalType::Integer).primary_key().required();
    let mut table = Table::new("roundtrip").column(pk);
    if let Some(column) = extra {
        table = table.column(column);
    }
    db(vec![table])
}

fn one_row() -> Rows {
    let mut rows = Rows::new();
    rows.insert("roundtrip", &[("pk", Some("1"))]);
    rows
}

#[test]
fn nullable_column_added_to_populated_table() {
    let old = roundtrip_table(None);
    let new = roundtrip_table(Some(Column::new("avalue", LogicalType::Varchar).size(32)));

    for caps in presets() {
        let script = assert_round_trip(&old, &new, &caps);
        assert_eq!(
            script.steps().cloned().collect::<Vec<_>>(),
            vec![Step::Change(Change::ColumnAdded {
                table: "roundtrip".into(),
                column: Column::new("avalue", LogicalType::Varchar).size(32),
                position: None,
            })],
            "on {}",
            caps.name
        );
        assert!(script.warnings.is_empty());

        let mut rows = one_row();
        rows.apply_script(&script).unwrap();
        assert_eq!(rows.value("roundtrip", 0, "avalue"), None);
    }
}

#[test]
fn identity_column_added_to_populated_table() {
    let old = roundtrip_table(None);
    let new = roundtrip_table(Some(Column::new("avalue", LogicalType::Integer).auto_increment()));

    for caps in [PlatformInfo::generic(), PlatformInfo::postgresql()] {
        let script = assert_round_trip(&old, &new, &caps);
        assert_eq!(
            script.phases.iter().map(|p| p.stage).collect::<Vec<_>>(),
            vec![Stage::AddColumns, Stage::Backfill]
        );

        let mut rows = one_row();
        rows.apply_script(&script).unwrap();
        assert_eq!(rows.value("roundtrip", 0, "avalue"), Some("1"));
    }

    // platforms that only allow identity columns inside the key refuse the change
    for caps in [PlatformInfo::mysql(), PlatformInfo::sqlite()] {
        let err = plan_with(&old, &new, &caps).unwrap_err();
        assert_eq!(
            err.unsupported_operations()[0].capability,
            Capability::NonPrimaryKeyIdentityColumns
        );
    }
}

#[test]
fn existing_column_becomes_required_identity() {
    let old = roundtrip_table(Some(Column::new("avalue", LogicalType::Integer)));
    let new = roundtrip_table(Some(
        Column::new("avalue", LogicalType::Integer)
            .required()
            .auto_increment(),
    ));

    for caps in [PlatformInfo::generic(), PlatformInfo::postgresql()] {
        let script = assert_round_trip(&old, &new, &caps);
        assert_eq!(
            script.phases.iter().map(|p| p.stage).collect::<Vec<_>>(),
            vec![Stage::AlterColumns, Stage::Backfill, Stage::TightenColumns]
        );
        assert!(script.warnings.is_empty());

        let mut rows = Rows::new();
        rows.insert("roundtrip", &[("pk", Some("1")), ("avalue", None)]);
        rows.apply_script(&script).unwrap();
        assert_eq!(rows.value("roundtrip", 0, "avalue"), Some("1"));
    }
}

#[test]
fn reordered_columns_need_one_final_step() {
    let columns = |names: [&str; 3]| {
        names.iter().fold(
            Table::new("roundtrip")
                .column(Column::new("pk", LogicalType::Integer).primary_key().required()),
            |t, n| t.column(Column::new(*n, LogicalType::Varchar).size(32)),
        )
    };
    let old = db(vec![columns(["a", "b", "c"])]);
    let new = db(vec![columns(["c", "a", "b"])]);

    for caps in presets() {
        let script = assert_round_trip(&old, &new, &caps);
        assert_eq!(script.phases.len(), 1, "on {}", caps.name);
        assert_eq!(script.phases[0].stage, Stage::Reorder);
        assert_eq!(script.phases[0].steps.len(), 1);

        let expected_order: Vec<String> = ["pk", "c", "a", "b"].map(String::from).to_vec();
        match &script.phases[0].steps[0] {
            Step::RebuildTable { order, .. } => {
                assert!(!caps.column_reorder_supported);
                assert_eq!(order, &expected_order);
            }
            Step::Change(Change::ColumnOrderChanged { order, .. }) => {
                assert!(caps.column_reorder_supported);
                assert_eq!(order, &expected_order);
            }
            other => panic!("Expected a reorder step, got {other:?}"),
        }
    }
}

#[test]
fn foreign_key_and_index_of_the_same_name_removed_once() {
    let parent = Table::new("parent").column(id_column());
    let child = |constrained: bool| {
        let table = Table::new("child")
            .column(id_column())
            .column(Column::new("parent_id", LogicalType::Integer));
        if constrained {
            table
                .index(Index::named("test").column("parent_id"))
                .foreign_key(ForeignKey::named("test", "parent").reference("parent_id", "id"))
        } else {
            table
        }
    };
    let old = db(vec![parent.clone(), child(true)]);
    let new = db(vec![parent, child(false)]);

    for caps in presets() {
        let script = assert_round_trip(&old, &new, &caps);
        let kinds: Vec<ChangeKind> = script.changes().map(Change::kind).collect();
        assert_eq!(kinds, vec![ChangeKind::ForeignKeyRemoved], "on {}", caps.name);
    }
}

#[test]
fn backing_index_dropped_while_foreign_key_stays() {
    let parent = Table::new("parent").column(id_column());
    let child = Table::new("child")
        .column(id_column())
        .column(Column::new("parent_id", LogicalType::Integer))
        .foreign_key(ForeignKey::named("test", "parent").reference("parent_id", "id"));
    let old = db(vec![
        parent.clone(),
        child.clone().index(Index::named("test").column("parent_id")),
    ]);
    let new = db(vec![parent, child]);

    for caps in presets() {
        let script = assert_round_trip(&old, &new, &caps);
        let kinds: Vec<ChangeKind> = script.changes().map(Change::kind).collect();
        assert_eq!(kinds, vec![ChangeKind::IndexRemoved], "on {}", caps.name);
    }
}

#[test]
fn widened_varchar_is_a_single_size_change() {
    let old = roundtrip_table(Some(Column::new("avalue", LogicalType::Varchar).size(20)));
    let new = roundtrip_table(Some(Column::new("avalue", LogicalType::Varchar).size(32)));

    for caps in presets() {
        let script = assert_round_trip(&old, &new, &caps);
        let steps: Vec<&Step> = script.steps().collect();
        assert_eq!(steps.len(), 1, "on {}", caps.name);
        assert!(matches!(
            steps[0],
            Step::Change(Change::ColumnSizeChanged { from, to, .. })
                if from.size == Some(20) && to.size == Some(32)
        ));
        assert!(script.warnings.is_empty());
    }
}

#[test]
fn narrowed_varchar_is_flagged() {
    let old = roundtrip_table(Some(Column::new("avalue", LogicalType::Varchar).size(32)));
    let new = roundtrip_table(Some(Column::new("avalue", LogicalType::Varchar).size(20)));

    let script = assert_round_trip(&old, &new, &PlatformInfo::generic());
    assert_eq!(script.warnings.len(), 1);
    assert!(script.warnings[0].planned);
    assert!(matches!(script.warnings[0].kind, LossKind::SizeNarrowed { .. }));
}

#[test]
fn required_column_with_default_fills_existing_rows() {
    let old = roundtrip_table(None);
    let new = roundtrip_table(Some(
        Column::new("avalue", LogicalType::Integer)
            .required()
            .default_value("2"),
    ));

    let caps = PlatformInfo {
        required_column_with_default_addable: false,
        ..PlatformInfo::generic()
    };
    for caps in [PlatformInfo::generic(), caps] {
        let script = assert_round_trip(&old, &new, &caps);
        let mut rows = one_row();
        rows.apply_script(&script).unwrap();
        assert_eq!(rows.value("roundtrip", 0, "avalue"), Some("2"));
    }
}

#[test]
fn required_column_without_default_rejects_rows() {
    let old = roundtrip_table(None);
    let new = roundtrip_table(Some(Column::new("avalue", LogicalType::Integer).required()));
    let caps = PlatformInfo::generic();

    let cautious = oxide_alter::alter(&old, &new, &caps).unwrap();
    let mut rows = one_row();
    rows.apply_script(&cautious).unwrap();
    assert_eq!(rows.value("roundtrip", 0, "avalue"), None);
    assert!(!cautious.warnings[0].planned);

    let accepting = assert_round_trip(&old, &new, &caps);
    let mut rows = one_row();
    assert!(rows.apply_script(&accepting).is_err());
    assert!(Rows::new().apply_script(&accepting).is_ok());
}

#[test]
fn new_tables_are_created_before_their_foreign_keys() {
    let a = Table::new("a")
        .column(id_column())
        .column(Column::new("b_id", LogicalType::Integer))
        .foreign_key(ForeignKey::named("a_b", "b").reference("b_id", "id"));
    let b = Table::new("b")
        .column(id_column())
        .column(Column::new("a_id", LogicalType::Integer))
        .foreign_key(ForeignKey::unnamed("a").reference("a_id", "id"));

    for caps in presets() {
        let script = assert_round_trip(&db(vec![]), &db(vec![a.clone(), b.clone()]), &caps);
        let created = script
            .phase_of(|s| matches!(s, Step::Change(Change::TableAdded { .. })))
            .unwrap();
        let linked = script
            .phase_of(|s| matches!(s, Step::Change(Change::ForeignKeyAdded { .. })))
            .unwrap();
        assert!(created < linked);
    }
}

#[test]
fn removed_table_is_dropped_after_its_inbound_foreign_keys() {
    let parent = Table::new("parent").column(id_column());
    let child = Table::new("child")
        .column(id_column())
        .column(Column::new("parent_id", LogicalType::Integer))
        .foreign_key(ForeignKey::named("fk_parent", "parent").reference("parent_id", "id"));
    let old = db(vec![parent, child]);
    let new = db(vec![Table::new("child")
        .column(id_column())
        .column(Column::new("parent_id", LogicalType::Integer))]);

    for caps in presets() {
        let script = assert_round_trip(&old, &new, &caps);
        let unlinked = script
            .phase_of(|s| matches!(s, Step::Change(Change::ForeignKeyRemoved { .. })))
            .unwrap();
        let dropped = script
            .phase_of(|s| matches!(s, Step::Change(Change::TableRemoved { .. })))
            .unwrap();
        assert!(unlinked < dropped);
        assert_eq!(script.warnings[0].kind, LossKind::TableDropped);
    }
}

#[test]
fn primary_key_rebuild_keeps_referencing_tables_intact() {
    let parent = |wide: bool| {
        let code = Column::new("code", LogicalType::Integer).required();
        Table::new("parent")
            .column(id_column())
            .column(if wide { code.primary_key() } else { code })
    };
    let child = Table::new("child")
        .column(id_column())
        .column(Column::new("parent_id", LogicalType::Integer))
        .index(Index::named("fk_parent").column("parent_id"))
        .foreign_key(ForeignKey::named("fk_parent", "parent").reference("parent_id", "id"));
    let old = db(vec![parent(false), child.clone()]);
    let new = db(vec![parent(true), child]);

    for caps in presets() {
        let script = assert_round_trip(&old, &new, &caps);
        let stages: Vec<Stage> = script.phases.iter().map(|p| p.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::DropForeignKeys,
                Stage::DropPrimaryKeys,
                Stage::CreatePrimaryKeys,
                Stage::CreateIndexes,
                Stage::CreateForeignKeys,
            ],
            "on {}",
            caps.name
        );
    }
}

#[test]
fn default_changes_follow_type_changes() {
    let old = roundtrip_table(Some(
        Column::new("avalue", LogicalType::SmallInt).default_value("1"),
    ));
    let new = roundtrip_table(Some(
        Column::new("avalue", LogicalType::Varchar)
            .size(10)
            .default_value("one"),
    ));

    for caps in presets() {
        let script = assert_round_trip(&old, &new, &caps);
        let retyped = script
            .phase_of(|s| matches!(s, Step::Change(Change::ColumnTypeChanged { .. })))
            .unwrap();
        let defaulted = script
            .phase_of(|s| matches!(s, Step::Change(Change::ColumnDefaultChanged { .. })))
            .unwrap();
        assert!(retyped < defaulted, "on {}", caps.name);
    }
}

#[test]
fn script_serializes_for_an_executor() {
    let old = roundtrip_table(None);
    let new = roundtrip_table(Some(Column::new("avalue", LogicalType::Integer).auto_increment()));
    let script = plan_ok(&old, &new, &PlatformInfo::generic());

    let json = serde_json::to_value(&script).unwrap();
    assert_eq!(json["phases"][0]["stage"], "add_columns");
    assert_eq!(json["phases"][1]["steps"][0]["Backfill"]["fill"], "Identity");

    let back: AlterationScript = serde_json::from_value(json).unwrap();
    assert_eq!(back, script);
}

#[test]
fn models_load_from_json() {
    let json = r#"{
        "name": "shop",
        "tables": [{
            "name": "orders",
            "columns": [
                {"name": "id", "type": "INTEGER", "primary_key": true, "required": true},
                {"name": "total", "type": "DECIMAL", "size": 10, "scale": 2, "default": "0.00"}
            ],
            "indexes": [],
            "foreign_keys": []
        }]
    }"#;
    let old: Database = serde_json::from_str(json).unwrap();
    let new = db(vec![Table::new("orders")
        .column(id_column())
        .column(Column::new("total", LogicalType::Decimal).precision(10, 2).default_value("0"))]);

    assert!(oxide_alter::compare(&old, &new).unwrap().is_empty());
}
