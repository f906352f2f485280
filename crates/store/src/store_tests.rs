// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tempfile::tempdir;
use vea_core::test_support::{runtime_state, AppRecordBuilder};
use vea_core::{AppId, AppKind, AppState, DesiredState};

use super::*;

fn open(dir: &std::path::Path) -> Store {
    Store::open(StoreConfig::under(dir)).unwrap()
}

#[test]
fn upsert_get_roundtrip() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let record = AppRecordBuilder::new("cam").build();

    store.upsert_application(record.clone()).unwrap();
    assert_eq!(store.get_application(&record.app_id), Some(record));
}

#[test]
fn state_survives_reopen() {
    let dir = tempdir().unwrap();
    let record = AppRecordBuilder::new("cam").desired(DesiredState::Running).build();
    let state = runtime_state(&record, AppState::Running);

    {
        let store = open(dir.path());
        store.upsert_application(record.clone()).unwrap();
        store.upsert_runtime_state(state.clone()).unwrap();
    }

    // No checkpoint happened; everything comes back from journal replay.
    let store = open(dir.path());
    assert_eq!(store.get_application(&record.app_id), Some(record.clone()));
    let restored = store.get_runtime_state(&record.app_id).unwrap();
    assert_eq!(restored.execution_id, state.execution_id);
    assert_eq!(restored.current_state, AppState::Running);
}

#[test]
fn checkpoint_then_reopen_uses_snapshot() {
    let dir = tempdir().unwrap();
    let record = AppRecordBuilder::new("cam").build();

    {
        let store = open(dir.path());
        store.upsert_application(record.clone()).unwrap();
        store.checkpoint().unwrap();
        // Post-checkpoint mutation lands in the fresh journal.
        store.upsert_application(AppRecordBuilder::new("radar").build()).unwrap();
    }

    let store = open(dir.path());
    assert!(store.get_application(&record.app_id).is_some());
    assert!(store.get_application(&AppId::from_canonical("VEA-radar")).is_some());
}

#[test]
fn replaced_snapshots_age_into_numbered_generations() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::under(dir.path());
    let store = Store::open(config.clone()).unwrap();

    store.upsert_application(AppRecordBuilder::new("one").build()).unwrap();
    store.checkpoint().unwrap();
    store.upsert_application(AppRecordBuilder::new("two").build()).unwrap();
    store.checkpoint().unwrap();

    // The first checkpoint survived the second as generation 1.
    let gen1 = {
        let mut name = config.snapshot_path.clone().into_os_string();
        name.push(".1");
        std::path::PathBuf::from(name)
    };
    assert!(config.snapshot_path.exists());
    assert!(gen1.exists());
}

#[test]
fn delete_application_cascades() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let record = AppRecordBuilder::new("cam").build();
    let state = runtime_state(&record, AppState::Running);

    store.upsert_application(record.clone()).unwrap();
    store.upsert_runtime_state(state).unwrap();
    store
        .append_log(&record.app_id, "exec-1", LogStream::Out, "about to go")
        .unwrap();

    store.delete_application(&record.app_id).unwrap();
    assert!(store.get_application(&record.app_id).is_none());
    assert!(store.get_runtime_state(&record.app_id).is_none());
    assert!(store.tail_logs(&record.app_id, 10).is_empty());
}

#[test]
fn list_filters_by_desired_state_and_kind() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store
        .upsert_application(AppRecordBuilder::new("a").desired(DesiredState::Running).build())
        .unwrap();
    store
        .upsert_application(
            AppRecordBuilder::new("b").kind(AppKind::Container).artifact("img:1").build(),
        )
        .unwrap();
    store.upsert_application(AppRecordBuilder::new("c").build()).unwrap();

    assert_eq!(store.list_applications(AppFilter::default()).len(), 3);
    let running =
        store.list_applications(AppFilter { desired: Some(DesiredState::Running), kind: None });
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].app_id, "VEA-a");
    let containers =
        store.list_applications(AppFilter { desired: None, kind: Some(AppKind::Container) });
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].app_id, "VEA-b");
}

#[test]
fn list_is_sorted_by_app_id() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    for id in ["zeta", "alpha", "mid"] {
        store.upsert_application(AppRecordBuilder::new(id).build()).unwrap();
    }
    let ids: Vec<String> = store
        .list_applications(AppFilter::default())
        .iter()
        .map(|r| r.app_id.as_str().to_string())
        .collect();
    assert_eq!(ids, vec!["VEA-alpha", "VEA-mid", "VEA-zeta"]);
}

#[test]
fn runtime_state_replacement_is_atomic_per_app() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let record = AppRecordBuilder::new("cam").build();
    store.upsert_application(record.clone()).unwrap();

    let first = runtime_state(&record, AppState::Running);
    let second = runtime_state(&record, AppState::Running);
    store.upsert_runtime_state(first.clone()).unwrap();
    store.upsert_runtime_state(second.clone()).unwrap();

    let current = store.get_runtime_state(&record.app_id).unwrap();
    assert_eq!(current.execution_id, second.execution_id);
}

#[test]
fn corrupt_journal_fails_open() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::under(dir.path());
    {
        let store = Store::open(config.clone()).unwrap();
        store.upsert_application(AppRecordBuilder::new("cam").build()).unwrap();
    }
    // Scribble over the journal: a plausible length prefix with junk.
    let mut bytes = std::fs::read(&config.journal_path).unwrap();
    let mid = bytes.len() / 2;
    for b in &mut bytes[mid..] {
        *b = 0xA5;
    }
    std::fs::write(&config.journal_path, &bytes).unwrap();

    assert!(matches!(Store::open(config), Err(StoreError::Corrupt(_))));
}
