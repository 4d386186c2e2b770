use rollwave::{
    AssetTarget, AuditEntry, Execution, ExecutionPhase, ExecutionPlan, ExecutionRecord,
    ExecutionStatus, ExecutionStore, SqliteExecutionStore,
};

fn sample_execution() -> Execution {
    let plan = ExecutionPlan::new("task-1", "plan-1")
        .with_environment("production")
        .with_user("ops@example.com")
        .with_phase(
            ExecutionPhase::new("Canary")
                .with_asset(AssetTarget::new("i-001", "web-01"))
                .with_asset(AssetTarget::new("i-002", "web-02")),
        )
        .with_phase(ExecutionPhase::new("Wave1").with_asset(AssetTarget::new("i-003", "web-03")));
    Execution::from_plan(&plan, "ops@example.com")
}

fn store_in(dir: &tempfile::TempDir) -> SqliteExecutionStore {
    SqliteExecutionStore::new(dir.path().join("executions.db")).unwrap()
}

#[tokio::test]
async fn test_upsert_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let mut execution = sample_execution();
    execution
        .transition(ExecutionStatus::Running, "start")
        .unwrap();
    execution.started_at = Some(chrono::Utc::now());
    execution.phases[0].start();
    execution.phases[0].complete();

    let record = ExecutionRecord::from_execution(
        &execution,
        vec![AuditEntry::new("execution.created", "submitted")],
    );
    store.upsert(record).await.unwrap();

    let loaded = store.load(&execution.id).await.unwrap().unwrap();
    assert_eq!(loaded.environment, "production");
    assert_eq!(loaded.initiated_by, "ops@example.com");
    assert_eq!(loaded.completed_phases, vec!["Canary"]);
    assert_eq!(loaded.remaining_phases, vec!["Wave1"]);
    assert_eq!(loaded.percent_complete, 50);
    assert_eq!(loaded.state, "running");
    assert_eq!(loaded.audit_log.len(), 1);
}

#[tokio::test]
async fn test_audit_log_is_append_only_across_upserts() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let execution = sample_execution();

    store
        .upsert(ExecutionRecord::from_execution(
            &execution,
            vec![AuditEntry::new("execution.created", "submitted")],
        ))
        .await
        .unwrap();
    store
        .upsert(ExecutionRecord::from_execution(
            &execution,
            vec![
                AuditEntry::new("phase.started", "Canary"),
                AuditEntry::new("phase.completed", "Canary"),
            ],
        ))
        .await
        .unwrap();
    // A write with no new entries must not erase the stored array.
    store
        .upsert(ExecutionRecord::from_execution(&execution, Vec::new()))
        .await
        .unwrap();

    let loaded = store.load(&execution.id).await.unwrap().unwrap();
    let events: Vec<&str> = loaded.audit_log.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(
        events,
        vec!["execution.created", "phase.started", "phase.completed"]
    );
}

#[tokio::test]
async fn test_reload_rebuilds_phases_without_asset_detail() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let mut execution = sample_execution();
    execution
        .transition(ExecutionStatus::Running, "start")
        .unwrap();
    execution.started_at = Some(chrono::Utc::now());
    execution.phases[0].start();
    execution.phases[0].assets[0].start();
    execution.phases[0].assets[0].complete("done");
    execution.phases[0].complete();
    execution.phases[1].start();
    execution.phases[1].complete();
    execution
        .transition(ExecutionStatus::Completed, "done")
        .unwrap();
    execution.completed_at = Some(chrono::Utc::now());

    store
        .upsert(ExecutionRecord::from_execution(&execution, Vec::new()))
        .await
        .unwrap();

    let reloaded = store
        .load(&execution.id)
        .await
        .unwrap()
        .unwrap()
        .to_execution()
        .unwrap();

    assert_eq!(reloaded.status, ExecutionStatus::Completed);
    assert_eq!(
        reloaded.completed_phase_names(),
        execution.completed_phase_names()
    );
    assert_eq!(reloaded.remaining_phase_names(), Vec::<String>::new());
    assert!(reloaded.phases.iter().all(|p| p.assets.is_empty()));
}

#[tokio::test]
async fn test_missing_execution_loads_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    assert!(store.load("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_ids_covers_all_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let first = sample_execution();
    let second = sample_execution();
    store
        .upsert(ExecutionRecord::from_execution(&first, Vec::new()))
        .await
        .unwrap();
    store
        .upsert(ExecutionRecord::from_execution(&second, Vec::new()))
        .await
        .unwrap();

    let mut ids = store.list_ids().await.unwrap();
    ids.sort();
    let mut expected = vec![first.id.clone(), second.id.clone()];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_metrics_survive_storage() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let mut execution = sample_execution();
    execution
        .transition(ExecutionStatus::Running, "start")
        .unwrap();
    execution.started_at = Some(chrono::Utc::now());
    execution.phases[0].assets[0].start();
    execution.phases[0].assets[0].complete("ok");
    execution.phases[0].assets[1].start();
    execution.phases[0].assets[1].fail("unreachable");

    store
        .upsert(ExecutionRecord::from_execution(&execution, Vec::new()))
        .await
        .unwrap();

    let loaded = store.load(&execution.id).await.unwrap().unwrap();
    assert_eq!(loaded.metrics.assets_total, 3);
    assert_eq!(loaded.metrics.assets_changed, 1);
    assert_eq!(loaded.metrics.assets_failed, 1);
    assert!((loaded.metrics.observed_error_rate - 1.0 / 3.0).abs() < 1e-9);
}
