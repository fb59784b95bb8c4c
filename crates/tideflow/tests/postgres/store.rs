//! Conditional writes of [`PgStore`].

use serde_json::json;
use test_utils::db_test;
use tideflow::store::{PgStore, StateKey, StateStore};
use tideflow::Error;

fn key(id: &str) -> StateKey {
    StateKey::new("task-engine", id)
}

// =============================================================================
// Create and read
// =============================================================================

db_test!(missing_state_reads_as_none, |pool| {
    let store = PgStore::new(pool.clone());

    assert!(store.get_state(&key("t-1")).await?.is_none());
    assert!(store.version(&key("t-1")).await?.is_none());
    Ok(())
});

db_test!(created_state_is_read_back, |pool| {
    let store = PgStore::new(pool.clone());
    let state = json!({"task_id": "t-1", "attempts": [1, 2]});

    store.create_state(&key("t-1"), state.clone()).await?;

    assert_eq!(store.get_state(&key("t-1")).await?, Some(state));
    assert_eq!(store.version(&key("t-1")).await?, Some(1));
    Ok(())
});

db_test!(second_create_is_rejected, |pool| {
    let store = PgStore::new(pool.clone());
    store.create_state(&key("t-1"), json!({"n": 1})).await?;

    let err = store
        .create_state(&key("t-1"), json!({"n": 2}))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StateAlreadyExists { ref id, .. } if id == "t-1"));
    assert_eq!(store.get_state(&key("t-1")).await?, Some(json!({"n": 1})));
    Ok(())
});

db_test!(namespaces_do_not_collide, |pool| {
    let store = PgStore::new(pool.clone());
    store.create_state(&key("shared"), json!("task")).await?;
    store
        .create_state(&StateKey::new("workflow-engine", "shared"), json!("workflow"))
        .await?;

    assert_eq!(store.get_state(&key("shared")).await?, Some(json!("task")));
    Ok(())
});

// =============================================================================
// Conditional update and delete
// =============================================================================

db_test!(update_applies_when_expected_matches, |pool| {
    let store = PgStore::new(pool.clone());
    let first = json!({"status": "RUNNING_OK", "retry": 0});
    store.create_state(&key("t-1"), first.clone()).await?;

    // Key order differs; jsonb equality ignores it.
    let expected = json!({"retry": 0, "status": "RUNNING_OK"});
    let next = json!({"status": "RUNNING_ERROR", "retry": 0});
    store.update_state(&key("t-1"), next.clone(), &expected).await?;

    assert_eq!(store.get_state(&key("t-1")).await?, Some(next));
    assert_eq!(store.version(&key("t-1")).await?, Some(2));
    Ok(())
});

db_test!(stale_update_is_a_conflict, |pool| {
    let store = PgStore::new(pool.clone());
    store.create_state(&key("t-1"), json!({"n": 1})).await?;
    store
        .update_state(&key("t-1"), json!({"n": 2}), &json!({"n": 1}))
        .await?;

    let err = store
        .update_state(&key("t-1"), json!({"n": 3}), &json!({"n": 1}))
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(store.get_state(&key("t-1")).await?, Some(json!({"n": 2})));
    Ok(())
});

db_test!(delete_requires_expected_state, |pool| {
    let store = PgStore::new(pool.clone());
    store.create_state(&key("t-1"), json!({"n": 1})).await?;

    let err = store
        .delete_state(&key("t-1"), &json!({"n": 0}))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    store.delete_state(&key("t-1"), &json!({"n": 1})).await?;
    assert!(store.get_state(&key("t-1")).await?.is_none());
    Ok(())
});

db_test!(deleting_missing_state_is_a_conflict, |pool| {
    let store = PgStore::new(pool.clone());

    let err = store
        .delete_state(&key("gone"), &json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StateConflict { .. }));
    Ok(())
});
