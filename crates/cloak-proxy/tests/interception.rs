//! End-to-end interception tests against an in-memory driver and engine.
//!
//! Run with: cargo test --package cloak-proxy --test interception

mod common;

use cloak_core::FailureMode;
use cloak_crypto::EngineOp;
use cloak_proxy::{ColumnMetadata, Connection, DriverError, SqlValue};
use common::{Harness, seal};
use std::sync::atomic::Ordering;

fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

#[tokio::test]
async fn test_insert_encrypts_protected_column_only() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);

    let mut stmt = h
        .connection
        .prepare("INSERT INTO users (name, email) VALUES (?, ?)")
        .await
        .unwrap();
    stmt.bind(1, text("Alice")).await.unwrap();
    stmt.bind(2, text("alice@example.com")).await.unwrap();
    assert_eq!(stmt.execute_update().await.unwrap(), 1);

    let params = h.db.last_params();
    assert_eq!(params[&1], text("Alice"));
    assert_eq!(params[&2], text(&seal("alice@example.com", "pii")));
    assert_eq!(h.engine.calls(), vec![EngineOp::Encrypt]);
}

#[tokio::test]
async fn test_unmapped_columns_pass_through_without_engine_calls() {
    let h = Harness::new(FailureMode::FailOpen);

    let mut stmt = h
        .connection
        .prepare("UPDATE users SET email = ? WHERE id = ?")
        .await
        .unwrap();
    stmt.bind(1, text("bob@example.com")).await.unwrap();
    stmt.bind(2, SqlValue::Int(7)).await.unwrap();
    stmt.execute_update().await.unwrap();

    let params = h.db.last_params();
    assert_eq!(params[&1], text("bob@example.com"));
    assert_eq!(params[&2], SqlValue::Int(7));
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn test_already_encrypted_parameter_is_not_encrypted_twice() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);
    let sealed = seal("carol@example.com", "pii");

    let mut stmt = h
        .connection
        .prepare("UPDATE users SET email = ? WHERE id = ?")
        .await
        .unwrap();
    stmt.bind(1, text(&sealed)).await.unwrap();
    stmt.bind(2, SqlValue::Int(3)).await.unwrap();
    stmt.execute_update().await.unwrap();

    assert_eq!(h.db.last_params()[&1], text(&sealed));
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn test_value_sealed_for_another_policy_is_encrypted() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);
    let foreign = seal("olga@example.com", "other");

    let mut stmt = h
        .connection
        .prepare("UPDATE users SET email = ? WHERE id = ?")
        .await
        .unwrap();
    stmt.bind(1, text(&foreign)).await.unwrap();
    stmt.bind(2, SqlValue::Int(4)).await.unwrap();
    stmt.execute_update().await.unwrap();

    assert_eq!(h.db.last_params()[&1], text(&seal(&foreign, "pii")));
    assert_eq!(h.engine.calls(), vec![EngineOp::Encrypt]);
}

#[tokio::test]
async fn test_unqualified_insert_matches_datasource_scoped_mapping() {
    let h = Harness::with_identity(FailureMode::FailOpen, "ds1");
    h.protect(&[("ds1:public.users.email", "pii", false)], 1);

    let mut stmt = h
        .connection
        .prepare("INSERT INTO users (email) VALUES (?)")
        .await
        .unwrap();
    stmt.bind(1, text("pat@example.com")).await.unwrap();
    stmt.execute_update().await.unwrap();

    assert_eq!(h.db.last_params()[&1], text(&seal("pat@example.com", "pii")));
    assert_eq!(h.engine.calls(), vec![EngineOp::Encrypt]);
}

#[tokio::test]
async fn test_unqualified_select_decrypts_datasource_scoped_column() {
    let h = Harness::with_identity(FailureMode::FailOpen, "ds1");
    h.protect(&[("ds1:public.users.email", "pii", false)], 1);
    h.db.script_result(
        vec![ColumnMetadata::labelled("email")],
        vec![vec![text(&seal("quinn@example.com", "pii"))]],
    );

    let mut stmt = h.connection.prepare("SELECT email FROM users").await.unwrap();
    let mut rows = stmt.execute_query().await.unwrap();

    assert_eq!(rows.next_row().await.unwrap().unwrap(), vec![text("quinn@example.com")]);
}

#[tokio::test]
async fn test_statement_can_be_driven_from_a_spawned_task() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);
    let mut stmt = h
        .connection
        .prepare("INSERT INTO users (email) VALUES (?)")
        .await
        .unwrap();

    let rows = tokio::spawn(async move {
        stmt.bind(1, text("ruth@example.com")).await?;
        stmt.execute_update().await
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(rows, 1);
    assert_eq!(h.db.last_params()[&1], text(&seal("ruth@example.com", "pii")));
}

#[tokio::test]
async fn test_filter_on_deterministic_policy_is_search_encrypted() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.ssn", "ssn", true), ("users.email", "pii", false)], 1);

    let mut stmt = h
        .connection
        .prepare("SELECT id FROM users WHERE ssn = ? AND email = ?")
        .await
        .unwrap();
    stmt.bind(1, text("123-45-6789")).await.unwrap();
    stmt.bind(2, text("dave@example.com")).await.unwrap();
    stmt.execute_query().await.unwrap();

    let params = h.db.last_params();
    assert_eq!(params[&1], text(&seal("123-45-6789", "ssn")));
    // Randomized ciphertext can never match; the filter stays plaintext.
    assert_eq!(params[&2], text("dave@example.com"));
}

#[tokio::test]
async fn test_oversized_ciphertext_retries_once_with_plaintext() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);
    h.db.limit_text(40);

    let mut stmt = h
        .connection
        .prepare("INSERT INTO users (name, email) VALUES (?, ?)")
        .await
        .unwrap();
    stmt.bind(1, text("Erin")).await.unwrap();
    stmt.bind(2, text("erin@example.com")).await.unwrap();
    assert_eq!(stmt.execute_update().await.unwrap(), 1);

    let executed = h.db.executed();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0].params[&2], text(&seal("erin@example.com", "pii")));
    assert_eq!(executed[1].params[&1], text("Erin"));
    assert_eq!(executed[1].params[&2], text("erin@example.com"));
}

#[tokio::test]
async fn test_ciphertext_is_bound_again_after_plaintext_retry() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);
    h.db.limit_text(40);

    let mut stmt = h
        .connection
        .prepare("INSERT INTO users (name, email) VALUES (?, ?)")
        .await
        .unwrap();
    stmt.bind(1, text("Erin")).await.unwrap();
    stmt.bind(2, text("erin@example.com")).await.unwrap();
    stmt.execute_update().await.unwrap();
    stmt.execute_update().await.unwrap();

    let executed = h.db.executed();
    let sealed = text(&seal("erin@example.com", "pii"));
    assert_eq!(executed.len(), 4);
    assert_eq!(executed[2].params[&2], sealed);
    assert_eq!(executed[3].params[&2], text("erin@example.com"));
}

#[tokio::test]
async fn test_failed_plaintext_retry_surfaces_original_error() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);
    h.db.limit_text(10);

    let mut stmt = h
        .connection
        .prepare("INSERT INTO users (name, email) VALUES (?, ?)")
        .await
        .unwrap();
    stmt.bind(1, text("Frank")).await.unwrap();
    stmt.bind(2, text("frank@example.com")).await.unwrap();
    let err = stmt.execute_update().await.unwrap_err();

    assert!(err.is_value_too_long());
    assert!(err.to_string().contains("execution 1"), "{err}");
    assert_eq!(h.db.executed().len(), 2);
}

#[tokio::test]
async fn test_too_long_without_encrypted_parameters_is_not_retried() {
    let h = Harness::new(FailureMode::FailOpen);
    h.db.limit_text(3);

    let mut stmt = h
        .connection
        .prepare("INSERT INTO users (name) VALUES (?)")
        .await
        .unwrap();
    stmt.bind(1, text("Grace")).await.unwrap();

    assert!(stmt.execute_update().await.unwrap_err().is_value_too_long());
    assert_eq!(h.db.executed().len(), 1);
}

#[tokio::test]
async fn test_clear_parameters_forgets_tracked_plaintext() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);

    let mut stmt = h
        .connection
        .prepare("INSERT INTO users (name, email) VALUES (?, ?)")
        .await
        .unwrap();
    stmt.bind(2, text("heidi@example.com")).await.unwrap();
    stmt.clear_parameters();
    stmt.bind(1, text("a name that is far too long")).await.unwrap();
    h.db.limit_text(10);

    assert!(stmt.execute_update().await.unwrap_err().is_value_too_long());
    assert_eq!(h.db.executed().len(), 1);
    assert!(!h.db.last_params().contains_key(&2));
}

#[tokio::test]
async fn test_engine_failure_fails_open_by_default() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);
    h.engine.down.store(true, Ordering::SeqCst);

    let mut stmt = h
        .connection
        .prepare("INSERT INTO users (email) VALUES (?)")
        .await
        .unwrap();
    stmt.bind(1, text("ivan@example.com")).await.unwrap();
    stmt.execute_update().await.unwrap();

    assert_eq!(h.db.last_params()[&1], text("ivan@example.com"));
}

#[tokio::test]
async fn test_engine_failure_fails_closed_when_configured() {
    let h = Harness::new(FailureMode::FailClosed);
    h.protect(&[("users.email", "pii", false)], 1);
    h.engine.down.store(true, Ordering::SeqCst);

    let mut stmt = h
        .connection
        .prepare("INSERT INTO users (email) VALUES (?)")
        .await
        .unwrap();
    let err = stmt.bind(1, text("judy@example.com")).await.unwrap_err();

    assert!(matches!(err, DriverError::Encryption(_)));
}

#[tokio::test]
async fn test_select_decrypts_aliased_column() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);
    h.db.script_result(
        vec![
            ColumnMetadata::labelled("id"),
            ColumnMetadata::labelled("contact"),
        ],
        vec![vec![SqlValue::Int(1), text(&seal("kim@example.com", "pii"))]],
    );

    let mut stmt = h
        .connection
        .prepare("SELECT u.id, u.email AS contact FROM users u WHERE u.id = ?")
        .await
        .unwrap();
    stmt.bind(1, SqlValue::Int(1)).await.unwrap();
    let mut rows = stmt.execute_query().await.unwrap();

    let row = rows.next_row().await.unwrap().unwrap();
    assert_eq!(row, vec![SqlValue::Int(1), text("kim@example.com")]);
    assert!(rows.next_row().await.unwrap().is_none());
}

#[tokio::test]
async fn test_plaintext_and_not_encrypted_values_come_back_unchanged() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);
    h.engine.never_encrypted.store(true, Ordering::SeqCst);
    let looks_sealed = seal("legacy", "pii");
    h.db.script_result(
        vec![ColumnMetadata::labelled("email")],
        vec![vec![text("plain@example.com")], vec![text(&looks_sealed)]],
    );

    let mut stmt = h.connection.prepare("SELECT email FROM users").await.unwrap();
    let mut rows = stmt.execute_query().await.unwrap();

    assert_eq!(
        rows.next_row().await.unwrap().unwrap(),
        vec![text("plain@example.com")]
    );
    assert_eq!(rows.next_row().await.unwrap().unwrap(), vec![text(&looks_sealed)]);
    assert_eq!(h.engine.calls(), vec![EngineOp::Decrypt]);
}

#[tokio::test]
async fn test_metadata_fallback_is_recomputed_after_version_change() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);
    let first = seal("lee@example.com", "pii");
    let second = seal("max@example.com", "pii");
    let email = ColumnMetadata {
        label: "email".into(),
        name: Some("email".into()),
        table: Some("users".into()),
        schema: None,
    };
    h.db.script_result(vec![email], vec![vec![text(&first)], vec![text(&second)]]);

    let mut stmt = h.connection.prepare("{call list_users()}").await.unwrap();
    let mut rows = stmt.execute_query().await.unwrap();
    assert_eq!(rows.next_row().await.unwrap().unwrap(), vec![text("lee@example.com")]);

    // The column is no longer protected under version 2.
    h.policies.refresh(vec![], vec![], Some(2)).unwrap();
    assert_eq!(rows.next_row().await.unwrap().unwrap(), vec![text(&second)]);
}

#[tokio::test]
async fn test_metadata_without_table_is_left_alone() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false)], 1);
    let sealed = seal("nina@example.com", "pii");
    h.db.script_result(vec![ColumnMetadata::labelled("email")], vec![vec![text(&sealed)]]);

    let mut stmt = h.connection.prepare("{call list_users()}").await.unwrap();
    let mut rows = stmt.execute_query().await.unwrap();

    assert_eq!(rows.next_row().await.unwrap().unwrap(), vec![text(&sealed)]);
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn test_fetch_all_decrypts_each_column_in_one_batch() {
    let h = Harness::new(FailureMode::FailOpen);
    h.protect(&[("users.email", "pii", false), ("users.phone", "phone", false)], 1);
    h.db.script_result(
        vec![
            ColumnMetadata::labelled("email"),
            ColumnMetadata::labelled("phone"),
            ColumnMetadata::labelled("name"),
        ],
        vec![
            vec![text(&seal("a@example.com", "pii")), text(&seal("555-0100", "phone")), text("A")],
            vec![text(&seal("b@example.com", "pii")), SqlValue::Null, text("B")],
            vec![text("c@example.com"), text(&seal("555-0102", "phone")), text("C")],
        ],
    );

    let mut stmt = h
        .connection
        .prepare("SELECT email, phone, name FROM users")
        .await
        .unwrap();
    let rows = stmt.execute_query().await.unwrap().fetch_all().await.unwrap();

    assert_eq!(
        rows,
        vec![
            vec![text("a@example.com"), text("555-0100"), text("A")],
            vec![text("b@example.com"), SqlValue::Null, text("B")],
            vec![text("c@example.com"), text("555-0102"), text("C")],
        ]
    );
    assert_eq!(
        h.engine.calls(),
        vec![EngineOp::DecryptBatch, EngineOp::DecryptBatch]
    );
}
