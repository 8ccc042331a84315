//! 미팅 준비 명령 통합 테스트

mod common;

use common::{context, test_config, FakeOllama};
use innerboard_lib::commands::{prep, vault};

#[tokio::test]
async fn test_prep_folds_stored_analyses() {
    let dir = tempfile::tempdir().unwrap();
    let model = FakeOllama::new();
    let ctx = context(test_config(&dir), model.clone());
    vault::init(&ctx, None).unwrap();

    let first = vault::add(&ctx, "blocked on auth tests").await.unwrap().record_id;
    let second = vault::add(&ctx, "paired on deploy scripts").await.unwrap().record_id;
    assert_eq!(model.calls(), 4);

    let result = prep::prep(&ctx, None).await.unwrap();
    assert_eq!(result.record_ids, vec![second, first]);
    assert_eq!(result.outcome.model_calls, 1);
    assert_eq!(result.outcome.repairs, 0);
    assert_eq!(result.outcome.prompt_version, "prep-v1");

    let notes = &result.outcome.prep;
    assert_eq!(notes.team_update.len(), 2);
    assert_eq!(notes.manager_update[1], "auth test flakiness is the main risk this week");
    assert_eq!(notes.recommendations[0], "book a pairing slot with the auth owner");
    assert_eq!(model.calls(), 5);
}

#[tokio::test]
async fn test_prep_respects_entry_limit() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(test_config(&dir), FakeOllama::new());
    vault::init(&ctx, None).unwrap();

    vault::add(&ctx, "week one notes").await.unwrap();
    let newest = vault::add(&ctx, "week two notes").await.unwrap().record_id;

    let result = prep::prep(&ctx, Some(1)).await.unwrap();
    assert_eq!(result.record_ids, vec![newest]);
}

#[tokio::test]
async fn test_prep_on_empty_vault_is_input_validation() {
    let dir = tempfile::tempdir().unwrap();
    let model = FakeOllama::new();
    let ctx = context(test_config(&dir), model.clone());
    vault::init(&ctx, None).unwrap();

    let err = prep::prep(&ctx, None).await.unwrap_err();
    assert_eq!(err.code, "INPUT_VALIDATION");
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_prep_requires_open_vault() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(test_config(&dir), FakeOllama::new());
    vault::init(&ctx, None).unwrap();
    vault::close(&ctx).unwrap();

    assert_eq!(prep::prep(&ctx, None).await.unwrap_err().code, "VAULT_CLOSED");
}
