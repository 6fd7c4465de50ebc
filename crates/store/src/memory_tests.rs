// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use martingalian_core::test_support::{indexed_step, pending_step, with_state};
use martingalian_core::{BlockUuid, StepState, WorkflowUuid};

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

#[tokio::test]
async fn acquire_group_lock_denies_second_concurrent_caller() {
    let repo = MemoryStepRepository::new();
    let first = repo.acquire_group_lock(Some("btc-usdt"), now()).await.unwrap();
    assert!(first.is_some());
    let second = repo.acquire_group_lock(Some("btc-usdt"), now()).await.unwrap();
    assert!(second.is_none(), "second acquire must be denied while held");
}

#[tokio::test]
async fn release_without_matching_acquire_is_a_no_op() {
    let repo = MemoryStepRepository::new();
    // release before any acquire must not panic or corrupt state.
    repo.release_group_lock(Some("g"), TickId::new(), TickProgress::LockDenied, now())
        .await
        .unwrap();

    let acquired = repo.acquire_group_lock(Some("g"), now()).await.unwrap().unwrap();
    // Releasing with the wrong tick id must also be a no-op.
    repo.release_group_lock(Some("g"), TickId::new(), TickProgress::LockDenied, now())
        .await
        .unwrap();
    assert!(
        repo.acquire_group_lock(Some("g"), now()).await.unwrap().is_none(),
        "lock must still be held after a mismatched release"
    );

    repo.release_group_lock(Some("g"), acquired, TickProgress::SelectionAndHandoff, now())
        .await
        .unwrap();
    assert!(repo.acquire_group_lock(Some("g"), now()).await.unwrap().is_some());
}

#[tokio::test]
async fn select_dispatch_candidates_only_returns_due_pending_steps() {
    let repo = MemoryStepRepository::new();
    let workflow = WorkflowUuid::new();
    let block = BlockUuid::new();

    let mut due = pending_step(workflow, block, "Ready");
    due.group = Some("g".to_string());
    repo.insert_step(due.clone());

    let mut not_due = pending_step(workflow, block, "NotYet");
    not_due.group = Some("g".to_string());
    not_due.dispatch_after = Some(now() + chrono::Duration::hours(1));
    repo.insert_step(not_due);

    let mut wrong_group = pending_step(workflow, block, "Elsewhere");
    wrong_group.group = Some("other".to_string());
    repo.insert_step(wrong_group);

    let mut already_dispatched = pending_step(workflow, block, "AlreadyGone");
    already_dispatched.group = Some("g".to_string());
    let already_dispatched = with_state(already_dispatched, StepState::Dispatched);
    repo.insert_step(already_dispatched);

    let candidates = repo.select_dispatch_candidates(Some("g"), now()).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].class, "Ready");
}

#[tokio::test]
async fn update_step_applies_state_and_clears_timestamps() {
    let repo = MemoryStepRepository::new();
    let workflow = WorkflowUuid::new();
    let block = BlockUuid::new();
    let mut step = pending_step(workflow, block, "Job");
    step.started_at = Some(now());
    step.completed_at = Some(now());
    let step = repo.insert_step(step);

    let patch = StepPatch::to_state(StepState::Pending)
        .clear_started_at()
        .clear_completed_at()
        .retries(1);
    let updated = repo.update_step(step.id, StepState::Pending, patch).await.unwrap();
    assert_eq!(updated.state, StepState::Pending);
    assert!(updated.started_at.is_none());
    assert!(updated.completed_at.is_none());
    assert_eq!(updated.retries, 1);
}

#[tokio::test]
async fn update_step_rejects_mismatched_expected_state() {
    let repo = MemoryStepRepository::new();
    let workflow = WorkflowUuid::new();
    let block = BlockUuid::new();
    let step = repo.insert_step(with_state(pending_step(workflow, block, "Job"), StepState::Dispatched));

    let patch = StepPatch::to_state(StepState::Running);
    let err = repo.update_step(step.id, StepState::Pending, patch).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(id) if id == step.id));

    // The row is untouched: it is still Dispatched, not Running.
    let unchanged = repo.get_step(step.id).await.unwrap().unwrap();
    assert_eq!(unchanged.state, StepState::Dispatched);
}

#[tokio::test]
async fn cancellable_after_index_excludes_terminal_and_lower_indices() {
    let repo = MemoryStepRepository::new();
    let workflow = WorkflowUuid::new();
    let block = BlockUuid::new();

    let s1 = with_state(indexed_step(workflow, block, "s1", 1), StepState::Failed);
    repo.insert_step(s1);
    let s2 = indexed_step(workflow, block, "s2", 2);
    repo.insert_step(s2);
    let s3_already_cancelled =
        with_state(indexed_step(workflow, block, "s3", 3), StepState::Cancelled);
    repo.insert_step(s3_already_cancelled);
    let earlier = indexed_step(workflow, block, "s0", 0);
    repo.insert_step(earlier);

    let cancellable = repo.cancellable_after_index(block, 1).await.unwrap();
    assert_eq!(cancellable.len(), 1);
    assert_eq!(cancellable[0].class, "s2");
}

#[tokio::test]
async fn blocks_with_promotable_resolve_exception_requires_both_conditions() {
    let repo = MemoryStepRepository::new();
    let workflow = WorkflowUuid::new();
    let block = BlockUuid::new();

    let resolver = martingalian_core::StepBuilder::new(workflow, block, "Recover")
        .resolve_exception()
        .build();
    repo.insert_step(resolver);

    // No failed peer yet: block must not qualify.
    assert!(repo
        .blocks_with_promotable_resolve_exception(None)
        .await
        .unwrap()
        .is_empty());

    let failed = with_state(pending_step(workflow, block, "Worker"), StepState::Failed);
    repo.insert_step(failed);

    let blocks = repo.blocks_with_promotable_resolve_exception(None).await.unwrap();
    assert_eq!(blocks, vec![block]);
}

#[tokio::test]
async fn child_blocks_of_collects_only_direct_children() {
    let repo = MemoryStepRepository::new();
    let workflow = WorkflowUuid::new();
    let parent_block = BlockUuid::new();
    let child_block = BlockUuid::new();

    let parent = martingalian_core::StepBuilder::new(workflow, parent_block, "Spawner")
        .child_block_uuid(child_block)
        .build();
    repo.insert_step(parent);
    repo.insert_step(pending_step(workflow, parent_block, "Sibling"));

    let children = repo.child_blocks_of(parent_block).await.unwrap();
    assert_eq!(children, vec![child_block]);

    let found_parent = repo.parent_of_block(child_block).await.unwrap().unwrap();
    assert_eq!(found_parent.class, "Spawner");
}
