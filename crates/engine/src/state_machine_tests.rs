// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use martingalian_core::test_support::{indexed_step, pending_step, with_state};
use martingalian_core::{StepBuilder, WorkflowUuid};
use martingalian_store::MemoryStepRepository;

#[yare::parameterized(
    pending_to_dispatched = { StepState::Pending, StepState::Dispatched, true },
    pending_to_skipped = { StepState::Pending, StepState::Skipped, true },
    pending_to_not_runnable = { StepState::Pending, StepState::NotRunnable, true },
    not_runnable_to_pending = { StepState::NotRunnable, StepState::Pending, true },
    dispatched_to_running = { StepState::Dispatched, StepState::Running, true },
    running_to_completed = { StepState::Running, StepState::Completed, true },
    running_to_pending = { StepState::Running, StepState::Pending, true },
    running_to_running = { StepState::Running, StepState::Running, true },
    completed_is_terminal = { StepState::Completed, StepState::Pending, false },
    skipped_is_terminal = { StepState::Skipped, StepState::Dispatched, false },
    pending_to_running_is_illegal = { StepState::Pending, StepState::Running, false },
    dispatched_to_pending_is_illegal = { StepState::Dispatched, StepState::Pending, false },
)]
fn allowed_shape_matches_the_diagram(from: StepState, to: StepState, expected: bool) {
    assert_eq!(allowed_shape(from, to), expected, "{from} -> {to}");
}

fn workflow_block() -> (WorkflowUuid, martingalian_core::BlockUuid) {
    (WorkflowUuid::new(), martingalian_core::BlockUuid::new())
}

#[tokio::test]
async fn orphan_with_null_index_may_always_dispatch() {
    let repo = MemoryStepRepository::new();
    let (wf, block) = workflow_block();
    let step = repo.insert_step(pending_step(wf, block, "Orphan"));
    assert!(can_dispatch(&repo, &step).await.unwrap());
}

#[tokio::test]
async fn orphan_with_index_waits_for_previous_index() {
    let repo = MemoryStepRepository::new();
    let (wf, block) = workflow_block();
    let s1 = repo.insert_step(indexed_step(wf, block, "s1", 1));
    let s2 = repo.insert_step(indexed_step(wf, block, "s2", 2));

    assert!(
        !can_dispatch(&repo, &s2).await.unwrap(),
        "s2 must wait while s1 is still Pending"
    );

    let s1 = with_state(s1, StepState::Completed);
    repo.insert_step(s1);
    assert!(can_dispatch(&repo, &s2).await.unwrap());
}

#[tokio::test]
async fn child_step_requires_parent_running_or_completed() {
    let repo = MemoryStepRepository::new();
    let (wf, parent_block) = workflow_block();
    let child_block = martingalian_core::BlockUuid::new();

    let parent = StepBuilder::new(wf, parent_block, "Spawner")
        .child_block_uuid(child_block)
        .build();
    let parent = repo.insert_step(parent);
    let child = repo.insert_step(pending_step(wf, child_block, "Child"));

    assert!(
        !can_dispatch(&repo, &child).await.unwrap(),
        "parent is still Pending"
    );

    let running_parent = with_state(parent, StepState::Running);
    repo.insert_step(running_parent);
    assert!(can_dispatch(&repo, &child).await.unwrap());
}

#[tokio::test]
async fn resolve_exception_at_index_one_is_unconditional() {
    let repo = MemoryStepRepository::new();
    let (wf, block) = workflow_block();
    let resolver = StepBuilder::new(wf, block, "Recover").index(1).resolve_exception().build();
    let resolver = repo.insert_step(resolver);
    assert!(can_dispatch(&repo, &resolver).await.unwrap());
}

#[tokio::test]
async fn resolve_exception_chains_only_through_its_own_type() {
    let repo = MemoryStepRepository::new();
    let (wf, block) = workflow_block();

    // A `default` sibling at index 1 is irrelevant to the resolver's chain.
    let default_sibling = with_state(indexed_step(wf, block, "Default1", 1), StepState::Pending);
    repo.insert_step(default_sibling);

    let r1 = StepBuilder::new(wf, block, "R1").index(1).resolve_exception().build();
    let r1 = repo.insert_step(r1);
    let r2 = StepBuilder::new(wf, block, "R2").index(2).resolve_exception().build();
    let r2 = repo.insert_step(r2);

    assert!(
        !can_dispatch(&repo, &r2).await.unwrap(),
        "r2 must wait for r1, not the unrelated default step"
    );

    let r1 = with_state(r1, StepState::Completed);
    repo.insert_step(r1);
    assert!(can_dispatch(&repo, &r2).await.unwrap());
}

#[tokio::test]
async fn can_complete_requires_child_block_fully_terminal() {
    let repo = MemoryStepRepository::new();
    let (wf, parent_block) = workflow_block();
    let child_block = martingalian_core::BlockUuid::new();

    let parent = StepBuilder::new(wf, parent_block, "Spawner")
        .child_block_uuid(child_block)
        .build();
    let parent = with_state(parent, StepState::Running);
    let parent = repo.insert_step(parent);

    let c1 = with_state(pending_step(wf, child_block, "c1"), StepState::Running);
    repo.insert_step(c1.clone());

    assert!(!can_complete(&repo, &parent).await.unwrap(), "c1 is not terminal yet");

    let c1 = with_state(c1, StepState::Completed);
    repo.insert_step(c1);
    assert!(can_complete(&repo, &parent).await.unwrap());
}

#[tokio::test]
async fn can_complete_is_vacuously_true_for_non_parents() {
    let repo = MemoryStepRepository::new();
    let (wf, block) = workflow_block();
    let orphan = with_state(pending_step(wf, block, "Solo"), StepState::Running);
    let orphan = repo.insert_step(orphan);
    assert!(can_complete(&repo, &orphan).await.unwrap());
}
