// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Property-based invariants over small generated block trees, run against
//! [`MemoryStepRepository`]. Each property below mirrors one of the
//! documented invariants; the `proptest!` macro shrinks any counterexample
//! down to a minimal failing case.

use crate::cascade::CascadeEngine;
use crate::retry::{BackoffStrategy, RetryPolicy};
use crate::state_machine::{can_complete, can_dispatch};
use crate::transition::TransitionExecutor;
use chrono::{DateTime, Utc};
use martingalian_core::test_support::strategies::{arb_concluded_state, arb_failed_state, arb_step_state};
use martingalian_core::test_support::{indexed_step, with_state};
use martingalian_core::{BlockUuid, StepId, StepState, WorkflowUuid};
use martingalian_store::{MemoryStepRepository, StepPatch, StepRepository};
use proptest::prelude::*;

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// P1 (Ordering): a `default` step at index 2 may dispatch iff every
    /// `default` step at index 1 in the same block is concluded, whatever
    /// unrelated state the rest of the generated tree is in.
    #[test]
    fn p1_ordering_gates_on_previous_index(predecessor_state in arb_step_state()) {
        let rt = runtime();
        rt.block_on(async {
            let repo = MemoryStepRepository::new();
            let workflow = WorkflowUuid::new();
            let block = BlockUuid::new();
            let predecessor = repo.insert_step(with_state(indexed_step(workflow, block, "First", 1), predecessor_state));
            let successor = repo.insert_step(indexed_step(workflow, block, "Second", 2));

            let allowed = can_dispatch(&repo, &successor).await.unwrap();
            prop_assert_eq!(allowed, predecessor.state.is_concluded());
            Ok(())
        })?;
    }

    /// P2 (Parent completion): a parent's `Running -> Completed` guard
    /// permits the move iff every step in its child block is terminal.
    #[test]
    fn p2_parent_completes_only_when_children_are_terminal(child_state in arb_step_state()) {
        let rt = runtime();
        rt.block_on(async {
            let repo = MemoryStepRepository::new();
            let workflow = WorkflowUuid::new();
            let parent_block = BlockUuid::new();
            let child_block = BlockUuid::new();

            let parent = repo.insert_step(
                martingalian_core::StepBuilder::new(workflow, parent_block, "Parent")
                    .child_block_uuid(child_block)
                    .build(),
            );
            let child = repo.insert_step(with_state(indexed_step(workflow, child_block, "Child", 1), child_state));

            let allowed = can_complete(&repo, &parent).await.unwrap();
            prop_assert_eq!(allowed, child.state.is_terminal());
            Ok(())
        })?;
    }

    /// P3 (Skip closure): running the SkipDescendants pass on a Skipped
    /// parent drives every direct, still-active child to Skipped in one
    /// sweep (and a second sweep finds nothing left to do — see R1).
    /// Only {Pending, Dispatched, Running} are legal predecessors of
    /// Skipped in the transition shape table, so the generator is scoped
    /// to that bucket rather than all of `arb_step_state`.
    #[test]
    fn p3_skip_closure_covers_every_child(
        children in proptest::collection::vec(
            prop_oneof![Just(StepState::Pending), Just(StepState::Dispatched), Just(StepState::Running)],
            1..5,
        ),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let repo = MemoryStepRepository::new();
            let workflow = WorkflowUuid::new();
            let parent_block = BlockUuid::new();
            let child_block = BlockUuid::new();

            repo.insert_step(with_state(
                martingalian_core::StepBuilder::new(workflow, parent_block, "Parent")
                    .child_block_uuid(child_block)
                    .build(),
                StepState::Skipped,
            ));
            let mut child_ids = Vec::new();
            for (i, state) in children.iter().enumerate() {
                let step = repo.insert_step(with_state(
                    indexed_step(workflow, child_block, "Child", i as i32 + 1),
                    *state,
                ));
                child_ids.push(step.id);
            }

            let cascade = CascadeEngine::new(&repo);
            cascade.run_passes(None, now()).await.unwrap();

            for id in child_ids {
                let step = repo.get_step(id).await.unwrap().unwrap();
                prop_assert_eq!(step.state, StepState::Skipped);
            }
            Ok(())
        })?;
    }

    /// P4 (Cascade failure): once a `default` step at a given index fails,
    /// every higher-indexed `default` step in the block is eventually
    /// Cancelled by repeated cascade sweeps.
    #[test]
    fn p4_failure_cancels_higher_indices(failed_state in arb_failed_state(), tail_len in 1usize..4) {
        let rt = runtime();
        rt.block_on(async {
            let repo = MemoryStepRepository::new();
            let workflow = WorkflowUuid::new();
            let block = BlockUuid::new();

            repo.insert_step(with_state(indexed_step(workflow, block, "Failing", 1), failed_state));
            let mut tail_ids = Vec::new();
            for i in 0..tail_len {
                let step = repo.insert_step(indexed_step(workflow, block, "Tail", i as i32 + 2));
                tail_ids.push(step.id);
            }

            let cascade = CascadeEngine::new(&repo);
            // Each pass short-circuits after the first mutation, so drive it
            // to a fixed point the way `DispatcherTick` does across ticks.
            for _ in 0..(tail_ids.len() + 1) {
                cascade.run_passes(None, now()).await.unwrap();
            }

            for id in tail_ids {
                let step = repo.get_step(id).await.unwrap().unwrap();
                prop_assert_eq!(step.state, StepState::Cancelled);
            }
            Ok(())
        })?;
    }

    /// P5 (Resolve-exception activation): a `resolve-exception` step is
    /// promoted to Pending iff some ordinary sibling in its block is
    /// currently in a failed state.
    #[test]
    fn p5_resolve_exception_activates_only_on_sibling_failure(sibling_state in arb_step_state()) {
        let rt = runtime();
        rt.block_on(async {
            let repo = MemoryStepRepository::new();
            let workflow = WorkflowUuid::new();
            let block = BlockUuid::new();

            repo.insert_step(with_state(indexed_step(workflow, block, "Worker", 1), sibling_state));
            let resolver = repo.insert_step(with_state(
                martingalian_core::StepBuilder::new(workflow, block, "Resolver")
                    .index(2)
                    .resolve_exception()
                    .build(),
                StepState::NotRunnable,
            ));

            let cascade = CascadeEngine::new(&repo);
            cascade.run_passes(None, now()).await.unwrap();

            let after = repo.get_step(resolver.id).await.unwrap().unwrap();
            let expected = if sibling_state.is_failed() {
                StepState::Pending
            } else {
                StepState::NotRunnable
            };
            prop_assert_eq!(after.state, expected);
            Ok(())
        })?;
    }

    /// P6 (Mutual exclusion): a second `acquire_group_lock` for the same
    /// group is always denied while the first is held, regardless of how
    /// many other groups are interleaved first.
    #[test]
    fn p6_group_lock_denies_concurrent_acquire(other_groups in proptest::collection::vec("[a-z]{1,4}", 0..4)) {
        let rt = runtime();
        rt.block_on(async {
            let repo = MemoryStepRepository::new();
            for g in &other_groups {
                repo.acquire_group_lock(Some(g), now()).await.unwrap();
            }
            let first = repo.acquire_group_lock(Some("target"), now()).await.unwrap();
            prop_assert!(first.is_some());
            let second = repo.acquire_group_lock(Some("target"), now()).await.unwrap();
            prop_assert!(second.is_none());
            Ok(())
        })?;
    }

    /// P8 (Retry bound): after `max_retries` failures a step is Failed, and
    /// `retries` never exceeds the configured bound along the way.
    #[test]
    fn p8_retries_never_exceed_bound(max_retries in 0u32..6, failures in 0usize..10) {
        let rt = runtime();
        rt.block_on(async {
            let repo = MemoryStepRepository::new();
            let workflow = WorkflowUuid::new();
            let block = BlockUuid::new();
            let mut step = repo.insert_step(with_state(indexed_step(workflow, block, "Flaky", 1), StepState::Running));
            let policy = RetryPolicy::new(&repo)
                .with_max_retries(max_retries)
                .with_backoff(BackoffStrategy::Fixed { interval_ms: 0 });

            for _ in 0..failures {
                if step.state != StepState::Running {
                    break;
                }
                step = policy.handle_failure(&step, now(), "boom").await.unwrap();
                prop_assert!(step.retries <= max_retries);
                if step.state == StepState::Pending {
                    // Re-dispatch to Running so the next failure is legal.
                    let executor = TransitionExecutor::new(&repo);
                    step = executor
                        .transition(step.id, StepState::Dispatched, now(), StepPatch::default())
                        .await
                        .unwrap();
                    step = executor
                        .transition(step.id, StepState::Running, now(), StepPatch::default())
                        .await
                        .unwrap();
                }
            }
            if failures as u32 > max_retries {
                prop_assert_eq!(step.state, StepState::Failed);
            }
            Ok(())
        })?;
    }

    /// R1: a second cascade sweep with no intervening mutation is a no-op.
    #[test]
    fn r1_cascade_is_idempotent_at_fixed_point(children in proptest::collection::vec(arb_concluded_state(), 0..4)) {
        let rt = runtime();
        rt.block_on(async {
            let repo = MemoryStepRepository::new();
            let workflow = WorkflowUuid::new();
            let parent_block = BlockUuid::new();
            let child_block = BlockUuid::new();
            let parent = repo.insert_step(with_state(
                martingalian_core::StepBuilder::new(workflow, parent_block, "Parent")
                    .child_block_uuid(child_block)
                    .build(),
                StepState::Running,
            ));
            for (i, state) in children.iter().enumerate() {
                repo.insert_step(with_state(indexed_step(workflow, child_block, "Child", i as i32 + 1), *state));
            }

            let cascade = CascadeEngine::new(&repo);
            use crate::cascade::CascadeOutcome;
            // Drive to a fixed point, then snapshot every step.
            loop {
                if cascade.run_passes(None, now()).await.unwrap() == CascadeOutcome::Clean {
                    break;
                }
            }
            let snapshot = |steps: &[martingalian_core::Step]| -> Vec<(StepId, StepState)> {
                steps.iter().map(|s| (s.id, s.state)).collect()
            };
            let before = snapshot(&repo.steps_in_block(child_block).await.unwrap());
            let parent_before = repo.get_step(parent.id).await.unwrap().unwrap().state;

            let outcome = cascade.run_passes(None, now()).await.unwrap();
            prop_assert_eq!(outcome, CascadeOutcome::Clean);

            let after = snapshot(&repo.steps_in_block(child_block).await.unwrap());
            let parent_after = repo.get_step(parent.id).await.unwrap().unwrap().state;
            prop_assert_eq!(before, after);
            prop_assert_eq!(parent_before, parent_after);
            Ok(())
        })?;
    }

    /// R2: releasing a group lock with no prior successful acquire is a
    /// no-op — it never panics and never leaves the group locked.
    #[test]
    fn r2_release_without_acquire_is_a_no_op(group in "[a-z]{1,6}") {
        let rt = runtime();
        rt.block_on(async {
            let repo = MemoryStepRepository::new();
            let tick_id = martingalian_core::TickId::new();
            repo.release_group_lock(Some(&group), tick_id, martingalian_core::TickProgress::LockDenied, now())
                .await
                .unwrap();

            // The group is still free to acquire normally afterward.
            let acquired = repo.acquire_group_lock(Some(&group), now()).await.unwrap();
            prop_assert!(acquired.is_some());
            Ok(())
        })?;
    }
}
