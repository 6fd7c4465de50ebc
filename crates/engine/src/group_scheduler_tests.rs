// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use martingalian_core::test_support::pending_step;
use martingalian_core::{BlockUuid, WorkflowUuid};
use martingalian_store::MemoryStepRepository;

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

#[tokio::test]
async fn yields_when_cooling_down() {
    let repo = MemoryStepRepository::new();
    repo.set_cooling_down(true).await.unwrap();
    let scheduler = GroupScheduler::new(&repo);
    assert_eq!(scheduler.next_group(now()).await.unwrap(), None);
}

#[tokio::test]
async fn no_groups_yields_none() {
    let repo = MemoryStepRepository::new();
    let scheduler = GroupScheduler::new(&repo);
    assert_eq!(scheduler.next_group(now()).await.unwrap(), None);
}

#[tokio::test]
async fn picks_the_group_with_the_oldest_last_selected_at() {
    let repo = MemoryStepRepository::new();
    let wf = WorkflowUuid::new();

    let mut a = pending_step(wf, BlockUuid::new(), "A");
    a.group = Some("alpha".to_string());
    repo.insert_step(a);
    let mut b = pending_step(wf, BlockUuid::new(), "B");
    b.group = Some("beta".to_string());
    repo.insert_step(b);

    // Pre-select "beta" so it is no longer the oldest.
    repo.mark_group_selected(Some("beta"), now()).await.unwrap();

    let scheduler = GroupScheduler::new(&repo);
    let picked = scheduler.next_group(now() + chrono::Duration::seconds(1)).await.unwrap();
    assert_eq!(picked, Some(Some("alpha".to_string())), "never-selected groups come first (nulls first)");
}

#[tokio::test]
async fn ties_break_lexically() {
    let repo = MemoryStepRepository::new();
    let wf = WorkflowUuid::new();
    let mut z = pending_step(wf, BlockUuid::new(), "Z");
    z.group = Some("zeta".to_string());
    repo.insert_step(z);
    let mut a = pending_step(wf, BlockUuid::new(), "A");
    a.group = Some("alpha".to_string());
    repo.insert_step(a);

    let scheduler = GroupScheduler::new(&repo);
    let picked = scheduler.next_group(now()).await.unwrap();
    assert_eq!(picked, Some(Some("alpha".to_string())));
}

#[tokio::test]
async fn round_robins_across_repeated_beats() {
    let repo = MemoryStepRepository::new();
    let wf = WorkflowUuid::new();
    let mut g1 = pending_step(wf, BlockUuid::new(), "G1");
    g1.group = Some("g1".to_string());
    repo.insert_step(g1);
    let mut g2 = pending_step(wf, BlockUuid::new(), "G2");
    g2.group = Some("g2".to_string());
    repo.insert_step(g2);

    let scheduler = GroupScheduler::new(&repo);
    let mut picks = Vec::new();
    let mut t = now();
    for _ in 0..4 {
        t += chrono::Duration::microseconds(1);
        picks.push(scheduler.next_group(t).await.unwrap().flatten());
    }
    // Over 4 beats with 2 runnable groups, each group is picked at least twice.
    assert_eq!(picks.iter().filter(|g| g.as_deref() == Some("g1")).count(), 2);
    assert_eq!(picks.iter().filter(|g| g.as_deref() == Some("g2")).count(), 2);
}
