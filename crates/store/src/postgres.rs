// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Postgres-backed [`StepRepository`].
//!
//! `acquireGroupLock` is the one operation that must be a single
//! conditional statement rather than read-then-write: it uses
//! `UPDATE ... WHERE can_dispatch = false RETURNING ...` so two dispatcher
//! processes racing for the same group can never both observe success.

use crate::error::StoreError;
use crate::patch::{Field, StepPatch};
use crate::repository::StepRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use martingalian_core::{
    BlockUuid, Priority, Relatable, Step, StepId, StepState, StepType, TickId, TickProgress,
    WorkflowUuid,
};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;

#[derive(Clone)]
pub struct PgStepRepository {
    pool: PgPool,
}

impl PgStepRepository {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct StepRow {
    id: i64,
    canonical: Option<String>,
    workflow_id: uuid::Uuid,
    block_uuid: uuid::Uuid,
    child_block_uuid: Option<uuid::Uuid>,
    index: Option<i32>,
    step_type: String,
    execution_mode: String,
    group: Option<String>,
    state: String,
    queue: String,
    class: String,
    arguments: Value,
    priority: String,
    can_cool_down: bool,
    dispatch_after: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    retries: i32,
    tick_id: Option<uuid::Uuid>,
    hostname: Option<String>,
    response: Option<Value>,
    error_message: Option<String>,
    error_stack_trace: Option<String>,
    step_log: Option<String>,
    relatable_kind: Option<String>,
    relatable_id: Option<String>,
}

impl TryFrom<StepRow> for Step {
    type Error = StoreError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(Step {
            id: StepId::new(row.id),
            canonical: row.canonical,
            workflow_id: WorkflowUuid::from_uuid(row.workflow_id),
            block_uuid: BlockUuid::from_uuid(row.block_uuid),
            child_block_uuid: row.child_block_uuid.map(BlockUuid::from_uuid),
            index: row.index,
            step_type: parse_step_type(&row.step_type),
            execution_mode: row.execution_mode,
            group: row.group,
            state: parse_state(&row.state),
            queue: row.queue,
            class: row.class,
            arguments: row.arguments,
            priority: if row.priority == "high" { Priority::High } else { Priority::Default },
            can_cool_down: row.can_cool_down,
            dispatch_after: row.dispatch_after,
            started_at: row.started_at,
            completed_at: row.completed_at,
            duration_ms: row.duration_ms,
            retries: row.retries.max(0) as u32,
            tick_id: row.tick_id.map(TickId::from_uuid),
            hostname: row.hostname,
            response: row.response,
            error_message: row.error_message,
            error_stack_trace: row.error_stack_trace,
            step_log: row.step_log,
            relatable: match (row.relatable_kind, row.relatable_id) {
                (Some(kind), Some(id)) => Some(Relatable::new(kind, id)),
                _ => None,
            },
        })
    }
}

fn parse_state(raw: &str) -> StepState {
    match raw {
        "pending" => StepState::Pending,
        "not_runnable" => StepState::NotRunnable,
        "dispatched" => StepState::Dispatched,
        "running" => StepState::Running,
        "completed" => StepState::Completed,
        "skipped" => StepState::Skipped,
        "failed" => StepState::Failed,
        "stopped" => StepState::Stopped,
        _ => StepState::Cancelled,
    }
}

fn state_str(state: StepState) -> &'static str {
    match state {
        StepState::Pending => "pending",
        StepState::NotRunnable => "not_runnable",
        StepState::Dispatched => "dispatched",
        StepState::Running => "running",
        StepState::Completed => "completed",
        StepState::Skipped => "skipped",
        StepState::Failed => "failed",
        StepState::Stopped => "stopped",
        StepState::Cancelled => "cancelled",
    }
}

fn parse_step_type(raw: &str) -> StepType {
    if raw == "resolve-exception" {
        StepType::ResolveException
    } else {
        StepType::Default
    }
}

fn step_type_str(step_type: StepType) -> &'static str {
    match step_type {
        StepType::Default => "default",
        StepType::ResolveException => "resolve-exception",
    }
}

const STEP_COLUMNS: &str = "id, canonical, workflow_id, block_uuid, child_block_uuid, index, \
    step_type, execution_mode, \"group\", state, queue, class, arguments, priority, \
    can_cool_down, dispatch_after, started_at, completed_at, duration_ms, retries, tick_id, \
    hostname, response, error_message, error_stack_trace, step_log, relatable_kind, relatable_id";

#[async_trait]
impl StepRepository for PgStepRepository {
    async fn acquire_group_lock(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<TickId>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO steps_dispatcher ("group", can_dispatch)
               VALUES (COALESCE($1, ''), FALSE)
               ON CONFLICT ("group") DO NOTHING"#,
        )
        .bind(group)
        .execute(&mut *tx)
        .await?;

        let tick_id = TickId::new();
        let updated = sqlx::query(
            r#"UPDATE steps_dispatcher
               SET can_dispatch = TRUE, current_tick_id = $2
               WHERE "group" = COALESCE($1, '') AND can_dispatch = FALSE
               RETURNING "group""#,
        )
        .bind(group)
        .bind(tick_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            r#"INSERT INTO steps_dispatcher_ticks (id, "group", started_at, progress)
               VALUES ($1, $2, $3, 0)"#,
        )
        .bind(tick_id.as_uuid())
        .bind(group)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(tick_id))
    }

    async fn release_group_lock(
        &self,
        group: Option<&str>,
        tick_id: TickId,
        progress: TickProgress,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let released = sqlx::query(
            r#"UPDATE steps_dispatcher
               SET can_dispatch = FALSE, current_tick_id = NULL, last_tick_completed = $3
               WHERE "group" = COALESCE($1, '') AND current_tick_id = $2
               RETURNING "group""#,
        )
        .bind(group)
        .bind(tick_id.as_uuid())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if released.is_some() {
            sqlx::query(
                r#"UPDATE steps_dispatcher_ticks
                   SET completed_at = $2, progress = $3,
                       duration_ms = EXTRACT(EPOCH FROM ($2 - started_at)) * 1000
                   WHERE id = $1"#,
            )
            .bind(tick_id.as_uuid())
            .bind(now)
            .bind(progress.as_u8() as i16)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn distinct_groups(&self) -> Result<Vec<Option<String>>, StoreError> {
        let rows: Vec<(Option<String>,)> = sqlx::query_as(
            r#"SELECT DISTINCT "group" FROM steps
               WHERE state IN ('pending', 'not_runnable', 'dispatched', 'running')"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(g,)| g).collect())
    }

    async fn oldest_selected_group(&self) -> Result<Option<Option<String>>, StoreError> {
        let groups = self.distinct_groups().await?;
        if groups.is_empty() {
            return Ok(None);
        }
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r#"SELECT "group" FROM steps_dispatcher
               WHERE "group" = ANY($1)
               ORDER BY last_selected_at ASC NULLS FIRST, "group" ASC
               LIMIT 1"#,
        )
        .bind(
            groups
                .iter()
                .map(|g| g.clone().unwrap_or_default())
                .collect::<Vec<_>>(),
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(Some(row.map(|(g,)| g).unwrap_or_else(|| groups[0].clone())))
    }

    async fn mark_group_selected(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO steps_dispatcher ("group", can_dispatch, last_selected_at)
               VALUES (COALESCE($1, ''), FALSE, $2)
               ON CONFLICT ("group") DO UPDATE SET last_selected_at = EXCLUDED.last_selected_at"#,
        )
        .bind(group)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_cooling_down(&self) -> Result<bool, StoreError> {
        let row: (bool,) =
            sqlx::query_as("SELECT is_cooling_down FROM martingalian_flags WHERE id = TRUE")
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn set_cooling_down(&self, value: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE martingalian_flags SET is_cooling_down = $1 WHERE id = TRUE")
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_step(&self, id: StepId) -> Result<Option<Step>, StoreError> {
        let row: Option<StepRow> =
            sqlx::query_as(&format!("SELECT {STEP_COLUMNS} FROM steps WHERE id = $1"))
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;
        row.map(Step::try_from).transpose()
    }

    async fn select_dispatch_candidates(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepRow> = sqlx::query_as(&format!(
            r#"SELECT {STEP_COLUMNS} FROM steps
               WHERE state = 'pending'
                 AND (dispatch_after IS NULL OR dispatch_after <= $2)
                 AND ($1::text IS NULL AND "group" IS NULL OR "group" = $1)
               ORDER BY id"#
        ))
        .bind(group)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Step::try_from).collect()
    }

    async fn update_step(
        &self,
        id: StepId,
        expected_state: StepState,
        patch: StepPatch,
    ) -> Result<Step, StoreError> {
        let mut tx = self.pool.begin().await?;

        // `FOR UPDATE` locks the row for the rest of this transaction, so
        // the state comparison below and the write after it are atomic
        // with respect to any other transaction touching this id: nothing
        // can change `state` out from under us between the check and the
        // `UPDATE`.
        let updated = sqlx::query(
            r#"UPDATE steps SET
                 state             = COALESCE($2, state),
                 dispatch_after    = CASE WHEN $3 THEN $4 ELSE dispatch_after END,
                 started_at        = CASE WHEN $5 THEN $6 ELSE started_at END,
                 completed_at      = CASE WHEN $7 THEN $8 ELSE completed_at END,
                 duration_ms       = CASE WHEN $9 THEN $10 ELSE duration_ms END,
                 retries           = COALESCE($11, retries),
                 tick_id           = CASE WHEN $12 THEN $13 ELSE tick_id END,
                 hostname          = CASE WHEN $14 THEN $15 ELSE hostname END,
                 response          = CASE WHEN $16 THEN $17 ELSE response END,
                 error_message     = CASE WHEN $18 THEN $19 ELSE error_message END,
                 error_stack_trace = CASE WHEN $20 THEN $21 ELSE error_stack_trace END,
                 step_log          = CASE WHEN $22 THEN $23 ELSE step_log END
               WHERE id = $1 AND state = $24
               RETURNING id"#,
        )
        .bind(id.get())
        .bind(patch.state.map(state_str))
        .bind(!patch.dispatch_after.is_unchanged())
        .bind(field_value(patch.dispatch_after))
        .bind(!patch.started_at.is_unchanged())
        .bind(field_value(patch.started_at))
        .bind(!patch.completed_at.is_unchanged())
        .bind(field_value(patch.completed_at))
        .bind(!patch.duration_ms.is_unchanged())
        .bind(field_value(patch.duration_ms))
        .bind(patch.retries.map(|r| r as i32))
        .bind(!patch.tick_id.is_unchanged())
        .bind(field_value(patch.tick_id).map(|t: TickId| t.as_uuid()))
        .bind(!patch.hostname.is_unchanged())
        .bind(field_value(patch.hostname))
        .bind(!patch.response.is_unchanged())
        .bind(field_value(patch.response))
        .bind(!patch.error_message.is_unchanged())
        .bind(field_value(patch.error_message))
        .bind(!patch.error_stack_trace.is_unchanged())
        .bind(field_value(patch.error_stack_trace))
        .bind(!patch.step_log.is_unchanged())
        .bind(field_value(patch.step_log))
        .bind(state_str(expected_state))
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            // Either the id doesn't exist, or it does but its state no
            // longer matches `expected_state` — distinguish the two so the
            // caller can tell a dead id from a genuine race.
            let still_exists: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM steps WHERE id = $1")
                    .bind(id.get())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(if still_exists.is_some() {
                StoreError::Conflict(id)
            } else {
                StoreError::StepNotFound(id)
            });
        }

        let row: StepRow = sqlx::query_as(&format!("SELECT {STEP_COLUMNS} FROM steps WHERE id = $1"))
            .bind(id.get())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Step::try_from(row)
    }

    async fn skipped_parents(&self, group: Option<&str>) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepRow> = sqlx::query_as(&format!(
            r#"SELECT {STEP_COLUMNS} FROM steps
               WHERE state = 'skipped' AND child_block_uuid IS NOT NULL
                 AND ($1::text IS NULL AND "group" IS NULL OR "group" = $1)"#
        ))
        .bind(group)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Step::try_from).collect()
    }

    async fn failed_steps_with_index(&self, group: Option<&str>) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepRow> = sqlx::query_as(&format!(
            r#"SELECT {STEP_COLUMNS} FROM steps
               WHERE state IN ('failed', 'stopped', 'cancelled') AND index IS NOT NULL
                 AND ($1::text IS NULL AND "group" IS NULL OR "group" = $1)"#
        ))
        .bind(group)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Step::try_from).collect()
    }

    async fn cancellable_after_index(
        &self,
        block: BlockUuid,
        after_index: i32,
    ) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepRow> = sqlx::query_as(&format!(
            r#"SELECT {STEP_COLUMNS} FROM steps
               WHERE block_uuid = $1 AND step_type = 'default' AND index > $2
                 AND state NOT IN ('completed', 'skipped', 'failed', 'stopped', 'cancelled', 'not_runnable')"#
        ))
        .bind(block.as_uuid())
        .bind(after_index)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Step::try_from).collect()
    }

    async fn pending_steps_in_block(&self, block: BlockUuid) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepRow> = sqlx::query_as(&format!(
            "SELECT {STEP_COLUMNS} FROM steps WHERE block_uuid = $1 AND state = 'pending'"
        ))
        .bind(block.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Step::try_from).collect()
    }

    async fn blocks_with_promotable_resolve_exception(
        &self,
        group: Option<&str>,
    ) -> Result<Vec<BlockUuid>, StoreError> {
        let rows: Vec<(uuid::Uuid,)> = sqlx::query_as(
            r#"SELECT DISTINCT r.block_uuid
               FROM steps r
               JOIN steps f ON f.block_uuid = r.block_uuid
               WHERE r.step_type = 'resolve-exception' AND r.state = 'not_runnable'
                 AND f.step_type != 'resolve-exception'
                 AND f.state IN ('failed', 'stopped', 'cancelled')
                 AND ($1::text IS NULL AND r."group" IS NULL OR r."group" = $1)
               ORDER BY r.block_uuid"#,
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| BlockUuid::from_uuid(id)).collect())
    }

    async fn not_runnable_resolve_exception_steps(
        &self,
        block: BlockUuid,
    ) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepRow> = sqlx::query_as(&format!(
            r#"SELECT {STEP_COLUMNS} FROM steps
               WHERE block_uuid = $1 AND step_type = 'resolve-exception' AND state = 'not_runnable'"#
        ))
        .bind(block.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Step::try_from).collect()
    }

    async fn running_parents(&self, group: Option<&str>) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepRow> = sqlx::query_as(&format!(
            r#"SELECT {STEP_COLUMNS} FROM steps
               WHERE state = 'running' AND child_block_uuid IS NOT NULL
                 AND ($1::text IS NULL AND "group" IS NULL OR "group" = $1)"#
        ))
        .bind(group)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Step::try_from).collect()
    }

    async fn failed_or_stopped_parents(&self, group: Option<&str>) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepRow> = sqlx::query_as(&format!(
            r#"SELECT {STEP_COLUMNS} FROM steps
               WHERE state IN ('failed', 'stopped') AND child_block_uuid IS NOT NULL
                 AND ($1::text IS NULL AND "group" IS NULL OR "group" = $1)"#
        ))
        .bind(group)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Step::try_from).collect()
    }

    async fn non_terminal_steps_in_block(&self, block: BlockUuid) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepRow> = sqlx::query_as(&format!(
            r#"SELECT {STEP_COLUMNS} FROM steps
               WHERE block_uuid = $1
                 AND state NOT IN ('completed', 'skipped', 'failed', 'stopped', 'cancelled')"#
        ))
        .bind(block.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Step::try_from).collect()
    }

    async fn steps_in_block(&self, block: BlockUuid) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepRow> =
            sqlx::query_as(&format!("SELECT {STEP_COLUMNS} FROM steps WHERE block_uuid = $1"))
                .bind(block.as_uuid())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Step::try_from).collect()
    }

    async fn child_blocks_of(&self, block: BlockUuid) -> Result<Vec<BlockUuid>, StoreError> {
        let rows: Vec<(uuid::Uuid,)> = sqlx::query_as(
            "SELECT child_block_uuid FROM steps WHERE block_uuid = $1 AND child_block_uuid IS NOT NULL",
        )
        .bind(block.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| BlockUuid::from_uuid(id)).collect())
    }

    async fn parent_of_block(&self, block: BlockUuid) -> Result<Option<Step>, StoreError> {
        let row: Option<StepRow> = sqlx::query_as(&format!(
            "SELECT {STEP_COLUMNS} FROM steps WHERE child_block_uuid = $1"
        ))
        .bind(block.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Step::try_from).transpose()
    }

    async fn steps_at_index(
        &self,
        block: BlockUuid,
        index: i32,
        step_type: StepType,
    ) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepRow> = sqlx::query_as(&format!(
            "SELECT {STEP_COLUMNS} FROM steps WHERE block_uuid = $1 AND index = $2 AND step_type = $3"
        ))
        .bind(block.as_uuid())
        .bind(index)
        .bind(step_type_str(step_type))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Step::try_from).collect()
    }
}

fn field_value<T>(field: Field<T>) -> Option<T> {
    match field {
        Field::Set(value) => Some(value),
        Field::Unchanged | Field::Clear => None,
    }
}
