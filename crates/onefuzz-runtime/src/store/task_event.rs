use onefuzz_core::ids::{MachineId, TaskId};
use onefuzz_core::task_event::TaskEvent;

use crate::error::StoreResult;

pub struct TaskEventStore<'a>(pub(super) &'a sqlx::PgPool);

impl<'a> TaskEventStore<'a> {
    /// Append-only: task events are never updated or deleted individually.
    pub async fn append(&self, event: &TaskEvent) -> StoreResult<()> {
        sqlx::query!(
            r#"
            INSERT INTO onefuzz.task_event (task_id, machine_id, event_data)
            VALUES ($1, $2, $3)
            "#,
            event.task_id as TaskId,
            event.machine_id as MachineId,
            event.event_data,
        )
        .execute(self.0)
        .await?;
        Ok(())
    }

    pub async fn search_by_task(&self, task_id: TaskId) -> StoreResult<Vec<TaskEvent>> {
        let rows = sqlx::query_as!(
            TaskEvent,
            r#"
            SELECT
                task_id as "task_id: TaskId",
                machine_id as "machine_id: MachineId",
                event_data,
                created_at
            FROM onefuzz.task_event
            WHERE task_id = $1
            ORDER BY created_at
            "#,
            task_id as TaskId,
        )
        .fetch_all(self.0)
        .await?;
        Ok(rows)
    }
}
