use onefuzz_core::ids::{MachineId, TaskId};
use onefuzz_core::node_task::{NodeTask, NodeTaskState};

use crate::error::StoreResult;

pub struct NodeTaskStore<'a>(pub(super) &'a sqlx::PgPool);

impl<'a> NodeTaskStore<'a> {
    /// Upsert: re-assigning the same `(machine_id, task_id)` pair just moves
    /// its state forward.
    pub async fn put(&self, node_task: &NodeTask) -> StoreResult<()> {
        sqlx::query!(
            r#"
            INSERT INTO onefuzz.node_task (machine_id, task_id, state)
            VALUES ($1, $2, $3)
            ON CONFLICT (machine_id, task_id) DO UPDATE SET state = EXCLUDED.state
            "#,
            node_task.machine_id as MachineId,
            node_task.task_id as TaskId,
            node_task.state as NodeTaskState,
        )
        .execute(self.0)
        .await?;
        Ok(())
    }

    pub async fn search_by_task(&self, task_id: TaskId) -> StoreResult<Vec<NodeTask>> {
        let rows = sqlx::query_as!(
            NodeTask,
            r#"
            SELECT
                machine_id as "machine_id: MachineId",
                task_id as "task_id: TaskId",
                state as "state: NodeTaskState"
            FROM onefuzz.node_task
            WHERE task_id = $1
            "#,
            task_id as TaskId,
        )
        .fetch_all(self.0)
        .await?;
        Ok(rows)
    }

    pub async fn search_by_machine(&self, machine_id: MachineId) -> StoreResult<Vec<NodeTask>> {
        let rows = sqlx::query_as!(
            NodeTask,
            r#"
            SELECT
                machine_id as "machine_id: MachineId",
                task_id as "task_id: TaskId",
                state as "state: NodeTaskState"
            FROM onefuzz.node_task
            WHERE machine_id = $1
            "#,
            machine_id as MachineId,
        )
        .fetch_all(self.0)
        .await?;
        Ok(rows)
    }

    /// Deleted wholesale when a node is reimaged.
    pub async fn delete_by_machine(&self, machine_id: MachineId) -> StoreResult<()> {
        sqlx::query!(
            "DELETE FROM onefuzz.node_task WHERE machine_id = $1",
            machine_id as MachineId,
        )
        .execute(self.0)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, machine_id: MachineId, task_id: TaskId) -> StoreResult<()> {
        sqlx::query!(
            "DELETE FROM onefuzz.node_task WHERE machine_id = $1 AND task_id = $2",
            machine_id as MachineId,
            task_id as TaskId,
        )
        .execute(self.0)
        .await?;
        Ok(())
    }
}
