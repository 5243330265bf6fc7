use onefuzz_core::ids::MachineId;
use onefuzz_core::node_message::{NodeCommand, NodeMessage};

use crate::error::StoreResult;

pub struct NodeMessageStore<'a>(pub(super) &'a sqlx::PgPool);

impl<'a> NodeMessageStore<'a> {
    /// Enqueues a command behind `machine_id`'s monotonic message sequence,
    /// FIFO per machine.
    pub async fn enqueue(&self, machine_id: MachineId, command: &NodeCommand) -> StoreResult<i64> {
        let message_id = sqlx::query_scalar!(
            r#"SELECT nextval('onefuzz.node_message_id_seq') as "id!""#,
        )
        .fetch_one(self.0)
        .await?;

        sqlx::query!(
            r#"
            INSERT INTO onefuzz.node_message (machine_id, message_id, command)
            VALUES ($1, $2, $3)
            "#,
            machine_id as MachineId,
            message_id,
            sqlx::types::Json(command) as _,
        )
        .execute(self.0)
        .await?;

        Ok(message_id)
    }

    /// Peek-lock semantics: the caller acks by calling [`Self::ack`] once the
    /// agent confirms delivery.
    pub async fn peek(&self, machine_id: MachineId, limit: i64) -> StoreResult<Vec<NodeMessage>> {
        struct Row {
            machine_id: MachineId,
            message_id: i64,
            command: sqlx::types::Json<NodeCommand>,
        }

        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                machine_id as "machine_id: MachineId",
                message_id,
                command as "command!: sqlx::types::Json<NodeCommand>"
            FROM onefuzz.node_message
            WHERE machine_id = $1
            ORDER BY message_id
            LIMIT $2
            "#,
            machine_id as MachineId,
            limit,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| NodeMessage {
                machine_id: r.machine_id,
                message_id: r.message_id,
                command: r.command.0,
            })
            .collect())
    }

    pub async fn ack(&self, machine_id: MachineId, message_id: i64) -> StoreResult<()> {
        sqlx::query!(
            "DELETE FROM onefuzz.node_message WHERE machine_id = $1 AND message_id = $2",
            machine_id as MachineId,
            message_id,
        )
        .execute(self.0)
        .await?;
        Ok(())
    }

    pub async fn delete_by_machine(&self, machine_id: MachineId) -> StoreResult<()> {
        sqlx::query!(
            "DELETE FROM onefuzz.node_message WHERE machine_id = $1",
            machine_id as MachineId,
        )
        .execute(self.0)
        .await?;
        Ok(())
    }
}
