use onefuzz_core::ids::{MachineId, PoolId, PoolName, ScalesetId};
use onefuzz_core::node::{Node, NodeState};

use super::Versioned;
use crate::error::{StoreError, StoreResult};

pub struct NodeStore<'a>(pub(super) &'a sqlx::PgPool);

struct Row {
    machine_id: MachineId,
    pool_name: PoolName,
    pool_id: PoolId,
    scaleset_id: Option<ScalesetId>,
    version_tag: String,
    state: NodeState,
    initialized_at: Option<chrono::DateTime<chrono::Utc>>,
    heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    reimage_requested: bool,
    delete_requested: bool,
    debug_keep_node: bool,
    version: i64,
}

impl Row {
    fn into_versioned(self) -> Versioned<Node> {
        Versioned {
            value: Node {
                machine_id: self.machine_id,
                pool_name: self.pool_name,
                pool_id: self.pool_id,
                scaleset_id: self.scaleset_id,
                version: self.version_tag,
                state: self.state,
                initialized_at: self.initialized_at,
                heartbeat: self.heartbeat,
                reimage_requested: self.reimage_requested,
                delete_requested: self.delete_requested,
                debug_keep_node: self.debug_keep_node,
            },
            version: self.version,
        }
    }
}

impl<'a> NodeStore<'a> {
    pub async fn insert(&self, node: &Node) -> StoreResult<Versioned<Node>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            INSERT INTO onefuzz.node
                (machine_id, pool_name, pool_id, scaleset_id, version_tag, state,
                 initialized_at, heartbeat, reimage_requested, delete_requested, debug_keep_node)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING
                machine_id as "machine_id: MachineId",
                pool_name as "pool_name: PoolName",
                pool_id as "pool_id: PoolId",
                scaleset_id as "scaleset_id: ScalesetId",
                version_tag,
                state as "state: NodeState",
                initialized_at,
                heartbeat,
                reimage_requested,
                delete_requested,
                debug_keep_node,
                version
            "#,
            node.machine_id as MachineId,
            node.pool_name.clone() as PoolName,
            node.pool_id as PoolId,
            node.scaleset_id as Option<ScalesetId>,
            node.version,
            node.state as NodeState,
            node.initialized_at,
            node.heartbeat,
            node.reimage_requested,
            node.delete_requested,
            node.debug_keep_node,
        )
        .fetch_one(self.0)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists,
            _ => StoreError::Database(e),
        })?;

        Ok(row.into_versioned())
    }

    pub async fn get(&self, machine_id: MachineId) -> StoreResult<Option<Versioned<Node>>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            SELECT
                machine_id as "machine_id: MachineId",
                pool_name as "pool_name: PoolName",
                pool_id as "pool_id: PoolId",
                scaleset_id as "scaleset_id: ScalesetId",
                version_tag,
                state as "state: NodeState",
                initialized_at,
                heartbeat,
                reimage_requested,
                delete_requested,
                debug_keep_node,
                version
            FROM onefuzz.node
            WHERE machine_id = $1
            "#,
            machine_id as MachineId,
        )
        .fetch_optional(self.0)
        .await?;

        Ok(row.map(Row::into_versioned))
    }

    /// Nodes in `ready`, candidates for the scheduler's claim pass.
    pub async fn search_ready_in_pool(&self, pool_name: &PoolName) -> StoreResult<Vec<Versioned<Node>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                machine_id as "machine_id: MachineId",
                pool_name as "pool_name: PoolName",
                pool_id as "pool_id: PoolId",
                scaleset_id as "scaleset_id: ScalesetId",
                version_tag,
                state as "state: NodeState",
                initialized_at,
                heartbeat,
                reimage_requested,
                delete_requested,
                debug_keep_node,
                version
            FROM onefuzz.node
            WHERE pool_name = $1 AND state = 'ready'
            "#,
            pool_name as &PoolName,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_versioned).collect())
    }

    /// Every node in a scaleset, used by the autoscaler to compute current
    /// fleet size and by scale-in to pick victims.
    pub async fn search_by_scaleset(&self, scaleset_id: ScalesetId) -> StoreResult<Vec<Versioned<Node>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                machine_id as "machine_id: MachineId",
                pool_name as "pool_name: PoolName",
                pool_id as "pool_id: PoolId",
                scaleset_id as "scaleset_id: ScalesetId",
                version_tag,
                state as "state: NodeState",
                initialized_at,
                heartbeat,
                reimage_requested,
                delete_requested,
                debug_keep_node,
                version
            FROM onefuzz.node
            WHERE scaleset_id = $1
            "#,
            scaleset_id as ScalesetId,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_versioned).collect())
    }

    /// Every node not yet halted, used by the liveness sweep.
    pub async fn search_not_halted(&self) -> StoreResult<Vec<Versioned<Node>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                machine_id as "machine_id: MachineId",
                pool_name as "pool_name: PoolName",
                pool_id as "pool_id: PoolId",
                scaleset_id as "scaleset_id: ScalesetId",
                version_tag,
                state as "state: NodeState",
                initialized_at,
                heartbeat,
                reimage_requested,
                delete_requested,
                debug_keep_node,
                version
            FROM onefuzz.node
            WHERE state != 'halt'
            "#,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_versioned).collect())
    }

    pub async fn replace(&self, node: &Node, expected_version: i64) -> StoreResult<i64> {
        let result = sqlx::query!(
            r#"
            UPDATE onefuzz.node
               SET pool_name = $2, scaleset_id = $3, version_tag = $4, state = $5,
                   initialized_at = $6, heartbeat = $7, reimage_requested = $8,
                   delete_requested = $9, debug_keep_node = $10, version = version + 1
             WHERE machine_id = $1 AND version = $11
            "#,
            node.machine_id as MachineId,
            node.pool_name.clone() as PoolName,
            node.scaleset_id as Option<ScalesetId>,
            node.version,
            node.state as NodeState,
            node.initialized_at,
            node.heartbeat,
            node.reimage_requested,
            node.delete_requested,
            node.debug_keep_node,
            expected_version,
        )
        .execute(self.0)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }

        Ok(expected_version + 1)
    }

    pub async fn delete(&self, machine_id: MachineId) -> StoreResult<()> {
        sqlx::query!("DELETE FROM onefuzz.node WHERE machine_id = $1", machine_id as MachineId)
            .execute(self.0)
            .await?;
        Ok(())
    }
}
