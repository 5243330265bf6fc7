//! The autoscaler.
//!
//! One tick per active scaleset computes demand from the entity store --
//! queued work plus already-running work against that scaleset's pool --
//! and resizes towards it, clamped to `[min_size, max_size]`.
//!
//! Actual cloud-provider VM allocation is out of scope here: a tick only
//! updates `Scaleset.size` and raises a
//! `scaleset_resize_scheduled` event; a separate provisioning component
//! (not part of this crate) reconciles the fleet to match.

use onefuzz_core::events::EventType;
use onefuzz_core::ids::PoolName;
use onefuzz_core::scaleset::ScalesetState;

use crate::error::StoreError;
use crate::schedule::ScheduledEvent;
use crate::store::{retry_on_conflict, Store};

const RETRY_ATTEMPTS: u32 = 5;

/// Runs one autoscaler pass across every non-halted scaleset, batched to at
/// most `config.autoscaler_batch_size` resizes per tick so a single tick
/// can't fire an unbounded number of cloud-provider calls.
pub async fn autoscaler_tick(store: &Store, config: &crate::config::Config) -> Result<Vec<ScheduledEvent>, StoreError> {
    let mut events = Vec::new();
    let mut resized = 0u32;

    for scaleset in store.scalesets().search_active().await? {
        if resized >= config.autoscaler_batch_size {
            break;
        }
        if !scaleset.value.state.accepts_scale_out() && scaleset.value.state != ScalesetState::Init {
            continue;
        }

        let demand = demand_for_pool(store, &scaleset.value.pool_name, scaleset.value.scaleset_id).await?;
        let target = demand.clamp(scaleset.value.min_size, scaleset.value.max_size);

        if target == scaleset.value.size {
            continue;
        }

        let scaleset_id = scaleset.value.scaleset_id;
        retry_on_conflict(RETRY_ATTEMPTS, || async {
            let Some(current) = store.scalesets().get(scaleset_id).await? else {
                return Ok(());
            };
            let mut s = current.value;
            s.size = target;
            if s.state == ScalesetState::Running {
                s.state = ScalesetState::Resize;
            }
            store.scalesets().replace(&s, current.version).await?;
            Ok(())
        })
        .await?;

        events.push(ScheduledEvent {
            event_type: EventType::ScalesetResizeScheduled,
            payload: onefuzz_core::events::scaleset_resize_scheduled(scaleset_id, target),
        });
        resized += 1;
    }

    Ok(events)
}

/// `demand = queued work in the pool + work already running against this
/// scaleset`. Queued work is approximated as the count of `waiting` tasks
/// targeting the pool, since there is no separate queue-depth counter.
async fn demand_for_pool(store: &Store, pool_name: &PoolName, scaleset_id: onefuzz_core::ids::ScalesetId) -> Result<u32, StoreError> {
    let waiting = store.tasks().search_waiting().await?;
    let queued = waiting
        .iter()
        .filter(|t| &t.value.config.pool.name == pool_name)
        .count() as u32;

    let running = store
        .nodes()
        .search_by_scaleset(scaleset_id)
        .await?
        .iter()
        .filter(|n| matches!(n.value.state, onefuzz_core::node::NodeState::Busy | onefuzz_core::node::NodeState::Ready))
        .count() as u32;

    Ok(queued + running)
}
