//! Ties the control loops together into a single worker process.
//!
//! Every worker in the cluster runs the same four loops concurrently:
//! [`Worker::heartbeat`] keeps this process's row in `onefuzz.worker` alive,
//! [`Worker::validate_workers`] reaps dead peers, [`Worker::leader`] runs the
//! scheduler/lifecycle/autoscaler ticks if (and only if) this process is the
//! oldest live row, and [`Worker::process_events`] reacts to Postgres
//! `LISTEN`/`NOTIFY` traffic to wake the leader loop early instead of waiting
//! out its jitter. Workers never share memory; coordination happens through
//! the entity store alone.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use futures_concurrency::future::Join;
use rand::Rng;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::PgNotification;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::Instant;
use tracing::Instrument;

use onefuzz_core::events::{EventPayload, WebhookMessage, EVENT_VERSION};
use onefuzz_core::ids::{EventId, WebhookId};

use crate::event::{self, Event, EventSource};
use crate::flag::{ShutdownFlag, ShutdownGuard};
use crate::schedule::ScheduledEvent;
use crate::sim::{self, Scheduler};
use crate::store::Store;
use crate::{autoscale, lifecycle, schedule, Config};

pub(crate) struct SharedState {
    pub shutdown: ShutdownFlag,
    pub store: Store,
    pub config: Config,
    pub webhooks: broadcast::Sender<WebhookMessage>,
    pub scheduler: Arc<dyn Scheduler>,

    /// Current cluster leader id; `-1` while unresolved.
    leader: watch::Sender<i64>,

    /// Signalled by [`Worker::process_events`] whenever a task or node row
    /// changes, so the leader loop can re-run its tick early instead of
    /// sleeping out the full jitter window.
    wake: Notify,
}

impl SharedState {
    fn publish(&self, event: ScheduledEvent) {
        let message = WebhookMessage {
            event_id: EventId::new(),
            event_type: event.event_type,
            event_version: EVENT_VERSION,
            instance_id: self.config.instance_id,
            instance_name: self.config.instance_name.clone(),
            created_at: Utc::now(),
            // Fan-out to individual webhook subscriptions (matching by
            // `event_types`) is a downstream concern of the API server, not
            // this control loop; it re-stamps this field per subscriber.
            webhook_id: WebhookId::nil(),
            event: EventPayload::Inline(event.payload),
        };
        let _ = self.webhooks.send(message);
    }
}

pub struct WorkerBuilder {
    config: Config,
    pool: sqlx::PgPool,
    event_source: Option<Box<dyn EventSource>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    migrate: bool,
    validate: bool,
}

impl WorkerBuilder {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            config: Config::default(),
            pool,
            event_source: None,
            scheduler: None,
            migrate: false,
            validate: true,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Override the [`EventSource`] used to react to entity store writes.
    /// Tests substitute an in-memory source instead of a live `LISTEN`
    /// connection.
    pub fn event_source(mut self, source: Box<dyn EventSource>) -> Self {
        self.event_source = Some(source);
        self
    }

    /// Gate the control loops behind a [`Scheduler`] for deterministic
    /// simulation testing. Defaults to [`sim::NoopScheduler`].
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Whether the database should be automatically migrated on startup.
    ///
    /// This is a low-effort way to ensure the database is always as expected
    /// when running with a single worker. Not recommended for a larger
    /// cluster, where migrations should be applied out-of-band before new
    /// worker versions are rolled out.
    ///
    /// False by default.
    pub fn migrate(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }

    /// Validate that the database schema version matches what this worker
    /// expects. Ignored if [`WorkerBuilder::migrate`] is set.
    pub fn validate_database(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub async fn build(self) -> anyhow::Result<Worker> {
        if self.migrate {
            crate::migrate::migrate(&self.pool)
                .await
                .context("failed to migrate the database")?;
        } else if self.validate {
            let migrator = sqlx::migrate!("./migrations");
            let latest = migrator.iter().map(|m| m.version).max().unwrap_or(0);

            let mut conn = self.pool.acquire().await?;
            let version: Option<i64> =
                sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations WHERE success")
                    .fetch_one(&mut *conn)
                    .await
                    .unwrap_or(None);
            drop(conn);

            if version.unwrap_or(0) != latest {
                anyhow::bail!(
                    "database schema version does not match that required by this worker \
                     (expected {latest}, got {} instead)",
                    version.unwrap_or(0)
                )
            }
        }

        let store = Store::new(self.pool.clone());
        let event_source = match self.event_source {
            Some(source) => source,
            None => Box::new(PgEventSource::new(&self.pool).await?),
        };

        let shared = Arc::new(SharedState {
            shutdown: ShutdownFlag::new(),
            store,
            config: self.config,
            webhooks: broadcast::channel(256).0,
            scheduler: self.scheduler.unwrap_or_else(|| Arc::new(sim::NoopScheduler)),
            leader: watch::channel(-1).0,
            wake: Notify::new(),
        });

        Ok(Worker {
            shared,
            event_source,
            worker_id: -1,
        })
    }
}

pub struct WorkerHandle {
    shared: Arc<SharedState>,
}

impl WorkerHandle {
    pub fn shutdown(&self) {
        self.shared.shutdown.raise();
    }

    /// Subscribe to the webhook-worthy events raised by this worker's control
    /// loops. Fan-out to individual webhook subscriptions happens downstream.
    pub fn subscribe(&self) -> broadcast::Receiver<WebhookMessage> {
        self.shared.webhooks.subscribe()
    }

    /// Raise a webhook-worthy event from outside the control loops -- used by
    /// the REST API for events a tick never sees, like `crash_reported` from
    /// a blob-triggered report ingestion.
    pub fn publish(&self, event: ScheduledEvent) {
        self.shared.publish(event);
    }
}

pub struct Worker {
    shared: Arc<SharedState>,
    event_source: Box<dyn EventSource>,
    worker_id: i64,
}

impl Worker {
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            shared: self.shared.clone(),
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.worker_id = sqlx::query!(
            "
            INSERT INTO onefuzz.worker(heartbeat_at)
            VALUES (CURRENT_TIMESTAMP)
            RETURNING id
            "
        )
        .fetch_one(self.shared.store.pool())
        .await?
        .id;

        tracing::info!("onefuzz worker id is {}", self.worker_id);
        self.shared
            .scheduler
            .notify(sim::ScheduleEvent::WorkerRegistered { worker_id: self.worker_id });

        let leader_id = sqlx::query!(
            "SELECT id
               FROM onefuzz.worker
              ORDER BY started_at ASC
              LIMIT 1"
        )
        .fetch_one(self.shared.store.pool())
        .await?
        .id;

        self.shared.shutdown.reset();
        self.shared.leader.send_replace(leader_id);

        let worker_id = self.worker_id;
        let heartbeat = Self::heartbeat(self.shared.clone(), worker_id);
        let validate = Self::validate_workers(self.shared.clone(), worker_id);
        let leader = Self::leader(self.shared.clone(), worker_id);
        let process = self.process_events();

        // Run all four loops in the same task so a panic or hang in one is
        // visible to the others via the shutdown flag, rather than silently
        // leaving the worker half-alive.
        let (heartbeat, validate, leader, process) = (heartbeat, validate, leader, process)
            .join()
            .instrument(tracing::info_span!("worker", worker_id))
            .await;

        tracing::info!("deleting worker database entry");
        let result = sqlx::query!("DELETE FROM onefuzz.worker WHERE id = $1", self.worker_id)
            .execute(self.shared.store.pool())
            .await
            .context("failed to delete the worker entry from the database");
        self.shared
            .scheduler
            .notify(sim::ScheduleEvent::WorkerDeleted { worker_id });

        process?;
        validate?;
        heartbeat?;
        leader?;
        result?;

        Ok(())
    }

    async fn heartbeat(shared: Arc<SharedState>, worker_id: i64) -> anyhow::Result<()> {
        let _guard = ShutdownGuard::new(&shared.shutdown);
        let mut shutdown = std::pin::pin!(shared.shutdown.wait());
        let mut next = Instant::now();

        'outer: loop {
            tokio::select! {
                biased;

                _ = shutdown.as_mut() => break 'outer,
                _ = tokio::time::sleep_until(next) => (),
            }

            let _permit = shared.scheduler.acquire(sim::Component::Heartbeat { worker_id }).await;

            let record = sqlx::query!(
                "UPDATE onefuzz.worker
                    SET heartbeat_at = CURRENT_TIMESTAMP
                  WHERE id = $1
                  RETURNING id",
                worker_id
            )
            .fetch_optional(shared.store.pool())
            .await?;

            if record.is_none() {
                shared.shutdown.raise();
                anyhow::bail!("worker entry was deleted from the database");
            }

            let mut interval = shared.config.heartbeat_interval;
            let jitter = rand::thread_rng().gen_range(0..(interval / 4).as_nanos().max(1));
            interval -= Duration::from_nanos(jitter as u64);

            next += interval;
        }

        Ok(())
    }

    async fn validate_workers(shared: Arc<SharedState>, worker_id: i64) -> anyhow::Result<()> {
        let _guard = ShutdownGuard::new(&shared.shutdown);
        let mut shutdown = std::pin::pin!(shared.shutdown.wait());
        let mut next = Instant::now();

        'outer: loop {
            tokio::select! {
                biased;

                _ = shutdown.as_mut() => break 'outer,
                _ = tokio::time::sleep_until(next) => (),
            }

            let _permit = shared.scheduler.acquire(sim::Component::ValidateWorkers { worker_id }).await;

            let mut tx = shared.store.pool().begin().await?;
            let timeout = pg_interval(shared.config.heartbeat_timeout);

            let result = sqlx::query!(
                "DELETE FROM onefuzz.worker
                  WHERE CURRENT_TIMESTAMP - heartbeat_at > $1
                    AND NOT id = $2",
                timeout,
                worker_id
            )
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                tracing::trace!(
                    target: "onefuzz_runtime::validate_workers",
                    "expired {} inactive workers",
                    result.rows_affected()
                );
            }

            let record = sqlx::query!(r#"SELECT COUNT(*) as "count!" FROM onefuzz.worker"#)
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;

            // Cap at 1 day so clusters that temporarily balloon in size don't
            // leave a dead worker undetected for too long.
            let mut interval = ((shared.config.heartbeat_timeout / 2) * (record.count as u32).max(1))
                .min(Duration::from_secs(24 * 3600));
            let jitter = rand::thread_rng().gen_range(0..(interval / 2).as_nanos().max(1));
            interval -= Duration::from_nanos(jitter as u64);

            next += interval;
        }

        Ok(())
    }

    async fn leader(shared: Arc<SharedState>, worker_id: i64) -> anyhow::Result<()> {
        let _guard = ShutdownGuard::new(&shared.shutdown);
        let mut shutdown = std::pin::pin!(shared.shutdown.wait());

        let mut instant = Instant::now();
        let mut leader_rx = shared.leader.subscribe();
        let mut leader_id = *leader_rx.borrow_and_update();
        let mut next_autoscale = Instant::now();

        tracing::info!("cluster leader is {}", leader_id);

        'outer: loop {
            tokio::select! {
                biased;

                _ = shutdown.as_mut() => break 'outer,
                changed = leader_rx.changed() => {
                    if changed.is_err() {
                        break 'outer;
                    }
                    let id = *leader_rx.borrow_and_update();
                    if id != leader_id {
                        tracing::info!("cluster leader is now {id}");
                        shared.scheduler.notify(sim::ScheduleEvent::LeaderChanged { new_leader: id });
                    }
                    leader_id = id;
                },
                _ = shared.wake.notified(), if leader_id == worker_id => (),
                _ = tokio::time::sleep_until(instant) => (),
            }

            if leader_id != worker_id {
                instant += Duration::from_secs(3600);
                continue;
            }

            Self::run_tick(&shared, worker_id, &mut next_autoscale).await?;

            let mut interval = shared.config.scheduler_jitter.max(Duration::from_secs(1));
            let jitter = rand::thread_rng().gen_range(0..interval.as_nanos());
            interval -= Duration::from_nanos(jitter as u64);
            instant += interval;
        }

        Ok(())
    }

    /// One pass of everything the leader is responsible for: scheduling new
    /// work, sweeping stale lifecycle state, and (at most once every
    /// `autoscaler_interval`) resizing scalesets.
    async fn run_tick(shared: &Arc<SharedState>, worker_id: i64, next_autoscale: &mut Instant) -> anyhow::Result<()> {
        let start = Instant::now();
        let store = &shared.store;
        let config = &shared.config;
        let mut events = Vec::new();

        {
            let _permit = shared.scheduler.acquire(sim::Component::SchedulerTick { worker_id }).await;
            events.extend(schedule::scheduler_tick(store, config).await?);
        }

        events.extend(lifecycle::task_stop_tick(store).await?);
        events.extend(lifecycle::job_tick(store).await?);
        events.extend(lifecycle::task_assignment_sweep(store, config).await?);

        {
            let _permit = shared.scheduler.acquire(sim::Component::NodeLivenessSweep { worker_id }).await;
            events.extend(lifecycle::node_liveness_sweep(store, config).await?);
        }

        events.extend(lifecycle::scaleset_drain_tick(store).await?);
        lifecycle::pool_drain_tick(store).await?;
        lifecycle::repro_tick(store).await?;
        lifecycle::retention_sweep(store).await?;

        if Instant::now() >= *next_autoscale {
            let _permit = shared
                .scheduler
                .acquire(sim::Component::AutoscalerTick {
                    worker_id,
                    scaleset_id: onefuzz_core::ids::ScalesetId::nil(),
                })
                .await;
            events.extend(autoscale::autoscaler_tick(store, config).await?);
            *next_autoscale = Instant::now() + config.autoscaler_interval;
        }

        for event in events {
            shared.publish(event);
        }

        tracing::trace!(
            target: "onefuzz_runtime::leader",
            "tick completed in {}",
            humantime::Duration::from(start.elapsed())
        );

        Ok(())
    }

    async fn process_events(&mut self) -> anyhow::Result<()> {
        let shutdown = self.shared.shutdown.clone();
        let _guard = ShutdownGuard::new(&shutdown);
        let mut shutdown = std::pin::pin!(shutdown.wait());

        self.load_leader_id().await?;

        'outer: loop {
            let event = tokio::select! {
                biased;

                _ = shutdown.as_mut() => break 'outer,
                event = self.event_source.next() => event?,
            };

            match event {
                Event::Task(_) | Event::Node(_) => {
                    self.shared.wake.notify_waiters();
                }

                Event::Worker(event::Worker { worker_id, .. }) => {
                    let leader_id = *self.shared.leader.borrow();
                    match leader_id {
                        id if id == worker_id => (),
                        id if id == -1 => (),
                        _ => continue,
                    }

                    self.load_leader_id().await?;
                }

                // We don't know what we missed, so wake the leader loop
                // unconditionally and re-resolve the leader.
                Event::Lagged => {
                    self.load_leader_id().await?;
                    self.shared.wake.notify_waiters();
                }
            }
        }

        Ok(())
    }

    async fn load_leader_id(&mut self) -> anyhow::Result<()> {
        let record = sqlx::query!(
            "SELECT id
               FROM onefuzz.worker
              ORDER BY started_at ASC
              LIMIT 1"
        )
        .fetch_optional(self.shared.store.pool())
        .await?;

        let new_leader = match record {
            Some(record) => record.id,
            None => -1,
        };

        self.shared.leader.send_replace(new_leader);

        Ok(())
    }
}

fn pg_interval(duration: Duration) -> PgInterval {
    PgInterval {
        months: 0,
        days: 0,
        microseconds: duration.as_micros().try_into().unwrap_or(i64::MAX),
    }
}

pub struct PgEventSource {
    listener: sqlx::postgres::PgListener,
}

impl PgEventSource {
    pub async fn new(pool: &sqlx::PgPool) -> sqlx::Result<Self> {
        let mut listener = sqlx::postgres::PgListener::connect_with(pool).await?;
        listener
            .listen_all(["onefuzz:task", "onefuzz:node", "onefuzz:worker"])
            .await?;
        Ok(Self { listener })
    }
}

#[async_trait]
impl EventSource for PgEventSource {
    async fn next(&mut self) -> anyhow::Result<Event> {
        fn parse_event<T, F>(name: &str, event: &PgNotification, func: F) -> Event
        where
            F: FnOnce(T) -> Event,
            T: serde::de::DeserializeOwned,
        {
            match serde_json::from_str(event.payload()) {
                Ok(payload) => func(payload),
                Err(e) => {
                    tracing::warn!("listener received an invalid `{name}` notification: {e}");
                    Event::Lagged
                }
            }
        }

        loop {
            break match self.listener.try_recv().await {
                Ok(Some(event)) => {
                    tracing::trace!("received event {}: {}", event.channel(), event.payload());

                    match event.channel() {
                        "onefuzz:task" => Ok(parse_event("onefuzz:task", &event, Event::Task)),
                        "onefuzz:node" => Ok(parse_event("onefuzz:node", &event, Event::Node)),
                        "onefuzz:worker" => Ok(parse_event("onefuzz:worker", &event, Event::Worker)),
                        _ => continue,
                    }
                }
                Ok(None) => Ok(Event::Lagged),
                Err(e) => {
                    tracing::warn!("listener received an error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(Event::Lagged)
                }
            };
        }
    }
}
