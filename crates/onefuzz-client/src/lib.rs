//! Typed REST client for the work-scheduling engine's HTTP API.
//!
//! Every method maps onto one endpoint of the route table; request and
//! response bodies are the same [`onefuzz_core`] types the server itself
//! uses, so there is never a second, drifting copy of the wire schema.

mod error;

use std::collections::BTreeMap;
use std::sync::Arc;

use onefuzz_core::container::Container;
use onefuzz_core::ids::{JobId, MachineId, NotificationId, ReproId, ScalesetId, TaskId};
use onefuzz_core::job::{Job, JobConfig, UserInfo};
use onefuzz_core::node::Node;
use onefuzz_core::notification::{Notification, NotificationConfig};
use onefuzz_core::pool::{Architecture, Os, Pool, PoolState};
use onefuzz_core::repro::{Repro, ReproConfig};
use onefuzz_core::scaleset::{Scaleset, ScalesetAuth};
use onefuzz_core::task::{Task, TaskConfig};
use serde::{de::DeserializeOwned, Serialize};

pub use self::error::{ClientError, ClientErrorKind};

type Result<T> = std::result::Result<T, ClientError>;

#[derive(Clone)]
pub struct OnefuzzClient {
    http: reqwest::Client,
    base_url: Arc<str>,
}

impl OnefuzzClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        // Redirects are surfaced, not followed: `download_url` needs the 302
        // the server answers with, not the signed blob behind it.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("default reqwest client configuration is valid");
        Self::with_http_client(http, base_url)
    }

    pub fn with_http_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request.send().await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            #[derive(serde::Deserialize)]
            struct Body {
                status: u16,
                title: String,
                detail: String,
            }

            let status = response.status().as_u16();
            let body: Body = response.json().await.unwrap_or(Body {
                status,
                title: "UNKNOWN".to_string(),
                detail: String::new(),
            });

            Err(error::ErrorImpl::Api {
                status: body.status,
                title: body.title,
                detail: body.detail,
            }
            .into())
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        self.send(self.http.get(self.url(path)).query(query)).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    async fn patch<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send(self.http.patch(self.url(path)).json(body)).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        self.send(self.http.delete(self.url(path)).query(query)).await
    }

    // -- jobs --

    pub async fn create_job(&self, config: JobConfig, user_info: Option<UserInfo>) -> Result<Job> {
        #[derive(Serialize)]
        struct Body {
            config: JobConfig,
            user_info: Option<UserInfo>,
        }
        self.post("/api/jobs", &Body { config, user_info }).await
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let job_id = job_id.to_string();
        let jobs: Vec<Job> = self.get("/api/jobs", &[("job_id", &job_id)]).await?;
        Ok(jobs.into_iter().next())
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.get("/api/jobs", &[]).await
    }

    pub async fn stop_job(&self, job_id: JobId) -> Result<Job> {
        let job_id = job_id.to_string();
        self.delete("/api/jobs", &[("job_id", &job_id)]).await
    }

    // -- tasks --

    #[allow(clippy::too_many_arguments)]
    pub async fn create_task(
        &self,
        job_id: JobId,
        os: Os,
        config: TaskConfig,
        user_info: Option<UserInfo>,
    ) -> Result<Task> {
        #[derive(Serialize)]
        struct Body {
            job_id: JobId,
            os: Os,
            config: TaskConfig,
            user_info: Option<UserInfo>,
        }
        self.post("/api/tasks", &Body { job_id, os, config, user_info }).await
    }

    pub async fn list_tasks_for_job(&self, job_id: JobId) -> Result<Vec<Task>> {
        let job_id = job_id.to_string();
        self.get("/api/tasks", &[("job_id", &job_id)]).await
    }

    pub async fn stop_task(&self, task_id: TaskId) -> Result<Task> {
        let task_id = task_id.to_string();
        self.delete("/api/tasks", &[("task_id", &task_id)]).await
    }

    // -- pools --

    pub async fn create_pool(&self, name: String, os: Os, arch: Architecture, managed: bool) -> Result<Pool> {
        #[derive(Serialize)]
        struct Body {
            name: String,
            os: Os,
            arch: Architecture,
            managed: bool,
        }
        self.post("/api/pool", &Body { name, os, arch, managed }).await
    }

    pub async fn list_pools(&self) -> Result<Vec<Pool>> {
        self.get("/api/pool", &[]).await
    }

    pub async fn set_pool_state(&self, name: String, state: PoolState) -> Result<Pool> {
        #[derive(Serialize)]
        struct Body {
            name: String,
            state: PoolState,
        }
        self.patch("/api/pool", &Body { name, state }).await
    }

    pub async fn delete_pool(&self, name: &str) -> Result<Pool> {
        self.delete("/api/pool", &[("name", name)]).await
    }

    // -- scalesets --

    #[allow(clippy::too_many_arguments)]
    pub async fn create_scaleset(
        &self,
        pool_name: String,
        vm_sku: String,
        image: String,
        region: String,
        size: u32,
        max_size: u32,
        auth: Option<ScalesetAuth>,
    ) -> Result<Scaleset> {
        #[derive(Serialize)]
        struct Body {
            pool_name: String,
            vm_sku: String,
            image: String,
            region: String,
            size: u32,
            max_size: u32,
            tags: BTreeMap<String, String>,
            auth: Option<ScalesetAuth>,
        }
        self.post(
            "/api/scaleset",
            &Body {
                pool_name,
                vm_sku,
                image,
                region,
                size,
                max_size,
                tags: BTreeMap::new(),
                auth,
            },
        )
        .await
    }

    pub async fn list_scalesets_for_pool(&self, pool_name: &str) -> Result<Vec<Scaleset>> {
        self.get("/api/scaleset", &[("pool_name", pool_name)]).await
    }

    pub async fn resize_scaleset(&self, scaleset_id: ScalesetId, size: u32) -> Result<Scaleset> {
        #[derive(Serialize)]
        struct Body {
            scaleset_id: ScalesetId,
            size: u32,
        }
        self.patch("/api/scaleset", &Body { scaleset_id, size }).await
    }

    pub async fn delete_scaleset(&self, scaleset_id: ScalesetId) -> Result<Scaleset> {
        let scaleset_id = scaleset_id.to_string();
        self.delete("/api/scaleset", &[("scaleset_id", &scaleset_id)]).await
    }

    // -- nodes --

    pub async fn list_nodes_in_pool(&self, pool_name: &str) -> Result<Vec<Node>> {
        self.get("/api/node", &[("pool_name", pool_name)]).await
    }

    pub async fn reimage_node(&self, machine_id: MachineId) -> Result<Node> {
        #[derive(Serialize)]
        struct Body {
            machine_id: MachineId,
        }
        self.patch("/api/node", &Body { machine_id }).await
    }

    pub async fn stop_node(&self, machine_id: MachineId) -> Result<Node> {
        #[derive(Serialize)]
        struct Body {
            machine_id: MachineId,
        }
        self.post("/api/node", &Body { machine_id }).await
    }

    pub async fn delete_node(&self, machine_id: MachineId) -> Result<Node> {
        let machine_id = machine_id.to_string();
        self.delete("/api/node", &[("machine_id", &machine_id)]).await
    }

    // -- notifications --

    pub async fn create_notification(
        &self,
        container: String,
        config: NotificationConfig,
        replace_existing: bool,
    ) -> Result<Notification> {
        #[derive(Serialize)]
        struct Body {
            container: String,
            config: NotificationConfig,
            replace_existing: bool,
        }
        self.post(
            "/api/notifications",
            &Body {
                container,
                config,
                replace_existing,
            },
        )
        .await
    }

    pub async fn list_notifications(&self, container: &str) -> Result<Vec<Notification>> {
        self.get("/api/notifications", &[("container", container)]).await
    }

    pub async fn delete_notification(&self, notification_id: NotificationId) -> Result<()> {
        let notification_id = notification_id.to_string();
        self.delete("/api/notifications", &[("notification_id", &notification_id)]).await
    }

    // -- repro --

    pub async fn create_repro(&self, task_id: TaskId, config: ReproConfig) -> Result<Repro> {
        #[derive(Serialize)]
        struct Body {
            task_id: TaskId,
            config: ReproConfig,
        }
        self.post("/api/repro_vms", &Body { task_id, config }).await
    }

    pub async fn list_repro(&self) -> Result<Vec<Repro>> {
        self.get("/api/repro_vms", &[]).await
    }

    pub async fn delete_repro(&self, vm_id: ReproId) -> Result<Repro> {
        let vm_id = vm_id.to_string();
        self.delete("/api/repro_vms", &[("vm_id", &vm_id)]).await
    }

    // -- containers --

    pub async fn create_container(&self, name: String, metadata: BTreeMap<String, String>) -> Result<Container> {
        #[derive(Serialize)]
        struct Body {
            name: String,
            metadata: BTreeMap<String, String>,
        }
        self.post("/api/containers", &Body { name, metadata }).await
    }

    pub async fn delete_container(&self, name: &str) -> Result<()> {
        self.delete("/api/containers", &[("name", name)]).await
    }

    /// Resolves to the signed blob URL the server would redirect a browser
    /// to; does not follow the redirect itself.
    pub async fn download_url(&self, container: &str, filename: &str) -> Result<String> {
        let response = self
            .http
            .get(self.url("/api/download"))
            .query(&[("container", container), ("filename", filename)])
            .send()
            .await?;

        if response.status().is_redirection() {
            if let Some(location) = response.headers().get(reqwest::header::LOCATION) {
                if let Ok(location) = location.to_str() {
                    return Ok(location.to_string());
                }
            }
        }

        Err(error::ErrorImpl::Api {
            status: response.status().as_u16(),
            title: "INVALID_CONTAINER".to_string(),
            detail: format!("no redirect for `{container}/{filename}`"),
        }
        .into())
    }
}
