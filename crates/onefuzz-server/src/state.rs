use std::sync::Arc;

use onefuzz_runtime::store::Store;
use onefuzz_runtime::{Config, WorkerHandle};

use crate::secret::EnvSecretResolver;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub secrets: Arc<EnvSecretResolver>,
    pub worker: Arc<WorkerHandle>,
}
