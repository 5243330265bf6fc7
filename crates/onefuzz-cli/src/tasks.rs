use anyhow::Context;
use onefuzz_client::OnefuzzClient;
use onefuzz_core::ids::{JobId, TaskId};
use onefuzz_core::pool::Os;
use onefuzz_core::task::TaskConfig;
use tabled::Tabled;

use crate::jobs::print_table;

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Tasks {
    /// Create a new task under an existing job.
    Create(Create),
    /// List the tasks belonging to a job.
    List(List),
    /// Stop a task.
    Stop(Stop),
}

impl Tasks {
    pub async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        match self {
            Self::Create(cmd) => cmd.run(client).await,
            Self::List(cmd) => cmd.run(client).await,
            Self::Stop(cmd) => cmd.run(client).await,
        }
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct Create {
    job_id: JobId,

    #[arg(long, value_enum)]
    os: OsArg,

    /// Full task configuration as JSON (containers, pool, task details).
    #[arg(long)]
    config: String,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OsArg {
    Linux,
    Windows,
}

impl From<OsArg> for Os {
    fn from(value: OsArg) -> Self {
        match value {
            OsArg::Linux => Os::Linux,
            OsArg::Windows => Os::Windows,
        }
    }
}

impl Create {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        let config: TaskConfig =
            serde_json::from_str(&self.config).context("provided task config was not valid json")?;
        let task = client.create_task(self.job_id, self.os.into(), config, None).await?;
        println!("created task {}", task.task_id);
        Ok(())
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct List {
    job_id: JobId,
}

#[derive(Tabled)]
struct TaskRow {
    task_id: String,
    kind: String,
    state: String,
}

impl List {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        let tasks = client.list_tasks_for_job(self.job_id).await?;
        let rows: Vec<_> = tasks
            .into_iter()
            .map(|t| TaskRow {
                task_id: t.task_id.to_string(),
                kind: t.config.task.kind,
                state: format!("{:?}", t.state).to_lowercase(),
            })
            .collect();

        print_table(rows);
        Ok(())
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct Stop {
    task_id: TaskId,
}

impl Stop {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        let task = client.stop_task(self.task_id).await?;
        println!("task {} is now {:?}", task.task_id, task.state);
        Ok(())
    }
}
