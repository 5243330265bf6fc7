use onefuzz_client::OnefuzzClient;
use onefuzz_core::ids::JobId;
use onefuzz_core::job::JobConfig;
use tabled::settings::formatting::AlignmentStrategy;
use tabled::settings::object::Segment;
use tabled::settings::{Alignment, Margin, Modify, Padding, Style};
use tabled::{Table, Tabled};

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Jobs {
    /// Create a new job.
    Create(Create),
    /// List non-terminal jobs.
    List(List),
    /// Stop a job, and the tasks running under it.
    Stop(Stop),
}

impl Jobs {
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
    project: String,
    name: String,
    build: String,
    /// Duration of the job, in hours.
    #[arg(long, default_value_t = 24)]
    duration: u32,
}

impl Create {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        let config = JobConfig {
            project: self.project,
            name: self.name,
            build: self.build,
            duration: self.duration,
            logs: None,
        };
        let job = client.create_job(config, None).await?;
        println!("created job {}", job.job_id);
        Ok(())
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct List;

#[derive(Tabled)]
struct JobRow {
    job_id: String,
    project: String,
    name: String,
    build: String,
    state: String,
}

impl List {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        let jobs = client.list_jobs().await?;
        let rows: Vec<_> = jobs
            .into_iter()
            .map(|j| JobRow {
                job_id: j.job_id.to_string(),
                project: j.config.project,
                name: j.config.name,
                build: j.config.build,
                state: format!("{:?}", j.state).to_lowercase(),
            })
            .collect();

        print_table(rows);
        Ok(())
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct Stop {
    job_id: JobId,
}

impl Stop {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        let job = client.stop_job(self.job_id).await?;
        println!("job {} is now {:?}", job.job_id, job.state);
        Ok(())
    }
}

pub(crate) fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table
        .with(
            Modify::new(Segment::all())
                .with(Alignment::left())
                .with(AlignmentStrategy::PerLine),
        )
        .with(Style::blank())
        .with(Margin::new(0, 0, 0, 0))
        .with(Padding::new(0, 0, 0, 0));

    println!("{table}");
}
