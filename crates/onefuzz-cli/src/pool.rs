use onefuzz_client::OnefuzzClient;
use onefuzz_core::pool::{Architecture, Os};
use tabled::Tabled;

use crate::jobs::print_table;

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Pool {
    /// Create a new pool.
    Create(Create),
    /// List registered pools.
    List(List),
    /// Shut down a pool.
    Delete(Delete),
}

impl Pool {
    pub async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        match self {
            Self::Create(cmd) => cmd.run(client).await,
            Self::List(cmd) => cmd.run(client).await,
            Self::Delete(cmd) => cmd.run(client).await,
        }
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct Create {
    name: String,

    #[arg(long, value_enum)]
    os: OsArg,

    #[arg(long, value_enum, default_value = "x86-64")]
    arch: ArchArg,

    #[arg(long)]
    managed: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OsArg {
    Linux,
    Windows,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ArchArg {
    #[value(name = "x86-64")]
    X86_64,
    Arm64,
}

impl Create {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        let os = match self.os {
            OsArg::Linux => Os::Linux,
            OsArg::Windows => Os::Windows,
        };
        let arch = match self.arch {
            ArchArg::X86_64 => Architecture::X86_64,
            ArchArg::Arm64 => Architecture::Arm64,
        };
        let pool = client.create_pool(self.name, os, arch, self.managed).await?;
        println!("created pool {}", pool.name);
        Ok(())
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct List;

#[derive(Tabled)]
struct PoolRow {
    name: String,
    os: String,
    managed: bool,
    state: String,
}

impl List {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        let pools = client.list_pools().await?;
        let rows: Vec<_> = pools
            .into_iter()
            .map(|p| PoolRow {
                name: p.name.0,
                os: format!("{:?}", p.os).to_lowercase(),
                managed: p.managed,
                state: format!("{:?}", p.state).to_lowercase(),
            })
            .collect();

        print_table(rows);
        Ok(())
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct Delete {
    name: String,
}

impl Delete {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        client.delete_pool(&self.name).await?;
        println!("pool {} is shutting down", self.name);
        Ok(())
    }
}
