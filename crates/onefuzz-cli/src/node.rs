use onefuzz_client::OnefuzzClient;
use onefuzz_core::ids::MachineId;
use tabled::Tabled;

use crate::jobs::print_table;

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Node {
    /// List the nodes registered to a pool.
    List(List),
    /// Flag a node to reimage the next time it goes idle.
    Reimage(Reimage),
    /// Ask a node to stop whatever it is running and return to ready.
    Stop(Stop),
    /// Flag a node for deletion.
    Delete(Delete),
}

impl Node {
    pub async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        match self {
            Self::List(cmd) => cmd.run(client).await,
            Self::Reimage(cmd) => cmd.run(client).await,
            Self::Stop(cmd) => cmd.run(client).await,
            Self::Delete(cmd) => cmd.run(client).await,
        }
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct List {
    pool_name: String,
}

#[derive(Tabled)]
struct NodeRow {
    machine_id: String,
    version: String,
    state: String,
    heartbeat: String,
}

impl List {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        let nodes = client.list_nodes_in_pool(&self.pool_name).await?;
        let rows: Vec<_> = nodes
            .into_iter()
            .map(|n| NodeRow {
                machine_id: n.machine_id.to_string(),
                version: n.version,
                state: format!("{:?}", n.state).to_lowercase(),
                heartbeat: n
                    .heartbeat
                    .map(|h| h.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string()),
            })
            .collect();

        print_table(rows);
        Ok(())
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct Reimage {
    machine_id: MachineId,
}

impl Reimage {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        client.reimage_node(self.machine_id).await?;
        println!("node {} flagged for reimage", self.machine_id);
        Ok(())
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct Stop {
    machine_id: MachineId,
}

impl Stop {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        client.stop_node(self.machine_id).await?;
        println!("sent stop command to node {}", self.machine_id);
        Ok(())
    }
}

#[derive(Debug, clap::Args)]
pub(crate) struct Delete {
    machine_id: MachineId,
}

impl Delete {
    async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        client.delete_node(self.machine_id).await?;
        println!("node {} flagged for deletion", self.machine_id);
        Ok(())
    }
}

/// Print the signed download URL for a blob in a container.
#[derive(Debug, clap::Args)]
pub(crate) struct Download {
    container: String,
    filename: String,
}

impl Download {
    pub async fn run(self, client: &OnefuzzClient) -> anyhow::Result<()> {
        let url = client.download_url(&self.container, &self.filename).await?;
        println!("{url}");
        Ok(())
    }
}
