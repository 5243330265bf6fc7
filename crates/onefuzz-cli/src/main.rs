//! Operator CLI for a fuzzing work-scheduling cluster.

use clap::Parser;
use onefuzz_client::OnefuzzClient;
use tracing_subscriber::prelude::*;

mod jobs;
mod node;
mod pool;
mod tasks;

#[derive(Debug, clap::Parser)]
struct Args {
    #[command(flatten)]
    common: CommonOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    #[command(subcommand)]
    Jobs(self::jobs::Jobs),
    #[command(subcommand)]
    Tasks(self::tasks::Tasks),
    #[command(subcommand)]
    Pool(self::pool::Pool),
    #[command(subcommand)]
    Node(self::node::Node),
    Download(self::node::Download),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let client = OnefuzzClient::new(args.common.server_url);

    match args.command {
        Commands::Jobs(cmd) => cmd.run(&client).await,
        Commands::Tasks(cmd) => cmd.run(&client).await,
        Commands::Pool(cmd) => cmd.run(&client).await,
        Commands::Node(cmd) => cmd.run(&client).await,
        Commands::Download(cmd) => cmd.run(&client).await,
    }
}

#[derive(Debug, clap::Args)]
struct CommonOptions {
    #[arg(long, env = "ONEFUZZ_SERVER_URL", default_value = "http://localhost:8080")]
    server_url: String,
}
