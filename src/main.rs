use clap::Parser;
use entity_cache::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Demo(args) => cli::demo::run(args).await,
    }
}
