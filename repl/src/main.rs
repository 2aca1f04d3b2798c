use clap::Parser;
use shellpilot_repl::Cli;
use shellpilot_repl::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_main(cli).await?;

    Ok(())
}
