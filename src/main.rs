use clap::Parser;
use rcluster::adapter::inbound::cli::{self, command::Cli, output};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    output::configure(output::OutputConfig::new(cli.json, cli.quiet, cli.verbose));

    if let Err(e) = cli::execute(&cli.command).await {
        output::error(&e.to_string());
        std::process::exit(1);
    }
}
