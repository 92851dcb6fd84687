use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use tenant_cloud::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Tenant Cloud Orchestrator",
    about = "Provision, inspect, and secure isolated tenant instances from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and its background provisioning worker (default command)
    Serve(ServeArgs),
    /// Run one certificate sweep pass: re-enqueue issuance for every
    /// provisioned subscription whose certificate is pending or failed
    Sweep,
    /// Run a scripted end-to-end provisioning pass against in-memory adapters
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sweep => server::run_sweep().await,
        Command::Demo(args) => run_demo(args).await,
    }
}
