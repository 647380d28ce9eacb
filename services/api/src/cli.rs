use crate::demo::{run_demo, run_pass, DemoArgs, PassArgs};
use crate::server;
use cadence::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Collection Cadence Scheduler",
    about = "Run and exercise the collection cadence scheduler from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service with the periodic evaluation loop (default)
    Serve(ServeArgs),
    /// Run a single evaluation pass and print the report
    Pass(PassArgs),
    /// Walk a demo portfolio through a full cadence, day by day
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
    /// Directory with companies.csv, rules.csv and debts.csv. Uses the
    /// built-in demo portfolio when omitted.
    #[arg(long)]
    pub(crate) data_dir: Option<std::path::PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Pass(args) => run_pass(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}
