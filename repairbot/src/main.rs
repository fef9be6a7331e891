use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
use cli::commands::{self, Session};
use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Parse CLI arguments first to get verbosity level
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,repairbot=info,repairbot_core=info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Init(args) => commands::init::execute(cli.config.as_ref(), args),
        command => {
            let session = Session::open(cli.config.as_ref(), &cli.user)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run(&session, command))
        }
    }
}

async fn run(session: &Session, command: Commands) -> Result<()> {
    debug!("Command: {:?}", command);

    match command {
        Commands::Scan(args) => commands::scan::execute(session, args).await,
        Commands::Fix(args) => commands::fix::execute(session, args).await,
        Commands::Dismiss(args) => commands::fix::dismiss(session, args).await,
        Commands::History => commands::history::execute(session).await,
        Commands::Show(args) => commands::history::show(session, args).await,
        Commands::Profile(command) => commands::profile::execute(session, command).await,
        Commands::Init(_) => unreachable!("init runs before a session is opened"),
    }
}
