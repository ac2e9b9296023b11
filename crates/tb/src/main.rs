//! `team-bot`: relays outside conversations to a verified crew on Delta Chat.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use tb_core::{config::Config, router::Relay, setup, store::RelayStore};
use tb_rpc::RpcTransport;

#[derive(Parser, Debug)]
#[command(name = "team-bot", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configure the bot account and create a new crew.
    Init {
        /// Email address of the bot account.
        #[arg(long, env = "TEAMS_INIT_EMAIL")]
        email: String,
        /// Password of the bot account.
        #[arg(long, env = "TEAMS_INIT_PASSWORD", hide_env_values = true)]
        password: String,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Relay messages until interrupted.
    Run {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Data directory holding the account and the relay store.
    #[arg(long, env = "TEAMS_DB", default_value = "bot.db")]
    db: PathBuf,
    /// Show more logs (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init {
            email,
            password,
            common,
        } => {
            tb_core::logging::init("team_bot", common.verbose)?;
            init(&common.db, &email, &password).await
        }
        Commands::Run { common } => {
            tb_core::logging::init("team_bot", common.verbose)?;
            run(&common.db).await
        }
    }
}

async fn start(cfg: &Config) -> anyhow::Result<(Arc<RpcTransport>, Arc<RelayStore>)> {
    let transport = RpcTransport::spawn(&cfg.rpc_server_path, &cfg.accounts_dir)
        .await
        .with_context(|| format!("starting {}", cfg.rpc_server_path.display()))?;
    let store = RelayStore::open(&cfg.store_path)
        .with_context(|| format!("opening {}", cfg.store_path.display()))?;
    Ok((Arc::new(transport), Arc::new(store)))
}

async fn init(db: &Path, email: &str, password: &str) -> anyhow::Result<()> {
    let cfg = Config::load(db)?;
    let (transport, store) = start(&cfg).await?;

    transport.configure(email, password).await?;
    transport.prepare_bot().await?;
    transport.start_io().await?;

    let shutdown = CancellationToken::new();
    let mut events = transport.events(shutdown.clone());
    let result = setup::init_crew(
        transport.clone(),
        store,
        &mut events,
        cfg.delivery,
        |invite| {
            println!("Scan this invite to join the crew:\n\n{invite}\n");
        },
    )
    .await;

    shutdown.cancel();
    transport.shutdown().await?;
    let crew = result?;
    println!("Crew {crew} is ready. Start relaying with `team-bot run`.");
    Ok(())
}

async fn run(db: &Path) -> anyhow::Result<()> {
    let cfg = Config::load(db)?;
    let (transport, store) = start(&cfg).await?;
    if !transport.is_configured().await? {
        anyhow::bail!("account is not configured yet; run `team-bot init` first");
    }
    transport.prepare_bot().await?;
    transport.start_io().await?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
            }
            shutdown.cancel();
        });
    }

    let events = transport.events(shutdown.clone());
    let relay = Relay::new(
        transport.clone(),
        store,
        cfg.delivery,
        shutdown.clone(),
    );
    let result = relay.run(events, shutdown.clone()).await;

    shutdown.cancel();
    transport.shutdown().await?;
    result.context("relay bot failed")
}
