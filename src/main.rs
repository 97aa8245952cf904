mod cli;
mod clients;
mod config;
mod engine;
mod model;
mod util;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use clients::ado::AdoClient;
use clients::gitlab::GitLabClient;
use engine::store::IdentityMap;
use engine::Migrator;

#[tokio::main]
async fn main() -> Result<()> {
    // Controlled via RUST_LOG, e.g. RUST_LOG=ado2gitlab=debug.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ado2gitlab=info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let parsed = cli::parse_args(&args)?;
    if parsed.show_help {
        cli::print_help();
        return Ok(());
    }

    tracing::info!("--- Starting ADO to GitLab migration ---");
    // Everything up to the run itself is setup-fatal: a bad config file,
    // failed authentication, or a missing project exits non-zero. Per-item
    // failures during the run are logged and counted instead.
    let cfg = config::load_config(parsed.config.as_deref())?;

    let source = AdoClient::connect(&cfg.source).await?;
    let target = GitLabClient::connect(&cfg.target).await?;

    let store = IdentityMap::load(cfg.map_file_path());
    tracing::info!(
        "Loaded {} existing ADO-GitLab mappings from {}.",
        store.len(),
        cfg.map_file_path().display()
    );

    let summary = Migrator::new(&cfg, &source, &target, store).run().await?;

    tracing::info!("--- Migration finished ---");
    println!("{summary}");
    Ok(())
}
