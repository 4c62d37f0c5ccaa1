//! ensforge deploys an ENS-style naming system and wires its naming tree in one run.

mod cli;
mod output;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use tokio_util::sync::CancellationToken;

use cli::{Cli, Command, ConfigArgs, DeployArgs, InitArgs};
use ensforge_deploy::{
    ArtifactStore, DeploymentConfig, Ledger, OrchestrationPlan, Orchestrator,
    PricingConfig, RpcLedger, RunSettings, SimulatedLedger, namehash,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Deploy(args) => deploy(args).await,
        Command::Plan(args) => plan(&args),
        Command::Init(args) => init(&args),
        Command::Namehash { path } => {
            let label = path.split(namehash::LABEL_DELIMITER).next().unwrap_or_default();
            println!("node:      {}", namehash::path_hash(&path));
            println!("labelhash: {} ({label})", namehash::label_hash(label));
            Ok(())
        }
    }
}

/// Load the configuration file and apply `ENSFORGE_` environment overrides.
///
/// A relative `artifacts_dir` is resolved against the configuration's directory.
fn load_config(args: &ConfigArgs) -> Result<DeploymentConfig> {
    let path = DeploymentConfig::config_path(&args.config);
    let file = DeploymentConfig::load_from_file(&args.config)
        .context("Failed to load configuration (run `ensforge init` to create one)")?;

    let mut config: DeploymentConfig = Figment::from(Serialized::defaults(file))
        .merge(Env::prefixed("ENSFORGE_").split("__"))
        .extract()
        .context("Failed to apply ENSFORGE_ environment overrides")?;

    if config.artifacts_dir.is_relative() {
        let base = path.parent().unwrap_or(Path::new("."));
        config.artifacts_dir = base.join(&config.artifacts_dir);
    }

    tracing::debug!(
        path = %path.display(),
        components = config.components.len(),
        wiring_steps = config.wiring.len(),
        "Configuration resolved"
    );
    Ok(config)
}

async fn deploy(args: DeployArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(rpc_url) = args.rpc_url {
        config.network.rpc_url = rpc_url;
    }

    let plan = config.plan().context("Invalid deployment plan")?;
    let settings = config.run_settings();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Received Ctrl+C, cancelling the run...");
                cancel.cancel();
            }
        }
    });

    if args.simulate {
        tracing::info!(deployer = %config.network.deployer, "Running against a simulated ledger");
        return run(SimulatedLedger::new(config.network.deployer), plan, settings, cancel).await;
    }

    let ledger = RpcLedger::new(
        config.network.rpc_url.clone(),
        config.network.deployer,
        ArtifactStore::new(&config.artifacts_dir),
    )?
    .poll_interval(config.confirmation.poll_interval());

    let chain_id = ledger.chain_id().await?;
    if let Some(expected) = config.network.chain_id {
        anyhow::ensure!(
            chain_id == expected,
            "Node at {} reports chain id {chain_id}, configuration expects {expected}",
            config.network.rpc_url
        );
    }

    tracing::info!(
        rpc_url = %config.network.rpc_url,
        chain_id,
        deployer = %config.network.deployer,
        artifacts_dir = %config.artifacts_dir.display(),
        "Running against node"
    );
    run(ledger, plan, settings, cancel).await
}

async fn run<L: Ledger>(
    ledger: L,
    plan: OrchestrationPlan,
    settings: RunSettings,
    cancel: CancellationToken,
) -> Result<()> {
    let orchestrator = Orchestrator::new(ledger, plan)
        .settings(settings)
        .with_cancellation(cancel);

    match orchestrator.run().await {
        Ok(report) => {
            println!("{}", output::resources_table(&report));
            if !report.assignments.is_empty() {
                println!("{}", output::assignments_table(&report));
            }
            Ok(())
        }
        Err(failure) => {
            if let Some(tx_hash) = failure.pending {
                eprintln!("Unconfirmed transaction: {tx_hash} (check it on the node before re-running)");
            }
            eprintln!("Partial progress:");
            eprintln!("{}", output::resources_table(&failure.report));
            if !failure.report.assignments.is_empty() {
                eprintln!("{}", output::assignments_table(&failure.report));
            }
            Err((*failure).into())
        }
    }
}

fn plan(args: &ConfigArgs) -> Result<()> {
    let config = load_config(args)?;
    let plan = config.plan().context("Invalid deployment plan")?;

    println!("{}", output::plan_table(&plan));
    if !plan.wiring().is_empty() {
        println!("{}", output::wiring_table(&plan));
    }
    Ok(())
}

fn init(args: &InitArgs) -> Result<()> {
    let path = DeploymentConfig::config_path(&args.out);
    if path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }

    let config = DeploymentConfig::ens_preset(&args.tld, &PricingConfig::default());
    let path = if args.out.is_dir() {
        config.save_config(&args.out)?
    } else {
        config.save_to_file(&path)?;
        path
    };
    println!("Wrote {}", path.display());
    Ok(())
}
