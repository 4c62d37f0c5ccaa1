use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ensforge_deploy::{CONFIG_FILENAME, DEFAULT_TLD};
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "ensforge")]
#[command(
    author,
    version,
    about = "Deploy and wire an ENS-style naming system in one run"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "ENSFORGE_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy every component of the configuration, then apply its wiring.
    Deploy(DeployArgs),
    /// Print the resolved deployment order and wiring steps without touching a ledger.
    Plan(ConfigArgs),
    /// Write the ENS preset configuration.
    Init(InitArgs),
    /// Print the node of a naming path.
    Namehash {
        /// Dot-separated naming path, e.g. `addr.reverse`.
        path: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Path to an Ensforge.toml file, or to the directory holding it.
    ///
    /// Any value can be overridden with an `ENSFORGE_` environment variable,
    /// nested keys separated by `__` (e.g. `ENSFORGE_NETWORK__RPC_URL`).
    #[arg(long, alias = "conf", env = "ENSFORGE_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Run against an in-memory ledger instead of the configured node.
    #[arg(long, env = "ENSFORGE_SIMULATE")]
    pub simulate: bool,

    /// Override the JSON-RPC endpoint of the configuration.
    #[arg(long, alias = "rpc", env = "ENSFORGE_RPC_URL")]
    pub rpc_url: Option<Url>,
}

#[derive(Debug, Clone, Args)]
pub struct InitArgs {
    /// Top-level domain the registrar controls.
    #[arg(long, env = "ENSFORGE_TLD", default_value = DEFAULT_TLD)]
    pub tld: String,

    /// Where to write the configuration.
    #[arg(long, default_value = CONFIG_FILENAME)]
    pub out: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}
