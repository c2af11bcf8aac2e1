use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use plugin_bridge::config::BridgeConfig;
use plugin_bridge::plugins::registry::{SessionRegistry, Theme};
use plugin_bridge::plugins::traits::PluginDescriptor;

/// Operator tooling for the plugin iframe bridge.
#[derive(Parser, Debug)]
#[command(name = "plugin-bridge", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the JSON schema of the bridge config file
    Schema,
    /// Load and validate a bridge config file
    CheckConfig {
        path: PathBuf,
    },
    /// Mint a session for a plugin URL and print its mount attributes
    Mount {
        /// Plugin URL, scheme optional
        #[arg(long)]
        url: String,
        /// Plugin id echoed in responses
        #[arg(long, default_value = "local-plugin")]
        id: String,
        /// Mount with the dark theme
        #[arg(long)]
        dark: bool,
        /// Bridge config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Schema => {
            println!("{}", BridgeConfig::json_schema()?);
        }
        Command::CheckConfig { path } => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            let config = BridgeConfig::load(&path)?;
            println!("{} is valid", path.display());
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Mount {
            url,
            id,
            dark,
            config,
        } => {
            let config = match config {
                Some(path) => BridgeConfig::load(&path)?,
                None => BridgeConfig::default(),
            };
            let registry = SessionRegistry::new(config.session, config.rate_limits);
            let descriptor = PluginDescriptor {
                id,
                community_id: String::new(),
                url,
                config: Default::default(),
                permissions: Default::default(),
                accepted_permissions: None,
            };
            let theme = if dark { Theme::Dark } else { Theme::Light };
            let info = registry.load(descriptor, theme)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }
    Ok(())
}
