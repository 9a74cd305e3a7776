use anyhow::Context;
use clap::Parser;
use figment::{
    providers::{Env, Format, Json, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// School records sidecar speaking JSON lines over stdin/stdout.
#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct Args {
    /// Optional JSON config file.
    #[arg(long = "config")]
    pub config_json_path: Option<PathBuf>,
    /// Workspace directory to open on startup.
    #[arg(long)]
    pub workspace: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_level: String,
    /// Default length of top-N report sections.
    pub top_n: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_level: "info".to_string(),
            top_n: 5,
        }
    }
}

impl Config {
    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// Defaults, then the JSON file, then `SCHOOLD_*` env vars; `--workspace` wins over all.
pub fn load(args: &Args) -> anyhow::Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(path) = &args.config_json_path {
        figment = figment.merge(Json::file(path));
    }
    let mut config: Config = figment
        .merge(Env::prefixed("SCHOOLD_"))
        .extract()
        .context("invalid configuration")?;
    if let Some(ws) = &args.workspace {
        config.workspace = Some(ws.clone());
    }
    if config.top_n == 0 {
        anyhow::bail!("top_n must be at least 1");
    }
    Ok(config)
}
