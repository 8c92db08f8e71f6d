use clap::Parser;

use std::path::PathBuf;

use super::config::LogEnv;
use super::constants::{ENV_ADDR, ENV_CONFIG, ENV_LOG_ENV, ENV_PORT};

#[derive(Parser)]
#[command(name = "relay")]
#[command(version, about = "Publish/subscribe streaming server", long_about = None)]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(long, short = 'c', env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Bind address override
    #[arg(long, env = ENV_ADDR)]
    pub addr: Option<String>,

    /// Bind port override
    #[arg(long, short = 'p', env = ENV_PORT)]
    pub port: Option<u16>,

    /// Log profile override (local, dev or prod)
    #[arg(long, env = ENV_LOG_ENV, value_parser = parse_log_env)]
    pub log_env: Option<LogEnv>,
}

/// CLI configuration handed to config loading
#[derive(Debug)]
pub struct CliConfig {
    pub config: Option<PathBuf>,
    pub addr: Option<String>,
    pub port: Option<u16>,
    pub log_env: Option<LogEnv>,
}

pub fn parse() -> CliConfig {
    let cli = Cli::parse();
    CliConfig {
        config: cli.config,
        addr: cli.addr,
        port: cli.port,
        log_env: cli.log_env,
    }
}

/// Parse log profile from CLI/env string
fn parse_log_env(s: &str) -> Result<LogEnv, String> {
    match s.to_lowercase().as_str() {
        "local" => Ok(LogEnv::Local),
        "dev" => Ok(LogEnv::Dev),
        "prod" => Ok(LogEnv::Prod),
        _ => Err(format!(
            "Invalid log profile '{}'. Valid options: local, dev, prod",
            s
        )),
    }
}
