//! Core application

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

use crate::api::PubSubGrpcServer;
use crate::bus::{Bus, BusConfig};
use crate::core::cli;
use crate::core::config::{AppConfig, LogEnv};
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;

pub struct CoreApp {
    pub config: AppConfig,
    pub bus: Arc<Bus>,
    pub shutdown: ShutdownService,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();

        let cli_config = cli::parse();
        let config = AppConfig::load(&cli_config)?;
        Self::init_logging(&config)?;

        tracing::debug!(
            addr = %config.grpc.addr,
            port = config.grpc.port,
            subject_buffer = config.sub_pub.subject_buffer,
            subscription_buffer = config.sub_pub.subscription_buffer,
            close_timeout_secs = config.sub_pub.close_timeout.as_secs(),
            log_env = %config.log.env,
            "Configuration loaded"
        );

        let app = Self::init(config);
        app.start_server().await
    }

    fn init(config: AppConfig) -> Self {
        let bus = Arc::new(Bus::new(BusConfig {
            subject_buffer: config.sub_pub.subject_buffer,
            subscription_buffer: config.sub_pub.subscription_buffer,
        }));
        let shutdown = ShutdownService::new();

        Self {
            config,
            bus,
            shutdown,
        }
    }

    fn init_logging(config: &AppConfig) -> Result<()> {
        let default_level = match config.log.env {
            LogEnv::Local | LogEnv::Dev => "debug",
            LogEnv::Prod => "info",
        };
        let default_filter = format!("info,relay_server={}", default_level);
        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        match &config.log.file {
            Some(dir) => {
                let writer = Arc::new(create_log_file(dir)?);
                match config.log.env {
                    LogEnv::Local => tracing_subscriber::fmt()
                        .with_target(false)
                        .with_ansi(false)
                        .with_env_filter(filter)
                        .compact()
                        .with_writer(writer)
                        .init(),
                    LogEnv::Dev | LogEnv::Prod => tracing_subscriber::fmt()
                        .with_target(false)
                        .with_env_filter(filter)
                        .json()
                        .with_writer(writer)
                        .init(),
                }
            }
            None => match config.log.env {
                LogEnv::Local => tracing_subscriber::fmt()
                    .with_target(false)
                    .with_ansi(true)
                    .with_env_filter(filter)
                    .compact()
                    .init(),
                LogEnv::Dev | LogEnv::Prod => tracing_subscriber::fmt()
                    .with_target(false)
                    .with_env_filter(filter)
                    .json()
                    .init(),
            },
        }

        Ok(())
    }

    async fn start_server(self) -> Result<()> {
        // Install signal handlers first so a fast Ctrl+C is not lost.
        self.shutdown.install_signal_handlers();

        let server = PubSubGrpcServer::new(
            &self.config.grpc,
            Arc::clone(&self.bus),
            self.shutdown.subscribe(),
        )
        .context("Failed to configure gRPC server")?;

        let shutdown = self.shutdown.clone();
        let server_task = tokio::spawn(async move {
            let result = server.start().await;
            // Unblock the main task when the server fails on its own.
            shutdown.trigger();
            result
        });

        self.shutdown.wait().await;

        tracing::info!("Stopping gRPC server");
        let server_result = server_task.await.context("gRPC server task panicked")?;
        tracing::info!("gRPC server stopped");

        tracing::info!("Closing the bus");
        match self.bus.close(self.config.sub_pub.close_timeout).await {
            Ok(()) => tracing::info!("Bus closed"),
            Err(e) => tracing::error!(error = %e, "Failed to close the bus cleanly"),
        }

        tracing::info!("App shutdown");
        server_result
    }
}

fn create_log_file(dir: &str) -> Result<std::fs::File> {
    let dir = Path::new(dir);
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    }

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = dir.join(format!("{APP_NAME_LOWER}-{stamp}.log"));

    std::fs::File::create(&path)
        .with_context(|| format!("Failed to create log file: {}", path.display()))
}
