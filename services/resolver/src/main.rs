//! image-resolver
//!
//! Makes container images available in the local Docker image store,
//! pulling only what the chosen pull policy requires.
//!
//! ## Commands
//!
//! - `resolve <image>...`: resolve each image concurrently against one shared
//!   availability cache and print the canonical references
//! - `inspect <image>`: print what the local store knows about an image

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imgres_resolver::config::Config;
use imgres_resolver::image::{
    DockerEngineTransport, ImageAvailabilityCache, ImageResolver, ImageTransport, PullPolicyKind,
};
use imgres_resolver::ImageReference;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "image-resolver", version, about)]
struct Cli {
    /// Docker daemon socket (overrides IMGRES_DOCKER_SOCKET).
    #[arg(long, global = true)]
    socket: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ensure images are available locally.
    Resolve {
        /// Image references, e.g. `library/redis:7`.
        #[arg(required = true)]
        images: Vec<String>,

        /// Pull policy: always, if-absent or max-age:<seconds>.
        #[arg(long)]
        policy: Option<PullPolicyKind>,

        /// Wall-clock budget in seconds for pulling each image.
        #[arg(long)]
        retry_secs: Option<u64>,
    },

    /// Show local store metadata for an image.
    Inspect {
        image: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    if let Some(socket) = cli.socket {
        config.docker_socket = socket;
    }

    if let Err(e) = run(cli.command, config).await {
        error!(error = %format!("{e:#}"), "image-resolver failed");
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run(command: Command, mut config: Config) -> Result<()> {
    let transport = Arc::new(DockerEngineTransport::new(&config.docker_socket));

    match command {
        Command::Resolve {
            images,
            policy,
            retry_secs,
        } => {
            if let Some(policy) = policy {
                config.pull_policy = policy;
            }
            if let Some(secs) = retry_secs {
                config.pull_retry_budget = Duration::from_secs(secs);
            }

            info!(
                socket = %config.docker_socket,
                policy = %config.pull_policy,
                retry_budget_secs = config.pull_retry_budget.as_secs(),
                "Resolving {} image(s)",
                images.len()
            );

            let cache = Arc::new(ImageAvailabilityCache::new());
            let resolver = ImageResolver::new(transport, cache, config.resolver_config());
            let policy = config.pull_policy;

            let results = futures_util::future::join_all(
                images
                    .iter()
                    .map(|image| resolver.resolve_str(image, &policy)),
            )
            .await;

            let mut first_error = None;
            for (image, result) in images.iter().zip(results) {
                match result {
                    Ok(canonical) => println!("{canonical}"),
                    Err(e) => {
                        error!(image = %image, error = %e, "Failed to resolve image");
                        first_error.get_or_insert(e);
                    }
                }
            }

            match first_error {
                Some(e) => Err(e.into()),
                None => Ok(()),
            }
        }
        Command::Inspect { image } => {
            let reference = ImageReference::parse(&image)?;
            let metadata = transport
                .inspect(&reference)
                .await
                .with_context(|| format!("inspecting {reference}"))?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(())
        }
    }
}
