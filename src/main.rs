//! Stackup - a declarative orchestrator for local multi-tier web stacks
//!
//! This is the main CLI entry point for stackup.

use anyhow::Context;
use clap::{Parser, Subcommand};
use stackup::image::ImageStore;
use stackup::process::ProcessManager;
use stackup::stack::{StackConfig, StackOrchestrator, StackParser};
use stackup::storage::VolumeManager;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Stackup - declarative local stack orchestrator
#[derive(Parser)]
#[command(name = "stackup")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Bring up a multi-tier web stack from a declarative descriptor", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build images, create volumes, and start services in dependency order
    Up {
        /// Stack descriptor file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Run in detached mode
        #[arg(short, long)]
        detach: bool,
        /// Rebuild images before starting
        #[arg(long)]
        build: bool,
    },

    /// Stop services in reverse dependency order
    Down {
        /// Stack descriptor file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Remove named volumes
        #[arg(short, long)]
        volumes: bool,
    },

    /// List services declared in the stack
    Ps {
        /// Stack descriptor file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Validate and print the resolved descriptor
    Config {
        /// Stack descriptor file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Build or rebuild service images
    Build {
        /// Stack descriptor file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Service name
        service: Option<String>,
    },

    /// Manage volumes
    Volume {
        #[command(subcommand)]
        command: VolumeCommands,
    },
}

#[derive(Subcommand)]
enum VolumeCommands {
    /// List volumes
    #[command(name = "ls")]
    List,
    /// Remove a volume
    #[command(name = "rm")]
    Remove {
        /// Volume name
        volume: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Get base path for stackup data
    let base_path = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("stackup");

    let processes = Arc::new(ProcessManager::new(base_path.join("processes"))?);
    let images = Arc::new(ImageStore::new());
    let volumes = Arc::new(VolumeManager::new(base_path.join("volumes"))?);

    match cli.command {
        Commands::Up { file, detach, build } => {
            let working_dir = std::env::current_dir()?;
            let (config, project_name) = load_stack(file, &working_dir)?;

            let mut orchestrator = StackOrchestrator::new(
                &project_name,
                config,
                processes,
                images,
                volumes,
                working_dir,
            )?;

            orchestrator.up(build).await?;

            println!("{:<24} {:<12} {:<16}", "SERVICE", "STATUS", "ADDRESS");
            for state in orchestrator.status().values() {
                let address = state
                    .address
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<24} {:<12} {:<16}", state.name, state.status.to_string(), address);
            }

            if !detach {
                tracing::info!(
                    "Project {} is running (attached mode not implemented)",
                    project_name
                );
            }
        }

        Commands::Down { file, volumes: remove_volumes } => {
            let working_dir = std::env::current_dir()?;
            let (config, project_name) = load_stack(file, &working_dir)?;

            let mut orchestrator = StackOrchestrator::new(
                &project_name,
                config,
                processes,
                images,
                volumes,
                working_dir,
            )?;

            orchestrator.down(remove_volumes).await?;
            println!("Stopped project {}", project_name);
        }

        Commands::Ps { file } => {
            let working_dir = std::env::current_dir()?;
            let (config, _) = load_stack(file, &working_dir)?;

            println!("{:<16} {:<28} {:<20}", "SERVICE", "IMAGE", "PORTS");
            for (name, service) in &config.services {
                let image = service.image.clone().unwrap_or_else(|| "(build)".to_string());
                let ports = service.ports.clone().unwrap_or_default().join(", ");
                println!("{:<16} {:<28} {:<20}", name, image, ports);
            }
        }

        Commands::Config { file } => {
            let working_dir = std::env::current_dir()?;
            let (config, _) = load_stack(file, &working_dir)?;

            for warning in StackParser::validate(&config)? {
                println!("Warning: {}", warning);
            }

            let rendered = serde_yaml::to_string(&config)
                .map_err(|e| stackup::StackupError::Yaml(e.to_string()))?;
            println!("{}", rendered);
        }

        Commands::Build { file, service } => {
            let working_dir = std::env::current_dir()?;
            let (config, project_name) = load_stack(file, &working_dir)?;

            let orchestrator = StackOrchestrator::new(
                &project_name,
                config,
                processes,
                images,
                volumes,
                working_dir,
            )?;

            orchestrator.build_images(service.as_deref()).await?;
        }

        Commands::Volume { command } => match command {
            VolumeCommands::List => {
                println!("{:<20} {:<12} MOUNTPOINT", "VOLUME NAME", "SIZE");
                for volume in volumes.list()? {
                    println!(
                        "{:<20} {:<12} {}",
                        volume.name,
                        volume.size()?,
                        volume.mountpoint.display()
                    );
                }
            }
            VolumeCommands::Remove { volume } => {
                volumes.remove(&volume)?;
                println!("{}", volume);
            }
        },
    }

    Ok(())
}

/// Locate, parse, and interpolate the stack descriptor
fn load_stack(
    file: Option<PathBuf>,
    working_dir: &Path,
) -> anyhow::Result<(StackConfig, String)> {
    let descriptor = file
        .or_else(|| StackParser::find_stack_file(working_dir))
        .context("No stack descriptor found (expected stackup.yaml or compose.yaml)")?;

    let mut config = StackParser::parse_file(&descriptor)?;

    let env: HashMap<String, String> = std::env::vars().collect();
    StackParser::interpolate(&mut config, &env);

    let project_name = config.name.clone().unwrap_or_else(|| {
        working_dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("default")
            .to_string()
    });

    Ok((config, project_name))
}
