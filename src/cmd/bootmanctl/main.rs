use anyhow::Context;
use bootman::internal::{
    engine::{manager::BootManager, request::OperationRequest},
    system::Mode,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bootmanctl")]
#[command(about = "Kernel and bootloader management", long_about = None)]
struct Cli {
    /// Root of the system to manage
    #[arg(short, long, default_value = "/")]
    path: PathBuf,

    /// Treat the root as an offline image, even when it is `/`
    #[arg(short, long)]
    image: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write boot entries for every kernel and bring the bootloader up to date
    Update,
    /// Install the bootloader payload
    InstallBootloader,
    /// Update the installed bootloader payload
    UpdateBootloader {
        /// Rewrite the payload even if it already matches
        #[arg(long)]
        force: bool,
    },
    /// Remove the bootloader payload
    RemoveBootloader,
    /// Report whether the installed bootloader differs from its source
    NeedsUpdate,
    /// List kernels found in the root
    ListKernels {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Set the boot menu timeout in seconds, 0 to clear it
    SetTimeout {
        seconds: u32,
    },
    /// Print the boot menu timeout
    GetTimeout,
}

// Only the live root itself runs natively; `//` and `/.` name it too.
fn mode_for(path: &Path, image: bool) -> Mode {
    if image {
        return Mode::Image;
    }
    match path.canonicalize() {
        Ok(resolved) if resolved == Path::new("/") => Mode::Native,
        _ => Mode::Image,
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bootman=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mode = mode_for(&cli.path, cli.image);
    let manager = BootManager::open(&cli.path, mode)
        .with_context(|| format!("Cannot manage {}", cli.path.display()))?;

    match cli.command {
        Commands::Update => {
            let report = manager.update().context("Update failed")?;
            println!(
                "Default kernel: {} ({} kernels, {} files written, {} removed)",
                report.default, report.kernels, report.files_written, report.files_removed
            );
        }
        Commands::InstallBootloader => {
            manager
                .modify_bootloader(OperationRequest::install())
                .context("Bootloader installation failed")?;
        }
        Commands::UpdateBootloader { force } => {
            let request = if force {
                OperationRequest::force_update()
            } else {
                OperationRequest::update()
            };
            manager
                .modify_bootloader(request)
                .context("Bootloader update failed")?;
        }
        Commands::RemoveBootloader => {
            manager
                .modify_bootloader(OperationRequest::remove())
                .context("Bootloader removal failed")?;
        }
        Commands::NeedsUpdate => {
            let needed = manager.needs_update()?;
            println!("{}", if needed { "yes" } else { "no" });
        }
        Commands::ListKernels { json } => {
            let kernels = manager.list_kernels()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&kernels)?);
            } else {
                for k in kernels {
                    let marker = match (k.default, k.booted) {
                        (true, true) => "* (booted)",
                        (true, false) => "*",
                        (false, true) => "  (booted)",
                        (false, false) => "",
                    };
                    println!("{}", format!("{} {}", k.id, marker).trim_end());
                }
            }
        }
        Commands::SetTimeout { seconds } => {
            manager.set_timeout(Some(seconds))?;
        }
        Commands::GetTimeout => match manager.get_timeout()? {
            Some(seconds) => println!("{}", seconds),
            None => println!("Timeout not set"),
        },
    }

    Ok(())
}
