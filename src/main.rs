//! syntropy - provision bootable USB installers for Syntropy grid nodes.
//!
//! Formats a removable device, writes node identity keys and renders the
//! cloud-init payload the installer consumes on first boot.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use syntropy_usb::commands::{self, NodeCreateArgs};
use syntropy_usb::config::Config;
use syntropy_usb::{host, platform};

#[derive(Parser)]
#[command(name = "syntropy")]
#[command(about = "Provision bootable USB installers for Syntropy grid nodes")]
#[command(
    after_help = "QUICK START:\n  syntropy preflight                          Check host tools\n  syntropy usb list                           Show candidate devices\n  syntropy node create --node-name n1 --auto-detect"
)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision node USB devices
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },

    /// Inspect USB devices
    Usb {
        #[command(subcommand)]
        action: UsbAction,
    },

    /// Run preflight checks (host tools, directories, templates)
    Preflight {
        /// Exit non-zero if any check fails
        #[arg(long)]
        strict: bool,
    },

    /// Show effective configuration
    Config,

    /// Inspect the installer image cache
    Image {
        #[command(subcommand)]
        action: ImageAction,
    },
}

#[derive(Subcommand)]
enum NodeAction {
    /// Format a USB device and write the node payload
    Create {
        /// Node name (letters, digits, hyphens; max 63)
        #[arg(long)]
        node_name: String,

        /// Free-form description
        #[arg(long, default_value = "")]
        description: String,

        /// "lat,lon" in decimal degrees
        #[arg(long, default_value = "")]
        coordinates: String,

        /// Device to format (/dev/sdX or \\.\PhysicalDriveN)
        #[arg(long, conflicts_with = "auto_detect")]
        usb: Option<String>,

        /// Use the only safe removable device
        #[arg(long)]
        auto_detect: bool,

        /// Existing owner private key (default: generate one)
        #[arg(long, default_value = "")]
        owner_key: String,

        /// FAT32 volume label (default: SYNTROPY)
        #[arg(long, default_value = "")]
        label: String,

        /// Proceed when system-disk status cannot be determined
        #[arg(long)]
        force: bool,

        /// File with the admin account password, `-` for stdin (default: locked)
        #[arg(long, value_name = "PATH")]
        admin_password_file: Option<PathBuf>,

        /// City recorded in the node metadata
        #[arg(long)]
        city: Option<String>,

        /// Country recorded in the node metadata
        #[arg(long)]
        country: Option<String>,
    },
}

#[derive(Subcommand)]
enum UsbAction {
    /// List candidate removable devices
    List {
        /// Print JSON instead of tab-separated records
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ImageAction {
    /// Check an installer image in the cache directory
    Check {
        /// Image file name
        file: String,

        /// Expected SHA-256 (hex)
        #[arg(long)]
        sha256: Option<String>,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = Config::load()?;
    let platform = platform::detect();

    match cli.command {
        Commands::Node {
            action:
                NodeAction::Create {
                    node_name,
                    description,
                    coordinates,
                    usb,
                    auto_detect,
                    owner_key,
                    label,
                    force,
                    admin_password_file,
                    city,
                    country,
                },
        } => {
            let args = NodeCreateArgs {
                node_name,
                description,
                coordinates,
                usb,
                auto_detect,
                owner_key,
                label,
                force,
                admin_password_file,
                city,
                country,
            };
            if let Err(e) = commands::cmd_node_create(&config, &args, cli.quiet) {
                eprintln!("error[{}]: {}", e.kind().tag(), e);
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Usb {
            action: UsbAction::List { json },
        } => {
            let host = host::for_platform(platform);
            commands::cmd_usb_list(host.as_ref(), json)?;
        }

        Commands::Preflight { strict } => {
            let cwd: PathBuf = std::env::current_dir().context("cannot read current directory")?;
            commands::cmd_preflight(&config, platform, &cwd, strict)?;
        }

        Commands::Config => commands::cmd_show_config(&config, platform),

        Commands::Image {
            action: ImageAction::Check { file, sha256 },
        } => {
            commands::cmd_image_check(&config, &file, sha256.as_deref())?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn usb_and_auto_detect_conflict() {
        let parsed = Cli::try_parse_from([
            "syntropy",
            "node",
            "create",
            "--node-name",
            "n1",
            "--usb",
            "/dev/sdb",
            "--auto-detect",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn admin_password_is_not_taken_from_argv() {
        let parsed = Cli::try_parse_from([
            "syntropy",
            "node",
            "create",
            "--node-name",
            "n1",
            "--admin-password",
            "hunter2",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from([
            "syntropy",
            "node",
            "create",
            "--node-name",
            "n1",
            "--admin-password-file",
            "-",
        ])
        .unwrap();
        match parsed.command {
            Commands::Node {
                action: NodeAction::Create {
                    admin_password_file, ..
                },
            } => assert_eq!(admin_password_file, Some(PathBuf::from("-"))),
            _ => panic!("expected node create"),
        }
    }

    #[test]
    fn node_name_is_required() {
        assert!(Cli::try_parse_from(["syntropy", "node", "create", "--usb", "/dev/sdb"]).is_err());
    }
}
