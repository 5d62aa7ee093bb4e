//! `node create` - provision one USB stick for a new node.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::device::{self, Classification, Device};
use crate::device::safety::SafetyPolicy;
use crate::error::{Error, ErrorKind, Result};
use crate::host::{self, HostOps};
use crate::identity::{hash_password, SshKeygen, LOCKED_PASSWORD};
use crate::node::NodeConfig;
use crate::pipeline::{Observer, Orchestrator, ProvisionReport, ProvisionRequest};
use crate::platform;
use crate::process::SystemRunner;
use crate::template::TemplateRenderer;
use crate::timing::format_duration;

/// Options of `syntropy node create`.
#[derive(Debug, Clone, Default)]
pub struct NodeCreateArgs {
    pub node_name: String,
    pub description: String,
    pub coordinates: String,
    pub usb: Option<String>,
    pub auto_detect: bool,
    pub owner_key: String,
    pub label: String,
    pub force: bool,
    /// File holding the admin password; `-` reads stdin.
    pub admin_password_file: Option<PathBuf>,
    pub city: Option<String>,
    pub country: Option<String>,
}

/// Prints one `[OK]` line per completed stage.
struct CliObserver {
    quiet: bool,
}

impl Observer for CliObserver {
    fn step(&self, name: &str, detail: &str) {
        if !self.quiet {
            println!("  [OK] {}: {}", name, detail);
        }
    }
}

/// Execute `node create`.
pub fn cmd_node_create(config: &Config, args: &NodeCreateArgs, quiet: bool) -> Result<ProvisionReport> {
    let node = NodeConfig::new(
        &args.node_name,
        &args.description,
        &args.coordinates,
        &args.owner_key,
        &args.label,
    )?;

    let templates = match &config.template_dir {
        Some(dir) => TemplateRenderer::at(dir)?,
        None => TemplateRenderer::from_current_dir()?,
    };

    let admin_password_hash = match args.admin_password_file.as_deref() {
        Some(source) => hash_password(&SystemRunner, &read_admin_password(source)?)?,
        None => LOCKED_PASSWORD.to_string(),
    };

    let platform = platform::detect();
    let host = host::for_platform(platform);
    let device = select_device(host.as_ref(), args)?;

    let request = ProvisionRequest {
        device,
        node,
        work_dir: config.work_dir.clone(),
        cache_dir: config.cache_dir.clone(),
        key_dir: config.key_dir.clone(),
        policy: SafetyPolicy {
            force: args.force,
            admin: platform::is_elevated(),
        },
        admin_password_hash,
        city: args.city.clone(),
        country: args.country.clone(),
    };

    if !quiet {
        println!(
            "Provisioning {} for node '{}' ({})...",
            request.device, request.node.node_name, platform
        );
    }

    let keygen = SshKeygen::new();
    let observer = CliObserver { quiet };
    let report = Orchestrator::new(host.as_ref(), &keygen, &templates, &observer).run(&request)?;

    if !quiet {
        print_report(&report);
    }
    Ok(report)
}

/// Longest accepted password source, newline included.
const MAX_PASSWORD_BYTES: u64 = 1024;

/// Read the admin password from a file, or from stdin for `-`.
fn read_admin_password(source: &Path) -> Result<String> {
    if source == Path::new("-") {
        return password_from(io::stdin().lock());
    }
    let file = File::open(source).map_err(|e| {
        Error::invalid_input(format!("cannot open password file {}", source.display()))
            .with_detail(e.to_string())
    })?;
    password_from(file)
}

/// First line of `reader`, without its line ending.
fn password_from(reader: impl Read) -> Result<String> {
    let mut text = String::new();
    reader
        .take(MAX_PASSWORD_BYTES + 1)
        .read_to_string(&mut text)
        .map_err(|e| Error::invalid_input("cannot read admin password").with_detail(e.to_string()))?;
    if text.len() as u64 > MAX_PASSWORD_BYTES {
        return Err(Error::invalid_input(format!(
            "admin password source exceeds {} bytes",
            MAX_PASSWORD_BYTES
        )));
    }
    Ok(text.lines().next().unwrap_or_default().to_string())
}

/// `--usb` wins; `--auto-detect` takes the one safe candidate.
fn select_device(host: &dyn HostOps, args: &NodeCreateArgs) -> Result<String> {
    if let Some(path) = args.usb.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        return Ok(path.to_string());
    }
    if !args.auto_detect {
        return Err(Error::invalid_input(
            "no device given: pass --usb <path> or --auto-detect",
        ));
    }
    let devices = host.enumerate()?;
    auto_detect(host, devices)
}

fn auto_detect(host: &dyn HostOps, devices: Vec<Device>) -> Result<String> {
    let safe: Vec<&Device> = devices
        .iter()
        .filter(|d| {
            device::classify(d, host.probe(d.path()), &host.is_system_disk(d.path()))
                == Classification::Safe
        })
        .collect();

    match safe.as_slice() {
        [only] => {
            println!("Auto-detected {}", only);
            Ok(only.path().to_string())
        }
        [] => Err(Error::new(
            ErrorKind::DeviceNotFound,
            "no removable USB device found",
        )
        .with_detail(listing(&devices))),
        many => Err(Error::invalid_input(format!(
            "{} candidate devices found; choose one with --usb",
            many.len()
        ))
        .with_detail(listing(&devices))),
    }
}

fn listing(devices: &[Device]) -> String {
    if devices.is_empty() {
        return "enumeration returned no devices".to_string();
    }
    devices
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn print_report(report: &ProvisionReport) {
    println!();
    println!("Node USB ready:");
    println!("  Device:                {}", report.device);
    println!("  Partition:             {}", report.partition);
    println!("  Node ID:               {}", report.node_id);
    println!("  Node key:              {}", report.node_key.fingerprint);
    println!("  Owner fingerprint:     {}", report.owner_fingerprint);
    println!("  Community fingerprint: {}", report.community_fingerprint);
    let total = report.timings.iter().map(|(_, d)| *d).sum();
    println!("  Took:                  {}", format_duration(total));
}
