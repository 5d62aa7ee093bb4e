//! The six-stage provisioning pipeline.
//!
//! 1. Validate: safety checks on the device, then create work/cache dirs
//! 2. Mount: sanity mount of an existing filesystem, released at once
//! 3. Format: one bootable FAT32 partition
//! 4. Remount: mount the new partition until the run ends
//! 5. Keygen: node key under `<mount>/syntropy/keys/`
//! 6. Render: owner/community keys and the cloud-init payload
//!
//! A failure wraps the stage into the error and stops the run. Mounts are
//! always released; a formatted device is never rolled back.

mod observer;
mod stage;

pub use observer::{LogObserver, NullObserver, Observer, RecordingObserver};
pub use stage::{Stage, State};

use chrono::{SecondsFormat, Utc};
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::common::create_dir_mode;
use crate::device::safety::{self, SafetyPolicy};
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::host::{HostOps, MountMode};
use crate::identity::{
    generate_node_key, install_commands, metadata_commands, startup_commands, IdentityStore,
    KeyGenerator, KeyPair, KeyPurpose, LOCKED_PASSWORD,
};
use crate::mount;
use crate::node::NodeConfig;
use crate::template::{TemplateBinding, TemplateRenderer};
use crate::timing::Timer;

/// Device directory holding the node key.
pub const NODE_KEYS_DIR: &str = "syntropy/keys";

/// Device directory holding the payload.
pub const CLOUD_INIT_DIR: &str = "cloud-init";

/// Value of `detection_method` in the binding.
pub const DETECTION_METHOD: &str = "manual";

const UNKNOWN_LOCATION: &str = "unknown";

/// Everything one provisioning run needs.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub device: String,
    pub node: NodeConfig,
    pub work_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub key_dir: PathBuf,
    pub policy: SafetyPolicy,
    /// Crypt hash for the admin account; empty locks the account.
    pub admin_password_hash: String,
    pub city: Option<String>,
    pub country: Option<String>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub device: String,
    pub partition: String,
    pub node_key: KeyPair,
    pub owner_fingerprint: String,
    pub community_fingerprint: String,
    pub node_id: String,
    pub location_node_id: String,
    pub timings: Vec<(Stage, Duration)>,
}

/// 8 random bytes as 16 lowercase hex chars.
pub fn random_hex_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Drives the pipeline over one host provider.
pub struct Orchestrator<'a> {
    host: &'a dyn HostOps,
    keygen: &'a dyn KeyGenerator,
    templates: &'a TemplateRenderer,
    observer: &'a dyn Observer,
    state: State,
    timings: Vec<(Stage, Duration)>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        host: &'a dyn HostOps,
        keygen: &'a dyn KeyGenerator,
        templates: &'a TemplateRenderer,
        observer: &'a dyn Observer,
    ) -> Self {
        Self {
            host,
            keygen,
            templates,
            observer,
            state: State::Idle,
            timings: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn enter(&mut self, next: State) {
        debug_assert!(self.state.can_move_to(next), "{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run `body` as `stage`: track state, time it, tag failures.
    fn stage<T>(
        &mut self,
        stage: Stage,
        body: impl FnOnce() -> Result<(T, String)>,
    ) -> Result<T> {
        self.enter(stage.running());
        let timer = Timer::start(stage.name());
        match body() {
            Ok((value, detail)) => {
                self.timings.push((stage, timer.finish()));
                self.observer.step(stage.name(), &detail);
                Ok(value)
            }
            Err(e) => {
                timer.finish();
                self.enter(State::Failed(stage));
                Err(Error::at_stage(stage, e))
            }
        }
    }

    /// Provision `request.device`. The orchestrator can run once.
    pub fn run(&mut self, request: &ProvisionRequest) -> Result<ProvisionReport> {
        if self.state != State::Idle {
            return Err(Error::internal("orchestrator already used"));
        }
        let host = self.host;
        let keygen = self.keygen;
        let templates = self.templates;
        let device = request.device.as_str();
        let node = &request.node;

        info!(device, node = %node.node_name, platform = %host.platform(), "provisioning");

        self.stage(Stage::Validate, || {
            safety::validate(host, device, request.policy)?;
            for dir in [&request.work_dir, &request.cache_dir] {
                create_dir_mode(dir, 0o755).kind(
                    ErrorKind::Internal,
                    format!("cannot create {}", dir.display()),
                )?;
            }
            Ok(((), format!("{} is safe to format", device)))
        })?;

        self.stage(Stage::Mount, || {
            let detail = sanity_mount(host, device, &request.work_dir)?;
            Ok(((), detail))
        })?;

        let partition = self.stage(Stage::Format, || {
            let partition = host.format(device, &node.label)?;
            let detail = format!("{} formatted FAT32 as {}", partition, node.label);
            Ok((partition, detail))
        })?;

        let mut handle = self.stage(Stage::Remount, || {
            let handle = mount::mount(host, &partition, &request.work_dir, MountMode::Payload)?;
            let detail = format!("{} mounted at {}", partition, handle.mount_point().display());
            Ok((handle, detail))
        })?;
        let mount_point = handle.mount_point().to_path_buf();

        let node_key = self.stage(Stage::Keygen, || {
            let pair = generate_node_key(keygen, &mount_point.join(NODE_KEYS_DIR), &node.node_name)?;
            let detail = format!("node key {}", pair.fingerprint);
            Ok((pair, detail))
        })?;

        let rendered = self.stage(Stage::Render, || {
            let rendered = render_payload(keygen, templates, request, &mount_point)?;
            Ok((rendered, format!("payload written to {}", CLOUD_INIT_DIR)))
        })?;

        handle.release();
        self.enter(State::Done);
        info!(device, node = %node.node_name, "provisioning complete");

        Ok(ProvisionReport {
            device: device.to_string(),
            partition,
            node_key,
            owner_fingerprint: rendered.owner_fingerprint,
            community_fingerprint: rendered.community_fingerprint,
            node_id: rendered.node_id,
            location_node_id: rendered.location_node_id,
            timings: std::mem::take(&mut self.timings),
        })
    }
}

/// Stage 2. A device without a filesystem is skipped; a failed read-only
/// mount of one that has a filesystem is an error.
fn sanity_mount(host: &dyn HostOps, device: &str, work_dir: &Path) -> Result<String> {
    let Some(existing) = host.existing_filesystem(device) else {
        warn!(device, "no existing filesystem; skipping pre-format mount");
        return Ok("no existing filesystem, skipped".to_string());
    };
    let mut handle = mount::mount(host, &existing, work_dir, MountMode::Inspect).map_err(|e| {
        Error::wrap(format!("pre-format mount of {} failed", existing), e)
    })?;
    handle.release();
    Ok(format!("{} mounted and released", existing))
}

struct Rendered {
    owner_fingerprint: String,
    community_fingerprint: String,
    node_id: String,
    location_node_id: String,
}

/// Stage 6.
fn render_payload(
    keygen: &dyn KeyGenerator,
    templates: &TemplateRenderer,
    request: &ProvisionRequest,
    mount_point: &Path,
) -> Result<Rendered> {
    let node = &request.node;
    let store = IdentityStore::new(&request.key_dir, keygen);
    let owner = store.generate_or_load(&node.owner_key_source, &node.node_name, KeyPurpose::Owner)?;
    let community = store.generate_or_load("", &node.node_name, KeyPurpose::Community)?;

    let binding = build_binding(request, &owner, &community);
    templates.render(&mount_point.join(CLOUD_INIT_DIR), &binding)?;

    Ok(Rendered {
        owner_fingerprint: owner.fingerprint,
        community_fingerprint: community.fingerprint,
        node_id: binding.node_id,
        location_node_id: binding.location_node_id,
    })
}

/// Assemble the template binding with fresh node identifiers.
pub fn build_binding(
    request: &ProvisionRequest,
    owner: &KeyPair,
    community: &KeyPair,
) -> TemplateBinding {
    let node = &request.node;
    let location = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(UNKNOWN_LOCATION)
            .to_string()
    };
    let password_hash = if request.admin_password_hash.is_empty() {
        LOCKED_PASSWORD.to_string()
    } else {
        request.admin_password_hash.clone()
    };

    TemplateBinding {
        node_name: node.node_name.clone(),
        node_description: node.node_description.clone(),
        coordinates: node.coordinates_text(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        admin_password_hash: password_hash,
        owner_public_key: owner.public_material.clone(),
        community_public_key: community.public_material.clone(),
        owner_fingerprint: owner.fingerprint.clone(),
        community_fingerprint: community.fingerprint.clone(),
        node_id: random_hex_id(),
        location_node_id: random_hex_id(),
        detection_method: DETECTION_METHOD.to_string(),
        detected_city: location(&request.city),
        detected_country: location(&request.country),
        key_installation_commands: install_commands(owner, community),
        metadata_creation_commands: metadata_commands(
            &node.node_name,
            node.coordinates,
            &node.node_description,
        ),
        startup_service_commands: startup_commands(&node.node_name),
    }
}
