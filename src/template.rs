//! Cloud-init payload rendering.
//!
//! Templates use `{{ name }}` placeholders and nothing else. Control-flow
//! syntax is refused, every placeholder must name a binding field, and a
//! field may appear at most once per template. A placeholder that stands
//! alone on its line takes multi-line values, each continuation line
//! indented to the placeholder's column, so YAML block scalars stay valid.

use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::{debug, info};

use crate::common::{set_mode_best_effort, write_file_mode_best_effort};
use crate::error::{Error, ErrorKind, Result, ResultExt};

/// Template root relative to the invocation directory.
pub const TEMPLATE_SUBDIR: &str = "templates/cloud-init";

/// (template file, output file) pairs.
pub const TEMPLATE_FILES: [(&str, &str); 3] = [
    ("user-data.tmpl", "user-data"),
    ("meta-data.tmpl", "meta-data"),
    ("network-config.tmpl", "network-config"),
];

const CONTROL_MARKERS: &[&str] = &["{%", "{{#", "{{/", "{{^", "{{!", "{{>", "{{else"];

/// Everything a template may reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateBinding {
    pub node_name: String,
    pub node_description: String,
    pub coordinates: String,
    pub created_at: String,
    pub admin_password_hash: String,
    pub owner_public_key: String,
    pub community_public_key: String,
    pub owner_fingerprint: String,
    pub community_fingerprint: String,
    pub node_id: String,
    pub location_node_id: String,
    pub detection_method: String,
    pub detected_city: String,
    pub detected_country: String,
    pub key_installation_commands: String,
    pub metadata_creation_commands: String,
    pub startup_service_commands: String,
}

impl TemplateBinding {
    /// Fields that may legitimately be empty.
    const OPTIONAL: &'static [&'static str] = &["node_description", "coordinates"];

    /// All fields by placeholder name.
    pub fn fields(&self) -> [(&'static str, &str); 17] {
        [
            ("node_name", self.node_name.as_str()),
            ("node_description", self.node_description.as_str()),
            ("coordinates", self.coordinates.as_str()),
            ("created_at", self.created_at.as_str()),
            ("admin_password_hash", self.admin_password_hash.as_str()),
            ("owner_public_key", self.owner_public_key.as_str()),
            ("community_public_key", self.community_public_key.as_str()),
            ("owner_fingerprint", self.owner_fingerprint.as_str()),
            ("community_fingerprint", self.community_fingerprint.as_str()),
            ("node_id", self.node_id.as_str()),
            ("location_node_id", self.location_node_id.as_str()),
            ("detection_method", self.detection_method.as_str()),
            ("detected_city", self.detected_city.as_str()),
            ("detected_country", self.detected_country.as_str()),
            ("key_installation_commands", self.key_installation_commands.as_str()),
            ("metadata_creation_commands", self.metadata_creation_commands.as_str()),
            ("startup_service_commands", self.startup_service_commands.as_str()),
        ]
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields()
            .into_iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    /// Every required field must be set.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = self
            .fields()
            .into_iter()
            .filter(|(name, value)| !Self::OPTIONAL.contains(name) && value.trim().is_empty())
            .map(|(name, _)| name)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::TemplateFailed,
                format!("template binding is missing {}", missing.join(", ")),
            ))
        }
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("static regex")
    })
}

fn template_err(name: &str, message: impl AsRef<str>) -> Error {
    Error::new(
        ErrorKind::TemplateFailed,
        format!("template {}: {}", name, message.as_ref()),
    )
}

/// Substitute `binding` into one template.
pub fn render_template(name: &str, text: &str, binding: &TemplateBinding) -> Result<String> {
    if let Some(marker) = CONTROL_MARKERS.iter().find(|m| text.contains(*m)) {
        return Err(template_err(
            name,
            format!("control-flow construct '{}' is not supported", marker),
        ));
    }

    let pattern = placeholder_pattern();
    let matches: Vec<_> = pattern.captures_iter(text).collect();
    if text.matches("{{").count() != matches.len() {
        return Err(template_err(name, "malformed placeholder"));
    }

    let mut seen = HashSet::new();
    let mut out = String::with_capacity(text.len() * 2);
    let mut last = 0;
    for caps in &matches {
        let Some(whole) = caps.get(0) else { continue };
        let field = &caps[1];
        if !seen.insert(field.to_string()) {
            return Err(template_err(name, format!("placeholder '{}' used twice", field)));
        }
        let value = binding
            .get(field)
            .ok_or_else(|| template_err(name, format!("unknown placeholder '{}'", field)))?;

        let line_start = text[..whole.start()].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = text[whole.end()..]
            .find('\n')
            .map(|i| whole.end() + i)
            .unwrap_or(text.len());
        let indent = &text[line_start..whole.start()];
        let alone = indent.chars().all(|c| c == ' ')
            && text[whole.end()..line_end].trim().is_empty();

        out.push_str(&text[last..whole.start()]);
        let value = value.trim_end_matches('\n');
        if value.contains('\n') {
            if !alone {
                return Err(template_err(
                    name,
                    format!("multi-line value '{}' must stand alone on its line", field),
                ));
            }
            let mut lines = value.lines();
            out.push_str(lines.next().unwrap_or(""));
            for line in lines {
                out.push('\n');
                if !line.is_empty() {
                    out.push_str(indent);
                    out.push_str(line);
                }
            }
        } else {
            out.push_str(value);
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Renders the three payload files from a template root.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    root: PathBuf,
}

impl TemplateRenderer {
    /// Use `root` as given. Fails if it is not a directory.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::new(
                ErrorKind::TemplateFailed,
                format!("template directory {} does not exist", root.display()),
            ));
        }
        Ok(Self { root })
    }

    /// Search locations relative to `cwd`, in order.
    pub fn candidates(cwd: &Path) -> [PathBuf; 2] {
        [
            cwd.join(TEMPLATE_SUBDIR),
            cwd.join("..").join(TEMPLATE_SUBDIR),
        ]
    }

    /// First existing candidate under `cwd`.
    pub fn discover(cwd: &Path) -> Result<Self> {
        let candidates = Self::candidates(cwd);
        match candidates.iter().find(|c| c.is_dir()) {
            Some(root) => {
                debug!(root = %root.display(), "using template root");
                Ok(Self { root: root.clone() })
            }
            None => Err(not_found(&candidates)),
        }
    }

    /// Template root for this process, resolved from the current directory
    /// on first use.
    pub fn from_current_dir() -> Result<Self> {
        static ROOT: OnceLock<std::result::Result<PathBuf, Vec<PathBuf>>> = OnceLock::new();
        let resolved = ROOT.get_or_init(|| {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            Self::discover(&cwd)
                .map(|r| r.root)
                .map_err(|_| Self::candidates(&cwd).to_vec())
        });
        match resolved {
            Ok(root) => Ok(Self { root: root.clone() }),
            Err(searched) => Err(not_found(searched)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read and parse every template without writing anything. Returns the
    /// total number of placeholders.
    pub fn check(&self) -> Result<usize> {
        let empty = TemplateBinding::default();
        let mut placeholders = 0;
        for (template, _) in TEMPLATE_FILES {
            let path = self.root.join(template);
            let text = fs::read_to_string(&path).kind(
                ErrorKind::TemplateFailed,
                format!("cannot read template {}", path.display()),
            )?;
            render_template(template, &text, &empty)?;
            placeholders += placeholder_pattern().find_iter(&text).count();
        }
        Ok(placeholders)
    }

    /// Render every template into `dest_dir`. All templates are read and
    /// rendered before any file is written.
    pub fn render(&self, dest_dir: &Path, binding: &TemplateBinding) -> Result<()> {
        binding.validate()?;

        let mut rendered = Vec::with_capacity(TEMPLATE_FILES.len());
        for (template, output) in TEMPLATE_FILES {
            let path = self.root.join(template);
            let text = fs::read_to_string(&path).kind(
                ErrorKind::TemplateFailed,
                format!("cannot read template {}", path.display()),
            )?;
            rendered.push((output, render_template(template, &text, binding)?));
        }

        fs::create_dir_all(dest_dir).kind(
            ErrorKind::TemplateFailed,
            format!("cannot create {}", dest_dir.display()),
        )?;
        set_mode_best_effort(dest_dir, 0o755);
        for (output, text) in rendered {
            let path = dest_dir.join(output);
            write_file_mode_best_effort(&path, text, 0o644).kind(
                ErrorKind::TemplateFailed,
                format!("cannot write {}", path.display()),
            )?;
        }
        info!(dest = %dest_dir.display(), "rendered cloud-init payload");
        Ok(())
    }
}

fn not_found(searched: &[PathBuf]) -> Error {
    Error::new(ErrorKind::TemplateFailed, "cloud-init template directory not found").with_detail(
        format!(
            "searched {}",
            searched
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    )
}
