//! Compose file loading: read, interpolate, merge, validate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml_ng::Value;
use thiserror::Error;
use tracing::debug;

use crate::compose::{ComposeProject, CycleError};

/// Options for [`load`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Compose files in merge order; later files override earlier ones.
    pub files: Vec<PathBuf>,
    /// Base directory for relative paths and the fallback project name.
    pub workdir: PathBuf,
    /// Variables available to `${VAR}` interpolation.
    pub env: BTreeMap<String, String>,
}

impl LoadOptions {
    #[must_use]
    pub fn new(files: Vec<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            files,
            workdir: workdir.into(),
            env: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Captures the process environment for interpolation.
    #[must_use]
    pub fn with_process_env(mut self) -> Self {
        self.env = std::env::vars().collect();
        self
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("reading compose file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing compose file {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },
    #[error("interpolating compose file {}: {message}", .path.display())]
    Interpolation { path: PathBuf, message: String },
    #[error("decoding compose document")]
    Decode(#[source] serde_yaml_ng::Error),
    #[error("compose project defines no services")]
    NoServices,
    #[error("service {service} has neither an image nor build instructions")]
    MissingImageSource { service: String },
    #[error("service {service} depends on undefined service {dependency}")]
    UnknownDependency { service: String, dependency: String },
    #[error(transparent)]
    DependencyCycle(#[from] CycleError),
}

/// Loads a compose project from one or more files.
///
/// Files are parsed, interpolated against `options.env`, and deep-merged in
/// order: later files override scalars, merge mappings, and replace
/// sequences. The project name falls back to the working directory's base
/// name when the document does not set one.
///
/// # Errors
/// Fails when a file cannot be read or parsed, when a required variable is
/// unset, or when the merged document does not validate.
pub fn load(options: &LoadOptions) -> Result<ComposeProject, LoadError> {
    debug!(files = ?options.files, "loading compose project");
    let mut merged: Option<Value> = None;
    for path in &options.files {
        let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        let document: Value = serde_yaml_ng::from_str(&raw).map_err(|source| LoadError::Parse {
            path: path.clone(),
            source,
        })?;
        let document = interpolate_value(document, &options.env).map_err(|message| {
            LoadError::Interpolation {
                path: path.clone(),
                message,
            }
        })?;
        merged = Some(match merged {
            Some(base) => merge_values(base, document),
            None => document,
        });
    }
    let Some(document) = merged else {
        return Err(LoadError::NoServices);
    };

    let mut project: ComposeProject =
        serde_yaml_ng::from_value(document).map_err(LoadError::Decode)?;
    if project.name.as_deref().is_none_or(str::is_empty) {
        project.name = Some(project_name_from_workdir(&options.workdir));
    }
    validate(&project)?;
    debug!(
        name = project.name.as_deref(),
        services = project.services.len(),
        "compose project loaded"
    );
    Ok(project)
}

fn project_name_from_workdir(workdir: &Path) -> String {
    let dir = workdir
        .canonicalize()
        .unwrap_or_else(|_| workdir.to_path_buf());
    dir.file_name().map_or_else(
        || "default".to_string(),
        |name| name.to_string_lossy().to_lowercase(),
    )
}

fn validate(project: &ComposeProject) -> Result<(), LoadError> {
    if project.services.is_empty() {
        return Err(LoadError::NoServices);
    }
    for (name, service) in &project.services {
        if !service.has_image() && service.build.is_none() {
            return Err(LoadError::MissingImageSource {
                service: name.clone(),
            });
        }
        for dependency in service.depends_on.names() {
            if !project.services.contains_key(dependency) {
                return Err(LoadError::UnknownDependency {
                    service: name.clone(),
                    dependency: dependency.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Overlays `overlay` onto `base`: mappings merge key-wise, everything else
/// is replaced by the overlay value.
fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

fn interpolate_value(value: Value, env: &BTreeMap<String, String>) -> Result<Value, String> {
    Ok(match value {
        Value::String(text) => Value::String(interpolate_str(&text, env)?),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| interpolate_value(item, env))
                .collect::<Result<_, _>>()?,
        ),
        Value::Mapping(entries) => {
            let mut mapping = serde_yaml_ng::Mapping::with_capacity(entries.len());
            for (key, item) in entries {
                mapping.insert(key, interpolate_value(item, env)?);
            }
            Value::Mapping(mapping)
        }
        other => other,
    })
}

/// Expands the compose variable syntax: `$VAR`, `${VAR}`, `${VAR-def}`,
/// `${VAR:-def}`, `${VAR?msg}`, `${VAR:?msg}`, and `$$` for a literal `$`.
fn interpolate_str(input: &str, env: &BTreeMap<String, String>) -> Result<String, String> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '$' {
            output.push(ch);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                output.push('$');
            }
            Some('{') => {
                chars.next();
                let mut body = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    body.push(c);
                }
                if !closed {
                    return Err(format!("unterminated expansion: ${{{body}"));
                }
                output.push_str(&expand_braced(&body, env)?);
            }
            Some(c) if c == '_' || c.is_ascii_alphabetic() => {
                let mut name = String::new();
                while let Some(c) = chars.peek().copied() {
                    if c == '_' || c.is_ascii_alphanumeric() {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if let Some(value) = env.get(&name) {
                    output.push_str(value);
                }
            }
            _ => output.push('$'),
        }
    }
    Ok(output)
}

fn expand_braced(body: &str, env: &BTreeMap<String, String>) -> Result<String, String> {
    let Some(boundary) = body.find([':', '-', '?']) else {
        return Ok(env.get(body).cloned().unwrap_or_default());
    };
    let name = &body[..boundary];
    let rest = &body[boundary..];
    let (or_empty, operator) = match rest.strip_prefix(':') {
        Some(stripped) => (true, stripped),
        None => (false, rest),
    };
    let value = env.get(name);
    let usable = match value {
        Some(found) if or_empty => !found.is_empty(),
        Some(_) => true,
        None => false,
    };

    if let Some(default) = operator.strip_prefix('-') {
        return Ok(if usable {
            value.cloned().unwrap_or_default()
        } else {
            default.to_string()
        });
    }
    if let Some(message) = operator.strip_prefix('?') {
        return if usable {
            Ok(value.cloned().unwrap_or_default())
        } else if message.is_empty() {
            Err(format!("required variable {name} is missing a value"))
        } else {
            Err(format!("required variable {name} is missing a value: {message}"))
        };
    }
    Err(format!("unsupported expansion: ${{{body}}}"))
}
