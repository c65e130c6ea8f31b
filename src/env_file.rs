use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Ordered `KEY=VALUE` entries for one environment file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvValues {
    entries: Vec<(String, String)>,
}

impl EnvValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing the value in place when the key is already present.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One `KEY=VALUE` line per entry, in insertion order, newline terminated.
    pub fn serialize(&self) -> String {
        self.iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect()
    }

    /// Template content with covered keys replaced and the remaining entries
    /// appended.
    pub fn render_over(&self, template: &str) -> String {
        let mut written = HashSet::new();
        let mut out = String::new();

        for line in template.lines() {
            match line_key(line).and_then(|key| self.get(key).map(|value| (key, value))) {
                Some((key, value)) if !written.contains(key) => {
                    out.push_str(&format!("{key}={value}\n"));
                    written.insert(key.to_string());
                }
                // duplicate assignment of a covered key
                Some(_) => {}
                None => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }

        for (key, value) in self.iter() {
            if !written.contains(key) {
                out.push_str(&format!("{key}={value}\n"));
            }
        }
        out
    }
}

fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, _) = trimmed.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then_some(key)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EnvFileOutcome {
    Unchanged,
    Created,
    SeededFromTemplate { template: PathBuf },
    Replaced { backup: PathBuf },
}

#[derive(Debug, Error)]
pub enum EnvFileError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("backing up {} to {}: {source}", path.display(), backup.display())]
    Backup {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("seeding {} from {}: {source}", path.display(), template.display())]
    Seed {
        path: PathBuf,
        template: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// `path` with `suffix` appended to the file name (`.env` -> `.env.bak`).
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Materializes `values` at `path`.
///
/// Leaves the file untouched when it already holds the desired content. A
/// differing file is renamed to `<path>.bak` first; a missing file is seeded
/// from `<path>.example` when that template exists. The rename and the
/// following write are two separate filesystem operations.
pub fn write_env_file(path: &Path, values: &EnvValues) -> Result<EnvFileOutcome, EnvFileError> {
    let template_path = sibling_path(path, ".example");
    let template = read_optional(&template_path)?;
    let desired = match &template {
        Some(template) => values.render_over(template),
        None => values.serialize(),
    };

    let outcome = match read_optional(path)? {
        Some(current) if current == desired => {
            info!("No changes in {}", path.display());
            return Ok(EnvFileOutcome::Unchanged);
        }
        Some(_) => {
            let backup = sibling_path(path, ".bak");
            fs::rename(path, &backup).map_err(|source| EnvFileError::Backup {
                path: path.to_path_buf(),
                backup: backup.clone(),
                source,
            })?;
            info!(
                "Backed up existing {} as {}",
                path.display(),
                backup.display()
            );
            EnvFileOutcome::Replaced { backup }
        }
        None if template.is_some() => {
            fs::copy(&template_path, path).map_err(|source| EnvFileError::Seed {
                path: path.to_path_buf(),
                template: template_path.clone(),
                source,
            })?;
            info!(
                "Created {} from {}",
                path.display(),
                template_path.display()
            );
            EnvFileOutcome::SeededFromTemplate {
                template: template_path,
            }
        }
        None => EnvFileOutcome::Created,
    };

    fs::write(path, desired).map_err(|source| EnvFileError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Updated {}", path.display());
    Ok(outcome)
}

fn read_optional(path: &Path) -> Result<Option<String>, EnvFileError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(EnvFileError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}
