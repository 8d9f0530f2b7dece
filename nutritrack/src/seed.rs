//! Seed accounts for the in-memory backend, loaded from a TOML file.
//!
//! ## File format
//!
//! **Single account (flat):**
//! ```toml
//! email = "me@example.com"
//! password = "secret1"
//! ```
//!
//! **Several accounts:**
//! ```toml
//! [[users]]
//! email = "alice@example.com"
//! password = "pw1pw1"
//!
//! [[users]]
//! email = "bob@example.com"
//! password = "pw2pw2"
//! ```
//!
//! Both styles can be combined. Emails are case-insensitive; duplicates keep the last
//! password. Entries with an empty email or password are skipped.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedUser {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Error)]
pub enum SeedFileError {
    #[error("failed to read seed file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid seed file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("seed file {path} does not define any account")]
    Empty { path: String },
}

#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    email: Option<String>,
    password: Option<String>,
    users: Option<Vec<SeedEntry>>,
}

#[derive(Debug, Deserialize)]
struct SeedEntry {
    email: String,
    password: String,
}

/// Load seed users; `None` means no seeding. A given file must define at least one account.
pub fn load_seed_users(path: Option<&Path>) -> Result<Vec<SeedUser>, SeedFileError> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    check_seed_file_permissions(path);

    let raw = std::fs::read_to_string(path).map_err(|source| SeedFileError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let parsed: SeedFile = toml::from_str(&raw).map_err(|source| SeedFileError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    let mut entries = Vec::new();
    if let (Some(email), Some(password)) = (parsed.email, parsed.password) {
        entries.push(SeedUser { email, password });
    }
    if let Some(more) = parsed.users {
        entries.extend(more.into_iter().map(|entry| SeedUser {
            email: entry.email,
            password: entry.password,
        }));
    }

    let users = dedupe(entries);
    if users.is_empty() {
        return Err(SeedFileError::Empty {
            path: path.display().to_string(),
        });
    }
    Ok(users)
}

fn dedupe(entries: Vec<SeedUser>) -> Vec<SeedUser> {
    let mut by_email = BTreeMap::new();
    for entry in entries {
        let email = entry.email.trim().to_ascii_lowercase();
        let password = entry.password.trim().to_string();
        if email.is_empty() || password.is_empty() {
            continue;
        }
        by_email.insert(email, password);
    }
    by_email
        .into_iter()
        .map(|(email, password)| SeedUser { email, password })
        .collect()
}

#[cfg(unix)]
fn check_seed_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.permissions().mode() & 0o004 != 0 {
            warn!(
                path = %path.display(),
                "seed file is world-readable; consider chmod 600"
            );
        }
    }
}

#[cfg(not(unix))]
fn check_seed_file_permissions(_path: &Path) {}
