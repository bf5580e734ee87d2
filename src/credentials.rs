//! Secrets referenced from the config by name (`*_env` keys).
//!
//! Values come from an optional `.env` file and fall back to the process
//! environment, so the config itself never holds a password.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;

/// Secrets loaded from the `.env` file.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Look up `key` in the file, then in the process environment.
    pub fn get(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|value| !value.is_empty())
    }

    /// Like [`Credentials::get`], but missing or empty values are an error.
    ///
    /// # Errors
    ///
    /// Returns an error when neither source has a non-empty value.
    pub fn require(&self, key: &str) -> anyhow::Result<String> {
        self.get(key)
            .ok_or_else(|| anyhow::anyhow!("missing required credential: {key}"))
    }

    /// Number of entries loaded from the file.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the file contributed no entries.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Read secrets from the `.env` file named by `credentials_file`.
///
/// The file must be readable by its owner only, since it holds the SASL
/// password.
///
/// # Errors
///
/// Returns an error if the file is missing, readable by group or others, or
/// contains a line that is not `KEY=value`.
pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("cannot open secrets file {}", path.display()))?;
    check_owner_only(path, &metadata)?;

    let vars = dotenvy::from_path_iter(path)
        .with_context(|| format!("cannot read secrets file {}", path.display()))?
        .enumerate()
        .map(|(index, entry)| {
            entry.with_context(|| {
                format!("{}: entry {} is not KEY=value", path.display(), index.saturating_add(1))
            })
        })
        .collect::<anyhow::Result<BTreeMap<_, _>>>()?;

    Ok(Credentials { vars })
}

#[cfg(unix)]
fn check_owner_only(path: &Path, metadata: &fs::Metadata) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = metadata.permissions().mode() & 0o777;
    anyhow::ensure!(
        mode & 0o077 == 0,
        "secrets file {} is mode {mode:o}; restrict it with chmod 0600",
        path.display()
    );
    Ok(())
}

#[cfg(not(unix))]
fn check_owner_only(_path: &Path, _metadata: &fs::Metadata) -> anyhow::Result<()> {
    Ok(())
}
