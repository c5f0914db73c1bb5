use crate::config::types::BundleFile;
use crate::config::validation::validate_bundle;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;
use toml::Table;

/// Loads and validates a portal definition bundle from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML bundle file
///
/// # Returns
///
/// * `Ok(BundleFile)` - Successfully loaded and validated bundle
/// * `Err(ConfigError)` - Failed to load, parse, or validate the bundle
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use ibank_crawler::config::load_bundle;
///
/// let bundle = load_bundle(Path::new("bundles/example-bank.toml")).unwrap();
/// println!("Portal: {}", bundle.name.unwrap_or_default());
/// ```
pub fn load_bundle(path: &Path) -> Result<BundleFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut bundle = load_bundle_str(&content)?;

    // The file stem names the portal when the bundle does not
    if bundle.name.is_none() {
        bundle.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
    }

    Ok(bundle)
}

/// Parses and validates a bundle from TOML text
pub fn load_bundle_str(content: &str) -> Result<BundleFile, ConfigError> {
    let bundle: BundleFile = toml::from_str(content)?;
    validate_bundle(&bundle.configuration)?;
    Ok(bundle)
}

/// Computes a SHA-256 hash of a default configuration tree
///
/// Used to detect that a portal's defaults changed between runs, which
/// makes captured menu overrides stale.
pub fn compute_tree_hash(tree: &Table) -> Result<String, ConfigError> {
    let content = toml::to_string(tree)?;
    Ok(sha256_hex(content.as_bytes()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
