//! Failure artifacts: screenshots stored under content-hash names

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::E2eResult;

/// Number of hex characters of the digest kept in file names.
const HASH_PREFIX_LEN: usize = 12;

pub struct ArtifactStore {
    screenshots_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(screenshots_dir: impl Into<PathBuf>) -> Self {
        Self {
            screenshots_dir: screenshots_dir.into(),
        }
    }

    pub fn screenshots_dir(&self) -> &Path {
        &self.screenshots_dir
    }

    /// Store a PNG as `<scenario>-<sha256 prefix>.png`; identical captures share a file.
    pub fn save_screenshot(&self, scenario: &str, png: &[u8]) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.screenshots_dir)?;

        let digest = hash_bytes(png);
        let path = self.screenshots_dir.join(format!(
            "{}-{}.png",
            sanitize(scenario),
            &digest[..HASH_PREFIX_LEN]
        ));

        if path.exists() {
            debug!("Screenshot already stored: {}", path.display());
        } else {
            std::fs::write(&path, png)?;
            info!("Failure screenshot written to: {}", path.display());
        }
        Ok(path)
    }

    /// List stored screenshots by file stem
    pub fn list(&self) -> E2eResult<Vec<String>> {
        if !self.screenshots_dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.screenshots_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "png").unwrap_or(false) {
                if let Some(name) = path.file_stem() {
                    names.push(name.to_string_lossy().to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove stored screenshots
    pub fn clean(&self) -> E2eResult<()> {
        if !self.screenshots_dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.screenshots_dir)? {
            let path = entry?.path();
            if path.is_file() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// Hex SHA-256 of `data`
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screenshot_named_by_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("shots"));

        let first = store.save_screenshot("login flow/TC001", b"png-a").unwrap();
        let again = store.save_screenshot("login flow/TC001", b"png-a").unwrap();
        let other = store.save_screenshot("login flow/TC001", b"png-b").unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        let stem = first.file_stem().unwrap().to_string_lossy().to_string();
        assert!(stem.starts_with("login_flow_TC001-"));
        assert!(stem.ends_with(&hash_bytes(b"png-a")[..HASH_PREFIX_LEN]));
        assert_eq!(store.list().unwrap().len(), 2);

        store.clean().unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
