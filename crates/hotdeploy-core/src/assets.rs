//! Bundled supervisor archive.
//!
//! The `air.tar.gz` archive is read into memory once at startup so that a
//! missing or empty asset is reported before the listener accepts requests.
//! Provisioning copies it to a temporary file which the toolchain extracts.
//!
//! Builds with the `embedded-air` feature carry the archive inside the binary
//! (`assets/air.tar.gz` at the workspace root) and ignore `assets_dir`.

use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::info;

use crate::domain::error::{HotDeployError, Result};

/// File name of the bundled archive.
pub const SUPERVISOR_ARCHIVE: &str = "air.tar.gz";

/// Name of the binary the archive unpacks to.
pub const SUPERVISOR_BINARY: &str = "air";

#[cfg(feature = "embedded-air")]
const EMBEDDED_ARCHIVE: &[u8] = include_bytes!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../assets/air.tar.gz"
));

/// In-memory copy of the bundled archive.
#[derive(Debug, Clone)]
pub struct BundledAssets {
    archive: Vec<u8>,
    digest: String,
}

impl BundledAssets {
    /// The archive this build deploys: the copy compiled in with the
    /// `embedded-air` feature, otherwise `air.tar.gz` read from `dir`.
    pub fn resolve(dir: &Path) -> Result<Self> {
        #[cfg(feature = "embedded-air")]
        {
            let _ = dir;
            let assets = Self::from_bytes(EMBEDDED_ARCHIVE.to_vec())?;
            info!(
                bytes = assets.archive.len(),
                sha256 = %assets.short_digest(),
                "using embedded supervisor archive"
            );
            return Ok(assets);
        }
        #[cfg(not(feature = "embedded-air"))]
        Self::load(dir)
    }

    /// Load `air.tar.gz` from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SUPERVISOR_ARCHIVE);
        let archive = std::fs::read(&path).map_err(|e| HotDeployError::AssetUnavailable {
            name: SUPERVISOR_ARCHIVE.to_string(),
            reason: format!("{}: {e}", path.display()),
        })?;
        let assets = Self::from_bytes(archive)?;
        info!(
            path = %path.display(),
            bytes = assets.archive.len(),
            sha256 = %assets.digest(),
            "loaded bundled supervisor archive"
        );
        Ok(assets)
    }

    pub fn from_bytes(archive: Vec<u8>) -> Result<Self> {
        if archive.is_empty() {
            return Err(HotDeployError::AssetUnavailable {
                name: SUPERVISOR_ARCHIVE.to_string(),
                reason: "archive is empty".to_string(),
            });
        }
        let digest = hex::encode(Sha256::digest(&archive));
        Ok(Self { archive, digest })
    }

    /// SHA-256 of the archive, lowercase hex.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn short_digest(&self) -> &str {
        &self.digest[..12]
    }

    /// Copy the archive to a temporary file. The file is removed on drop.
    pub fn materialize(&self) -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("air-")
            .suffix(".tar.gz")
            .tempfile()?;
        file.write_all(&self.archive)?;
        file.flush()?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_computes_digest() {
        let assets = BundledAssets::from_bytes(b"hello".to_vec()).unwrap();
        assert_eq!(
            assets.digest(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(assets.short_digest(), "2cf24dba5fb0");
    }

    #[test]
    fn test_empty_archive_is_rejected() {
        let err = BundledAssets::from_bytes(Vec::new()).unwrap_err();
        assert!(matches!(err, HotDeployError::AssetUnavailable { .. }));
    }

    #[test]
    fn test_load_missing_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = BundledAssets::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains(SUPERVISOR_ARCHIVE));
    }

    #[cfg(not(feature = "embedded-air"))]
    #[test]
    fn test_resolve_reads_assets_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BundledAssets::resolve(dir.path()).is_err());

        std::fs::write(dir.path().join(SUPERVISOR_ARCHIVE), b"hello").unwrap();
        let assets = BundledAssets::resolve(dir.path()).unwrap();
        assert_eq!(assets.short_digest(), "2cf24dba5fb0");
    }

    #[test]
    fn test_load_and_materialize() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SUPERVISOR_ARCHIVE), b"archive-bytes").unwrap();
        let assets = BundledAssets::load(dir.path()).unwrap();

        let tmp = assets.materialize().unwrap();
        let path = tmp.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"archive-bytes");
        drop(tmp);
        assert!(!path.exists());
    }
}
