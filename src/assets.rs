//! Code assets.
//!
//! A handler's code is a local directory (or single file) that is zipped
//! and uploaded before deployment. Synthesis only needs a stable
//! fingerprint of the content: it becomes the S3 object key, so any code
//! change shows up as a template change and redeploys the handler.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// How the asset is packaged for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Packaging {
    /// A directory, zipped
    ZipDirectory,
    /// A single file, uploaded as-is
    File,
}

/// A fingerprinted code asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Source path on disk
    pub source_path: PathBuf,
    /// Packaging mode
    pub packaging: Packaging,
    /// SHA-256 of the content, hex-encoded
    pub fingerprint: String,
}

impl Asset {
    /// Fingerprint an asset at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::AssetNotFound(path.to_path_buf()));
        }
        let packaging = if path.is_dir() {
            Packaging::ZipDirectory
        } else {
            Packaging::File
        };
        let fingerprint = fingerprint(path)?;
        debug!(path = %path.display(), fingerprint = %fingerprint, "fingerprinted asset");
        Ok(Self {
            source_path: path.to_path_buf(),
            packaging,
            fingerprint,
        })
    }

    /// Object key the asset is uploaded under.
    pub fn object_key(&self) -> String {
        match self.packaging {
            Packaging::ZipDirectory => format!("{}.zip", self.fingerprint),
            Packaging::File => {
                let ext = self
                    .source_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| format!(".{e}"))
                    .unwrap_or_default();
                format!("{}{ext}", self.fingerprint)
            }
        }
    }

    /// Directory name the asset is staged under in a cloud assembly.
    pub fn staging_name(&self) -> String {
        format!("asset.{}", self.fingerprint)
    }

    /// Copy the asset into `outdir`, returning the staged path.
    ///
    /// Staging is skipped when the target already exists, since the name is
    /// content-addressed.
    pub fn stage(&self, outdir: &Path) -> Result<PathBuf> {
        let target = outdir.join(self.staging_name());
        if target.exists() {
            return Ok(target);
        }

        match self.packaging {
            Packaging::File => {
                fs::create_dir_all(&target)?;
                let name = self
                    .source_path
                    .file_name()
                    .ok_or_else(|| Error::AssetNotFound(self.source_path.clone()))?;
                fs::copy(&self.source_path, target.join(name))?;
            }
            Packaging::ZipDirectory => {
                for entry in WalkDir::new(&self.source_path) {
                    let entry = entry?;
                    let relative = entry
                        .path()
                        .strip_prefix(&self.source_path)
                        .unwrap_or(entry.path());
                    let dest = target.join(relative);
                    if entry.file_type().is_dir() {
                        fs::create_dir_all(&dest)?;
                    } else {
                        if let Some(parent) = dest.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        fs::copy(entry.path(), &dest)?;
                    }
                }
            }
        }

        debug!(target = %target.display(), "staged asset");
        Ok(target)
    }
}

/// SHA-256 over relative paths and contents, in sorted order.
///
/// Only content and layout matter; timestamps and the absolute location
/// of the source do not.
pub fn fingerprint(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();

    if path.is_file() {
        hasher.update(fs::read(path)?);
        return Ok(format!("{:x}", hasher.finalize()));
    }

    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
        let relative = relative.to_string_lossy().replace('\\', "/");
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(fs::read(entry.path())?);
        hasher.update([0u8]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn handler_dir(body: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.js"), body).unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/db.js"), "module.exports = {};").unwrap();
        dir
    }

    #[test]
    fn test_fingerprint_is_location_independent() {
        let a = handler_dir("exports.handler = async () => ({});");
        let b = handler_dir("exports.handler = async () => ({});");
        let fa = Asset::from_path(a.path()).unwrap();
        let fb = Asset::from_path(b.path()).unwrap();
        assert_eq!(fa.fingerprint, fb.fingerprint);
        assert_eq!(fa.fingerprint.len(), 64);
        assert_eq!(fa.packaging, Packaging::ZipDirectory);
        assert_eq!(fa.object_key(), format!("{}.zip", fa.fingerprint));
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = handler_dir("exports.handler = async () => ({});");
        let b = handler_dir("exports.handler = async () => ({ statusCode: 200 });");
        assert_ne!(fingerprint(a.path()).unwrap(), fingerprint(b.path()).unwrap());
    }

    #[test]
    fn test_missing_asset() {
        let dir = TempDir::new().unwrap();
        let err = Asset::from_path(dir.path().join("lambdas/missing")).unwrap_err();
        assert!(matches!(err, Error::AssetNotFound(_)));
    }

    #[test]
    fn test_stage_copies_tree() {
        let src = handler_dir("exports.handler = async () => ({});");
        let out = TempDir::new().unwrap();
        let asset = Asset::from_path(src.path()).unwrap();
        let staged = asset.stage(out.path()).unwrap();
        assert!(staged.ends_with(asset.staging_name()));
        assert!(staged.join("index.js").is_file());
        assert!(staged.join("lib/db.js").is_file());
        // second call is a no-op
        assert_eq!(asset.stage(out.path()).unwrap(), staged);
    }

    #[test]
    fn test_single_file_asset() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("handler.zip");
        fs::write(&file, b"PK").unwrap();
        let asset = Asset::from_path(&file).unwrap();
        assert_eq!(asset.packaging, Packaging::File);
        assert!(asset.object_key().ends_with(".zip"));
    }
}
