use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

const STUB_SCHEME: &str = "stub://";

/// Where the detector artifact lives: a local file, or `stub://<name>` for
/// the scripted backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelLocation {
    raw: String,
}

impl ModelLocation {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            raw: location.into(),
        }
    }

    pub fn is_stub(&self) -> bool {
        self.raw.starts_with(STUB_SCHEME)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.raw)
    }

    /// SHA-256 of the artifact, hex encoded. Stub models have no bytes.
    pub fn fingerprint(&self) -> Result<Option<String>> {
        if self.is_stub() {
            return Ok(None);
        }
        let bytes = std::fs::read(self.path())
            .with_context(|| format!("failed to read model {}", self.raw))?;
        Ok(Some(hex::encode(Sha256::digest(&bytes))))
    }
}

impl From<&Path> for ModelLocation {
    fn from(path: &Path) -> Self {
        Self::new(path.to_string_lossy().into_owned())
    }
}

impl From<PathBuf> for ModelLocation {
    fn from(path: PathBuf) -> Self {
        Self::from(path.as_path())
    }
}

impl From<&str> for ModelLocation {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl fmt::Display for ModelLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stub_locations_have_no_fingerprint() -> Result<()> {
        let model = ModelLocation::new("stub://demo");
        assert!(model.is_stub());
        assert_eq!(model.fingerprint()?, None);
        Ok(())
    }

    #[test]
    fn file_fingerprint_is_sha256() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"abc")?;
        let model = ModelLocation::from(file.path());
        assert_eq!(
            model.fingerprint()?.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        let model = ModelLocation::new("/nonexistent/model.onnx");
        assert!(model.fingerprint().is_err());
    }
}
