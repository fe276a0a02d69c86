//! In-memory secrets and short-lived keyfiles.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// A passphrase or password. Redacted in `Debug`, zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

impl Drop for Passphrase {
    fn drop(&mut self) {
        let mut bytes = std::mem::take(&mut self.0).into_bytes();
        bytes.fill(0);
        std::hint::black_box(&bytes);
    }
}

/// Keyfile with mode 0600 in the temp directory (tmpfs on the live ISO).
///
/// Overwritten with zeros and unlinked on drop, so every exit path of the
/// phase that created it, including `?` and panics, removes it.
#[derive(Debug)]
pub struct SecretFile {
    path: PathBuf,
    size: usize,
}

impl SecretFile {
    pub fn new(secret: &Passphrase) -> std::io::Result<Self> {
        Self::new_in(&std::env::temp_dir(), secret)
    }

    pub fn new_in(dir: &Path, secret: &Passphrase) -> std::io::Result<Self> {
        let (key, mut file) = Self::create(dir, secret.expose().len())?;
        // From here on a failed write drops `key`, which wipes the partial file
        key.fill(&mut file, secret)?;
        file.sync_all()?;

        tracing::debug!("Created keyfile {}", key.path.display());
        Ok(key)
    }

    /// Create the empty 0600 file and its guard.
    fn create(dir: &Path, size: usize) -> std::io::Result<(Self, File)> {
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
            ^ ((std::process::id() as u64) << 32);
        let path = dir.join(format!(".arch-secure-deploy-key-{:016x}", nonce));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;
        Ok((Self { path, size }, file))
    }

    fn fill<W: Write>(&self, out: &mut W, secret: &Passphrase) -> std::io::Result<()> {
        // No trailing newline: cryptsetup reads the keyfile byte for byte
        out.write_all(secret.expose().as_bytes())?;
        out.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SecretFile {
    fn drop(&mut self) {
        if let Ok(mut file) = OpenOptions::new().write(true).open(&self.path) {
            let _ = file.write_all(&vec![0u8; self.size]);
            let _ = file.sync_all();
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Wiped keyfile {}", self.path.display()),
            Err(e) => tracing::warn!("Failed to remove keyfile {}: {}", self.path.display(), e),
        }
    }
}
