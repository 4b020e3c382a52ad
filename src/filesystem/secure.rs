use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
#[cfg(target_family = "unix")]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Ensure `dir` exists with restrictive permissions on Unix (0700).
pub fn ensure_dir_secure(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).context("Failed to create vault directory")?;
    #[cfg(target_family = "unix")]
    {
        let perm = fs::Permissions::from_mode(0o700);
        let _ = fs::set_permissions(dir, perm);
    }
    Ok(())
}

/// Atomically write `bytes` to `path` with secure permissions (0600 on Unix).
///
/// The bytes land in a temp file in the same directory first, then replace
/// `path` via rename so readers always see either the old or the new file.
pub fn atomic_write_secure(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path: PathBuf = path.with_extension("tmp");
    {
        let mut tmp = File::create(&tmp_path).context("Failed to create temporary file")?;
        tmp.write_all(bytes)?;
        let _ = tmp.sync_data();
    }

    #[cfg(target_family = "unix")]
    {
        let perm = fs::Permissions::from_mode(0o600);
        let _ = fs::set_permissions(&tmp_path, perm);
    }

    fs::rename(&tmp_path, path).context("Failed to replace file atomically")?;
    Ok(())
}

/// Clamp an existing file to owner-only access. No-op off Unix.
pub fn restrict_file_perms(path: &Path) {
    #[cfg(target_family = "unix")]
    {
        if let Ok(meta) = fs::metadata(path) {
            let mut perm = meta.permissions();
            perm.set_mode(0o600);
            let _ = fs::set_permissions(path, perm);
        }
    }
    #[cfg(not(target_family = "unix"))]
    let _ = path;
}
