use base64::{engine::general_purpose, Engine as _};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::cryptography::primitives::{
    aead_decrypt, aead_encrypt, MasterKey, CryptoError, KEY_LEN, MIN_KDF_SALT_LEN, NONCE_LEN,
    TAG_LEN,
};
use crate::filesystem::secure::{atomic_write_secure, ensure_dir_secure};

pub const HEADER_FILE: &str = "header.json";
pub const HEADER_VERSION: u32 = 1;
pub const KDF_NAME: &str = "argon2id";

/// Associated data binding the wrapped MEK to its purpose.
pub const WRAP_AAD: &[u8] = b"header.mek";

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("vault header not found")]
    NotFound,
    #[error("vault header is corrupt")]
    Corrupt,
    #[error("unsupported header (version or kdf)")]
    Unsupported,
    #[error("header has no wrapped master key")]
    NotWrapped,
    #[error("header decryption failed")]
    DecryptFail,
    #[error("header io: {0}")]
    Io(#[from] std::io::Error),
    #[error("header write: {0}")]
    Write(anyhow::Error),
    #[error(transparent)]
    Crypto(CryptoError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParams {
    pub name: String,
    #[serde(rename = "memoryMB")]
    pub memory_mb: u32,
    pub time: u32,
    pub parallelism: u32,
    #[serde(rename = "saltLen")]
    pub salt_len: u32,
    #[serde(rename = "keyLen")]
    pub key_len: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // 64 MiB / 3 passes / 1 lane, 12-byte salt, 32-byte output
        Self {
            name: KDF_NAME.to_string(),
            memory_mb: 64,
            time: 3,
            parallelism: 1,
            salt_len: 12,
            key_len: KEY_LEN as u32,
        }
    }
}

/// On-disk vault header. `salt`, `wrap_nonce` and `wrapped_mek` are either
/// all present (initialized vault) or all absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultHeader {
    pub version: u32,
    pub user: String,
    pub created_at: String,
    pub updated_at: String,
    pub kdf: KdfParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_nonce: Option<String>,
    #[serde(rename = "wrappedMEK", skip_serializing_if = "Option::is_none")]
    pub wrapped_mek: Option<String>,
}

impl VaultHeader {
    pub fn new(user: &str, kdf: KdfParams) -> Self {
        let now = now_rfc3339();
        Self {
            version: HEADER_VERSION,
            user: user.to_string(),
            created_at: now.clone(),
            updated_at: now,
            kdf,
            salt: None,
            wrap_nonce: None,
            wrapped_mek: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.salt.is_some() && self.wrap_nonce.is_some() && self.wrapped_mek.is_some()
    }

    /// Decoded KDF salt; errors if absent or inconsistent with `kdf.saltLen`.
    pub fn kdf_salt(&self) -> Result<Vec<u8>, HeaderError> {
        let b64 = self.salt.as_deref().ok_or(HeaderError::NotWrapped)?;
        let salt = general_purpose::STANDARD
            .decode(b64)
            .map_err(|_| HeaderError::Corrupt)?;
        if salt.len() != self.kdf.salt_len as usize || salt.len() < MIN_KDF_SALT_LEN {
            return Err(HeaderError::Corrupt);
        }
        Ok(salt)
    }

    fn validate(&self) -> Result<(), HeaderError> {
        if self.version != HEADER_VERSION || self.kdf.name != KDF_NAME {
            return Err(HeaderError::Unsupported);
        }
        if self.kdf.key_len as usize != KEY_LEN {
            return Err(HeaderError::Unsupported);
        }
        if (self.kdf.salt_len as usize) < MIN_KDF_SALT_LEN {
            return Err(HeaderError::Corrupt);
        }
        // Wrap material is all-or-nothing.
        let present = [
            self.salt.is_some(),
            self.wrap_nonce.is_some(),
            self.wrapped_mek.is_some(),
        ];
        if present.iter().any(|p| *p) && !present.iter().all(|p| *p) {
            return Err(HeaderError::Corrupt);
        }
        Ok(())
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Filesystem locations for one vault.
#[derive(Debug, Clone)]
pub struct VaultPaths {
    pub dir: PathBuf,
}

impl VaultPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn header(&self) -> PathBuf {
        self.dir.join(HEADER_FILE)
    }

    pub fn db(&self) -> PathBuf {
        self.dir.join(super::store::DB_FILE)
    }
}

pub fn load_header(paths: &VaultPaths) -> Result<VaultHeader, HeaderError> {
    let path = paths.header();
    if !path.exists() {
        return Err(HeaderError::NotFound);
    }
    let bytes = fs::read(&path)?;
    let header: VaultHeader =
        serde_json::from_slice(&bytes).map_err(|_| HeaderError::Corrupt)?;
    header.validate()?;
    Ok(header)
}

pub fn save_header(paths: &VaultPaths, header: &VaultHeader) -> Result<(), HeaderError> {
    ensure_dir_secure(&paths.dir).map_err(HeaderError::Write)?;
    let json = serde_json::to_vec_pretty(header).map_err(|_| HeaderError::Corrupt)?;
    atomic_write_secure(&paths.header(), &json).map_err(HeaderError::Write)
}

/// Wrap `mek` under `pdk` and persist: fills `salt`-independent wrap fields
/// (`wrapNonce`, `wrappedMEK`), bumps `updatedAt`, then saves atomically.
pub fn wrap_and_save(
    paths: &VaultPaths,
    header: &mut VaultHeader,
    pdk: &[u8; KEY_LEN],
    mek: &MasterKey,
) -> Result<(), HeaderError> {
    let (nonce, ct) =
        aead_encrypt(pdk, mek.as_bytes(), WRAP_AAD).map_err(HeaderError::Crypto)?;
    header.wrap_nonce = Some(general_purpose::STANDARD.encode(nonce));
    header.wrapped_mek = Some(general_purpose::STANDARD.encode(&ct));
    header.updated_at = now_rfc3339();
    save_header(paths, header)
}

/// Load the header and unwrap the MEK with `pdk`.
pub fn load_and_unwrap(
    paths: &VaultPaths,
    pdk: &[u8; KEY_LEN],
) -> Result<(MasterKey, VaultHeader), HeaderError> {
    let header = load_header(paths)?;
    let mek = unwrap_mek(&header, pdk)?;
    Ok((mek, header))
}

/// Unwrap the MEK from an already-loaded header.
pub fn unwrap_mek(header: &VaultHeader, pdk: &[u8; KEY_LEN]) -> Result<MasterKey, HeaderError> {
    if !header.is_initialized() {
        return Err(HeaderError::NotWrapped);
    }
    let nonce = general_purpose::STANDARD
        .decode(header.wrap_nonce.as_deref().unwrap_or_default())
        .map_err(|_| HeaderError::Corrupt)?;
    let wrapped = general_purpose::STANDARD
        .decode(header.wrapped_mek.as_deref().unwrap_or_default())
        .map_err(|_| HeaderError::Corrupt)?;
    if nonce.len() != NONCE_LEN || wrapped.len() != KEY_LEN + TAG_LEN {
        return Err(HeaderError::Corrupt);
    }
    let pt = aead_decrypt(pdk, &nonce, &wrapped, WRAP_AAD)
        .map_err(|_| HeaderError::DecryptFail)?;
    MasterKey::from_slice(&pt).map_err(|_| HeaderError::Corrupt)
}

/// Re-wrap an already-initialized header under a new PDK.
pub fn rewrap(
    paths: &VaultPaths,
    header: &mut VaultHeader,
    new_pdk: &[u8; KEY_LEN],
    mek: &MasterKey,
) -> Result<(), HeaderError> {
    if !header.is_initialized() {
        return Err(HeaderError::NotWrapped);
    }
    wrap_and_save(paths, header, new_pdk, mek)
}
