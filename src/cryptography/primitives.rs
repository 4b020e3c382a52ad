use anyhow::{anyhow, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use ring::{
    aead,
    rand::{SecureRandom, SystemRandom},
};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

pub const KEY_LEN: usize = 32; // 256-bit key
pub const NONCE_LEN: usize = 12; // 96-bit GCM nonce
pub const TAG_LEN: usize = 16; // GCM tag
pub const ENTRY_SALT_LEN: usize = 16; // per-entry HKDF salt
pub const MIN_KDF_SALT_LEN: usize = 12; // vault KDF salt floor

/// HKDF domain separation for per-entry keys.
pub const ENTRY_KEY_INFO: &[u8] = b"entry-key-v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key must be exactly {KEY_LEN} bytes")]
    InvalidKeyLen,
    #[error("nonce must be exactly {NONCE_LEN} bytes")]
    InvalidNonceLen,
    #[error("invalid KDF parameters")]
    InvalidKdfParams,
    #[error("decryption failed")]
    DecryptFail,
    #[error("encryption failed")]
    EncryptFail,
    #[error("system randomness unavailable")]
    Rng,
}

/// A 32-byte master or password-derived key, zeroed on drop.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_LEN];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLen);
        }
        let mut arr = [0u8; KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl core::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MasterKey").field("key", &"<REDACTED>").finish()
    }
}

/// Fill `bytes` from the system CSPRNG.
pub fn fill_random(bytes: &mut [u8]) -> Result<(), CryptoError> {
    SystemRandom::new().fill(bytes).map_err(|_| CryptoError::Rng)
}

pub fn random_array<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    fill_random(&mut out)?;
    Ok(out)
}

/// AEAD-seal `plaintext` under `key` with a fresh random nonce.
///
/// Returns `(nonce, ciphertext‖tag)`. Nonces are never reused for a key:
/// every call draws 12 fresh CSPRNG bytes.
pub fn aead_encrypt(
    key: &[u8; KEY_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
    let nonce_bytes: [u8; NONCE_LEN] = random_array()?;

    let unbound =
        aead::UnboundKey::new(&aead::AES_256_GCM, key).map_err(|_| CryptoError::InvalidKeyLen)?;
    let sealing_key = aead::LessSafeKey::new(unbound);
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    in_out.reserve(aead::AES_256_GCM.tag_len());
    sealing_key
        .seal_in_place_append_tag(nonce, aead::Aad::from(aad), &mut in_out)
        .map_err(|_| CryptoError::EncryptFail)?;
    Ok((nonce_bytes, in_out))
}

/// Open `ciphertext‖tag` under `key` and `nonce`. Any mismatch in key,
/// nonce, AAD or ciphertext surfaces as the single `DecryptFail` kind.
pub fn aead_decrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidNonceLen);
    }
    let unbound =
        aead::UnboundKey::new(&aead::AES_256_GCM, key).map_err(|_| CryptoError::InvalidKeyLen)?;
    let opening_key = aead::LessSafeKey::new(unbound);
    let nonce =
        aead::Nonce::try_assume_unique_for_key(nonce).map_err(|_| CryptoError::InvalidNonceLen)?;

    let mut in_out = ciphertext.to_vec();
    let pt = opening_key
        .open_in_place(nonce, aead::Aad::from(aad), &mut in_out)
        .map_err(|_| CryptoError::DecryptFail)?;
    let out = Zeroizing::new(pt.to_vec());
    in_out.zeroize();
    Ok(out)
}

/// Argon2id password derivation. Costs are given as memory in MiB plus
/// time/parallelism; zero costs and salts shorter than 12 bytes are
/// rejected before touching the KDF.
pub fn derive_key_argon2id(
    password: &str,
    salt: &[u8],
    memory_mb: u32,
    time: u32,
    parallelism: u32,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    if memory_mb == 0 || time == 0 || parallelism == 0 {
        return Err(anyhow!(CryptoError::InvalidKdfParams));
    }
    if salt.len() < MIN_KDF_SALT_LEN {
        return Err(anyhow!(CryptoError::InvalidKdfParams));
    }
    let m_cost_kib = memory_mb
        .checked_mul(1024)
        .ok_or_else(|| anyhow!(CryptoError::InvalidKdfParams))?;
    let params = Params::new(m_cost_kib, time, parallelism, Some(KEY_LEN))
        .map_err(|e| anyhow!("invalid Argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| anyhow!("argon2 key derivation failed: {e}"))?;
    Ok(key)
}

/// HKDF-SHA256 in extract-then-expand form: salt = per-entry salt,
/// ikm = MEK, info = `entry-key-v1`, 32-byte output.
pub fn derive_entry_key(
    mek: &[u8; KEY_LEN],
    salt: &[u8; ENTRY_SALT_LEN],
) -> Zeroizing<[u8; KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(Some(&salt[..]), mek);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    // 32 bytes is always within the HKDF output bound
    hk.expand(ENTRY_KEY_INFO, &mut okm[..])
        .expect("HKDF expand with 32-byte output cannot fail");
    okm
}

/// Constant-time equality for secrets (session tokens, verifiers).
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
