use zeroize::Zeroizing;

use super::primitives::{
    aead_decrypt, aead_encrypt, derive_entry_key, random_array, CryptoError, ENTRY_SALT_LEN,
    KEY_LEN, NONCE_LEN,
};

/// Storage material for one credential row: the HKDF salt and the
/// `nonce‖ciphertext‖tag` blob.
#[derive(Clone, PartialEq, Eq)]
pub struct EntryCipher {
    pub salt: [u8; ENTRY_SALT_LEN],
    pub blob: Vec<u8>,
}

impl core::fmt::Debug for EntryCipher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EntryCipher")
            .field("salt", &hex::encode(self.salt))
            .field("blob_len", &self.blob.len())
            .finish()
    }
}

/// Encrypt one secret under the MEK.
///
/// Draws a fresh 16-byte salt, derives the per-entry key over it, seals with
/// a fresh nonce and empty AAD. The per-entry key never leaves this function.
pub fn encrypt_entry(mek: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<EntryCipher, CryptoError> {
    let salt: [u8; ENTRY_SALT_LEN] = random_array()?;
    let per_key = derive_entry_key(mek, &salt);
    let (nonce, ct) = aead_encrypt(&per_key, plaintext, b"")?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ct.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ct);
    Ok(EntryCipher { salt, blob })
}

/// Decrypt one credential row and produce rotation material.
///
/// The returned `EntryCipher` is a re-encryption of the same plaintext under
/// a fresh salt and nonce; the caller is responsible for persisting it. This
/// surfaces the read path's storage side effect in the type instead of hiding
/// it behind the getter.
pub fn decrypt_entry(
    mek: &[u8; KEY_LEN],
    salt: &[u8],
    blob: &[u8],
) -> Result<(Zeroizing<Vec<u8>>, EntryCipher), CryptoError> {
    if salt.len() != ENTRY_SALT_LEN {
        return Err(CryptoError::DecryptFail);
    }
    if blob.len() <= NONCE_LEN {
        return Err(CryptoError::DecryptFail);
    }
    let mut salt_arr = [0u8; ENTRY_SALT_LEN];
    salt_arr.copy_from_slice(salt);

    let per_key = derive_entry_key(mek, &salt_arr);
    let (nonce, ct) = blob.split_at(NONCE_LEN);
    let plaintext = aead_decrypt(&per_key, nonce, ct, b"")?;

    let rotation = encrypt_entry(mek, &plaintext)?;
    Ok((plaintext, rotation))
}
