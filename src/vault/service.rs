use base64::{engine::general_purpose, Engine as _};
use secrecy::SecretString;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::cryptography::entry::{decrypt_entry, encrypt_entry, EntryCipher};
use crate::cryptography::primitives::{
    derive_key_argon2id, fill_random, CryptoError, MasterKey, KEY_LEN,
};
use crate::policy::{
    validate_master_password, BreachOracle, HeuristicEstimator, NoBreachOracle, NoPresence,
    PolicyReject, Presence, StrengthEstimator, UserPresence,
};

use super::header::{
    load_header, rewrap, wrap_and_save, HeaderError, KdfParams, VaultHeader, VaultPaths,
};
use super::store::{EntryMeta, EntryStore, StoreError};

pub const DEFAULT_ENTRY_KIND: &str = "password";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("vault is locked")]
    Locked,
    #[error("credential not found")]
    NotFound,
    #[error("credential already exists")]
    Conflict,
    #[error(transparent)]
    Policy(#[from] PolicyReject),
    #[error("unlock failed")]
    UnlockFailed,
    #[error("user presence check failed")]
    Bio,
    #[error("vault already has a master password")]
    AlreadyInitialized,
    #[error(transparent)]
    Header(HeaderError),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServiceError::NotFound,
            StoreError::Conflict => ServiceError::Conflict,
            other => ServiceError::Store(other),
        }
    }
}

impl From<HeaderError> for ServiceError {
    fn from(e: HeaderError) -> Self {
        ServiceError::Header(e)
    }
}

/// A decrypted credential as returned by `get`.
pub struct Credential {
    pub username: String,
    pub kind: String,
    pub secret: SecretString,
}

impl core::fmt::Debug for Credential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("kind", &self.kind)
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

/// Facade over header store, entry store and entry crypto.
///
/// The cached MEK makes the stateful API (`unlock` + `get`/`add`/...) work
/// for library callers; the host loop authenticates through the session
/// manager and passes per-call MEK copies into the `*_with` variants.
pub struct VaultService {
    paths: VaultPaths,
    store: EntryStore,
    kdf: KdfParams,
    mek: Option<MasterKey>,
    presence: Box<dyn UserPresence>,
    breach: Box<dyn BreachOracle>,
    estimator: Box<dyn StrengthEstimator>,
}

impl VaultService {
    pub fn open(paths: VaultPaths) -> Result<Self, ServiceError> {
        let store = EntryStore::open(&paths.dir)?;
        Ok(Self {
            paths,
            store,
            kdf: KdfParams::default(),
            mek: None,
            presence: Box::new(NoPresence),
            breach: Box::new(NoBreachOracle),
            estimator: Box::new(HeuristicEstimator),
        })
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_presence(mut self, presence: Box<dyn UserPresence>) -> Self {
        self.presence = presence;
        self
    }

    pub fn with_breach_oracle(mut self, breach: Box<dyn BreachOracle>) -> Self {
        self.breach = breach;
        self
    }

    pub fn with_estimator(mut self, estimator: Box<dyn StrengthEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    pub fn is_unlocked(&self) -> bool {
        self.mek.is_some()
    }

    /// True iff the vault has no header yet, or a header without wrap
    /// material.
    pub fn needs_master_setup(&self) -> Result<bool, ServiceError> {
        match load_header(&self.paths) {
            Ok(h) => Ok(!h.is_initialized()),
            Err(HeaderError::NotFound) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// First-time master setup: policy-check the password, derive a PDK over
    /// a fresh salt, generate a fresh MEK and persist the wrapped header.
    pub fn set_master(&mut self, user: &str, master: &str) -> Result<(), ServiceError> {
        if !self.needs_master_setup()? {
            return Err(ServiceError::AlreadyInitialized);
        }
        validate_master_password(master, self.estimator.as_ref(), self.breach.as_ref())?;

        let mut header = VaultHeader::new(user, self.kdf.clone());
        let mut salt = vec![0u8; self.kdf.salt_len as usize];
        fill_random(&mut salt)?;
        header.salt = Some(general_purpose::STANDARD.encode(&salt));

        let pdk = self.derive_pdk(master, &salt)?;
        let mek = MasterKey::generate()?;
        wrap_and_save(&self.paths, &mut header, &pdk, &mek)?;
        info!(user, "vault initialized");
        Ok(())
    }

    /// Unlock the vault: consult the user-presence oracle, derive the PDK
    /// from the stored salt and unwrap the MEK into RAM.
    ///
    /// Wrong password and corrupt wrap material are indistinguishable here
    /// on purpose.
    pub fn unlock(&mut self, master: &str) -> Result<MasterKey, ServiceError> {
        if self.presence.user_presence() == Presence::Denied {
            return Err(ServiceError::Bio);
        }
        let header = load_header(&self.paths)?;
        let salt = header.kdf_salt().map_err(|_| ServiceError::UnlockFailed)?;
        let pdk = self.derive_pdk_with(&header.kdf, master, &salt)?;
        let mek = match super::header::unwrap_mek(&header, &pdk) {
            Ok(mek) => mek,
            Err(HeaderError::NotWrapped) => return Err(ServiceError::Header(HeaderError::NotWrapped)),
            Err(_) => return Err(ServiceError::UnlockFailed),
        };
        let copy = mek.clone();
        self.mek = Some(mek);
        debug!("vault unlocked");
        Ok(copy)
    }

    /// Drop the cached MEK; it zeroizes on drop. Idempotent.
    pub fn lock(&mut self) {
        self.mek = None;
        debug!("vault locked");
    }

    /// Change the master password. Succeeds end-to-end or leaves the header
    /// untouched: all mutation happens on a copy that is only persisted by
    /// the final atomic rename.
    pub fn change_master(&mut self, old: &str, new: &str) -> Result<(), ServiceError> {
        validate_master_password(new, self.estimator.as_ref(), self.breach.as_ref())?;

        let mut header = load_header(&self.paths)?;
        let mek = match &self.mek {
            Some(mek) => mek.clone(),
            None => {
                let salt = header.kdf_salt().map_err(|_| ServiceError::UnlockFailed)?;
                let old_pdk = self.derive_pdk_with(&header.kdf, old, &salt)?;
                super::header::unwrap_mek(&header, &old_pdk)
                    .map_err(|_| ServiceError::UnlockFailed)?
            }
        };

        let mut new_salt = vec![0u8; header.kdf.salt_len as usize];
        fill_random(&mut new_salt)?;
        let new_pdk = self.derive_pdk_with(&header.kdf, new, &new_salt)?;
        header.salt = Some(general_purpose::STANDARD.encode(&new_salt));
        rewrap(&self.paths, &mut header, &new_pdk, &mek)?;
        info!("master password changed");
        Ok(())
    }

    // ===== Entry operations (explicit-key form) =====

    pub fn add_with(
        &self,
        mek: &MasterKey,
        website: &str,
        username: &str,
        secret: &str,
    ) -> Result<i64, ServiceError> {
        let cipher = encrypt_entry(mek.as_bytes(), secret.as_bytes())?;
        let id = self
            .store
            .insert(website, username, DEFAULT_ENTRY_KIND, &cipher)?;
        Ok(id)
    }

    /// Decrypt one credential; persist the rotated cipher before returning
    /// the plaintext so a crash never loses the row.
    pub fn get_with(
        &self,
        mek: &MasterKey,
        website: &str,
        username: &str,
    ) -> Result<Credential, ServiceError> {
        let row = self.store.get_by_site_and_user(website, username)?;
        self.decrypt_row_rotating(mek, row)
    }

    /// First credential for a site by ascending username, if any.
    pub fn get_first_with(
        &self,
        mek: &MasterKey,
        website: &str,
    ) -> Result<Option<Credential>, ServiceError> {
        let rows = self.store.get_by_website(website)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(self.decrypt_row_rotating(mek, row)?)),
            None => Ok(None),
        }
    }

    /// Insert, or on `(site, user)` conflict re-encrypt the existing row
    /// preserving its stored type. Returns the row id and whether a new row
    /// was created.
    pub fn save_with(
        &self,
        mek: &MasterKey,
        website: &str,
        username: &str,
        secret: &str,
    ) -> Result<(i64, bool), ServiceError> {
        match self.add_with(mek, website, username, secret) {
            Ok(id) => Ok((id, true)),
            Err(ServiceError::Conflict) => {
                self.update_with(mek, website, username, None, secret)?;
                let row = self.store.get_by_site_and_user(website, username)?;
                Ok((row.id, false))
            }
            Err(e) => Err(e),
        }
    }

    pub fn update_with(
        &self,
        mek: &MasterKey,
        website: &str,
        username: &str,
        new_kind: Option<&str>,
        new_secret: &str,
    ) -> Result<(), ServiceError> {
        let row = self.store.get_by_site_and_user(website, username)?;
        let kind = match new_kind {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => row.kind.clone(),
        };
        let cipher = encrypt_entry(mek.as_bytes(), new_secret.as_bytes())?;
        self.store.update_cipher(row.id, &kind, &cipher)?;
        Ok(())
    }

    // ===== Entry operations (stateful wrappers) =====

    pub fn add(&self, website: &str, username: &str, secret: &str) -> Result<i64, ServiceError> {
        let mek = self.require_unlocked()?;
        self.add_with(&mek, website, username, secret)
    }

    pub fn get(&self, website: &str, username: &str) -> Result<Credential, ServiceError> {
        let mek = self.require_unlocked()?;
        self.get_with(&mek, website, username)
    }

    pub fn update(
        &self,
        website: &str,
        username: &str,
        new_kind: Option<&str>,
        new_secret: &str,
    ) -> Result<(), ServiceError> {
        let mek = self.require_unlocked()?;
        self.update_with(&mek, website, username, new_kind, new_secret)
    }

    pub fn delete(&self, website: &str, username: &str) -> Result<(), ServiceError> {
        self.require_unlocked()?;
        self.store.delete_by_site_and_user(website, username)?;
        Ok(())
    }

    /// Metadata only: no ciphertext, no secrets.
    pub fn list(&self) -> Result<Vec<EntryMeta>, ServiceError> {
        self.require_unlocked()?;
        Ok(self.store.list()?)
    }

    // ===== internals =====

    fn require_unlocked(&self) -> Result<MasterKey, ServiceError> {
        self.mek.clone().ok_or(ServiceError::Locked)
    }

    fn decrypt_row_rotating(
        &self,
        mek: &MasterKey,
        row: super::store::EntryRow,
    ) -> Result<Credential, ServiceError> {
        let (plaintext, rotation) =
            decrypt_entry(mek.as_bytes(), &row.cipher.salt, &row.cipher.blob)
                .map_err(|_| ServiceError::Crypto(CryptoError::DecryptFail))?;

        // Persist rotation material before handing out the plaintext; a
        // failed decrypt above never mutates the store.
        if rotation_is_fresh(&rotation, &row.cipher) {
            self.store.update_cipher(row.id, &row.kind, &rotation)?;
        }

        let secret = std::str::from_utf8(&plaintext)
            .map_err(|_| ServiceError::Crypto(CryptoError::DecryptFail))?
            .to_string();
        drop(plaintext);
        Ok(Credential {
            username: row.username,
            kind: row.kind,
            secret: SecretString::new(secret.into()),
        })
    }

    fn derive_pdk(&self, master: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, ServiceError> {
        self.derive_pdk_with(&self.kdf, master, salt)
    }

    fn derive_pdk_with(
        &self,
        kdf: &KdfParams,
        master: &str,
        salt: &[u8],
    ) -> Result<Zeroizing<[u8; KEY_LEN]>, ServiceError> {
        Ok(derive_key_argon2id(
            master,
            salt,
            kdf.memory_mb,
            kdf.time,
            kdf.parallelism,
        )?)
    }
}

fn rotation_is_fresh(rotation: &EntryCipher, stored: &EntryCipher) -> bool {
    !rotation.blob.is_empty() && (rotation.salt != stored.salt || rotation.blob != stored.blob)
}
