use krypta::policy::{BreachOracle, Presence, UserPresence};
use krypta::vault::header::{KdfParams, VaultPaths};
use krypta::vault::service::{ServiceError, VaultService};
use secrecy::ExposeSecret;
use tempfile::tempdir;

const MASTER: &str = "Correct-Horse-9!";
const NEW_MASTER: &str = "Zr7!q-LongerPass#42";

fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_mb: 8,
        time: 1,
        ..Default::default()
    }
}

fn fresh_service(dir: &tempfile::TempDir) -> VaultService {
    VaultService::open(VaultPaths::new(dir.path().join("vault")))
        .unwrap()
        .with_kdf(fast_kdf())
}

fn initialized_service(dir: &tempfile::TempDir) -> VaultService {
    let mut service = fresh_service(dir);
    service.set_master("alice", MASTER).unwrap();
    service
}

#[test]
fn fresh_vault_requires_setup_then_unlocks() {
    let dir = tempdir().unwrap();
    let mut service = fresh_service(&dir);
    assert!(service.needs_master_setup().unwrap());

    service.set_master("alice", MASTER).unwrap();
    assert!(!service.needs_master_setup().unwrap());

    let mek = service.unlock(MASTER).unwrap();
    assert!(service.is_unlocked());
    assert_eq!(mek.as_bytes().len(), 32);
}

#[test]
fn set_master_rejects_weak_passwords() {
    let dir = tempdir().unwrap();
    let mut service = fresh_service(&dir);
    for weak in ["short", "alllowercase99!", "NoDigitsHere!!!", "NoSpecials99ZZ"] {
        assert!(
            matches!(
                service.set_master("alice", weak),
                Err(ServiceError::Policy(_))
            ),
            "{weak} should fail policy"
        );
    }
    // vault untouched
    assert!(service.needs_master_setup().unwrap());
}

#[test]
fn set_master_twice_is_rejected() {
    let dir = tempdir().unwrap();
    let mut service = initialized_service(&dir);
    assert!(matches!(
        service.set_master("alice", MASTER),
        Err(ServiceError::AlreadyInitialized)
    ));
}

#[test]
fn wrong_password_fails_generically() {
    let dir = tempdir().unwrap();
    let mut service = initialized_service(&dir);
    assert!(matches!(
        service.unlock("wrong"),
        Err(ServiceError::UnlockFailed)
    ));
    assert!(!service.is_unlocked());
}

struct DenyingPresence;
impl UserPresence for DenyingPresence {
    fn user_presence(&self) -> Presence {
        Presence::Denied
    }
}

#[test]
fn denied_presence_blocks_unlock() {
    let dir = tempdir().unwrap();
    let mut service = initialized_service(&dir).with_presence(Box::new(DenyingPresence));
    assert!(matches!(service.unlock(MASTER), Err(ServiceError::Bio)));
}

struct LeakedOracle;
impl BreachOracle for LeakedOracle {
    fn breached(&self, _pw: &str) -> Option<bool> {
        Some(true)
    }
}

#[test]
fn breached_master_is_rejected_at_setup() {
    let dir = tempdir().unwrap();
    let mut service = fresh_service(&dir).with_breach_oracle(Box::new(LeakedOracle));
    assert!(matches!(
        service.set_master("alice", MASTER),
        Err(ServiceError::Policy(_))
    ));
}

#[test]
fn entry_ops_require_unlock() {
    let dir = tempdir().unwrap();
    let service = initialized_service(&dir);
    assert!(matches!(
        service.add("example.com", "alice", "hunter2"),
        Err(ServiceError::Locked)
    ));
    assert!(matches!(
        service.get("example.com", "alice"),
        Err(ServiceError::Locked)
    ));
    assert!(matches!(service.list(), Err(ServiceError::Locked)));
    assert!(matches!(
        service.delete("example.com", "alice"),
        Err(ServiceError::Locked)
    ));
}

#[test]
fn add_get_update_delete_cycle() {
    let dir = tempdir().unwrap();
    let mut service = initialized_service(&dir);
    service.unlock(MASTER).unwrap();

    let id = service.add("example.com", "alice", "hunter2").unwrap();
    assert_eq!(id, 1);
    assert!(matches!(
        service.add("example.com", "alice", "other"),
        Err(ServiceError::Conflict)
    ));

    let credential = service.get("example.com", "alice").unwrap();
    assert_eq!(credential.username, "alice");
    assert_eq!(credential.kind, "password");
    assert_eq!(credential.secret.expose_secret(), "hunter2");

    service
        .update("example.com", "alice", None, "hunter3")
        .unwrap();
    let credential = service.get("example.com", "alice").unwrap();
    assert_eq!(credential.secret.expose_secret(), "hunter3");
    assert_eq!(credential.kind, "password", "empty new type preserves old");

    service
        .update("example.com", "alice", Some("totp"), "JBSWY3DP")
        .unwrap();
    let credential = service.get("example.com", "alice").unwrap();
    assert_eq!(credential.kind, "totp");

    let listing = service.list().unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].website, "example.com");

    service.delete("example.com", "alice").unwrap();
    assert!(matches!(
        service.get("example.com", "alice"),
        Err(ServiceError::NotFound)
    ));
}

#[test]
fn read_rotates_stored_material() {
    let dir = tempdir().unwrap();
    let mut service = initialized_service(&dir);
    let mek = service.unlock(MASTER).unwrap();

    service.add("example.com", "alice", "hunter2").unwrap();

    // Observe material via a direct store handle
    let store = krypta::vault::store::EntryStore::open(&dir.path().join("vault")).unwrap();
    let before = store.get_by_site_and_user("example.com", "alice").unwrap();

    let credential = service.get_with(&mek, "example.com", "alice").unwrap();
    assert_eq!(credential.secret.expose_secret(), "hunter2");

    let after = store.get_by_site_and_user("example.com", "alice").unwrap();
    assert_ne!(after.cipher.salt, before.cipher.salt, "salt must rotate on read");
    assert_ne!(after.cipher.blob, before.cipher.blob, "blob must rotate on read");

    // And the rotated row still decrypts
    let credential = service.get_with(&mek, "example.com", "alice").unwrap();
    assert_eq!(credential.secret.expose_secret(), "hunter2");
}

#[test]
fn save_with_updates_existing_row() {
    let dir = tempdir().unwrap();
    let mut service = initialized_service(&dir);
    let mek = service.unlock(MASTER).unwrap();

    let (id, created) = service.save_with(&mek, "example.com", "alice", "hunter2").unwrap();
    assert!(created);
    let (id2, created2) = service.save_with(&mek, "example.com", "alice", "hunter3").unwrap();
    assert_eq!(id, id2);
    assert!(!created2);

    let credential = service.get_with(&mek, "example.com", "alice").unwrap();
    assert_eq!(credential.secret.expose_secret(), "hunter3");
}

#[test]
fn get_first_orders_by_username() {
    let dir = tempdir().unwrap();
    let mut service = initialized_service(&dir);
    let mek = service.unlock(MASTER).unwrap();

    service.add("example.com", "zoe", "pw-z").unwrap();
    service.add("example.com", "amy", "pw-a").unwrap();

    let first = service.get_first_with(&mek, "example.com").unwrap().unwrap();
    assert_eq!(first.username, "amy");
    assert!(service.get_first_with(&mek, "missing.org").unwrap().is_none());
}

#[test]
fn change_master_preserves_entries() {
    let dir = tempdir().unwrap();
    let mut service = initialized_service(&dir);
    service.unlock(MASTER).unwrap();
    service.add("example.com", "alice", "hunter2").unwrap();
    service.lock();

    service.change_master(MASTER, NEW_MASTER).unwrap();

    assert!(matches!(
        service.unlock(MASTER),
        Err(ServiceError::UnlockFailed)
    ));
    service.unlock(NEW_MASTER).unwrap();
    let credential = service.get("example.com", "alice").unwrap();
    assert_eq!(credential.secret.expose_secret(), "hunter2");
}

#[test]
fn change_master_with_wrong_old_leaves_header_alone() {
    let dir = tempdir().unwrap();
    let mut service = initialized_service(&dir);
    assert!(matches!(
        service.change_master("wrong", NEW_MASTER),
        Err(ServiceError::UnlockFailed)
    ));
    // old password still works
    service.unlock(MASTER).unwrap();
}

#[test]
fn change_master_rejects_weak_replacement() {
    let dir = tempdir().unwrap();
    let mut service = initialized_service(&dir);
    assert!(matches!(
        service.change_master(MASTER, "weak"),
        Err(ServiceError::Policy(_))
    ));
    service.unlock(MASTER).unwrap();
}

#[test]
fn lock_is_idempotent_and_drops_access() {
    let dir = tempdir().unwrap();
    let mut service = initialized_service(&dir);
    service.unlock(MASTER).unwrap();
    service.lock();
    service.lock();
    assert!(!service.is_unlocked());
    assert!(matches!(
        service.get("example.com", "alice"),
        Err(ServiceError::Locked)
    ));
}
