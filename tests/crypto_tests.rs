use krypta::cryptography::entry::{decrypt_entry, encrypt_entry};
use krypta::cryptography::primitives::{
    aead_decrypt, aead_encrypt, ct_eq, derive_entry_key, derive_key_argon2id, CryptoError,
    ENTRY_SALT_LEN, KEY_LEN, NONCE_LEN,
};
use proptest::prelude::*;

#[test]
fn aead_seals_with_fresh_nonces() {
    let key = [1u8; KEY_LEN];
    let (n1, c1) = aead_encrypt(&key, b"data", b"").unwrap();
    let (n2, c2) = aead_encrypt(&key, b"data", b"").unwrap();
    assert_ne!(n1, n2, "nonces must be fresh per call");
    assert_ne!(c1, c2);
    assert_eq!(c1.len(), 4 + 16);
}

#[test]
fn aead_rejects_wrong_key_nonce_and_aad() {
    let key = [1u8; KEY_LEN];
    let (nonce, ct) = aead_encrypt(&key, b"data", b"ctx").unwrap();

    let wrong_key = [2u8; KEY_LEN];
    assert!(matches!(
        aead_decrypt(&wrong_key, &nonce, &ct, b"ctx"),
        Err(CryptoError::DecryptFail)
    ));
    assert!(matches!(
        aead_decrypt(&key, &[0u8; NONCE_LEN], &ct, b"ctx"),
        Err(CryptoError::DecryptFail)
    ));
    assert!(matches!(
        aead_decrypt(&key, &nonce[..11], &ct, b"ctx"),
        Err(CryptoError::InvalidNonceLen)
    ));
}

#[test]
fn argon2id_is_deterministic_per_salt() {
    let salt = [7u8; 12];
    let a = derive_key_argon2id("pw", &salt, 8, 1, 1).unwrap();
    let b = derive_key_argon2id("pw", &salt, 8, 1, 1).unwrap();
    assert_eq!(&a[..], &b[..]);

    let other_salt = [8u8; 12];
    let c = derive_key_argon2id("pw", &other_salt, 8, 1, 1).unwrap();
    assert_ne!(&a[..], &c[..]);
}

#[test]
fn hkdf_entry_keys_are_salt_separated() {
    let mek = [5u8; KEY_LEN];
    let k1 = derive_entry_key(&mek, &[0u8; ENTRY_SALT_LEN]);
    let k2 = derive_entry_key(&mek, &[1u8; ENTRY_SALT_LEN]);
    assert_ne!(&k1[..], &k2[..]);
    assert_eq!(k1.len(), KEY_LEN);
}

#[test]
fn token_compare_is_exact() {
    let a = [0xAAu8; 32];
    let mut b = a;
    assert!(ct_eq(&a, &b));
    for k in 0..32 {
        b = a;
        b[k] ^= 0x01;
        assert!(!ct_eq(&a, &b), "difference at byte {k} must be detected");
    }
}

proptest! {
    #[test]
    fn entry_roundtrip(mek in any::<[u8; KEY_LEN]>(), plaintext in prop::collection::vec(any::<u8>(), 0..256)) {
        let cipher = encrypt_entry(&mek, &plaintext).unwrap();
        let (pt, _rot) = decrypt_entry(&mek, &cipher.salt, &cipher.blob).unwrap();
        prop_assert_eq!(&pt[..], &plaintext[..]);
    }

    #[test]
    fn rotation_preserves_plaintext_and_refreshes_material(
        mek in any::<[u8; KEY_LEN]>(),
        plaintext in prop::collection::vec(any::<u8>(), 1..128),
    ) {
        let first = encrypt_entry(&mek, &plaintext).unwrap();
        let (_, rot) = decrypt_entry(&mek, &first.salt, &first.blob).unwrap();
        prop_assert_ne!(&rot.salt, &first.salt);
        prop_assert_ne!(&rot.blob, &first.blob);

        let (pt, _) = decrypt_entry(&mek, &rot.salt, &rot.blob).unwrap();
        prop_assert_eq!(&pt[..], &plaintext[..]);
    }

    #[test]
    fn wrong_mek_never_decrypts(
        mek in any::<[u8; KEY_LEN]>(),
        other in any::<[u8; KEY_LEN]>(),
        plaintext in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        prop_assume!(mek != other);
        let cipher = encrypt_entry(&mek, &plaintext).unwrap();
        prop_assert!(decrypt_entry(&other, &cipher.salt, &cipher.blob).is_err());
    }
}
