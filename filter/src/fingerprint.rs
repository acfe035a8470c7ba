//! Key fingerprints: prove that a candidate key matches the one the volume
//! was created with, without storing the key anywhere.
//!
//! A fingerprint is `fp_salt(16) || digest(64)` where the digest is the
//! key-derivation function applied to the hex-encoded SHA-256 of the key,
//! salted with `fp_salt`. The fingerprint salt is independent of the volume
//! salt used for the session key itself.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::error;

use crate::{
    error::{FilterError, Result},
    kdf,
    secure::LockedKey,
    FP_SIZE, SALT_SIZE,
};

/// Create a fresh fingerprint for `key` under a random salt.
pub(crate) fn create(key: &LockedKey) -> Result<[u8; FP_SIZE]> {
    let mut fp_salt = [0u8; SALT_SIZE];
    OsRng.try_fill_bytes(&mut fp_salt).map_err(|err| {
        error!("can't generate fingerprint salt: {err}");
        FilterError::RngFailed
    })?;

    let digest = digest_for(key, &fp_salt)?;
    let mut fp = [0u8; FP_SIZE];
    fp[..SALT_SIZE].copy_from_slice(&fp_salt);
    fp[SALT_SIZE..].copy_from_slice(digest.as_bytes());
    Ok(fp)
}

/// Verify `key` against an existing fingerprint.
pub(crate) fn verify(key: &LockedKey, fp: &[u8; FP_SIZE]) -> Result<()> {
    let mut fp_salt = [0u8; SALT_SIZE];
    fp_salt.copy_from_slice(&fp[..SALT_SIZE]);
    let expected = &fp[SALT_SIZE..];

    let digest = digest_for(key, &fp_salt)?;
    if !bool::from(digest.as_bytes().ct_eq(expected)) {
        return Err(FilterError::BadPassword);
    }
    Ok(())
}

/// The fingerprint digest: KDF over the hex form of SHA-256(key).
fn digest_for(key: &LockedKey, fp_salt: &[u8; SALT_SIZE]) -> Result<LockedKey> {
    let key_hash: [u8; 32] = Sha256::digest(key.as_bytes()).into();
    kdf::derive_key(&hex::encode(key_hash), fp_salt).map_err(|err| {
        error!("can't create key fingerprint");
        err
    })
}
