//! Password to session key derivation.

use sha2::{Digest, Sha512};
use tracing::error;
use zeroize::Zeroize;

use crate::{
    error::{FilterError, Result},
    secure::LockedKey,
    SALT_SIZE,
};

/// bcrypt cost factor; 2^14 iterations.
pub(crate) const BCRYPT_COST: u32 = 14;

/// Derive the 64-byte session key from a password and the volume salt.
///
/// bcrypt produces a textual hash containing the setting, the salt and the
/// hashed password; that whole string is hashed once more with SHA-512 so
/// the visible salt portion can never end up as key material.
pub(crate) fn derive_key(password: &str, salt: &[u8; SALT_SIZE]) -> Result<LockedKey> {
    let parts = bcrypt::hash_with_salt(password, BCRYPT_COST, *salt).map_err(|err| {
        error!("failed to derive key: {err}");
        FilterError::KdfFailed
    })?;
    let mut setting = parts.format_for_version(bcrypt::Version::TwoB);
    let mut digest = [0u8; 64];
    digest.copy_from_slice(&Sha512::digest(setting.as_bytes()));
    setting.zeroize();

    let mut key = LockedKey::new();
    key.bytes_mut().copy_from_slice(&digest);
    digest.zeroize();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_key() {
        let salt = [7u8; SALT_SIZE];
        let first = derive_key("password1", &salt).unwrap();
        let second = derive_key("password1", &salt).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn key_depends_on_password_and_salt() {
        let salt = [7u8; SALT_SIZE];
        let base = derive_key("password1", &salt).unwrap();
        let other_password = derive_key("password2", &salt).unwrap();
        assert_ne!(base.as_bytes(), other_password.as_bytes());
        let other_salt = derive_key("password1", &[8u8; SALT_SIZE]).unwrap();
        assert_ne!(base.as_bytes(), other_salt.as_bytes());
    }
}
