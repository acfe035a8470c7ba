//! Session key storage that stays out of swap.

use zeroize::Zeroize;

use crate::KEY_SIZE;

/// The 64-byte session key, locked in RAM for its whole lifetime.
///
/// The first half keys the two HMAC states, the second half keys
/// AES-256-CBC. The bytes live on the heap so the locked address stays
/// stable while the guard itself moves; on drop they are wiped before the
/// pages are released back to the swappable pool.
pub struct LockedKey {
    bytes: Box<[u8; KEY_SIZE]>,
}

impl LockedKey {
    pub(crate) fn new() -> Self {
        let bytes = Box::new([0u8; KEY_SIZE]);
        lock(bytes.as_slice());
        Self { bytes }
    }

    pub(crate) fn from_bytes(mut raw: [u8; KEY_SIZE]) -> Self {
        let mut key = Self::new();
        key.bytes.copy_from_slice(&raw);
        raw.zeroize();
        key
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8; KEY_SIZE] {
        &mut self.bytes
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Key material for the IV PRF and the block MAC.
    pub(crate) fn hmac_key(&self) -> &[u8] {
        &self.bytes[..KEY_SIZE / 2]
    }

    /// Key material for the AES-256-CBC states.
    pub(crate) fn cipher_key(&self) -> &[u8] {
        &self.bytes[KEY_SIZE / 2..]
    }
}

impl Drop for LockedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
        unlock(self.bytes.as_slice());
    }
}

impl std::fmt::Debug for LockedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedKey").finish()
    }
}

// Best effort; sessions must keep working when RLIMIT_MEMLOCK is exhausted.
#[cfg(unix)]
fn lock(bytes: &[u8]) {
    let _ = unsafe { libc::mlock(bytes.as_ptr().cast(), bytes.len()) };
}

#[cfg(unix)]
fn unlock(bytes: &[u8]) {
    let _ = unsafe { libc::munlock(bytes.as_ptr().cast(), bytes.len()) };
}

#[cfg(not(unix))]
fn lock(_bytes: &[u8]) {}

#[cfg(not(unix))]
fn unlock(_bytes: &[u8]) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_split_at_32() {
        let mut raw = [0u8; KEY_SIZE];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let key = LockedKey::from_bytes(raw);
        assert_eq!(key.hmac_key().len(), 32);
        assert_eq!(key.cipher_key().len(), 32);
        assert_eq!(key.hmac_key()[31], 31);
        assert_eq!(key.cipher_key()[0], 32);
    }

    #[test]
    fn from_bytes_preserves_content() {
        let raw = [0xaau8; KEY_SIZE];
        let key = LockedKey::from_bytes(raw);
        assert_eq!(key.as_bytes(), &[0xaau8; KEY_SIZE]);
    }
}
