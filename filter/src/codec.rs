//! Per-block encrypt-then-MAC codec with a deterministic chained IV.
//!
//! Each framed block on the wire is `iv(16) || ciphertext || mac(32)`. The IV
//! for block *n* is the leading 16 bytes of HMAC-SHA-1 over the previous
//! block's chain state and the block plaintext, which keeps encryption
//! deterministic per stream without reusing an IV across blocks. The MAC is
//! HMAC-SHA-512 over `iv || ciphertext`, truncated to its first half.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha512;
use subtle::ConstantTimeEq;
use tracing::error;

use crate::{
    error::{FilterError, Result},
    secure::LockedKey,
    AES_BLOCK_SIZE, IV_SIZE, MAC_SIZE,
};

type HmacSha1 = Hmac<Sha1>;
type HmacSha512 = Hmac<Sha512>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Width of the chained-IV accumulator. HMAC-SHA-1 fills the first 20 bytes
/// after each encrypted block and the tail stays zero; the full width is
/// absorbed when deriving the next IV and is part of the wire format.
const IV_CHAIN_WIDTH: usize = 64;

/// One session's codec state. Encryption advances the IV chain; decryption
/// never does, since the IV travels inside each frame.
pub(crate) struct BlockCodec {
    iv_hmac: HmacSha1,
    block_hmac: HmacSha512,
    iv_mac: [u8; IV_CHAIN_WIDTH],
}

impl BlockCodec {
    pub(crate) fn new(key: &LockedKey) -> Self {
        Self {
            iv_hmac: HmacSha1::new_from_slice(key.hmac_key())
                .expect("HMAC can take a key of any size"),
            block_hmac: HmacSha512::new_from_slice(key.hmac_key())
                .expect("HMAC can take a key of any size"),
            iv_mac: [0u8; IV_CHAIN_WIDTH],
        }
    }

    /// Encrypt one plaintext block into `out` as `iv || ciphertext || mac`.
    /// Returns the framed length. `out` must hold the padded block plus the
    /// frame overhead.
    pub(crate) fn encrypt_block(
        &mut self,
        key: &LockedKey,
        plaintext: &[u8],
        out: &mut [u8],
    ) -> Result<usize> {
        let mut prf = self.iv_hmac.clone();
        prf.update(&self.iv_mac);
        prf.update(plaintext);
        let chained = prf.finalize().into_bytes();
        // iv of the next block depends on the iv of this one
        self.iv_mac[..chained.len()].copy_from_slice(&chained);

        out[..IV_SIZE].copy_from_slice(&chained[..IV_SIZE]);
        let ciphertext_len = Aes256CbcEnc::new_from_slices(key.cipher_key(), &chained[..IV_SIZE])
            .expect("key and IV sizes are fixed")
            .encrypt_padded_b2b_mut::<Pkcs7>(plaintext, &mut out[IV_SIZE..])
            .expect("output buffer holds a padded block")
            .len();

        let signed_len = IV_SIZE + ciphertext_len;
        let mut mac = self.block_hmac.clone();
        mac.update(&out[..signed_len]);
        let tag = mac.finalize().into_bytes();
        out[signed_len..signed_len + MAC_SIZE].copy_from_slice(&tag[..MAC_SIZE]);
        Ok(signed_len + MAC_SIZE)
    }

    /// Verify and decrypt one framed block into `out`, returning the
    /// plaintext length. `out` must be at least as large as the frame.
    pub(crate) fn decrypt_block(
        &mut self,
        key: &LockedKey,
        framed: &[u8],
        out: &mut [u8],
    ) -> Result<usize> {
        if framed.len() < IV_SIZE + MAC_SIZE {
            error!("incomplete data: {} bytes", framed.len());
            return Err(FilterError::DecryptFailed);
        }
        let (signed, tag) = framed.split_at(framed.len() - MAC_SIZE);

        let mut mac = self.block_hmac.clone();
        mac.update(signed);
        let expected = mac.finalize().into_bytes();
        if !hmac_compare(&expected[..MAC_SIZE], tag) {
            error!("HMAC mismatch (invalid password/key file or broken data)");
            return Err(FilterError::AuthFailed);
        }

        let (iv, ciphertext) = signed.split_at(IV_SIZE);
        if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
            error!("truncated ciphertext: {} bytes", ciphertext.len());
            return Err(FilterError::DecryptFailed);
        }
        let plaintext_len = Aes256CbcDec::new_from_slices(key.cipher_key(), iv)
            .expect("key and IV sizes are fixed")
            .decrypt_padded_b2b_mut::<Pkcs7>(ciphertext, out)
            .map_err(|_| {
                error!("decryption failed (invalid password/key file or broken data)");
                FilterError::DecryptFailed
            })?
            .len();
        Ok(plaintext_len)
    }
}

/// Constant-time MAC comparison; every byte is examined regardless of where
/// the first mismatch sits.
pub(crate) fn hmac_compare(left: &[u8], right: &[u8]) -> bool {
    left.ct_eq(right).into()
}
