//! Transparent AES-256-CBC-HMAC-512 encryption for volume uploads and
//! downloads.
//!
//! Every file pushed through the filter is framed into blocks of
//!
//! - iv (128 bits) - the chained IV this block was encrypted under
//! - ciphertext - 16 KiB of plaintext, PKCS#7-padded (always at least one
//!   byte of padding)
//! - mac (256 bits) - HMAC-SHA-512 over `iv || ciphertext`, truncated to its
//!   first half
//!
//! IVs chain deterministically: each block's IV is an HMAC-SHA-1 of the
//! previous chain state and the block plaintext, so identical plaintext
//! streams produce identical ciphertext streams while IVs never repeat
//! across blocks. Decryption reads the IV from the frame and verifies the
//! MAC in constant time before touching the ciphertext.
//!
//! The 64-byte session key is derived from the volume password with bcrypt
//! (cost 2^14) and SHA-512, cached in the per-volume config directory, and
//! checked against the fingerprint published in the volume's custom
//! metadata, which is also how a remote password change is detected.

mod codec;
pub mod error;
mod fingerprint;
pub mod io;
mod kdf;
pub mod options;
mod secure;
mod session;
mod stream;

pub use error::{FilterError, Result};
pub use io::FilterWriter;
pub use options::{VolumeConfig, VolumeOptions};
pub use secure::LockedKey;
pub use stream::Aes256Filter;

use valvfilter_host::{AbiVersion, FilterKind, FilterSpec};

/// Plaintext framing unit on upload.
pub const FILTER_BLOCK_SIZE: usize = 16_384;

/// One full framed block: IV, padded plaintext, MAC. Also the staging
/// threshold on download.
pub const FRAMED_BLOCK_SIZE: usize = IV_SIZE + FILTER_BLOCK_SIZE + AES_BLOCK_SIZE + MAC_SIZE;

pub const KEY_SIZE: usize = 64;
pub const IV_SIZE: usize = 16;
pub const MAC_SIZE: usize = 32;
pub const SALT_SIZE: usize = 16;
pub const AES_BLOCK_SIZE: usize = 16;

/// A fingerprint: its own salt followed by the derived digest.
pub const FP_SIZE: usize = SALT_SIZE + KEY_SIZE;

/// Descriptor under which the filter registers with the host.
pub const FILTER_SPEC: FilterSpec = FilterSpec {
    name: "aes256",
    summary: "Encrypt data using AES-256-CBC-HMAC-512 mode.",
    description: "The filter automatically encrypts and decrypts all data \
                  using AES-256 in CBC-HMAC-512 mode.",
    options: "\n\tnogenkey (don't generate a key file when creating a volume)\
              \n\tparanoid (don't use key files at all - always ask for a password)\
              \n\tsalt:HEX (force given salt, HEX must be 32 chars long)",
    uuid: "35a5404d-1513-4009-904c-6ee5b0cd8634",
    kind: FilterKind::Crypt,
    abi: AbiVersion { major: 1, minor: 6 },
};
