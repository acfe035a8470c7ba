//! Volume-creation options and the configuration bytes they produce.
//!
//! The enclosing volume-creation layer hands the filter a free-form option
//! string. Its effects are encoded into the per-volume configuration bytes:
//! a bare 16-byte salt for `paranoid`, salt plus marker byte for `nogenkey`,
//! and salt plus fingerprint for the default mode, where the volume password
//! is established right away.

use rand::{rngs::OsRng, RngCore};
use tracing::error;
use valvfilter_host::SecretInput;

use crate::{
    error::{FilterError, Result},
    fingerprint,
    secure::LockedKey,
    session, FP_SIZE, SALT_SIZE,
};

/// Marker byte appended to the salt in nogenkey configuration data.
pub(crate) const NOGENKEY_MARKER: u8 = 0x01;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VolumeOptions {
    /// Never use key files; ask for the password every session.
    pub paranoid: bool,
    /// Don't establish a fingerprint at creation time; it is published via
    /// custom meta on the first upload instead.
    pub nogenkey: bool,
    /// Force a specific salt instead of generating one.
    pub salt: Option<[u8; SALT_SIZE]>,
}

/// The outcome of creating a volume configuration. In the default mode the
/// derived key is returned as well so the creation layer can seed the local
/// key cache.
pub struct VolumeConfig {
    pub cfgdata: Vec<u8>,
    pub key: Option<LockedKey>,
}

impl VolumeOptions {
    /// Parse a comma-separated option string: `paranoid`, `nogenkey`,
    /// `salt:HEX` (32 hex chars).
    pub fn parse(options: &str) -> Result<Self> {
        let mut parsed = Self::default();
        for option in options.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            if option == "paranoid" {
                parsed.paranoid = true;
            } else if option == "nogenkey" {
                parsed.nogenkey = true;
            } else if let Some(hex_salt) = option.strip_prefix("salt:") {
                if hex_salt.len() != SALT_SIZE * 2 {
                    error!("salt must be {} hex characters long", SALT_SIZE * 2);
                    return Err(FilterError::BadConfig);
                }
                let bytes = hex::decode(hex_salt).map_err(|err| {
                    error!("invalid salt: {err}");
                    FilterError::BadConfig
                })?;
                parsed.salt = Some(bytes.try_into().expect("length checked above"));
            } else {
                error!("unknown option '{option}'");
                return Err(FilterError::BadConfig);
            }
        }
        if parsed.paranoid && parsed.nogenkey {
            error!("'paranoid' and 'nogenkey' are mutually exclusive");
            return Err(FilterError::BadConfig);
        }
        Ok(parsed)
    }

    /// Render the configuration bytes for a new volume. The default mode
    /// prompts for the volume password (with re-entry) and embeds the
    /// resulting fingerprint.
    pub fn create_config(&self, input: &mut dyn SecretInput) -> Result<VolumeConfig> {
        let salt = match self.salt {
            Some(salt) => salt,
            None => {
                let mut salt = [0u8; SALT_SIZE];
                OsRng.try_fill_bytes(&mut salt).map_err(|err| {
                    error!("can't generate volume salt: {err}");
                    FilterError::RngFailed
                })?;
                salt
            }
        };

        if self.paranoid {
            return Ok(VolumeConfig {
                cfgdata: salt.to_vec(),
                key: None,
            });
        }
        if self.nogenkey {
            let mut cfgdata = salt.to_vec();
            cfgdata.push(NOGENKEY_MARKER);
            return Ok(VolumeConfig {
                cfgdata,
                key: None,
            });
        }

        let key = session::create_volume_key(input, &salt)?;
        let fp = fingerprint::create(&key)?;
        let mut cfgdata = Vec::with_capacity(SALT_SIZE + FP_SIZE);
        cfgdata.extend_from_slice(&salt);
        cfgdata.extend_from_slice(&fp);
        Ok(VolumeConfig {
            cfgdata,
            key: Some(key),
        })
    }
}
