//! Session key establishment.
//!
//! A session key can come from three places, tried in order: the volume
//! configuration bytes (possibly substituted by the fingerprint published in
//! the volume's custom metadata), the local key cache in the per-volume
//! config directory, and finally an interactive password prompt. The local
//! caches are reconciled against the published fingerprint first so that a
//! volume password change invalidates a stale cached key before it is ever
//! used.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info, warn};
use valvfilter_host::{MetaStore, Mode, SecretInput};

use crate::{
    error::{FilterError, Result},
    fingerprint, kdf,
    secure::LockedKey,
    FP_SIZE, SALT_SIZE,
};

/// Key of the fingerprint entry in the volume's custom metadata.
pub(crate) const META_FINGERPRINT: &str = "aes256_fp";

/// Name of the local key cache inside the config directory.
const KEYFILE_NAME: &str = "key";

/// Name of the cached copy of the published fingerprint entry.
const CUSTFP_NAME: &str = "custfp";

const MIN_PASSWORD_LEN: usize = 8;

pub(crate) struct KeySource {
    pub key: LockedKey,
    pub keyfile: Option<PathBuf>,
}

pub(crate) fn establish(
    mode: Mode,
    filename: &str,
    cfgdata: Option<&[u8]>,
    cfgdir: &Path,
    meta: &mut dyn MetaStore,
    input: &mut dyn SecretInput,
) -> Result<KeySource> {
    // With no config or a bare "nogenkey" config, the fingerprint published
    // in custom meta takes over as the effective configuration.
    let mut meta_cfgdata = None;
    if cfgdata.map_or(true, |data| data.len() == SALT_SIZE + 1) {
        if let Some(mdata) = meta.get(META_FINGERPRINT) {
            reconcile_custfp(cfgdir, &mdata)?;
            meta_cfgdata = Some(mdata);
        }
    }
    let Some(cfgdata) = meta_cfgdata.as_deref().or(cfgdata) else {
        error!("no volume configuration data and no published fingerprint");
        return Err(FilterError::BadConfig);
    };

    let mut salt = [0u8; SALT_SIZE];
    let mut fp = [0u8; FP_SIZE];
    let have_fp;
    match cfgdata.len() {
        // Paranoid mode: salt only, no key file is ever used.
        SALT_SIZE => {
            info!(
                "file '{}' will be {} with provided password",
                filename,
                match mode {
                    Mode::Upload => "encrypted",
                    Mode::Download => "decrypted",
                }
            );
            salt.copy_from_slice(cfgdata);
            let key = prompt_derive(input, mode, mode == Mode::Upload, &salt)?;
            return Ok(KeySource { key, keyfile: None });
        }
        // Nogenkey mode: salt plus marker, no fingerprint available.
        len if len == SALT_SIZE + 1 => {
            salt.copy_from_slice(&cfgdata[..SALT_SIZE]);
            have_fp = false;
        }
        len if len == SALT_SIZE + FP_SIZE => {
            salt.copy_from_slice(&cfgdata[..SALT_SIZE]);
            fp.copy_from_slice(&cfgdata[SALT_SIZE..]);
            have_fp = true;
        }
        len => {
            error!("invalid configuration data: {len} bytes");
            return Err(FilterError::BadConfig);
        }
    }

    let keyfile = cfgdir.join(KEYFILE_NAME);
    if let Some(key) = read_cached_key(&keyfile, have_fp) {
        return Ok(KeySource {
            key,
            keyfile: Some(keyfile),
        });
    }

    let mut saw_mismatch = false;
    let key = loop {
        let key = match prompt_derive(input, mode, !have_fp && mode == Mode::Upload, &salt) {
            Ok(key) => key,
            // The prompt gave up after at least one rejected password.
            Err(_) if saw_mismatch => return Err(FilterError::BadPassword),
            Err(err) => return Err(err),
        };
        if !have_fp {
            break key;
        }
        match fingerprint::verify(&key, &fp) {
            Ok(()) => break key,
            Err(FilterError::BadPassword) => {
                error!("invalid password");
                saw_mismatch = true;
            }
            Err(err) => return Err(err),
        }
    };

    if !have_fp {
        let fp = fingerprint::create(&key)?;
        let mut mdata = Vec::with_capacity(SALT_SIZE + FP_SIZE);
        mdata.extend_from_slice(&salt);
        mdata.extend_from_slice(&fp);
        meta.set(META_FINGERPRINT, &mdata).map_err(|err| {
            error!("failed to set custom meta: {err}");
            FilterError::Host(err)
        })?;
    }

    write_cached_key(&keyfile, &key);
    Ok(KeySource {
        key,
        keyfile: Some(keyfile),
    })
}

/// Compare the published fingerprint entry against its locally cached copy.
/// A difference means the volume owner changed the password: both the copy
/// and the key cache are dropped, and the fresh copy is written on the next
/// setup round.
fn reconcile_custfp(cfgdir: &Path, mdata: &[u8]) -> Result<()> {
    let custfp = cfgdir.join(CUSTFP_NAME);
    match fs_err::read(&custfp) {
        Ok(cached) => {
            if cached != mdata {
                info!("detected volume password change");
                let _ = fs_err::remove_file(&custfp);
                let _ = fs_err::remove_file(cfgdir.join(KEYFILE_NAME));
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            write_private(&custfp, mdata)?;
        }
        Err(err) => {
            error!("can't read file {}: {err}", custfp.display());
            return Err(err.into());
        }
    }
    Ok(())
}

fn read_cached_key(keyfile: &Path, have_fp: bool) -> Option<LockedKey> {
    match fs_err::File::open(keyfile) {
        Ok(mut file) => {
            let mut key = LockedKey::new();
            match file.read_exact(key.bytes_mut()) {
                Ok(()) => Some(key),
                Err(_) => {
                    warn!(
                        "can't read key file {} -- new key file will be created",
                        keyfile.display()
                    );
                    None
                }
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            if have_fp {
                info!("the local key file doesn't exist and will be created now");
            } else {
                info!("first upload to the encrypted volume, set the volume password now");
            }
            None
        }
        Err(_) => {
            warn!(
                "can't open key file {} -- attempt to recreate it",
                keyfile.display()
            );
            None
        }
    }
}

/// Best effort: a session works fine without a key cache, so any failure
/// here only removes the partial file and logs a warning.
fn write_cached_key(keyfile: &Path, key: &LockedKey) {
    if let Err(err) = write_private(keyfile, key.as_bytes()) {
        warn!(
            "can't write key data to file {} ({err}) -- continuing without key file",
            keyfile.display()
        );
        let _ = fs_err::remove_file(keyfile);
    }
}

/// Create `path` with mode 0600 and write `data` to it.
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut options = fs_err::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use fs_err::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Establish the password for a brand-new volume: prompt with re-entry and
/// derive the key that seeds the volume fingerprint.
pub(crate) fn create_volume_key(
    input: &mut dyn SecretInput,
    salt: &[u8; SALT_SIZE],
) -> Result<LockedKey> {
    prompt_derive(input, Mode::Upload, true, salt)
}

fn prompt_derive(
    input: &mut dyn SecretInput,
    mode: Mode,
    confirm: bool,
    salt: &[u8; SALT_SIZE],
) -> Result<LockedKey> {
    let password = read_password(input, mode, confirm)?;
    kdf::derive_key(password.expose_secret(), salt)
}

/// Ask for a password, enforcing the minimum length and, for first uploads,
/// a matching re-entry. Retries until the input source itself gives up.
fn read_password(input: &mut dyn SecretInput, mode: Mode, confirm: bool) -> Result<SecretString> {
    let prompt = match mode {
        Mode::Upload => "[aes256]: Enter encryption password: ",
        Mode::Download => "[aes256]: Enter decryption password: ",
    };
    loop {
        let password = input.prompt_sensitive(prompt).map_err(|err| {
            warn!("can't obtain password");
            FilterError::Host(err)
        })?;
        if password.expose_secret().len() < MIN_PASSWORD_LEN {
            warn!("password must be at least {MIN_PASSWORD_LEN} characters long");
            continue;
        }
        if confirm {
            let again = input
                .prompt_sensitive("[aes256]: Re-enter encryption password: ")
                .map_err(|err| {
                    warn!("can't obtain password");
                    FilterError::Host(err)
                })?;
            if password.expose_secret() != again.expose_secret() {
                warn!("passwords don't match");
                continue;
            }
        }
        return Ok(password);
    }
}
