//! The per-file filter session and its streaming state machine.
//!
//! The host pushes arbitrary-sized input chunks through [`Aes256Filter::process`]
//! and passes the returned [`Action`] back in on the next call. The filter
//! stages bytes until a full block is available (16 KiB of plaintext on
//! upload, one full framed block on download), runs the codec, and emits the
//! result respecting the caller's output capacity: when the output buffer is
//! too small, it returns [`Action::Repeat`] and hands out the rest on the
//! following calls.

use std::path::{Path, PathBuf};

use valvfilter_host::{Action, MetaStore, Mode, SecretInput};
use zeroize::Zeroize;

use crate::{
    codec::BlockCodec,
    error::{FilterError, Result},
    secure::LockedKey,
    session, FILTER_BLOCK_SIZE, FRAMED_BLOCK_SIZE, KEY_SIZE,
};

/// One encryption or decryption session, created per file at prepare time
/// and destroyed at finish.
pub struct Aes256Filter {
    mode: Mode,
    key: LockedKey,
    codec: BlockCodec,
    /// Staging area for incoming bytes; only the first `in_bytes` are live.
    in_buf: Box<[u8; FRAMED_BLOCK_SIZE]>,
    /// Codec output awaiting emission; only the first `blk_bytes` are live.
    blk: Box<[u8; FRAMED_BLOCK_SIZE]>,
    in_bytes: usize,
    blk_bytes: usize,
    /// Bytes of the caller's current input buffer already consumed.
    data_in: usize,
    /// Bytes of `blk` not yet copied out to the caller.
    data_out_left: usize,
    data_end: bool,
    decrypt_err: bool,
    keyfile: Option<PathBuf>,
}

impl std::fmt::Debug for Aes256Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aes256Filter")
            .field("mode", &self.mode)
            .finish()
    }
}

impl Aes256Filter {
    /// Establish a session: reconcile the published fingerprint with the
    /// local caches, obtain the session key (key cache or password prompt)
    /// and initialise the cipher and MAC states.
    pub fn prepare(
        mode: Mode,
        filename: &str,
        cfgdata: Option<&[u8]>,
        cfgdir: &Path,
        meta: &mut dyn MetaStore,
        input: &mut dyn SecretInput,
    ) -> Result<Self> {
        let source = session::establish(mode, filename, cfgdata, cfgdir, meta, input)?;
        Ok(Self::build(mode, source.key, source.keyfile))
    }

    /// Build a session around an already established 64-byte session key.
    /// This is the state a session is in right after adopting a cached key.
    pub fn with_key(mode: Mode, raw: [u8; KEY_SIZE]) -> Self {
        Self::build(mode, LockedKey::from_bytes(raw), None)
    }

    fn build(mode: Mode, key: LockedKey, keyfile: Option<PathBuf>) -> Self {
        let codec = BlockCodec::new(&key);
        Self {
            mode,
            key,
            codec,
            in_buf: Box::new([0u8; FRAMED_BLOCK_SIZE]),
            blk: Box::new([0u8; FRAMED_BLOCK_SIZE]),
            in_bytes: 0,
            blk_bytes: 0,
            data_in: 0,
            data_out_left: 0,
            data_end: false,
            decrypt_err: false,
            keyfile,
        }
    }

    /// Path of the local key cache backing this session, if one is in use.
    pub fn keyfile(&self) -> Option<&Path> {
        self.keyfile.as_deref()
    }

    /// Push the stream forward. Returns the number of bytes written to
    /// `out` and the action the host must pass back on the next call.
    ///
    /// The same `input` buffer must be passed again whenever the returned
    /// action is [`Action::Repeat`]. A return of `(0, Action::Normal)`
    /// means the filter is starved and needs more input.
    pub fn process(
        &mut self,
        input: &[u8],
        out: &mut [u8],
        action: Action,
    ) -> Result<(usize, Action)> {
        if self.decrypt_err {
            return Err(FilterError::DecryptFailed);
        }
        let bsize = match self.mode {
            Mode::Upload => FILTER_BLOCK_SIZE,
            Mode::Download => FRAMED_BLOCK_SIZE,
        };

        // Drain residual output from the previous codec run.
        if action == Action::Repeat && self.data_out_left > 0 {
            if self.data_out_left > out.len() {
                let n = out.len();
                let start = self.blk_bytes - self.data_out_left;
                out.copy_from_slice(&self.blk[start..start + n]);
                self.data_out_left -= n;
                return Ok((n, Action::Repeat));
            }
            let n = self.data_out_left;
            let start = self.blk_bytes - n;
            out[..n].copy_from_slice(&self.blk[start..start + n]);
            self.data_out_left = 0;
            self.blk_bytes = 0;
            let next = if self.data_in == input.len() {
                self.data_in = 0;
                if self.data_end {
                    Action::DataEnd
                } else {
                    Action::Normal
                }
            } else {
                Action::Repeat
            };
            return Ok((n, next));
        }

        if action == Action::DataEnd {
            self.data_end = true;
        }

        // Stage as much of the caller's input as fits before the threshold.
        let stage = (input.len() - self.data_in).min(bsize - self.in_bytes);
        self.in_buf[self.in_bytes..self.in_bytes + stage]
            .copy_from_slice(&input[self.data_in..self.data_in + stage]);
        self.data_in += stage;
        self.in_bytes += stage;

        if self.in_bytes == bsize || (self.in_bytes > 0 && self.data_end) {
            let produced = match self.mode {
                Mode::Upload => {
                    self.codec
                        .encrypt_block(&self.key, &self.in_buf[..self.in_bytes], &mut self.blk[..])
                }
                Mode::Download => {
                    self.codec
                        .decrypt_block(&self.key, &self.in_buf[..self.in_bytes], &mut self.blk[..])
                }
            };
            let produced = match produced {
                Ok(n) => n,
                Err(err) => {
                    if matches!(err, FilterError::AuthFailed | FilterError::DecryptFailed) {
                        self.decrypt_err = true;
                    }
                    return Err(err);
                }
            };
            self.blk_bytes = produced;
            self.in_bytes = 0;

            if self.blk_bytes > out.len() {
                let n = out.len();
                out.copy_from_slice(&self.blk[..n]);
                self.data_out_left = self.blk_bytes - n;
                return Ok((n, Action::Repeat));
            }
            let n = self.blk_bytes;
            out[..n].copy_from_slice(&self.blk[..n]);
            self.blk_bytes = 0;
            let next = if self.data_in == input.len() {
                self.data_in = 0;
                if self.data_end {
                    Action::DataEnd
                } else {
                    Action::Normal
                }
            } else {
                Action::Repeat
            };
            Ok((n, next))
        } else {
            // Need more input before the codec can run.
            self.data_in = 0;
            Ok((0, Action::Normal))
        }
    }

    /// Tear the session down. Never fails; buffers and key material are
    /// wiped even when earlier calls returned errors.
    pub fn finish(self) {}
}

impl Drop for Aes256Filter {
    fn drop(&mut self) {
        self.in_buf.zeroize();
        self.blk.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IV_SIZE, MAC_SIZE};

    fn test_key() -> [u8; KEY_SIZE] {
        let mut raw = [0u8; KEY_SIZE];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = i.wrapping_mul(7) as u8;
        }
        raw
    }

    /// Drive a whole input through the filter with the given chunking and
    /// output capacity, collecting everything it emits.
    fn pump(filter: &mut Aes256Filter, data: &[u8], chunk: usize, out_cap: usize) -> Vec<u8> {
        let mut produced = Vec::new();
        let mut out = vec![0u8; out_cap];
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&data[..]]
        } else {
            data.chunks(chunk.max(1)).collect()
        };
        let last = chunks.len() - 1;
        let mut action = Action::Normal;
        for (index, chunk) in chunks.into_iter().enumerate() {
            action = if index == last {
                Action::DataEnd
            } else {
                Action::Normal
            };
            loop {
                let (n, next) = filter.process(chunk, &mut out, action).unwrap();
                produced.extend_from_slice(&out[..n]);
                action = next;
                if action != Action::Repeat {
                    break;
                }
            }
        }
        // Keep pumping the end marker until the filter goes quiet.
        loop {
            let (n, next) = filter.process(&[], &mut out, Action::DataEnd).unwrap();
            produced.extend_from_slice(&out[..n]);
            if n == 0 && next != Action::Repeat {
                break;
            }
        }
        produced
    }

    #[test]
    fn starved_filter_asks_for_more_input() {
        let mut filter = Aes256Filter::with_key(Mode::Upload, test_key());
        let mut out = vec![0u8; 64];
        let (n, action) = filter.process(&[1, 2, 3], &mut out, Action::Normal).unwrap();
        assert_eq!(n, 0);
        assert_eq!(action, Action::Normal);
    }

    #[test]
    fn single_short_block() {
        let mut filter = Aes256Filter::with_key(Mode::Upload, test_key());
        let ciphertext = pump(&mut filter, b"hello, world", 64, 4096);
        assert_eq!(ciphertext.len(), IV_SIZE + 16 + MAC_SIZE);
    }

    #[test]
    fn chunking_does_not_change_the_stream() {
        let data = vec![0xa5u8; 50_000];
        let reference = pump(
            &mut Aes256Filter::with_key(Mode::Upload, test_key()),
            &data,
            data.len(),
            FRAMED_BLOCK_SIZE,
        );
        for chunk in [1, 7, 1000, 16_384, 16_385] {
            let sliced = pump(
                &mut Aes256Filter::with_key(Mode::Upload, test_key()),
                &data,
                chunk,
                FRAMED_BLOCK_SIZE,
            );
            assert_eq!(sliced, reference, "chunk size {chunk}");
        }
    }

    #[test]
    fn tiny_output_buffer_drains_via_repeat() {
        let data = vec![0x11u8; 20_000];
        let reference = pump(
            &mut Aes256Filter::with_key(Mode::Upload, test_key()),
            &data,
            4096,
            FRAMED_BLOCK_SIZE,
        );
        let dribbled = pump(
            &mut Aes256Filter::with_key(Mode::Upload, test_key()),
            &data,
            4096,
            1,
        );
        assert_eq!(dribbled, reference);

        let plain = pump(
            &mut Aes256Filter::with_key(Mode::Download, test_key()),
            &reference,
            999,
            1,
        );
        assert_eq!(plain, data);
    }

    #[test]
    fn upload_then_download_roundtrip() {
        for len in [0usize, 1, 15, 16, 12_345, 16_384, 20_000, 40_000] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let ciphertext = pump(
                &mut Aes256Filter::with_key(Mode::Upload, test_key()),
                &data,
                3000,
                FRAMED_BLOCK_SIZE,
            );
            let plain = pump(
                &mut Aes256Filter::with_key(Mode::Download, test_key()),
                &ciphertext,
                4096,
                FRAMED_BLOCK_SIZE,
            );
            assert_eq!(plain, data, "length {len}");
        }
    }

    #[test]
    fn ciphertext_length_follows_the_framing_formula() {
        for len in [1usize, 16, 12, 16_384, 20_000, 32_768, 40_000] {
            let data = vec![0u8; len];
            let ciphertext = pump(
                &mut Aes256Filter::with_key(Mode::Upload, test_key()),
                &data,
                8192,
                FRAMED_BLOCK_SIZE,
            );
            let blocks = len.div_ceil(FILTER_BLOCK_SIZE);
            let mut expected = blocks * (IV_SIZE + MAC_SIZE);
            for block in 0..blocks {
                let block_len = (len - block * FILTER_BLOCK_SIZE).min(FILTER_BLOCK_SIZE);
                expected += block_len + (16 - block_len % 16);
            }
            assert_eq!(ciphertext.len(), expected, "length {len}");
        }
    }

    #[test]
    fn corrupted_stream_is_terminal() {
        let data = vec![0x41u8; FILTER_BLOCK_SIZE];
        let mut ciphertext = pump(
            &mut Aes256Filter::with_key(Mode::Upload, test_key()),
            &data,
            8192,
            FRAMED_BLOCK_SIZE,
        );
        ciphertext[100] ^= 0x01;

        let mut filter = Aes256Filter::with_key(Mode::Download, test_key());
        let mut out = vec![0u8; FRAMED_BLOCK_SIZE];
        let mut action = Action::Normal;
        let mut failed = false;
        loop {
            match filter.process(&ciphertext, &mut out, action) {
                Ok((n, next)) => {
                    assert_eq!(n, 0, "no plaintext may surface");
                    action = next;
                    if action != Action::Repeat {
                        break;
                    }
                }
                Err(err) => {
                    assert!(matches!(err, FilterError::AuthFailed));
                    failed = true;
                    break;
                }
            }
        }
        assert!(failed);
        // The session stays dead afterwards.
        assert!(filter.process(&[], &mut out, Action::DataEnd).is_err());
    }
}
