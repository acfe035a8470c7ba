//! Shared vocabulary between a content storage host and its stream filters.
//!
//! A stream filter sits in the data path of the storage client: every file
//! flowing into a volume (upload) or out of it (download) is pushed through
//! the filter in caller-sized chunks. The host drives the filter with an
//! [`Action`] signal and passes the returned action back in on the next call,
//! so a filter can ask to be re-invoked with the same input buffer while it
//! drains buffered output.
//!
//! The host also provides a small set of services a filter may use during
//! session setup: a sensitive input prompt ([`SecretInput`]) and the
//! volume-scoped custom metadata store ([`MetaStore`]).

use std::collections::{BTreeMap, VecDeque};

use anyhow::{anyhow, Result};
use secrecy::SecretString;

/// Direction of the data flowing through a filter session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Upload,
    Download,
}

/// Flow-control signal exchanged between the host and a filter on every
/// `process` call.
///
/// The host passes the action returned by the previous call back in.
/// `Repeat` means the filter wants another call with the same input buffer,
/// either to keep consuming it or to drain buffered output. `DataEnd` is
/// sent by the host once when the input stream is exhausted and is echoed
/// back by the filter after the last output byte has surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Normal,
    Repeat,
    DataEnd,
}

/// Filter ABI compatibility version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiVersion {
    pub major: u32,
    pub minor: u32,
}

/// What kind of transformation a filter performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Crypt,
}

/// Static descriptor a filter registers with the host.
#[derive(Debug, Clone, Copy)]
pub struct FilterSpec {
    pub name: &'static str,
    pub summary: &'static str,
    pub description: &'static str,
    pub options: &'static str,
    pub uuid: &'static str,
    pub kind: FilterKind,
    pub abi: AbiVersion,
}

/// Prompt for sensitive input, e.g. a password. The returned string is
/// wrapped in [`SecretString`] so it is wiped when released.
pub trait SecretInput {
    fn prompt_sensitive(&mut self, prompt: &str) -> Result<SecretString>;
}

/// Volume-scoped key/value store, shared between all clients of a volume.
pub trait MetaStore {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&mut self, key: &str, value: &[u8]) -> Result<()>;
}

/// In-memory [`MetaStore`], used by hosts that sync the store elsewhere and
/// by tests.
#[derive(Debug, Default)]
pub struct MemoryMeta {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryMeta {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MemoryMeta {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_owned(), value.to_vec());
        Ok(())
    }
}

/// [`SecretInput`] that answers prompts from a fixed queue. Used for
/// non-interactive hosts and tests; fails once the queue runs dry.
#[derive(Debug, Default)]
pub struct QueuedInput {
    queue: VecDeque<SecretString>,
}

impl QueuedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: answers
                .into_iter()
                .map(|answer| SecretString::new(answer.into()))
                .collect(),
        }
    }
}

impl SecretInput for QueuedInput {
    fn prompt_sensitive(&mut self, _prompt: &str) -> Result<SecretString> {
        self.queue
            .pop_front()
            .ok_or_else(|| anyhow!("no queued input left"))
    }
}
