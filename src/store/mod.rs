//! Persistent, id-ordered message store with filtered navigation.
//!
//! The store is a directory holding a manifest, an advisory lock file and
//! the append-only zephyrgram log. An in-memory id-to-offset index is
//! rebuilt by scanning the log on open. All filtered queries evaluate the
//! filter's predicate while walking the index in id order, preserving the
//! fallback semantics of `advance` exactly.

mod log;

pub use log::ZephyrgramLog;

use crate::error::{ClientError, Result};
use crate::filter::Filter;
use crate::types::{Zephyrgram, ZephyrgramId, ZephyrgramInput};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the store manifest.
const MANIFEST_MAGIC: &[u8; 4] = b"PPT\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base directory for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Sync the log to disk every N appends; 1 syncs every append.
    pub sync_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./pipit-store"),
            create_if_missing: true,
            sync_interval: 1,
        }
    }
}

/// Append-only, id-ordered message store.
pub struct MessageStore {
    /// Lock file for exclusive writer access.
    _lock_file: File,

    log: ZephyrgramLog,

    /// id -> log offset, in id order.
    index: RwLock<BTreeMap<ZephyrgramId, u64>>,
}

impl MessageStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(ClientError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        Self::init(config)
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        Self::init(config)
    }

    fn init(config: StoreConfig) -> Result<Self> {
        let lock_file = Self::acquire_lock(&config.path)?;

        let log = ZephyrgramLog::open_with_sync_interval(
            config.path.join("zephyrgrams.log"),
            config.sync_interval,
        )?;

        // Rebuild the id index from the log.
        let mut index = BTreeMap::new();
        for (offset, gram) in log.scan()? {
            index.insert(gram.id, offset);
        }

        tracing::debug!(
            path = %config.path.display(),
            messages = index.len(),
            "opened message store"
        );

        Ok(Self {
            _lock_file: lock_file,
            log,
            index: RwLock::new(index),
        })
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("manifest"))?;
        file.write_all(MANIFEST_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let manifest = path.join("manifest");
        if !manifest.exists() {
            return Err(ClientError::NotInitialized);
        }

        let mut file = File::open(manifest)?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MANIFEST_MAGIC {
            return Err(ClientError::InvalidFormat("invalid manifest magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(ClientError::InvalidFormat(format!(
                "unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(path.join("store.lock"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| ClientError::Locked)?;
        Ok(lock_file)
    }

    // --- Writes ---

    /// Append a message, assigning the next id.
    ///
    /// The entry either fully commits (durable, visible in the index) or
    /// is fully absent; a failed append never exposes a partial id.
    pub fn append(&self, input: ZephyrgramInput) -> Result<Zephyrgram> {
        let (gram, offset) = self.log.append(input)?;
        self.index.write().insert(gram.id, offset);
        Ok(gram)
    }

    /// Force pending appends to disk.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }

    // --- Point lookup ---

    /// Get a message by id.
    pub fn get(&self, id: ZephyrgramId) -> Result<Option<Zephyrgram>> {
        let offset = self.index.read().get(&id).copied();
        match offset {
            Some(offset) => Ok(Some(self.log.read_at(offset)?)),
            None => Ok(None),
        }
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    // --- Filtered navigation ---

    /// Smallest id whose message matches `filter`.
    pub fn first_index(&self, filter: &Filter) -> Result<Option<ZephyrgramId>> {
        let entries = self.snapshot_ascending(None);
        self.find_first_match(entries.into_iter(), filter)
    }

    /// Largest id whose message matches `filter`.
    pub fn last_index(&self, filter: &Filter) -> Result<Option<ZephyrgramId>> {
        let mut entries = self.snapshot_ascending(None);
        entries.reverse();
        self.find_first_match(entries.into_iter(), filter)
    }

    /// Navigation primitive: move `delta` matching messages from `id`.
    ///
    /// `id` need not exist or match the filter; the result always does
    /// (or is `None` when nothing matches at all).
    ///
    /// - `delta == 0`: smallest matching id at or after `id`, falling back
    ///   to `last_index` when there is none.
    /// - `delta > 0`: the `delta`-th matching id strictly after `id`,
    ///   falling back to `last_index`.
    /// - `delta < 0`: the `|delta|`-th matching id strictly before `id`,
    ///   falling back to `first_index`.
    pub fn advance(
        &self,
        id: ZephyrgramId,
        delta: i64,
        filter: &Filter,
    ) -> Result<Option<ZephyrgramId>> {
        if delta == 0 {
            let entries = self.snapshot_ascending(Some(id));
            match self.find_first_match(entries.into_iter(), filter)? {
                Some(found) => Ok(Some(found)),
                None => self.last_index(filter),
            }
        } else if delta > 0 {
            let entries: Vec<_> = self
                .snapshot_ascending(None)
                .into_iter()
                .filter(|(entry_id, _)| *entry_id > id)
                .collect();
            match self.find_nth_match(entries.into_iter(), filter, delta as u64)? {
                Some(found) => Ok(Some(found)),
                None => self.last_index(filter),
            }
        } else {
            let mut entries: Vec<_> = self
                .snapshot_ascending(None)
                .into_iter()
                .filter(|(entry_id, _)| *entry_id < id)
                .collect();
            entries.reverse();
            match self.find_nth_match(entries.into_iter(), filter, delta.unsigned_abs())? {
                Some(found) => Ok(Some(found)),
                None => self.first_index(filter),
            }
        }
    }

    /// Count of matching messages with id strictly greater than `id`.
    pub fn count_after(&self, id: ZephyrgramId, filter: &Filter) -> Result<u64> {
        let mut count = 0;
        for (entry_id, offset) in self.snapshot_ascending(None) {
            if entry_id <= id {
                continue;
            }
            if filter.matches(&self.log.read_at(offset)?) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Lazy scan of matching messages with id at or after `id`, in
    /// ascending id order.
    ///
    /// The set of candidate entries is snapshotted at call time, so
    /// re-invoking with the same arguments reproduces the same sequence.
    pub fn scan_from<'a>(&'a self, id: ZephyrgramId, filter: &'a Filter) -> ScanIter<'a> {
        ScanIter {
            store: self,
            entries: self.snapshot_ascending(Some(id)).into_iter(),
            filter,
        }
    }

    /// Snapshot of `(id, offset)` pairs at or after `from`, ascending.
    fn snapshot_ascending(&self, from: Option<ZephyrgramId>) -> Vec<(ZephyrgramId, u64)> {
        let index = self.index.read();
        match from {
            Some(from) => index.range(from..).map(|(id, off)| (*id, *off)).collect(),
            None => index.iter().map(|(id, off)| (*id, *off)).collect(),
        }
    }

    fn find_first_match(
        &self,
        entries: impl Iterator<Item = (ZephyrgramId, u64)>,
        filter: &Filter,
    ) -> Result<Option<ZephyrgramId>> {
        self.find_nth_match(entries, filter, 1)
    }

    fn find_nth_match(
        &self,
        entries: impl Iterator<Item = (ZephyrgramId, u64)>,
        filter: &Filter,
        n: u64,
    ) -> Result<Option<ZephyrgramId>> {
        let mut seen = 0;
        for (id, offset) in entries {
            if filter.matches(&self.log.read_at(offset)?) {
                seen += 1;
                if seen == n {
                    return Ok(Some(id));
                }
            }
        }
        Ok(None)
    }
}

/// Iterator over matching messages, ascending by id.
pub struct ScanIter<'a> {
    store: &'a MessageStore,
    entries: std::vec::IntoIter<(ZephyrgramId, u64)>,
    filter: &'a Filter,
}

impl Iterator for ScanIter<'_> {
    type Item = Result<Zephyrgram>;

    fn next(&mut self) -> Option<Self::Item> {
        for (_, offset) in self.entries.by_ref() {
            match self.store.log.read_at(offset) {
                Ok(gram) => {
                    if self.filter.matches(&gram) {
                        return Some(Ok(gram));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
