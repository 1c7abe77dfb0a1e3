//! Append-only zephyrgram log.
//!
//! Entries are framed as magic + version + id + payload length +
//! MessagePack payload + CRC32 of the payload. An append that fails
//! part-way is rolled back by truncating to the previous file size, so a
//! reader never observes a partially written entry.

use crate::error::{ClientError, Result};
use crate::types::{Zephyrgram, ZephyrgramId, ZephyrgramInput};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for log entries.
const LOG_MAGIC: &[u8; 4] = b"ZGM\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Fixed frame prefix: magic + version + id + payload length.
const FRAME_HEADER_SIZE: u64 = 4 + 1 + 8 + 4;

/// Append-only log of zephyrgrams.
pub struct ZephyrgramLog {
    path: PathBuf,

    /// File handle; the lock also serializes reads, which need to seek.
    file: Mutex<File>,

    /// Next id to assign.
    next_id: Mutex<u64>,

    /// Current file size (append position).
    file_size: Mutex<u64>,

    /// Sync to disk every N appends; 1 syncs every append.
    sync_interval: u64,

    writes_since_sync: Mutex<u64>,
}

impl ZephyrgramLog {
    /// Open or create a log, syncing every append.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, 1)
    }

    /// Open or create a log with a custom sync interval.
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();

        // Resume id assignment after the largest stored id.
        let next_id = if file_size > 0 {
            Self::find_max_id(&file)? + 1
        } else {
            1
        };

        tracing::debug!(path = %path.display(), file_size, next_id, "opened zephyrgram log");

        Ok(Self {
            path,
            file: Mutex::new(file),
            next_id: Mutex::new(next_id),
            file_size: Mutex::new(file_size),
            sync_interval: sync_interval.max(1),
            writes_since_sync: Mutex::new(0),
        })
    }

    /// Append a message, assigning the next id.
    ///
    /// Returns the stored message and the offset it was written at. On a
    /// write failure the file is truncated back to its previous size and
    /// the id is not considered assigned.
    pub fn append(&self, input: ZephyrgramInput) -> Result<(Zephyrgram, u64)> {
        let mut file = self.file.lock();

        let mut next_id = self.next_id.lock();
        let id = ZephyrgramId(*next_id);
        let gram = input.into_zephyrgram(id);

        let offset = *self.file_size.lock();

        match self.write_entry(&mut file, &gram, offset) {
            Ok(new_size) => {
                *next_id += 1;
                *self.file_size.lock() = new_size;

                let mut writes = self.writes_since_sync.lock();
                *writes += 1;
                if *writes >= self.sync_interval {
                    file.sync_all()?;
                    *writes = 0;
                }

                Ok((gram, offset))
            }
            Err(e) => {
                // Roll back the partial entry so the append is fully absent.
                let _ = file.set_len(offset);
                let _ = file.seek(SeekFrom::Start(offset));
                tracing::warn!(path = %self.path.display(), offset, "append rolled back: {}", e);
                Err(e)
            }
        }
    }

    /// Force pending appends to disk.
    pub fn sync(&self) -> Result<()> {
        let file = self.file.lock();
        file.sync_all()?;
        *self.writes_since_sync.lock() = 0;
        Ok(())
    }

    /// Read the entry at a given offset.
    pub fn read_at(&self, offset: u64) -> Result<Zephyrgram> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let (gram, _) = Self::read_entry(&mut file)?;
        Ok(gram)
    }

    /// Scan all entries, yielding `(offset, message)` pairs in file order.
    pub fn scan(&self) -> Result<Vec<(u64, Zephyrgram)>> {
        let mut file = self.file.lock();
        let end = *self.file_size.lock();
        let mut offset = 0;
        let mut entries = Vec::new();

        file.seek(SeekFrom::Start(0))?;
        while offset < end {
            let (gram, entry_size) = Self::read_entry(&mut file)?;
            entries.push((offset, gram));
            offset += entry_size;
        }

        Ok(entries)
    }

    /// Current file size in bytes.
    pub fn size(&self) -> u64 {
        *self.file_size.lock()
    }

    /// Write one entry at `offset`, returning the new file size.
    fn write_entry(&self, file: &mut File, gram: &Zephyrgram, offset: u64) -> Result<u64> {
        // Named encoding keeps optional fields (sender/recipient/time)
        // self-describing instead of positional.
        let payload = rmp_serde::to_vec_named(gram)?;

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(LOG_MAGIC)?;
        file.write_all(&[LOG_VERSION])?;
        file.write_all(&gram.id.0.to_le_bytes())?;
        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(&payload)?;
        file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;

        Ok(offset + FRAME_HEADER_SIZE + payload.len() as u64 + 4)
    }

    /// Read one entry at the current position, returning it and its total
    /// framed size.
    fn read_entry(file: &mut File) -> Result<(Zephyrgram, u64)> {
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(ClientError::InvalidFormat("invalid log entry magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(ClientError::InvalidFormat(format!(
                "unsupported log version: {}",
                version[0]
            )));
        }

        let mut id_bytes = [0u8; 8];
        file.read_exact(&mut id_bytes)?;
        let id = u64::from_le_bytes(id_bytes);

        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)?;
        let payload_len = u32::from_le_bytes(len_bytes) as usize;

        let mut payload = vec![0u8; payload_len];
        file.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&payload);
        if stored != computed {
            return Err(ClientError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        let gram: Zephyrgram = rmp_serde::from_slice(&payload)?;
        if gram.id.0 != id {
            return Err(ClientError::Corruption(format!(
                "frame id {} disagrees with payload id {}",
                id, gram.id
            )));
        }

        Ok((gram, FRAME_HEADER_SIZE + payload_len as u64 + 4))
    }

    /// Find the maximum id in the log by walking frame headers.
    fn find_max_id(file: &File) -> Result<u64> {
        let mut file = file.try_clone()?;
        let file_size = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;

        let mut max_id = 0u64;
        let mut offset = 0u64;

        while offset < file_size {
            let mut magic = [0u8; 4];
            if file.read_exact(&mut magic).is_err() || &magic != LOG_MAGIC {
                break;
            }

            file.seek(SeekFrom::Current(1))?; // version

            let mut id_bytes = [0u8; 8];
            file.read_exact(&mut id_bytes)?;
            max_id = max_id.max(u64::from_le_bytes(id_bytes));

            let mut len_bytes = [0u8; 4];
            file.read_exact(&mut len_bytes)?;
            let payload_len = u32::from_le_bytes(len_bytes) as u64;

            file.seek(SeekFrom::Current(payload_len as i64 + 4))?;
            offset += FRAME_HEADER_SIZE + payload_len + 4;
        }

        Ok(max_id)
    }
}
