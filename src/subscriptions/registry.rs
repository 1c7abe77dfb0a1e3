//! Subscription registry: an undepth watermark per base class triple.
//!
//! A subscription at undepth `d` for base class `B` implicitly covers
//! `B, unB, ununB, …` up to `d` repetitions. The undepth for a key only
//! ever rises over the registry's lifetime; the single `raise` primitive
//! below is the only mutation path shared by `subscribe` and
//! `update_undepth`. Removal happens only through `unsubscribe` on a
//! depth-0 class name.

use crate::error::{ClientError, Result};
use crate::types::{strip_un_prefix, un_class};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the subscription table file.
const SUBS_MAGIC: &[u8; 4] = b"SUB\0";

/// Current subscription table format version.
const SUBS_VERSION: u8 = 1;

/// A `(class, instance, recipient)` subscription triple.
///
/// As a registry key the class is always the stripped base; in expansion
/// results it carries the full un-prefixed name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubTriple {
    pub class: String,
    pub instance: String,
    pub recipient: String,
}

impl SubTriple {
    pub fn new(
        class: impl Into<String>,
        instance: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            class: class.into(),
            instance: instance.into(),
            recipient: recipient.into(),
        }
    }
}

/// One registry row as listed for display or export.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub class: String,
    pub instance: String,
    pub recipient: String,
    pub undepth: u32,
}

/// Registry behavior options.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegistryOptions {
    /// When set, unsubscribing from an un-prefixed class is an error
    /// instead of a silent no-op.
    pub strict_unclass_unsubscribe: bool,
}

/// On-disk table shape.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct SubTable {
    entries: BTreeMap<SubTriple, u32>,
}

/// Tracks `(base class, instance, recipient) -> undepth` watermarks.
pub struct SubscriptionRegistry {
    path: PathBuf,
    table: RwLock<SubTable>,
    options: RegistryOptions,
}

impl SubscriptionRegistry {
    /// Open the registry backed by `path`, loading the table if the file
    /// exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, RegistryOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: RegistryOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let table = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            SubTable::default()
        };

        tracing::debug!(
            path = %path.display(),
            rows = table.entries.len(),
            "opened subscription registry"
        );

        Ok(Self {
            path,
            table: RwLock::new(table),
            options,
        })
    }

    /// Subscribe to a class (possibly un-prefixed), returning the newly
    /// covered triples to forward to the transport. An empty result means
    /// the key was already covered at this or a deeper level.
    pub fn subscribe(&self, class: &str, instance: &str, recipient: &str) -> Result<Vec<SubTriple>> {
        let (depth, base) = strip_un_prefix(class);
        let key = SubTriple::new(base, instance, recipient);

        let newly_covered = {
            let mut table = self.table.write();
            match Self::raise(&mut table, &key, depth) {
                None => Vec::new(),
                Some(previous) => {
                    let from = previous.map(|p| p + 1).unwrap_or(0);
                    (from..=depth)
                        .map(|d| SubTriple::new(un_class(base, d), instance, recipient))
                        .collect()
                }
            }
        };

        if !newly_covered.is_empty() {
            self.save()?;
        }
        Ok(newly_covered)
    }

    /// Unsubscribe from a depth-0 class, returning every escalated triple
    /// that was covered. Un-prefixed names cannot be unsubscribed
    /// directly: by default that is a guarded no-op, or an error under
    /// `strict_unclass_unsubscribe`.
    pub fn unsubscribe(
        &self,
        class: &str,
        instance: &str,
        recipient: &str,
    ) -> Result<Vec<SubTriple>> {
        let (depth, base) = strip_un_prefix(class);
        if depth != 0 {
            if self.options.strict_unclass_unsubscribe {
                return Err(ClientError::UnclassUnsubscribe(class.to_string()));
            }
            tracing::debug!(class, "ignoring unsubscribe from un-prefixed class");
            return Ok(Vec::new());
        }

        let key = SubTriple::new(base, instance, recipient);
        let removed = self.table.write().entries.remove(&key);

        match removed {
            None => Ok(Vec::new()),
            Some(undepth) => {
                self.save()?;
                Ok((0..=undepth)
                    .map(|d| SubTriple::new(un_class(base, d), instance, recipient))
                    .collect())
            }
        }
    }

    /// Raise the watermark for every row of `base_class` whose undepth is
    /// below `candidate_depth`, returning the `(instance, recipient)`
    /// pairs that changed. No-op when `candidate_depth` is zero.
    pub fn update_undepth(
        &self,
        base_class: &str,
        candidate_depth: u32,
    ) -> Result<Vec<(String, String)>> {
        if candidate_depth == 0 {
            return Ok(Vec::new());
        }

        let affected = {
            let mut table = self.table.write();
            let keys: Vec<SubTriple> = table
                .entries
                .iter()
                .filter(|(key, undepth)| key.class == base_class && **undepth < candidate_depth)
                .map(|(key, _)| key.clone())
                .collect();

            for key in &keys {
                Self::raise(&mut table, key, candidate_depth);
            }

            keys.into_iter()
                .map(|key| (key.instance, key.recipient))
                .collect::<Vec<_>>()
        };

        if !affected.is_empty() {
            self.save()?;
        }
        Ok(affected)
    }

    /// List all rows; with `expand_un`, each row is followed by its full
    /// escalation chain (the expanded entries carry undepth 0).
    pub fn list(&self, expand_un: bool) -> Vec<Subscription> {
        let table = self.table.read();
        let mut rows = Vec::new();

        for (key, &undepth) in &table.entries {
            rows.push(Subscription {
                class: key.class.clone(),
                instance: key.instance.clone(),
                recipient: key.recipient.clone(),
                undepth,
            });
            if expand_un {
                for d in 1..=undepth {
                    rows.push(Subscription {
                        class: un_class(&key.class, d),
                        instance: key.instance.clone(),
                        recipient: key.recipient.clone(),
                        undepth: 0,
                    });
                }
            }
        }

        rows
    }

    /// Number of base rows.
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().entries.is_empty()
    }

    /// Monotonic merge primitive: raise `key` to at least `depth`.
    ///
    /// Returns `None` when the row already sits at this depth or deeper,
    /// otherwise `Some(previous)` where `previous` is the old undepth
    /// (`None` for a fresh row).
    fn raise(table: &mut SubTable, key: &SubTriple, depth: u32) -> Option<Option<u32>> {
        match table.entries.get_mut(key) {
            None => {
                table.entries.insert(key.clone(), depth);
                Some(None)
            }
            Some(existing) if *existing < depth => {
                let previous = *existing;
                *existing = depth;
                Some(Some(previous))
            }
            Some(_) => None,
        }
    }

    /// Persist the table: magic + version + MessagePack body, written to a
    /// temp file and renamed into place.
    fn save(&self) -> Result<()> {
        let body = rmp_serde::to_vec_named(&*self.table.read())?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(SUBS_MAGIC)?;
            file.write_all(&[SUBS_VERSION])?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load_from_file(path: &Path) -> Result<SubTable> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SUBS_MAGIC {
            return Err(ClientError::InvalidFormat(
                "invalid subscription table magic".into(),
            ));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SUBS_VERSION {
            return Err(ClientError::InvalidFormat(format!(
                "unsupported subscription table version: {}",
                version[0]
            )));
        }

        let mut body = Vec::new();
        file.read_to_end(&mut body)?;
        Ok(rmp_serde::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> SubscriptionRegistry {
        SubscriptionRegistry::open(dir.path().join("subs.bin")).unwrap()
    }

    fn triples(entries: &[(&str, &str, &str)]) -> Vec<SubTriple> {
        entries
            .iter()
            .map(|(c, i, r)| SubTriple::new(*c, *i, *r))
            .collect()
    }

    #[test]
    fn test_fresh_subscribe_returns_full_chain() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);

        let covered = reg.subscribe("ununhelp", "*", "").unwrap();
        assert_eq!(
            covered,
            triples(&[("help", "*", ""), ("unhelp", "*", ""), ("ununhelp", "*", "")])
        );
    }

    #[test]
    fn test_deeper_subscribe_returns_only_new_tail() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);

        reg.subscribe("help", "*", "").unwrap();
        let covered = reg.subscribe("ununhelp", "*", "").unwrap();
        assert_eq!(
            covered,
            triples(&[("unhelp", "*", ""), ("ununhelp", "*", "")])
        );
    }

    #[test]
    fn test_shallower_subscribe_is_noop_and_watermark_monotonic() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);

        reg.subscribe("ununclass", "i", "r").unwrap();
        assert!(reg.subscribe("unclass", "i", "r").unwrap().is_empty());
        assert!(reg.subscribe("class", "i", "r").unwrap().is_empty());

        let rows = reg.list(false);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].undepth, 2);
    }

    #[test]
    fn test_unsubscribe_returns_covered_chain() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);

        reg.subscribe("ununhelp", "*", "").unwrap();
        let dropped = reg.unsubscribe("help", "*", "").unwrap();
        assert_eq!(
            dropped,
            triples(&[("help", "*", ""), ("unhelp", "*", ""), ("ununhelp", "*", "")])
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn test_unsubscribe_unclass_is_guarded_noop() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);

        reg.subscribe("unclass", "i", "r").unwrap();
        assert!(reg.unsubscribe("unclass", "i", "r").unwrap().is_empty());
        // State unchanged.
        assert_eq!(reg.list(false).len(), 1);
        assert_eq!(reg.list(false)[0].undepth, 1);
    }

    #[test]
    fn test_strict_unclass_unsubscribe_is_error() {
        let dir = TempDir::new().unwrap();
        let reg = SubscriptionRegistry::open_with_options(
            dir.path().join("subs.bin"),
            RegistryOptions {
                strict_unclass_unsubscribe: true,
            },
        )
        .unwrap();

        reg.subscribe("unclass", "i", "r").unwrap();
        assert!(matches!(
            reg.unsubscribe("unclass", "i", "r"),
            Err(ClientError::UnclassUnsubscribe(_))
        ));
    }

    #[test]
    fn test_unsubscribe_unknown_is_empty() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        assert!(reg.unsubscribe("nothing", "i", "r").unwrap().is_empty());
    }

    #[test]
    fn test_update_undepth_raises_and_reports() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);

        reg.subscribe("help", "a", "").unwrap();
        reg.subscribe("unhelp", "b", "").unwrap();
        reg.subscribe("other", "c", "").unwrap();

        // Rows below depth 1: only ("help", "a").
        let affected = reg.update_undepth("help", 1).unwrap();
        assert_eq!(affected, vec![("a".to_string(), "".to_string())]);

        // Everything for "help" now sits at >= 1; raising to 1 again changes nothing.
        assert!(reg.update_undepth("help", 1).unwrap().is_empty());

        // Raising to 2 affects both rows.
        let affected = reg.update_undepth("help", 2).unwrap();
        assert_eq!(affected.len(), 2);

        // Candidate depth 0 is an unconditional no-op.
        assert!(reg.update_undepth("help", 0).unwrap().is_empty());
        // Unrelated class untouched.
        let other: Vec<_> = reg
            .list(false)
            .into_iter()
            .filter(|s| s.class == "other")
            .collect();
        assert_eq!(other[0].undepth, 0);
    }

    #[test]
    fn test_list_expansion() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);

        reg.subscribe("ununhelp", "*", "").unwrap();

        let collapsed = reg.list(false);
        assert_eq!(collapsed.len(), 1);

        let expanded = reg.list(true);
        let classes: Vec<&str> = expanded.iter().map(|s| s.class.as_str()).collect();
        assert_eq!(classes, vec!["help", "unhelp", "ununhelp"]);
        assert_eq!(expanded[0].undepth, 2);
        assert_eq!(expanded[1].undepth, 0);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subs.bin");

        {
            let reg = SubscriptionRegistry::open(&path).unwrap();
            reg.subscribe("ununhelp", "*", "").unwrap();
            reg.subscribe("message", "*", "ada@ATHENA.MIT.EDU").unwrap();
        }

        {
            let reg = SubscriptionRegistry::open(&path).unwrap();
            assert_eq!(reg.len(), 2);
            let rows = reg.list(false);
            let help = rows.iter().find(|s| s.class == "help").unwrap();
            assert_eq!(help.undepth, 2);
        }
    }
}
