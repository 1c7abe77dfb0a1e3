//! Session controller wiring the store, registry and transport together.
//!
//! The session owns the single consumer of the inbound queue: each drained
//! message is appended to the store and then run through the registry's
//! escalation check before the next message is processed. Navigation
//! reads go straight to the store and may run concurrently with draining.

use crate::error::Result;
use crate::store::{MessageStore, StoreConfig};
use crate::subscriptions::{RegistryOptions, SubTriple, SubscriptionRegistry};
use crate::types::{strip_un_prefix, un_class, Zephyrgram, ZephyrgramInput};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::time::Duration;

/// The default Kerberos realm appended to bare usernames.
const DEFAULT_REALM: &str = "ATHENA.MIT.EDU";

/// External transport process, consumed but not managed by the core.
pub trait Transport {
    fn subscribe(&self, class: &str, instance: &str, recipient: &str) -> Result<()>;
    fn unsubscribe(&self, class: &str, instance: &str, recipient: &str) -> Result<()>;
    fn send(&self, gram: &ZephyrgramInput) -> Result<()>;
}

/// Advisory display properties for one message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayProperties {
    pub header: String,
    pub foreground: Option<String>,
    pub background: Option<String>,
}

/// User-supplied display configuration; purely advisory.
pub trait DisplayConfig {
    fn properties(&self, gram: &Zephyrgram) -> DisplayProperties;
}

/// Default display formatting: `class / instance / sender` headers for
/// broadcasts, an arrow form for personal messages, with `!` marking
/// unauthenticated senders, the delivery time when one was reported, and
/// the local realm stripped from principals.
#[derive(Clone, Debug)]
pub struct DefaultDisplay {
    pub realm: String,
}

impl Default for DefaultDisplay {
    fn default() -> Self {
        Self {
            realm: DEFAULT_REALM.to_string(),
        }
    }
}

impl DefaultDisplay {
    fn pretty_principal<'a>(&self, principal: &'a str) -> &'a str {
        let suffix = format!("@{}", self.realm);
        principal.strip_suffix(suffix.as_str()).unwrap_or(principal)
    }
}

impl DisplayConfig for DefaultDisplay {
    fn properties(&self, gram: &Zephyrgram) -> DisplayProperties {
        let auth = if gram.auth { "" } else { "!" };
        let opcode = if gram.opcode.is_empty() {
            String::new()
        } else {
            format!(" [{}]", gram.opcode)
        };
        let zsig = if gram.signature().is_empty() {
            String::new()
        } else {
            format!(" ({})", gram.signature())
        };
        let date = gram
            .time
            .and_then(|t| chrono::DateTime::from_timestamp(t.0.div_euclid(1_000_000), 0))
            .map(|dt| format!(" {}", dt.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        let sender = gram
            .sender
            .as_deref()
            .map(|s| self.pretty_principal(s))
            .unwrap_or("");

        let header = if gram.is_personal() {
            let recipient = gram
                .recipient
                .as_deref()
                .map(|r| self.pretty_principal(r))
                .unwrap_or("");
            format!(
                "\u{2192}{} from {}{}{}{}{}",
                recipient, auth, sender, opcode, date, zsig
            )
        } else {
            format!(
                "{} / {} / {}{}{}{}{}",
                gram.class, gram.instance, auth, sender, opcode, date, zsig
            )
        };

        DisplayProperties {
            header,
            foreground: None,
            background: gram.is_personal().then(|| "magenta".to_string()),
        }
    }
}

/// Result of importing a zsubs file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZsubsImport {
    pub processed: usize,
    pub skipped: usize,
}

/// Session configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Base directory; the store and subscription table live under it.
    pub path: PathBuf,

    /// Local principal; discovered via [`default_principal`] when absent.
    pub principal: Option<String>,

    /// Registry behavior.
    pub registry: RegistryOptions,

    /// Sync the message log every N appends.
    pub sync_interval: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./pipit"),
            principal: None,
            registry: RegistryOptions::default(),
            sync_interval: 1,
        }
    }
}

/// Ties the message store, the subscription registry and the transport
/// together, and owns the inbound queue consumer.
pub struct Session<T: Transport> {
    store: MessageStore,
    registry: SubscriptionRegistry,
    transport: T,
    principal: String,
    inbound_tx: Sender<ZephyrgramInput>,
    inbound: Receiver<ZephyrgramInput>,
}

impl<T: Transport> Session<T> {
    /// Open (or create) the session state and prime the transport: a
    /// personal-message subscription for the local principal, plus every
    /// stored subscription expanded through its un-chain.
    pub fn open(config: SessionConfig, transport: T) -> Result<Self> {
        let store = MessageStore::open_or_create(StoreConfig {
            path: config.path.join("store"),
            create_if_missing: true,
            sync_interval: config.sync_interval,
        })?;
        let registry = SubscriptionRegistry::open_with_options(
            config.path.join("subscriptions.bin"),
            config.registry,
        )?;

        let principal = config.principal.unwrap_or_else(default_principal);

        transport.subscribe("message", "*", &principal)?;
        for sub in registry.list(true) {
            transport.subscribe(&sub.class, &sub.instance, &sub.recipient)?;
        }

        let (inbound_tx, inbound) = unbounded();

        Ok(Self {
            store,
            registry,
            transport,
            principal,
            inbound_tx,
            inbound,
        })
    }

    /// Sender side of the inbound queue, handed to the transport's
    /// delivery callback.
    pub fn inbound_sender(&self) -> Sender<ZephyrgramInput> {
        self.inbound_tx.clone()
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Drain every queued inbound message, returning how many were
    /// appended. Each message is appended and escalation-checked before
    /// the next one is touched.
    pub fn drain_inbound(&self) -> Result<usize> {
        let mut appended = 0;
        while let Ok(input) = self.inbound.try_recv() {
            self.ingest(input)?;
            appended += 1;
        }
        Ok(appended)
    }

    /// Block up to `timeout` for one inbound message, then drain whatever
    /// else is queued. Returns how many messages were appended.
    pub fn drain_inbound_blocking(&self, timeout: Duration) -> Result<usize> {
        match self.inbound.recv_timeout(timeout) {
            Ok(input) => {
                self.ingest(input)?;
                Ok(1 + self.drain_inbound()?)
            }
            Err(_) => Ok(0),
        }
    }

    /// Append one message and run the un-class escalation check: a
    /// message arriving at depth `d` raises the watermark for its base
    /// class to `d + 1`, and every affected row gets a transport
    /// subscription for the next escalation level.
    fn ingest(&self, input: ZephyrgramInput) -> Result<Zephyrgram> {
        let gram = self.store.append(input)?;
        tracing::debug!(id = %gram.id, class = %gram.class, "appended inbound zephyrgram");

        let (depth, base) = strip_un_prefix(&gram.class);
        let next_unclass = format!("un{}", gram.class);
        debug_assert_eq!(next_unclass, un_class(base, depth + 1));

        for (instance, recipient) in self.registry.update_undepth(base, depth + 1)? {
            tracing::debug!(class = %next_unclass, %instance, "escalating subscription");
            self.transport
                .subscribe(&next_unclass, &instance, &recipient)?;
        }

        Ok(gram)
    }

    /// Subscribe and forward every newly covered triple to the transport.
    /// An empty result means the registry already covered the key.
    pub fn subscribe(&self, class: &str, instance: &str, recipient: &str) -> Result<Vec<SubTriple>> {
        let covered = self.registry.subscribe(class, instance, recipient)?;
        for sub in &covered {
            self.transport
                .subscribe(&sub.class, &sub.instance, &sub.recipient)?;
        }
        Ok(covered)
    }

    /// Unsubscribe and forward every dropped triple to the transport.
    /// An empty result means there was nothing to do.
    pub fn unsubscribe(
        &self,
        class: &str,
        instance: &str,
        recipient: &str,
    ) -> Result<Vec<SubTriple>> {
        let dropped = self.registry.unsubscribe(class, instance, recipient)?;
        for sub in &dropped {
            self.transport
                .unsubscribe(&sub.class, &sub.instance, &sub.recipient)?;
        }
        Ok(dropped)
    }

    /// Hand an outbound message to the transport.
    pub fn send(&self, gram: &ZephyrgramInput) -> Result<()> {
        self.transport.send(gram)
    }

    /// Import a `.zephyr.subs`-style file: one `class,instance,recipient`
    /// triple per line. Blank lines are ignored; malformed lines are
    /// counted as skipped.
    pub fn import_zsubs(&self, path: impl AsRef<std::path::Path>) -> Result<ZsubsImport> {
        let contents = std::fs::read_to_string(path)?;
        let mut summary = ZsubsImport::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() != 3 {
                summary.skipped += 1;
                continue;
            }

            self.subscribe(parts[0], parts[1], parts[2])?;
            summary.processed += 1;
        }

        Ok(summary)
    }
}

/// Discover the local principal: the `PIPIT_PRINCIPAL` environment
/// variable, then the default principal reported by `klist`, then the
/// login name with the default realm appended.
pub fn default_principal() -> String {
    if let Ok(principal) = std::env::var("PIPIT_PRINCIPAL") {
        if !principal.is_empty() {
            return principal;
        }
    }

    if let Ok(output) = std::process::Command::new("klist").output() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Some(principal) = line.strip_prefix("Default principal: ") {
                return principal.trim().to_string();
            }
        }
    }

    let username = std::env::var("LOGNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "nobody".to_string());
    format!("{}@{}", username, DEFAULT_REALM)
}
