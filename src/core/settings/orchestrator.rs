//! Settings orchestration
//! Assembles the full settings snapshot from individual characteristic reads
//! and routes single-field writes back to the iron.

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::{CharacteristicIo, CommandExecutor};
use crate::core::catalog::SettingKey;
use crate::core::error::IronResult;
use crate::core::settings::codec::{self, SettingValue};
use crate::core::settings::model::{SettingsGroup, SettingsSnapshot};

/// A debounced write waiting for input to go quiet
struct PendingWrite {
    generation: u64,
    /// Field value before the burst started
    rollback: Option<SettingValue>,
}

struct Inner<C> {
    io: C,
    snapshot: watch::Sender<Option<SettingsSnapshot>>,
    retrieving: AtomicBool,
    debounce: Duration,
    /// Shared by every key so a sleeping task never matches a later burst
    next_generation: AtomicU64,
    pending: Mutex<HashMap<SettingKey, PendingWrite>>,
}

/// Reads and writes the iron's settings through a [`CharacteristicIo`].
pub struct SettingsOrchestrator<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for SettingsOrchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: CharacteristicIo + 'static> SettingsOrchestrator<C> {
    pub fn new(io: C, config: &SessionConfig) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                io,
                snapshot,
                retrieving: AtomicBool::new(false),
                debounce: config.settings_debounce(),
                next_generation: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<SettingKey, PendingWrite>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The last published snapshot
    pub fn snapshot(&self) -> Option<SettingsSnapshot> {
        self.inner.snapshot.borrow().clone()
    }

    /// Observes every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Option<SettingsSnapshot>> {
        self.inner.snapshot.subscribe()
    }

    /// True while `fetch_all` is running
    pub fn is_retrieving(&self) -> bool {
        self.inner.retrieving.load(Ordering::SeqCst)
    }

    /// Reads every settings characteristic and publishes the complete snapshot.
    ///
    /// Reads run one at a time in group order. Any failure aborts the fetch
    /// and leaves the previously published snapshot in place.
    pub async fn fetch_all(&self) -> IronResult<SettingsSnapshot> {
        info!("Fetching settings...");
        self.inner.retrieving.store(true, Ordering::SeqCst);
        let result = self.read_all().await;
        self.inner.retrieving.store(false, Ordering::SeqCst);

        match result {
            Ok(snapshot) => {
                self.inner.snapshot.send_replace(Some(snapshot.clone()));
                info!("Settings fetched");
                Ok(snapshot)
            }
            Err(e) => {
                error!("Failed to fetch settings: {}", e);
                Err(e)
            }
        }
    }

    async fn read_all(&self) -> IronResult<SettingsSnapshot> {
        let mut snapshot = SettingsSnapshot::default();
        for group in SettingsGroup::FETCH_ORDER {
            for &key in group.keys() {
                let bytes = self.inner.io.read(key.uuid()).await?;
                let value = codec::decode(key.kind(), &bytes)?;
                snapshot.apply_decoded(key, value)?;
            }
            debug!("Read {:?} settings", group);
        }
        Ok(snapshot)
    }

    /// Applies `value` to the published snapshot, returning the field's previous value.
    fn apply_local(&self, key: SettingKey, value: SettingValue) -> IronResult<Option<SettingValue>> {
        let mut outcome = Ok(None);
        self.inner.snapshot.send_if_modified(|current| {
            let Some(snapshot) = current.as_mut() else {
                return false;
            };
            let previous = snapshot.value(key);
            match snapshot.apply(key, value) {
                Ok(()) => {
                    outcome = Ok(previous);
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        outcome
    }

    fn revert(&self, key: SettingKey, previous: SettingValue) {
        info!("Reverting {} to {:?}", key, previous);
        self.inner.snapshot.send_if_modified(|current| match current.as_mut() {
            Some(snapshot) => snapshot.apply(key, previous).is_ok(),
            None => false,
        });
    }

    /// Optimistically updates one field and writes it to the iron.
    ///
    /// The field is reverted when the write fails.
    pub async fn update_field(&self, key: SettingKey, value: SettingValue) -> IronResult<()> {
        let bytes = codec::encode(key.kind(), &value)?;
        let previous = self.apply_local(key, value)?;

        debug!("Writing {} = {:?}", key, value);
        match self.inner.io.write(key.uuid(), bytes).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Failed to write {}: {}", key, e);
                if let Some(previous) = previous {
                    self.revert(key, previous);
                }
                Err(e)
            }
        }
    }

    /// Updates one field locally right away and writes it once input has been
    /// quiet for the debounce period.
    ///
    /// Only the last value of a burst is written. The returned task resolves
    /// with the outcome of that write; superseded calls resolve `Ok` without
    /// writing.
    pub fn update_field_debounced(
        &self,
        key: SettingKey,
        value: SettingValue,
    ) -> IronResult<JoinHandle<IronResult<()>>> {
        let bytes = codec::encode(key.kind(), &value)?;
        let previous = self.apply_local(key, value)?;

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        self.pending()
            .entry(key)
            .and_modify(|entry| entry.generation = generation)
            .or_insert(PendingWrite {
                generation,
                rollback: previous,
            });

        let this = self.clone();
        Ok(tokio::spawn(async move {
            tokio::time::sleep(this.inner.debounce).await;
            this.flush_debounced(key, generation, bytes).await
        }))
    }

    async fn flush_debounced(&self, key: SettingKey, generation: u64, bytes: Vec<u8>) -> IronResult<()> {
        let rollback = {
            let mut pending = self.pending();
            match pending.get(&key) {
                Some(entry) if entry.generation == generation => {
                    pending.remove(&key).and_then(|entry| entry.rollback)
                }
                // Superseded by a later value, or cleared
                _ => return Ok(()),
            }
        };

        debug!("Writing debounced {} = {:?}", key, bytes);
        match self.inner.io.write(key.uuid(), bytes).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Failed to write {}: {}", key, e);
                if let Some(previous) = rollback {
                    self.revert(key, previous);
                }
                Err(e)
            }
        }
    }

    /// Commits previously written settings to the iron's flash.
    pub async fn save_to_flash(&self) -> IronResult<()> {
        CommandExecutor::new(&self.inner.io).save_to_flash().await
    }

    /// Restores the iron's factory defaults. Call `fetch_all` afterwards to
    /// pick up the new values.
    pub async fn factory_reset(&self) -> IronResult<()> {
        CommandExecutor::new(&self.inner.io).factory_reset().await
    }

    /// Drops the published snapshot and any write still waiting on its debounce.
    pub fn clear(&self) {
        self.pending().clear();
        self.inner.snapshot.send_replace(None);
    }
}
