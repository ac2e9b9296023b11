//! Persistent relay store: the Relay Map plus the crew configuration.
//!
//! Backed by a single JSON document. Every mutation is written to a synced
//! temp file and renamed over the store before the call returns. The
//! in-memory copy only changes once the file did.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};

use crate::{domain::ChatId, errors::Error, Result};

/// One `(outside conversation, relay group)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPair {
    pub outside: ChatId,
    pub relay: ChatId,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    crew_id: Option<ChatId>,
    /// `None` = never configured, `Some("")` = explicitly silent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outside_help_message: Option<String>,
    #[serde(default, with = "pairs")]
    relays: Vec<RelayPair>,
}

/// Relays are stored as `[outside, relay]` tuples.
mod pairs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::RelayPair;
    use crate::domain::ChatId;

    pub fn serialize<S: Serializer>(v: &[RelayPair], s: S) -> Result<S::Ok, S::Error> {
        v.iter()
            .map(|p| (p.outside, p.relay))
            .collect::<Vec<_>>()
            .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<RelayPair>, D::Error> {
        let raw = Vec::<(ChatId, ChatId)>::deserialize(d)?;
        Ok(raw
            .into_iter()
            .map(|(outside, relay)| RelayPair { outside, relay })
            .collect())
    }
}

pub struct RelayStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl RelayStore {
    /// Open the store at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = load(&path)?;
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn crew_id(&self) -> Result<Option<ChatId>> {
        Ok(self.lock()?.crew_id.filter(|id| id.0 != 0))
    }

    pub fn set_crew_id(&self, crew_id: ChatId) -> Result<()> {
        self.update(|data| {
            if data.crew_id == Some(crew_id) {
                return Ok(false);
            }
            data.crew_id = Some(crew_id);
            Ok(true)
        })
    }

    pub fn outside_help(&self) -> Result<Option<String>> {
        Ok(self.lock()?.outside_help_message.clone())
    }

    pub fn set_outside_help(&self, text: &str) -> Result<()> {
        tracing::debug!(help = %text, "setting outside help message");
        self.update(|data| {
            data.outside_help_message = Some(text.to_string());
            Ok(true)
        })
    }

    pub fn relays(&self) -> Result<Vec<RelayPair>> {
        Ok(self.lock()?.relays.clone())
    }

    pub fn relay_group_for(&self, outside: ChatId) -> Result<Option<ChatId>> {
        Ok(self
            .lock()?
            .relays
            .iter()
            .find(|p| p.outside == outside)
            .map(|p| p.relay))
    }

    pub fn outside_chat_for(&self, relay: ChatId) -> Result<Option<ChatId>> {
        Ok(self
            .lock()?
            .relays
            .iter()
            .find(|p| p.relay == relay)
            .map(|p| p.outside))
    }

    pub fn is_relay_group(&self, chat: ChatId) -> Result<bool> {
        Ok(self.outside_chat_for(chat)?.is_some())
    }

    /// Append a new pair. Both sides must be unused.
    pub fn append_relay(&self, outside: ChatId, relay: ChatId) -> Result<()> {
        self.update(|data| {
            if data
                .relays
                .iter()
                .any(|p| p.outside == outside || p.relay == outside)
            {
                return Err(Error::Mapping {
                    chat: outside,
                    reason: "outside chat is already part of a relay pair".to_string(),
                });
            }
            if data
                .relays
                .iter()
                .any(|p| p.relay == relay || p.outside == relay)
            {
                return Err(Error::Mapping {
                    chat: relay,
                    reason: "chat is already part of a relay pair".to_string(),
                });
            }
            data.relays.push(RelayPair { outside, relay });
            Ok(true)
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreData>> {
        self.data.lock().map_err(|_| Error::Store {
            path: self.path.clone(),
            reason: "store lock poisoned".to_string(),
        })
    }

    /// Apply `change` to a copy of the data, persist the copy, then publish it.
    /// `change` returns `false` when there is nothing to write.
    fn update(&self, change: impl FnOnce(&mut StoreData) -> Result<bool>) -> Result<()> {
        let mut data = self.lock()?;
        let mut next = data.clone();
        if !change(&mut next)? {
            return Ok(());
        }
        save(&self.path, &next)?;
        *data = next;
        Ok(())
    }
}

fn load(path: &Path) -> Result<StoreData> {
    if !path.exists() {
        return Ok(StoreData::default());
    }
    let txt = fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(StoreData::default());
    }
    Ok(serde_json::from_str(&txt)?)
}

fn save(path: &Path, data: &StoreData) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let txt = serde_json::to_string_pretty(data)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(txt.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Store {
        path: path.to_path_buf(),
        reason: format!("replacing store file failed: {}", e.error),
    })?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn tmp_store_path(prefix: &str) -> PathBuf {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static NEXT: AtomicUsize = AtomicUsize::new(0);

    let n = NEXT.fetch_add(1, Ordering::SeqCst);
    let path = PathBuf::from(format!(
        "/tmp/tb-{prefix}-{}-{n}/relays.json",
        std::process::id()
    ));
    if let Some(dir) = path.parent() {
        let _ = fs::remove_dir_all(dir);
    }
    path
}
