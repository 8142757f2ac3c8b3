//! Agent store: Sled-backed lookup of agent profiles by id.
//! Keys are `agent_{id}`; values are the profile serialized as JSON.

use std::path::Path;

use crate::agent::AgentProfile;
use crate::error::CoreResult;

const AGENT_STORE_DEFAULT_PATH: &str = "./data/agents";
const AGENT_KEY_PREFIX: &str = "agent_";

/// Read side of agent persistence used by the voice core.
pub trait AgentLookup: Send + Sync {
    /// `Ok(None)` when no agent has this id.
    fn find_agent_by_id(&self, id: &str) -> CoreResult<Option<AgentProfile>>;
}

pub struct AgentStore {
    db: sled::Db,
}

impl AgentStore {
    /// Open the store at the given path, or `./data/agents` when none is given.
    pub fn open(path: Option<impl AsRef<Path>>) -> CoreResult<Self> {
        let p = path
            .map(|x| x.as_ref().to_path_buf())
            .unwrap_or_else(|| Path::new(AGENT_STORE_DEFAULT_PATH).to_path_buf());
        let db = sled::open(p)?;
        Ok(Self { db })
    }

    fn key(id: &str) -> String {
        format!("{}{}", AGENT_KEY_PREFIX, id)
    }

    /// Insert or replace a profile. Used by operator tooling only.
    pub fn upsert_agent(&self, agent: &AgentProfile) -> CoreResult<()> {
        let payload = serde_json::to_vec(agent)?;
        self.db.insert(Self::key(&agent.id).as_bytes(), payload)?;
        self.db.flush()?;
        Ok(())
    }

    /// Remove every stored profile. Returns how many were removed.
    pub fn clear_agents(&self) -> CoreResult<usize> {
        let keys: Vec<sled::IVec> = self
            .db
            .scan_prefix(AGENT_KEY_PREFIX.as_bytes())
            .keys()
            .filter_map(|k| k.ok())
            .collect();
        for key in &keys {
            self.db.remove(key)?;
        }
        Ok(keys.len())
    }

    /// Ids of all stored agents, in key order.
    pub fn list_agent_ids(&self) -> CoreResult<Vec<String>> {
        Ok(self
            .db
            .scan_prefix(AGENT_KEY_PREFIX.as_bytes())
            .keys()
            .filter_map(|k| k.ok())
            .filter_map(|k| String::from_utf8(k.to_vec()).ok())
            .map(|k| k.trim_start_matches(AGENT_KEY_PREFIX).to_string())
            .collect())
    }
}

impl AgentLookup for AgentStore {
    fn find_agent_by_id(&self, id: &str) -> CoreResult<Option<AgentProfile>> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }
        match self.db.get(Self::key(id).as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, AgentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::open(Some(dir.path())).unwrap();
        (dir, store)
    }

    #[test]
    fn finds_stored_agent() {
        let (_dir, store) = temp_store();
        let agent = AgentProfile::new("support", "Customer Support", "Joanna");
        store.upsert_agent(&agent).unwrap();

        let found = store.find_agent_by_id("support").unwrap();
        assert_eq!(found, Some(agent));
    }

    #[test]
    fn unknown_or_blank_id_is_not_found() {
        let (_dir, store) = temp_store();
        assert!(store.find_agent_by_id("missing").unwrap().is_none());
        assert!(store.find_agent_by_id("   ").unwrap().is_none());
    }

    #[test]
    fn clear_removes_all_agents() {
        let (_dir, store) = temp_store();
        store.upsert_agent(&AgentProfile::new("a", "A", "v")).unwrap();
        store.upsert_agent(&AgentProfile::new("b", "B", "v")).unwrap();
        assert_eq!(store.list_agent_ids().unwrap(), vec!["a", "b"]);

        assert_eq!(store.clear_agents().unwrap(), 2);
        assert!(store.list_agent_ids().unwrap().is_empty());
    }
}
