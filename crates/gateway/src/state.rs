use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sg_domain::config::{AgentConfig, ServerConfig};
use sg_domain::{Error, Result};
use sg_kv::{Kv, KvExt};

use crate::observability::Emitter;
use crate::relay::Relay;
use crate::runtime::{spawn_agent, ActorHandle, RuntimeDeps};

/// Row in the shared `agents` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRow {
    pub name: String,
    pub did: String,
    pub created_at: DateTime<Utc>,
}

/// Opens an actor's private KV namespace by agent name.
pub type KvFactory = Box<dyn Fn(&str) -> Result<Arc<dyn Kv>> + Send + Sync>;

/// Name → live actor handle, plus the durable agents table.
pub struct AgentDirectory {
    handles: RwLock<HashMap<String, ActorHandle>>,
    shared_kv: Arc<dyn Kv>,
    kv_factory: KvFactory,
}

impl AgentDirectory {
    pub fn new(shared_kv: Arc<dyn Kv>, kv_factory: KvFactory) -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            shared_kv,
            kv_factory,
        }
    }

    pub fn get(&self, name: &str) -> Option<ActorHandle> {
        self.handles.read().get(name).cloned()
    }

    pub fn by_did(&self, did: &str) -> Option<ActorHandle> {
        self.handles
            .read()
            .values()
            .find(|h| h.did == did)
            .cloned()
    }

    pub fn list(&self) -> Vec<AgentRow> {
        let mut rows: Vec<AgentRow> = self
            .shared_kv
            .list_prefix("agents:")
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value(v).ok())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    /// Create a brand-new agent. Duplicate names are a conflict.
    pub fn create(
        &self,
        name: &str,
        config: Option<AgentConfig>,
        deps: RuntimeDeps,
    ) -> Result<ActorHandle> {
        validate_agent_name(name)?;
        let key = format!("agents:{name}");
        if self.shared_kv.get(&key).is_some() || self.handles.read().contains_key(name) {
            return Err(Error::Conflict(format!("agent {name} already exists")));
        }

        let actor_kv = (self.kv_factory)(name)?;
        let handle = spawn_agent(name, deps, actor_kv, self.shared_kv.clone(), config)?;

        self.shared_kv.put_as(
            &key,
            &AgentRow {
                name: name.to_owned(),
                did: handle.did.clone(),
                created_at: Utc::now(),
            },
        )?;
        self.handles.write().insert(name.to_owned(), handle.clone());
        Ok(handle)
    }

    /// Re-spawn every agent in the table (boot path).
    pub fn revive_all(&self, deps: &RuntimeDeps) {
        for row in self.list() {
            if self.handles.read().contains_key(&row.name) {
                continue;
            }
            let actor_kv = match (self.kv_factory)(&row.name) {
                Ok(kv) => kv,
                Err(e) => {
                    tracing::error!(agent = %row.name, error = %e, "namespace open failed");
                    continue;
                }
            };
            match spawn_agent(&row.name, deps.clone(), actor_kv, self.shared_kv.clone(), None) {
                Ok(handle) => {
                    self.handles.write().insert(row.name.clone(), handle);
                    tracing::info!(agent = %row.name, "agent revived");
                }
                Err(e) => {
                    tracing::error!(agent = %row.name, error = %e, "agent revive failed");
                }
            }
        }
    }
}

fn validate_agent_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::invalid_record(vec![sg_domain::Issue::new(
            "name",
            "agent names are lowercase alphanumerics, dashes, underscores",
        )]))
    }
}

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<ServerConfig>,
    pub deps: RuntimeDeps,
    pub agents: Arc<AgentDirectory>,
    pub relay: Arc<Relay>,
    pub emitter: Arc<Emitter>,
    /// SHA-256 of the admin bearer token; `None` only when the binding is
    /// missing (health reports it, everything else refuses).
    pub admin_token_hash: Option<Vec<u8>>,
    /// Required bindings absent at boot; non-empty makes `/health` a 500.
    pub missing_bindings: Arc<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_kv::MemoryKv;

    #[test]
    fn agent_names_are_validated() {
        assert!(validate_agent_name("alice").is_ok());
        assert!(validate_agent_name("agent-7_x").is_ok());
        assert!(validate_agent_name("").is_err());
        assert!(validate_agent_name("Alice").is_err());
        assert!(validate_agent_name("../escape").is_err());
    }

    #[test]
    fn directory_lists_newest_first() {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let dir = AgentDirectory::new(
            kv.clone(),
            Box::new(|_| {
                let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
                Ok(kv)
            }),
        );
        kv.put_as(
            "agents:old",
            &AgentRow {
                name: "old".into(),
                did: "did:cf:1".into(),
                created_at: Utc::now() - chrono::Duration::hours(1),
            },
        )
        .unwrap();
        kv.put_as(
            "agents:new",
            &AgentRow {
                name: "new".into(),
                did: "did:cf:2".into(),
                created_at: Utc::now(),
            },
        )
        .unwrap();
        let rows = dir.list();
        assert_eq!(rows[0].name, "new");
    }
}
