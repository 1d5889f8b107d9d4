pub mod http;

use crate::state_machine::StateMachine;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The example application payload (§4.8): the only two operations a
/// client can ask the cluster to agree on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KvCommand {
    Set { key: String, value: String },
    Delete { key: String },
}

/// In-memory map applied to in commit order. Guarded the same way the
/// orchestrator guards driver state: one `tokio::sync::Mutex`, held
/// only across the map mutation itself.
#[derive(Default)]
pub struct KvStore {
    map: Mutex<HashMap<String, String>>,
}

impl KvStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.map.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl StateMachine<KvCommand> for KvStore {
    async fn handle_value(&self, value: KvCommand) {
        let mut map = self.map.lock().await;
        match value {
            KvCommand::Set { key, value } => {
                map.insert(key, value);
            }
            KvCommand::Delete { key } => {
                map.remove(&key);
            }
        }
    }
}
