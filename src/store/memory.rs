use std::collections::HashMap;

use parking_lot::RwLock;

use super::BatchStore;
use crate::error::Result;

/// In-process map standing in for a server, for smoke-testing the harness itself.
#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BatchStore for MemoryStore {
    type Conn = ();

    fn acquire(&self) -> Result<()> {
        Ok(())
    }

    fn release(&self, _conn: ()) {}

    fn execute_write(&self, _conn: &mut (), pairs: &[(String, String)]) -> Result<()> {
        let mut map = self.map.write();
        for (key, value) in pairs {
            map.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn execute_read(&self, _conn: &mut (), keys: &[String]) -> Result<Vec<Option<String>>> {
        let map = self.map.read();
        Ok(keys.iter().map(|key| map.get(key).cloned()).collect())
    }
}
