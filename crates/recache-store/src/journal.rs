//! 寫入日誌

use recache_core::{EntityKey, FieldMap};
use std::collections::HashSet;

/// 單次持久化寫入
#[derive(Debug, Clone, PartialEq)]
struct JournalEntry {
    key: EntityKey,
    writes: FieldMap,
}

/// 寫入日誌：記錄每一次 `update_fields` 呼叫
#[derive(Debug, Default)]
pub struct WriteJournal {
    entries: Vec<JournalEntry>,
    dirty: HashSet<EntityKey>,
}

impl WriteJournal {
    /// 創建新的日誌
    pub fn new() -> Self {
        Self::default()
    }

    /// 記錄一次寫入
    pub fn record(&mut self, key: EntityKey, writes: FieldMap) {
        self.dirty.insert(key.clone());
        self.entries.push(JournalEntry { key, writes });
    }

    /// 實體是否曾被寫入
    pub fn is_dirty(&self, key: &EntityKey) -> bool {
        self.dirty.contains(key)
    }

    /// 指定實體的寫入次數
    pub fn writes_for(&self, key: &EntityKey) -> usize {
        self.entries.iter().filter(|e| &e.key == key).count()
    }

    /// 寫入總次數
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 清除所有紀錄
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty.clear();
    }
}
