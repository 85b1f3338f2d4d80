//! 單一實體的待寫入變更

use recache_core::{EntityKey, FieldMap, FieldValue, Rule};
use std::sync::Arc;

/// 一個欄位的待寫入變更
#[derive(Debug, Clone)]
pub struct StagedChange {
    pub field: String,
    pub rule: Arc<Rule>,
    pub old_value: FieldValue,
    pub new_value: FieldValue,
}

/// 單一實體在一次重算中累積的變更，最後以一次寫入持久化
#[derive(Debug)]
pub struct StagedChanges {
    key: EntityKey,
    changes: Vec<StagedChange>,
}

impl StagedChanges {
    pub fn new(key: EntityKey) -> Self {
        Self {
            key,
            changes: Vec::new(),
        }
    }

    /// 暫存一個欄位變更；同一欄位重複暫存時以後者為準
    pub fn stage(&mut self, rule: Arc<Rule>, old_value: FieldValue, new_value: FieldValue) {
        let field = rule.field().to_string();
        self.changes.retain(|c| c.field != field);
        self.changes.push(StagedChange {
            field,
            rule,
            old_value,
            new_value,
        });
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// 合併成一次寫入
    pub fn writes(&self) -> FieldMap {
        self.changes
            .iter()
            .map(|c| (c.field.clone(), c.new_value.clone()))
            .collect()
    }

    /// 依暫存順序取出變更
    pub fn into_changes(self) -> Vec<StagedChange> {
        self.changes
    }
}
