//! 持久化實體模型

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::FieldValue;

/// 實體主鍵
pub type RecordId = Uuid;

/// 欄位名稱到欄位值的映射（依名稱排序，寫入順序穩定）
pub type FieldMap = BTreeMap<String, FieldValue>;

static NULL_VALUE: FieldValue = FieldValue::Null;

/// 實體參照：資料表 + 主鍵
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub table: String,
    pub id: RecordId,
}

impl EntityKey {
    pub fn new(table: impl Into<String>, id: RecordId) -> Self {
        Self {
            table: table.into(),
            id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.table, self.id)
    }
}

/// 已持久化的實體（一列資料）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// 實體參照
    pub key: EntityKey,

    /// 欄位值
    pub fields: FieldMap,
}

impl Record {
    /// 創建新的實體
    pub fn new(table: impl Into<String>, id: RecordId) -> Self {
        Self {
            key: EntityKey::new(table, id),
            fields: FieldMap::new(),
        }
    }

    /// 建構器模式：設置欄位
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn table(&self) -> &str {
        &self.key.table
    }

    pub fn id(&self) -> RecordId {
        self.key.id
    }

    /// 讀取欄位值；未設置的欄位視為 `Null`
    pub fn get(&self, field: &str) -> &FieldValue {
        self.fields.get(field).unwrap_or(&NULL_VALUE)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(field.into(), value.into());
    }

    /// 套用一組欄位寫入
    pub fn apply(&mut self, writes: &FieldMap) {
        for (field, value) in writes {
            self.fields.insert(field.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_reads_as_null() {
        let record = Record::new("customers", Uuid::new_v4());
        assert!(record.get("unfulfilled_count").is_null());
    }

    #[test]
    fn test_apply_writes() {
        let mut record = Record::new("customers", Uuid::new_v4()).with_field("name", "Ada");

        let mut writes = FieldMap::new();
        writes.insert("unfulfilled_count".to_string(), FieldValue::Integer(2));
        record.apply(&writes);

        assert_eq!(record.get("unfulfilled_count"), &FieldValue::Integer(2));
        assert_eq!(record.get("name"), &FieldValue::from("Ada"));
    }

    #[test]
    fn test_entity_key_display() {
        let id = Uuid::nil();
        let key = EntityKey::new("orders", id);
        assert_eq!(key.to_string(), format!("orders#{}", id));
    }
}
