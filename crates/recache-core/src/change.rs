//! 變更事件模型（由外部變更偵測元件產生）

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{EntityKey, FieldValue};

/// 變更操作類型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// 新增
    Create,
    /// 更新
    Update,
    /// 刪除
    Destroy,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Create, Operation::Update, Operation::Destroy];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

/// 單一欄位的前後值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old_value: FieldValue,
    pub new_value: FieldValue,
}

/// 變更事件
///
/// 描述一筆上游實體的一次變更；引擎只讀取，不修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// 變更的實體
    pub record: EntityKey,

    /// 操作類型
    pub operation: Operation,

    /// 變更的欄位
    pub changed_fields: BTreeMap<String, FieldChange>,
}

impl ChangeEvent {
    /// 創建新的變更事件
    pub fn new(operation: Operation, record: EntityKey) -> Self {
        Self {
            record,
            operation,
            changed_fields: BTreeMap::new(),
        }
    }

    pub fn create(record: EntityKey) -> Self {
        Self::new(Operation::Create, record)
    }

    pub fn update(record: EntityKey) -> Self {
        Self::new(Operation::Update, record)
    }

    pub fn destroy(record: EntityKey) -> Self {
        Self::new(Operation::Destroy, record)
    }

    /// 建構器模式：加入欄位變更
    pub fn with_change(
        mut self,
        field: impl Into<String>,
        old_value: impl Into<FieldValue>,
        new_value: impl Into<FieldValue>,
    ) -> Self {
        self.changed_fields.insert(
            field.into(),
            FieldChange {
                old_value: old_value.into(),
                new_value: new_value.into(),
            },
        );
        self
    }

    /// 變更發生的資料表
    pub fn table(&self) -> &str {
        &self.record.table
    }

    /// 是否變更了指定欄位
    pub fn touches(&self, field: &str) -> bool {
        self.changed_fields.contains_key(field)
    }

    pub fn old_value(&self, field: &str) -> Option<&FieldValue> {
        self.changed_fields.get(field).map(|c| &c.old_value)
    }

    pub fn new_value(&self, field: &str) -> Option<&FieldValue> {
        self.changed_fields.get(field).map(|c| &c.new_value)
    }
}
