//! 持久層介面
//!
//! 引擎對持久層只有四項要求：依主鍵或等值條件查詢、單一實體的原子欄位寫入，
//! 以及新增實體（唯一性衝突必須與其他錯誤區分）。

use crate::{EntityKey, FieldMap, FieldValue, Record};

/// 持久層錯誤
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("違反唯一性約束: {table}.{field}")]
    UniqueViolation { table: String, field: String },

    #[error("找不到實體: {0}")]
    NotFound(EntityKey),

    #[error("暫時性錯誤: {0}")]
    Transient(String),

    #[error("持久層錯誤: {0}")]
    Other(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 持久層
pub trait RecordStore: Send + Sync {
    /// 依主鍵讀取
    fn find(&self, key: &EntityKey) -> StoreResult<Option<Record>>;

    /// 依等值條件查詢
    fn find_by(&self, table: &str, field: &str, value: &FieldValue) -> StoreResult<Vec<Record>>;

    /// 讀取整個資料表（用於回填）
    fn scan(&self, table: &str) -> StoreResult<Vec<Record>>;

    /// 以單次原子寫入更新一個實體的多個欄位，回傳寫入後的實體
    fn update_fields(&self, key: &EntityKey, writes: &FieldMap) -> StoreResult<Record>;

    /// 新增實體；違反唯一性約束時回傳 `StoreError::UniqueViolation`
    fn create(&self, table: &str, fields: FieldMap) -> StoreResult<Record>;
}
