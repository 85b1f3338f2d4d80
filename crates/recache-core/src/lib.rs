//! # Recache Core
//!
//! 核心資料模型、快取規則定義與持久層介面

pub mod change;
pub mod config;
pub mod entity_type;
pub mod record;
pub mod rule;
pub mod store;
pub mod value;

// Re-export 主要類型
pub use change::{ChangeEvent, FieldChange, Operation};
pub use config::{EngineConfig, RetryPolicy};
pub use entity_type::EntityType;
pub use record::{EntityKey, FieldMap, Record, RecordId};
pub use rule::{ComputeFn, Hook, HookFn, ResolveFn, Rule, RuleBuilder, WatchSpec};
pub use store::{RecordStore, StoreError, StoreResult};
pub use value::FieldValue;

/// 快取引擎錯誤類型
#[derive(Debug, thiserror::Error)]
pub enum RecacheError {
    #[error("規則 `{field}` 缺少擁有者資料表，且無法推斷預設值")]
    MissingOwnerTable { field: String },

    #[error("規則缺少目標欄位名稱")]
    MissingField,

    #[error("規則 `{table}.{field}` 缺少計算函式")]
    MissingCompute { table: String, field: String },

    #[error("資料表 `{table}` 未提供更新掛鉤方法 `{method}`")]
    MissingHookMethod { table: String, method: String },

    #[error("資料表 `{parent_table}` 已宣告專屬快取實體")]
    DuplicateDedicatedType { parent_table: String },

    #[error("資料表 `{parent_table}` 未宣告專屬快取實體")]
    UnknownAssociation { parent_table: String },

    #[error("找不到 `{table}.{field}` 的快取規則")]
    NoRuleForField { table: String, field: String },

    #[error("無效的設定 `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("專屬快取實體 `{association}` 建立失敗（嘗試 {attempts} 次）: {source}")]
    DedicatedCreationFailed {
        association: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("持久層錯誤: {0}")]
    Store(#[from] StoreError),

    #[error("計算錯誤: {0}")]
    Compute(String),

    #[error("回呼處理錯誤: {0}")]
    Handler(String),
}

impl RecacheError {
    /// 是否為設定錯誤（註冊或首次呼叫時即應失敗）
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RecacheError::MissingOwnerTable { .. }
                | RecacheError::MissingField
                | RecacheError::MissingCompute { .. }
                | RecacheError::MissingHookMethod { .. }
                | RecacheError::DuplicateDedicatedType { .. }
                | RecacheError::UnknownAssociation { .. }
                | RecacheError::NoRuleForField { .. }
                | RecacheError::InvalidConfig { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RecacheError>;
