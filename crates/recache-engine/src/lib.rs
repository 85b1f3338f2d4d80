//! # Recache Engine
//!
//! 反應式衍生欄位快取引擎：規則註冊、重算、專屬快取實體與回呼匯流排

pub mod callbacks;
pub mod change_set;
pub mod dedicated;
pub mod recalculation;
pub mod registry;
pub mod service;

// Re-export 主要類型
pub use callbacks::{CallbackBus, CallbackPayload, CallbackPoint};
pub use dedicated::{DedicatedAssociation, DedicatedEntityManager, ParentRecord};
pub use recalculation::RecalculationEngine;
pub use registry::{RegistrySnapshot, RuleRegistry, RuleSource};
pub use service::RecacheService;

use chrono::{DateTime, Utc};
use recache_core::{EntityKey, FieldValue, Rule};
use std::sync::Arc;

/// 一次已套用的欄位重算
#[derive(Debug, Clone)]
pub struct AppliedChange {
    pub key: EntityKey,
    pub field: String,
    pub rule: Arc<Rule>,
    pub old_value: FieldValue,
    pub new_value: FieldValue,
    pub applied_at: DateTime<Utc>,
}

/// 重算結果
#[derive(Debug, Clone, Default)]
pub struct RecalcReport {
    /// 實際套用的變更（依處理順序）
    pub applied: Vec<AppliedChange>,

    /// 讀取到的實體數（不含已不存在者）
    pub entities_visited: usize,

    /// 持久化寫入次數（每個實體至多一次）
    pub writes: usize,

    /// 計算耗時（毫秒）
    pub calculation_time_ms: Option<u128>,
}

impl RecalcReport {
    /// 創建空的重算結果
    pub fn empty() -> Self {
        Self::default()
    }

    /// 沒有任何寫入
    pub fn is_noop(&self) -> bool {
        self.writes == 0
    }

    /// 合併另一份結果
    pub fn merge(&mut self, other: RecalcReport) {
        self.applied.extend(other.applied);
        self.entities_visited += other.entities_visited;
        self.writes += other.writes;
        self.calculation_time_ms = match (self.calculation_time_ms, other.calculation_time_ms) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
    }

    /// 指定實體與欄位的變更
    pub fn change_for(&self, key: &EntityKey, field: &str) -> Option<&AppliedChange> {
        self.applied.iter().find(|c| &c.key == key && c.field == field)
    }
}

/// 延後由宿主派送的非同步重算
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredRecalculation {
    pub field: String,
    pub keys: Vec<EntityKey>,
}

/// 處理一個變更事件的結果
#[derive(Debug, Clone, Default)]
pub struct ChangeOutcome {
    /// 同步規則的重算結果
    pub recalculated: RecalcReport,

    /// 非同步規則解析出的待辦
    pub deferred: Vec<DeferredRecalculation>,
}
