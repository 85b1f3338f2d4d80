//! 回呼匯流排

use parking_lot::RwLock;
use recache_core::{EntityKey, Record, Result, Rule};
use std::collections::HashMap;
use std::sync::Arc;

use crate::dedicated::DedicatedAssociation;
use crate::AppliedChange;

/// 擴充點
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackPoint {
    /// 新規則註冊
    RuleRegistered,
    /// 專屬快取實體類型註冊
    DedicatedTypeRegistered,
    /// 每一次套用的重算
    RecalculationApplied,
    /// 專屬快取實體建立
    DedicatedEntityCreated,
}

/// 擴充點資料
#[derive(Debug, Clone)]
pub enum CallbackPayload {
    RuleRegistered(Arc<Rule>),
    DedicatedTypeRegistered(DedicatedAssociation),
    RecalculationApplied(AppliedChange),
    DedicatedEntityCreated {
        association: String,
        parent: EntityKey,
        record: Record,
    },
}

impl CallbackPayload {
    /// 資料所屬的擴充點
    pub fn point(&self) -> CallbackPoint {
        match self {
            CallbackPayload::RuleRegistered(_) => CallbackPoint::RuleRegistered,
            CallbackPayload::DedicatedTypeRegistered(_) => CallbackPoint::DedicatedTypeRegistered,
            CallbackPayload::RecalculationApplied(_) => CallbackPoint::RecalculationApplied,
            CallbackPayload::DedicatedEntityCreated { .. } => CallbackPoint::DedicatedEntityCreated,
        }
    }
}

pub type Handler = Arc<dyn Fn(&CallbackPayload) -> Result<()> + Send + Sync>;

/// 回呼匯流排
///
/// 每個擴充點各自維護訂閱者清單；發佈時依訂閱順序同步呼叫，
/// 第一個失敗的處理器會中止發佈並把錯誤交回發佈者。
#[derive(Default)]
pub struct CallbackBus {
    handlers: RwLock<HashMap<CallbackPoint, Vec<Handler>>>,
}

impl CallbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 訂閱擴充點
    pub fn subscribe<F>(&self, point: CallbackPoint, handler: F)
    where
        F: Fn(&CallbackPayload) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(point)
            .or_default()
            .push(Arc::new(handler));
    }

    /// 發佈到資料所屬的擴充點
    pub fn publish(&self, payload: &CallbackPayload) -> Result<()> {
        // 先複製清單再呼叫，處理器內可再訂閱而不會死鎖
        let handlers = self
            .handlers
            .read()
            .get(&payload.point())
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            handler(payload)?;
        }
        Ok(())
    }

    pub fn subscriber_count(&self, point: CallbackPoint) -> usize {
        self.handlers.read().get(&point).map(Vec::len).unwrap_or(0)
    }

    /// 清除所有訂閱（測試用）
    pub fn reset(&self) {
        self.handlers.write().clear();
    }
}
