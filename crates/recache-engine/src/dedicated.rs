//! 專屬快取實體管理
//!
//! 父實體可宣告一個一對一的專屬快取實體（另一張資料表的一列，
//! 以不可為空且唯一的反向參照欄位指回父實體）。該列在首次存取時才建立。

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use recache_core::{
    EntityKey, FieldMap, FieldValue, RecacheError, Record, RecordStore, Result, RetryPolicy,
    StoreError,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::callbacks::{CallbackBus, CallbackPayload};

/// 專屬快取實體宣告
#[derive(Debug, Clone, PartialEq)]
pub struct DedicatedAssociation {
    /// 關聯名稱（用於日誌與事件）
    pub name: String,

    /// 父實體資料表
    pub parent_table: String,

    /// 專屬快取實體資料表
    pub dedicated_table: String,

    /// 指回父實體的反向參照欄位（持久層需宣告唯一）
    pub inverse_field: String,

    /// 新建列的預設欄位值
    pub defaults: FieldMap,
}

impl DedicatedAssociation {
    /// 創建新的專屬快取實體宣告
    pub fn new(
        name: impl Into<String>,
        parent_table: impl Into<String>,
        dedicated_table: impl Into<String>,
        inverse_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            parent_table: parent_table.into(),
            dedicated_table: dedicated_table.into(),
            inverse_field: inverse_field.into(),
            defaults: FieldMap::new(),
        }
    }

    /// 建構器模式：設置新建列的預設值
    pub fn with_default(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.defaults.insert(field.into(), value.into());
        self
    }

    /// 查詢條件值
    pub fn lookup_value(&self, parent: &Record) -> FieldValue {
        FieldValue::Uuid(parent.id())
    }

    /// 新建列的初始欄位
    pub fn initial_fields(&self, parent: &Record) -> FieldMap {
        let mut fields = self.defaults.clone();
        fields.insert(self.inverse_field.clone(), self.lookup_value(parent));
        fields
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("name", &self.name),
            ("parent_table", &self.parent_table),
            ("dedicated_table", &self.dedicated_table),
            ("inverse_field", &self.inverse_field),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(RecacheError::InvalidConfig {
                    field: format!("dedicated.{}", field),
                    reason: "不可為空".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// 父實體實例
///
/// 解析出的專屬快取實體記憶在此實例上，僅在實例存活期間有效，
/// 不跨實例共享。
#[derive(Debug)]
pub struct ParentRecord {
    record: Record,
    dedicated: OnceCell<Record>,
}

impl ParentRecord {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            dedicated: OnceCell::new(),
        }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn key(&self) -> &EntityKey {
        &self.record.key
    }

    /// 已解析的專屬快取實體（未存取過則為 `None`）
    pub fn dedicated(&self) -> Option<&Record> {
        self.dedicated.get()
    }
}

impl From<Record> for ParentRecord {
    fn from(record: Record) -> Self {
        Self::new(record)
    }
}

/// 專屬快取實體管理器
pub struct DedicatedEntityManager {
    associations: RwLock<HashMap<String, DedicatedAssociation>>,
    store: Arc<dyn RecordStore>,
    bus: Arc<CallbackBus>,
    retry: RetryPolicy,
}

impl DedicatedEntityManager {
    /// 創建新的管理器
    pub fn new(store: Arc<dyn RecordStore>, bus: Arc<CallbackBus>, retry: RetryPolicy) -> Self {
        Self {
            associations: RwLock::new(HashMap::new()),
            store,
            bus,
            retry,
        }
    }

    /// 註冊專屬快取實體類型；每個父資料表只能有一個
    pub fn register(&self, association: DedicatedAssociation) -> Result<()> {
        association.validate()?;

        {
            let mut associations = self.associations.write();
            if associations.contains_key(&association.parent_table) {
                return Err(RecacheError::DuplicateDedicatedType {
                    parent_table: association.parent_table,
                });
            }
            associations.insert(association.parent_table.clone(), association.clone());
        }

        tracing::debug!(
            "註冊專屬快取實體 {}: {} → {}",
            association.name,
            association.parent_table,
            association.dedicated_table
        );
        self.bus
            .publish(&CallbackPayload::DedicatedTypeRegistered(association))
    }

    pub fn association_for(&self, parent_table: &str) -> Option<DedicatedAssociation> {
        self.associations.read().get(parent_table).cloned()
    }

    /// 只查詢、不建立
    pub fn find(&self, parent: &Record) -> Result<Option<Record>> {
        let association = self.require_association(parent.table())?;
        self.lookup(&association, parent)
    }

    /// 取得或建立父實體的專屬快取實體
    ///
    /// 先看實例上的記憶，再依反向參照查詢，最後才建立。同一實例上的並行
    /// 呼叫會等待第一個完成；跨實例或跨行程的並行建立由持久層的唯一性
    /// 約束裁決，輸家改為重新查詢。
    pub fn get_or_create(&self, parent: &ParentRecord) -> Result<Record> {
        let association = self.require_association(parent.record.table())?;
        parent
            .dedicated
            .get_or_try_init(|| self.resolve(&association, &parent.record))
            .cloned()
    }

    fn require_association(&self, parent_table: &str) -> Result<DedicatedAssociation> {
        self.association_for(parent_table)
            .ok_or_else(|| RecacheError::UnknownAssociation {
                parent_table: parent_table.to_string(),
            })
    }

    fn lookup(
        &self,
        association: &DedicatedAssociation,
        parent: &Record,
    ) -> Result<Option<Record>> {
        let mut found = self.store.find_by(
            &association.dedicated_table,
            &association.inverse_field,
            &association.lookup_value(parent),
        )?;

        if found.len() > 1 {
            tracing::warn!(
                "{} 的專屬快取實體 {} 有 {} 筆，使用第一筆",
                parent.key,
                association.name,
                found.len()
            );
        }

        if found.is_empty() {
            Ok(None)
        } else {
            Ok(Some(found.swap_remove(0)))
        }
    }

    /// 查詢 → 建立；唯一性衝突立即重新查詢，其他錯誤線性退避後重試
    fn resolve(&self, association: &DedicatedAssociation, parent: &Record) -> Result<Record> {
        let mut attempts = 0u32;

        loop {
            if let Some(existing) = self.lookup(association, parent)? {
                return Ok(existing);
            }

            attempts += 1;
            let err = match self
                .store
                .create(&association.dedicated_table, association.initial_fields(parent))
            {
                Ok(created) => return self.after_create(association, parent, created),
                Err(err) => err,
            };

            if err.is_unique_violation() {
                tracing::debug!(
                    "{} 的專屬快取實體 {} 已由其他建立者寫入，重新查詢",
                    parent.key,
                    association.name
                );
                if let Some(existing) = self.lookup(association, parent)? {
                    return Ok(existing);
                }
            }

            if attempts >= self.retry.max_attempts {
                return Err(self.exhausted(association, attempts, err));
            }

            if !err.is_unique_violation() {
                let backoff = self.retry.backoff_after(attempts);
                tracing::warn!(
                    "建立 {} 失敗（第 {} 次）: {}，{:?} 後重試",
                    association.name,
                    attempts,
                    err,
                    backoff
                );
                std::thread::sleep(backoff);
            }
        }
    }

    /// 建立成功：同步觸發 `DedicatedEntityCreated`，再回傳最新狀態
    fn after_create(
        &self,
        association: &DedicatedAssociation,
        parent: &Record,
        created: Record,
    ) -> Result<Record> {
        tracing::info!(
            "為 {} 建立專屬快取實體 {} ({})",
            parent.key,
            association.name,
            created.key
        );

        self.bus.publish(&CallbackPayload::DedicatedEntityCreated {
            association: association.name.clone(),
            parent: parent.key.clone(),
            record: created.clone(),
        })?;

        // 處理器可能已寫入初始快取值
        Ok(self.store.find(&created.key)?.unwrap_or(created))
    }

    fn exhausted(
        &self,
        association: &DedicatedAssociation,
        attempts: u32,
        source: StoreError,
    ) -> RecacheError {
        tracing::error!(
            association = %association.name,
            attempts,
            "建立專屬快取實體失敗，已用盡重試: {}",
            source
        );
        RecacheError::DedicatedCreationFailed {
            association: association.name.clone(),
            attempts,
            source,
        }
    }
}
