//! 記憶體內持久層

use parking_lot::Mutex;
use recache_core::{
    EntityKey, FieldMap, FieldValue, Record, RecordStore, StoreError, StoreResult,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::WriteJournal;

#[derive(Debug, Default)]
struct Table {
    /// 依插入順序保存
    rows: Vec<Record>,
    unique_fields: BTreeSet<String>,
}

impl Table {
    fn position(&self, id: Uuid) -> Option<usize> {
        self.rows.iter().position(|r| r.key.id == id)
    }

    /// 檢查候選欄位值是否違反唯一性約束（`Null` 不參與比較）
    fn check_unique(&self, table: &str, id: Uuid, fields: &FieldMap) -> StoreResult<()> {
        for field in &self.unique_fields {
            let Some(value) = fields.get(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let conflict = self
                .rows
                .iter()
                .any(|row| row.key.id != id && row.get(field) == value);
            if conflict {
                return Err(StoreError::UniqueViolation {
                    table: table.to_string(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }
}

/// 記憶體內持久層
///
/// 所有操作在同一把鎖下完成，因此每次 `update_fields` / `create` 都是原子的；
/// 兩次呼叫之間不持有鎖，可重現「查無 → 同時建立」的競爭。
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Table>>,
    journal: Mutex<WriteJournal>,
    create_faults: Mutex<VecDeque<StoreError>>,
    create_calls: AtomicUsize,
}

impl MemoryStore {
    /// 創建空的持久層
    pub fn new() -> Self {
        Self::default()
    }

    /// 宣告唯一性約束
    pub fn declare_unique(&self, table: &str, field: &str) {
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .unique_fields
            .insert(field.to_string());
    }

    /// 直接寫入一列資料（不經過日誌，用於準備測試資料）
    pub fn insert(&self, record: Record) -> StoreResult<Record> {
        let mut tables = self.tables.lock();
        let table = tables.entry(record.key.table.clone()).or_default();
        table.check_unique(&record.key.table, record.key.id, &record.fields)?;

        match table.position(record.key.id) {
            Some(pos) => table.rows[pos] = record.clone(),
            None => table.rows.push(record.clone()),
        }
        Ok(record)
    }

    /// 刪除一列資料
    pub fn remove(&self, key: &EntityKey) -> Option<Record> {
        let mut tables = self.tables.lock();
        let table = tables.get_mut(&key.table)?;
        let pos = table.position(key.id)?;
        Some(table.rows.remove(pos))
    }

    /// 資料表列數
    pub fn count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    /// 讓接下來的 `create` 依序回傳指定錯誤
    pub fn inject_create_failures(&self, failures: impl IntoIterator<Item = StoreError>) {
        self.create_faults.lock().extend(failures);
    }

    /// `create` 被呼叫的次數（包含失敗）
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// `update_fields` 寫入總次數
    pub fn write_count(&self) -> usize {
        self.journal.lock().len()
    }

    /// 指定實體的寫入次數
    pub fn writes_for(&self, key: &EntityKey) -> usize {
        self.journal.lock().writes_for(key)
    }
}

impl RecordStore for MemoryStore {
    fn find(&self, key: &EntityKey) -> StoreResult<Option<Record>> {
        let tables = self.tables.lock();
        Ok(tables
            .get(&key.table)
            .and_then(|t| t.rows.iter().find(|r| r.key.id == key.id))
            .cloned())
    }

    fn find_by(&self, table: &str, field: &str, value: &FieldValue) -> StoreResult<Vec<Record>> {
        let tables = self.tables.lock();
        Ok(tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|r| r.get(field) == value)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn scan(&self, table: &str) -> StoreResult<Vec<Record>> {
        let tables = self.tables.lock();
        Ok(tables.get(table).map(|t| t.rows.clone()).unwrap_or_default())
    }

    fn update_fields(&self, key: &EntityKey, writes: &FieldMap) -> StoreResult<Record> {
        let updated = {
            let mut tables = self.tables.lock();
            let table = tables
                .get_mut(&key.table)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            let pos = table
                .position(key.id)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            table.check_unique(&key.table, key.id, writes)?;

            let row = &mut table.rows[pos];
            row.apply(writes);
            row.clone()
        };

        tracing::trace!("寫入 {}: {} 個欄位", key, writes.len());
        self.journal.lock().record(key.clone(), writes.clone());
        Ok(updated)
    }

    fn create(&self, table: &str, fields: FieldMap) -> StoreResult<Record> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(fault) = self.create_faults.lock().pop_front() {
            return Err(fault);
        }

        let mut tables = self.tables.lock();
        let data = tables.entry(table.to_string()).or_default();
        let id = Uuid::new_v4();
        data.check_unique(table, id, &fields)?;

        let record = Record {
            key: EntityKey::new(table, id),
            fields,
        };
        data.rows.push(record.clone());
        Ok(record)
    }
}
