//! 實體類型描述

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{HookFn, Record, RecordStore};

/// 實體類型：類型名稱、儲存資料表及可供具名掛鉤呼叫的方法
#[derive(Clone)]
pub struct EntityType {
    /// 類型名稱（例如 `Customer`）
    pub name: String,

    /// 儲存資料表（例如 `customers`）
    pub table: String,

    methods: BTreeMap<String, HookFn>,
}

impl EntityType {
    /// 創建新的實體類型
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            methods: BTreeMap::new(),
        }
    }

    /// 建構器模式：加入具名方法
    pub fn with_method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&Record, &dyn RecordStore) -> crate::Result<()> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    /// 是否提供指定方法
    pub fn exposes(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn method(&self, name: &str) -> Option<&HookFn> {
        self.methods.get(name)
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
