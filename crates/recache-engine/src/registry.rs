//! 規則註冊表

use parking_lot::RwLock;
use recache_core::{EntityType, Hook, HookFn, RecacheError, Result, Rule, RuleBuilder};
use std::fmt;
use std::sync::Arc;

use crate::callbacks::{CallbackBus, CallbackPayload};

/// 註冊來源：已建立的規則、建構器，或產生規則的工廠
pub enum RuleSource {
    Rule(Arc<Rule>),
    Builder(RuleBuilder),
    Factory(Box<dyn FnOnce() -> Result<Rule> + Send>),
}

impl RuleSource {
    pub fn factory<F>(factory: F) -> Self
    where
        F: FnOnce() -> Result<Rule> + Send + 'static,
    {
        RuleSource::Factory(Box::new(factory))
    }

    fn into_rule(self) -> Result<Arc<Rule>> {
        match self {
            RuleSource::Rule(rule) => Ok(rule),
            RuleSource::Builder(builder) => builder.build().map(Arc::new),
            RuleSource::Factory(factory) => factory().map(Arc::new),
        }
    }
}

impl From<Arc<Rule>> for RuleSource {
    fn from(rule: Arc<Rule>) -> Self {
        RuleSource::Rule(rule)
    }
}

impl From<Rule> for RuleSource {
    fn from(rule: Rule) -> Self {
        RuleSource::Rule(Arc::new(rule))
    }
}

impl From<RuleBuilder> for RuleSource {
    fn from(builder: RuleBuilder) -> Self {
        RuleSource::Builder(builder)
    }
}

impl fmt::Debug for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSource::Rule(rule) => f.debug_tuple("Rule").field(&rule.name()).finish(),
            RuleSource::Builder(_) => write!(f, "Builder(..)"),
            RuleSource::Factory(_) => write!(f, "Factory(..)"),
        }
    }
}

/// 註冊表快照（測試用）
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    rules: Vec<Arc<Rule>>,
    entity_types: Vec<EntityType>,
}

/// 規則註冊表
///
/// 規則依註冊順序保存，以 `Arc` 指標身分去重。依資料表或欄位的查詢
/// 每次都從這份清單篩選，不另外維護索引。
pub struct RuleRegistry {
    rules: RwLock<Vec<Arc<Rule>>>,
    entity_types: RwLock<Vec<EntityType>>,
    bus: Arc<CallbackBus>,
    warn_on_duplicates: bool,
}

impl RuleRegistry {
    pub fn new(bus: Arc<CallbackBus>) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            entity_types: RwLock::new(Vec::new()),
            bus,
            warn_on_duplicates: true,
        }
    }

    /// 建構器模式：設置是否警告重複的 `(table, field)`
    pub fn with_duplicate_warnings(mut self, warn: bool) -> Self {
        self.warn_on_duplicates = warn;
        self
    }

    /// 註冊規則，回傳目前完整的規則清單
    ///
    /// 已註冊的同一實例不會重複加入，也不會再次觸發 `RuleRegistered`。
    /// 具名更新掛鉤必須在擁有者實體類型上存在，否則立即失敗。
    pub fn register(&self, source: impl Into<RuleSource>) -> Result<Vec<Arc<Rule>>> {
        let rule = source.into().into_rule()?;
        if self.contains(&rule) {
            tracing::debug!("規則 {} 已註冊，略過", rule.name());
            return Ok(self.rules());
        }
        self.check_hook(&rule)?;

        {
            let mut rules = self.rules.write();
            // 檢查與寫入之間可能已由其他執行緒加入
            if rules.iter().any(|r| Arc::ptr_eq(r, &rule)) {
                return Ok(rules.clone());
            }

            if self.warn_on_duplicates
                && rules
                    .iter()
                    .any(|r| r.owner_table() == rule.owner_table() && r.field() == rule.field())
            {
                tracing::warn!(
                    "欄位 {} 已有其他規則，重算時以最先註冊者為準",
                    rule.name()
                );
            }

            rules.push(rule.clone());
        }

        tracing::debug!("註冊規則 {}", rule.name());
        self.bus.publish(&CallbackPayload::RuleRegistered(rule))?;

        Ok(self.rules())
    }

    /// 批次註冊（啟動時掃描已載入的規則）
    pub fn register_all<I, S>(&self, sources: I) -> Result<Vec<Arc<Rule>>>
    where
        I: IntoIterator<Item = S>,
        S: Into<RuleSource>,
    {
        for source in sources {
            self.register(source)?;
        }
        Ok(self.rules())
    }

    /// 註冊實體類型；同名類型會被取代
    pub fn register_entity_type(&self, entity_type: EntityType) {
        let mut types = self.entity_types.write();
        types.retain(|t| t.name != entity_type.name);
        types.push(entity_type);
    }

    pub fn entity_type(&self, name: &str) -> Option<EntityType> {
        self.entity_types.read().iter().find(|t| t.name == name).cloned()
    }

    /// 取得資料表上的具名方法
    pub fn method(&self, table: &str, name: &str) -> Option<HookFn> {
        self.entity_types
            .read()
            .iter()
            .find(|t| t.table == table)
            .and_then(|t| t.method(name).cloned())
    }

    /// 所有規則（註冊順序）
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        self.rules.read().clone()
    }

    /// 依資料表（及欄位）查詢規則；未知資料表回傳空清單
    pub fn rules_for(&self, table: &str, field: Option<&str>) -> Vec<Arc<Rule>> {
        self.rules
            .read()
            .iter()
            .filter(|r| r.owner_table() == table)
            .filter(|r| field.map_or(true, |f| r.field() == f))
            .cloned()
            .collect()
    }

    /// 依實體類型名稱查詢規則
    pub fn rules_for_entity_type(&self, type_name: &str) -> Vec<Arc<Rule>> {
        match self.entity_type(type_name) {
            Some(entity_type) => self.rules_for(&entity_type.table, None),
            None => Vec::new(),
        }
    }

    /// 擁有 `(table, field)` 的規則：最先註冊者
    pub fn owning_rule(&self, table: &str, field: &str) -> Option<Arc<Rule>> {
        self.rules
            .read()
            .iter()
            .find(|r| r.owner_table() == table && r.field() == field)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            rules: self.rules(),
            entity_types: self.entity_types.read().clone(),
        }
    }

    pub fn restore(&self, snapshot: RegistrySnapshot) {
        *self.rules.write() = snapshot.rules;
        *self.entity_types.write() = snapshot.entity_types;
    }

    /// 同一規則實例是否已註冊
    pub fn contains(&self, rule: &Arc<Rule>) -> bool {
        self.rules.read().iter().any(|r| Arc::ptr_eq(r, rule))
    }

    fn check_hook(&self, rule: &Rule) -> Result<()> {
        if let Hook::Named(method) = rule.on_update() {
            if self.method(rule.owner_table(), method).is_none() {
                return Err(RecacheError::MissingHookMethod {
                    table: rule.owner_table().to_string(),
                    method: method.clone(),
                });
            }
        }
        Ok(())
    }
}
