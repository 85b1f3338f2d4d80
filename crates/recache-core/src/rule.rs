//! 快取規則模型

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::{ChangeEvent, EntityKey, EntityType, FieldValue, Operation, Record, RecordStore};

/// 計算函式：為單一實體產生新的快取值
pub type ComputeFn =
    Arc<dyn Fn(&Record, &dyn RecordStore) -> crate::Result<FieldValue> + Send + Sync>;

/// 受影響實體解析函式：將上游變更映射到需要重算的實體
pub type ResolveFn =
    Arc<dyn Fn(&ChangeEvent, &dyn RecordStore) -> crate::Result<Vec<EntityKey>> + Send + Sync>;

/// 更新後掛鉤 / 實體方法
pub type HookFn = Arc<dyn Fn(&Record, &dyn RecordStore) -> crate::Result<()> + Send + Sync>;

/// 更新後掛鉤
#[derive(Clone, Default)]
pub enum Hook {
    /// 無掛鉤
    #[default]
    None,
    /// 直接呼叫的函式
    Callable(HookFn),
    /// 擁有者實體類型上的具名方法（註冊時檢查是否存在）
    Named(String),
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::None => write!(f, "None"),
            Hook::Callable(_) => write!(f, "Callable(..)"),
            Hook::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}

/// 監聽設定：上游資料表 → 欄位集合
///
/// 欄位集合為空時代表監聽該資料表的所有欄位。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSpec(BTreeMap<String, BTreeSet<String>>);

impl WatchSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入監聽的資料表與欄位
    pub fn watch<I, S>(&mut self, table: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(table.into())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn fields(&self, table: &str) -> Option<&BTreeSet<String>> {
        self.0.get(table)
    }

    /// 判斷變更事件是否觸發此監聽
    ///
    /// 新增與刪除只要資料表有被監聽即觸發；更新必須觸及監聽的欄位。
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        let Some(fields) = self.0.get(event.table()) else {
            return false;
        };

        match event.operation {
            Operation::Create | Operation::Destroy => true,
            Operation::Update => {
                fields.is_empty() || fields.iter().any(|field| event.touches(field))
            }
        }
    }
}

/// 快取規則
///
/// 以 `Rule::builder` 建立；建立後不可變，由 `RuleRegistry` 以 `Arc` 持有，
/// 並以指標身分去重。
pub struct Rule {
    owner_table: String,
    field: String,
    compute: ComputeFn,
    resolve_affected: Option<ResolveFn>,
    watch: WatchSpec,
    synchronous: bool,
    operations: BTreeSet<Operation>,
    on_update: Hook,
    context: Option<Arc<dyn Any + Send + Sync>>,
}

impl Rule {
    /// 以目標欄位開始建構規則
    pub fn builder(field: impl Into<String>) -> RuleBuilder {
        RuleBuilder::new(field)
    }

    pub fn owner_table(&self) -> &str {
        &self.owner_table
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn watch(&self) -> &WatchSpec {
        &self.watch
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    pub fn operations(&self) -> &BTreeSet<Operation> {
        &self.operations
    }

    pub fn on_update(&self) -> &Hook {
        &self.on_update
    }

    pub fn has_resolver(&self) -> bool {
        self.resolve_affected.is_some()
    }

    /// 取得指定型別的規則上下文
    pub fn context<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.context.as_ref().and_then(|ctx| ctx.downcast_ref::<T>())
    }

    /// 計算實體的新快取值
    pub fn compute(&self, record: &Record, store: &dyn RecordStore) -> crate::Result<FieldValue> {
        (self.compute)(record, store)
    }

    /// 解析受影響的實體；未設定解析函式時回傳空集合
    pub fn resolve_affected(
        &self,
        event: &ChangeEvent,
        store: &dyn RecordStore,
    ) -> crate::Result<Vec<EntityKey>> {
        match &self.resolve_affected {
            Some(resolve) => resolve(event, store),
            None => Ok(Vec::new()),
        }
    }

    /// 此變更事件是否應觸發本規則
    pub fn applies_to(&self, event: &ChangeEvent) -> bool {
        self.has_resolver()
            && self.operations.contains(&event.operation)
            && self.watch.matches(event)
    }

    /// 規則顯示名稱（`table.field`）
    pub fn name(&self) -> String {
        format!("{}.{}", self.owner_table, self.field)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("owner_table", &self.owner_table)
            .field("field", &self.field)
            .field("watch", &self.watch)
            .field("synchronous", &self.synchronous)
            .field("operations", &self.operations)
            .field("on_update", &self.on_update)
            .field("has_resolver", &self.resolve_affected.is_some())
            .finish()
    }
}

/// 規則建構器
pub struct RuleBuilder {
    owner_table: Option<String>,
    field: String,
    compute: Option<ComputeFn>,
    resolve_affected: Option<ResolveFn>,
    watch: WatchSpec,
    synchronous: bool,
    operations: BTreeSet<Operation>,
    on_update: Hook,
    context: Option<Arc<dyn Any + Send + Sync>>,
}

impl RuleBuilder {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            owner_table: None,
            field: field.into(),
            compute: None,
            resolve_affected: None,
            watch: WatchSpec::new(),
            synchronous: true,
            operations: Operation::ALL.into_iter().collect(),
            on_update: Hook::None,
            context: None,
        }
    }

    /// 建構器模式：設置擁有者資料表
    pub fn owner_table(mut self, table: impl Into<String>) -> Self {
        self.owner_table = Some(table.into());
        self
    }

    /// 建構器模式：由實體類型推斷擁有者資料表
    pub fn for_entity_type(mut self, entity_type: &EntityType) -> Self {
        if self.owner_table.is_none() {
            self.owner_table = Some(entity_type.table.clone());
        }
        self
    }

    /// 建構器模式：設置計算函式
    pub fn compute<F>(mut self, compute: F) -> Self
    where
        F: Fn(&Record, &dyn RecordStore) -> crate::Result<FieldValue> + Send + Sync + 'static,
    {
        self.compute = Some(Arc::new(compute));
        self
    }

    /// 建構器模式：設置受影響實體解析函式
    pub fn resolve_affected<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&ChangeEvent, &dyn RecordStore) -> crate::Result<Vec<EntityKey>>
            + Send
            + Sync
            + 'static,
    {
        self.resolve_affected = Some(Arc::new(resolve));
        self
    }

    /// 建構器模式：監聽上游資料表欄位
    pub fn watch<I, S>(mut self, table: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watch.watch(table, fields);
        self
    }

    /// 建構器模式：改為非同步（由宿主延後派送）
    pub fn asynchronous(mut self) -> Self {
        self.synchronous = false;
        self
    }

    /// 建構器模式：限制觸發的操作類型
    pub fn operations(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.operations = operations.into_iter().collect();
        self
    }

    /// 建構器模式：設置更新後掛鉤函式
    pub fn on_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Record, &dyn RecordStore) -> crate::Result<()> + Send + Sync + 'static,
    {
        self.on_update = Hook::Callable(Arc::new(hook));
        self
    }

    /// 建構器模式：以擁有者實體類型上的具名方法作為更新後掛鉤
    pub fn on_update_method(mut self, method: impl Into<String>) -> Self {
        self.on_update = Hook::Named(method.into());
        self
    }

    /// 建構器模式：設置規則上下文
    pub fn context<T: Any + Send + Sync>(mut self, context: T) -> Self {
        self.context = Some(Arc::new(context));
        self
    }

    /// 建立規則；缺少必要設定時立即失敗
    pub fn build(self) -> crate::Result<Rule> {
        if self.field.trim().is_empty() {
            return Err(crate::RecacheError::MissingField);
        }

        let owner_table = match self.owner_table {
            Some(table) if !table.trim().is_empty() => table,
            _ => {
                return Err(crate::RecacheError::MissingOwnerTable { field: self.field });
            }
        };

        let compute = self.compute.ok_or_else(|| crate::RecacheError::MissingCompute {
            table: owner_table.clone(),
            field: self.field.clone(),
        })?;

        if let Hook::Named(method) = &self.on_update {
            if method.trim().is_empty() {
                return Err(crate::RecacheError::MissingHookMethod {
                    table: owner_table,
                    method: method.clone(),
                });
            }
        }

        Ok(Rule {
            owner_table,
            field: self.field,
            compute,
            resolve_affected: self.resolve_affected,
            watch: self.watch,
            synchronous: self.synchronous,
            operations: self.operations,
            on_update: self.on_update,
            context: self.context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecacheError;
    use rstest::rstest;
    use uuid::Uuid;

    fn constant_rule() -> RuleBuilder {
        Rule::builder("unfulfilled_count")
            .owner_table("customers")
            .compute(|_, _| Ok(FieldValue::Integer(0)))
    }

    #[test]
    fn test_build_defaults() {
        let rule = constant_rule().build().unwrap();

        assert_eq!(rule.name(), "customers.unfulfilled_count");
        assert!(rule.is_synchronous());
        assert_eq!(rule.operations().len(), 3);
        assert!(!rule.has_resolver());
        assert!(matches!(rule.on_update(), Hook::None));
    }

    #[test]
    fn test_missing_owner_table_fails_fast() {
        let err = Rule::builder("unfulfilled_count")
            .compute(|_, _| Ok(FieldValue::Null))
            .build()
            .unwrap_err();
        assert!(matches!(err, RecacheError::MissingOwnerTable { .. }));
    }

    #[test]
    fn test_missing_compute_fails_fast() {
        let err = Rule::builder("unfulfilled_count")
            .owner_table("customers")
            .build()
            .unwrap_err();
        assert!(matches!(err, RecacheError::MissingCompute { .. }));
    }

    #[test]
    fn test_owner_table_inferred_from_entity_type() {
        let customer = EntityType::new("Customer", "customers");
        let rule = Rule::builder("unfulfilled_count")
            .for_entity_type(&customer)
            .compute(|_, _| Ok(FieldValue::Null))
            .build()
            .unwrap();
        assert_eq!(rule.owner_table(), "customers");
    }

    #[test]
    fn test_context_downcast() {
        let rule = constant_rule().context(String::from("unfulfilled")).build().unwrap();
        assert_eq!(rule.context::<String>().map(String::as_str), Some("unfulfilled"));
        assert!(rule.context::<u32>().is_none());
    }

    #[rstest]
    #[case(Operation::Update, &["status"], true)]
    #[case(Operation::Update, &["customer_id"], true)]
    #[case(Operation::Update, &["note"], false)]
    #[case(Operation::Create, &[], true)]
    #[case(Operation::Destroy, &[], true)]
    fn test_watch_matches(
        #[case] operation: Operation,
        #[case] changed: &[&str],
        #[case] expected: bool,
    ) {
        let mut watch = WatchSpec::new();
        watch.watch("orders", ["status", "customer_id"]);

        let mut event = ChangeEvent::new(operation, EntityKey::new("orders", Uuid::new_v4()));
        for field in changed {
            event = event.with_change(*field, FieldValue::Null, FieldValue::Integer(1));
        }

        assert_eq!(watch.matches(&event), expected);
    }

    #[test]
    fn test_watch_ignores_other_tables() {
        let mut watch = WatchSpec::new();
        watch.watch("orders", ["status"]);

        let event = ChangeEvent::create(EntityKey::new("invoices", Uuid::new_v4()));
        assert!(!watch.matches(&event));
    }

    #[test]
    fn test_empty_field_set_watches_everything() {
        let mut watch = WatchSpec::new();
        watch.watch("orders", Vec::<String>::new());

        let event = ChangeEvent::update(EntityKey::new("orders", Uuid::new_v4()))
            .with_change("note", "a", "b");
        assert!(watch.matches(&event));
    }

    #[test]
    fn test_applies_to_respects_operations() {
        let rule = constant_rule()
            .watch("orders", ["status"])
            .operations([Operation::Update])
            .resolve_affected(|_, _| Ok(Vec::new()))
            .build()
            .unwrap();

        let key = EntityKey::new("orders", Uuid::new_v4());
        assert!(rule.applies_to(&ChangeEvent::update(key.clone()).with_change("status", "a", "b")));
        assert!(!rule.applies_to(&ChangeEvent::create(key)));
    }
}
