//! 重算引擎

use chrono::Utc;
use rayon::prelude::*;
use recache_core::{ChangeEvent, EntityKey, Hook, RecacheError, Record, RecordStore, Result, Rule};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::callbacks::{CallbackBus, CallbackPayload};
use crate::change_set::StagedChanges;
use crate::registry::RuleRegistry;
use crate::{AppliedChange, ChangeOutcome, DeferredRecalculation, RecalcReport};

/// 資料表 → 本次要重算的規則（與欄位順序一致）
type RulePlan = HashMap<String, Vec<Arc<Rule>>>;

/// 單一實體的處理結果
struct EntityOutcome {
    visited: bool,
    written: bool,
    applied: Vec<AppliedChange>,
}

/// 重算引擎
///
/// 對每個候選實體重新讀取目前值、計算、比對，只持久化真正的變更；
/// 每個實體每次重算至多一次寫入，之後逐欄位發佈 `RecalculationApplied`
/// 並呼叫規則的更新後掛鉤。
pub struct RecalculationEngine {
    registry: Arc<RuleRegistry>,
    bus: Arc<CallbackBus>,
    store: Arc<dyn RecordStore>,
}

impl RecalculationEngine {
    /// 創建新的重算引擎
    pub fn new(
        registry: Arc<RuleRegistry>,
        bus: Arc<CallbackBus>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            registry,
            bus,
            store,
        }
    }

    /// 重算指定實體的欄位（手動回填與反應式路徑共用）
    pub fn recalculate(&self, candidates: &[Record], fields: &[&str]) -> Result<RecalcReport> {
        let keys: Vec<EntityKey> = candidates.iter().map(|r| r.key.clone()).collect();
        self.recalculate_keys(&keys, fields)
    }

    /// 以實體參照重算；重複的參照只處理一次
    pub fn recalculate_keys(&self, keys: &[EntityKey], fields: &[&str]) -> Result<RecalcReport> {
        let fields = distinct_fields(fields);
        if fields.is_empty() || keys.is_empty() {
            return Ok(RecalcReport::empty());
        }

        let keys = distinct_keys(keys);
        tracing::info!("開始重算：實體 {} 筆，欄位 {:?}", keys.len(), fields);
        let start_time = std::time::Instant::now();

        let plan = self.plan(&keys, &fields)?;

        let mut report = RecalcReport::empty();
        for key in keys {
            let outcome = self.process_entity(key, &plan)?;
            absorb(&mut report, outcome);
        }

        report.calculation_time_ms = Some(start_time.elapsed().as_millis());
        tracing::info!(
            "重算完成，耗時 {:?}，寫入 {} 筆，變更 {} 個欄位",
            start_time.elapsed(),
            report.writes,
            report.applied.len()
        );

        Ok(report)
    }

    /// 重算整個資料表（回填）
    pub fn recalculate_table(&self, table: &str, fields: &[&str]) -> Result<RecalcReport> {
        let keys: Vec<EntityKey> = self
            .store
            .scan(table)?
            .into_iter()
            .map(|r| r.key)
            .collect();
        tracing::debug!("回填資料表 {}: {} 筆", table, keys.len());
        self.recalculate_keys(&keys, fields)
    }

    /// 平行重算：不同實體分派到 rayon 執行緒池，同一實體只由一個工作者處理
    ///
    /// 重複的實體參照會先去除；結果依輸入順序排列。
    pub fn recalculate_par(&self, keys: &[EntityKey], fields: &[&str]) -> Result<RecalcReport> {
        let fields = distinct_fields(fields);
        if fields.is_empty() || keys.is_empty() {
            return Ok(RecalcReport::empty());
        }

        let distinct = distinct_keys(keys);

        tracing::info!(
            "開始平行重算：實體 {} 筆，欄位 {:?}",
            distinct.len(),
            fields
        );
        let start_time = std::time::Instant::now();

        let plan = self.plan(&distinct, &fields)?;

        let outcomes: Vec<Result<EntityOutcome>> = distinct
            .par_iter()
            .map(|key| self.process_entity(key, &plan))
            .collect();

        let mut report = RecalcReport::empty();
        for outcome in outcomes {
            absorb(&mut report, outcome?);
        }

        report.calculation_time_ms = Some(start_time.elapsed().as_millis());
        tracing::info!("平行重算完成，耗時 {:?}", start_time.elapsed());

        Ok(report)
    }

    /// 處理外部變更偵測送來的事件
    ///
    /// 逐一檢查監聽此事件的規則：同步規則立即重算，非同步規則回傳待辦。
    pub fn handle_change(&self, event: &ChangeEvent) -> Result<ChangeOutcome> {
        let rules: Vec<Arc<Rule>> = self
            .registry
            .rules()
            .into_iter()
            .filter(|r| r.applies_to(event))
            .collect();

        tracing::debug!(
            "變更事件 {} {}: 觸發 {} 條規則",
            event.operation,
            event.record,
            rules.len()
        );

        let mut outcome = ChangeOutcome::default();
        for rule in rules {
            let rule_outcome = self.handle_change_for(&rule, event)?;
            outcome.recalculated.merge(rule_outcome.recalculated);
            outcome.deferred.extend(rule_outcome.deferred);
        }
        Ok(outcome)
    }

    /// 以單一規則處理事件（監聽器派送入口）
    pub fn handle_change_for(&self, rule: &Rule, event: &ChangeEvent) -> Result<ChangeOutcome> {
        let mut outcome = ChangeOutcome::default();

        let keys = rule.resolve_affected(event, self.store.as_ref())?;
        if keys.is_empty() {
            tracing::debug!("規則 {} 無受影響實體", rule.name());
            return Ok(outcome);
        }

        if !rule.is_synchronous() {
            tracing::debug!("規則 {} 為非同步，延後 {} 筆", rule.name(), keys.len());
            outcome.deferred.push(DeferredRecalculation {
                field: rule.field().to_string(),
                keys,
            });
            return Ok(outcome);
        }

        outcome.recalculated = self.recalculate_keys(&keys, &[rule.field()])?;
        Ok(outcome)
    }

    /// 為每個出現的資料表找出各欄位的擁有規則；缺少規則屬設定錯誤
    fn plan(&self, keys: &[&EntityKey], fields: &[&str]) -> Result<RulePlan> {
        let mut plan = RulePlan::new();
        for key in keys {
            if plan.contains_key(&key.table) {
                continue;
            }
            let mut rules = Vec::with_capacity(fields.len());
            for field in fields {
                let rule = self.registry.owning_rule(&key.table, field).ok_or_else(|| {
                    RecacheError::NoRuleForField {
                        table: key.table.clone(),
                        field: field.to_string(),
                    }
                })?;
                rules.push(rule);
            }
            plan.insert(key.table.clone(), rules);
        }
        Ok(plan)
    }

    /// 單一實體：讀取 → 計算 → 比對 → 一次寫入 → 事件與掛鉤
    fn process_entity(&self, key: &EntityKey, plan: &RulePlan) -> Result<EntityOutcome> {
        let Some(record) = self.store.find(key)? else {
            tracing::debug!("實體 {} 已不存在，略過", key);
            return Ok(EntityOutcome {
                visited: false,
                written: false,
                applied: Vec::new(),
            });
        };

        let rules = plan.get(&key.table).map(Vec::as_slice).unwrap_or_default();

        let mut staged = StagedChanges::new(key.clone());
        for rule in rules {
            let new_value = rule.compute(&record, self.store.as_ref())?;
            let old_value = record.get(rule.field());
            if &new_value == old_value {
                tracing::debug!("{} {} 未變更", key, rule.field());
                continue;
            }
            tracing::debug!("{} {}: {} → {}", key, rule.field(), old_value, new_value);
            staged.stage(rule.clone(), old_value.clone(), new_value);
        }

        if staged.is_empty() {
            return Ok(EntityOutcome {
                visited: true,
                written: false,
                applied: Vec::new(),
            });
        }

        let updated = self.store.update_fields(key, &staged.writes())?;
        let applied_at = Utc::now();

        let mut applied = Vec::with_capacity(staged.len());
        for change in staged.into_changes() {
            let applied_change = AppliedChange {
                key: key.clone(),
                field: change.field,
                rule: change.rule,
                old_value: change.old_value,
                new_value: change.new_value,
                applied_at,
            };
            self.bus
                .publish(&CallbackPayload::RecalculationApplied(applied_change.clone()))?;
            self.run_hook(&applied_change.rule, &updated)?;
            applied.push(applied_change);
        }

        Ok(EntityOutcome {
            visited: true,
            written: true,
            applied,
        })
    }

    fn run_hook(&self, rule: &Rule, updated: &Record) -> Result<()> {
        match rule.on_update() {
            Hook::None => Ok(()),
            Hook::Callable(hook) => hook(updated, self.store.as_ref()),
            Hook::Named(method) => {
                let hook = self
                    .registry
                    .method(rule.owner_table(), method)
                    .ok_or_else(|| RecacheError::MissingHookMethod {
                        table: rule.owner_table().to_string(),
                        method: method.clone(),
                    })?;
                hook(updated, self.store.as_ref())
            }
        }
    }
}

/// 去除重複欄位，保留首次出現的順序
fn distinct_fields<'a>(fields: &[&'a str]) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    fields.iter().copied().filter(|f| seen.insert(*f)).collect()
}

/// 去除重複實體參照，保留首次出現的順序
fn distinct_keys(keys: &[EntityKey]) -> Vec<&EntityKey> {
    let mut seen = HashSet::new();
    keys.iter().filter(|k| seen.insert(*k)).collect()
}

fn absorb(report: &mut RecalcReport, outcome: EntityOutcome) {
    if outcome.visited {
        report.entities_visited += 1;
    }
    if outcome.written {
        report.writes += 1;
    }
    report.applied.extend(outcome.applied);
}
