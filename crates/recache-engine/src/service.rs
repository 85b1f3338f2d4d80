//! 服務組裝：在啟動時建立共用的註冊表、匯流排、引擎與管理器

use recache_core::{EngineConfig, RecordStore, Result};
use std::sync::Arc;

use crate::{CallbackBus, DedicatedEntityManager, RecalculationEngine, RuleRegistry};

/// 快取服務
///
/// 各元件以 `Arc` 共用，可各自取出傳給需要的呼叫端。
pub struct RecacheService {
    pub bus: Arc<CallbackBus>,
    pub registry: Arc<RuleRegistry>,
    pub engine: Arc<RecalculationEngine>,
    pub dedicated: Arc<DedicatedEntityManager>,
    config: EngineConfig,
}

impl RecacheService {
    /// 依配置組裝服務
    pub fn new(store: Arc<dyn RecordStore>, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let bus = Arc::new(CallbackBus::new());
        let registry = Arc::new(
            RuleRegistry::new(bus.clone()).with_duplicate_warnings(config.warn_on_duplicate_rules),
        );
        let engine = Arc::new(RecalculationEngine::new(
            registry.clone(),
            bus.clone(),
            store.clone(),
        ));
        let dedicated = Arc::new(DedicatedEntityManager::new(
            store,
            bus.clone(),
            config.retry.clone(),
        ));

        tracing::debug!("快取服務已建立: {:?}", config);

        Ok(Self {
            bus,
            registry,
            engine,
            dedicated,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
