//! # Recache
//!
//! 反應式衍生欄位快取：依欄位層級的變更通知，只重算並寫入真正改變的快取值。

pub use recache_core::{
    ChangeEvent, EngineConfig, EntityKey, EntityType, FieldMap, FieldValue, Hook, Operation,
    RecacheError, Record, RecordStore, Result, RetryPolicy, Rule, RuleBuilder, StoreError,
    WatchSpec,
};
pub use recache_engine::{
    AppliedChange, CallbackBus, CallbackPayload, CallbackPoint, ChangeOutcome,
    DedicatedAssociation, DedicatedEntityManager, DeferredRecalculation, ParentRecord,
    RecacheService, RecalcReport, RecalculationEngine, RuleRegistry, RuleSource,
};
pub use recache_store::MemoryStore;
