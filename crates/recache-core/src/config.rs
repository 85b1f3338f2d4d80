//! 引擎配置模型

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::RecacheError;

/// 專屬快取實體建立的重試策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 最大嘗試次數（含第一次）
    pub max_attempts: u32,

    /// 線性退避步長（毫秒）：第 n 次失敗後等待 `n * backoff_step_ms`
    ///
    /// 唯一性衝突不等待，直接重新查詢。
    pub backoff_step_ms: u64,
}

impl RetryPolicy {
    /// 創建新的重試策略
    pub fn new(max_attempts: u32, backoff_step_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff_step_ms,
        }
    }

    /// 第 `failed_attempts` 次失敗後的等待時間
    pub fn backoff_after(&self, failed_attempts: u32) -> Duration {
        Duration::from_millis(self.backoff_step_ms.saturating_mul(u64::from(failed_attempts)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step_ms: 50,
        }
    }
}

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 專屬快取實體建立的重試策略
    pub retry: RetryPolicy,

    /// 同一 `(table, field)` 註冊多條規則時是否記錄警告
    pub warn_on_duplicate_rules: bool,
}

impl EngineConfig {
    /// 創建預設配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 建構器模式：設置重試策略
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 建構器模式：設置最大嘗試次數
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    /// 建構器模式：設置退避步長（毫秒）
    pub fn with_backoff_step_ms(mut self, step_ms: u64) -> Self {
        self.retry.backoff_step_ms = step_ms;
        self
    }

    /// 建構器模式：設置是否警告重複規則
    pub fn with_warn_on_duplicate_rules(mut self, warn: bool) -> Self {
        self.warn_on_duplicate_rules = warn;
        self
    }

    /// 從 JSON 讀取配置並驗證
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| RecacheError::InvalidConfig {
            field: "<json>".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 驗證配置
    pub fn validate(&self) -> crate::Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(RecacheError::InvalidConfig {
                field: "retry.max_attempts".to_string(),
                reason: "至少需要一次嘗試".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            warn_on_duplicate_rules: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::new();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_step_ms, 50);
        assert!(config.warn_on_duplicate_rules);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_max_attempts(5)
            .with_backoff_step_ms(10)
            .with_warn_on_duplicate_rules(false);

        assert_eq!(config.retry, RetryPolicy::new(5, 10));
        assert!(!config.warn_on_duplicate_rules);

        let config = config.with_retry(RetryPolicy::default());
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_linear_backoff() {
        let retry = RetryPolicy::new(3, 50);

        assert_eq!(retry.backoff_after(1), Duration::from_millis(50));
        assert_eq!(retry.backoff_after(2), Duration::from_millis(100));
    }

    #[test]
    fn test_from_json_partial() {
        // 未提供的欄位使用預設值
        let config = EngineConfig::from_json_str(r#"{"retry": {"max_attempts": 4}}"#).unwrap();

        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.backoff_step_ms, 50);
        assert!(config.warn_on_duplicate_rules);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = EngineConfig::from_json_str(r#"{"retry": {"max_attempts": 0}}"#).unwrap_err();
        assert!(matches!(err, RecacheError::InvalidConfig { .. }));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(EngineConfig::from_json_str("{").is_err());
    }
}
