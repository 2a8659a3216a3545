//! 限流重试策略
//!
//! 只有 RateLimited 可重试；第 n 次重试（n 从 0 起）前等待 2^(n+1) * base_delay，
//! 默认 base 1000ms、最多 3 次重试，即 2000 / 4000 / 8000ms，共最多 4 次调用。无抖动。

use std::time::Duration;

use crate::backend::GenerationError;
use crate::config::RetrySection;
use crate::core::RetryDecision;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(cfg: &RetrySection) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// 第 n 次重试（0 起）前的退避时间
    pub fn backoff(&self, retry_index: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_index.saturating_add(1));
        self.base_delay.saturating_mul(factor)
    }

    /// attempt 为该任务已发起的后端调用次数（包含刚失败的这一次，从 1 起）
    pub fn decide(&self, err: &GenerationError, attempt: u32) -> RetryDecision {
        match err {
            GenerationError::RateLimited(msg) => {
                let retries_done = attempt.saturating_sub(1);
                if retries_done < self.max_retries {
                    RetryDecision::Retry(self.backoff(retries_done))
                } else {
                    RetryDecision::GiveUp(format!(
                        "Rate limit retries exhausted after {attempt} attempts: {msg}"
                    ))
                }
            }
            GenerationError::Other(msg) => RetryDecision::GiveUp(msg.clone()),
        }
    }
}
