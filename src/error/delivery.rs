//! 投递失败信息
//!
//! 仅通过投递回调异步暴露，永远不会同步返回给 `produce` 的调用方

use super::code::{ErrorCategory, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// broker 或客户端报告的单条消息投递失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryError {
    /// 错误代码
    pub code: ErrorCode,
    /// 错误描述
    pub reason: String,
    /// 错误时间戳
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DeliveryError {
    /// 创建新的投递错误
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// 仅凭错误代码创建，描述取错误代码的标识符
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.as_str())
    }

    /// 获取错误代码的数字值
    #[inline]
    pub fn code_value(&self) -> i32 {
        self.code.as_i32()
    }

    /// 获取错误类别
    #[inline]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// 判断是否为可重试的错误
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.reason)
    }
}

impl std::error::Error for DeliveryError {}
