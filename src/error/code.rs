//! 错误代码和错误类别定义
//!
//! 正数为 Kafka 协议中 broker 返回的错误码，负数为客户端本地错误码
//! （取值与 librdkafka 保持一致，便于与原生库互转）

use serde::{Deserialize, Serialize};
use std::fmt;

/// 生产者错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ErrorCode {
    // ============================================================
    // 客户端本地错误 (< 0)
    // ============================================================
    /// 本地消息在队列中等待超时（message.timeout.ms）
    MessageTimedOut = -192,
    /// 指定的分区不存在
    UnknownPartition = -190,
    /// 指定的 topic 不存在
    UnknownTopic = -188,
    /// 参数非法
    InvalidArgument = -186,
    /// 本地发送队列已满
    QueueFull = -184,
    /// 客户端实例已销毁
    Destroyed = -197,
    /// 通用失败
    Fail = -196,
    /// broker 传输层错误
    Transport = -195,

    // ============================================================
    // broker 错误 (>= -1)
    // ============================================================
    /// 未知的 broker 错误
    Unknown = -1,
    /// 请求的 topic 或分区在该 broker 上不存在
    UnknownTopicOrPartition = 3,
    /// 消息大小非法
    InvalidMessageSize = 4,
    /// 分区 leader 选举中，暂时不可写
    LeaderNotAvailable = 5,
    /// 客户端元数据过期，目标 broker 不是 leader
    NotLeaderForPartition = 6,
    /// 请求超过 broker 侧超时时间
    RequestTimedOut = 7,
    /// 消息超过 broker 允许的最大大小
    MessageSizeTooLarge = 10,
    /// ISR 副本数不足
    NotEnoughReplicas = 19,
    /// 无权访问该 topic
    TopicAuthorizationFailed = 29,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Local,
    Broker,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// 从数字值创建错误代码
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            -192 => Some(ErrorCode::MessageTimedOut),
            -190 => Some(ErrorCode::UnknownPartition),
            -188 => Some(ErrorCode::UnknownTopic),
            -186 => Some(ErrorCode::InvalidArgument),
            -184 => Some(ErrorCode::QueueFull),
            -197 => Some(ErrorCode::Destroyed),
            -196 => Some(ErrorCode::Fail),
            -195 => Some(ErrorCode::Transport),
            -1 => Some(ErrorCode::Unknown),
            3 => Some(ErrorCode::UnknownTopicOrPartition),
            4 => Some(ErrorCode::InvalidMessageSize),
            5 => Some(ErrorCode::LeaderNotAvailable),
            6 => Some(ErrorCode::NotLeaderForPartition),
            7 => Some(ErrorCode::RequestTimedOut),
            10 => Some(ErrorCode::MessageSizeTooLarge),
            19 => Some(ErrorCode::NotEnoughReplicas),
            29 => Some(ErrorCode::TopicAuthorizationFailed),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MessageTimedOut => "MESSAGE_TIMED_OUT",
            ErrorCode::UnknownPartition => "UNKNOWN_PARTITION",
            ErrorCode::UnknownTopic => "UNKNOWN_TOPIC",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::Destroyed => "DESTROYED",
            ErrorCode::Fail => "FAIL",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::UnknownTopicOrPartition => "UNKNOWN_TOPIC_OR_PARTITION",
            ErrorCode::InvalidMessageSize => "INVALID_MESSAGE_SIZE",
            ErrorCode::LeaderNotAvailable => "LEADER_NOT_AVAILABLE",
            ErrorCode::NotLeaderForPartition => "NOT_LEADER_FOR_PARTITION",
            ErrorCode::RequestTimedOut => "REQUEST_TIMED_OUT",
            ErrorCode::MessageSizeTooLarge => "MESSAGE_SIZE_TOO_LARGE",
            ErrorCode::NotEnoughReplicas => "NOT_ENOUGH_REPLICAS",
            ErrorCode::TopicAuthorizationFailed => "TOPIC_AUTHORIZATION_FAILED",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        if self.as_i32() < -1 {
            ErrorCategory::Local
        } else {
            ErrorCategory::Broker
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 仅作为调用方制定重试策略的参考，生产者本身从不自动重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::QueueFull
                | ErrorCode::MessageTimedOut
                | ErrorCode::Transport
                | ErrorCode::LeaderNotAvailable
                | ErrorCode::NotLeaderForPartition
                | ErrorCode::RequestTimedOut
                | ErrorCode::NotEnoughReplicas
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Local => write!(f, "LOCAL"),
            ErrorCategory::Broker => write!(f, "BROKER"),
        }
    }
}
