//! 生产者同步错误类型
//!
//! 所有同步失败都以返回值的形式交给调用方，失败后不会留下部分状态

use super::code::ErrorCode;
use thiserror::Error;

/// 外部 broker 客户端库报告的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// 内部发送队列已满
    #[error("发送队列已满")]
    QueueFull,

    /// 消息超过允许的最大大小
    #[error("消息过大: {size} 字节 (最大 {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// topic 不存在或名称非法
    #[error("非法 topic: {0}")]
    UnknownTopic(String),

    /// 配置非法
    #[error("配置错误: {0}")]
    Config(String),

    /// 其他客户端错误
    #[error("客户端错误 [{code}] {reason}")]
    Client { code: ErrorCode, reason: String },
}

impl BrokerError {
    /// 创建客户端错误
    pub fn client(code: ErrorCode, reason: impl Into<String>) -> Self {
        BrokerError::Client {
            code,
            reason: reason.into(),
        }
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            BrokerError::QueueFull => ErrorCode::QueueFull,
            BrokerError::MessageTooLarge { .. } => ErrorCode::MessageSizeTooLarge,
            BrokerError::UnknownTopic(_) => ErrorCode::UnknownTopic,
            BrokerError::Config(_) => ErrorCode::InvalidArgument,
            BrokerError::Client { code, .. } => *code,
        }
    }
}

/// 构造生产者失败（客户端或 topic 句柄无法创建）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    /// 原生客户端创建失败
    #[error("创建客户端失败: {0}")]
    Client(#[source] BrokerError),

    /// topic 句柄创建失败
    #[error("创建 topic 句柄失败 ({topic}): {source}")]
    Topic {
        topic: String,
        #[source]
        source: BrokerError,
    },
}

/// `produce` 的同步拒绝
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProduceError {
    /// 生产者已销毁
    #[error("生产者已销毁")]
    Destroyed,

    /// 发送队列已满，需要先 poll 释放投递回执
    #[error("发送队列已满")]
    QueueFull,

    /// 消息超过允许的最大大小
    #[error("消息过大: {size} 字节 (最大 {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// 客户端同步拒绝了该消息
    #[error("消息被拒绝 [{code}] {reason}")]
    Rejected { code: ErrorCode, reason: String },
}

impl ProduceError {
    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            ProduceError::Destroyed => ErrorCode::Destroyed,
            ProduceError::QueueFull => ErrorCode::QueueFull,
            ProduceError::MessageTooLarge { .. } => ErrorCode::MessageSizeTooLarge,
            ProduceError::Rejected { code, .. } => *code,
        }
    }
}

impl From<BrokerError> for ProduceError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::QueueFull => ProduceError::QueueFull,
            BrokerError::MessageTooLarge { size, max } => ProduceError::MessageTooLarge { size, max },
            other => ProduceError::Rejected {
                code: other.code(),
                reason: other.to_string(),
            },
        }
    }
}

/// `poll` 失败：客户端资源已不存在
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollError {
    #[error("生产者已销毁")]
    Destroyed,
}

/// `flush` 失败
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushError {
    /// 生产者已销毁
    #[error("生产者已销毁")]
    Destroyed,

    /// 在限定时间内未能清空待投递消息
    #[error("flush 超时，仍有 {pending} 条消息待投递")]
    TimedOut { pending: usize },

    /// 执行 flush 的后台任务异常终止
    #[error("flush 任务异常终止")]
    Interrupted,
}

/// 配置加载失败
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("读取配置文件失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("解析配置失败: {0}")]
    Parse(#[from] toml::de::Error),
}
