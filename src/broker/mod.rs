//! broker 客户端协作方契约
//!
//! 生产者只通过这里的 trait 访问底层消息客户端库：
//! - `memory`: 进程内实现，供测试和本地回环使用
//! - `kafka`: 基于 librdkafka 的实现，需要启用 `kafka` feature

pub mod memory;
#[cfg(feature = "kafka")]
pub mod kafka;

use std::sync::Arc;
use std::time::Duration;

use crate::bridge::CorrelationToken;
use crate::config::{ClientConfig, TopicConfig};
use crate::error::{BrokerError, DeliveryError};
use crate::message::{DeliveredMessage, OutboundMessage};

pub use memory::{MemoryBroker, MemoryConfig, MemoryConnector, MemoryTopic};
#[cfg(feature = "kafka")]
pub use kafka::{RdKafkaBroker, RdKafkaConnector, RdKafkaTopic};

/// 客户端内部 I/O 完成一次发送后产生的原始完成事件
#[derive(Debug, Clone)]
pub struct Completion {
    /// `enqueue` 时附加的关联令牌
    pub token: CorrelationToken,
    /// 消息内容（尽力而为）
    pub message: Option<DeliveredMessage>,
    /// 失败时的错误
    pub error: Option<DeliveryError>,
}

/// 完成事件回调，在客户端创建时注册，由 `poll_once` 同步调用
pub type CompletionSink = Arc<dyn Fn(Completion) + Send + Sync>;

/// 原生客户端句柄
///
/// 客户端句柄可以被多个生产者共享；topic 句柄由单个生产者独占。
pub trait Broker: Send + Sync + 'static {
    /// topic 句柄
    type Topic: Send + Sync + 'static;

    /// 创建 topic 句柄
    fn create_topic(&self, name: &str, config: &TopicConfig) -> Result<Self::Topic, BrokerError>;

    /// 释放 topic 句柄
    fn destroy_topic(&self, topic: Self::Topic);

    /// 将消息放入内部发送队列，不等待网络 I/O
    ///
    /// 成功后消息缓冲区归客户端所有，发送完成后由客户端释放
    fn enqueue(
        &self,
        topic: &Self::Topic,
        message: OutboundMessage,
        token: CorrelationToken,
    ) -> Result<(), BrokerError>;

    /// 处理一次事件，没有就绪事件时最多阻塞 `timeout`
    ///
    /// 返回处理的事件数，每个投递事件都会同步调用注册的 `CompletionSink`
    fn poll_once(&self, timeout: Duration) -> usize;

    /// 尚未完成的发送数
    fn pending_count(&self) -> usize;
}

/// 原生客户端工厂
pub trait Connector {
    type Client: Broker;

    /// 创建客户端并注册完成事件回调
    fn create_client(
        &self,
        config: &ClientConfig,
        sink: CompletionSink,
    ) -> Result<Self::Client, BrokerError>;
}
