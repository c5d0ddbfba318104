//! Flare Producer
//!
//! 面向分区日志型消息系统（Kafka 风格）的异步消息生产者：
//! 非阻塞入队、缓冲区所有权移交、协作式 poll/flush 以及投递回执到生产者实例的关联。
//!
//! - [`Producer`]: `produce` / `poll` / `flush` / `pending_count`
//! - [`bridge`]: 完成事件 -> 生产者的关联注册表
//! - [`broker`]: 底层 broker 客户端契约及其实现（内存、librdkafka）

pub mod bridge;
pub mod broker;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod producer;

// Re-exports
pub use bridge::{CorrelationToken, DeliveryCallback, DeliveryRegistry, DispatchOutcome, ProducerId};
pub use broker::{Broker, Completion, CompletionSink, Connector};
pub use config::{ClientConfig, KafkaProducerConfig, ProducerConfig, TopicConfig};
pub use error::{
    BrokerError, ConfigError, ConstructionError, DeliveryError, ErrorCategory, ErrorCode,
    FlushError, PollError, ProduceError,
};
pub use message::{DeliveredMessage, DeliveryReport, OutboundMessage, Partition};
pub use producer::{Producer, ProducerState, ProducerStats};
