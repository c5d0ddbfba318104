//! 基于 librdkafka 的 broker 客户端
//!
//! 使用 `BaseProducer`：投递回调只会在调用 `poll` 的线程上执行，
//! 与本 crate 的协作式 poll/flush 模型一致。关联令牌作为
//! `DeliveryOpaque` 随消息进入 librdkafka，在投递回调中原样取回。

use bytes::Bytes;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig as RdClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, DeliveryResult, Message};
use rdkafka::producer::{BaseProducer, BaseRecord, Producer, ProducerContext};
use rdkafka::util::Timeout;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::{Broker, Completion, CompletionSink, Connector};
use crate::bridge::CorrelationToken;
use crate::config::{ClientConfig, TopicConfig};
use crate::error::{BrokerError, DeliveryError};
use crate::message::{DeliveredMessage, OutboundMessage, Partition};

/// 把 librdkafka 投递回调转发给 `CompletionSink` 的上下文
pub struct SinkContext {
    sink: CompletionSink,
    dispatched: AtomicUsize,
}

impl ClientContext for SinkContext {}

impl ProducerContext for SinkContext {
    type DeliveryOpaque = usize;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, delivery_opaque: Self::DeliveryOpaque) {
        let token = CorrelationToken::from_raw(delivery_opaque);
        let completion = match delivery_result {
            Ok(msg) => Completion {
                token,
                message: Some(delivered_message(msg)),
                error: None,
            },
            Err((err, msg)) => Completion {
                token,
                message: Some(delivered_message(msg)),
                error: Some(DeliveryError::from(err)),
            },
        };
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        (self.sink)(completion);
    }
}

fn delivered_message(msg: &BorrowedMessage<'_>) -> DeliveredMessage {
    DeliveredMessage {
        key: msg.key().map(Bytes::copy_from_slice),
        value: msg.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
        partition: Partition::from_raw(msg.partition()),
        offset: (msg.offset() >= 0).then(|| msg.offset()),
    }
}

/// librdkafka 原生 topic 句柄由库内部按名称管理，这里只记录名称
#[derive(Debug, Clone)]
pub struct RdKafkaTopic {
    name: String,
}

impl RdKafkaTopic {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// librdkafka `message.max.bytes` 的默认值
const DEFAULT_MESSAGE_MAX_BYTES: usize = 1_000_000;

/// librdkafka 生产者客户端
pub struct RdKafkaBroker {
    producer: BaseProducer<SinkContext>,
    max_message_bytes: usize,
}

impl RdKafkaBroker {
    /// 底层 `BaseProducer`
    pub fn inner(&self) -> &BaseProducer<SinkContext> {
        &self.producer
    }
}

impl Broker for RdKafkaBroker {
    type Topic = RdKafkaTopic;

    fn create_topic(&self, name: &str, config: &TopicConfig) -> Result<RdKafkaTopic, BrokerError> {
        if name.is_empty() {
            return Err(BrokerError::UnknownTopic(name.to_string()));
        }
        // librdkafka 将 topic 级属性作为默认 topic 配置，只能在创建客户端时设置
        if !config.is_empty() {
            return Err(BrokerError::Config(format!(
                "topic properties for {} must be set on the client configuration",
                name
            )));
        }
        Ok(RdKafkaTopic {
            name: name.to_string(),
        })
    }

    fn destroy_topic(&self, topic: RdKafkaTopic) {
        debug!(topic = %topic.name, "Topic handle released");
    }

    fn enqueue(
        &self,
        topic: &RdKafkaTopic,
        message: OutboundMessage,
        token: CorrelationToken,
    ) -> Result<(), BrokerError> {
        let size = message.size();
        let (key, value, partition) = message.into_parts();

        let mut record = BaseRecord::<[u8], [u8], usize>::with_opaque_to(&topic.name, token.into_raw())
            .payload(&value[..]);
        if let Some(key) = key.as_deref() {
            record = record.key(key);
        }
        if let Partition::Id(p) = partition {
            record = record.partition(p);
        }

        // librdkafka 以 RD_KAFKA_MSG_F_COPY 复制载荷，发送完成后自行释放
        self.producer
            .send(record)
            .map_err(|(err, _record)| enqueue_error(err, size, self.max_message_bytes))
    }

    fn poll_once(&self, timeout: Duration) -> usize {
        let context = self.producer.context();
        let before = context.dispatched.load(Ordering::Relaxed);
        // librdkafka 以 i32 毫秒表示超时，超出范围时一直等待
        let timeout = if timeout.as_millis() > i32::MAX as u128 {
            Timeout::Never
        } else {
            Timeout::After(timeout)
        };
        self.producer.poll(timeout);
        context.dispatched.load(Ordering::Relaxed).wrapping_sub(before)
    }

    fn pending_count(&self) -> usize {
        usize::try_from(self.producer.in_flight_count()).unwrap_or(0)
    }
}

/// librdkafka 客户端工厂
#[derive(Debug, Clone, Default)]
pub struct RdKafkaConnector;

impl Connector for RdKafkaConnector {
    type Client = RdKafkaBroker;

    fn create_client(
        &self,
        config: &ClientConfig,
        sink: CompletionSink,
    ) -> Result<RdKafkaBroker, BrokerError> {
        let mut rd_config = RdClientConfig::new();
        for (key, value) in config.iter() {
            rd_config.set(key, value);
        }

        let producer: BaseProducer<SinkContext> = rd_config.create_with_context(SinkContext {
            sink,
            dispatched: AtomicUsize::new(0),
        })?;

        info!(
            bootstrap = %config.get("bootstrap.servers").unwrap_or("<unset>"),
            properties = config.len(),
            "Kafka producer client created successfully"
        );

        let max_message_bytes = config
            .get("message.max.bytes")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_MESSAGE_MAX_BYTES);

        Ok(RdKafkaBroker {
            producer,
            max_message_bytes,
        })
    }
}

/// 同步入队失败的映射，消息过大时与内存客户端返回同一变体
fn enqueue_error(err: KafkaError, size: usize, max: usize) -> BrokerError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageSizeTooLarge) => BrokerError::MessageTooLarge { size, max },
        _ => BrokerError::from(err),
    }
}
