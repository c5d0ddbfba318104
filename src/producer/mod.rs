//! 消息生产者
//!
//! `produce` 只负责复制缓冲区并放入客户端发送队列，从不阻塞网络 I/O，也从不
//! 调用投递回调。投递回执只在调用方驱动 `poll`/`flush` 时同步派发；如果调用方
//! 从不 poll，回调永远不会触发，待投递数只增不减，直到发送队列满后 `produce`
//! 开始失败。
//!
//! # Example
//! ```no_run
//! use flare_producer::broker::{MemoryBroker, MemoryConnector};
//! use flare_producer::{Partition, Producer};
//! use std::time::Duration;
//!
//! let producer: Producer<MemoryBroker> =
//!     Producer::new(&MemoryConnector, "events", None, None).unwrap();
//! producer.set_delivery_callback(|report| {
//!     if let Some(err) = report.error() {
//!         eprintln!("delivery failed: {}", err);
//!     }
//! });
//!
//! producer.produce(Some(b"user-1".as_slice()), b"signed-in", Partition::Unassigned).unwrap();
//! producer.flush(Duration::from_millis(100)).unwrap();
//! ```

pub mod stats;

pub use stats::ProducerStats;

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::bridge::{DeliveryRegistry, DeliveryTarget, ProducerId, Registration};
use crate::broker::{Broker, Connector};
use crate::config::{ClientConfig, ProducerConfig, TopicConfig};
use crate::error::{ConstructionError, ErrorCode, FlushError, PollError, ProduceError};
use crate::message::{DeliveryReport, OutboundMessage, Partition};

/// `flush` 每轮 poll 的默认超时
pub const DEFAULT_FLUSH_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// 关闭时 flush 的默认最长等待
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// 生产者资源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// 客户端与 topic 句柄均有效
    Ready,
    /// 已关闭，资源已释放
    Destroyed,
}

struct Resources<B: Broker> {
    client: Arc<B>,
    topic: B::Topic,
    registration: Registration,
}

/// 消息生产者
///
/// 持有一个（可共享的）客户端句柄和一个独占的 topic 句柄。
pub struct Producer<B: Broker> {
    target: Arc<DeliveryTarget>,
    resources: RwLock<Option<Resources<B>>>,
    flush_poll_timeout: Duration,
    close_timeout: Option<Duration>,
}

impl<B: Broker> Producer<B> {
    /// 创建独占客户端的生产者
    pub fn new<C>(
        connector: &C,
        topic: &str,
        topic_config: Option<&TopicConfig>,
        client_config: Option<&ClientConfig>,
    ) -> Result<Self, ConstructionError>
    where
        C: Connector<Client = B>,
    {
        let default_config = ClientConfig::default();
        let registry = DeliveryRegistry::global();
        let client = connector
            .create_client(client_config.unwrap_or(&default_config), registry.sink())
            .map_err(ConstructionError::Client)?;
        Self::with_client_in(registry, Arc::new(client), topic, topic_config)
    }

    /// 按 `ProducerConfig` 创建生产者
    pub fn from_config<C>(connector: &C, config: &ProducerConfig) -> Result<Self, ConstructionError>
    where
        C: Connector<Client = B>,
    {
        let client_config = config.effective_client_config();
        let producer = Self::new(connector, &config.topic, Some(&config.topic_config), Some(&client_config))?;
        Ok(producer
            .with_flush_poll_timeout(config.flush_poll_timeout())
            .with_close_timeout(config.close_timeout()))
    }

    /// 在已有客户端上创建生产者，客户端可以与其他生产者共享
    ///
    /// 客户端必须以 `DeliveryRegistry::global().sink()` 创建，否则回执无法路由回来
    pub fn with_client(
        client: Arc<B>,
        topic: &str,
        topic_config: Option<&TopicConfig>,
    ) -> Result<Self, ConstructionError> {
        Self::with_client_in(DeliveryRegistry::global(), client, topic, topic_config)
    }

    /// 在指定注册表中登记的生产者，客户端的 sink 须来自同一注册表
    pub fn with_client_in(
        registry: Arc<DeliveryRegistry>,
        client: Arc<B>,
        topic: &str,
        topic_config: Option<&TopicConfig>,
    ) -> Result<Self, ConstructionError> {
        let default_config = TopicConfig::default();
        let topic_handle = client
            .create_topic(topic, topic_config.unwrap_or(&default_config))
            .map_err(|source| ConstructionError::Topic {
                topic: topic.to_string(),
                source,
            })?;

        let (target, registration) = registry.register(topic);
        info!(
            producer = %target.id(),
            topic = %topic,
            "Producer created successfully"
        );

        Ok(Self {
            target,
            resources: RwLock::new(Some(Resources {
                client,
                topic: topic_handle,
                registration,
            })),
            flush_poll_timeout: DEFAULT_FLUSH_POLL_TIMEOUT,
            close_timeout: Some(DEFAULT_CLOSE_TIMEOUT),
        })
    }

    /// 设置 `close` 时每轮 poll 的超时
    pub fn with_flush_poll_timeout(mut self, timeout: Duration) -> Self {
        self.flush_poll_timeout = timeout;
        self
    }

    /// 设置 `close` 时 flush 的最长等待，`None` 表示一直等到队列清空
    pub fn with_close_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn id(&self) -> &ProducerId {
        self.target.id()
    }

    pub fn topic(&self) -> &str {
        self.target.id().topic()
    }

    pub fn state(&self) -> ProducerState {
        if self.resources.read().is_some() {
            ProducerState::Ready
        } else {
            ProducerState::Destroyed
        }
    }

    /// 底层客户端句柄，关闭后为 `None`
    pub fn client(&self) -> Option<Arc<B>> {
        self.resources.read().as_ref().map(|r| Arc::clone(&r.client))
    }

    pub fn stats(&self) -> ProducerStats {
        self.target.stats().snapshot()
    }

    /// 注册投递回调，覆盖之前注册的回调
    ///
    /// 回调在调用 `poll`/`flush` 的线程上同步执行。回调执行期间到达的本生产者回执
    /// （回调内再次 poll，或其他线程并发 poll）不会等待，而是排队，由正在执行回调的
    /// 线程在回调返回后按到达顺序继续派发。
    pub fn set_delivery_callback<F>(&self, callback: F)
    where
        F: FnMut(DeliveryReport) + Send + 'static,
    {
        self.target.set_callback(Some(Box::new(callback)));
    }

    /// 移除投递回调，之后的回执交还给客户端事件循环
    pub fn clear_delivery_callback(&self) {
        self.target.set_callback(None);
    }

    pub fn has_delivery_callback(&self) -> bool {
        self.target.has_callback()
    }

    /// 异步发送一条消息
    ///
    /// key/value 在返回前已被复制，调用方可立即释放或修改原缓冲区。
    /// 成功仅表示消息已进入发送队列，投递结果通过投递回调获得。
    pub fn produce(
        &self,
        key: Option<&[u8]>,
        value: &[u8],
        partition: Partition,
    ) -> Result<(), ProduceError> {
        let resources = self.resources.read();
        let Some(resources) = resources.as_ref() else {
            self.target.stats().record_rejected();
            return Err(ProduceError::Destroyed);
        };

        if !partition.is_valid() {
            self.target.stats().record_rejected();
            warn!(producer = %self.target.id(), partition = %partition, "Message rejected: negative partition");
            return Err(ProduceError::Rejected {
                code: ErrorCode::UnknownPartition,
                reason: format!("非法分区: {}", partition),
            });
        }

        let message = OutboundMessage::copy_from(key, value, partition);
        let size = message.size();
        match resources
            .client
            .enqueue(&resources.topic, message, resources.registration.token())
        {
            Ok(()) => {
                self.target.stats().record_accepted();
                trace!(producer = %self.target.id(), partition = %partition, size, "Message accepted");
                Ok(())
            }
            Err(err) => {
                self.target.stats().record_rejected();
                warn!(
                    producer = %self.target.id(),
                    partition = %partition,
                    size,
                    error = %err,
                    "Message rejected"
                );
                Err(err.into())
            }
        }
    }

    /// 文本载荷的便捷入口，与 `produce` 走同一条字节缓冲区路径
    pub fn produce_text(
        &self,
        key: Option<&str>,
        value: &str,
        partition: Partition,
    ) -> Result<(), ProduceError> {
        self.produce(key.map(str::as_bytes), value.as_bytes(), partition)
    }

    /// 无 key、由客户端选择分区地发送
    pub fn send(&self, value: impl AsRef<[u8]>) -> Result<(), ProduceError> {
        self.produce(None, value.as_ref(), Partition::Unassigned)
    }

    /// 驱动一次事件处理，这是投递回调唯一的触发点
    ///
    /// 没有就绪事件时最多阻塞 `timeout`，返回处理的事件数
    pub fn poll(&self, timeout: Duration) -> Result<usize, PollError> {
        // 不持有资源锁进入 poll，回调中可以继续 produce
        let client = self.client().ok_or(PollError::Destroyed)?;
        let processed = client.poll_once(timeout);
        if processed > 0 {
            debug!(producer = %self.target.id(), processed, "Poll processed delivery events");
        }
        Ok(processed)
    }

    /// 反复 poll 直到待投递数为 0，没有总体时限
    pub fn flush(&self, poll_timeout: Duration) -> Result<(), FlushError> {
        let client = self.client().ok_or(FlushError::Destroyed)?;
        drain(client.as_ref(), poll_timeout, None)
    }

    /// 带总体时限的 `flush`
    ///
    /// `total` 过大无法表示为截止时刻时等同于 `flush`
    pub fn flush_within(&self, poll_timeout: Duration, total: Duration) -> Result<(), FlushError> {
        let client = self.client().ok_or(FlushError::Destroyed)?;
        drain(client.as_ref(), poll_timeout, Instant::now().checked_add(total))
    }

    /// 在 tokio 阻塞线程池上执行 `flush`，供异步调用方使用
    pub async fn flush_async(self: Arc<Self>, poll_timeout: Duration) -> Result<(), FlushError> {
        tokio::task::spawn_blocking(move || self.flush(poll_timeout))
            .await
            .map_err(|_| FlushError::Interrupted)?
    }

    /// 已被接受但回执尚未派发的消息数，关闭后为 0
    pub fn pending_count(&self) -> usize {
        self.client().map_or(0, |client| client.pending_count())
    }

    /// 关闭生产者：有界 flush 后释放 topic 句柄并从注册表注销
    ///
    /// flush 失败（例如 broker 不可达）只记录日志。可重复调用。
    pub fn close(&self) {
        let Some(resources) = self.resources.write().take() else {
            return;
        };

        let deadline = self
            .close_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        match drain(resources.client.as_ref(), self.flush_poll_timeout, deadline) {
            Ok(()) => debug!(producer = %self.target.id(), "Pending messages flushed before close"),
            Err(err) => warn!(
                producer = %self.target.id(),
                error = %err,
                "Giving up on pending messages during close"
            ),
        }

        let Resources {
            client,
            topic,
            registration,
        } = resources;
        client.destroy_topic(topic);
        drop(registration);

        let stats = self.stats();
        info!(
            producer = %self.target.id(),
            accepted = stats.accepted,
            delivered = stats.delivered,
            failed = stats.failed,
            "Producer closed"
        );
    }
}

impl<B: Broker> Drop for Producer<B> {
    fn drop(&mut self) {
        self.close();
    }
}

fn drain<B: Broker>(
    client: &B,
    poll_timeout: Duration,
    deadline: Option<Instant>,
) -> Result<(), FlushError> {
    loop {
        let pending = client.pending_count();
        if pending == 0 {
            return Ok(());
        }

        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(FlushError::TimedOut { pending });
                }
                poll_timeout.min(deadline - now)
            }
            None => poll_timeout,
        };
        client.poll_once(wait);
    }
}
