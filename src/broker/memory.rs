//! 进程内 broker 客户端
//!
//! 行为与 librdkafka 生产者一致的最小实现：有界发送队列、最大消息大小校验、
//! 按 FIFO 顺序在 `poll_once` 中产生投递事件。可以脚本化注入投递失败和队列满，
//! 用于在没有 Kafka 集群的情况下驱动生产者。

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::{Broker, Completion, CompletionSink, Connector};
use crate::bridge::CorrelationToken;
use crate::config::{ClientConfig, TopicConfig};
use crate::error::{BrokerError, DeliveryError, ErrorCode};
use crate::message::{DeliveredMessage, OutboundMessage, Partition};

/// 内存客户端配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// 发送队列容量（`queue.buffering.max.messages`），默认 100000
    pub queue_capacity: usize,
    /// 单条消息最大字节数（`message.max.bytes`），默认 1000000
    pub max_message_bytes: usize,
    /// 每个 topic 的分区数（`memory.partitions`），默认 1
    pub partitions: i32,
    /// 每次 poll 最多完成的消息数（`memory.completions.per.poll`），默认不限
    pub completions_per_poll: Option<usize>,
    /// 已存在的 topic（`memory.topics`，逗号分隔）；为空表示接受任意 topic
    pub known_topics: HashSet<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100_000,
            max_message_bytes: 1_000_000,
            partitions: 1,
            completions_per_poll: None,
            known_topics: HashSet::new(),
        }
    }
}

impl MemoryConfig {
    /// 从客户端属性读取，未识别或无法解析的属性使用默认值
    pub fn from_client_config(config: &ClientConfig) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| config.get(key).and_then(|v| v.trim().parse::<usize>().ok());

        Self {
            queue_capacity: parse("queue.buffering.max.messages").unwrap_or(defaults.queue_capacity),
            max_message_bytes: parse("message.max.bytes").unwrap_or(defaults.max_message_bytes),
            partitions: parse("memory.partitions")
                .and_then(|n| i32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.partitions),
            completions_per_poll: parse("memory.completions.per.poll").filter(|n| *n > 0),
            known_topics: config
                .get("memory.topics")
                .map(|topics| {
                    topics
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    pub fn with_partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    pub fn with_completions_per_poll(mut self, n: usize) -> Self {
        self.completions_per_poll = Some(n.max(1));
        self
    }

    pub fn with_known_topic(mut self, topic: impl Into<String>) -> Self {
        self.known_topics.insert(topic.into());
        self
    }
}

/// 内存 topic 句柄
#[derive(Debug)]
pub struct MemoryTopic {
    name: Arc<str>,
}

impl MemoryTopic {
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct InFlight {
    topic: Arc<str>,
    key: Option<Bytes>,
    value: Bytes,
    partition: Partition,
    token: CorrelationToken,
}

#[derive(Default)]
struct State {
    queue: VecDeque<InFlight>,
    scripted_failures: VecDeque<ErrorCode>,
    force_queue_full: bool,
    paused: bool,
    live_topics: HashMap<Arc<str>, usize>,
    next_offsets: HashMap<(Arc<str>, i32), i64>,
    round_robin: u32,
}

struct Inner {
    config: MemoryConfig,
    sink: CompletionSink,
    state: Mutex<State>,
    ready: Condvar,
    polls: AtomicU64,
}

/// 内存 broker 客户端，克隆后共享同一个实例
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new(config: MemoryConfig, sink: CompletionSink) -> Self {
        let config = MemoryConfig {
            partitions: config.partitions.max(1),
            ..config
        };
        Self {
            inner: Arc::new(Inner {
                config,
                sink,
                state: Mutex::new(State::default()),
                ready: Condvar::new(),
                polls: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }

    /// 之后完成的 `n` 条消息以 `code` 失败
    pub fn fail_next(&self, n: usize, code: ErrorCode) {
        let mut state = self.inner.state.lock();
        state.scripted_failures.extend(std::iter::repeat_n(code, n));
    }

    /// 强制发送队列报告已满
    pub fn set_queue_full(&self, full: bool) {
        self.inner.state.lock().force_queue_full = full;
    }

    /// 暂停后 `poll_once` 不再完成任何消息，模拟 broker 不可达
    pub fn set_paused(&self, paused: bool) {
        self.inner.state.lock().paused = paused;
        self.inner.ready.notify_all();
    }

    /// `poll_once` 被调用的次数
    pub fn poll_calls(&self) -> u64 {
        self.inner.polls.load(Ordering::Relaxed)
    }

    /// 当前存活的 topic 句柄数
    pub fn live_topic_handles(&self) -> usize {
        self.inner.state.lock().live_topics.values().sum()
    }

    fn choose_partition(&self, state: &mut State, key: Option<&Bytes>) -> i32 {
        let partitions = self.inner.config.partitions;
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % partitions as u64) as i32
            }
            None => {
                let p = (state.round_robin % partitions as u32) as i32;
                state.round_robin = state.round_robin.wrapping_add(1);
                p
            }
        }
    }

    fn complete(&self, state: &mut State, msg: InFlight) -> Completion {
        let config = &self.inner.config;
        let error = if let Some(code) = state.scripted_failures.pop_front() {
            Some(code)
        } else if !config.known_topics.is_empty() && !config.known_topics.contains(&*msg.topic) {
            Some(ErrorCode::UnknownTopicOrPartition)
        } else if matches!(msg.partition, Partition::Id(p) if p < 0 || p >= config.partitions) {
            Some(ErrorCode::UnknownPartition)
        } else {
            None
        };

        let partition = match (msg.partition, error) {
            (Partition::Id(p), _) => Partition::Id(p),
            (Partition::Unassigned, Some(_)) => Partition::Unassigned,
            (Partition::Unassigned, None) => {
                Partition::Id(self.choose_partition(state, msg.key.as_ref()))
            }
        };

        let offset = match (error, partition) {
            (None, Partition::Id(p)) => {
                let next = state.next_offsets.entry((Arc::clone(&msg.topic), p)).or_insert(0);
                let offset = *next;
                *next += 1;
                Some(offset)
            }
            _ => None,
        };

        Completion {
            token: msg.token,
            message: Some(DeliveredMessage {
                key: msg.key,
                value: msg.value,
                partition,
                offset,
            }),
            error: error.map(|code| DeliveryError::new(code, format!("delivery to {} failed", msg.topic))),
        }
    }
}

impl Broker for MemoryBroker {
    type Topic = MemoryTopic;

    fn create_topic(&self, name: &str, _config: &TopicConfig) -> Result<MemoryTopic, BrokerError> {
        if name.is_empty() || name.len() > 249 {
            return Err(BrokerError::UnknownTopic(name.to_string()));
        }
        let name: Arc<str> = Arc::from(name);
        *self
            .inner
            .state
            .lock()
            .live_topics
            .entry(Arc::clone(&name))
            .or_insert(0) += 1;
        Ok(MemoryTopic { name })
    }

    fn destroy_topic(&self, topic: MemoryTopic) {
        let mut state = self.inner.state.lock();
        if let Some(count) = state.live_topics.get_mut(&topic.name) {
            *count -= 1;
            if *count == 0 {
                state.live_topics.remove(&topic.name);
            }
        }
    }

    fn enqueue(
        &self,
        topic: &MemoryTopic,
        message: OutboundMessage,
        token: CorrelationToken,
    ) -> Result<(), BrokerError> {
        let size = message.size();
        let max = self.inner.config.max_message_bytes;
        if size > max {
            return Err(BrokerError::MessageTooLarge { size, max });
        }

        let mut state = self.inner.state.lock();
        if state.force_queue_full || state.queue.len() >= self.inner.config.queue_capacity {
            return Err(BrokerError::QueueFull);
        }

        let (key, value, partition) = message.into_parts();
        state.queue.push_back(InFlight {
            topic: Arc::clone(&topic.name),
            key,
            value,
            partition,
            token,
        });
        trace!(topic = %topic.name, queued = state.queue.len(), "Message enqueued");
        drop(state);

        self.inner.ready.notify_all();
        Ok(())
    }

    fn poll_once(&self, timeout: Duration) -> usize {
        self.inner.polls.fetch_add(1, Ordering::Relaxed);

        let completions = {
            let mut state = self.inner.state.lock();
            // 超时过大无法表示为时刻时视为无限等待
            let deadline = Instant::now().checked_add(timeout);
            while state.queue.is_empty() || state.paused {
                match deadline {
                    Some(deadline) => {
                        if self.inner.ready.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                    None => self.inner.ready.wait(&mut state),
                }
            }

            let limit = if state.paused {
                0
            } else {
                self.inner.config.completions_per_poll.unwrap_or(usize::MAX)
            };
            let n = state.queue.len().min(limit);
            let mut completions = Vec::with_capacity(n);
            for _ in 0..n {
                if let Some(msg) = state.queue.pop_front() {
                    completions.push(self.complete(&mut state, msg));
                }
            }
            completions
        };

        // 回调在锁外执行，回调中可以重新调用 enqueue
        let processed = completions.len();
        for completion in completions {
            (self.inner.sink)(completion);
        }
        if processed > 0 {
            debug!(processed, "Delivery events processed");
        }
        processed
    }

    fn pending_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }
}

/// 内存客户端工厂，从客户端属性读取 `MemoryConfig`
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector;

impl Connector for MemoryConnector {
    type Client = MemoryBroker;

    fn create_client(
        &self,
        config: &ClientConfig,
        sink: CompletionSink,
    ) -> Result<MemoryBroker, BrokerError> {
        if let Some(raw) = config.get("queue.buffering.max.messages") {
            if raw.trim().parse::<usize>().map_or(true, |n| n == 0) {
                return Err(BrokerError::Config(format!(
                    "invalid queue.buffering.max.messages: {}",
                    raw
                )));
            }
        }
        Ok(MemoryBroker::new(MemoryConfig::from_client_config(config), sink))
    }
}
