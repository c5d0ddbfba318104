//! 生产者配置
//!
//! 客户端与 topic 配置都是透传给 broker 客户端库的字符串属性表，
//! 本 crate 不做解析和校验

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// 客户端配置（如 `bootstrap.servers`）
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ClientConfig {
    properties: BTreeMap<String, String>,
}

/// topic 级配置（如 `request.required.acks`）
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TopicConfig {
    properties: BTreeMap<String, String>,
}

macro_rules! property_map {
    ($ty:ident) => {
        impl $ty {
            pub fn new() -> Self {
                Self::default()
            }

            /// 设置属性，返回自身以便链式调用
            pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
                self.properties.insert(key.into(), value.into());
                self
            }

            pub fn get(&self, key: &str) -> Option<&str> {
                self.properties.get(key).map(String::as_str)
            }

            pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
                self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
            }

            pub fn is_empty(&self) -> bool {
                self.properties.is_empty()
            }

            pub fn len(&self) -> usize {
                self.properties.len()
            }
        }

        impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for $ty {
            fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
                Self {
                    properties: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
                }
            }
        }
    };
}

property_map!(ClientConfig);
property_map!(TopicConfig);

/// 生产者配置（可从 TOML 文件加载）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    /// 目标 topic
    pub topic: String,
    /// 客户端属性
    #[serde(default)]
    pub client: ClientConfig,
    /// topic 属性
    #[serde(default)]
    pub topic_config: TopicConfig,
    /// `flush` 每轮 poll 的超时（毫秒），默认 100
    #[serde(default = "default_flush_poll_timeout_ms")]
    pub flush_poll_timeout_ms: u64,
    /// 关闭时 flush 的最长等待（毫秒），默认 5000；`None` 表示一直等待
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: Option<u64>,
}

fn default_flush_poll_timeout_ms() -> u64 {
    100
}

fn default_close_timeout_ms() -> Option<u64> {
    Some(5000)
}

impl ProducerConfig {
    /// 以默认参数创建指定 topic 的配置
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            client: ClientConfig::default(),
            topic_config: TopicConfig::default(),
            flush_poll_timeout_ms: default_flush_poll_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn flush_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_poll_timeout_ms)
    }

    pub fn close_timeout(&self) -> Option<Duration> {
        self.close_timeout_ms.map(Duration::from_millis)
    }

    /// 生效的客户端配置：调优默认值 + 显式配置（显式配置优先）
    pub fn effective_client_config(&self) -> ClientConfig {
        let mut merged = self.to_client_config();
        for (key, value) in self.client.iter() {
            merged.set(key, value);
        }
        merged
    }
}

/// Kafka 生产者调优配置 Trait
///
/// 任何需要构建 Kafka 生产者的服务配置都可以实现此 trait
pub trait KafkaProducerConfig: Send + Sync {
    /// Kafka Bootstrap Servers 地址
    fn kafka_bootstrap(&self) -> &str;

    /// 消息超时时间（毫秒），默认 5000
    fn message_timeout_ms(&self) -> u64 {
        5000
    }

    /// 是否启用幂等性，默认 true
    fn enable_idempotence(&self) -> bool {
        true
    }

    /// 压缩类型，默认 "snappy"
    /// 可选值: "none", "gzip", "snappy", "lz4", "zstd"
    fn compression_type(&self) -> &str {
        "snappy"
    }

    /// 批量发送大小（字节），默认 64KB
    fn batch_size(&self) -> usize {
        64 * 1024
    }

    /// 批量发送延迟（毫秒），默认 10ms
    fn linger_ms(&self) -> u64 {
        10
    }

    /// 客户端内部重试次数，默认 3
    fn retries(&self) -> u32 {
        3
    }

    /// 重试间隔（毫秒），默认 100ms
    fn retry_backoff_ms(&self) -> u64 {
        100
    }

    /// 元数据最大年龄（毫秒），默认 5 分钟
    fn metadata_max_age_ms(&self) -> u64 {
        300000
    }

    /// 渲染为 librdkafka 属性
    fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.kafka_bootstrap())
            .set("message.timeout.ms", self.message_timeout_ms().to_string())
            .set("enable.idempotence", self.enable_idempotence().to_string())
            .set("compression.type", self.compression_type())
            .set("batch.size", self.batch_size().to_string())
            .set("linger.ms", self.linger_ms().to_string())
            .set("retries", self.retries().to_string())
            .set("retry.backoff.ms", self.retry_backoff_ms().to_string())
            .set("metadata.max.age.ms", self.metadata_max_age_ms().to_string());
        // 启用幂等性时需要 acks=all
        if self.enable_idempotence() {
            config.set("acks", "all");
        }
        config
    }
}

impl KafkaProducerConfig for ProducerConfig {
    fn kafka_bootstrap(&self) -> &str {
        self.client.get("bootstrap.servers").unwrap_or("localhost:9092")
    }
}
