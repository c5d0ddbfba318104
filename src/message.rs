//! 消息模型
//!
//! `OutboundMessage` 负责缓冲区移交：`produce` 时把调用方的 key/value 复制进
//! 自有缓冲区，之后由异步发送路径独立持有，调用方的原始内存可立即释放或修改。

use bytes::Bytes;
use std::fmt;

use crate::bridge::ProducerId;
use crate::error::DeliveryError;

/// 目标分区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Partition {
    /// 由客户端/broker 选择分区（例如按 key 哈希）
    #[default]
    Unassigned,
    /// 指定分区
    Id(i32),
}

impl Partition {
    /// librdkafka 中 `RD_KAFKA_PARTITION_UA` 的取值
    pub const UNASSIGNED_RAW: i32 = -1;

    pub fn as_raw(&self) -> i32 {
        match self {
            Partition::Unassigned => Self::UNASSIGNED_RAW,
            Partition::Id(id) => *id,
        }
    }

    /// 指定分区时分区号必须非负，负数只用于表示未指定
    pub fn is_valid(&self) -> bool {
        match self {
            Partition::Unassigned => true,
            Partition::Id(id) => *id >= 0,
        }
    }

    pub fn from_raw(raw: i32) -> Self {
        if raw < 0 {
            Partition::Unassigned
        } else {
            Partition::Id(raw)
        }
    }
}

impl From<i32> for Partition {
    fn from(raw: i32) -> Self {
        Partition::from_raw(raw)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Unassigned => write!(f, "unassigned"),
            Partition::Id(id) => write!(f, "{}", id),
        }
    }
}

/// 待发送消息，从 `produce` 调用开始存在，直到对应的投递回执被处理
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    key: Option<Bytes>,
    value: Bytes,
    partition: Partition,
}

impl OutboundMessage {
    /// 复制调用方的字节到新分配的缓冲区
    ///
    /// 文本与二进制载荷都经过这里，发送路径只认识字节缓冲区
    pub fn copy_from(key: Option<&[u8]>, value: &[u8], partition: Partition) -> Self {
        Self {
            key: key.map(Bytes::copy_from_slice),
            value: Bytes::copy_from_slice(value),
            partition,
        }
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// key 与 value 的总字节数
    pub fn size(&self) -> usize {
        self.value.len() + self.key.as_ref().map_or(0, Bytes::len)
    }

    /// 拆分为所有权部件，交给发送路径
    pub fn into_parts(self) -> (Option<Bytes>, Bytes, Partition) {
        (self.key, self.value, self.partition)
    }
}

/// 投递结果中携带的消息内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub key: Option<Bytes>,
    pub value: Bytes,
    /// 实际写入的分区；失败且未分配分区时为 `Unassigned`
    pub partition: Partition,
    /// broker 分配的 offset，失败时为 `None`
    pub offset: Option<i64>,
}

impl DeliveredMessage {
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

/// 单条消息的最终投递回执
///
/// 每条被 `produce` 接受的消息恰好产生一个回执，只在 `poll`/`flush` 中派发
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// 发起该消息的生产者
    pub producer: ProducerId,
    /// 消息内容；若错误发生在消息构造之前则为 `None`
    pub message: Option<DeliveredMessage>,
    /// 投递结果
    pub result: Result<(), DeliveryError>,
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&DeliveryError> {
        self.result.as_ref().err()
    }
}
