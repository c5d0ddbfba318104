//! 投递回执关联桥
//!
//! broker 客户端在内部 I/O 完成一次发送后会产生一个携带关联令牌的完成事件。
//! 令牌只是注册表中的整数句柄，注册表持有生产者投递目标的弱引用：
//! 生产者销毁后迟到的完成事件会被安全丢弃，而不会访问已释放的对象。

mod registry;

pub use registry::{DeliveryRegistry, DispatchOutcome, Registration};
pub(crate) use registry::DeliveryTarget;

use std::fmt;
use std::sync::Arc;

use crate::message::DeliveryReport;

/// 投递回调，单槽位，后注册者覆盖先注册者
pub type DeliveryCallback = Box<dyn FnMut(DeliveryReport) + Send>;

/// 附加在在途消息上的不透明关联令牌
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken(usize);

impl CorrelationToken {
    /// 转为原始整数，用于穿过原生库的 opaque 指针
    pub fn into_raw(self) -> usize {
        self.0
    }

    pub fn from_raw(raw: usize) -> Self {
        CorrelationToken(raw)
    }
}

/// 生产者身份：topic 名称 + 注册表句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProducerId {
    handle: usize,
    topic: Arc<str>,
}

impl ProducerId {
    pub(crate) fn new(handle: usize, topic: &str) -> Self {
        Self {
            handle,
            topic: Arc::from(topic),
        }
    }

    pub fn handle(&self) -> usize {
        self.handle
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 该生产者发出的所有消息共用的关联令牌
    pub fn token(&self) -> CorrelationToken {
        CorrelationToken(self.handle)
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.topic, self.handle)
    }
}
