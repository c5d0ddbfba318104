//! 生产者统计

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// 统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerStats {
    /// `produce` 接受的消息数
    pub accepted: u64,
    /// `produce` 同步拒绝的消息数
    pub rejected: u64,
    /// 投递成功的回执数
    pub delivered: u64,
    /// 投递失败的回执数
    pub failed: u64,
    /// 派发时没有注册回调的回执数
    pub unhandled: u64,
}

impl ProducerStats {
    /// 已派发的回执总数
    pub fn reported(&self) -> u64 {
        self.delivered + self.failed
    }
}

/// 统计计数器
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    unhandled: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unhandled(&self) {
        self.unhandled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ProducerStats {
        ProducerStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
        }
    }
}
