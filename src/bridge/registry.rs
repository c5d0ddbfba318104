//! 关联注册表：句柄 -> 投递目标弱引用

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, trace, warn};

use super::{CorrelationToken, DeliveryCallback, ProducerId};
use crate::broker::{Completion, CompletionSink};
use crate::message::DeliveryReport;
use crate::producer::stats::StatsCounters;

static GLOBAL_REGISTRY: OnceLock<Arc<DeliveryRegistry>> = OnceLock::new();

/// 一次完成事件派发的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 已交给投递回调；回调正在执行时进入队列，随后由执行中的线程派发
    Delivered,
    /// 生产者存在但未注册回调，事件交还给客户端事件循环
    Unhandled,
    /// 生产者已销毁或令牌未知，事件被丢弃
    Orphaned,
}

struct CallbackSlot {
    callback: Option<DeliveryCallback>,
    /// 每次注册回调递增，用于判断回调执行期间是否被替换
    generation: u64,
    /// 回调是否正在某个线程上执行
    running: bool,
    /// 执行中被取出的回调所属的注册代次
    lent: Option<u64>,
    /// 回调执行期间到达的回执，由正在执行回调的线程按到达顺序派发
    backlog: VecDeque<DeliveryReport>,
}

/// 生产者侧的投递目标，由生产者持有强引用
pub(crate) struct DeliveryTarget {
    id: ProducerId,
    slot: Mutex<CallbackSlot>,
    stats: Arc<StatsCounters>,
}

impl DeliveryTarget {
    pub(crate) fn id(&self) -> &ProducerId {
        &self.id
    }

    pub(crate) fn stats(&self) -> &Arc<StatsCounters> {
        &self.stats
    }

    pub(crate) fn set_callback(&self, callback: Option<DeliveryCallback>) {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);
        slot.callback = callback;
    }

    pub(crate) fn has_callback(&self) -> bool {
        let slot = self.slot.lock();
        slot.callback.is_some() || slot.lent == Some(slot.generation)
    }

    fn deliver(&self, report: DeliveryReport) -> DispatchOutcome {
        if report.is_success() {
            self.stats.record_delivered();
        } else {
            self.stats.record_failed();
        }

        let mut slot = self.slot.lock();
        if slot.running {
            // 同线程重入或其他线程并发派发：排队，不等待回调返回
            slot.backlog.push_back(report);
            return DispatchOutcome::Delivered;
        }

        let Some(callback) = slot.callback.take() else {
            drop(slot);
            self.stats.record_unhandled();
            debug!(producer = %self.id, "No delivery callback registered, report left to the client");
            return DispatchOutcome::Unhandled;
        };
        let mut generation = slot.generation;
        slot.running = true;
        slot.lent = Some(generation);

        let mut current = Some(callback);
        let mut pending = Some(report);
        while let Some(report) = pending.take() {
            if slot.generation != generation {
                // 回调执行期间被替换或清除，后续回执交给当前槽位中的回调
                let replaced = std::mem::replace(&mut current, slot.callback.take());
                generation = slot.generation;
                slot.lent = current.is_some().then_some(generation);
                // 回调的析构可能重新进入本槽位
                MutexGuard::unlocked(&mut slot, || drop(replaced));
            }
            match current.as_mut() {
                // 调用回调期间不持有槽位锁，回调内可以重新注册回调或再次 poll
                Some(callback) => MutexGuard::unlocked(&mut slot, || callback(report)),
                None => self.stats.record_unhandled(),
            }
            pending = slot.backlog.pop_front();
        }

        let stale = if slot.generation == generation {
            slot.callback = current;
            None
        } else {
            current
        };
        slot.running = false;
        slot.lent = None;
        drop(slot);
        drop(stale);
        DispatchOutcome::Delivered
    }
}

/// 进程级关联注册表
///
/// 注册发生在生产者构造时，查找发生在完成事件派发时，注销发生在生产者销毁时，
/// 三者可能位于不同线程，因此使用并发映射。
pub struct DeliveryRegistry {
    next_handle: AtomicUsize,
    targets: DashMap<usize, Weak<DeliveryTarget>>,
}

impl DeliveryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            // 0 保留，避免与空指针形式的 opaque 混淆
            next_handle: AtomicUsize::new(1),
            targets: DashMap::new(),
        })
    }

    /// 进程级默认注册表
    pub fn global() -> Arc<Self> {
        GLOBAL_REGISTRY.get_or_init(DeliveryRegistry::new).clone()
    }

    /// 生成交给 broker 客户端的完成事件回调
    pub fn sink(self: &Arc<Self>) -> CompletionSink {
        let registry = Arc::clone(self);
        Arc::new(move |completion: Completion| {
            registry.dispatch(completion);
        })
    }

    pub(crate) fn register(self: &Arc<Self>, topic: &str) -> (Arc<DeliveryTarget>, Registration) {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let target = Arc::new(DeliveryTarget {
            id: ProducerId::new(handle, topic),
            slot: Mutex::new(CallbackSlot {
                callback: None,
                generation: 0,
                running: false,
                lent: None,
                backlog: VecDeque::new(),
            }),
            stats: Arc::new(StatsCounters::default()),
        });
        self.targets.insert(handle, Arc::downgrade(&target));
        trace!(handle, topic = %topic, "Producer registered for delivery reports");

        let registration = Registration {
            registry: Arc::clone(self),
            handle,
        };
        (target, registration)
    }

    fn deregister(&self, handle: usize) {
        if self.targets.remove(&handle).is_some() {
            trace!(handle, "Producer deregistered from delivery reports");
        }
    }

    /// 将完成事件路由回发起的生产者并同步调用其投递回调
    pub fn dispatch(&self, completion: Completion) -> DispatchOutcome {
        let handle = completion.token.into_raw();
        // 先释放映射分片上的引用再调用回调，回调中可能构造或销毁其他生产者
        let target = self.targets.get(&handle).and_then(|entry| entry.upgrade());

        let Some(target) = target else {
            warn!(
                handle,
                success = completion.error.is_none(),
                "Dropping delivery report for a producer that no longer exists"
            );
            return DispatchOutcome::Orphaned;
        };

        let report = DeliveryReport {
            producer: target.id().clone(),
            message: completion.message,
            result: match completion.error {
                Some(err) => Err(err),
                None => Ok(()),
            },
        };
        target.deliver(report)
    }

    /// 当前注册的生产者数量
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn contains(&self, token: CorrelationToken) -> bool {
        self.targets.contains_key(&token.into_raw())
    }
}

/// 注册凭证，drop 时从注册表注销
pub struct Registration {
    registry: Arc<DeliveryRegistry>,
    handle: usize,
}

impl Registration {
    pub fn token(&self) -> CorrelationToken {
        CorrelationToken::from_raw(self.handle)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.handle);
    }
}
