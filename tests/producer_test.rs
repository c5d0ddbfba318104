//! 生产者集成测试
//!
//! 使用内存 broker 客户端驱动完整的 produce -> poll/flush -> 投递回调链路，
//! 不需要运行中的 Kafka 集群。

use flare_producer::broker::{MemoryBroker, MemoryConfig, MemoryConnector};
use flare_producer::{
    Broker, ClientConfig, ConstructionError, DeliveryRegistry, DeliveryReport, ErrorCode,
    FlushError, Partition, PollError, ProduceError, Producer, ProducerConfig, ProducerState,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Reports = Arc<Mutex<Vec<DeliveryReport>>>;

/// 在全局注册表上创建内存客户端
fn shared_broker(config: MemoryConfig) -> Arc<MemoryBroker> {
    Arc::new(MemoryBroker::new(config, DeliveryRegistry::global().sink()))
}

fn producer_on(broker: &Arc<MemoryBroker>, topic: &str) -> Producer<MemoryBroker> {
    Producer::with_client(Arc::clone(broker), topic, None).expect("Failed to create producer")
}

fn collect_reports(producer: &Producer<MemoryBroker>) -> Reports {
    let reports: Reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    producer.set_delivery_callback(move |report| sink.lock().push(report));
    reports
}

fn values(reports: &Reports) -> Vec<Vec<u8>> {
    reports
        .lock()
        .iter()
        .map(|r| r.message.as_ref().map(|m| m.value().to_vec()).unwrap_or_default())
        .collect()
}

/// 测试：每条被接受的消息恰好产生一个回执，被拒绝的消息不产生回执
#[test]
fn test_exactly_one_report_per_accepted_message() {
    let broker = shared_broker(MemoryConfig::default().with_queue_capacity(3));
    let producer = producer_on(&broker, "exactly-once");
    let reports = collect_reports(&producer);

    let mut accepted = 0;
    let mut rejected = 0;
    for i in 0..5 {
        match producer.send(format!("m{}", i)) {
            Ok(()) => accepted += 1,
            Err(ProduceError::QueueFull) => rejected += 1,
            Err(other) => panic!("unexpected produce error: {}", other),
        }
    }
    assert_eq!((accepted, rejected), (3, 2));

    producer.flush(Duration::from_millis(10)).unwrap();
    assert_eq!(reports.lock().len(), 3);
    assert_eq!(values(&reports), vec![b"m0".to_vec(), b"m1".to_vec(), b"m2".to_vec()]);

    // 再次 poll 不会重复派发
    assert_eq!(producer.poll(Duration::ZERO).unwrap(), 0);
    assert_eq!(reports.lock().len(), 3);

    let stats = producer.stats();
    assert_eq!(stats.accepted, 3);
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.reported(), 3);
}

/// 测试：没有新的 produce 时待投递数单调不增，每次 poll 恰好减少处理的事件数
#[test]
fn test_pending_count_decreases_by_processed_events() {
    let broker = shared_broker(MemoryConfig::default().with_completions_per_poll(2));
    let producer = producer_on(&broker, "pending");
    let _reports = collect_reports(&producer);

    for i in 0..5 {
        producer.send(format!("{}", i)).unwrap();
    }
    assert_eq!(producer.pending_count(), 5);

    let mut pending = producer.pending_count();
    while pending > 0 {
        let processed = producer.poll(Duration::ZERO).unwrap();
        let now = producer.pending_count();
        assert!(now <= pending);
        assert_eq!(pending - now, processed);
        pending = now;
    }
}

/// 测试：关闭后 produce/poll 返回专用错误，不会崩溃也不会静默成功
#[test]
fn test_operations_after_teardown_fail() {
    let broker = shared_broker(MemoryConfig::default());
    let producer = producer_on(&broker, "teardown");
    producer.send("before").unwrap();
    producer.close();

    assert_eq!(producer.state(), ProducerState::Destroyed);
    assert_eq!(producer.send("after"), Err(ProduceError::Destroyed));
    assert_eq!(
        producer.produce_text(Some("k"), "after", Partition::Id(0)),
        Err(ProduceError::Destroyed)
    );
    assert_eq!(producer.poll(Duration::ZERO), Err(PollError::Destroyed));
    assert_eq!(producer.flush(Duration::ZERO), Err(FlushError::Destroyed));
    assert_eq!(producer.pending_count(), 0);

    // close 已经把之前的消息 flush 掉
    assert_eq!(broker.pending_count(), 0);
    assert_eq!(broker.live_topic_handles(), 0);
}

/// 测试：无 key 的 "hello" 成功投递后，回执中的 value 为 "hello" 且 key 为空
#[test]
fn test_round_trip_hello_without_key() {
    let broker = shared_broker(MemoryConfig::default());
    let producer = producer_on(&broker, "round-trip");
    let reports = collect_reports(&producer);

    producer.produce(None, b"hello", Partition::Unassigned).unwrap();
    producer.flush(Duration::from_millis(10)).unwrap();

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.is_success());
    assert_eq!(report.producer, *producer.id());
    assert_eq!(report.producer.topic(), "round-trip");

    let message = report.message.as_ref().expect("message content");
    assert_eq!(message.value(), b"hello");
    assert_eq!(message.key(), None);
    assert_eq!(message.partition, Partition::Id(0));
    assert_eq!(message.offset, Some(0));
}

/// 测试：队列满时 produce 返回 QueueFull，待投递数不变
#[test]
fn test_queue_full_leaves_pending_count_unchanged() {
    let broker = shared_broker(MemoryConfig::default());
    let producer = producer_on(&broker, "queue-full");
    producer.send("queued").unwrap();
    broker.set_queue_full(true);

    let before = producer.pending_count();
    let err = producer.send("overflow").unwrap_err();
    assert_eq!(err, ProduceError::QueueFull);
    assert_eq!(err.code(), ErrorCode::QueueFull);
    assert_eq!(producer.pending_count(), before);

    broker.set_queue_full(false);
    producer.send("recovered").unwrap();
    assert_eq!(producer.pending_count(), before + 1);
}

/// 测试：超过最大大小的消息被同步拒绝
#[test]
fn test_oversized_message_is_rejected() {
    let broker = shared_broker(MemoryConfig::default().with_max_message_bytes(8));
    let producer = producer_on(&broker, "oversized");
    let reports = collect_reports(&producer);

    assert_eq!(
        producer.produce(Some(b"key".as_slice()), b"0123456789", Partition::Unassigned),
        Err(ProduceError::MessageTooLarge { size: 13, max: 8 })
    );
    assert_eq!(producer.pending_count(), 0);

    producer.flush(Duration::from_millis(10)).unwrap();
    assert!(reports.lock().is_empty());
}

/// 测试：每次 poll 只完成一条消息时，5 条消息的 flush 至少 poll 5 次
#[test]
fn test_flush_polls_until_drained() {
    let broker = shared_broker(MemoryConfig::default().with_completions_per_poll(1));
    let producer = producer_on(&broker, "flush");
    let reports = collect_reports(&producer);

    for i in 0..5 {
        producer.send(format!("{}", i)).unwrap();
    }
    let polls_before = broker.poll_calls();

    producer.flush(Duration::from_millis(10)).unwrap();

    assert_eq!(producer.pending_count(), 0);
    assert!(broker.poll_calls() - polls_before >= 5);
    assert_eq!(reports.lock().len(), 5);
}

/// 测试：一次 poll 处理 2 成功 1 失败，回调恰好调用 3 次，顺序与发送顺序一致
#[test]
fn test_mixed_outcomes_in_single_poll() {
    let broker = shared_broker(MemoryConfig::default());
    let producer = producer_on(&broker, "mixed");
    let reports = collect_reports(&producer);

    broker.fail_next(1, ErrorCode::MessageTimedOut);
    for value in ["first", "second", "third"] {
        producer.produce_text(None, value, Partition::Id(0)).unwrap();
    }

    assert_eq!(producer.poll(Duration::ZERO).unwrap(), 3);

    let reports = reports.lock();
    assert_eq!(reports.len(), 3);

    let outcomes: Vec<_> = reports
        .iter()
        .map(|r| {
            (
                r.message.as_ref().unwrap().value().to_vec(),
                r.error().map(|e| e.code),
            )
        })
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (b"first".to_vec(), Some(ErrorCode::MessageTimedOut)),
            (b"second".to_vec(), None),
            (b"third".to_vec(), None),
        ]
    );

    // 失败的消息没有 offset，成功的消息 offset 连续
    let offsets: Vec<_> = reports.iter().map(|r| r.message.as_ref().unwrap().offset).collect();
    assert_eq!(offsets, vec![None, Some(0), Some(1)]);

    let stats = producer.stats();
    assert_eq!((stats.delivered, stats.failed), (2, 1));
}

/// 测试：未注册回调时回执交还给客户端，记账保持一致
#[test]
fn test_reports_without_callback_are_unhandled() {
    let broker = shared_broker(MemoryConfig::default());
    let producer = producer_on(&broker, "no-callback");
    assert!(!producer.has_delivery_callback());

    producer.send("a").unwrap();
    producer.send("b").unwrap();
    assert_eq!(producer.poll(Duration::ZERO).unwrap(), 2);
    assert_eq!(producer.pending_count(), 0);
    assert_eq!(producer.stats().unhandled, 2);

    let reports = collect_reports(&producer);
    producer.send("c").unwrap();
    producer.poll(Duration::ZERO).unwrap();
    assert_eq!(values(&reports), vec![b"c".to_vec()]);

    producer.clear_delivery_callback();
    producer.send("d").unwrap();
    producer.poll(Duration::ZERO).unwrap();
    assert_eq!(reports.lock().len(), 1);
    assert_eq!(producer.stats().unhandled, 3);
}

/// 测试：后注册的回调覆盖先注册的回调
#[test]
fn test_last_registered_callback_wins() {
    let broker = shared_broker(MemoryConfig::default());
    let producer = producer_on(&broker, "last-writer");
    let first = collect_reports(&producer);
    let second = collect_reports(&producer);

    producer.send("x").unwrap();
    producer.flush(Duration::from_millis(10)).unwrap();

    assert!(first.lock().is_empty());
    assert_eq!(second.lock().len(), 1);
}

/// 测试：回调中可以继续 produce
#[test]
fn test_produce_from_inside_callback() {
    let broker = shared_broker(MemoryConfig::default());
    let producer = Arc::new(producer_on(&broker, "reentrant"));
    let reports: Reports = Arc::new(Mutex::new(Vec::new()));

    let weak = Arc::downgrade(&producer);
    let sink = Arc::clone(&reports);
    producer.set_delivery_callback(move |report| {
        let is_retry = report.message.as_ref().is_some_and(|m| m.value() == b"retry");
        sink.lock().push(report);
        if !is_retry {
            if let Some(producer) = weak.upgrade() {
                producer.send("retry").unwrap();
            }
        }
    });

    producer.send("original").unwrap();
    producer.flush(Duration::from_millis(10)).unwrap();

    assert_eq!(values(&reports), vec![b"original".to_vec(), b"retry".to_vec()]);
}

/// 测试：共享客户端时回执路由回各自的生产者
#[test]
fn test_shared_client_routes_reports_to_each_producer() {
    let broker = shared_broker(MemoryConfig::default());
    let orders = producer_on(&broker, "orders");
    let payments = producer_on(&broker, "payments");
    let order_reports = collect_reports(&orders);
    let payment_reports = collect_reports(&payments);

    orders.send("o1").unwrap();
    payments.send("p1").unwrap();
    orders.send("o2").unwrap();

    // 任意一个生产者的 poll 都会驱动共享客户端上的全部事件
    assert_eq!(payments.poll(Duration::ZERO).unwrap(), 3);

    assert_eq!(values(&order_reports), vec![b"o1".to_vec(), b"o2".to_vec()]);
    assert_eq!(values(&payment_reports), vec![b"p1".to_vec()]);
    assert!(order_reports.lock().iter().all(|r| r.producer.topic() == "orders"));
    assert_ne!(orders.id(), payments.id());
}

/// 测试：生产者销毁后迟到的完成事件被安全丢弃
#[test]
fn test_late_completion_for_destroyed_producer_is_dropped() {
    let broker = shared_broker(MemoryConfig::default());
    let survivor = producer_on(&broker, "survivor");
    let survivor_reports = collect_reports(&survivor);

    let doomed = producer_on(&broker, "doomed").with_close_timeout(Some(Duration::ZERO));
    let doomed_reports = collect_reports(&doomed);
    doomed.send("late").unwrap();
    let doomed_token = doomed.id().token();
    drop(doomed);
    assert!(!DeliveryRegistry::global().contains(doomed_token));

    survivor.send("alive").unwrap();
    assert_eq!(survivor.poll(Duration::ZERO).unwrap(), 2);

    assert!(doomed_reports.lock().is_empty());
    assert_eq!(values(&survivor_reports), vec![b"alive".to_vec()]);
}

/// 测试：drop 会关闭生产者并释放 topic 句柄
#[test]
fn test_drop_releases_topic_handle() {
    let broker = shared_broker(MemoryConfig::default());
    {
        let producer = producer_on(&broker, "dropped");
        producer.send("x").unwrap();
        assert_eq!(broker.live_topic_handles(), 1);
    }
    assert_eq!(broker.live_topic_handles(), 0);
    assert_eq!(broker.pending_count(), 0);
}

/// 测试：文本与字节两种入口产生相同的消息
#[test]
fn test_text_and_bytes_produce_identical_messages() {
    let broker = shared_broker(MemoryConfig::default().with_partitions(4));
    let producer = producer_on(&broker, "text-vs-bytes");
    let reports = collect_reports(&producer);

    producer.produce_text(Some("user-42"), "payload", Partition::Id(3)).unwrap();
    producer
        .produce(Some(b"user-42".as_slice()), b"payload", Partition::Id(3))
        .unwrap();
    producer.flush(Duration::from_millis(10)).unwrap();

    let reports = reports.lock();
    let a = reports[0].message.as_ref().unwrap();
    let b = reports[1].message.as_ref().unwrap();
    assert_eq!((a.key(), a.value(), a.partition), (b.key(), b.value(), b.partition));
    assert_eq!((a.offset, b.offset), (Some(0), Some(1)));
}

/// 测试：未知 topic 与非法分区作为异步投递错误出现
#[test]
fn test_unknown_topic_and_partition_are_delivery_errors() {
    let broker = shared_broker(MemoryConfig::default().with_known_topic("known"));
    let unknown = producer_on(&broker, "unknown");
    let known = producer_on(&broker, "known");
    let unknown_reports = collect_reports(&unknown);
    let known_reports = collect_reports(&known);

    unknown.send("x").unwrap();
    known.produce(None, b"y", Partition::Id(9)).unwrap();
    known.flush(Duration::from_millis(10)).unwrap();

    let unknown_reports = unknown_reports.lock();
    let known_reports = known_reports.lock();
    assert_eq!(
        unknown_reports[0].error().map(|e| e.code),
        Some(ErrorCode::UnknownTopicOrPartition)
    );
    assert_eq!(known_reports[0].error().map(|e| e.code), Some(ErrorCode::UnknownPartition));
}

/// 测试：构造失败作为 ConstructionError 同步返回
#[test]
fn test_construction_errors() {
    let mut bad_client = ClientConfig::new();
    bad_client.set("queue.buffering.max.messages", "not-a-number");
    let err = Producer::<MemoryBroker>::new(&MemoryConnector, "t", None, Some(&bad_client)).err();
    assert!(matches!(err, Some(ConstructionError::Client(_))));

    let err = Producer::<MemoryBroker>::new(&MemoryConnector, "", None, None).err();
    assert!(matches!(err, Some(ConstructionError::Topic { .. })));
}

/// 测试：从 TOML 配置创建生产者
#[test]
fn test_producer_from_config() {
    let config = ProducerConfig::from_toml_str(
        r#"
        topic = "configured"
        flush_poll_timeout_ms = 5
        close_timeout_ms = 200

        [client]
        "queue.buffering.max.messages" = "1"
        "#,
    )
    .unwrap();

    let producer: Producer<MemoryBroker> = Producer::from_config(&MemoryConnector, &config).unwrap();
    assert_eq!(producer.topic(), "configured");
    assert_eq!(producer.state(), ProducerState::Ready);

    producer.send("one").unwrap();
    assert_eq!(producer.send("two"), Err(ProduceError::QueueFull));
    producer.flush(config.flush_poll_timeout()).unwrap();
    producer.send("three").unwrap();
}

/// 测试：在 tokio 运行时中异步 flush
#[tokio::test]
async fn test_flush_async() {
    let broker = shared_broker(MemoryConfig::default().with_completions_per_poll(1));
    let producer = Arc::new(producer_on(&broker, "async-flush"));
    let reports = collect_reports(&producer);

    for i in 0..3 {
        producer.send(format!("{}", i)).unwrap();
    }

    Arc::clone(&producer)
        .flush_async(Duration::from_millis(5))
        .await
        .unwrap();

    assert_eq!(producer.pending_count(), 0);
    assert_eq!(reports.lock().len(), 3);
}

/// 测试：poll 在没有事件时最多阻塞给定的超时，有事件到达时立即返回
#[test]
fn test_poll_blocks_until_event_or_timeout() {
    let broker = shared_broker(MemoryConfig::default());
    let producer = Arc::new(producer_on(&broker, "blocking-poll"));
    let reports = collect_reports(&producer);

    let start = Instant::now();
    assert_eq!(producer.poll(Duration::from_millis(20)).unwrap(), 0);
    assert!(start.elapsed() >= Duration::from_millis(15));

    let sender = Arc::clone(&producer);
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        sender.send("wake").unwrap();
    });

    let start = Instant::now();
    let mut processed = 0;
    while processed == 0 && start.elapsed() < Duration::from_secs(5) {
        processed = producer.poll(Duration::from_secs(5)).unwrap();
    }
    handle.join().unwrap();

    assert_eq!(processed, 1);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(values(&reports), vec![b"wake".to_vec()]);
}

/// 测试：超时取 `Duration::MAX` 表示一直等待，不会因时刻溢出而崩溃
#[test]
fn test_unbounded_timeouts() {
    let broker = shared_broker(MemoryConfig::default());
    let producer = producer_on(&broker, "unbounded-timeouts").with_close_timeout(Some(Duration::MAX));
    let reports = collect_reports(&producer);

    producer.send("poll").unwrap();
    assert_eq!(producer.poll(Duration::MAX).unwrap(), 1);

    producer.send("flush-within").unwrap();
    producer
        .flush_within(Duration::from_millis(1), Duration::MAX)
        .unwrap();

    producer.send("close").unwrap();
    producer.close();

    assert_eq!(
        values(&reports),
        vec![b"poll".to_vec(), b"flush-within".to_vec(), b"close".to_vec()]
    );
    assert_eq!(broker.pending_count(), 0);
}

/// 测试：负数分区号被同步拒绝，不会被当作成功投递
#[test]
fn test_negative_partition_is_rejected() {
    let broker = shared_broker(MemoryConfig::default().with_partitions(2));
    let producer = producer_on(&broker, "negative-partition");
    let reports = collect_reports(&producer);

    for partition in [Partition::Id(-7), Partition::Id(-1)] {
        let err = producer.produce(None, b"neg", partition).unwrap_err();
        assert!(matches!(err, ProduceError::Rejected { .. }));
        assert_eq!(err.code(), ErrorCode::UnknownPartition);
    }
    assert_eq!(producer.pending_count(), 0);
    assert_eq!(producer.stats().rejected, 2);

    producer.flush(Duration::from_millis(10)).unwrap();
    assert!(reports.lock().is_empty());
}

/// 测试：一个线程持续 poll 共享客户端时，另一个线程关闭或 drop 带在途消息的生产者
///
/// 每条被接受的消息要么恰好派发一次，要么在生产者注销后被丢弃
#[test]
fn test_teardown_concurrent_with_polling() {
    let broker = shared_broker(MemoryConfig::default().with_completions_per_poll(3));
    let survivor = Arc::new(producer_on(&broker, "concurrent-survivor"));
    let survivor_reports = collect_reports(&survivor);
    let stop = Arc::new(AtomicBool::new(false));

    let poller = {
        let survivor = Arc::clone(&survivor);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                survivor.poll(Duration::from_millis(1)).unwrap();
            }
        })
    };

    let mut closed = Vec::new();
    let rounds = 40;
    for round in 0..rounds {
        let doomed = producer_on(&broker, "concurrent-doomed").with_close_timeout(Some(Duration::ZERO));
        let reports = collect_reports(&doomed);
        for i in 0..10 {
            doomed.send(format!("{}-{}", round, i)).unwrap();
        }
        survivor.send(format!("s-{}", round)).unwrap();

        if round % 2 == 0 {
            doomed.close();
            closed.push((doomed, reports));
        } else {
            drop(doomed);
        }
    }

    let start = Instant::now();
    while survivor_reports.lock().len() < rounds && start.elapsed() < Duration::from_secs(10) {
        std::thread::sleep(Duration::from_millis(1));
    }
    stop.store(true, Ordering::Release);
    poller.join().unwrap();
    survivor.flush(Duration::from_millis(1)).unwrap();

    let expected: Vec<Vec<u8>> = (0..rounds).map(|r| format!("s-{}", r).into_bytes()).collect();
    assert_eq!(values(&survivor_reports), expected);
    assert_eq!(broker.pending_count(), 0);

    for (doomed, reports) in &closed {
        let stats = doomed.stats();
        let seen = values(reports);
        let unique: HashSet<_> = seen.iter().cloned().collect();
        assert_eq!(stats.accepted, 10);
        assert_eq!(seen.len() as u64, stats.reported());
        assert_eq!(unique.len(), seen.len());
        assert!(seen.len() <= 10);
        assert_eq!(stats.unhandled, 0);
    }
}

/// 测试：两个生产者的回调互相 poll 对方的客户端，两个线程并发驱动时不会死锁
#[test]
fn test_callbacks_polling_each_others_client() {
    let broker_a = shared_broker(MemoryConfig::default().with_completions_per_poll(1));
    let broker_b = shared_broker(MemoryConfig::default().with_completions_per_poll(1));
    let a = producer_on(&broker_a, "cross-a");
    let b = producer_on(&broker_b, "cross-b");
    let count_a = Arc::new(AtomicUsize::new(0));
    let count_b = Arc::new(AtomicUsize::new(0));

    {
        let other = Arc::clone(&broker_b);
        let count = Arc::clone(&count_a);
        a.set_delivery_callback(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            other.poll_once(Duration::ZERO);
        });
    }
    {
        let other = Arc::clone(&broker_a);
        let count = Arc::clone(&count_b);
        b.set_delivery_callback(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            other.poll_once(Duration::ZERO);
        });
    }

    let n = 200;
    for i in 0..n {
        a.send(format!("a-{}", i)).unwrap();
        b.send(format!("b-{}", i)).unwrap();
    }

    let drivers: Vec<_> = [Arc::clone(&broker_a), Arc::clone(&broker_b)]
        .into_iter()
        .map(|broker| {
            std::thread::spawn(move || {
                let start = Instant::now();
                while broker.pending_count() > 0 && start.elapsed() < Duration::from_secs(10) {
                    broker.poll_once(Duration::from_millis(1));
                }
            })
        })
        .collect();
    for driver in drivers {
        driver.join().unwrap();
    }

    assert_eq!(count_a.load(Ordering::SeqCst), n);
    assert_eq!(count_b.load(Ordering::SeqCst), n);
    assert_eq!(a.stats().unhandled + b.stats().unhandled, 0);
}
