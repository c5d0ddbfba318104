//! 内存客户端示例
//!
//! 运行：`cargo run --example memory_produce`
//! 使用 `RUST_LOG=flare_producer=trace` 查看每条消息的入队日志。

use flare_producer::broker::{MemoryBroker, MemoryConnector};
use flare_producer::{logging, ClientConfig, Partition, ProduceError, Producer};
use std::time::Duration;
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    logging::init("info,flare_producer=debug");

    let mut client = ClientConfig::new();
    client
        .set("queue.buffering.max.messages", "8")
        .set("memory.partitions", "3")
        .set("memory.completions.per.poll", "4");

    let producer: Producer<MemoryBroker> =
        Producer::new(&MemoryConnector, "user-events", None, Some(&client))?;

    producer.set_delivery_callback(|report| match (&report.message, report.error()) {
        (Some(message), None) => info!(
            producer = %report.producer,
            partition = %message.partition,
            offset = ?message.offset,
            "Message delivered"
        ),
        (_, Some(err)) => warn!(producer = %report.producer, error = %err, "Message delivery failed"),
        (None, None) => {}
    });

    for i in 0..20 {
        let key = format!("user-{}", i % 5);
        let value = format!(r#"{{"event":"signed-in","seq":{}}}"#, i);
        match producer.produce_text(Some(&key), &value, Partition::Unassigned) {
            Ok(()) => {}
            Err(ProduceError::QueueFull) => {
                // 队列满时先驱动回执释放空间，再重试一次
                producer.poll(Duration::from_millis(10))?;
                producer.produce_text(Some(&key), &value, Partition::Unassigned)?;
            }
            Err(err) => return Err(err.into()),
        }
    }

    producer.send(b"raw-bytes".as_slice())?;
    info!(pending = producer.pending_count(), "All messages queued");

    producer.flush(Duration::from_millis(50))?;

    let stats = producer.stats();
    info!(stats = %serde_json::to_string(&stats)?, "Producer statistics");

    producer.close();
    Ok(())
}
