//! 日志初始化
//!
//! 生产者内部只通过 `tracing` 输出结构化事件，是否以及如何输出由应用决定。

use tracing_subscriber::EnvFilter;

/// 安装 fmt subscriber，优先使用 `RUST_LOG`，否则使用 `default_directive`
///
/// 已安装过全局 subscriber 时直接返回 false
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// 以 JSON 格式输出，适合采集到日志平台
pub fn init_json(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
