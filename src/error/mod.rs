//! Flare Producer 错误处理模块
//!
//! 同步错误（构造、produce、poll、flush）以返回值形式暴露；
//! 异步投递失败只通过投递回调中的 `DeliveryError` 暴露

pub mod code;
pub mod conversions;
pub mod delivery;
pub mod producer_error;

// 重新导出公共类型
pub use code::{ErrorCategory, ErrorCode};
pub use delivery::DeliveryError;
pub use producer_error::{
    BrokerError, ConfigError, ConstructionError, FlushError, PollError, ProduceError,
};
