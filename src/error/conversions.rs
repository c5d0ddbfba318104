//! 错误类型转换实现
//!
//! 将 librdkafka 的错误映射为本 crate 的错误代码

#[cfg(feature = "kafka")]
use super::{BrokerError, DeliveryError, ErrorCode};
#[cfg(feature = "kafka")]
use rdkafka::error::{KafkaError, RDKafkaErrorCode};

#[cfg(feature = "kafka")]
impl From<RDKafkaErrorCode> for ErrorCode {
    fn from(code: RDKafkaErrorCode) -> Self {
        ErrorCode::from_i32(code as i32).unwrap_or(ErrorCode::Unknown)
    }
}

#[cfg(feature = "kafka")]
impl From<KafkaError> for BrokerError {
    fn from(err: KafkaError) -> Self {
        match err.rdkafka_error_code() {
            Some(RDKafkaErrorCode::QueueFull) => BrokerError::QueueFull,
            Some(code) => BrokerError::client(code.into(), err.to_string()),
            None => match err {
                KafkaError::ClientConfig(..) => BrokerError::Config(err.to_string()),
                other => BrokerError::client(ErrorCode::Fail, other.to_string()),
            },
        }
    }
}

#[cfg(feature = "kafka")]
impl From<&KafkaError> for DeliveryError {
    fn from(err: &KafkaError) -> Self {
        let code = err
            .rdkafka_error_code()
            .map(ErrorCode::from)
            .unwrap_or(ErrorCode::Unknown);
        DeliveryError::new(code, err.to_string())
    }
}
