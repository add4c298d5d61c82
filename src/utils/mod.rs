//! 工具模块
//!
//! 错误类型与日志系统。

pub mod error;
pub mod logger;

pub use error::{error_code, CoreError, Result};
pub use logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
