//! 日志系统
//!
//! 基于 tracing 生态：控制台输出、JSON 结构化输出、
//! 非阻塞文件写入以及按时间轮转。
//!
//! # 示例
//!
//! ```rust,no_run
//! use bundle_core::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoggerConfig::builder()
//!         .level("debug")
//!         .file_output("./logs")
//!         .rotation(RotationStrategy::Hourly)
//!         .build();
//!     let _guard = Logger::init(config)?;
//!
//!     tracing::info!(module_id = "org.example.core", transition = "resolve", "开始迁移");
//!     Ok(())
//! }
//! ```

use crate::core::config::LogConfig;
use crate::utils::{CoreError, Result};
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// 默认日志文件前缀
pub const DEFAULT_FILE_PREFIX: &str = "bundle-core";

// ============================================================================
// 轮转策略
// ============================================================================

/// 日志文件轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 单个文件
    Never,
    /// 每分钟
    Minutely,
    /// 每小时
    Hourly,
    /// 每天（默认）
    #[default]
    Daily,
}

impl RotationStrategy {
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Minutely => Rotation::MINUTELY,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }

    /// 解析配置文件中的轮转名称，无法识别时回落到 `Daily`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "never" | "none" => RotationStrategy::Never,
            "minutely" | "minute" => RotationStrategy::Minutely,
            "hourly" | "hour" => RotationStrategy::Hourly,
            _ => RotationStrategy::Daily,
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RotationStrategy::Never => "never",
            RotationStrategy::Minutely => "minutely",
            RotationStrategy::Hourly => "hourly",
            RotationStrategy::Daily => "daily",
        };
        f.write_str(name)
    }
}

// ============================================================================
// 日志配置
// ============================================================================

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认级别（trace / debug / info / warn / error）
    pub level: String,
    /// JSON 格式输出
    pub json_format: bool,
    /// 输出到控制台
    pub console_output: bool,
    /// 文件输出目录，`None` 表示不写文件
    pub file_output: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 轮转策略
    pub rotation: RotationStrategy,
    /// 保留的最大文件数
    pub max_files: usize,
    /// 显示 target
    pub show_target: bool,
    /// 显示线程 ID
    pub show_thread_ids: bool,
    /// 显示文件名和行号
    pub show_file_line: bool,
    /// 显示级别
    pub show_level: bool,
    /// 额外的 EnvFilter 指令，例如 `bundle_core::module::lifecycle=trace`
    pub filter_directives: Option<String>,
    /// 控制台 ANSI 颜色
    pub ansi_colors: bool,
    /// 记录哪些 span 事件
    pub span_events: SpanEvents,
}

/// Span 事件开关
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    /// 进入
    pub enter: bool,
    /// 退出
    pub exit: bool,
    /// 关闭（含耗时）
    pub close: bool,
}

impl SpanEvents {
    fn to_fmt_span(self) -> FmtSpan {
        let mut span = FmtSpan::NONE;
        if self.enter {
            span |= FmtSpan::ENTER;
        }
        if self.exit {
            span |= FmtSpan::EXIT;
        }
        if self.close {
            span |= FmtSpan::CLOSE;
        }
        span
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: None,
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            rotation: RotationStrategy::Daily,
            max_files: 7,
            show_target: true,
            show_thread_ids: false,
            show_file_line: false,
            show_level: true,
            filter_directives: None,
            ansi_colors: true,
            span_events: SpanEvents::default(),
        }
    }
}

impl LoggerConfig {
    /// 创建构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 从配置文件的 `logging` 段创建
    ///
    /// `file_output = false` 时忽略 `log_dir`。
    pub fn from_log_config(log_config: &LogConfig) -> Self {
        Self {
            level: log_config.level.clone(),
            json_format: log_config.json_format,
            file_output: if log_config.file_output {
                log_config.log_dir.clone()
            } else {
                None
            },
            rotation: RotationStrategy::parse(&log_config.rotation),
            max_files: log_config.max_files,
            ..Default::default()
        }
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 设置级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// JSON 格式
    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    /// 控制台输出
    pub fn console_output(mut self, enable: bool) -> Self {
        self.config.console_output = enable;
        self
    }

    /// 文件输出目录
    pub fn file_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.file_output = Some(dir.into());
        self
    }

    /// 文件前缀
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    /// 轮转策略
    pub fn rotation(mut self, strategy: RotationStrategy) -> Self {
        self.config.rotation = strategy;
        self
    }

    /// 保留文件数
    pub fn max_files(mut self, count: usize) -> Self {
        self.config.max_files = count;
        self
    }

    /// 显示 target
    pub fn show_target(mut self, enable: bool) -> Self {
        self.config.show_target = enable;
        self
    }

    /// 显示线程 ID
    pub fn show_thread_ids(mut self, enable: bool) -> Self {
        self.config.show_thread_ids = enable;
        self
    }

    /// 显示文件名和行号
    pub fn show_file_line(mut self, enable: bool) -> Self {
        self.config.show_file_line = enable;
        self
    }

    /// 过滤指令
    pub fn filter_directives(mut self, directives: impl Into<String>) -> Self {
        self.config.filter_directives = Some(directives.into());
        self
    }

    /// ANSI 颜色
    pub fn ansi_colors(mut self, enable: bool) -> Self {
        self.config.ansi_colors = enable;
        self
    }

    /// Span 事件
    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.config.span_events = events;
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 日志守卫
// ============================================================================

/// 日志守卫
///
/// 持有非阻塞写入器的 `WorkerGuard`，丢弃时刷新挂起的日志。
/// 必须在进程退出前保持存活。
#[must_use = "丢弃守卫会立即停止异步日志写入"]
pub struct LogGuard {
    console: Option<WorkerGuard>,
    file: Option<WorkerGuard>,
}

impl LogGuard {
    fn empty() -> Self {
        Self {
            console: None,
            file: None,
        }
    }

    /// 是否持有任何写入器
    pub fn is_active(&self) -> bool {
        self.console.is_some() || self.file.is_some()
    }
}

impl std::fmt::Debug for LogGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogGuard")
            .field("console", &self.console.is_some())
            .field("file", &self.file.is_some())
            .finish()
    }
}

// ============================================================================
// 日志系统
// ============================================================================

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// 日志系统入口
pub struct Logger;

impl Logger {
    /// 初始化全局订阅者
    ///
    /// `RUST_LOG` 优先于配置中的级别。进程内只能成功一次，
    /// 再次调用返回 [`CoreError::InitFailed`]。
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.get().is_some() {
            return Err(CoreError::InitFailed(
                "日志系统已初始化，不能重复初始化".to_string(),
            ));
        }

        let env_filter = Self::create_env_filter(&config);
        let guard = if config.json_format {
            Self::init_json(&config, env_filter)?
        } else {
            Self::init_pretty(&config, env_filter)?
        };

        let _ = LOGGER_INITIALIZED.set(());
        Ok(guard)
    }

    /// 初始化，失败时返回空守卫
    ///
    /// 用于测试以及可能重复初始化的场景。
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_else(|_| LogGuard::empty())
    }

    /// 使用默认配置初始化
    pub fn init_default() -> Result<LogGuard> {
        Self::init(LoggerConfig::default())
    }

    fn create_env_filter(config: &LoggerConfig) -> EnvFilter {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

        let Some(directives) = config.filter_directives.as_deref() else {
            return filter;
        };

        directives
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .fold(filter, |f, directive| match directive.parse() {
                Ok(parsed) => f.add_directive(parsed),
                // 无效指令直接忽略，保留基础级别
                Err(_) => f,
            })
    }

    fn file_appender(config: &LoggerConfig) -> Option<RollingFileAppender> {
        config.file_output.as_ref().map(|dir| {
            RollingFileAppender::new(
                config.rotation.to_rotation(),
                dir,
                format!("{}.log", config.file_prefix),
            )
        })
    }

    fn init_json(config: &LoggerConfig, env_filter: EnvFilter) -> Result<LogGuard> {
        let mut guard = LogGuard::empty();

        let console_layer = if config.console_output {
            let (writer, console_guard) = tracing_appender::non_blocking(io::stdout());
            guard.console = Some(console_guard);
            Some(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(config.show_target)
                    .with_thread_ids(config.show_thread_ids)
                    .with_file(config.show_file_line)
                    .with_line_number(config.show_file_line)
                    .with_span_events(config.span_events.to_fmt_span())
                    .with_ansi(false),
            )
        } else {
            None
        };

        let file_layer = Self::file_appender(config).map(|appender| {
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard.file = Some(file_guard);
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_file(config.show_file_line)
                .with_line_number(config.show_file_line)
                .with_span_events(config.span_events.to_fmt_span())
                .with_ansi(false)
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        Ok(guard)
    }

    fn init_pretty(config: &LoggerConfig, env_filter: EnvFilter) -> Result<LogGuard> {
        let mut guard = LogGuard::empty();

        let console_layer = if config.console_output {
            let (writer, console_guard) = tracing_appender::non_blocking(io::stdout());
            guard.console = Some(console_guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(config.show_target)
                    .with_thread_ids(config.show_thread_ids)
                    .with_file(config.show_file_line)
                    .with_line_number(config.show_file_line)
                    .with_level(config.show_level)
                    .with_span_events(config.span_events.to_fmt_span())
                    .with_ansi(config.ansi_colors),
            )
        } else {
            None
        };

        // 文件不写 ANSI 转义
        let file_layer = Self::file_appender(config).map(|appender| {
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard.file = Some(file_guard);
            fmt::layer()
                .with_writer(writer)
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_file(config.show_file_line)
                .with_line_number(config.show_file_line)
                .with_level(config.show_level)
                .with_span_events(config.span_events.to_fmt_span())
                .with_ansi(false)
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        Ok(guard)
    }
}

// ============================================================================
// 结构化字段
// ============================================================================

/// 日志中统一使用的字段名
pub mod fields {
    /// 模块身份（`name` 或 `name@version`）
    pub const MODULE_ID: &str = "module_id";
    /// 符号名
    pub const SYMBOLIC_NAME: &str = "symbolic_name";
    /// 迁移名称
    pub const TRANSITION: &str = "transition";
    /// 迁移前状态
    pub const FROM_STATE: &str = "from_state";
    /// 迁移后状态
    pub const TO_STATE: &str = "to_state";
    /// 事件序号
    pub const SEQUENCE: &str = "sequence";
    /// 事件 ID
    pub const EVENT_ID: &str = "event_id";
    /// 闭包方向
    pub const DIRECTION: &str = "direction";
    /// 偏好提供者
    pub const PROVIDER: &str = "provider";
    /// 错误码
    pub const ERROR_CODE: &str = "error_code";
    /// 耗时（毫秒）
    pub const DURATION_MS: &str = "duration_ms";
}

/// 为单个模块的迁移步骤创建 span
///
/// ```rust,ignore
/// let span = bundle_core::step_span!("org.example.core", Transition::Start);
/// ```
#[macro_export]
macro_rules! step_span {
    ($module_id:expr, $transition:expr) => {
        tracing::info_span!(
            "step",
            module_id = %$module_id,
            transition = %$transition
        )
    };
}
