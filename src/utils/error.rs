//! 错误类型定义
//!
//! 本模块定义了模块生命周期决策层中使用的所有错误类型。

use thiserror::Error;

use crate::module::metadata::{ModuleState, Transition};

/// 核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 注册表错误 ====================

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 同一标识已被另一个工作区单元占用
    #[error("模块标识 '{id}' 已被工作区单元 '{existing_unit}' 占用")]
    DuplicateIdentity {
        id: String,
        existing_unit: String,
    },

    /// 无效的模块元数据
    #[error("无效的模块元数据: {0}")]
    InvalidMetadata(String),

    // ==================== 依赖错误 ====================

    /// 循环依赖
    #[error("检测到循环依赖: {0}")]
    CircularDependency(String),

    /// 必需依赖无法满足
    #[error("模块 '{module}' 的必需依赖无法满足: {missing:?}")]
    UnsatisfiedDependency {
        module: String,
        missing: Vec<String>,
    },

    /// 单例重复（过滤器的建议性排除）
    #[error("单例模块 '{symbolic_name}' 重复: '{excluded}' 被排除, 保留 '{retained}'")]
    DuplicateSingleton {
        symbolic_name: String,
        retained: String,
        excluded: String,
    },

    // ==================== 状态迁移错误 ====================

    /// 非法状态迁移
    #[error("模块 '{module}' 在状态 {current} 下不允许迁移 {requested}")]
    IllegalTransition {
        module: String,
        current: ModuleState,
        requested: Transition,
    },

    /// 模块已有进行中的迁移
    #[error("模块 '{module}' 正在执行迁移 {in_flight:?}")]
    TransitionInProgress {
        module: String,
        in_flight: Option<Transition>,
    },

    /// 外部调度器报告迁移失败
    #[error("模块 '{module}' 的迁移 {transition} 执行失败: {reason}")]
    ExternalTransitionFailure {
        module: String,
        transition: Transition,
        reason: String,
    },

    // ==================== 事件系统错误 ====================

    /// 订阅未找到
    #[error("订阅未找到: '{0}'")]
    SubscriptionNotFound(u64),

    /// 一轮分发中部分监听器失败
    #[error("事件 {sequence} 分发完成, {} 个监听器失败: {failures:?}", failures.len())]
    ListenerFailures {
        sequence: u64,
        delivered: usize,
        failures: Vec<(u64, String)>,
    },

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 首选项提供者未注册
    #[error("首选项提供者未注册: '{0}'")]
    PreferenceProviderNotFound(String),

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_DUPLICATE_IDENTITY: &str = "MODULE-002";
    pub const MODULE_INVALID_METADATA: &str = "MODULE-003";
    pub const MODULE_CIRCULAR_DEPENDENCY: &str = "MODULE-004";
    pub const MODULE_UNSATISFIED_DEPENDENCY: &str = "MODULE-005";
    pub const MODULE_DUPLICATE_SINGLETON: &str = "MODULE-006";

    // 迁移错误 (TRANSITION-xxx)
    pub const TRANSITION_ILLEGAL: &str = "TRANSITION-001";
    pub const TRANSITION_IN_PROGRESS: &str = "TRANSITION-002";
    pub const TRANSITION_EXTERNAL_FAILURE: &str = "TRANSITION-003";

    // 事件错误 (EVENT-xxx)
    pub const EVENT_SUBSCRIPTION_NOT_FOUND: &str = "EVENT-001";
    pub const EVENT_LISTENER_FAILURE: &str = "EVENT-002";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_PROVIDER_NOT_FOUND: &str = "CONFIG-002";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::DuplicateIdentity { .. } => error_code::MODULE_DUPLICATE_IDENTITY,
            CoreError::InvalidMetadata(_) => error_code::MODULE_INVALID_METADATA,
            CoreError::CircularDependency(_) => error_code::MODULE_CIRCULAR_DEPENDENCY,
            CoreError::UnsatisfiedDependency { .. } => error_code::MODULE_UNSATISFIED_DEPENDENCY,
            CoreError::DuplicateSingleton { .. } => error_code::MODULE_DUPLICATE_SINGLETON,
            CoreError::IllegalTransition { .. } => error_code::TRANSITION_ILLEGAL,
            CoreError::TransitionInProgress { .. } => error_code::TRANSITION_IN_PROGRESS,
            CoreError::ExternalTransitionFailure { .. } => error_code::TRANSITION_EXTERNAL_FAILURE,
            CoreError::SubscriptionNotFound(_) => error_code::EVENT_SUBSCRIPTION_NOT_FOUND,
            CoreError::ListenerFailures { .. } => error_code::EVENT_LISTENER_FAILURE,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::PreferenceProviderNotFound(_) => error_code::CONFIG_PROVIDER_NOT_FOUND,
            _ => "UNKNOWN",
        }
    }

    /// 是否在任何状态变更之前被同步拒绝
    ///
    /// 这类错误可以直接重试或修正请求，无需回滚。
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CoreError::DuplicateIdentity { .. }
                | CoreError::IllegalTransition { .. }
                | CoreError::TransitionInProgress { .. }
                | CoreError::ModuleNotFound(_)
        )
    }
}
