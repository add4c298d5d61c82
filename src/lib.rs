//! # Bundle Core - 工作区模块生命周期
//!
//! 为开发工作区中的模块提供生命周期与依赖决策：
//!
//! - **注册表**：从 `module.yaml` 清单或外部来源登记模块
//! - **依赖图与闭包**：按迁移类型计算需要一起处理的模块集合
//! - **迁移状态机**：每个模块同一时刻最多一个迁移，提交或回滚
//! - **解析过滤**：单例去重、构建错误与停用依赖的排除
//! - **事件通知**：每次提交、失败、回滚或对账都会广播给订阅者
//!
//! 本库只做决策，实际的构建、加载与启动由 [`TransitionScheduler`] 的实现完成。
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use bundle_core::{ModuleManager, ModuleManifest, Transition};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ModuleManager::with_defaults();
//!     manager
//!         .register_external(ModuleManifest::new("org.example.core"))
//!         .await?;
//!
//!     let seeds = vec!["org.example.core".to_string()];
//!     for transition in [Transition::Install, Transition::Resolve] {
//!         let report = manager.request_transition(&seeds, transition).await?;
//!         assert!(report.succeeded());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `core` - 配置与偏好设置
//! - `event` - 迁移事件与通知器
//! - `module` - 注册表、依赖图、闭包、状态机、过滤器与管理器
//! - `utils` - 错误类型与日志

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod core;
pub mod event;
pub mod module;
pub mod utils;

pub use module::{
    Availability, ClosureDirection, ClosureEngine, ClosureRequest, ConflictPolicy,
    DependencyGraph, ExclusionPolicy, ExclusionReason, Module, ModuleId, ModuleManager,
    ModuleManifest, ModuleRegistry, ModuleState, NoopScheduler, Requirement, ResolutionFilter,
    ScriptedScheduler, StepFailure, StepOutcome, Transition, TransitionOptions, TransitionPlan,
    TransitionReport, TransitionScheduler, TransitionStateMachine, TransitionTable,
    WorkspaceUnit,
};

pub use event::{TransitionEvent, TransitionEventKind, TransitionNotifier};

pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, CoreError, Result};

pub use core::config::{CoreConfig, CoreConfigBuilder, LogConfig, PolicyConfig, WorkspaceConfig};
pub use core::preferences::{PreferenceProvider, PreferenceProviderTable, Preferences};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
