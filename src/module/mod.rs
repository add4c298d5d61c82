//! 模块管理
//!
//! - `metadata`：模块、清单、状态与迁移的定义
//! - `parser`：`module.yaml` 清单解析
//! - `registry`：模块注册表
//! - `dependency`：依赖图
//! - `closure`：依赖闭包计算
//! - `lifecycle`：迁移表与单模块状态机
//! - `filter`：解析过滤（单例、构建错误、停用依赖）
//! - `scheduler`：迁移步骤的执行接口
//! - `manager`：批量迁移的规划与执行

pub mod closure;
pub mod dependency;
pub mod filter;
pub mod lifecycle;
pub mod manager;
pub mod metadata;
pub mod parser;
pub mod registry;
pub mod scheduler;

pub use closure::{ClosureDirection, ClosureEngine, ClosureRequest};
pub use dependency::{DependencyEdge, DependencyGraph, Direction, EdgeKind};
pub use filter::{
    Exclusion, ExclusionReason, FilterOutcome, FilterPolicy, ResolutionFilter, SingletonTieBreak,
};
pub use lifecycle::{
    ConflictPolicy, Outcome, TransitionStateMachine, TransitionTable, TransitionTicket,
};
pub use manager::{
    ExclusionPolicy, ModuleManager, StepOutcome, StepReport, TransitionOptions, TransitionPlan,
    TransitionReport, WorkspaceReport,
};
pub use metadata::{
    module_identity, Availability, Module, ModuleId, ModuleManifest, ModuleState, Requirement,
    Transition, WorkspaceUnit,
};
pub use parser::{ManifestParser, MANIFEST_FILENAME};
pub use registry::ModuleRegistry;
pub use scheduler::{NoopScheduler, ScriptedScheduler, StepFailure, TransitionScheduler};
