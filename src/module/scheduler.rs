//! 迁移调度器接口
//!
//! 迁移的外部副作用（构建、加载、启动运行时等）由调度器执行，
//! 本 crate 只负责决定“做什么、按什么顺序做”，不做任何 I/O。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::module::metadata::{Module, ModuleId, Transition};

/// 单步执行失败
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepFailure {
    /// 调度器报告失败
    #[error("{0}")]
    Failed(String),

    /// 迁移被取消
    #[error("迁移已取消")]
    Aborted,
}

/// 迁移调度器
///
/// 按计划顺序逐个调用 `run_step`。调用期间不持有注册表或依赖图的锁，
/// 实现可以阻塞任意长时间。
#[async_trait]
pub trait TransitionScheduler: Send + Sync {
    /// 执行单个模块的迁移副作用
    async fn run_step(
        &self,
        module: &Module,
        transition: Transition,
    ) -> std::result::Result<(), StepFailure>;

    /// 调度器名称
    fn name(&self) -> &str {
        "scheduler"
    }
}

/// 不执行任何副作用的调度器
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScheduler;

#[async_trait]
impl TransitionScheduler for NoopScheduler {
    async fn run_step(
        &self,
        _module: &Module,
        _transition: Transition,
    ) -> std::result::Result<(), StepFailure> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// 按预设脚本返回结果的调度器
///
/// 记录每一次调用，可为指定模块注入失败或取消，并可模拟耗时。
#[derive(Debug, Clone, Default)]
pub struct ScriptedScheduler {
    failures: HashMap<ModuleId, StepFailure>,
    failing_transition: Option<Transition>,
    delay: Option<Duration>,
    log: Arc<Mutex<Vec<(ModuleId, Transition)>>>,
}

impl ScriptedScheduler {
    /// 创建空脚本
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定模块执行失败
    pub fn fail(mut self, id: impl Into<ModuleId>, reason: impl Into<String>) -> Self {
        self.failures
            .insert(id.into(), StepFailure::Failed(reason.into()));
        self
    }

    /// 指定模块执行被取消
    pub fn abort(mut self, id: impl Into<ModuleId>) -> Self {
        self.failures.insert(id.into(), StepFailure::Aborted);
        self
    }

    /// 注入的失败只在指定迁移上生效
    pub fn only_on(mut self, transition: Transition) -> Self {
        self.failing_transition = Some(transition);
        self
    }

    /// 每一步的模拟耗时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已执行的步骤（按调用顺序）
    pub fn calls(&self) -> Vec<(ModuleId, Transition)> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl TransitionScheduler for ScriptedScheduler {
    async fn run_step(
        &self,
        module: &Module,
        transition: Transition,
    ) -> std::result::Result<(), StepFailure> {
        let id = module.id();
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id.clone(), transition));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_transition.is_some_and(|t| t != transition) {
            return Ok(());
        }
        match self.failures.get(&id) {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
