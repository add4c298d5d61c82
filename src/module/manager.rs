//! 模块管理器
//!
//! 整合注册表、依赖图、闭包引擎、解析过滤器和迁移状态机，
//! 对外提供“请求一次迁移”的完整流程：
//!
//! 1. 校验请求的合法性
//! 2. 按迁移类型展开闭包
//! 3. 过滤候选集合
//! 4. 按依赖顺序交给调度器逐个执行
//! 5. 每一步提交或回滚，并通过通知器发布事件

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn, Instrument};

use super::closure::{ClosureDirection, ClosureEngine, ClosureRequest};
use super::dependency::DependencyGraph;
use super::filter::{Exclusion, ExclusionReason, ResolutionFilter};
use super::lifecycle::{ConflictPolicy, Outcome, TransitionStateMachine, TransitionTable};
use super::metadata::{
    Availability, Module, ModuleId, ModuleManifest, ModuleState, Transition, WorkspaceUnit,
};
use super::registry::ModuleRegistry;
use super::scheduler::{NoopScheduler, StepFailure, TransitionScheduler};
use crate::core::config::{CoreConfig, WorkspaceConfig};
use crate::core::preferences::{PreferenceProviderTable, Preferences};
use crate::event::{TransitionEvent, TransitionNotifier};
use crate::utils::{CoreError, Result};

/// 过滤器排除了部分模块时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionPolicy {
    /// 以缩减后的集合继续
    #[default]
    ProceedReduced,
    /// 整个请求中止
    Abort,
}

/// 执行选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionOptions {
    /// 同一模块已有迁移时的处理
    pub conflict: ConflictPolicy,
    /// 首个失败后是否取消剩余步骤
    pub abort_on_first_failure: bool,
    /// 过滤排除的处理
    pub exclusion: ExclusionPolicy,
}

impl TransitionOptions {
    /// 从偏好设置读取
    pub fn from_preferences(preferences: &Preferences) -> Self {
        Self {
            conflict: preferences.conflict_policy(),
            abort_on_first_failure: preferences.abort_on_first_failure(),
            exclusion: ExclusionPolicy::ProceedReduced,
        }
    }

    /// 设置排除处理方式
    pub fn with_exclusion(mut self, exclusion: ExclusionPolicy) -> Self {
        self.exclusion = exclusion;
        self
    }
}

/// 迁移计划
///
/// 计划只是建议：执行时每一步仍会重新校验。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPlan {
    /// 迁移类型
    pub transition: Transition,
    /// 请求的种子模块
    pub seeds: Vec<ModuleId>,
    /// 按执行顺序排列的步骤
    pub steps: Vec<ModuleId>,
    /// 无需执行的成员（已处于目标状态或更低）
    pub skipped: Vec<ModuleId>,
    /// 被过滤器排除的成员
    pub exclusions: Vec<Exclusion>,
}

impl TransitionPlan {
    fn empty(transition: Transition) -> Self {
        Self {
            transition,
            seeds: Vec::new(),
            steps: Vec::new(),
            skipped: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    /// 是否没有任何排除
    pub fn is_clean(&self) -> bool {
        self.exclusions.is_empty()
    }

    /// 是否无事可做
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// 单步结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// 已提交
    Committed {
        /// 迁移前状态
        from: ModuleState,
        /// 迁移后状态
        to: ModuleState,
    },
    /// 执行时已无需迁移
    NoOp,
    /// 调度器报告失败，已回滚
    Failed {
        /// 失败原因
        reason: String,
    },
    /// 调度器取消，已回滚
    Aborted,
    /// 执行时校验未通过（状态在计划之后发生了变化）
    Rejected {
        /// 错误描述
        error: String,
    },
    /// 因前面的失败而未执行
    Cancelled,
}

/// 单步报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// 模块标识
    pub module_id: ModuleId,
    /// 结果
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// 迁移执行报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionReport {
    /// 迁移类型
    pub transition: Transition,
    /// 各步骤结果（按执行顺序）
    pub steps: Vec<StepReport>,
    /// 计划阶段的排除
    pub exclusions: Vec<Exclusion>,
    /// 发布的事件
    pub events: Vec<TransitionEvent>,
}

impl TransitionReport {
    /// 所有步骤是否都成功（或无需执行）
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(|s| {
            matches!(
                s.outcome,
                StepOutcome::Committed { .. } | StepOutcome::NoOp
            )
        })
    }

    /// 已提交的模块
    pub fn committed(&self) -> Vec<&ModuleId> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Committed { .. }))
            .map(|s| &s.module_id)
            .collect()
    }

    /// 调度器报告的失败
    pub fn failures(&self) -> Vec<CoreError> {
        self.steps
            .iter()
            .filter_map(|s| {
                let reason = match s.outcome {
                    StepOutcome::Failed { ref reason } => reason.clone(),
                    StepOutcome::Aborted => StepFailure::Aborted.to_string(),
                    _ => return None,
                };
                Some(CoreError::ExternalTransitionFailure {
                    module: s.module_id.clone(),
                    transition: self.transition,
                    reason,
                })
            })
            .collect()
    }
}

/// 工作区检查结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceReport {
    /// 模块数量
    pub modules: usize,
    /// 依赖边数量
    pub edges: usize,
    /// 找到的一个循环（如有）
    pub cycle: Option<Vec<ModuleId>>,
    /// 无法满足的必需依赖
    pub unsatisfied: Vec<(ModuleId, Vec<String>)>,
}

impl WorkspaceReport {
    /// 是否没有问题
    pub fn is_healthy(&self) -> bool {
        self.cycle.is_none() && self.unsatisfied.is_empty()
    }
}

/// 成员在计划中的处理方式
enum Disposition {
    Step,
    Skip,
    Reject,
}

/// 模块管理器
///
/// 所有组件在构造时显式注入，克隆出的实例共享同一份状态。
#[derive(Clone)]
pub struct ModuleManager {
    /// 模块注册表
    registry: ModuleRegistry,
    /// 依赖图
    graph: Arc<RwLock<DependencyGraph>>,
    /// 迁移状态机
    machine: TransitionStateMachine,
    /// 调度器
    scheduler: Arc<dyn TransitionScheduler>,
    /// 偏好设置
    preferences: Preferences,
}

impl ModuleManager {
    /// 创建模块管理器
    pub fn new(
        registry: ModuleRegistry,
        notifier: TransitionNotifier,
        scheduler: Arc<dyn TransitionScheduler>,
        preferences: Preferences,
    ) -> Self {
        let machine = TransitionStateMachine::new(registry.clone(), notifier);
        Self {
            registry,
            graph: Arc::new(RwLock::new(DependencyGraph::new())),
            machine,
            scheduler,
            preferences,
        }
    }

    /// 使用默认组件创建（空注册表、无操作调度器、默认偏好）
    pub fn with_defaults() -> Self {
        Self::new(
            ModuleRegistry::new(),
            TransitionNotifier::new(),
            Arc::new(NoopScheduler),
            Preferences::default(),
        )
    }

    /// 按配置创建，偏好提供者通过注册表解析一次
    pub fn from_config(
        config: &CoreConfig,
        table: &PreferenceProviderTable,
        scheduler: Arc<dyn TransitionScheduler>,
    ) -> Result<Self> {
        let preferences = Preferences::from_config(config, table)?;
        info!(
            provider = %preferences.provider_name(),
            scheduler = %scheduler.name(),
            "创建模块管理器"
        );
        Ok(Self::new(
            ModuleRegistry::new(),
            TransitionNotifier::new(),
            scheduler,
            preferences,
        ))
    }

    /// 获取注册表
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// 获取通知器
    pub fn notifier(&self) -> &TransitionNotifier {
        self.machine.notifier()
    }

    /// 获取状态机
    pub fn state_machine(&self) -> &TransitionStateMachine {
        &self.machine
    }

    /// 获取偏好设置
    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// 获取依赖图快照
    pub async fn graph_snapshot(&self) -> DependencyGraph {
        self.graph.read().await.clone()
    }

    // ==================== 注册 ====================

    /// 注册工作区单元
    pub async fn register_unit(
        &self,
        unit: WorkspaceUnit,
        manifest: ModuleManifest,
    ) -> Result<Module> {
        let mut graph = self.graph.write().await;
        let module = self.registry.register(unit, manifest).await?;
        self.rebuild_locked(&mut graph).await;
        Ok(module)
    }

    /// 注册工作区外部模块
    pub async fn register_external(&self, manifest: ModuleManifest) -> Result<Module> {
        let mut graph = self.graph.write().await;
        let module = self.registry.register_external(manifest).await?;
        self.rebuild_locked(&mut graph).await;
        Ok(module)
    }

    /// 扫描目录并注册发现的模块
    pub async fn scan(&self, dirs: &[PathBuf]) -> Result<Vec<Module>> {
        let mut graph = self.graph.write().await;
        let result = self.registry.scan(dirs).await;
        // 扫描中途失败时已注册的模块仍需进入依赖图
        self.rebuild_locked(&mut graph).await;
        result
    }

    /// 取消注册模块，同时移除它的所有依赖边
    pub async fn unregister(&self, id: &str) -> Result<Module> {
        let mut graph = self.graph.write().await;
        let module = self.registry.unregister(id).await?;
        self.machine.forget(id);
        self.rebuild_locked(&mut graph).await;
        info!(module_id = %id, "模块已取消注册");
        Ok(module)
    }

    /// 更新模块清单并重建依赖图
    pub async fn update_manifest(&self, id: &str, manifest: ModuleManifest) -> Result<Module> {
        let mut graph = self.graph.write().await;
        let module = self.registry.update_manifest(id, manifest).await?;
        if module.id() != id {
            self.machine.forget(id);
        }
        self.rebuild_locked(&mut graph).await;
        Ok(module)
    }

    /// 设置构建错误标记
    pub async fn set_build_error(&self, id: &str, build_error: bool) -> Result<()> {
        self.registry.set_build_error(id, build_error).await
    }

    /// 设置工作区激活标记
    pub async fn set_availability(&self, id: &str, availability: Availability) -> Result<()> {
        self.registry.set_availability(id, availability).await
    }

    /// 按工作区描述加载模块
    ///
    /// 标记中引用的未知模块只记录警告。
    #[instrument(skip(self, workspace))]
    pub async fn load_workspace(&self, workspace: &WorkspaceConfig) -> Result<usize> {
        let mut graph = self.graph.write().await;
        let loaded = self.load_locked(workspace).await;
        self.rebuild_locked(&mut graph).await;
        loaded?;

        let count = self.registry.count().await;
        info!(count, "工作区已加载");
        Ok(count)
    }

    async fn load_locked(&self, workspace: &WorkspaceConfig) -> Result<()> {
        self.registry.scan(&workspace.module_dirs).await?;
        for manifest in &workspace.external {
            self.registry.register_external(manifest.clone()).await?;
        }

        for id in &workspace.deactivated {
            if let Err(e) = self
                .registry
                .set_availability(id, Availability::Deactivated)
                .await
            {
                warn!(module_id = %id, error = %e, "无法去激活模块");
            }
        }
        for id in &workspace.build_errors {
            if let Err(e) = self.registry.set_build_error(id, true).await {
                warn!(module_id = %id, error = %e, "无法标记构建错误");
            }
        }
        Ok(())
    }

    /// 根据注册表重建依赖图
    pub async fn rebuild_graph(&self) {
        let mut graph = self.graph.write().await;
        self.rebuild_locked(&mut graph).await;
    }

    /// 在持有依赖图写锁时重建
    ///
    /// 注册表变更与重建处于同一临界区，依赖图始终对应最新的注册表。
    async fn rebuild_locked(&self, graph: &mut DependencyGraph) {
        let modules = self.registry.all().await;
        let rebuilt = DependencyGraph::rebuild(&modules);

        if let Some(cycle) = rebuilt.find_cycle() {
            debug!(cycle = %cycle.join(" -> "), "依赖图中存在循环");
        }

        *graph = rebuilt;
    }

    /// 检查工作区
    pub async fn check(&self) -> WorkspaceReport {
        let graph = self.graph_snapshot().await;
        let unsatisfied = graph
            .all_modules()
            .into_iter()
            .filter_map(|id| {
                let missing = graph.unsatisfied(&id);
                (!missing.is_empty()).then_some((id, missing))
            })
            .collect();

        WorkspaceReport {
            modules: graph.module_count(),
            edges: graph.edge_count(),
            cycle: graph.find_cycle(),
            unsatisfied,
        }
    }

    // ==================== 闭包 ====================

    /// 计算闭包
    ///
    /// # Errors
    ///
    /// 任一种子未注册时返回 `ModuleNotFound`
    pub async fn closure(
        &self,
        seeds: &[ModuleId],
        direction: ClosureDirection,
        include_seeds: bool,
    ) -> Result<Vec<ModuleId>> {
        let graph = self.graph_snapshot().await;
        if let Some(missing) = seeds.iter().find(|s| !graph.contains_module(s)) {
            return Err(CoreError::ModuleNotFound(missing.clone()));
        }

        let mut request = ClosureRequest::for_set(seeds.to_vec(), direction);
        if include_seeds {
            request = request.including_seeds();
        }
        Ok(ClosureEngine::closure_of(&graph, &request))
    }

    // ==================== 迁移 ====================

    /// 制定迁移计划
    ///
    /// 同步校验，不修改任何状态。
    ///
    /// # Errors
    ///
    /// - `ModuleNotFound`：种子未注册
    /// - `IllegalTransition`：种子或闭包成员在当前状态下无法执行该迁移
    /// - `TransitionInProgress`：冲突策略为 Fail 且成员已有迁移在进行
    #[instrument(skip(self, transition), fields(transition = %transition))]
    pub async fn plan(&self, seeds: &[ModuleId], transition: Transition) -> Result<TransitionPlan> {
        let mut plan = TransitionPlan::empty(transition);
        if seeds.is_empty() {
            return Ok(plan);
        }

        // 持有依赖图读锁时读取注册表，两份快照彼此一致
        let (graph, modules) = {
            let graph = self.graph.read().await;
            let modules: HashMap<ModuleId, Module> =
                self.registry.all().await.into_iter().map(|m| (m.id(), m)).collect();
            (graph.clone(), modules)
        };

        let mut seed_ids: Vec<ModuleId> = seeds.to_vec();
        seed_ids.sort();
        seed_ids.dedup();

        let fail_on_conflict = self.preferences.conflict_policy() == ConflictPolicy::Fail;

        for id in &seed_ids {
            let module = modules
                .get(id)
                .ok_or_else(|| CoreError::ModuleNotFound(id.clone()))?;
            if fail_on_conflict && module.state_changing {
                return Err(CoreError::TransitionInProgress {
                    module: id.clone(),
                    in_flight: module.current_transition,
                });
            }
            if TransitionTable::outcome(module.state, transition) == Outcome::Illegal {
                return Err(CoreError::IllegalTransition {
                    module: id.clone(),
                    current: module.state,
                    requested: transition,
                });
            }
        }
        plan.seeds = seed_ids.clone();

        let lazy_start = transition == Transition::Start && !self.preferences.eager_activation();
        let direction = if lazy_start {
            ClosureDirection::Single
        } else {
            ClosureDirection::for_transition(transition)
        };

        if lazy_start {
            // 只启动种子，依赖必须已解析
            let providers = ClosureEngine::closure_of(
                &graph,
                &ClosureRequest::for_set(seed_ids.clone(), ClosureDirection::Providing),
            );
            for id in providers {
                if let Some(module) = modules.get(&id) {
                    if !module.state.is_resolved() {
                        return Err(CoreError::IllegalTransition {
                            module: id,
                            current: module.state,
                            requested: transition,
                        });
                    }
                }
            }
        }

        let members = ClosureEngine::closure_of(
            &graph,
            &ClosureRequest::for_set(seed_ids, direction).including_seeds(),
        );

        let mut candidates = Vec::new();
        for id in members {
            let Some(module) = modules.get(&id) else {
                continue;
            };
            match Self::disposition(module.state, transition) {
                Disposition::Step => {
                    if fail_on_conflict && module.state_changing {
                        return Err(CoreError::TransitionInProgress {
                            module: id,
                            in_flight: module.current_transition,
                        });
                    }
                    candidates.push(id);
                }
                Disposition::Skip => plan.skipped.push(id),
                Disposition::Reject => {
                    return Err(CoreError::IllegalTransition {
                        module: id,
                        current: module.state,
                        requested: transition,
                    })
                }
            }
        }

        let accepted = if transition.resolves() {
            let filter = ResolutionFilter::new(self.preferences.filter_policy());
            let outcome = filter.filter(&candidates, &modules, &graph);
            plan.exclusions = outcome.exclusions;
            Self::exclude_unsatisfied(outcome.accepted, &graph, &mut plan.exclusions)
        } else {
            candidates
        };

        plan.steps = graph.order_within(&accepted, !transition.is_downward());

        debug!(
            steps = plan.steps.len(),
            skipped = plan.skipped.len(),
            excluded = plan.exclusions.len(),
            "迁移计划已生成"
        );
        Ok(plan)
    }

    /// 执行迁移计划
    ///
    /// 调度器运行期间不持有注册表或依赖图的锁。单步失败会回滚并记录在报告中，
    /// 其余步骤继续执行，除非 `abort_on_first_failure`。
    #[instrument(skip(self, plan), fields(transition = %plan.transition, steps = plan.steps.len()))]
    pub async fn execute(
        &self,
        plan: TransitionPlan,
        options: TransitionOptions,
    ) -> Result<TransitionReport> {
        let transition = plan.transition;
        let mut report = TransitionReport {
            transition,
            steps: Vec::with_capacity(plan.steps.len()),
            exclusions: plan.exclusions,
            events: Vec::new(),
        };

        let mut cancelled = false;
        for id in plan.steps {
            if cancelled {
                report.steps.push(StepReport {
                    module_id: id,
                    outcome: StepOutcome::Cancelled,
                });
                continue;
            }

            let outcome = self
                .run_step(&id, transition, options, &mut report.events)
                .await?;
            if options.abort_on_first_failure
                && matches!(
                    outcome,
                    StepOutcome::Failed { .. }
                        | StepOutcome::Aborted
                        | StepOutcome::Rejected { .. }
                )
            {
                warn!(module_id = %id, "迁移失败，取消剩余步骤");
                cancelled = true;
            }
            report.steps.push(StepReport {
                module_id: id,
                outcome,
            });
        }

        info!(
            committed = report.committed().len(),
            failed = report.failures().len(),
            "迁移执行完成"
        );
        Ok(report)
    }

    /// 请求迁移：计划、处理排除、执行
    pub async fn request_transition(
        &self,
        seeds: &[ModuleId],
        transition: Transition,
    ) -> Result<TransitionReport> {
        let options = TransitionOptions::from_preferences(&self.preferences);
        self.request_transition_with(seeds, transition, options).await
    }

    /// 使用指定选项请求迁移
    ///
    /// # Errors
    ///
    /// 除 `plan` 的错误外，`ExclusionPolicy::Abort` 时若有排除，返回第一个排除对应的错误
    #[instrument(skip(self, transition, options), fields(transition = %transition))]
    pub async fn request_transition_with(
        &self,
        seeds: &[ModuleId],
        transition: Transition,
        options: TransitionOptions,
    ) -> Result<TransitionReport> {
        let plan = self.plan(seeds, transition).await?;

        if options.exclusion == ExclusionPolicy::Abort {
            if let Some(first) = plan.exclusions.first() {
                let name = self
                    .registry
                    .lookup(&first.module)
                    .await
                    .map(|m| m.symbolic_name().to_string())
                    .unwrap_or_else(|| first.module.clone());
                warn!(
                    module_id = %first.module,
                    reason = %first.reason,
                    "存在被排除的模块，中止迁移"
                );
                return Err(first.to_error(&name));
            }
        }

        self.execute(plan, options).await
    }

    /// 对账外部迁移
    pub async fn reconcile(
        &self,
        id: &str,
        observed: ModuleState,
    ) -> Result<Option<TransitionEvent>> {
        self.machine
            .reconcile(id, observed, self.preferences.conflict_policy())
            .await
    }

    /// 批量对账，不同模块并行处理
    pub async fn reconcile_batch(
        &self,
        observations: Vec<(ModuleId, ModuleState)>,
    ) -> Vec<Result<Option<TransitionEvent>>> {
        let tasks = observations
            .iter()
            .map(|(id, observed)| self.reconcile(id, *observed));
        join_all(tasks).await
    }

    // ==================== 内部方法 ====================

    async fn run_step(
        &self,
        id: &str,
        transition: Transition,
        options: TransitionOptions,
        events: &mut Vec<TransitionEvent>,
    ) -> Result<StepOutcome> {
        let ticket = match self.machine.begin(id, transition, options.conflict).await {
            Ok(Some(ticket)) => ticket,
            Ok(None) => return Ok(StepOutcome::NoOp),
            Err(e) if e.is_rejection() => {
                warn!(module_id = %id, error = %e, "执行时校验未通过");
                return Ok(StepOutcome::Rejected {
                    error: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        let Some(module) = self.registry.lookup(id).await else {
            self.machine.abort(ticket, StepFailure::Aborted).await?;
            return Err(CoreError::ModuleNotFound(id.to_string()));
        };

        // 调度器运行期间不持有任何共享锁
        let span = crate::step_span!(id, transition);
        match self
            .scheduler
            .run_step(&module, transition)
            .instrument(span)
            .await
        {
            Ok(()) => {
                let from = ticket.from();
                let to = ticket.to();
                events.push(self.machine.commit(ticket).await?);
                Ok(StepOutcome::Committed { from, to })
            }
            Err(failure) => {
                let outcome = match failure {
                    StepFailure::Failed(ref reason) => StepOutcome::Failed {
                        reason: reason.clone(),
                    },
                    StepFailure::Aborted => StepOutcome::Aborted,
                };
                events.push(self.machine.abort(ticket, failure).await?);
                Ok(outcome)
            }
        }
    }

    /// 闭包成员的处理方式
    fn disposition(state: ModuleState, transition: Transition) -> Disposition {
        match TransitionTable::outcome(state, transition) {
            Outcome::Move(_) => Disposition::Step,
            Outcome::NoOp => Disposition::Skip,
            Outcome::Illegal => {
                if let Some(source) = TransitionTable::source_state(transition) {
                    // 已低于降级的起点，无需处理；高于起点则必须先降级
                    if state.rank() < source.rank() {
                        Disposition::Skip
                    } else {
                        Disposition::Reject
                    }
                } else if matches!(transition, Transition::Update | Transition::Refresh)
                    && state == ModuleState::Uninstalled
                {
                    Disposition::Skip
                } else {
                    Disposition::Reject
                }
            }
        }
    }

    /// 排除存在未满足硬依赖的模块及其在集合内的依赖方
    fn exclude_unsatisfied(
        accepted: Vec<ModuleId>,
        graph: &DependencyGraph,
        exclusions: &mut Vec<Exclusion>,
    ) -> Vec<ModuleId> {
        let accepted_set: HashSet<&ModuleId> = accepted.iter().collect();
        let mut excluded: HashSet<ModuleId> = HashSet::new();

        for id in &accepted {
            let missing = graph.unsatisfied(id);
            if missing.is_empty() {
                continue;
            }

            let affected = ClosureEngine::closure_of(
                graph,
                &ClosureRequest::new(id.clone(), ClosureDirection::Requiring).including_seeds(),
            );
            for member in affected.into_iter().filter(|m| accepted_set.contains(m)) {
                if excluded.insert(member.clone()) {
                    let reason = if &member == id {
                        ExclusionReason::UnsatisfiedDependency {
                            missing: missing.clone(),
                        }
                    } else {
                        ExclusionReason::UnsatisfiedDependency {
                            missing: vec![id.clone()],
                        }
                    };
                    exclusions.push(Exclusion {
                        module: member,
                        reason,
                    });
                }
            }
        }

        accepted
            .into_iter()
            .filter(|id| !excluded.contains(id))
            .collect()
    }
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("scheduler", &self.scheduler.name())
            .field("preferences", &self.preferences.provider_name())
            .finish()
    }
}
