//! 迁移状态机
//!
//! 负责单个模块的状态迁移：校验迁移表、串行化同一模块上的迁移、
//! 提交或回滚结果并发布事件。
//!
//! 一次迁移分三段：
//!
//! 1. `begin` 校验合法性并标记“状态变化中”，返回 [`TransitionTicket`]
//! 2. 调用方在不持有任何共享锁的情况下执行外部副作用
//! 3. `commit` 写入新状态，或 `abort` 恢复迁移前的状态
//!
//! 状态只在提交时改变，因此其他读者要么看到迁移前的状态，要么看到迁移后的状态。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::event::{TransitionEvent, TransitionEventKind, TransitionNotifier};
use crate::module::metadata::{Module, ModuleId, ModuleState, Transition};
use crate::module::registry::ModuleRegistry;
use crate::module::scheduler::StepFailure;
use crate::utils::{CoreError, Result};

/// 迁移表查询结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 迁移到目标状态（可能与当前状态相同，例如 Refresh）
    Move(ModuleState),
    /// 合法但无需任何动作
    NoOp,
    /// 非法迁移
    Illegal,
}

/// 迁移表
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionTable;

impl TransitionTable {
    /// 查询当前状态下请求某个迁移的结果
    pub fn outcome(current: ModuleState, transition: Transition) -> Outcome {
        use ModuleState::*;
        use Outcome::*;

        match (transition, current) {
            (Transition::Install, Uninstalled) => Move(Installed),
            (Transition::Install, _) => NoOp,

            (Transition::Resolve, Uninstalled) => Illegal,
            (Transition::Resolve, Installed) => Move(Resolved),
            (Transition::Resolve, Resolved | Active) => NoOp,

            (Transition::Start, Uninstalled | Installed) => Illegal,
            (Transition::Start, Resolved) => Move(Active),
            (Transition::Start, Active) => NoOp,

            (Transition::Stop, Active) => Move(Resolved),
            (Transition::Stop, _) => Illegal,

            (Transition::Unresolve, Installed) => NoOp,
            (Transition::Unresolve, Resolved) => Move(Installed),
            (Transition::Unresolve, Uninstalled | Active) => Illegal,

            (Transition::Uninstall, Installed) => Move(Uninstalled),
            (Transition::Uninstall, _) => Illegal,

            // 更新清单后需要重新解析
            (Transition::Update, Installed | Resolved) => Move(Installed),
            (Transition::Update, Uninstalled | Active) => Illegal,

            (Transition::Refresh, Uninstalled) => Illegal,
            (Transition::Refresh, state) => Move(state),

            // 外部迁移只能通过 reconcile 对账
            (Transition::External, _) => Illegal,
        }
    }

    /// 迁移是否合法（含 no-op）
    pub fn is_legal(current: ModuleState, transition: Transition) -> bool {
        Self::outcome(current, transition) != Outcome::Illegal
    }

    /// 降级迁移生效的起始状态
    pub fn source_state(transition: Transition) -> Option<ModuleState> {
        match transition {
            Transition::Stop => Some(ModuleState::Active),
            Transition::Unresolve => Some(ModuleState::Resolved),
            Transition::Uninstall => Some(ModuleState::Installed),
            _ => None,
        }
    }
}

/// 同一模块上已有迁移时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// 立即返回 `TransitionInProgress`
    #[default]
    Fail,
    /// 排队等待前一个迁移结束
    Queue,
}

/// 进行中的迁移
///
/// 持有模块的迁移锁，提交或回滚后释放。未经 `commit` 或 `abort` 就被丢弃时
/// （例如执行迁移的 future 被取消），恢复迁移前的状态并发布 `Aborted` 事件，
/// 回滚完成后才释放迁移锁。
#[derive(Debug)]
pub struct TransitionTicket {
    module_id: ModuleId,
    transition: Transition,
    from: ModuleState,
    to: ModuleState,
    previous_transition: Option<Transition>,
    machine: TransitionStateMachine,
    guard: Option<OwnedMutexGuard<()>>,
}

impl TransitionTicket {
    /// 模块标识
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// 迁移类型
    pub fn transition(&self) -> Transition {
        self.transition
    }

    /// 迁移前状态
    pub fn from(&self) -> ModuleState {
        self.from
    }

    /// 目标状态
    pub fn to(&self) -> ModuleState {
        self.to
    }

    /// 已提交或已回滚，释放迁移锁
    fn release(mut self) {
        self.guard.take();
    }

    fn rollback(&self) -> Rollback {
        Rollback {
            module_id: self.module_id.clone(),
            transition: self.transition,
            from: self.from,
            previous_transition: self.previous_transition,
        }
    }
}

impl Drop for TransitionTicket {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };

        let rollback = self.rollback();
        let machine = self.machine.clone();
        let sequence = machine.next_sequence();

        let immediate = machine.registry.try_update(&rollback.module_id, |module| {
            Ok(rollback.restore(module, sequence))
        });
        if let Some(result) = immediate {
            machine.cancelled(&rollback, result);
            drop(guard);
            return;
        }

        // 注册表写锁被占用，在运行时上完成回滚
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let result = machine
                        .registry
                        .update(&rollback.module_id, |module| {
                            Ok(rollback.restore(module, sequence))
                        })
                        .await;
                    machine.cancelled(&rollback, result);
                    drop(guard);
                });
            }
            Err(_) => warn!(
                module_id = %rollback.module_id,
                transition = %rollback.transition,
                "没有可用的运行时，被取消的迁移无法回滚"
            ),
        }
    }
}

/// 被取消的迁移需要恢复的内容
#[derive(Debug)]
struct Rollback {
    module_id: ModuleId,
    transition: Transition,
    from: ModuleState,
    previous_transition: Option<Transition>,
}

impl Rollback {
    fn restore(&self, module: &mut Module, sequence: u64) -> TransitionEvent {
        module.state = self.from;
        module.current_transition = self.previous_transition;
        module.state_changing = false;
        TransitionEvent::new(
            sequence,
            module,
            self.transition,
            self.from,
            TransitionEventKind::Aborted,
        )
    }
}

/// 迁移状态机
///
/// 克隆出的实例共享注册表、通知器和迁移锁。
#[derive(Debug, Clone)]
pub struct TransitionStateMachine {
    registry: ModuleRegistry,
    notifier: TransitionNotifier,
    /// 每个模块一把迁移锁：module_id -> lock
    locks: Arc<Mutex<HashMap<ModuleId, Arc<AsyncMutex<()>>>>>,
    sequence: Arc<AtomicU64>,
}

impl TransitionStateMachine {
    /// 创建状态机
    pub fn new(registry: ModuleRegistry, notifier: TransitionNotifier) -> Self {
        Self {
            registry,
            notifier,
            locks: Arc::new(Mutex::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 获取通知器
    pub fn notifier(&self) -> &TransitionNotifier {
        &self.notifier
    }

    /// 开始迁移
    ///
    /// 合法的 no-op 返回 `Ok(None)`，不产生事件。
    ///
    /// # Errors
    ///
    /// - `ModuleNotFound`
    /// - `IllegalTransition`：状态保持不变
    /// - `TransitionInProgress`：`ConflictPolicy::Fail` 且模块已有迁移在进行
    pub async fn begin(
        &self,
        id: &str,
        transition: Transition,
        policy: ConflictPolicy,
    ) -> Result<Option<TransitionTicket>> {
        let guard = self.acquire(id, policy).await?;

        let started = self
            .registry
            .update(id, |module| {
                let to = match TransitionTable::outcome(module.state, transition) {
                    Outcome::Move(to) => to,
                    Outcome::NoOp => return Ok(None),
                    Outcome::Illegal => {
                        return Err(CoreError::IllegalTransition {
                            module: id.to_string(),
                            current: module.state,
                            requested: transition,
                        })
                    }
                };

                let previous = module.current_transition;
                module.state_changing = true;
                module.current_transition = Some(transition);
                Ok(Some((module.state, to, previous)))
            })
            .await?;

        let Some((from, to, previous_transition)) = started else {
            debug!(module_id = %id, transition = %transition, "迁移无需执行");
            return Ok(None);
        };

        debug!(
            module_id = %id,
            transition = %transition,
            from = %from,
            to = %to,
            "迁移开始"
        );

        Ok(Some(TransitionTicket {
            module_id: id.to_string(),
            transition,
            from,
            to,
            previous_transition,
            machine: self.clone(),
            guard: Some(guard),
        }))
    }

    /// 提交迁移
    ///
    /// 监听器失败只记录日志，不影响提交结果。
    pub async fn commit(&self, ticket: TransitionTicket) -> Result<TransitionEvent> {
        let sequence = self.next_sequence();
        let event = self
            .registry
            .update(&ticket.module_id, |module| {
                module.state = ticket.to;
                module.current_transition = Some(ticket.transition);
                module.state_changing = false;
                Ok(TransitionEvent::new(
                    sequence,
                    module,
                    ticket.transition,
                    ticket.from,
                    TransitionEventKind::Committed,
                ))
            })
            .await?;

        // 先释放迁移锁，排队的请求可以继续
        ticket.release();

        info!(
            module_id = %event.module_id,
            transition = %event.transition,
            state = %event.to_state,
            "迁移已提交"
        );
        self.publish(&event);
        Ok(event)
    }

    /// 回滚迁移
    ///
    /// 状态保持迁移前的值，`current_transition` 恢复为迁移前的值。
    pub async fn abort(
        &self,
        ticket: TransitionTicket,
        failure: StepFailure,
    ) -> Result<TransitionEvent> {
        let kind = match failure {
            StepFailure::Failed(reason) => TransitionEventKind::Failed { reason },
            StepFailure::Aborted => TransitionEventKind::Aborted,
        };

        let sequence = self.next_sequence();
        let event = self
            .registry
            .update(&ticket.module_id, |module| {
                module.state = ticket.from;
                module.current_transition = ticket.previous_transition;
                module.state_changing = false;
                Ok(TransitionEvent::new(
                    sequence,
                    module,
                    ticket.transition,
                    ticket.from,
                    kind,
                ))
            })
            .await?;

        ticket.release();

        warn!(
            module_id = %event.module_id,
            transition = %event.transition,
            reason = event.failure().unwrap_or_default(),
            "迁移已回滚"
        );
        self.publish(&event);
        Ok(event)
    }

    /// 对账外部迁移
    ///
    /// 运行时在本系统之外改变了模块状态（例如进程崩溃）时调用。
    /// 状态一致时返回 `Ok(None)`。
    pub async fn reconcile(
        &self,
        id: &str,
        observed: ModuleState,
        policy: ConflictPolicy,
    ) -> Result<Option<TransitionEvent>> {
        let _guard = self.acquire(id, policy).await?;
        let sequence = self.next_sequence();

        let event = self
            .registry
            .update(id, |module| {
                if module.state == observed {
                    return Ok(None);
                }
                let from = module.state;
                module.state = observed;
                module.current_transition = Some(Transition::External);
                module.state_changing = false;
                Ok(Some(TransitionEvent::new(
                    sequence,
                    module,
                    Transition::External,
                    from,
                    TransitionEventKind::Reconciled,
                )))
            })
            .await?;

        if let Some(ref event) = event {
            info!(
                module_id = %id,
                from = %event.from_state,
                to = %event.to_state,
                "外部迁移已对账"
            );
            self.publish(event);
        }
        Ok(event)
    }

    /// 查询模块状态
    pub async fn state_of(&self, id: &str) -> Result<ModuleState> {
        self.registry
            .lookup(id)
            .await
            .map(|m| m.state)
            .ok_or_else(|| CoreError::ModuleNotFound(id.to_string()))
    }

    /// 模块是否有迁移在进行
    pub async fn is_changing(&self, id: &str) -> bool {
        self.registry
            .lookup(id)
            .await
            .map(|m| m.state_changing)
            .unwrap_or(false)
    }

    /// 丢弃模块的迁移锁（模块取消注册后调用）
    pub fn forget(&self, id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// 获取模块迁移锁
    async fn acquire(&self, id: &str, policy: ConflictPolicy) -> Result<OwnedMutexGuard<()>> {
        if !self.registry.contains(id).await {
            return Err(CoreError::ModuleNotFound(id.to_string()));
        }

        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_string())
            .or_default()
            .clone();

        match policy {
            ConflictPolicy::Queue => Ok(lock.lock_owned().await),
            ConflictPolicy::Fail => match lock.try_lock_owned() {
                Ok(guard) => Ok(guard),
                Err(_) => {
                    let in_flight = self
                        .registry
                        .lookup(id)
                        .await
                        .and_then(|m| m.current_transition);
                    debug!(module_id = %id, "模块已有迁移在进行");
                    Err(CoreError::TransitionInProgress {
                        module: id.to_string(),
                        in_flight,
                    })
                }
            },
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn cancelled(&self, rollback: &Rollback, result: Result<TransitionEvent>) {
        match result {
            Ok(event) => {
                warn!(
                    module_id = %event.module_id,
                    transition = %event.transition,
                    state = %event.to_state,
                    "迁移被取消，已回滚"
                );
                self.publish(&event);
            }
            Err(e) => warn!(
                module_id = %rollback.module_id,
                error = %e,
                "被取消的迁移回滚失败"
            ),
        }
    }

    fn publish(&self, event: &TransitionEvent) {
        if let Err(e) = self.notifier.publish(event) {
            warn!(sequence = event.sequence, error = %e, "迁移事件监听器失败");
        }
    }
}
