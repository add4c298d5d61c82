//! 迁移事件数据结构
//!
//! 事件在发布时携带所需字段的快照，监听器无需回查注册表。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::module::metadata::{Module, ModuleId, ModuleState, Transition, WorkspaceUnit};

/// 事件类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionEventKind {
    /// 迁移已提交
    Committed,
    /// 调度器报告失败，状态已回滚
    Failed {
        /// 失败原因
        reason: String,
    },
    /// 迁移被取消，状态已回滚
    Aborted,
    /// 外部迁移已对账
    Reconciled,
}

/// 迁移事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// 事件唯一标识
    pub event_id: String,

    /// 单调递增的发布序号
    pub sequence: u64,

    /// 模块标识
    pub module_id: ModuleId,

    /// 模块符号名
    pub symbolic_name: String,

    /// 迁移类型
    pub transition: Transition,

    /// 迁移前状态
    pub from_state: ModuleState,

    /// 迁移后状态（失败时等于迁移前状态）
    pub to_state: ModuleState,

    /// 发布时模块的“状态变化中”标记
    pub state_changing: bool,

    /// 所属工作区单元
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<WorkspaceUnit>,

    /// 事件类型
    #[serde(flatten)]
    pub kind: TransitionEventKind,

    /// 事件时间戳
    pub timestamp: DateTime<Utc>,
}

impl TransitionEvent {
    /// 根据模块快照创建事件
    pub fn new(
        sequence: u64,
        module: &Module,
        transition: Transition,
        from_state: ModuleState,
        kind: TransitionEventKind,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            sequence,
            module_id: module.id(),
            symbolic_name: module.symbolic_name().to_string(),
            transition,
            from_state,
            to_state: module.state,
            state_changing: module.state_changing,
            unit: module.unit.clone(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// 迁移是否成功提交
    pub fn is_committed(&self) -> bool {
        matches!(
            self.kind,
            TransitionEventKind::Committed | TransitionEventKind::Reconciled
        )
    }

    /// 失败原因（如有）
    pub fn failure(&self) -> Option<&str> {
        match self.kind {
            TransitionEventKind::Failed { ref reason } => Some(reason),
            TransitionEventKind::Aborted => Some("aborted"),
            _ => None,
        }
    }
}
