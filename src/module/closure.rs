//! 依赖闭包计算
//!
//! 在依赖图快照上计算给定种子模块的闭包。闭包引擎本身无状态，
//! 调用方需先在读锁下克隆出 [`DependencyGraph`]，再在快照上计算。
//!
//! 遍历为广度优先，每一层按标识字符串排序，同一快照上的两次调用结果完全一致。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::module::dependency::{DependencyGraph, Direction};
use crate::module::metadata::{ModuleId, Transition};

/// 闭包方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureDirection {
    /// 种子（传递地）依赖的所有模块，激活种子前需要它们就绪
    Providing,
    /// （传递地）依赖种子的所有模块，停止或卸载种子前需要先处理它们
    Requiring,
    /// Providing ∪ Requiring
    Partial,
    /// 仅种子本身
    Single,
    /// 种子加上两个方向各一层邻居
    Bidirectional,
}

impl ClosureDirection {
    /// 迁移类型对应的闭包方向
    pub fn for_transition(transition: Transition) -> Self {
        match transition {
            Transition::Install | Transition::External => ClosureDirection::Single,
            Transition::Resolve | Transition::Start => ClosureDirection::Providing,
            Transition::Stop
            | Transition::Unresolve
            | Transition::Uninstall
            | Transition::Update => ClosureDirection::Requiring,
            Transition::Refresh => ClosureDirection::Partial,
        }
    }
}

impl std::fmt::Display for ClosureDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClosureDirection::Providing => "providing",
            ClosureDirection::Requiring => "requiring",
            ClosureDirection::Partial => "partial",
            ClosureDirection::Single => "single",
            ClosureDirection::Bidirectional => "bidirectional",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ClosureDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "providing" => Ok(ClosureDirection::Providing),
            "requiring" => Ok(ClosureDirection::Requiring),
            "partial" => Ok(ClosureDirection::Partial),
            "single" => Ok(ClosureDirection::Single),
            "bidirectional" => Ok(ClosureDirection::Bidirectional),
            other => Err(format!("未知的闭包方向: {}", other)),
        }
    }
}

/// 闭包查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureRequest {
    /// 种子模块
    pub seeds: Vec<ModuleId>,
    /// 方向
    pub direction: ClosureDirection,
    /// 结果是否包含种子（由调用点决定）
    pub include_seeds: bool,
}

impl ClosureRequest {
    /// 单个种子的查询，默认不包含种子
    pub fn new(seed: impl Into<ModuleId>, direction: ClosureDirection) -> Self {
        Self {
            seeds: vec![seed.into()],
            direction,
            include_seeds: false,
        }
    }

    /// 多个种子的查询
    pub fn for_set(seeds: Vec<ModuleId>, direction: ClosureDirection) -> Self {
        Self {
            seeds,
            direction,
            include_seeds: false,
        }
    }

    /// 结果包含种子
    pub fn including_seeds(mut self) -> Self {
        self.include_seeds = true;
        self
    }
}

/// 闭包引擎
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosureEngine;

impl ClosureEngine {
    /// 计算闭包
    ///
    /// 不在图中的种子被忽略。包含种子时，种子按排序放在结果最前面。
    pub fn closure_of(graph: &DependencyGraph, request: &ClosureRequest) -> Vec<ModuleId> {
        let mut seeds: Vec<ModuleId> = request
            .seeds
            .iter()
            .filter(|s| graph.contains_module(s))
            .cloned()
            .collect();
        seeds.sort();
        seeds.dedup();

        let reached = match request.direction {
            ClosureDirection::Providing => Self::traverse(graph, &seeds, Direction::Providing),
            ClosureDirection::Requiring => Self::traverse(graph, &seeds, Direction::Requiring),
            ClosureDirection::Partial => {
                let mut reached = Self::traverse(graph, &seeds, Direction::Providing);
                let seen: HashSet<ModuleId> = reached.iter().cloned().collect();
                reached.extend(
                    Self::traverse(graph, &seeds, Direction::Requiring)
                        .into_iter()
                        .filter(|id| !seen.contains(id)),
                );
                reached
            }
            ClosureDirection::Single => Vec::new(),
            ClosureDirection::Bidirectional => Self::one_level(graph, &seeds),
        };

        if request.include_seeds || request.direction == ClosureDirection::Single {
            let mut result = seeds;
            result.extend(reached);
            result
        } else {
            reached
        }
    }

    /// 广度优先遍历，结果不含种子
    ///
    /// 逐层推进，每一层整体排序后追加到结果中。
    fn traverse(graph: &DependencyGraph, seeds: &[ModuleId], direction: Direction) -> Vec<ModuleId> {
        let mut visited: HashSet<ModuleId> = seeds.iter().cloned().collect();
        let mut frontier: Vec<ModuleId> = seeds.to_vec();
        let mut result = Vec::new();

        while !frontier.is_empty() {
            let mut layer: Vec<ModuleId> = frontier
                .iter()
                .flat_map(|current| graph.neighbors(current, direction))
                .filter(|next| visited.insert(next.clone()))
                .collect();
            layer.sort();
            result.extend(layer.iter().cloned());
            frontier = layer;
        }

        result
    }

    /// 两个方向各一层邻居，结果不含种子
    fn one_level(graph: &DependencyGraph, seeds: &[ModuleId]) -> Vec<ModuleId> {
        let mut visited: HashSet<ModuleId> = seeds.iter().cloned().collect();
        let mut result = Vec::new();

        for direction in [Direction::Providing, Direction::Requiring] {
            let mut layer: Vec<ModuleId> = seeds
                .iter()
                .flat_map(|seed| graph.neighbors(seed, direction))
                .filter(|next| visited.insert(next.clone()))
                .collect();
            layer.sort();
            result.extend(layer);
        }

        result
    }
}
