//! 模块依赖管理
//!
//! 本模块提供已注册模块之间 provide/require 关系的有向图。
//!
//! # 主要组件
//!
//! - [`DependencyGraph`] - 依赖关系图，邻接表按标识排序，遍历顺序可复现
//! - [`DependencyEdge`] - 一条 (provider, requirer, kind) 边
//!
//! # 示例
//!
//! ```rust
//! use bundle_core::module::dependency::{DependencyGraph, Direction, EdgeKind};
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_module("app");
//! graph.add_module("lib");
//! graph.add_edge("lib", "app", EdgeKind::Hard).unwrap();
//!
//! assert_eq!(graph.neighbors("app", Direction::Providing), vec!["lib".to_string()]);
//! assert!(!graph.has_cycle());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::module::metadata::{Module, ModuleId};
use crate::utils::{CoreError, Result};

/// 依赖边类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// 必需依赖
    Hard,
    /// 可选依赖
    Optional,
}

/// 邻居方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 沿依赖方向：该模块所依赖的提供者
    Providing,
    /// 逆依赖方向：依赖该模块的模块
    Requiring,
}

/// 依赖边
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// 提供者
    pub provider: ModuleId,
    /// 依赖方
    pub requirer: ModuleId,
    /// 边类型
    pub kind: EdgeKind,
}

/// 模块依赖关系图
///
/// 图只引用模块标识，不持有模块本身。
/// 任何边的两端都必须是图中的节点，移除节点时同时移除相关边。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 正向边：依赖方 -> (提供者 -> 边类型)
    providers: BTreeMap<ModuleId, BTreeMap<ModuleId, EdgeKind>>,
    /// 反向边：提供者 -> (依赖方 -> 边类型)
    requirers: BTreeMap<ModuleId, BTreeMap<ModuleId, EdgeKind>>,
    /// 无法满足的必需依赖：模块 -> 缺失的符号名
    unsatisfied: BTreeMap<ModuleId, Vec<String>>,
}

impl DependencyGraph {
    /// 创建一个空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 根据模块清单重建整张图
    ///
    /// 每条依赖绑定到符号名相同、版本满足范围的最高版本模块；
    /// 多个候选都没有版本时取标识最小者。
    pub fn rebuild(modules: &[Module]) -> Self {
        let mut graph = Self::new();
        for module in modules {
            graph.add_module(&module.id());
        }
        for module in modules {
            graph.bind_requirements(module, modules);
        }
        graph
    }

    /// 重新计算单个模块的出边（对其依赖的绑定）
    pub fn bind_requirements(&mut self, module: &Module, candidates: &[Module]) {
        let requirer = module.id();
        self.clear_provider_edges(&requirer);
        self.add_module(&requirer);

        let mut missing = Vec::new();
        for req in &module.manifest.requires {
            let provider = candidates
                .iter()
                .filter(|c| c.symbolic_name() == req.name && req.matches(c.version()))
                .filter(|c| self.contains_module(&c.id()))
                .max_by(|a, b| a.version().cmp(&b.version()).then_with(|| b.id().cmp(&a.id())));

            match provider {
                Some(provider) => {
                    let kind = if req.optional {
                        EdgeKind::Optional
                    } else {
                        EdgeKind::Hard
                    };
                    // 两端都已在图中，不会失败
                    let _ = self.add_edge(&provider.id(), &requirer, kind);
                }
                None if !req.optional => missing.push(req.name.clone()),
                None => {}
            }
        }

        if missing.is_empty() {
            self.unsatisfied.remove(&requirer);
        } else {
            tracing::debug!(module_id = %requirer, missing = ?missing, "存在无法满足的必需依赖");
            self.unsatisfied.insert(requirer, missing);
        }
    }

    /// 添加模块节点到图中
    ///
    /// 如果模块已存在，则不会重复添加。
    pub fn add_module(&mut self, id: &str) {
        self.providers.entry(id.to_string()).or_default();
        self.requirers.entry(id.to_string()).or_default();
    }

    /// 添加依赖边：`requirer` 依赖 `provider`
    ///
    /// # Errors
    ///
    /// 任一端不在图中时返回 `ModuleNotFound`，图保持不变。
    pub fn add_edge(&mut self, provider: &str, requirer: &str, kind: EdgeKind) -> Result<()> {
        for id in [provider, requirer] {
            if !self.contains_module(id) {
                return Err(CoreError::ModuleNotFound(id.to_string()));
            }
        }
        if provider == requirer {
            return Ok(());
        }

        if let Some(edges) = self.providers.get_mut(requirer) {
            edges.insert(provider.to_string(), kind);
        }
        if let Some(edges) = self.requirers.get_mut(provider) {
            edges.insert(requirer.to_string(), kind);
        }
        Ok(())
    }

    /// 移除单条依赖边
    pub fn remove_edge(&mut self, provider: &str, requirer: &str) {
        if let Some(edges) = self.providers.get_mut(requirer) {
            edges.remove(provider);
        }
        if let Some(edges) = self.requirers.get_mut(provider) {
            edges.remove(requirer);
        }
    }

    /// 移除模块节点及所有引用它的边
    ///
    /// 依赖被移除模块的其他模块，其绑定不会自动转移到别的版本，
    /// 需要调用 [`DependencyGraph::bind_requirements`] 或 [`DependencyGraph::rebuild`]。
    ///
    /// # Returns
    ///
    /// 被移除的边数
    pub fn remove_edges_for(&mut self, id: &str) -> usize {
        let mut removed = 0;

        if let Some(providers) = self.providers.remove(id) {
            for provider in providers.keys() {
                if let Some(edges) = self.requirers.get_mut(provider) {
                    edges.remove(id);
                }
            }
            removed += providers.len();
        }

        if let Some(requirers) = self.requirers.remove(id) {
            for requirer in requirers.keys() {
                if let Some(edges) = self.providers.get_mut(requirer) {
                    edges.remove(id);
                }
            }
            removed += requirers.len();
        }

        self.unsatisfied.remove(id);
        removed
    }

    /// 清除模块的出边（它对提供者的绑定）
    fn clear_provider_edges(&mut self, requirer: &str) {
        let providers: Vec<ModuleId> = self
            .providers
            .get(requirer)
            .map(|edges| edges.keys().cloned().collect())
            .unwrap_or_default();
        for provider in providers {
            self.remove_edge(&provider, requirer);
        }
    }

    /// 获取直接邻居，按标识排序
    ///
    /// 模块不在图中时返回空列表。
    pub fn neighbors(&self, id: &str, direction: Direction) -> Vec<ModuleId> {
        let side = match direction {
            Direction::Providing => &self.providers,
            Direction::Requiring => &self.requirers,
        };
        side.get(id)
            .map(|edges| edges.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// 获取与模块相关的所有边
    pub fn edges_for(&self, id: &str) -> Vec<DependencyEdge> {
        let mut edges = Vec::new();
        if let Some(providers) = self.providers.get(id) {
            for (provider, kind) in providers {
                edges.push(DependencyEdge {
                    provider: provider.clone(),
                    requirer: id.to_string(),
                    kind: *kind,
                });
            }
        }
        if let Some(requirers) = self.requirers.get(id) {
            for (requirer, kind) in requirers {
                edges.push(DependencyEdge {
                    provider: id.to_string(),
                    requirer: requirer.clone(),
                    kind: *kind,
                });
            }
        }
        edges
    }

    /// 查询边类型
    pub fn edge_kind(&self, provider: &str, requirer: &str) -> Option<EdgeKind> {
        self.providers
            .get(requirer)
            .and_then(|edges| edges.get(provider))
            .copied()
    }

    /// 模块无法满足的必需依赖（符号名列表）
    pub fn unsatisfied(&self, id: &str) -> Vec<String> {
        self.unsatisfied.get(id).cloned().unwrap_or_default()
    }

    /// 检测是否存在循环依赖
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// 查找循环依赖路径
    ///
    /// 如果存在循环，返回闭合的模块路径（首尾相同）；否则返回 `None`。
    pub fn find_cycle(&self) -> Option<Vec<ModuleId>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in self.providers.keys() {
            if let Some(cycle) = self.find_cycle_util(node, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(cycle);
            }
        }

        None
    }

    /// 查找循环的辅助函数（DFS）
    fn find_cycle_util(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if rec_stack.contains(node) {
            let start = path.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }

        if visited.contains(node) {
            return None;
        }

        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(neighbors) = self.providers.get(node) {
            for neighbor in neighbors.keys() {
                if let Some(cycle) = self.find_cycle_util(neighbor, visited, rec_stack, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }

    /// 在给定成员集合内做拓扑排序（Kahn 算法）
    ///
    /// 只考虑两端都在集合内的边。入度同时为零的成员按其在 `members` 中的位置输出；
    /// 处于环上的成员无法排序，按原位置追加在末尾。
    ///
    /// # 参数
    ///
    /// * `members` - 待排序成员（通常是一次闭包计算的结果）
    /// * `dependencies_first` - 为 `true` 时提供者在前，为 `false` 时依赖方在前
    pub fn order_within(&self, members: &[ModuleId], dependencies_first: bool) -> Vec<ModuleId> {
        let position: HashMap<&str, usize> = members
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        // “必须先于我”的边：dependencies_first 时是我的提供者，否则是我的依赖方
        let (before, after) = if dependencies_first {
            (Direction::Providing, Direction::Requiring)
        } else {
            (Direction::Requiring, Direction::Providing)
        };

        let mut in_degree: Vec<usize> = members
            .iter()
            .map(|id| {
                self.neighbors(id, before)
                    .iter()
                    .filter(|n| position.contains_key(n.as_str()))
                    .count()
            })
            .collect();

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut emitted = vec![false; members.len()];
        let mut result = Vec::with_capacity(members.len());

        while let Some(index) = ready.pop_first() {
            emitted[index] = true;
            result.push(members[index].clone());

            for next in self.neighbors(&members[index], after) {
                if let Some(&j) = position.get(next.as_str()) {
                    if !emitted[j] && in_degree[j] > 0 {
                        in_degree[j] -= 1;
                        if in_degree[j] == 0 {
                            ready.insert(j);
                        }
                    }
                }
            }
        }

        if result.len() < members.len() {
            tracing::debug!(
                unordered = members.len() - result.len(),
                "成员集合内存在循环依赖，按闭包顺序追加"
            );
            for (i, id) in members.iter().enumerate() {
                if !emitted[i] {
                    result.push(id.clone());
                }
            }
        }

        result
    }

    /// 整张图的加载顺序（提供者在前）
    ///
    /// # 错误
    ///
    /// 如果存在循环依赖，返回 `CoreError::CircularDependency`。
    pub fn load_order(&self) -> Result<Vec<ModuleId>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(CoreError::CircularDependency(cycle.join(" -> ")));
        }
        Ok(self.order_within(&self.all_modules(), true))
    }

    /// 整张图的卸载顺序（依赖方在前）
    pub fn unload_order(&self) -> Result<Vec<ModuleId>> {
        let mut order = self.load_order()?;
        order.reverse();
        Ok(order)
    }

    /// 清空依赖图
    pub fn clear(&mut self) {
        self.providers.clear();
        self.requirers.clear();
        self.unsatisfied.clear();
    }

    /// 检查图是否为空
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// 获取图中模块数量
    pub fn module_count(&self) -> usize {
        self.providers.len()
    }

    /// 获取图中边数
    pub fn edge_count(&self) -> usize {
        self.providers.values().map(|edges| edges.len()).sum()
    }

    /// 检查是否包含指定模块
    pub fn contains_module(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// 获取所有模块标识（已排序）
    pub fn all_modules(&self) -> Vec<ModuleId> {
        self.providers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::{ModuleManifest, Requirement};

    fn graph_with(nodes: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for node in nodes {
            graph.add_module(node);
        }
        // (requirer, provider)
        for (requirer, provider) in edges {
            graph.add_edge(provider, requirer, EdgeKind::Hard).unwrap();
        }
        graph
    }

    fn module(name: &str, version: Option<&str>, requires: Vec<Requirement>) -> Module {
        let mut manifest = ModuleManifest::new(name);
        if let Some(v) = version {
            manifest = manifest.with_version(v).unwrap();
        }
        manifest.requires = requires;
        Module::new(manifest, None)
    }

    #[test]
    fn test_add_edge_requires_known_nodes() {
        let mut graph = DependencyGraph::new();
        graph.add_module("a");

        let result = graph.add_edge("ghost", "a", EdgeKind::Hard);
        assert!(matches!(result, Err(CoreError::ModuleNotFound(_))));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_neighbors_sorted() {
        let graph = graph_with(&["a", "c", "b", "d"], &[("a", "c"), ("a", "b"), ("d", "b")]);

        assert_eq!(graph.neighbors("a", Direction::Providing), vec!["b", "c"]);
        assert_eq!(graph.neighbors("b", Direction::Requiring), vec!["a", "d"]);
        assert!(graph.neighbors("unknown", Direction::Providing).is_empty());
    }

    #[test]
    fn test_remove_edges_for() {
        let mut graph = graph_with(&["a", "b", "c", "d"], &[("a", "b"), ("c", "b"), ("b", "d")]);

        let removed = graph.remove_edges_for("b");
        assert_eq!(removed, 3);
        assert!(!graph.contains_module("b"));
        assert!(graph.neighbors("a", Direction::Providing).is_empty());
        assert!(graph.neighbors("d", Direction::Requiring).is_empty());
        assert!(graph.neighbors("b", Direction::Providing).is_empty());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_edge_kind() {
        let mut graph = graph_with(&["a", "b"], &[]);
        graph.add_edge("b", "a", EdgeKind::Optional).unwrap();

        assert_eq!(graph.edge_kind("b", "a"), Some(EdgeKind::Optional));
        assert_eq!(graph.edge_kind("a", "b"), None);
        assert_eq!(graph.edges_for("a").len(), 1);
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = graph_with(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        assert!(!graph.has_cycle());

        graph.add_edge("a", "c", EdgeKind::Hard).unwrap();
        assert!(graph.has_cycle());

        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert!(matches!(
            graph.load_order(),
            Err(CoreError::CircularDependency(_))
        ));
    }

    #[test]
    fn test_order_within_dependencies_first() {
        // a -> b, a -> c, c -> b
        let graph = graph_with(&["a", "b", "c"], &[("a", "b"), ("a", "c"), ("c", "b")]);
        let members = vec!["c".to_string(), "b".to_string(), "a".to_string()];

        assert_eq!(graph.order_within(&members, true), vec!["b", "c", "a"]);
        assert_eq!(graph.order_within(&members, false), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_order_within_ignores_outside_edges() {
        let graph = graph_with(&["a", "b", "x"], &[("a", "x"), ("b", "x")]);
        let members = vec!["b".to_string(), "a".to_string()];

        assert_eq!(graph.order_within(&members, true), vec!["b", "a"]);
    }

    #[test]
    fn test_order_within_cycle_appended() {
        let graph = graph_with(&["a", "b", "c"], &[("a", "b"), ("b", "a"), ("c", "a")]);
        let members = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        assert_eq!(graph.order_within(&members, true), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_load_order() {
        let graph = graph_with(
            &["app", "service", "database"],
            &[("app", "service"), ("service", "database")],
        );
        assert_eq!(graph.load_order().unwrap(), vec!["database", "service", "app"]);
        assert_eq!(graph.unload_order().unwrap(), vec!["app", "service", "database"]);
    }

    #[test]
    fn test_rebuild_binds_highest_matching_version() {
        let modules = vec![
            module("lib", Some("1.0.0"), vec![]),
            module("lib", Some("1.5.0"), vec![]),
            module("lib", Some("2.0.0"), vec![]),
            module("app", None, vec![Requirement::new("lib").with_version("^1.0")]),
        ];

        let graph = DependencyGraph::rebuild(&modules);
        assert_eq!(graph.neighbors("app", Direction::Providing), vec!["lib@1.5.0"]);
        assert!(graph.unsatisfied("app").is_empty());
    }

    #[test]
    fn test_rebuild_records_unsatisfied() {
        let modules = vec![module(
            "app",
            None,
            vec![
                Requirement::new("missing"),
                Requirement::new("nice-to-have").optional(),
            ],
        )];

        let graph = DependencyGraph::rebuild(&modules);
        assert_eq!(graph.unsatisfied("app"), vec!["missing"]);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_rebuild_optional_edge_kind() {
        let modules = vec![
            module("icons", None, vec![]),
            module("ui", None, vec![Requirement::new("icons").optional()]),
        ];

        let graph = DependencyGraph::rebuild(&modules);
        assert_eq!(graph.edge_kind("icons", "ui"), Some(EdgeKind::Optional));
    }
}
