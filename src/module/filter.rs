//! 解析过滤器
//!
//! 对即将一起解析的候选模块集合依次执行：
//!
//! 1. 单例去重
//! 2. 构建错误排除（连同其 requiring 闭包）
//! 3. 去激活依赖排除
//!
//! 过滤器是快照上的纯函数，不修改任何模块状态。每个被排除的模块只报告一次，
//! 原因取第一个命中的步骤。

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::module::closure::{ClosureDirection, ClosureEngine, ClosureRequest};
use crate::module::dependency::DependencyGraph;
use crate::module::metadata::{Module, ModuleId};
use crate::utils::CoreError;

/// 单例冲突时的取舍策略
///
/// 已解析的模块总是优先保留，策略只决定其余情况。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingletonTieBreak {
    /// 保留版本最高者，版本相同时取闭包顺序中靠前者
    #[default]
    HighestVersion,
    /// 保留闭包顺序中第一个出现的
    FirstEncountered,
}

impl SingletonTieBreak {
    /// 从整数偏好值转换（0 = 最高版本，1 = 先出现者）
    pub fn from_preference(value: i64) -> Self {
        match value {
            1 => SingletonTieBreak::FirstEncountered,
            _ => SingletonTieBreak::HighestVersion,
        }
    }
}

/// 排除原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// 同名单例已有保留者
    DuplicateSingleton {
        /// 被保留的模块
        retained: ModuleId,
    },
    /// 自身或其依赖存在构建错误
    BuildError {
        /// 存在构建错误的模块
        origin: ModuleId,
    },
    /// 依赖闭包中有被去激活的模块
    DeactivatedDependency {
        /// 被去激活的依赖
        dependency: ModuleId,
    },
    /// 硬依赖无法满足
    UnsatisfiedDependency {
        /// 缺失的依赖
        missing: Vec<String>,
    },
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::DuplicateSingleton { retained } => {
                write!(f, "duplicate singleton (retained {})", retained)
            }
            ExclusionReason::BuildError { origin } => write!(f, "build error in {}", origin),
            ExclusionReason::DeactivatedDependency { dependency } => {
                write!(f, "deactivated dependency {}", dependency)
            }
            ExclusionReason::UnsatisfiedDependency { missing } => {
                write!(f, "unsatisfied dependency {}", missing.join(", "))
            }
        }
    }
}

/// 单条排除记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    /// 被排除的模块
    pub module: ModuleId,
    /// 原因
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

impl Exclusion {
    /// 转换为错误值，供需要中止的调用方使用
    pub fn to_error(&self, symbolic_name: &str) -> CoreError {
        match self.reason {
            ExclusionReason::DuplicateSingleton { ref retained } => CoreError::DuplicateSingleton {
                symbolic_name: symbolic_name.to_string(),
                retained: retained.clone(),
                excluded: self.module.clone(),
            },
            ExclusionReason::UnsatisfiedDependency { ref missing } => {
                CoreError::UnsatisfiedDependency {
                    module: self.module.clone(),
                    missing: missing.clone(),
                }
            }
            ExclusionReason::BuildError { ref origin } => CoreError::UnsatisfiedDependency {
                module: self.module.clone(),
                missing: vec![format!("{} (build error)", origin)],
            },
            ExclusionReason::DeactivatedDependency { ref dependency } => {
                CoreError::UnsatisfiedDependency {
                    module: self.module.clone(),
                    missing: vec![format!("{} (deactivated)", dependency)],
                }
            }
        }
    }
}

/// 过滤结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOutcome {
    /// 保留的模块（保持候选顺序）
    pub accepted: Vec<ModuleId>,
    /// 排除记录（按排除发生的顺序）
    pub exclusions: Vec<Exclusion>,
}

impl FilterOutcome {
    /// 是否没有任何排除
    pub fn is_clean(&self) -> bool {
        self.exclusions.is_empty()
    }

    /// 被排除的模块标识
    pub fn excluded(&self) -> Vec<&ModuleId> {
        self.exclusions.iter().map(|e| &e.module).collect()
    }

    /// 查询某个模块的排除原因
    pub fn reason_for(&self, id: &str) -> Option<&ExclusionReason> {
        self.exclusions
            .iter()
            .find(|e| e.module == id)
            .map(|e| &e.reason)
    }
}

/// 过滤策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPolicy {
    /// 单例取舍策略
    pub tie_break: SingletonTieBreak,
    /// 构建错误是否阻止解析
    pub build_errors_block: bool,
    /// 被去激活的依赖是否阻止解析
    pub deactivated_dependencies_block: bool,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            tie_break: SingletonTieBreak::HighestVersion,
            build_errors_block: true,
            deactivated_dependencies_block: true,
        }
    }
}

/// 解析过滤器
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolutionFilter {
    policy: FilterPolicy,
}

impl ResolutionFilter {
    /// 使用指定策略创建过滤器
    pub fn new(policy: FilterPolicy) -> Self {
        Self { policy }
    }

    /// 获取策略
    pub fn policy(&self) -> FilterPolicy {
        self.policy
    }

    /// 过滤候选集合
    ///
    /// # 参数
    ///
    /// * `candidates` - 候选模块，按确定的闭包顺序排列
    /// * `modules` - 注册表快照（包含候选集合以外的模块）
    /// * `graph` - 依赖图快照
    pub fn filter(
        &self,
        candidates: &[ModuleId],
        modules: &HashMap<ModuleId, Module>,
        graph: &DependencyGraph,
    ) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        let mut excluded: HashSet<ModuleId> = HashSet::new();

        // 去掉重复和快照中不存在的候选
        let mut seen = HashSet::new();
        let candidates: Vec<&Module> = candidates
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| modules.get(id))
            .collect();

        let mut exclude = |id: &ModuleId, reason: ExclusionReason, outcome: &mut FilterOutcome| {
            if excluded.insert(id.clone()) {
                debug!(module_id = %id, reason = %reason, "模块被过滤器排除");
                outcome.exclusions.push(Exclusion {
                    module: id.clone(),
                    reason,
                });
            }
        };

        // 1. 单例去重
        for (loser, retained) in self.singleton_losers(&candidates, modules) {
            exclude(
                &loser,
                ExclusionReason::DuplicateSingleton { retained },
                &mut outcome,
            );
        }

        let candidate_ids: HashSet<ModuleId> = candidates.iter().map(|m| m.id()).collect();

        // 2. 构建错误：自身及 requiring 闭包中的候选
        if self.policy.build_errors_block {
            for module in candidates.iter().filter(|m| m.build_error) {
                let origin = module.id();
                let dependents = ClosureEngine::closure_of(
                    graph,
                    &ClosureRequest::new(origin.clone(), ClosureDirection::Requiring)
                        .including_seeds(),
                );
                for id in dependents.iter().filter(|id| candidate_ids.contains(*id)) {
                    exclude(
                        id,
                        ExclusionReason::BuildError {
                            origin: origin.clone(),
                        },
                        &mut outcome,
                    );
                }
            }

            // 候选集合以外（例如已解析）的提供者同样会阻止解析
            for module in &candidates {
                let id = module.id();
                let providers = ClosureEngine::closure_of(
                    graph,
                    &ClosureRequest::new(id.clone(), ClosureDirection::Providing),
                );
                let broken = providers
                    .into_iter()
                    .find(|p| modules.get(p).is_some_and(|m| m.build_error));
                if let Some(origin) = broken {
                    exclude(&id, ExclusionReason::BuildError { origin }, &mut outcome);
                }
            }
        }

        // 3. 去激活依赖
        if self.policy.deactivated_dependencies_block {
            for module in candidates.iter().filter(|m| !m.is_deactivated()) {
                let id = module.id();
                let providers = ClosureEngine::closure_of(
                    graph,
                    &ClosureRequest::new(id.clone(), ClosureDirection::Providing),
                );
                let deactivated = providers
                    .into_iter()
                    .find(|p| modules.get(p).is_some_and(Module::is_deactivated));
                if let Some(dependency) = deactivated {
                    exclude(
                        &id,
                        ExclusionReason::DeactivatedDependency { dependency },
                        &mut outcome,
                    );
                }
            }
        }

        outcome.accepted = candidates
            .iter()
            .map(|m| m.id())
            .filter(|id| !excluded.contains(id))
            .collect();
        outcome
    }

    /// 计算单例冲突中被淘汰的候选：(被淘汰者, 保留者)
    fn singleton_losers(
        &self,
        candidates: &[&Module],
        modules: &HashMap<ModuleId, Module>,
    ) -> Vec<(ModuleId, ModuleId)> {
        // 按符号名分组，组的顺序为首次出现的顺序
        let mut groups: Vec<(String, Vec<&Module>)> = Vec::new();
        for module in candidates.iter().copied().filter(|m| m.is_singleton()) {
            match groups.iter_mut().find(|(name, _)| name == module.symbolic_name()) {
                Some((_, members)) => members.push(module),
                None => groups.push((module.symbolic_name().to_string(), vec![module])),
            }
        }

        let candidate_ids: HashSet<ModuleId> = candidates.iter().map(|m| m.id()).collect();
        let mut losers = Vec::new();

        for (name, members) in groups {
            // 候选集合以外已解析的同名单例
            let mut outside: Vec<&Module> = modules
                .values()
                .filter(|m| {
                    m.is_singleton()
                        && m.symbolic_name() == name
                        && m.state.is_resolved()
                        && !candidate_ids.contains(&m.id())
                })
                .collect();
            outside.sort_by_key(|m| m.registration_seq);

            if members.len() + outside.len() < 2 {
                continue;
            }

            let contenders: Vec<&Module> = members.iter().copied().chain(outside).collect();
            let winner = self.pick_winner(&contenders).id();

            for member in members.iter().filter(|m| m.id() != winner) {
                losers.push((member.id(), winner.clone()));
            }
        }

        losers
    }

    /// 已解析者优先，其次按策略选择
    fn pick_winner<'a>(&self, contenders: &[&'a Module]) -> &'a Module {
        let resolved: Vec<&Module> = contenders
            .iter()
            .copied()
            .filter(|m| m.state.is_resolved())
            .collect();
        let pool = if resolved.is_empty() {
            contenders.to_vec()
        } else {
            resolved
        };

        let mut winner = pool[0];
        if self.policy.tie_break == SingletonTieBreak::HighestVersion {
            for &contender in pool.iter().skip(1) {
                // 严格大于，版本相同时保留靠前者；无版本视为最低
                if contender.version() > winner.version() {
                    winner = contender;
                }
            }
        }
        winner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::{
        Availability, ModuleManifest, ModuleState, Requirement, WorkspaceUnit,
    };

    fn module(name: &str, version: Option<&str>) -> Module {
        let mut manifest = ModuleManifest::new(name);
        if let Some(v) = version {
            manifest = manifest.with_version(v).unwrap();
        }
        let unit = WorkspaceUnit::new(manifest.identity(), format!("/ws/{}", manifest.identity()));
        Module::new(manifest, Some(unit))
    }

    fn snapshot(modules: Vec<Module>) -> (HashMap<ModuleId, Module>, DependencyGraph) {
        let graph = DependencyGraph::rebuild(&modules);
        let map = modules.into_iter().map(|m| (m.id(), m)).collect();
        (map, graph)
    }

    fn ids(list: &[&str]) -> Vec<ModuleId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_duplicate_singleton_one_survivor() {
        let mut old = module("X", Some("1.0.0"));
        old.manifest.singleton = true;
        let mut new = module("X", Some("2.0.0"));
        new.manifest.singleton = true;
        let (modules, graph) = snapshot(vec![old, new]);

        let outcome = ResolutionFilter::default().filter(
            &ids(&["X@1.0.0", "X@2.0.0"]),
            &modules,
            &graph,
        );

        assert_eq!(outcome.accepted, ids(&["X@2.0.0"]));
        assert_eq!(outcome.exclusions.len(), 1);
        assert_eq!(outcome.exclusions[0].module, "X@1.0.0");
        assert_eq!(
            outcome.exclusions[0].reason,
            ExclusionReason::DuplicateSingleton {
                retained: "X@2.0.0".to_string()
            }
        );
    }

    #[test]
    fn test_singleton_first_encountered() {
        let mut a = module("X", Some("1.0.0"));
        a.manifest.singleton = true;
        let mut b = module("X", Some("2.0.0"));
        b.manifest.singleton = true;
        let (modules, graph) = snapshot(vec![a, b]);

        let filter = ResolutionFilter::new(FilterPolicy {
            tie_break: SingletonTieBreak::FirstEncountered,
            ..FilterPolicy::default()
        });
        let outcome = filter.filter(&ids(&["X@1.0.0", "X@2.0.0"]), &modules, &graph);
        assert_eq!(outcome.accepted, ids(&["X@1.0.0"]));
    }

    #[test]
    fn test_singleton_already_resolved_wins() {
        let mut resolved = module("X", Some("1.0.0"));
        resolved.manifest.singleton = true;
        resolved.state = ModuleState::Resolved;
        let mut candidate = module("X", Some("3.0.0"));
        candidate.manifest.singleton = true;
        let (modules, graph) = snapshot(vec![resolved, candidate]);

        // 已解析的模块不在候选集合中，候选仍然被排除
        let outcome = ResolutionFilter::default().filter(&ids(&["X@3.0.0"]), &modules, &graph);
        assert!(outcome.accepted.is_empty());
        assert_eq!(
            outcome.reason_for("X@3.0.0"),
            Some(&ExclusionReason::DuplicateSingleton {
                retained: "X@1.0.0".to_string()
            })
        );
    }

    #[test]
    fn test_non_singletons_coexist() {
        let (modules, graph) =
            snapshot(vec![module("X", Some("1.0.0")), module("X", Some("2.0.0"))]);
        let outcome = ResolutionFilter::default().filter(
            &ids(&["X@1.0.0", "X@2.0.0"]),
            &modules,
            &graph,
        );
        assert!(outcome.is_clean());
        assert_eq!(outcome.accepted.len(), 2);
    }

    #[test]
    fn test_build_error_excludes_requiring_closure() {
        let mut base = module("base", None);
        base.build_error = true;
        let mid = {
            let mut m = module("mid", None);
            m.manifest = m.manifest.requires(Requirement::new("base"));
            m
        };
        let top = {
            let mut m = module("top", None);
            m.manifest = m.manifest.requires(Requirement::new("mid"));
            m
        };
        let (modules, graph) = snapshot(vec![base, mid, top, module("other", None)]);

        let outcome = ResolutionFilter::default().filter(
            &ids(&["base", "mid", "other", "top"]),
            &modules,
            &graph,
        );

        assert_eq!(outcome.exclusions.len(), 3);
        assert_eq!(outcome.accepted, ids(&["other"]));
        for id in ["base", "mid", "top"] {
            assert_eq!(
                outcome.reason_for(id),
                Some(&ExclusionReason::BuildError {
                    origin: "base".to_string()
                })
            );
        }
    }

    #[test]
    fn test_build_error_in_resolved_provider() {
        let mut lib = module("lib", None);
        lib.build_error = true;
        lib.state = ModuleState::Resolved;
        let app = {
            let mut m = module("app", None);
            m.manifest = m.manifest.requires(Requirement::new("lib"));
            m
        };
        let (modules, graph) = snapshot(vec![lib, app]);

        // lib 已解析，不在候选集合中
        let outcome = ResolutionFilter::default().filter(&ids(&["app"]), &modules, &graph);

        assert!(outcome.accepted.is_empty());
        assert_eq!(
            outcome.reason_for("app"),
            Some(&ExclusionReason::BuildError {
                origin: "lib".to_string()
            })
        );
    }

    #[test]
    fn test_build_errors_can_be_ignored() {
        let mut base = module("base", None);
        base.build_error = true;
        let (modules, graph) = snapshot(vec![base]);

        let filter = ResolutionFilter::new(FilterPolicy {
            build_errors_block: false,
            ..FilterPolicy::default()
        });
        let outcome = filter.filter(&ids(&["base"]), &modules, &graph);
        assert!(outcome.is_clean());
    }

    #[test]
    fn test_deactivated_dependency() {
        let mut lib = module("lib", None);
        lib.availability = Availability::Deactivated;
        let app = {
            let mut m = module("app", None);
            m.manifest = m.manifest.requires(Requirement::new("lib"));
            m
        };
        let (modules, graph) = snapshot(vec![lib, app]);

        let outcome = ResolutionFilter::default().filter(&ids(&["app", "lib"]), &modules, &graph);

        assert_eq!(outcome.accepted, ids(&["lib"]));
        assert_eq!(
            outcome.reason_for("app"),
            Some(&ExclusionReason::DeactivatedDependency {
                dependency: "lib".to_string()
            })
        );
    }

    #[test]
    fn test_each_module_reported_once() {
        // app 既依赖构建失败的模块，又依赖被去激活的模块
        let mut broken = module("broken", None);
        broken.build_error = true;
        let mut off = module("off", None);
        off.availability = Availability::Deactivated;
        let app = {
            let mut m = module("app", None);
            m.manifest = m
                .manifest
                .requires(Requirement::new("broken"))
                .requires(Requirement::new("off"));
            m
        };
        let (modules, graph) = snapshot(vec![broken, off, app]);

        let outcome =
            ResolutionFilter::default().filter(&ids(&["app", "broken", "off"]), &modules, &graph);

        let app_entries = outcome.exclusions.iter().filter(|e| e.module == "app").count();
        assert_eq!(app_entries, 1);
        assert!(matches!(
            outcome.reason_for("app"),
            Some(ExclusionReason::BuildError { .. })
        ));
    }

    #[test]
    fn test_filter_does_not_mutate() {
        let mut base = module("base", None);
        base.build_error = true;
        let (modules, graph) = snapshot(vec![base]);
        let before = modules.clone();

        ResolutionFilter::default().filter(&ids(&["base"]), &modules, &graph);
        assert_eq!(modules, before);
    }

    #[test]
    fn test_exclusion_to_error() {
        let exclusion = Exclusion {
            module: "X@1.0.0".to_string(),
            reason: ExclusionReason::DuplicateSingleton {
                retained: "X@2.0.0".to_string(),
            },
        };
        assert!(matches!(
            exclusion.to_error("X"),
            CoreError::DuplicateSingleton { .. }
        ));
    }
}
