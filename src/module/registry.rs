//! 模块注册表
//!
//! 工作区单元与模块之间的双向映射，是“模块是否存在、身份是什么”的唯一数据源。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::module::metadata::{
    Availability, Module, ModuleId, ModuleManifest, ModuleState, WorkspaceUnit,
};
use crate::module::parser::{ManifestParser, MANIFEST_FILENAME};
use crate::utils::{CoreError, Result};

/// 外部模块在错误信息中的占位名
const EXTERNAL_UNIT: &str = "<external>";

/// 注册表内部数据
///
/// 模块表和单元索引放在同一把锁下，查询永远看不到注册到一半的模块。
#[derive(Debug, Default)]
struct RegistryInner {
    /// 已注册的模块：module_id -> Module
    modules: HashMap<ModuleId, Module>,

    /// 单元索引：单元路径 -> module_id
    units: HashMap<PathBuf, ModuleId>,

    /// 下一个注册序号
    next_seq: u64,
}

impl RegistryInner {
    fn insert(&mut self, mut module: Module) -> Module {
        module.registration_seq = self.next_seq;
        self.next_seq += 1;

        let id = module.id();
        if let Some(ref unit) = module.unit {
            self.units.insert(unit.path.clone(), id.clone());
        }
        self.modules.insert(id, module.clone());
        module
    }
}

/// 模块注册表
///
/// 克隆出的实例共享同一份数据。
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ModuleRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工作区单元产生的模块
    ///
    /// 同一单元重复注册是幂等的，直接返回已有模块。
    ///
    /// # Errors
    ///
    /// - 清单校验失败时返回 `InvalidMetadata`
    /// - 标识已属于另一个单元（或外部模块）时返回 `DuplicateIdentity`
    pub async fn register(&self, unit: WorkspaceUnit, manifest: ModuleManifest) -> Result<Module> {
        ManifestParser::validate(&manifest)?;
        let id = manifest.identity();

        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.modules.get(&id) {
            return match existing.unit {
                Some(ref existing_unit) if existing_unit.path == unit.path => {
                    tracing::trace!(module_id = %id, "重复注册同一单元，返回已有模块");
                    Ok(existing.clone())
                }
                ref other => Err(CoreError::DuplicateIdentity {
                    id,
                    existing_unit: other
                        .as_ref()
                        .map(|u| u.path.display().to_string())
                        .unwrap_or_else(|| EXTERNAL_UNIT.to_string()),
                }),
            };
        }

        if let Some(previous) = inner.units.get(&unit.path) {
            return Err(CoreError::InvalidMetadata(format!(
                "工作区单元 '{}' 已注册为 '{}'，清单变更请使用 update_manifest",
                unit.path.display(),
                previous
            )));
        }

        let module = inner.insert(Module::new(manifest, Some(unit)));
        tracing::debug!(module_id = %id, "模块已注册");
        Ok(module)
    }

    /// 注册工作区之外的模块（如目标平台提供的模块）
    pub async fn register_external(&self, manifest: ModuleManifest) -> Result<Module> {
        ManifestParser::validate(&manifest)?;
        let id = manifest.identity();

        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.modules.get(&id) {
            return match existing.unit {
                None => Ok(existing.clone()),
                Some(ref unit) => Err(CoreError::DuplicateIdentity {
                    id,
                    existing_unit: unit.path.display().to_string(),
                }),
            };
        }

        let module = inner.insert(Module::new(manifest, None));
        tracing::debug!(module_id = %id, "外部模块已注册");
        Ok(module)
    }

    /// 扫描工作区目录，注册所有包含 module.yaml 的子目录
    ///
    /// 解析或注册失败的单元会被跳过并记录警告。
    ///
    /// # Returns
    ///
    /// 成功注册的模块列表
    pub async fn scan(&self, dirs: &[PathBuf]) -> Result<Vec<Module>> {
        let mut registered = Vec::new();

        for dir in dirs {
            if !dir.exists() {
                tracing::debug!("工作区目录不存在，跳过: {:?}", dir);
                continue;
            }

            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("无法读取工作区目录 {:?}: {}", dir, e);
                    continue;
                }
            };

            let mut paths = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.is_dir() && path.join(MANIFEST_FILENAME).exists() {
                    paths.push(path);
                }
            }
            // 目录遍历顺序与平台有关，排序后注册序号才可复现
            paths.sort();

            for path in paths {
                let manifest = match ManifestParser::parse_file(&path.join(MANIFEST_FILENAME)).await {
                    Ok(manifest) => manifest,
                    Err(e) => {
                        tracing::warn!("解析模块清单失败 {:?}: {}", path, e);
                        continue;
                    }
                };

                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| manifest.symbolic_name.clone());

                match self.register(WorkspaceUnit::new(name, &path), manifest).await {
                    Ok(module) => {
                        tracing::info!("成功注册模块: {} (路径: {:?})", module.id(), path);
                        registered.push(module);
                    }
                    Err(e) => {
                        tracing::warn!("注册模块失败 {:?}: {}", path, e);
                    }
                }
            }
        }

        Ok(registered)
    }

    /// 取消注册模块
    ///
    /// # Errors
    ///
    /// - 模块不存在
    /// - 模块正在执行迁移
    pub async fn unregister(&self, id: &str) -> Result<Module> {
        let mut inner = self.inner.write().await;

        match inner.modules.get(id) {
            None => return Err(CoreError::ModuleNotFound(id.to_string())),
            Some(module) if module.state_changing => {
                return Err(CoreError::TransitionInProgress {
                    module: id.to_string(),
                    in_flight: module.current_transition,
                });
            }
            Some(_) => {}
        }

        let module = inner
            .modules
            .remove(id)
            .ok_or_else(|| CoreError::ModuleNotFound(id.to_string()))?;
        if let Some(ref unit) = module.unit {
            inner.units.remove(&unit.path);
        }

        tracing::debug!(module_id = %id, "模块已取消注册");
        Ok(module)
    }

    /// 替换模块清单
    ///
    /// 版本变化会改变模块标识，此时模块以新标识重新登记，状态保持不变。
    pub async fn update_manifest(&self, id: &str, manifest: ModuleManifest) -> Result<Module> {
        ManifestParser::validate(&manifest)?;
        let new_id = manifest.identity();

        let mut inner = self.inner.write().await;

        let current = inner
            .modules
            .get(id)
            .ok_or_else(|| CoreError::ModuleNotFound(id.to_string()))?;
        if current.state_changing {
            return Err(CoreError::TransitionInProgress {
                module: id.to_string(),
                in_flight: current.current_transition,
            });
        }

        if new_id != id {
            if let Some(other) = inner.modules.get(&new_id) {
                return Err(CoreError::DuplicateIdentity {
                    id: new_id,
                    existing_unit: other
                        .unit
                        .as_ref()
                        .map(|u| u.path.display().to_string())
                        .unwrap_or_else(|| EXTERNAL_UNIT.to_string()),
                });
            }
        }

        let mut module = inner
            .modules
            .remove(id)
            .ok_or_else(|| CoreError::ModuleNotFound(id.to_string()))?;
        module.manifest = manifest;
        if let Some(ref unit) = module.unit {
            inner.units.insert(unit.path.clone(), new_id.clone());
        }
        inner.modules.insert(new_id.clone(), module.clone());

        tracing::debug!(module_id = %id, new_id = %new_id, "模块清单已更新");
        Ok(module)
    }

    /// 按标识查找模块
    pub async fn lookup(&self, id: &str) -> Option<Module> {
        let inner = self.inner.read().await;
        inner.modules.get(id).cloned()
    }

    /// 按工作区单元路径查找模块
    pub async fn lookup_unit(&self, path: &Path) -> Option<Module> {
        let inner = self.inner.read().await;
        inner
            .units
            .get(path)
            .and_then(|id| inner.modules.get(id))
            .cloned()
    }

    /// 获取所有模块的快照（按标识排序）
    pub async fn all(&self) -> Vec<Module> {
        let inner = self.inner.read().await;
        let mut modules: Vec<Module> = inner.modules.values().cloned().collect();
        modules.sort_by_key(|m| m.id());
        modules
    }

    /// 按标识批量获取快照，不存在的标识被忽略
    pub async fn snapshot(&self, ids: &[ModuleId]) -> HashMap<ModuleId, Module> {
        let inner = self.inner.read().await;
        ids.iter()
            .filter_map(|id| inner.modules.get(id).map(|m| (id.clone(), m.clone())))
            .collect()
    }

    /// 按条件查找模块
    pub async fn find_modules<F>(&self, predicate: F) -> Vec<Module>
    where
        F: Fn(&Module) -> bool,
    {
        let inner = self.inner.read().await;
        let mut modules: Vec<Module> =
            inner.modules.values().filter(|m| predicate(m)).cloned().collect();
        modules.sort_by_key(|m| m.id());
        modules
    }

    /// 按状态查找模块
    pub async fn find_by_state(&self, state: ModuleState) -> Vec<Module> {
        self.find_modules(|m| m.state == state).await
    }

    /// 按符号名查找模块（可能有多个版本）
    pub async fn find_by_symbolic_name(&self, name: &str) -> Vec<Module> {
        self.find_modules(|m| m.symbolic_name() == name).await
    }

    /// 检查模块是否存在
    pub async fn contains(&self, id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.modules.contains_key(id)
    }

    /// 获取已注册模块数量
    pub async fn count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.modules.len()
    }

    /// 设置构建错误标记
    pub async fn set_build_error(&self, id: &str, build_error: bool) -> Result<()> {
        self.update(id, |module| {
            module.build_error = build_error;
            Ok(())
        })
        .await
    }

    /// 设置工作区激活标记
    pub async fn set_availability(&self, id: &str, availability: Availability) -> Result<()> {
        self.update(id, |module| {
            module.availability = availability;
            Ok(())
        })
        .await
    }

    /// 在写锁内修改单个模块
    ///
    /// 闭包返回错误时不会留下部分修改：闭包只能通过 `&mut Module` 改写，
    /// 调用方需保证出错前不改动字段。
    pub(crate) async fn update<F, R>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Module) -> Result<R>,
    {
        let mut inner = self.inner.write().await;
        let module = inner
            .modules
            .get_mut(id)
            .ok_or_else(|| CoreError::ModuleNotFound(id.to_string()))?;
        f(module)
    }

    /// `update` 的非阻塞版本，写锁被占用时返回 `None`
    pub(crate) fn try_update<F, R>(&self, id: &str, f: F) -> Option<Result<R>>
    where
        F: FnOnce(&mut Module) -> Result<R>,
    {
        let mut inner = self.inner.try_write().ok()?;
        Some(
            inner
                .modules
                .get_mut(id)
                .ok_or_else(|| CoreError::ModuleNotFound(id.to_string()))
                .and_then(f),
        )
    }

    /// 清空所有注册的模块
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.modules.clear();
        inner.units.clear();
        tracing::warn!("已清空所有注册的模块");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(name: &str) -> WorkspaceUnit {
        WorkspaceUnit::new(name, format!("/ws/{}", name))
    }

    fn manifest(name: &str) -> ModuleManifest {
        ModuleManifest::new(name)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ModuleRegistry::new();
        let module = registry.register(unit("core"), manifest("core")).await.unwrap();

        assert_eq!(module.id(), "core");
        assert_eq!(module.state, ModuleState::Uninstalled);
        assert!(!module.state_changing);

        assert!(registry.contains("core").await);
        assert_eq!(registry.count().await, 1);

        let by_unit = registry.lookup_unit(Path::new("/ws/core")).await.unwrap();
        assert_eq!(by_unit.id(), "core");
    }

    #[tokio::test]
    async fn test_register_same_unit_is_idempotent() {
        let registry = ModuleRegistry::new();
        let first = registry.register(unit("core"), manifest("core")).await.unwrap();
        let second = registry.register(unit("core"), manifest("core")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_register_duplicate_identity() {
        let registry = ModuleRegistry::new();
        registry.register(unit("core"), manifest("core")).await.unwrap();

        let result = registry
            .register(WorkspaceUnit::new("copy", "/ws/copy"), manifest("core"))
            .await;
        assert!(matches!(
            result.unwrap_err(),
            CoreError::DuplicateIdentity { .. }
        ));
    }

    #[tokio::test]
    async fn test_external_conflicts_with_workspace_module() {
        let registry = ModuleRegistry::new();
        registry.register_external(manifest("lib")).await.unwrap();

        let result = registry.register(unit("lib"), manifest("lib")).await;
        match result {
            Err(CoreError::DuplicateIdentity { existing_unit, .. }) => {
                assert_eq!(existing_unit, EXTERNAL_UNIT);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_versions_share_symbolic_name() {
        let registry = ModuleRegistry::new();
        registry
            .register(unit("x1"), manifest("x").with_version("1.0.0").unwrap())
            .await
            .unwrap();
        registry
            .register_external(manifest("x").with_version("2.0.0").unwrap())
            .await
            .unwrap();

        let found = registry.find_by_symbolic_name("x").await;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id(), "x@1.0.0");
        assert!(found[0].registration_seq < found[1].registration_seq);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ModuleRegistry::new();
        registry.register(unit("core"), manifest("core")).await.unwrap();

        let removed = registry.unregister("core").await.unwrap();
        assert_eq!(removed.id(), "core");
        assert!(!registry.contains("core").await);
        assert!(registry.lookup_unit(Path::new("/ws/core")).await.is_none());

        let result = registry.unregister("core").await;
        assert!(matches!(result.unwrap_err(), CoreError::ModuleNotFound(_)));
    }

    #[tokio::test]
    async fn test_unregister_while_changing() {
        let registry = ModuleRegistry::new();
        registry.register(unit("core"), manifest("core")).await.unwrap();
        registry
            .update("core", |m| {
                m.state_changing = true;
                Ok(())
            })
            .await
            .unwrap();

        let result = registry.unregister("core").await;
        assert!(matches!(
            result.unwrap_err(),
            CoreError::TransitionInProgress { .. }
        ));
    }

    #[tokio::test]
    async fn test_update_manifest_rekeys() {
        let registry = ModuleRegistry::new();
        registry
            .register(unit("core"), manifest("core").with_version("1.0.0").unwrap())
            .await
            .unwrap();

        let updated = registry
            .update_manifest("core@1.0.0", manifest("core").with_version("1.1.0").unwrap())
            .await
            .unwrap();

        assert_eq!(updated.id(), "core@1.1.0");
        assert!(!registry.contains("core@1.0.0").await);
        let by_unit = registry.lookup_unit(Path::new("/ws/core")).await.unwrap();
        assert_eq!(by_unit.id(), "core@1.1.0");
    }

    #[tokio::test]
    async fn test_flags() {
        let registry = ModuleRegistry::new();
        registry.register(unit("core"), manifest("core")).await.unwrap();

        registry.set_build_error("core", true).await.unwrap();
        registry
            .set_availability("core", Availability::Deactivated)
            .await
            .unwrap();

        let module = registry.lookup("core").await.unwrap();
        assert!(module.build_error);
        assert!(module.is_deactivated());

        assert!(registry.set_build_error("missing", true).await.is_err());
    }

    #[tokio::test]
    async fn test_scan_workspace() {
        let temp_dir = TempDir::new().unwrap();

        for (dir, yaml) in [
            ("a", "symbolic_name: demo.a\n"),
            ("b", "symbolic_name: demo.b\nrequires:\n  - name: demo.a\n"),
            ("broken", "symbolic_name: 1bad\n"),
        ] {
            let module_dir = temp_dir.path().join(dir);
            tokio::fs::create_dir_all(&module_dir).await.unwrap();
            tokio::fs::write(module_dir.join(MANIFEST_FILENAME), yaml)
                .await
                .unwrap();
        }
        // 没有清单的目录被忽略
        tokio::fs::create_dir_all(temp_dir.path().join("docs"))
            .await
            .unwrap();

        let registry = ModuleRegistry::new();
        let registered = registry
            .scan(&[temp_dir.path().to_path_buf(), PathBuf::from("/nonexistent")])
            .await
            .unwrap();

        let ids: Vec<String> = registered.iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["demo.a", "demo.b"]);
        assert_eq!(registry.count().await, 2);
    }
}
