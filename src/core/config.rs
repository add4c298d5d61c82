//! 核心配置
//!
//! 定义配置结构和加载逻辑。配置文件可以是 YAML 或 JSON，按扩展名区分。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::preferences::{PreferenceValue, CONFIG_PROVIDER};
use crate::module::filter::SingletonTieBreak;
use crate::module::metadata::ModuleManifest;
use crate::utils::{CoreError, Result};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// 保留日志文件数
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_max_files() -> usize {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
            max_files: default_max_files(),
        }
    }
}

/// 迁移策略配置
///
/// 由 `config` 偏好提供者读取。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Start 是否同时启动 providing 闭包
    #[serde(default = "default_true")]
    pub eager_activation: bool,

    /// 构建错误是否阻止解析
    #[serde(default = "default_true")]
    pub build_errors_block: bool,

    /// 被去激活的依赖是否阻止解析
    #[serde(default = "default_true")]
    pub deactivated_dependencies_block: bool,

    /// 单例取舍策略
    #[serde(default)]
    pub singleton_tie_break: SingletonTieBreak,

    /// 迁移冲突时是否排队
    #[serde(default)]
    pub queue_on_conflict: bool,

    /// 首个失败后是否中止剩余步骤
    #[serde(default)]
    pub abort_on_first_failure: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            eager_activation: true,
            build_errors_block: true,
            deactivated_dependencies_block: true,
            singleton_tie_break: SingletonTieBreak::HighestVersion,
            queue_on_conflict: false,
            abort_on_first_failure: false,
        }
    }
}

/// 偏好提供者配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencesConfig {
    /// 提供者名称
    #[serde(default = "default_provider")]
    pub provider: String,

    /// `memory` 提供者的初始值
    #[serde(default)]
    pub values: HashMap<String, PreferenceValue>,
}

fn default_provider() -> String {
    CONFIG_PROVIDER.to_string()
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            values: HashMap::new(),
        }
    }
}

/// 工作区描述
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// 扫描 `module.yaml` 的目录（每个子目录是一个工作区单元）
    #[serde(default)]
    pub module_dirs: Vec<PathBuf>,

    /// 工作区外部模块
    #[serde(default)]
    pub external: Vec<ModuleManifest>,

    /// 被去激活的模块标识
    #[serde(default)]
    pub deactivated: Vec<String>,

    /// 存在构建错误的模块标识
    #[serde(default)]
    pub build_errors: Vec<String>,
}

/// 核心配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 迁移策略
    #[serde(default)]
    pub policy: PolicyConfig,

    /// 偏好提供者
    #[serde(default)]
    pub preferences: PreferencesConfig,

    /// 工作区描述
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

impl CoreConfig {
    /// 创建配置构建器
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// 从文件加载配置
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
        })?;

        let mut config = Self::from_str_with_format(&content, is_json(&path))?;
        config.config_path = Some(path);
        Ok(config)
    }

    /// 从字符串解析配置
    pub fn from_str_with_format(content: &str, json: bool) -> Result<Self> {
        let config: CoreConfig = if json {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str(content)?
        };
        Ok(config)
    }

    /// 合并另一个配置（用于覆盖）
    ///
    /// 只覆盖非默认值；工作区列表追加。
    pub fn merge(&mut self, other: CoreConfig) {
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }

        let defaults = PolicyConfig::default();
        if other.policy.eager_activation != defaults.eager_activation {
            self.policy.eager_activation = other.policy.eager_activation;
        }
        if other.policy.build_errors_block != defaults.build_errors_block {
            self.policy.build_errors_block = other.policy.build_errors_block;
        }
        if other.policy.deactivated_dependencies_block != defaults.deactivated_dependencies_block
        {
            self.policy.deactivated_dependencies_block =
                other.policy.deactivated_dependencies_block;
        }
        if other.policy.singleton_tie_break != defaults.singleton_tie_break {
            self.policy.singleton_tie_break = other.policy.singleton_tie_break;
        }
        if other.policy.queue_on_conflict {
            self.policy.queue_on_conflict = true;
        }
        if other.policy.abort_on_first_failure {
            self.policy.abort_on_first_failure = true;
        }

        if other.preferences.provider != default_provider() {
            self.preferences.provider = other.preferences.provider;
        }
        self.preferences.values.extend(other.preferences.values);

        self.workspace.module_dirs.extend(other.workspace.module_dirs);
        self.workspace.external.extend(other.workspace.external);
        self.workspace.deactivated.extend(other.workspace.deactivated);
        self.workspace.build_errors.extend(other.workspace.build_errors);
    }
}

fn is_json(path: &std::path::Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
        }
    }

    /// 设置配置文件路径
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_path = Some(path.into());
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 设置是否急切激活
    pub fn eager_activation(mut self, enable: bool) -> Self {
        self.config.policy.eager_activation = enable;
        self
    }

    /// 设置构建错误是否阻止解析
    pub fn build_errors_block(mut self, enable: bool) -> Self {
        self.config.policy.build_errors_block = enable;
        self
    }

    /// 设置被去激活的依赖是否阻止解析
    pub fn deactivated_dependencies_block(mut self, enable: bool) -> Self {
        self.config.policy.deactivated_dependencies_block = enable;
        self
    }

    /// 设置单例取舍策略
    pub fn singleton_tie_break(mut self, tie_break: SingletonTieBreak) -> Self {
        self.config.policy.singleton_tie_break = tie_break;
        self
    }

    /// 设置迁移冲突时是否排队
    pub fn queue_on_conflict(mut self, enable: bool) -> Self {
        self.config.policy.queue_on_conflict = enable;
        self
    }

    /// 设置首个失败后是否中止
    pub fn abort_on_first_failure(mut self, enable: bool) -> Self {
        self.config.policy.abort_on_first_failure = enable;
        self
    }

    /// 设置偏好提供者
    pub fn preference_provider(mut self, name: impl Into<String>) -> Self {
        self.config.preferences.provider = name.into();
        self
    }

    /// 添加模块目录
    pub fn module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.workspace.module_dirs.push(dir.into());
        self
    }

    /// 添加外部模块
    pub fn external(mut self, manifest: ModuleManifest) -> Self {
        self.config.workspace.external.push(manifest);
        self
    }

    /// 构建配置
    pub fn build(self) -> CoreConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(config.policy.eager_activation);
        assert!(!config.policy.abort_on_first_failure);
        assert_eq!(config.preferences.provider, "config");
        assert!(config.workspace.module_dirs.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = CoreConfig::builder()
            .log_level("debug")
            .eager_activation(false)
            .singleton_tie_break(SingletonTieBreak::FirstEncountered)
            .module_dir("/ws/modules")
            .build();

        assert_eq!(config.logging.level, "debug");
        assert!(!config.policy.eager_activation);
        assert_eq!(
            config.policy.singleton_tie_break,
            SingletonTieBreak::FirstEncountered
        );
        assert_eq!(config.workspace.module_dirs.len(), 1);
    }

    #[test]
    fn test_config_merge() {
        let mut base = CoreConfig::builder().module_dir("/a").build();
        let override_config = CoreConfig::builder()
            .log_level("debug")
            .build_errors_block(false)
            .queue_on_conflict(true)
            .module_dir("/b")
            .build();

        base.merge(override_config);

        assert_eq!(base.logging.level, "debug");
        assert!(!base.policy.build_errors_block);
        assert!(base.policy.queue_on_conflict);
        assert_eq!(base.workspace.module_dirs.len(), 2);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
policy:
  eager_activation: false
  singleton_tie_break: first_encountered
workspace:
  deactivated: [legacy]
  external:
    - symbolic_name: org.runtime
      version: 2.1.0
"#;
        let config = CoreConfig::from_str_with_format(yaml, false).unwrap();
        assert!(!config.policy.eager_activation);
        assert!(config.policy.build_errors_block);
        assert_eq!(
            config.policy.singleton_tie_break,
            SingletonTieBreak::FirstEncountered
        );
        assert_eq!(config.workspace.deactivated, vec!["legacy"]);
        assert_eq!(config.workspace.external[0].identity(), "org.runtime@2.1.0");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let config = CoreConfig::builder()
            .log_level("warn")
            .abort_on_first_failure(true)
            .build();

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: CoreConfig = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.logging.level, "warn");
        assert!(parsed.policy.abort_on_first_failure);
    }
}
