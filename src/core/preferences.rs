//! 偏好设置
//!
//! 策略判断（是否急切激活、构建错误是否阻止解析等）读取的只读键值接口。
//!
//! 偏好提供者通过名称 → 工厂的注册表在启动时解析一次，之后只以
//! [`Preferences`] 的形式传递，核心逻辑不接触查找过程。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::config::{CoreConfig, PolicyConfig};
use crate::module::filter::{FilterPolicy, SingletonTieBreak};
use crate::module::lifecycle::ConflictPolicy;
use crate::utils::{CoreError, Result};

/// 偏好键
pub mod keys {
    /// Start 是否同时启动 providing 闭包
    pub const ACTIVATION_EAGER: &str = "activation.eager";
    /// 构建错误是否阻止解析
    pub const BUILD_ERRORS_BLOCK: &str = "filter.build_errors_block";
    /// 被去激活的依赖是否阻止解析
    pub const DEACTIVATED_DEPENDENCIES_BLOCK: &str = "filter.deactivated_dependencies_block";
    /// 单例取舍策略（0 = 最高版本，1 = 先出现者）
    pub const SINGLETON_TIE_BREAK: &str = "filter.singleton_tie_break";
    /// 迁移冲突时是否排队
    pub const QUEUE_ON_CONFLICT: &str = "transition.queue_on_conflict";
    /// 首个失败后是否中止剩余步骤
    pub const ABORT_ON_FIRST_FAILURE: &str = "transition.abort_on_first_failure";
}

/// 内置提供者名称
pub const CONFIG_PROVIDER: &str = "config";
/// 内置提供者名称
pub const MEMORY_PROVIDER: &str = "memory";

/// 偏好值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreferenceValue {
    /// 布尔值
    Bool(bool),
    /// 整数值
    Int(i64),
}

/// 偏好提供者
pub trait PreferenceProvider: Send + Sync + fmt::Debug {
    /// 读取布尔值，未设置时返回 None
    fn get_bool(&self, key: &str) -> Option<bool>;

    /// 读取整数值，未设置时返回 None
    fn get_int(&self, key: &str) -> Option<i64>;

    /// 提供者名称
    fn name(&self) -> &str;
}

/// 读取配置文件 `policy` 段的提供者
#[derive(Debug, Clone, Default)]
pub struct ConfigPreferences {
    policy: PolicyConfig,
}

impl ConfigPreferences {
    /// 从策略配置创建
    pub fn new(policy: PolicyConfig) -> Self {
        Self { policy }
    }
}

impl PreferenceProvider for ConfigPreferences {
    fn get_bool(&self, key: &str) -> Option<bool> {
        match key {
            keys::ACTIVATION_EAGER => Some(self.policy.eager_activation),
            keys::BUILD_ERRORS_BLOCK => Some(self.policy.build_errors_block),
            keys::DEACTIVATED_DEPENDENCIES_BLOCK => {
                Some(self.policy.deactivated_dependencies_block)
            }
            keys::QUEUE_ON_CONFLICT => Some(self.policy.queue_on_conflict),
            keys::ABORT_ON_FIRST_FAILURE => Some(self.policy.abort_on_first_failure),
            _ => None,
        }
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match key {
            keys::SINGLETON_TIE_BREAK => Some(match self.policy.singleton_tie_break {
                SingletonTieBreak::HighestVersion => 0,
                SingletonTieBreak::FirstEncountered => 1,
            }),
            _ => None,
        }
    }

    fn name(&self) -> &str {
        CONFIG_PROVIDER
    }
}

/// 内存键值提供者
///
/// 初始值来自配置文件 `preferences.values`，运行期间可修改。
#[derive(Debug, Default)]
pub struct MapPreferences {
    values: RwLock<HashMap<String, PreferenceValue>>,
}

impl MapPreferences {
    /// 创建空的提供者
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用初始值创建
    pub fn with_values(values: HashMap<String, PreferenceValue>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    /// 设置值
    pub fn set(&self, key: impl Into<String>, value: PreferenceValue) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    fn get(&self, key: &str) -> Option<PreferenceValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }
}

impl PreferenceProvider for MapPreferences {
    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            PreferenceValue::Bool(b) => Some(b),
            PreferenceValue::Int(i) => Some(i != 0),
        }
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            PreferenceValue::Int(i) => Some(i),
            PreferenceValue::Bool(b) => Some(i64::from(b)),
        }
    }

    fn name(&self) -> &str {
        MEMORY_PROVIDER
    }
}

/// 提供者工厂
pub type PreferenceFactory = fn(&CoreConfig) -> Arc<dyn PreferenceProvider>;

/// 偏好提供者注册表（名称 → 工厂）
#[derive(Clone)]
pub struct PreferenceProviderTable {
    factories: HashMap<String, PreferenceFactory>,
}

impl PreferenceProviderTable {
    /// 创建空表
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// 包含内置提供者的表
    pub fn with_builtins() -> Self {
        let mut table = Self::empty();
        table.register(CONFIG_PROVIDER, |config| {
            Arc::new(ConfigPreferences::new(config.policy.clone()))
        });
        table.register(MEMORY_PROVIDER, |config| {
            Arc::new(MapPreferences::with_values(config.preferences.values.clone()))
        });
        table
    }

    /// 注册提供者，同名时覆盖
    pub fn register(&mut self, name: impl Into<String>, factory: PreferenceFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// 解析提供者
    pub fn resolve(&self, name: &str, config: &CoreConfig) -> Result<Arc<dyn PreferenceProvider>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| CoreError::PreferenceProviderNotFound(name.to_string()))?;
        debug!(provider = %name, "偏好提供者已解析");
        Ok(factory(config))
    }

    /// 已注册的名称（排序）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for PreferenceProviderTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for PreferenceProviderTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreferenceProviderTable")
            .field("providers", &self.names())
            .finish()
    }
}

/// 带默认值的偏好视图
#[derive(Debug, Clone)]
pub struct Preferences {
    provider: Arc<dyn PreferenceProvider>,
}

impl Preferences {
    /// 包装提供者
    pub fn new(provider: Arc<dyn PreferenceProvider>) -> Self {
        Self { provider }
    }

    /// 按配置中的 `preferences.provider` 解析
    pub fn from_config(config: &CoreConfig, table: &PreferenceProviderTable) -> Result<Self> {
        let provider = table.resolve(&config.preferences.provider, config)?;
        Ok(Self::new(provider))
    }

    /// 提供者名称
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// 读取布尔值
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.provider.get_bool(key).unwrap_or(default)
    }

    /// 读取整数值
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.provider.get_int(key).unwrap_or(default)
    }

    /// 默认 true
    pub fn eager_activation(&self) -> bool {
        self.get_bool(keys::ACTIVATION_EAGER, true)
    }

    /// 默认 true
    pub fn build_errors_block(&self) -> bool {
        self.get_bool(keys::BUILD_ERRORS_BLOCK, true)
    }

    /// 默认 true
    pub fn deactivated_dependencies_block(&self) -> bool {
        self.get_bool(keys::DEACTIVATED_DEPENDENCIES_BLOCK, true)
    }

    /// 默认最高版本
    pub fn singleton_tie_break(&self) -> SingletonTieBreak {
        SingletonTieBreak::from_preference(self.get_int(keys::SINGLETON_TIE_BREAK, 0))
    }

    /// 默认 false
    pub fn queue_on_conflict(&self) -> bool {
        self.get_bool(keys::QUEUE_ON_CONFLICT, false)
    }

    /// 默认 false
    pub fn abort_on_first_failure(&self) -> bool {
        self.get_bool(keys::ABORT_ON_FIRST_FAILURE, false)
    }

    /// 过滤策略
    pub fn filter_policy(&self) -> FilterPolicy {
        FilterPolicy {
            tie_break: self.singleton_tie_break(),
            build_errors_block: self.build_errors_block(),
            deactivated_dependencies_block: self.deactivated_dependencies_block(),
        }
    }

    /// 迁移冲突策略
    pub fn conflict_policy(&self) -> ConflictPolicy {
        if self.queue_on_conflict() {
            ConflictPolicy::Queue
        } else {
            ConflictPolicy::Fail
        }
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self::new(Arc::new(MapPreferences::new()))
    }
}
