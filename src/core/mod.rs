//! 核心模块
//!
//! 包含配置加载和偏好设置。

pub mod config;
pub mod preferences;

pub use config::{
    CoreConfig, CoreConfigBuilder, LogConfig, PolicyConfig, PreferencesConfig, WorkspaceConfig,
};
pub use preferences::{
    ConfigPreferences, MapPreferences, PreferenceFactory, PreferenceProvider,
    PreferenceProviderTable, PreferenceValue, Preferences,
};
