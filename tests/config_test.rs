//! 配置与偏好设置集成测试
//!
//! 覆盖 YAML / JSON 文件加载、覆盖合并，以及偏好提供者的解析。

use std::sync::Arc;

use bundle_core::core::preferences::{keys, MapPreferences, PreferenceValue};
use bundle_core::module::{ConflictPolicy, SingletonTieBreak};
use bundle_core::{
    CoreConfig, CoreError, ModuleManager, ModuleManifest, ModuleState, NoopScheduler,
    PreferenceProvider, PreferenceProviderTable, Preferences, Transition,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_load_yaml_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bundle-core.yaml");
    tokio::fs::write(
        &path,
        r#"
logging:
  level: debug
  rotation: hourly
policy:
  eager_activation: false
  singleton_tie_break: first_encountered
workspace:
  module_dirs:
    - ./modules
  deactivated:
    - org.demo.legacy
"#,
    )
    .await
    .unwrap();

    let config = CoreConfig::from_file(&path).await.unwrap();
    assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.rotation, "hourly");
    assert!(!config.policy.eager_activation);
    assert!(config.policy.build_errors_block);
    assert_eq!(
        config.policy.singleton_tie_break,
        SingletonTieBreak::FirstEncountered
    );
    assert_eq!(config.workspace.module_dirs.len(), 1);
    assert_eq!(config.workspace.deactivated, vec!["org.demo.legacy"]);
    assert_eq!(config.preferences.provider, "config");
}

#[tokio::test]
async fn test_load_json_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bundle-core.json");
    tokio::fs::write(
        &path,
        r#"{
  "policy": { "queue_on_conflict": true },
  "preferences": {
    "provider": "memory",
    "values": { "activation.eager": false, "filter.singleton_tie_break": 1 }
  }
}"#,
    )
    .await
    .unwrap();

    let config = CoreConfig::from_file(&path).await.unwrap();
    assert!(config.policy.queue_on_conflict);
    assert_eq!(config.preferences.provider, "memory");
    assert_eq!(
        config.preferences.values.get(keys::ACTIVATION_EAGER),
        Some(&PreferenceValue::Bool(false))
    );
    assert_eq!(
        config.preferences.values.get(keys::SINGLETON_TIE_BREAK),
        Some(&PreferenceValue::Int(1))
    );
}

#[tokio::test]
async fn test_missing_and_malformed_config() {
    let dir = TempDir::new().unwrap();

    let err = CoreConfig::from_file(dir.path().join("absent.yaml"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ConfigLoadFailed(_)));

    let path = dir.path().join("broken.yaml");
    tokio::fs::write(&path, "policy: [not, a, map]").await.unwrap();
    let err = CoreConfig::from_file(&path).await.unwrap_err();
    assert!(matches!(err, CoreError::Yaml(_)));
}

#[test]
fn test_merge_overrides_and_appends() {
    let mut base = CoreConfig::builder()
        .module_dir("/ws/a")
        .log_level("info")
        .build();
    let overlay = CoreConfig::builder()
        .module_dir("/ws/b")
        .log_level("trace")
        .abort_on_first_failure(true)
        .build();

    base.merge(overlay);

    assert_eq!(base.logging.level, "trace");
    assert!(base.policy.abort_on_first_failure);
    assert_eq!(base.workspace.module_dirs.len(), 2);
}

// ============================================================================
// 偏好提供者
// ============================================================================

#[test]
fn test_config_provider_reads_policy() {
    let config = CoreConfig::builder()
        .eager_activation(false)
        .queue_on_conflict(true)
        .build();
    let prefs = Preferences::from_config(&config, &PreferenceProviderTable::with_builtins()).unwrap();

    assert_eq!(prefs.provider_name(), "config");
    assert!(!prefs.eager_activation());
    assert_eq!(prefs.conflict_policy(), ConflictPolicy::Queue);
    assert!(prefs.filter_policy().build_errors_block);
}

#[test]
fn test_memory_provider_from_config_values() {
    let mut config = CoreConfig::builder().preference_provider("memory").build();
    config
        .preferences
        .values
        .insert(keys::BUILD_ERRORS_BLOCK.to_string(), PreferenceValue::Bool(false));

    let prefs = Preferences::from_config(&config, &PreferenceProviderTable::default()).unwrap();
    assert_eq!(prefs.provider_name(), "memory");
    assert!(!prefs.build_errors_block());
    // 未设置的键回落到默认值
    assert!(prefs.eager_activation());
    assert_eq!(prefs.singleton_tie_break(), SingletonTieBreak::HighestVersion);
}

#[test]
fn test_unknown_provider_rejected() {
    let config = CoreConfig::builder().preference_provider("registry").build();
    let err = Preferences::from_config(&config, &PreferenceProviderTable::with_builtins())
        .unwrap_err();
    assert!(matches!(err, CoreError::PreferenceProviderNotFound(ref name) if name == "registry"));

    let err = ModuleManager::from_config(
        &config,
        &PreferenceProviderTable::empty(),
        Arc::new(NoopScheduler),
    )
    .err()
    .unwrap();
    assert_eq!(err.error_code(), bundle_core::error_code::CONFIG_PROVIDER_NOT_FOUND);
}

#[derive(Debug)]
struct LazyOnly;

impl PreferenceProvider for LazyOnly {
    fn get_bool(&self, key: &str) -> Option<bool> {
        (key == keys::ACTIVATION_EAGER).then_some(false)
    }

    fn get_int(&self, _key: &str) -> Option<i64> {
        None
    }

    fn name(&self) -> &str {
        "lazy-only"
    }
}

#[tokio::test]
async fn test_custom_provider_changes_start_behavior() {
    let mut table = PreferenceProviderTable::with_builtins();
    table.register("lazy-only", |_| Arc::new(LazyOnly));
    assert_eq!(table.names(), vec!["config", "lazy-only", "memory"]);

    let config = CoreConfig::builder()
        .preference_provider("lazy-only")
        .external(ModuleManifest::new("org.demo.base"))
        .external(
            ModuleManifest::new("org.demo.app")
                .requires(bundle_core::Requirement::new("org.demo.base")),
        )
        .build();
    let manager = ModuleManager::from_config(&config, &table, Arc::new(NoopScheduler)).unwrap();
    manager.load_workspace(&config.workspace).await.unwrap();

    let both = vec!["org.demo.app".to_string(), "org.demo.base".to_string()];
    let app = vec!["org.demo.app".to_string()];
    manager.request_transition(&both, Transition::Install).await.unwrap();
    manager.request_transition(&both, Transition::Resolve).await.unwrap();

    let plan = manager.plan(&app, Transition::Start).await.unwrap();
    assert_eq!(plan.steps, app);

    manager.execute(plan, Default::default()).await.unwrap();
    let base = manager.registry().lookup("org.demo.base").await.unwrap();
    assert_eq!(base.state, ModuleState::Resolved);
}

#[test]
fn test_map_preferences_runtime_update() {
    let provider = Arc::new(MapPreferences::new());
    let prefs = Preferences::new(provider.clone());
    assert!(!prefs.abort_on_first_failure());

    provider.set(keys::ABORT_ON_FIRST_FAILURE, PreferenceValue::Int(1));
    assert!(prefs.abort_on_first_failure());
}
