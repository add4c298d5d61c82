//! 模块清单解析器
//!
//! 负责从 module.yaml 文件解析模块清单并做格式校验。

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::module::metadata::ModuleManifest;
use crate::utils::{CoreError, Result};

/// 默认的模块清单文件名
pub const MANIFEST_FILENAME: &str = "module.yaml";

/// 符号名格式：字母开头，段之间以点分隔，如 `org.demo.core`
static SYMBOLIC_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*(\.[A-Za-z0-9_-]+)*$").expect("Invalid symbolic name regex")
});

/// 模块清单解析器
#[derive(Debug, Clone, Default)]
pub struct ManifestParser;

impl ManifestParser {
    /// 从文件解析模块清单
    ///
    /// # Errors
    ///
    /// - 文件不存在或无法读取时返回 IO 错误
    /// - 文件内容不符合 YAML 格式时返回 YAML 错误
    /// - 清单校验失败时返回 `InvalidMetadata` 错误
    pub async fn parse_file(path: &Path) -> Result<ModuleManifest> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_string(&content)
    }

    /// 从文件同步解析模块清单
    pub fn parse_file_sync(path: &Path) -> Result<ModuleManifest> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_string(&content)
    }

    /// 从字符串解析模块清单
    pub fn parse_string(content: &str) -> Result<ModuleManifest> {
        let manifest: ModuleManifest = serde_yaml::from_str(content)?;
        Self::validate(&manifest)?;
        Ok(manifest)
    }

    /// 校验模块清单
    ///
    /// 执行以下校验：
    /// - 符号名格式
    /// - 依赖名称格式与版本范围（semver）
    /// - 不允许依赖自身
    pub fn validate(manifest: &ModuleManifest) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if !Self::is_valid_symbolic_name(&manifest.symbolic_name) {
            errors.push(format!("符号名 '{}' 格式无效", manifest.symbolic_name));
        }

        for (index, req) in manifest.requires.iter().enumerate() {
            if !Self::is_valid_symbolic_name(&req.name) {
                errors.push(format!("第 {} 个依赖的符号名 '{}' 格式无效", index + 1, req.name));
            }

            if req.name == manifest.symbolic_name {
                errors.push(format!("模块 '{}' 不能依赖自身", req.name));
            }

            if let Some(ref range) = req.version {
                if semver::VersionReq::parse(range).is_err() {
                    errors.push(format!(
                        "依赖 '{}' 的版本范围格式无效: '{}'",
                        req.name, range
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidMetadata(errors.join("; ")))
        }
    }

    /// 检查符号名格式是否有效
    pub fn is_valid_symbolic_name(name: &str) -> bool {
        SYMBOLIC_NAME_REGEX.is_match(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VALID_MANIFEST: &str = r#"
symbolic_name: org.demo.ui
version: 1.2.0
singleton: true
requires:
  - name: org.demo.core
    version: ">=1.0, <2.0"
  - name: org.demo.icons
    optional: true
"#;

    #[test]
    fn test_parse_valid_manifest() {
        let manifest = ManifestParser::parse_string(VALID_MANIFEST).unwrap();

        assert_eq!(manifest.symbolic_name, "org.demo.ui");
        assert_eq!(manifest.version.as_ref().unwrap().to_string(), "1.2.0");
        assert!(manifest.singleton);
        assert_eq!(manifest.requires.len(), 2);
        assert!(manifest.requires[1].optional);
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let manifest = ManifestParser::parse_string("symbolic_name: tool").unwrap();
        assert!(manifest.version.is_none());
        assert!(!manifest.singleton);
        assert!(manifest.requires.is_empty());
    }

    #[test]
    fn test_reject_invalid_symbolic_name() {
        let result = ManifestParser::parse_string("symbolic_name: 9lives");
        assert!(matches!(result, Err(CoreError::InvalidMetadata(_))));
    }

    #[test]
    fn test_reject_invalid_range() {
        let yaml = r#"
symbolic_name: a
requires:
  - name: b
    version: "not-a-range"
"#;
        let err = ManifestParser::parse_string(yaml).unwrap_err();
        assert!(err.to_string().contains("not-a-range"));
    }

    #[test]
    fn test_reject_self_requirement() {
        let yaml = r#"
symbolic_name: a
requires:
  - name: a
"#;
        assert!(ManifestParser::parse_string(yaml).is_err());
    }

    #[test]
    fn test_reject_invalid_version() {
        let result = ManifestParser::parse_string("symbolic_name: a\nversion: one");
        assert!(matches!(result, Err(CoreError::Yaml(_))));
    }

    #[tokio::test]
    async fn test_parse_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(MANIFEST_FILENAME);
        tokio::fs::write(&path, VALID_MANIFEST).await.unwrap();

        let manifest = ManifestParser::parse_file(&path).await.unwrap();
        assert_eq!(manifest.identity(), "org.demo.ui@1.2.0");

        let sync = ManifestParser::parse_file_sync(&path).unwrap();
        assert_eq!(sync, manifest);
    }
}
