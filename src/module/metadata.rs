//! 模块元数据定义
//!
//! 定义模块描述文件 (module.yaml) 中的数据结构，以及注册表对外提供的模块快照。

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 模块标识
///
/// 由符号名和可选版本组成，渲染为 `name` 或 `name@version`。
/// 同一符号名的不同版本可以同时注册，这是单例去重的前提。
pub type ModuleId = String;

/// 根据符号名和版本生成模块标识
pub fn module_identity(symbolic_name: &str, version: Option<&Version>) -> ModuleId {
    match version {
        Some(v) => format!("{}@{}", symbolic_name, v),
        None => symbolic_name.to_string(),
    }
}

/// 工作区单元
///
/// 产生模块的源代码级项目。以路径作为身份。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceUnit {
    /// 单元名称（通常是项目名）
    pub name: String,

    /// 单元根目录
    pub path: PathBuf,
}

impl WorkspaceUnit {
    /// 创建工作区单元
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for WorkspaceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

/// 依赖声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// 被依赖模块的符号名
    pub name: String,

    /// 版本范围（semver 格式），缺省表示任意版本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// 是否为可选依赖
    #[serde(default)]
    pub optional: bool,
}

impl Requirement {
    /// 依赖任意版本的 `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            optional: false,
        }
    }

    /// 设置版本范围
    pub fn with_version(mut self, range: impl Into<String>) -> Self {
        self.version = Some(range.into());
        self
    }

    /// 设置为可选依赖
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// 检查候选版本是否满足要求
    ///
    /// 没有版本的候选模块只满足不带范围的依赖。
    pub fn matches(&self, candidate: Option<&Version>) -> bool {
        match (&self.version, candidate) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(range), Some(version)) => VersionReq::parse(range)
                .map(|req| req.matches(version))
                .unwrap_or(false),
        }
    }
}

/// 模块清单
///
/// 对应 module.yaml 文件中的配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// 符号名
    pub symbolic_name: String,

    /// 模块版本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,

    /// 是否为单例模块
    #[serde(default)]
    pub singleton: bool,

    /// 依赖声明
    #[serde(default)]
    pub requires: Vec<Requirement>,
}

impl ModuleManifest {
    /// 创建新的模块清单
    pub fn new(symbolic_name: impl Into<String>) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version: None,
            singleton: false,
            requires: vec![],
        }
    }

    /// 设置版本
    ///
    /// 版本格式无效时返回 semver 解析错误。
    pub fn with_version(mut self, version: &str) -> std::result::Result<Self, semver::Error> {
        self.version = Some(Version::parse(version)?);
        Ok(self)
    }

    /// 标记为单例
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    /// 追加依赖
    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.requires.push(requirement);
        self
    }

    /// 模块标识
    pub fn identity(&self) -> ModuleId {
        module_identity(&self.symbolic_name, self.version.as_ref())
    }
}

/// 模块生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// 未安装（注册后的初始状态）
    Uninstalled,
    /// 已安装
    Installed,
    /// 已解析
    Resolved,
    /// 已启动
    Active,
}

impl Default for ModuleState {
    fn default() -> Self {
        ModuleState::Uninstalled
    }
}

impl ModuleState {
    /// 状态等级，用于判断迁移方向
    pub fn rank(self) -> u8 {
        match self {
            ModuleState::Uninstalled => 0,
            ModuleState::Installed => 1,
            ModuleState::Resolved => 2,
            ModuleState::Active => 3,
        }
    }

    /// 是否至少已解析
    pub fn is_resolved(self) -> bool {
        self.rank() >= ModuleState::Resolved.rank()
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Uninstalled => "uninstalled",
            ModuleState::Installed => "installed",
            ModuleState::Resolved => "resolved",
            ModuleState::Active => "active",
        };
        f.write_str(s)
    }
}

/// 迁移请求类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// 安装
    Install,
    /// 卸载
    Uninstall,
    /// 解析
    Resolve,
    /// 取消解析
    Unresolve,
    /// 更新（回到 Installed）
    Update,
    /// 刷新，状态不变
    Refresh,
    /// 启动（激活）
    Start,
    /// 停止（去激活）
    Stop,
    /// 由子系统之外完成、需要对账的迁移
    External,
}

impl Transition {
    /// 全部迁移类型
    pub const ALL: [Transition; 9] = [
        Transition::Install,
        Transition::Uninstall,
        Transition::Resolve,
        Transition::Unresolve,
        Transition::Update,
        Transition::Refresh,
        Transition::Start,
        Transition::Stop,
        Transition::External,
    ];

    /// 是否向上迁移（依赖必须先就绪）
    pub fn is_upward(self) -> bool {
        matches!(
            self,
            Transition::Install | Transition::Resolve | Transition::Start
        )
    }

    /// 是否向下迁移（依赖方必须先退出）
    pub fn is_downward(self) -> bool {
        matches!(
            self,
            Transition::Uninstall | Transition::Unresolve | Transition::Stop
        )
    }

    /// 迁移提交前是否需要经过解析过滤器
    pub fn resolves(self) -> bool {
        matches!(
            self,
            Transition::Resolve | Transition::Start | Transition::Refresh
        )
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transition::Install => "install",
            Transition::Uninstall => "uninstall",
            Transition::Resolve => "resolve",
            Transition::Unresolve => "unresolve",
            Transition::Update => "update",
            Transition::Refresh => "refresh",
            Transition::Start => "start",
            Transition::Stop => "stop",
            Transition::External => "external",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Transition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Transition::ALL
            .iter()
            .copied()
            .find(|t| t.to_string() == s.to_lowercase())
            .ok_or_else(|| format!("未知的迁移类型: {}", s))
    }
}

/// 工作区激活标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// 已在工作区中激活
    Activated,
    /// 已在工作区中去激活
    Deactivated,
}

impl Default for Availability {
    fn default() -> Self {
        Availability::Activated
    }
}

/// 模块快照
///
/// 注册表独占模块数据，对外只返回克隆出的快照。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// 模块清单
    pub manifest: ModuleManifest,

    /// 所属工作区单元（工作区外部模块为 None）
    pub unit: Option<WorkspaceUnit>,

    /// 工作区激活标记
    pub availability: Availability,

    /// 当前状态
    pub state: ModuleState,

    /// 最近一次（或正在进行的）迁移
    pub current_transition: Option<Transition>,

    /// 状态是否正在变化
    pub state_changing: bool,

    /// 是否存在构建错误
    pub build_error: bool,

    /// 注册序号，用于稳定的“先注册优先”排序
    pub registration_seq: u64,
}

impl Module {
    /// 创建新的模块快照（初始状态为 Uninstalled）
    pub fn new(manifest: ModuleManifest, unit: Option<WorkspaceUnit>) -> Self {
        Self {
            manifest,
            unit,
            availability: Availability::Activated,
            state: ModuleState::Uninstalled,
            current_transition: None,
            state_changing: false,
            build_error: false,
            registration_seq: 0,
        }
    }

    /// 获取模块标识
    pub fn id(&self) -> ModuleId {
        self.manifest.identity()
    }

    /// 获取符号名
    pub fn symbolic_name(&self) -> &str {
        &self.manifest.symbolic_name
    }

    /// 获取版本
    pub fn version(&self) -> Option<&Version> {
        self.manifest.version.as_ref()
    }

    /// 是否为单例
    pub fn is_singleton(&self) -> bool {
        self.manifest.singleton
    }

    /// 是否为工作区外部模块
    pub fn is_external(&self) -> bool {
        self.unit.is_none()
    }

    /// 是否在工作区中被去激活
    ///
    /// 外部模块不受工作区激活标记影响。
    pub fn is_deactivated(&self) -> bool {
        !self.is_external() && self.availability == Availability::Deactivated
    }
}
