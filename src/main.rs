//! Bundle Core 命令行入口
//!
//! 加载工作区配置，查询依赖闭包、预览或执行迁移。
//!
//! # 使用示例
//!
//! ```bash
//! # 检查工作区（依赖环、未满足的依赖）
//! bundle-core -c workspace.yaml check
//!
//! # 查看 app 的 providing 闭包
//! bundle-core closure --direction providing org.example.app
//!
//! # 预览 Stop 的执行顺序
//! bundle-core plan --transition stop org.example.base
//!
//! # 执行迁移，并模拟某个模块失败
//! bundle-core run --transition install,resolve --fail org.example.lib=编译失败 org.example.app
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{debug, info};

use bundle_core::{
    ClosureDirection, CoreConfig, Logger, LoggerConfig, ModuleId, ModuleManager, NoopScheduler,
    PreferenceProviderTable, ScriptedScheduler, Transition, TransitionOptions,
    TransitionScheduler,
};

/// Bundle Core - 工作区模块生命周期
#[derive(Parser)]
#[command(name = "bundle-core")]
#[command(version, about = "工作区模块的生命周期与依赖闭包决策", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "bundle-core.yaml", global = true)]
    config: PathBuf,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 输出格式
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml, global = true)]
    format: OutputFormat,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// 检查工作区：模块数、依赖边、依赖环与未满足的依赖
    Check,

    /// 列出已注册的模块及其状态
    List,

    /// 计算依赖闭包
    Closure {
        /// 闭包方向（providing, requiring, partial, single, bidirectional）
        #[arg(short, long, default_value = "providing")]
        direction: ClosureDirection,

        /// 结果包含种子
        #[arg(long)]
        include_seeds: bool,

        /// 种子模块
        #[arg(required = true)]
        ids: Vec<ModuleId>,
    },

    /// 预览迁移计划，不修改任何状态
    Plan {
        /// 迁移类型
        #[arg(short, long)]
        transition: Transition,

        /// 种子模块
        #[arg(required = true)]
        ids: Vec<ModuleId>,
    },

    /// 依次执行一个或多个迁移，遇到失败即停止
    Run {
        /// 迁移类型，逗号分隔，例如 `install,resolve,start`
        #[arg(short, long = "transition", value_delimiter = ',', required = true)]
        transitions: Vec<Transition>,

        /// 模拟某个模块的步骤失败，格式 `id=原因`，可重复
        #[arg(long = "fail", value_name = "ID=REASON")]
        failures: Vec<String>,

        /// 第一个失败后取消剩余步骤
        #[arg(long)]
        abort_on_first_failure: bool,

        /// 种子模块
        #[arg(required = true)]
        ids: Vec<ModuleId>,
    },

    /// 查看版本信息
    Version,
}

fn print_output<T: Serialize>(format: OutputFormat, value: &T) -> anyhow::Result<()> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", text);
    Ok(())
}

async fn load_config(path: &PathBuf) -> anyhow::Result<CoreConfig> {
    if path.exists() {
        let config = CoreConfig::from_file(path.clone())
            .await
            .with_context(|| format!("加载配置失败: {}", path.display()))?;
        Ok(config)
    } else {
        Ok(CoreConfig::default())
    }
}

fn build_scheduler(failures: &[String]) -> anyhow::Result<Arc<dyn TransitionScheduler>> {
    if failures.is_empty() {
        return Ok(Arc::new(NoopScheduler));
    }

    let mut scheduler = ScriptedScheduler::new();
    for entry in failures {
        let (id, reason) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("--fail 需要 id=原因 格式: {}", entry))?;
        scheduler = scheduler.fail(id.trim(), reason.trim());
    }
    Ok(Arc::new(scheduler))
}

async fn open_workspace(
    config: &CoreConfig,
    scheduler: Arc<dyn TransitionScheduler>,
) -> anyhow::Result<ModuleManager> {
    let manager =
        ModuleManager::from_config(config, &PreferenceProviderTable::with_builtins(), scheduler)?;
    let count = manager.load_workspace(&config.workspace).await?;
    debug!(count, "工作区模块已注册");
    Ok(manager)
}

fn print_version() {
    println!("bundle-core {}", bundle_core::VERSION);
    println!("  目标平台: {}", std::env::consts::ARCH);
    println!("  操作系统: {}", std::env::consts::OS);
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Version) {
        print_version();
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = load_config(&cli.config).await?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    let _guard = Logger::init(LoggerConfig::from_log_config(&config.logging))?;
    info!(config = %cli.config.display(), "已加载配置");

    match cli.command {
        Commands::Check => {
            let manager = open_workspace(&config, Arc::new(NoopScheduler)).await?;
            let report = manager.check().await;
            print_output(cli.format, &report)?;
            if !report.is_healthy() {
                return Ok(ExitCode::from(2));
            }
        }

        Commands::List => {
            let manager = open_workspace(&config, Arc::new(NoopScheduler)).await?;
            let mut modules = manager.registry().all().await;
            modules.sort_by_key(|m| m.id());
            print_output(cli.format, &modules)?;
        }

        Commands::Closure {
            direction,
            include_seeds,
            ids,
        } => {
            let manager = open_workspace(&config, Arc::new(NoopScheduler)).await?;
            let closure = manager.closure(&ids, direction, include_seeds).await?;
            print_output(cli.format, &closure)?;
        }

        Commands::Plan { transition, ids } => {
            let manager = open_workspace(&config, Arc::new(NoopScheduler)).await?;
            let plan = manager.plan(&ids, transition).await?;
            print_output(cli.format, &plan)?;
        }

        Commands::Run {
            transitions,
            failures,
            abort_on_first_failure,
            ids,
        } => {
            let scheduler = build_scheduler(&failures)?;
            let manager = open_workspace(&config, scheduler).await?;

            let mut options = TransitionOptions::from_preferences(manager.preferences());
            options.abort_on_first_failure |= abort_on_first_failure;

            for transition in transitions {
                let report = manager
                    .request_transition_with(&ids, transition, options)
                    .await?;
                print_output(cli.format, &report)?;
                if !report.succeeded() {
                    return Ok(ExitCode::FAILURE);
                }
            }
        }

        Commands::Version => print_version(),
    }

    Ok(ExitCode::SUCCESS)
}
