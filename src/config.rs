//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FARMHAND__*` 覆盖（双下划线表示
//! 嵌套，如 `FARMHAND__ENGINE__MODEL=qwen2`）。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub pipeline: PipelineSection,
    pub reactive: ReactiveSection,
    pub autonomous: AutonomousSection,
    /// 体征名 -> 低位阈值；低于阈值的体征在报告中内联标注
    #[serde(default = "default_thresholds")]
    pub thresholds: BTreeMap<String, f64>,
}

/// [engine] 段：推理引擎（Ollama）模型、上下文窗口、采样与超时
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 上下文窗口（Ollama num_ctx）
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// 单次引擎调用超时（秒），超时按 Timeout 处理而非阻塞
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            num_ctx: default_num_ctx(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "llama3".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_num_ctx() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

fn default_timeout_secs() -> u64 {
    60
}

/// [pipeline] 段：输出文法与驱动模式（显式配置，不从文本推断）
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// json / compact
    #[serde(default = "default_grammar")]
    pub grammar: String,
    /// reactive / autonomous
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            grammar: default_grammar(),
            mode: default_mode(),
        }
    }
}

fn default_grammar() -> String {
    "json".to_string()
}

fn default_mode() -> String {
    "reactive".to_string()
}

/// [reactive] 段：WebSocket 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ReactiveSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ReactiveSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8765".to_string()
}

/// [autonomous] 段：快照文件轮询
#[derive(Debug, Clone, Deserialize)]
pub struct AutonomousSection {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// 决策含 wait 时额外停顿的上限（秒）
    #[serde(default = "default_max_action_pause_secs")]
    pub max_action_pause_secs: u64,
}

impl Default for AutonomousSection {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            poll_interval_secs: default_poll_interval_secs(),
            max_action_pause_secs: default_max_action_pause_secs(),
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("snapshot.json")
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_max_action_pause_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineSection::default(),
            pipeline: PipelineSection::default(),
            reactive: ReactiveSection::default(),
            autonomous: AutonomousSection::default(),
            thresholds: default_thresholds(),
        }
    }
}

/// 默认阈值：水分/能量/健康 < 30 危急，心神 < 50 疲惫
pub fn default_thresholds() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("hydration".to_string(), 30.0),
        ("nutrition".to_string(), 30.0),
        ("health".to_string(), 30.0),
        ("sanity".to_string(), 50.0),
    ])
}

/// 从 config 目录加载配置，环境变量 FARMHAND__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FARMHAND__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FARMHAND")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
