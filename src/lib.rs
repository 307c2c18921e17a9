//! Farmhand - 农场 AI 行为体决策管线
//!
//! 每个 tick 执行一次「感知 → 决策」流水线：
//! 快照归一化 → 报告渲染 → 提示构建 → 推理引擎调用 → 输出解码与校验。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **control**: 控制循环（反应式 WebSocket / 自主轮询两种驱动）
//! - **decision**: 输出解码与校验（JSON / 紧凑令牌两种文法）
//! - **engine**: 推理引擎客户端抽象与实现（Ollama / Mock）
//! - **error**: 运行期错误分类
//! - **prompt**: 行为契约（指令块）与提示构建
//! - **report**: 感知报告渲染（确定性纯函数）
//! - **snapshot**: 世界快照归一化与阈值分类

pub mod config;
pub mod control;
pub mod decision;
pub mod engine;
pub mod error;
pub mod prompt;
pub mod report;
pub mod snapshot;

pub use control::{run_tick, AgentContext, TickOutcome};
pub use decision::{Action, Decision, Grammar};
pub use engine::{DecisionEngine, MockEngine, OllamaEngine, SamplingOptions};
pub use error::AgentError;
pub use snapshot::WorldSnapshot;
