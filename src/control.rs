//! 控制循环
//!
//! 每 tick 严格顺序执行：快照归一化 → 报告渲染 → 提示构建 → 引擎调用
//! （唯一挂起点，完整 await）→ 解码校验。两种驱动：
//! - **反应式**：WebSocket 通道逐消息触发，一问一答、同序回复；多个通道
//!   各自独立顺序循环，除无状态引擎客户端外不共享可变状态。
//! - **自主**：固定节奏轮询快照文件，读不到就睡一个间隔再试；只看轮询
//!   时刻的最新快照，不排队补偿错过的中间状态。
//!
//! 循环内任何失败都被就地吸收并记录，本 tick 作废、下 tick 照常开始。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, AutonomousSection};
use crate::decision::{self, Decision, Grammar};
use crate::engine::{DecisionEngine, EngineError, SamplingOptions};
use crate::error::AgentError;
use crate::prompt::build_prompt;
use crate::report::render_report;
use crate::snapshot::parse_snapshot;

/// 进程级上下文：启动时构建一次，显式传入控制循环，进程存活期内常驻
pub struct AgentContext {
    pub engine: Arc<dyn DecisionEngine>,
    pub grammar: Grammar,
    pub thresholds: BTreeMap<String, f64>,
    pub sampling: SamplingOptions,
}

impl AgentContext {
    pub fn new(cfg: &AppConfig, engine: Arc<dyn DecisionEngine>) -> Result<Self, AgentError> {
        let grammar = Grammar::from_name(&cfg.pipeline.grammar).ok_or_else(|| {
            AgentError::Config(format!("unknown grammar: {}", cfg.pipeline.grammar))
        })?;
        Ok(Self {
            engine,
            grammar,
            thresholds: cfg.thresholds.clone(),
            sampling: SamplingOptions {
                temperature: cfg.engine.temperature,
                num_ctx: cfg.engine.num_ctx,
            },
        })
    }
}

/// 单个 tick 的结果：有效决策，或被吸收的失败（本 tick 发呆）
#[derive(Debug)]
pub enum TickOutcome {
    Decided(Decision),
    Skipped(AgentError),
}

/// 执行一个完整 tick：归一化 → 渲染 → 提示 → 引擎 → 解码
pub async fn run_tick(ctx: &AgentContext, raw: &str) -> TickOutcome {
    let snapshot = match parse_snapshot(raw) {
        Ok(s) => s,
        Err(e) => return TickOutcome::Skipped(e),
    };

    let report = render_report(&snapshot, &ctx.thresholds);
    tracing::debug!(chars = report.len(), "rendered perception report");

    let messages = build_prompt(ctx.grammar, &report);

    let reply = match ctx.engine.complete(&messages, &ctx.sampling).await {
        Ok(r) => r,
        Err(EngineError::Timeout) => return TickOutcome::Skipped(AgentError::Timeout),
        Err(EngineError::Unavailable(e)) => {
            return TickOutcome::Skipped(AgentError::EngineUnavailable(e))
        }
    };

    match decision::decode(ctx.grammar, &reply) {
        Ok(decision) => {
            for rejected in &decision.rejected {
                tracing::warn!(raw = %rejected.raw, reason = %rejected.reason, "action dropped");
            }
            TickOutcome::Decided(decision)
        }
        Err(failure) => TickOutcome::Skipped(AgentError::Decode(failure)),
    }
}

// ---------------------------------------------------------------------------
// 反应式驱动
// ---------------------------------------------------------------------------

/// 反应式模式：监听 WebSocket，一条入站快照触发一个 tick，回复编码后的
/// 决策行（或带 ⚠ 标记的错误标注）。每个连接一个顺序循环；取消令牌只
/// 停止 accept 循环与各连接的后续读取，不影响在途 tick。
pub async fn serve_reactive(
    ctx: Arc<AgentContext>,
    bind_addr: &str,
    cancel: CancellationToken,
) -> Result<(), AgentError> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AgentError::Config(format!("failed to bind {}: {}", bind_addr, e)))?;

    tracing::info!("Reactive channel listening on ws://{}", bind_addr);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let ctx = Arc::clone(&ctx);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            tracing::info!("Channel connected from {}", addr);
                            if let Err(e) = handle_channel(ctx, stream, cancel).await {
                                tracing::warn!("Channel {} closed: {}", addr, e);
                            } else {
                                tracing::info!("Channel {} closed", addr);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Accept error: {}", e),
                }
            }
        }
    }

    Ok(())
}

/// 单通道循环：读一条、跑一个 tick、回一条，严格一问一答保证同序
async fn handle_channel(
    ctx: Arc<AgentContext>,
    stream: TcpStream,
    cancel: CancellationToken,
) -> Result<(), String> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| format!("WebSocket handshake failed: {}", e))?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = ws_rx.next() => match msg {
                Some(Ok(m)) => m,
                Some(Err(e)) => return Err(format!("receive error: {}", e)),
                None => break,
            },
        };

        match msg {
            WsMessage::Text(text) => {
                let reply = match run_tick(&ctx, &text).await {
                    TickOutcome::Decided(decision) => {
                        tracing::info!(text = %decision.text, actions = decision.actions.len(), "decision");
                        decision::encode(ctx.grammar, &decision)
                    }
                    TickOutcome::Skipped(err) => {
                        tracing::warn!("tick skipped: {}", err);
                        format!("⚠ {}", err)
                    }
                };
                if ws_tx.send(WsMessage::Text(reply)).await.is_err() {
                    break;
                }
            }
            WsMessage::Ping(payload) => {
                let _ = ws_tx.send(WsMessage::Pong(payload)).await;
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// 自主驱动
// ---------------------------------------------------------------------------

/// 自主模式：按固定间隔轮询快照文件。文件缺失或为空不算错误，睡一个间隔
/// 再试；成功决策后若含 wait 动作，额外停顿对应秒数（有上限），近似
/// 「决策还在被执行」的延迟。
pub async fn run_autonomous(
    ctx: Arc<AgentContext>,
    opts: AutonomousSection,
    cancel: CancellationToken,
) {
    let poll = Duration::from_secs(opts.poll_interval_secs);
    tracing::info!(path = %opts.snapshot_path.display(), "Autonomous loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let raw = match tokio::fs::read_to_string(&opts.snapshot_path).await {
            Ok(s) if !s.trim().is_empty() => s,
            Ok(_) => {
                tracing::debug!("snapshot file empty, retrying");
                if sleep_or_cancel(poll, &cancel).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                tracing::debug!("snapshot file unreadable: {}, retrying", e);
                if sleep_or_cancel(poll, &cancel).await {
                    break;
                }
                continue;
            }
        };

        let mut pause = poll;
        match run_tick(&ctx, &raw).await {
            TickOutcome::Decided(decision) => {
                tracing::info!(text = %decision.text, actions = decision.actions.len(), "decision");
                let extra = decision
                    .wait_seconds()
                    .min(opts.max_action_pause_secs as f64);
                if extra > 0.0 {
                    pause += Duration::from_secs_f64(extra);
                }
            }
            TickOutcome::Skipped(err) => {
                tracing::warn!("tick skipped: {}", err);
            }
        }

        if sleep_or_cancel(pause, &cancel).await {
            break;
        }
    }

    tracing::info!("Autonomous loop stopped");
}

/// 睡够时长或被取消；返回 true 表示应退出循环
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    fn ctx_with(replies: Vec<&str>, grammar: &str) -> AgentContext {
        let mut cfg = AppConfig::default();
        cfg.pipeline.grammar = grammar.to_string();
        let engine = Arc::new(MockEngine::new(
            replies.into_iter().map(String::from).collect(),
        ));
        AgentContext::new(&cfg, engine).unwrap()
    }

    #[tokio::test]
    async fn tick_skips_on_malformed_snapshot() {
        let ctx = ctx_with(vec!["{\"text\":\"x\",\"actions\":[]}"], "json");
        let outcome = run_tick(&ctx, "definitely not json").await;
        assert!(matches!(
            outcome,
            TickOutcome::Skipped(AgentError::MalformedInput(_))
        ));
    }

    #[tokio::test]
    async fn tick_surfaces_decode_failure_with_raw_text() {
        let ctx = ctx_with(vec!["我拒绝输出 JSON"], "json");
        let outcome = run_tick(&ctx, "{}").await;
        match outcome {
            TickOutcome::Skipped(AgentError::Decode(failure)) => {
                assert_eq!(failure.raw, "我拒绝输出 JSON");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_grammar_is_a_config_error() {
        let mut cfg = AppConfig::default();
        cfg.pipeline.grammar = "yaml".to_string();
        let engine = Arc::new(MockEngine::new(vec![]));
        assert!(matches!(
            AgentContext::new(&cfg, engine),
            Err(AgentError::Config(_))
        ));
    }
}
