//! Farmhand - 农场 AI 行为体决策管线
//!
//! 入口：初始化日志、加载配置、构建进程级上下文，按配置的驱动模式运行
//! 控制循环。Ctrl-C 触发取消令牌，各通道收尾后退出。

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use farmhand::config::load_config;
use farmhand::control::{run_autonomous, serve_reactive, AgentContext};
use farmhand::engine::OllamaEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).context("Failed to load config")?;
    tracing::info!(
        model = %cfg.engine.model,
        grammar = %cfg.pipeline.grammar,
        mode = %cfg.pipeline.mode,
        "Farmhand starting"
    );

    let engine = Arc::new(OllamaEngine::from_config(&cfg.engine));
    let ctx = Arc::new(AgentContext::new(&cfg, engine).context("Failed to build agent context")?);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            ctrl_c_cancel.cancel();
        }
    });

    match cfg.pipeline.mode.as_str() {
        "reactive" => {
            serve_reactive(ctx, &cfg.reactive.bind_addr, cancel)
                .await
                .context("Reactive channel failed")?;
        }
        "autonomous" => {
            run_autonomous(ctx, cfg.autonomous.clone(), cancel).await;
        }
        other => anyhow::bail!("unknown pipeline mode: {}", other),
    }

    Ok(())
}
