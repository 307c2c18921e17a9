//! 决策流水线集成测试

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use futures_util::{SinkExt, StreamExt};
    use tokio::time::{sleep, Duration};
    use tokio_util::sync::CancellationToken;

    use farmhand::config::{default_thresholds, AppConfig};
    use farmhand::control::{run_autonomous, run_tick, serve_reactive, AgentContext, TickOutcome};
    use farmhand::engine::{DecisionEngine, EngineError, MockEngine, SamplingOptions};
    use farmhand::error::AgentError;
    use farmhand::prompt::Message;
    use farmhand::report::render_report;
    use farmhand::snapshot::parse_snapshot;
    use farmhand::Action;

    const HUNGRY_SNAPSHOT: &str = r#"{
        "player_status": {
            "pos": {"grid_x": 3, "grid_y": 5},
            "nutrition": 20,
            "inventory": {"items": [{"name": "bread", "amount": 2, "type": "food"}]}
        }
    }"#;

    fn ctx(engine: Arc<dyn DecisionEngine>) -> Arc<AgentContext> {
        let cfg = AppConfig::default();
        Arc::new(AgentContext::new(&cfg, engine).unwrap())
    }

    /// 记录调用次数的引擎（包一层 Mock，供自主循环测试观察进度）
    struct CountingEngine {
        count: AtomicUsize,
        inner: MockEngine,
    }

    #[async_trait]
    impl DecisionEngine for CountingEngine {
        async fn complete(
            &self,
            messages: &[Message],
            opts: &SamplingOptions,
        ) -> Result<String, EngineError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.inner.complete(messages, opts).await
        }
    }

    /// 首次调用超时，之后转发给 Mock（模拟引擎偶发超时）
    struct FlakyEngine {
        failed_once: AtomicUsize,
        inner: MockEngine,
    }

    #[async_trait]
    impl DecisionEngine for FlakyEngine {
        async fn complete(
            &self,
            messages: &[Message],
            opts: &SamplingOptions,
        ) -> Result<String, EngineError> {
            if self.failed_once.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(EngineError::Timeout);
            }
            self.inner.complete(messages, opts).await
        }
    }

    #[tokio::test]
    async fn hungry_snapshot_flags_critical_and_decodes_use_action() {
        // 报告侧：nutrition=20 低于阈值 30，内联标注
        let snapshot = parse_snapshot(HUNGRY_SNAPSHOT).unwrap();
        let report = render_report(&snapshot, &default_thresholds());
        assert!(report.contains("nutrition:20(危急)"));
        assert!(report.contains("bread"));

        // 决策侧：引擎回吃面包，解码出一个合法 use 动作
        let reply = r#"{"thought":"eat","text":"eating","actions":[{"type":"use","item":"bread","target":"self"}]}"#;
        let ctx = ctx(Arc::new(MockEngine::new(vec![reply.to_string()])));
        match run_tick(&ctx, HUNGRY_SNAPSHOT).await {
            TickOutcome::Decided(decision) => {
                assert_eq!(decision.text, "eating");
                assert_eq!(
                    decision.actions,
                    vec![Action::Use {
                        item: "bread".to_string(),
                        target: "self".to_string()
                    }]
                );
                assert!(decision.rejected.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn timeout_tick_ends_cleanly_and_next_tick_succeeds() {
        let reply = r#"{"thought":"","text":"ok","actions":[]}"#;
        let engine = Arc::new(FlakyEngine {
            failed_once: AtomicUsize::new(0),
            inner: MockEngine::new(vec![reply.to_string()]),
        });
        let ctx = ctx(engine);

        match run_tick(&ctx, HUNGRY_SNAPSHOT).await {
            TickOutcome::Skipped(AgentError::Timeout) => {}
            other => panic!("expected timeout, got {:?}", other),
        }

        // 无状态污染：下一个 tick 正常出决策
        match run_tick(&ctx, HUNGRY_SNAPSHOT).await {
            TickOutcome::Decided(decision) => assert_eq!(decision.text, "ok"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn autonomous_loop_survives_missing_snapshot_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let reply = r#"{"thought":"","text":"patrol","actions":[]}"#;
        let engine = Arc::new(CountingEngine {
            count: AtomicUsize::new(0),
            inner: MockEngine::new(vec![reply.to_string()]),
        });

        let mut cfg = AppConfig::default();
        cfg.autonomous.snapshot_path = path.clone();
        cfg.autonomous.poll_interval_secs = 1;
        let ctx = Arc::new(AgentContext::new(&cfg, engine.clone() as Arc<dyn DecisionEngine>).unwrap());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_autonomous(
            Arc::clone(&ctx),
            cfg.autonomous.clone(),
            cancel.clone(),
        ));

        // 文件缺失期间：循环存活但不调用引擎
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(engine.count.load(Ordering::SeqCst), 0);
        assert!(!handle.is_finished());

        // 资源就绪后：循环在下一次轮询成功出决策
        tokio::fs::write(&path, HUNGRY_SNAPSHOT).await.unwrap();
        sleep(Duration::from_millis(2500)).await;
        assert!(engine.count.load(Ordering::SeqCst) >= 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reactive_channel_replies_in_order_and_annotates_failures() {
        let reply = r#"{"thought":"","text":"hello","actions":[{"type":"move_to","x":1,"y":2}]}"#;
        let ctx = ctx(Arc::new(MockEngine::new(vec![reply.to_string()])));

        let bind_addr = "127.0.0.1:18471";
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve_reactive(ctx, bind_addr, cancel.clone()));
        sleep(Duration::from_millis(200)).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", bind_addr))
            .await
            .expect("connect");

        // 合法快照 -> 编码后的决策行
        ws.send(HUNGRY_SNAPSHOT.into()).await.unwrap();
        let first = ws.next().await.unwrap().unwrap().into_text().unwrap();
        assert!(first.contains("\"text\":\"hello\""));
        assert!(first.contains("move_to"));

        // 坏快照 -> 带警告标记的错误标注，且在后续请求之前回复
        ws.send("not a snapshot".into()).await.unwrap();
        let second = ws.next().await.unwrap().unwrap().into_text().unwrap();
        assert!(second.starts_with('⚠'));
        assert!(second.contains("Malformed snapshot"));

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
