//! 推理引擎客户端抽象与实现
//!
//! 所有后端实现 DecisionEngine：complete（阻塞式单次补全）。每个行为体
//! 同一时刻只有一个未决请求，调用被完整 await 后流水线才继续。
//! OllamaEngine 走 Ollama 原生 /api/chat（options 携带 temperature 与
//! num_ctx）；MockEngine 回放预置回复，用于测试，无需真实服务。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::EngineSection;
use crate::prompt::Message;

/// 采样选项：温度与上下文窗口（随每次请求下发）
#[derive(Debug, Clone, Copy)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub num_ctx: u32,
}

/// 引擎调用失败：不可达或超时，均非致命
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine call timed out")]
    Timeout,
}

/// 推理引擎 trait：发送决策请求，返回原始回复文本
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        opts: &SamplingOptions,
    ) -> Result<String, EngineError>;
}

/// Ollama /api/chat 的回复载荷（只取 message.content）
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// Ollama 客户端：持有 reqwest Client、模型名与调用超时
pub struct OllamaEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaEngine {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        }
    }

    /// 从 [engine] 配置段构建
    pub fn from_config(cfg: &EngineSection) -> Self {
        Self::new(
            &cfg.base_url,
            &cfg.model,
            Duration::from_secs(cfg.timeout_secs),
        )
    }
}

#[async_trait]
impl DecisionEngine for OllamaEngine {
    async fn complete(
        &self,
        messages: &[Message],
        opts: &SamplingOptions,
    ) -> Result<String, EngineError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": opts.temperature,
                "num_ctx": opts.num_ctx,
            },
        });

        // 超时覆盖整次调用（发送 + 读包体），引擎回了头部后卡住同样算超时
        let call = async {
            let response = self
                .client
                .post(format!("{}/api/chat", self.base_url))
                .json(&body)
                .send()
                .await
                .map_err(|e| EngineError::Unavailable(e.to_string()))?
                .error_for_status()
                .map_err(|e| EngineError::Unavailable(e.to_string()))?;

            let chat: ChatResponse = response
                .json()
                .await
                .map_err(|e| EngineError::Unavailable(e.to_string()))?;

            Ok(chat.message.content.trim().to_string())
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| EngineError::Timeout)?
    }
}

/// Mock 引擎：按顺序回放预置回复（用尽后重复最后一条）；可注入延迟模拟慢引擎
pub struct MockEngine {
    replies: Mutex<Vec<String>>,
    delay: Duration,
}

impl MockEngine {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl DecisionEngine for MockEngine {
    async fn complete(
        &self,
        _messages: &[Message],
        _opts: &SamplingOptions,
    ) -> Result<String, EngineError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut replies = self.replies.lock().expect("mock replies lock");
        if replies.is_empty() {
            return Err(EngineError::Unavailable("mock replies exhausted".to_string()));
        }
        if replies.len() == 1 {
            Ok(replies[0].clone())
        } else {
            Ok(replies.remove(0))
        }
    }
}
