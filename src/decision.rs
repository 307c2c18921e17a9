//! 输出解码与校验
//!
//! 两种互斥文法，由配置选择，不从文本推断：
//! - **Json**：回复中恰好一个 JSON 对象（取第一个 `{` 到最后一个 `}`，
//!   容忍引擎前后的闲聊），actions 必须是列表。
//! - **Compact**：`text:<叙述> active:<动作1> & <动作2>`，active 段可省略；
//!   即使 active 段坏掉也要把 text 抢救出来（部分解码优先于整体拒绝）。
//!
//! 两种文法共享同一套后置语义检查：数值字段必须是数值；单个动作非法只丢弃
//! 该动作（尽力部分接受），不否决整个决策。零动作的决策合法（行为体发呆）。

use serde_json::{json, Value};
use thiserror::Error;

/// 激活文法（配置项，见 [pipeline].grammar）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    Json,
    Compact,
}

impl Grammar {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "json" => Some(Grammar::Json),
            "compact" => Some(Grammar::Compact),
            _ => None,
        }
    }
}

/// 封闭动作词表
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    MoveTo { x: i64, y: i64 },
    Do { action: String, target: String },
    Use { item: String, target: String },
    Wait { seconds: f64 },
    /// 线格式里参数名为 type（与 JSON 文法的变体标签同名，编码时用 kind 键）
    Emote { kind: String },
    Attack { count: i64 },
}

/// 解码结果：叙述文本 + 有序动作列表 + 被丢弃的单个动作
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decision {
    pub thought: String,
    pub text: String,
    pub actions: Vec<Action>,
    /// 因类型/元数/数值错误被丢弃的动作（决策本身仍被派发）
    pub rejected: Vec<RejectedAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedAction {
    pub raw: String,
    pub reason: DecodeError,
}

/// 解码错误原因码；NotJson / MissingActionsField / MissingTextMarker 对整个
/// 回复致命，其余只否决单个动作
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("no JSON object found in reply")]
    NotJson,

    #[error("reply object has no list-valued `actions` field")]
    MissingActionsField,

    #[error("compact reply has no `text:` marker")]
    MissingTextMarker,

    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("field {0} is not numeric")]
    NotNumeric(String),

    #[error("{name} expects {expected} args, got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
}

/// 致命解码失败：带原始回复文本与原因码，供上层附警告标记上报
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    pub raw: String,
    pub reason: DecodeError,
}

impl std::fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (raw: {})", self.reason, self.raw)
    }
}

/// 按激活文法解码引擎回复
pub fn decode(grammar: Grammar, raw: &str) -> Result<Decision, DecodeFailure> {
    match grammar {
        Grammar::Json => decode_json(raw),
        Grammar::Compact => decode_compact(raw),
    }
}

/// 按激活文法把决策编码为单行文本
pub fn encode(grammar: Grammar, decision: &Decision) -> String {
    match grammar {
        Grammar::Json => encode_json(decision),
        Grammar::Compact => encode_compact(decision),
    }
}

fn fail(raw: &str, reason: DecodeError) -> DecodeFailure {
    DecodeFailure {
        raw: raw.to_string(),
        reason,
    }
}

// ---------------------------------------------------------------------------
// Json 文法
// ---------------------------------------------------------------------------

/// 解码 JSON 文法：取第一个 `{` 到最后一个 `}` 的子串，容忍前后闲聊
pub fn decode_json(raw: &str) -> Result<Decision, DecodeFailure> {
    let start = raw.find('{').ok_or_else(|| fail(raw, DecodeError::NotJson))?;
    let end = raw.rfind('}').ok_or_else(|| fail(raw, DecodeError::NotJson))?;
    if end < start {
        return Err(fail(raw, DecodeError::NotJson));
    }

    let value: Value = serde_json::from_str(&raw[start..=end])
        .map_err(|_| fail(raw, DecodeError::NotJson))?;
    let obj = value
        .as_object()
        .ok_or_else(|| fail(raw, DecodeError::NotJson))?;

    let items = obj
        .get("actions")
        .and_then(Value::as_array)
        .ok_or_else(|| fail(raw, DecodeError::MissingActionsField))?;

    let mut actions = Vec::new();
    let mut rejected = Vec::new();
    for item in items {
        match decode_json_action(item) {
            Ok(action) => actions.push(action),
            Err(reason) => rejected.push(RejectedAction {
                raw: item.to_string(),
                reason,
            }),
        }
    }

    Ok(Decision {
        thought: str_or_empty(obj.get("thought")),
        text: str_or_empty(obj.get("text")),
        actions,
        rejected,
    })
}

fn str_or_empty(v: Option<&Value>) -> String {
    v.and_then(Value::as_str).unwrap_or("").to_string()
}

/// 必填字符串字段；缺失或非字符串 → MissingRequiredField
fn req_str(obj: &Value, field: &str) -> Result<String, DecodeError> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| DecodeError::MissingRequiredField(field.to_string()))
}

/// 必填整数字段；缺失 → MissingRequiredField，存在但非数值 → NotNumeric
fn req_i64(obj: &Value, field: &str) -> Result<i64, DecodeError> {
    let v = obj
        .get(field)
        .ok_or_else(|| DecodeError::MissingRequiredField(field.to_string()))?;
    v.as_i64()
        .ok_or_else(|| DecodeError::NotNumeric(field.to_string()))
}

fn req_f64(obj: &Value, field: &str) -> Result<f64, DecodeError> {
    let v = obj
        .get(field)
        .ok_or_else(|| DecodeError::MissingRequiredField(field.to_string()))?;
    v.as_f64()
        .ok_or_else(|| DecodeError::NotNumeric(field.to_string()))
}

fn decode_json_action(item: &Value) -> Result<Action, DecodeError> {
    let kind = item
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::MissingRequiredField("type".to_string()))?;

    match kind {
        "move_to" => Ok(Action::MoveTo {
            x: req_i64(item, "x")?,
            y: req_i64(item, "y")?,
        }),
        "do" => Ok(Action::Do {
            action: req_str(item, "action")?,
            target: req_str(item, "target")?,
        }),
        "use" => Ok(Action::Use {
            item: req_str(item, "item")?,
            target: req_str(item, "target")?,
        }),
        "wait" => Ok(Action::Wait {
            seconds: req_f64(item, "seconds")?,
        }),
        "emote" => Ok(Action::Emote {
            kind: req_str(item, "kind")?,
        }),
        "attack" => Ok(Action::Attack {
            count: req_i64(item, "count")?,
        }),
        other => Err(DecodeError::UnknownActionType(other.to_string())),
    }
}

/// 编码为单行 JSON（与解码互逆）
pub fn encode_json(decision: &Decision) -> String {
    let actions: Vec<Value> = decision
        .actions
        .iter()
        .map(|action| match action {
            Action::MoveTo { x, y } => json!({"type": "move_to", "x": x, "y": y}),
            Action::Do { action, target } => {
                json!({"type": "do", "action": action, "target": target})
            }
            Action::Use { item, target } => {
                json!({"type": "use", "item": item, "target": target})
            }
            Action::Wait { seconds } => json!({"type": "wait", "seconds": seconds}),
            Action::Emote { kind } => json!({"type": "emote", "kind": kind}),
            Action::Attack { count } => json!({"type": "attack", "count": count}),
        })
        .collect();

    json!({
        "thought": decision.thought,
        "text": decision.text,
        "actions": actions,
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Compact 文法
// ---------------------------------------------------------------------------

/// 解码紧凑文法：text 段必需，active 段可缺；active 段内坏掉的动作逐个丢弃
pub fn decode_compact(raw: &str) -> Result<Decision, DecodeFailure> {
    let text_at = raw
        .find("text:")
        .ok_or_else(|| fail(raw, DecodeError::MissingTextMarker))?;
    let after_text = &raw[text_at + "text:".len()..];

    let (text, active) = match after_text.find("active:") {
        Some(at) => (
            after_text[..at].trim(),
            Some(after_text[at + "active:".len()..].trim()),
        ),
        None => (after_text.trim(), None),
    };

    let mut actions = Vec::new();
    let mut rejected = Vec::new();
    if let Some(active) = active {
        for token in active.split('&') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match decode_compact_action(token) {
                Ok(action) => actions.push(action),
                Err(reason) => rejected.push(RejectedAction {
                    raw: token.to_string(),
                    reason,
                }),
            }
        }
    }

    Ok(Decision {
        thought: String::new(),
        text: text.to_string(),
        actions,
        rejected,
    })
}

/// 位置参数按各变体的字段顺序映射
fn decode_compact_action(token: &str) -> Result<Action, DecodeError> {
    let open = token
        .find('(')
        .ok_or_else(|| DecodeError::UnknownActionType(token.to_string()))?;
    let name = token[..open].trim();
    let inner = token[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| DecodeError::UnknownActionType(token.to_string()))?;

    let args: Vec<&str> = if inner.trim().is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(str::trim).collect()
    };

    let arity = |expected: usize| -> Result<(), DecodeError> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(DecodeError::ArityMismatch {
                name: name.to_string(),
                expected,
                got: args.len(),
            })
        }
    };

    let num_i64 = |arg: &str, field: &str| -> Result<i64, DecodeError> {
        arg.parse()
            .map_err(|_| DecodeError::NotNumeric(field.to_string()))
    };
    let num_f64 = |arg: &str, field: &str| -> Result<f64, DecodeError> {
        arg.parse()
            .map_err(|_| DecodeError::NotNumeric(field.to_string()))
    };

    match name {
        "move_to" => {
            arity(2)?;
            Ok(Action::MoveTo {
                x: num_i64(args[0], "x")?,
                y: num_i64(args[1], "y")?,
            })
        }
        "do" => {
            arity(2)?;
            Ok(Action::Do {
                action: args[0].to_string(),
                target: args[1].to_string(),
            })
        }
        "use" => {
            arity(2)?;
            Ok(Action::Use {
                item: args[0].to_string(),
                target: args[1].to_string(),
            })
        }
        "wait" => {
            arity(1)?;
            Ok(Action::Wait {
                seconds: num_f64(args[0], "seconds")?,
            })
        }
        "emote" => {
            arity(1)?;
            Ok(Action::Emote {
                kind: args[0].to_string(),
            })
        }
        "attack" => {
            arity(1)?;
            Ok(Action::Attack {
                count: num_i64(args[0], "count")?,
            })
        }
        other => Err(DecodeError::UnknownActionType(other.to_string())),
    }
}

/// 编码为单行紧凑文本；无动作时省略 active 段。叙述里的换行压成空格，
/// 守住「单行输出」的线格式约定（JSON 编码天然转义，这里要手动做）
pub fn encode_compact(decision: &Decision) -> String {
    let text = decision.text.replace(['\r', '\n'], " ");
    let actions = decision
        .actions
        .iter()
        .map(|action| match action {
            Action::MoveTo { x, y } => format!("move_to({},{})", x, y),
            Action::Do { action, target } => format!("do({},{})", action, target),
            Action::Use { item, target } => format!("use({},{})", item, target),
            Action::Wait { seconds } => format!("wait({})", format_seconds(*seconds)),
            Action::Emote { kind } => format!("emote({})", kind),
            Action::Attack { count } => format!("attack({})", count),
        })
        .collect::<Vec<_>>()
        .join(" & ");

    if actions.is_empty() {
        format!("text:{}", text)
    } else {
        format!("text:{} active:{}", text, actions)
    }
}

fn format_seconds(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

impl Decision {
    /// 决策中 wait 动作的总秒数（自主模式用来延长停顿）
    pub fn wait_seconds(&self) -> f64 {
        self.actions
            .iter()
            .map(|a| match a {
                Action::Wait { seconds } => *seconds,
                _ => 0.0,
            })
            .sum()
    }
}
