//! 行为契约与提示构建
//!
//! 指令块是固定、带版本的字符串：允许的动作词表及调用语法、要求的输出文法、
//! 严格排序的生存优先级。构建器不保留任何往轮文本——每个请求只含指令块 +
//! 本 tick 报告 + 「请决策。」后缀。无状态是刻意的：多轮携带会让小模型
//! 逐渐偏离要求的输出格式。

use serde::{Deserialize, Serialize};

use crate::decision::Grammar;

/// 消息角色（与推理引擎的 chat 接口对应）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// 指令块 v1：动作词表 + 生存优先级（输出格式段按文法拼接）
const INSTRUCTION_CORE_V1: &str = "\
你是一个生活在农场的 AI 行为体。
你通过扫描报告感知世界，只决定【下一步行动】。

【允许动作】

- move_to(x,y)：移动到网格坐标
- do(action,target)：对实体或区域执行交互，必须先移动到可交互的物体附近
- use(item,target)：使用背包物品，item 必须是背包中存在的物品，target 是环境中存在的实体，自己是 self
- wait(seconds)：原地等待若干秒
- emote(type)：表达心情
- attack(count)：攻击，count 是攻击次数，例如打树获取木材，需要先移动到目标附近

【行为优先级】
1. hydration（含水量）危急 → 优先喝水
2. nutrition（能量储备）危急 → 优先进食
3. 多项危急时先处理数值最低的一项
4. 状态正常 → 自由探索/巡逻";

/// JSON 文法的输出格式段（emote 的参数键是 kind，type 被动作类型占用）
const OUTPUT_FORMAT_JSON_V1: &str = "\
【输出格式】
只能输出一行 JSON，可以多个动作：
{\"thought\": \"思考过程\", \"text\": \"对玩家说的话\", \"actions\": [{\"type\": \"move_to\", \"x\": 0, \"y\": 0}, {\"type\": \"use\", \"item\": \"物品名\", \"target\": \"self\"}, {\"type\": \"emote\", \"kind\": \"happy\"}]}";

/// 紧凑令牌文法的输出格式段
const OUTPUT_FORMAT_COMPACT_V1: &str = "\
【输出格式】
只能输出一行，格式为：
text:对玩家说的话 active:move_to(3,5) & use(bread,self)
没有动作时可省略 active: 段。";

/// 按当前文法拼出完整指令块
pub fn instruction_block(grammar: Grammar) -> String {
    let output_format = match grammar {
        Grammar::Json => OUTPUT_FORMAT_JSON_V1,
        Grammar::Compact => OUTPUT_FORMAT_COMPACT_V1,
    };
    format!("{}\n\n{}", INSTRUCTION_CORE_V1, output_format)
}

/// 构建决策请求：system(指令块) + user(报告 + 命令后缀)，不携带历史
pub fn build_prompt(grammar: Grammar, report: &str) -> Vec<Message> {
    vec![
        Message::system(instruction_block(grammar)),
        Message::user(format!("{}\n请决策。", report)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_stateless_and_exactly_two_messages() {
        let a = build_prompt(Grammar::Json, "报告A");
        let b = build_prompt(Grammar::Json, "报告A");
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].role, Role::System);
        assert_eq!(a[1].role, Role::User);
        assert!(a[1].content.ends_with("请决策。"));
    }

    #[test]
    fn json_format_example_decodes_without_rejection() {
        // 指令块里的示例必须能被自己的解码器完整接受，emote 也不例外
        let block = instruction_block(Grammar::Json);
        let decision = crate::decision::decode_json(&block).unwrap();
        assert_eq!(decision.actions.len(), 3);
        assert!(decision.rejected.is_empty());
        assert!(decision.actions.contains(&crate::decision::Action::Emote {
            kind: "happy".to_string()
        }));
    }

    #[test]
    fn instruction_block_matches_grammar() {
        assert!(instruction_block(Grammar::Json).contains("一行 JSON"));
        assert!(instruction_block(Grammar::Compact).contains("active:"));
        // 动作词表在两种文法下一致
        for g in [Grammar::Json, Grammar::Compact] {
            let block = instruction_block(g);
            for name in ["move_to", "do", "use", "wait", "emote", "attack"] {
                assert!(block.contains(name), "missing {}", name);
            }
        }
    }
}
