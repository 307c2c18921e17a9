//! 感知报告渲染
//!
//! WorldSnapshot -> 报告文本的确定性纯函数：相同快照逐字节得到相同输出，
//! 便于缓存与测试。段落顺序固定：状态、背包、设施、实体、图层/区域。
//! 低于阈值的体征内联标注（危急/疲惫）；区域行同时给出原始 x/y/w/h 与
//! 派生的闭区间矩形，并列出为 true 的功能特征键，让引擎不必了解原始
//! schema 也知道「这里能做什么」。输出长度由输入规模自然限定，不做截断。

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::snapshot::{classify, WorldSnapshot};

/// 渲染感知报告（确定性；体征阈值分类在此处重新计算）
pub fn render_report(snapshot: &WorldSnapshot, thresholds: &BTreeMap<String, f64>) -> String {
    let mut lines = vec!["--- 农场实时感知报告 ---".to_string()];

    // 状态段：坐标 + 体征（BTreeMap 迭代序即字母序，天然确定）
    let status = &snapshot.status;
    let vitals = status
        .vitals
        .iter()
        .map(|(name, value)| match classify(name, *value, thresholds) {
            Some(alert) => format!("{}:{}({})", name, format_num(*value), alert.label()),
            None => format!("{}:{}", name, format_num(*value)),
        })
        .collect::<Vec<_>>()
        .join(" ");
    lines.push(format!("【状态】坐标({},{}) {}", status.x, status.y, vitals));

    // 背包段：有描述元数据时 name(描述)×count，否则 name(count)
    let items = snapshot
        .inventory
        .iter()
        .map(|item| {
            match item.meta.get("description").and_then(|v| v.as_str()) {
                Some(desc) => format!("{}({})×{}", item.name, desc, item.count),
                None => format!("{}({})", item.name, item.count),
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    lines.push(format!(
        "【背包】{}",
        if items.is_empty() { "空" } else { items.as_str() }
    ));

    if !snapshot.facilities.is_empty() {
        let facilities = snapshot
            .facilities
            .iter()
            .map(|(name, (x, y))| format!("{}({},{})", name, x, y))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("【设施】{}", facilities));
    }

    for entity in &snapshot.entities {
        let mut line = format!("【实体】{} 坐标({},{})", entity.name, entity.x, entity.y);
        if entity.interactive {
            line.push_str(" 可交互");
        }
        if entity.ready {
            line.push_str(" 就绪");
        }
        if !entity.description.is_empty() {
            let _ = write!(line, " 描述:{}", entity.description);
        }
        lines.push(line);
    }

    for (id, layer) in &snapshot.map_layers {
        let desc = layer.description.as_deref().unwrap_or("无描述");
        lines.push(format!("【图层: {}】说明: {}", id, desc));
        for (i, area) in layer.areas.iter().enumerate() {
            let (fx, fy) = area.far_corner();
            let features = if area.features.is_empty() {
                String::new()
            } else {
                let joined = area
                    .features
                    .iter()
                    .map(|f| format!("属性:{}", f))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" [{}]", joined)
            };
            let mut line = format!(
                "  - 区域{}: 范围({},{}) 到 ({},{}) 尺寸 {}x{}{}",
                i, area.x, area.y, fx, fy, area.w, area.h, features
            );
            if let Some(d) = &area.description {
                let _ = write!(line, " 说明:{}", d);
            }
            lines.push(line);
        }
    }

    lines.join("\n")
}

/// 整数值不带小数位，避免 60.0 之类的噪音
fn format_num(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}
