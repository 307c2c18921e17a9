//! 世界快照归一化
//!
//! 把来自 Godot 等宿主的任意形状 JSON 快照整理为规范的 WorldSnapshot：
//! 缺失的段落给中性默认值（体征满值、列表为空），未识别的键直接忽略。
//! 只有文本本身不是合法 JSON 时才失败（MalformedInput）。
//! 阈值分类是纯函数，作为派生状态在每次渲染时重新计算，不落库。

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::AgentError;

/// 已知体征；快照缺省时按满值 100 填充
const KNOWN_VITALS: [&str; 4] = ["health", "hydration", "nutrition", "sanity"];

/// 每 tick 重建的规范世界视图，构建后不再修改
#[derive(Debug, Clone, PartialEq)]
pub struct WorldSnapshot {
    pub status: AgentStatus,
    pub inventory: Vec<InventoryItem>,
    /// 设施名 -> 网格坐标（静态，极少变化）
    pub facilities: BTreeMap<String, (i64, i64)>,
    pub entities: Vec<Entity>,
    /// 图层名 -> 区域列表
    pub map_layers: BTreeMap<String, Layer>,
}

/// 行为体自身状态：网格坐标与 [0,100] 区间内的体征
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStatus {
    pub x: i64,
    pub y: i64,
    pub vitals: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InventoryItem {
    pub name: String,
    pub count: i64,
    /// 自由元数据（type、is_filled 等），渲染层按需取用
    pub meta: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub name: String,
    pub x: i64,
    pub y: i64,
    pub interactive: bool,
    pub ready: bool,
    pub description: String,
    pub meta: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Layer {
    pub description: Option<String>,
    pub areas: Vec<Area>,
}

/// 图层区域：左上角 (x,y)，尺寸 (w,h)，占地为闭区间 [(x,y), (x+w-1,y+h-1)]
#[derive(Debug, Clone, PartialEq)]
pub struct Area {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    /// 值为 true 的布尔特征键（已排序，不含 x/y/w/h 本身）
    pub features: Vec<String>,
    pub description: Option<String>,
}

impl Area {
    /// 闭区间占地矩形的右下角
    pub fn far_corner(&self) -> (i64, i64) {
        (self.x + self.w - 1, self.y + self.h - 1)
    }
}

/// 阈值分类结果：危急 / 疲惫
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VitalAlert {
    Critical,
    Fatigued,
}

impl VitalAlert {
    pub fn label(&self) -> &'static str {
        match self {
            VitalAlert::Critical => "危急",
            VitalAlert::Fatigued => "疲惫",
        }
    }
}

/// 阈值分类（纯函数）：低于阈值才有标注；心神标「疲惫」，其余标「危急」
pub fn classify(vital: &str, value: f64, thresholds: &BTreeMap<String, f64>) -> Option<VitalAlert> {
    let threshold = thresholds.get(vital)?;
    if value >= *threshold {
        return None;
    }
    if vital == "sanity" {
        Some(VitalAlert::Fatigued)
    } else {
        Some(VitalAlert::Critical)
    }
}

/// 解析快照文本；唯一的失败口：文本不是合法 JSON
pub fn parse_snapshot(raw: &str) -> Result<WorldSnapshot, AgentError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| AgentError::MalformedInput(e.to_string()))?;
    Ok(WorldSnapshot::from_value(&value))
}

impl WorldSnapshot {
    /// 从任意形状的 JSON 值构建规范快照，永不失败
    pub fn from_value(value: &Value) -> Self {
        let status = parse_status(value.get("player_status"));
        let inventory = parse_inventory(value.get("player_status"));
        let facilities = parse_facilities(value.get("facilities"));
        let entities = parse_entities(value.get("entities"));
        let map_layers = parse_layers(value.get("map_layers"));

        Self {
            status,
            inventory,
            facilities,
            entities,
            map_layers,
        }
    }
}

fn clamp_vital(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}

fn as_i64(v: Option<&Value>) -> i64 {
    v.and_then(Value::as_i64).unwrap_or(0)
}

fn parse_status(ps: Option<&Value>) -> AgentStatus {
    // 已知体征先按满值填充，再用快照里出现的数值覆盖并钳制
    let mut vitals: BTreeMap<String, f64> = KNOWN_VITALS
        .iter()
        .map(|name| (name.to_string(), 100.0))
        .collect();

    let (mut x, mut y) = (0, 0);
    if let Some(Value::Object(map)) = ps {
        if let Some(pos) = map.get("pos") {
            x = as_i64(pos.get("grid_x"));
            y = as_i64(pos.get("grid_y"));
        }
        for (key, value) in map {
            if key == "pos" || key == "inventory" {
                continue;
            }
            if let Some(n) = value.as_f64() {
                vitals.insert(key.clone(), clamp_vital(n));
            }
        }
    }

    AgentStatus { x, y, vitals }
}

fn parse_inventory(ps: Option<&Value>) -> Vec<InventoryItem> {
    let items = ps
        .and_then(|v| v.get("inventory"))
        .and_then(|v| v.get("items"))
        .and_then(Value::as_array);

    let Some(items) = items else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let name = obj.get("name")?.as_str()?.to_string();
            let count = obj.get("amount").and_then(Value::as_i64).unwrap_or(1);
            let meta = obj
                .iter()
                .filter(|(k, _)| k.as_str() != "name" && k.as_str() != "amount")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Some(InventoryItem { name, count, meta })
        })
        .collect()
}

fn parse_facilities(v: Option<&Value>) -> BTreeMap<String, (i64, i64)> {
    let Some(Value::Object(map)) = v else {
        return BTreeMap::new();
    };

    map.iter()
        .map(|(name, pos)| {
            // 兼容 {x,y} 与 {grid_x,grid_y} 两种写法
            let x = pos
                .get("x")
                .or_else(|| pos.get("grid_x"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let y = pos
                .get("y")
                .or_else(|| pos.get("grid_y"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            (name.clone(), (x, y))
        })
        .collect()
}

fn parse_entities(v: Option<&Value>) -> Vec<Entity> {
    let Some(entities) = v.and_then(Value::as_array) else {
        return Vec::new();
    };

    entities
        .iter()
        .filter_map(|e| {
            let obj = e.as_object()?;
            let name = obj.get("n").and_then(Value::as_str)?.to_string();
            let pos = obj.get("pixel_p");
            let x = pos.map(|p| as_i64(p.get("x"))).unwrap_or(0);
            let y = pos.map(|p| as_i64(p.get("y"))).unwrap_or(0);
            let interactive = obj
                .get("interactive")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let ready = obj.get("ready").and_then(Value::as_bool).unwrap_or(false);
            let description = obj
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let meta = obj
                .iter()
                .filter(|(k, _)| {
                    !matches!(
                        k.as_str(),
                        "n" | "pixel_p" | "interactive" | "ready" | "description"
                    )
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Some(Entity {
                name,
                x,
                y,
                interactive,
                ready,
                description,
                meta,
            })
        })
        .collect()
}

fn parse_layers(v: Option<&Value>) -> BTreeMap<String, Layer> {
    let Some(Value::Object(map)) = v else {
        return BTreeMap::new();
    };

    map.iter()
        .map(|(id, layer)| {
            let description = layer
                .get("description")
                .and_then(Value::as_str)
                .map(String::from);
            let areas = layer
                .get("areas")
                .and_then(Value::as_array)
                .map(|areas| areas.iter().filter_map(parse_area).collect())
                .unwrap_or_default();
            (id.clone(), Layer { description, areas })
        })
        .collect()
}

fn parse_area(v: &Value) -> Option<Area> {
    let obj = v.as_object()?;
    let x = obj.get("x").and_then(Value::as_i64).unwrap_or(0);
    let y = obj.get("y").and_then(Value::as_i64).unwrap_or(0);
    let w = obj.get("w").and_then(Value::as_i64).unwrap_or(1);
    let h = obj.get("h").and_then(Value::as_i64).unwrap_or(1);
    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .map(String::from);

    // 值为 true 的布尔键作为功能特征；键顺序由宿主决定，显式排序保证确定性
    let mut features: Vec<String> = obj
        .iter()
        .filter(|(k, v)| {
            !matches!(k.as_str(), "x" | "y" | "w" | "h" | "description")
                && v.as_bool() == Some(true)
        })
        .map(|(k, _)| k.clone())
        .collect();
    features.sort();

    Some(Area {
        x,
        y,
        w,
        h,
        features,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_normalizes_to_neutral_defaults() {
        let snap = WorldSnapshot::from_value(&json!({}));
        assert_eq!(snap.status.x, 0);
        assert_eq!(snap.status.vitals.get("hydration"), Some(&100.0));
        assert!(snap.inventory.is_empty());
        assert!(snap.entities.is_empty());
        assert!(snap.map_layers.is_empty());
    }

    #[test]
    fn vitals_are_clamped_to_unit_range() {
        let snap = WorldSnapshot::from_value(&json!({
            "player_status": {"hydration": 130.0, "nutrition": -5.0}
        }));
        assert_eq!(snap.status.vitals.get("hydration"), Some(&100.0));
        assert_eq!(snap.status.vitals.get("nutrition"), Some(&0.0));
    }

    #[test]
    fn unknown_keys_are_ignored_not_errors() {
        let snap = WorldSnapshot::from_value(&json!({
            "player_status": {"pos": {"grid_x": 3, "grid_y": 5}, "mood_text": "ok"},
            "weather": "rainy"
        }));
        assert_eq!((snap.status.x, snap.status.y), (3, 5));
    }

    #[test]
    fn parse_snapshot_rejects_non_json() {
        let err = parse_snapshot("not json at all").unwrap_err();
        assert!(matches!(err, AgentError::MalformedInput(_)));
    }

    #[test]
    fn classify_uses_per_vital_threshold() {
        let thresholds = crate::config::default_thresholds();
        assert_eq!(
            classify("hydration", 20.0, &thresholds),
            Some(VitalAlert::Critical)
        );
        assert_eq!(classify("hydration", 30.0, &thresholds), None);
        assert_eq!(
            classify("sanity", 45.0, &thresholds),
            Some(VitalAlert::Fatigued)
        );
        assert_eq!(classify("unknown_vital", 1.0, &thresholds), None);
    }

    #[test]
    fn area_far_corner_is_inclusive() {
        let snap = WorldSnapshot::from_value(&json!({
            "map_layers": {"farm": {"areas": [{"x": 3, "y": 4, "w": 4, "h": 2, "plantable": true, "flooded": false}]}}
        }));
        let area = &snap.map_layers["farm"].areas[0];
        assert_eq!(area.far_corner(), (6, 5));
        assert_eq!(area.features, vec!["plantable".to_string()]);
    }

    #[test]
    fn inventory_keeps_order_and_metadata() {
        let snap = WorldSnapshot::from_value(&json!({
            "player_status": {"inventory": {"items": [
                {"name": "bread", "amount": 2, "type": "food"},
                {"name": "bucket", "amount": 1, "is_filled": true}
            ]}}
        }));
        assert_eq!(snap.inventory.len(), 2);
        assert_eq!(snap.inventory[0].name, "bread");
        assert_eq!(snap.inventory[0].meta["type"], json!("food"));
        assert_eq!(snap.inventory[1].meta["is_filled"], json!(true));
    }
}
