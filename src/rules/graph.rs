//! 规则图
//!
//! 从 JSON（`{ [key]: Rule }`，另含一个 `{ "key": <delay_key>, "milliseconds": n }` 的延时项）
//! 解析出只读的 RuleGraph，并校验首规则存在、边不悬空、maxTries > 0。

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::rules::predicates::{is_compliance_check, is_final_rule};
use crate::rules::types::{is_end, AssessedRule, Rule, RuleGraphError, RuleKey};

/// 只读规则图：会话期间不可变，配置推送时整体替换
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleGraph {
    rules: BTreeMap<RuleKey, Rule>,
    delay_key: String,
    try_delay_ms: Option<u64>,
}

impl RuleGraph {
    /// 由规则列表直接构建（测试与内存配置使用）
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.key.clone(), r)).collect(),
            delay_key: "tryDelay".to_string(),
            try_delay_ms: None,
        }
    }

    pub fn with_try_delay_ms(mut self, ms: u64) -> Self {
        self.try_delay_ms = Some(ms);
        self
    }

    /// 解析配置文本；`delay_key` 指定延时项的键名
    pub fn parse(text: &str, delay_key: &str) -> Result<Self, RuleGraphError> {
        let entries: BTreeMap<String, Value> = serde_json::from_str(text)?;
        let mut rules = BTreeMap::new();
        let mut try_delay_ms = None;

        for (entry, value) in entries {
            if entry == delay_key {
                let ms = value
                    .get("milliseconds")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| RuleGraphError::MalformedEntry {
                        entry: entry.clone(),
                        reason: "missing numeric 'milliseconds'".to_string(),
                    })?;
                try_delay_ms = Some(ms);
                continue;
            }

            let rule: Rule =
                serde_json::from_value(value).map_err(|e| RuleGraphError::MalformedEntry {
                    entry: entry.clone(),
                    reason: e.to_string(),
                })?;
            if rule.key != entry {
                return Err(RuleGraphError::KeyMismatch {
                    entry,
                    key: rule.key,
                });
            }
            rules.insert(entry, rule);
        }

        Ok(Self {
            rules,
            delay_key: delay_key.to_string(),
            try_delay_ms,
        })
    }

    /// 解析并校验
    pub fn parse_validated(
        text: &str,
        delay_key: &str,
        first_rule: &str,
    ) -> Result<Self, RuleGraphError> {
        let graph = Self::parse(text, delay_key)?;
        graph.validate(first_rule)?;
        Ok(graph)
    }

    /// 从磁盘加载并校验
    pub fn load(
        path: impl AsRef<Path>,
        delay_key: &str,
        first_rule: &str,
    ) -> Result<Self, RuleGraphError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse_validated(&text, delay_key, first_rule)
    }

    pub fn validate(&self, first_rule: &str) -> Result<(), RuleGraphError> {
        if !self.rules.contains_key(first_rule) {
            return Err(RuleGraphError::MissingFirstRule(first_rule.to_string()));
        }
        for rule in self.rules.values() {
            if rule.max_tries == 0 {
                return Err(RuleGraphError::ZeroMaxTries(rule.key.clone()));
            }
            for edge in [&rule.pass_rule_key, &rule.fail_rule_key] {
                if !is_end(edge) && !self.rules.contains_key(edge.as_str()) {
                    return Err(RuleGraphError::DanglingEdge {
                        rule: rule.key.clone(),
                        target: edge.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Rule> {
        self.rules.get(key)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 图级探测间隔
    pub fn try_delay_ms(&self) -> Option<u64> {
        self.try_delay_ms
    }

    /// 规则实际使用的探测间隔：规则级 > 图级 > 默认值
    pub fn delay_for(&self, rule: &Rule, default_ms: u64) -> u64 {
        rule.try_delay_ms
            .or(self.try_delay_ms)
            .unwrap_or(default_ms)
    }

    /// 还原为配置 JSON（含延时项）
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (key, rule) in &self.rules {
            if let Ok(v) = serde_json::to_value(rule) {
                map.insert(key.clone(), v);
            }
        }
        if let Some(ms) = self.try_delay_ms {
            map.insert(
                self.delay_key.clone(),
                serde_json::json!({ "key": self.delay_key, "milliseconds": ms }),
            );
        }
        Value::Object(map)
    }
}

/// 若规则列表最近一条规则之后只剩一条合规检查链通往终点规则，返回整次评估的预计长度
pub fn end_path_length(rule_list: &[AssessedRule], graph: &RuleGraph) -> Option<usize> {
    let mut current = &rule_list.first()?.rule;
    let mut steps = 0usize;

    while is_compliance_check(current) {
        current = graph.get(&current.pass_rule_key)?;
        steps += 1;
        if is_final_rule(current) {
            return Some(rule_list.len() + steps);
        }
        // 图中存在环时不再继续
        if steps > graph.len() {
            return None;
        }
    }
    None
}
