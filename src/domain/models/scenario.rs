//! Scenario classification.
//!
//! A scenario is a coarse classification of user intent that gates which
//! workflow phases apply. The keyword table is fixed in the binary and
//! initialised once; it is never mutated at runtime.

/// A classification row: scenario id, tie-break priority, trigger keywords.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioRule {
    pub id: &'static str,
    /// Higher priority wins when several scenarios match.
    pub priority: u8,
    /// Keywords matched case-insensitively against message content.
    pub keywords: &'static [&'static str],
}

/// Fixed scenario table, highest priority first.
pub const SCENARIO_TABLE: &[ScenarioRule] = &[
    ScenarioRule {
        id: "ops_hotfix",
        priority: 90,
        keywords: &[
            "hotfix", "urgent", "outage", "rollback", "production down",
            "紧急", "线上故障", "宕机", "回滚",
        ],
    },
    ScenarioRule {
        id: "bug_fix",
        priority: 80,
        keywords: &[
            "bug", "fix", "defect", "crash", "broken", "regression",
            "修复", "缺陷", "报错", "异常", "崩溃",
        ],
    },
    ScenarioRule {
        id: "test_request",
        priority: 70,
        keywords: &[
            "test", "qa", "coverage", "unit test",
            "测试", "用例", "自动化测试",
        ],
    },
    ScenarioRule {
        id: "optimization",
        priority: 60,
        keywords: &[
            "optimize", "performance", "slow", "latency", "speed up",
            "优化", "性能", "卡顿", "提速",
        ],
    },
    ScenarioRule {
        id: "refactor",
        priority: 55,
        keywords: &[
            "refactor", "cleanup", "restructure", "tech debt",
            "重构", "整理", "技术债",
        ],
    },
    ScenarioRule {
        id: "doc_work",
        priority: 50,
        keywords: &[
            "doc", "document", "readme", "manual",
            "文档", "说明", "手册",
        ],
    },
    ScenarioRule {
        id: "new_feature",
        priority: 40,
        keywords: &[
            "feature", "implement", "support", "build",
            "新功能", "实现", "新增", "支持", "功能", "页面", "开发",
        ],
    },
    ScenarioRule {
        id: "discussion",
        priority: 10,
        keywords: &[],
    },
];

/// Fallback scenario when no keyword matches.
pub const DEFAULT_SCENARIO: &str = "discussion";

/// Classify message content into exactly one scenario id.
///
/// Scoring: keyword hit count per row, winner by (priority, hit count).
pub fn classify(content: &str) -> &'static str {
    let lowered = content.to_lowercase();
    let mut best: Option<(&ScenarioRule, usize)> = None;

    for rule in SCENARIO_TABLE {
        let hits = rule
            .keywords
            .iter()
            .filter(|kw| lowered.contains(&kw.to_lowercase()))
            .count();
        if hits == 0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((current, current_hits)) => {
                (rule.priority, hits) > (current.priority, current_hits)
            }
        };
        if better {
            best = Some((rule, hits));
        }
    }

    best.map(|(rule, _)| rule.id).unwrap_or(DEFAULT_SCENARIO)
}

/// Tag form of a scenario id (`scenario:<id>`).
pub fn scenario_tag(id: &str) -> String {
    format!("scenario:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_bug_fix_chinese() {
        assert_eq!(classify("请修复登录"), "bug_fix");
    }

    #[test]
    fn classifies_bug_fix_english() {
        assert_eq!(classify("there is a crash when saving"), "bug_fix");
    }

    #[test]
    fn classifies_new_feature() {
        assert_eq!(classify("实现一个登录页面"), "new_feature");
    }

    #[test]
    fn classifies_doc_work() {
        assert_eq!(classify("update the README 文档"), "doc_work");
    }

    #[test]
    fn hotfix_outranks_bug_fix() {
        // Contains both "修复" (bug_fix) and "紧急" (ops_hotfix).
        assert_eq!(classify("紧急修复线上故障"), "ops_hotfix");
    }

    #[test]
    fn unmatched_content_falls_back_to_discussion() {
        assert_eq!(classify("hello there"), DEFAULT_SCENARIO);
    }

    #[test]
    fn scenario_tag_shape() {
        assert_eq!(scenario_tag("bug_fix"), "scenario:bug_fix");
    }
}
