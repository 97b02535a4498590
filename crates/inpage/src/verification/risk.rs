//! Source-level risk heuristics and their cache.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use aegis_common::TrackedAddress;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_RISK_FRESHNESS: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn is_alarming(self) -> bool {
        self >= Self::High
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary: String,
}

/// Opaque source classifier.
pub trait RiskScorer: Send + Sync {
    fn score(&self, source: &str) -> RiskAssessment;
}

struct Rule {
    matches: fn(&str) -> bool,
    level: RiskLevel,
    issue: &'static str,
    recommendations: &'static [&'static str],
}

const RULES: &[Rule] = &[
    Rule {
        matches: |s| s.contains("call(") || s.contains("delegatecall("),
        level: RiskLevel::High,
        issue: "External call detected - potential reentrancy risk",
        recommendations: &[
            "Use checks-effects-interactions pattern",
            "Implement reentrancy guards",
        ],
    },
    Rule {
        matches: |s| s.contains("selfdestruct(") || s.contains("suicide("),
        level: RiskLevel::Critical,
        issue: "Self-destruct function detected - high risk",
        recommendations: &[
            "Avoid self-destruct unless absolutely necessary",
            "Implement proper access controls",
        ],
    },
    Rule {
        matches: |s| s.contains("assembly"),
        level: RiskLevel::Medium,
        issue: "Assembly code detected - requires careful review",
        recommendations: &[
            "Review assembly code thoroughly",
            "Consider using higher-level Solidity",
        ],
    },
    Rule {
        matches: |s| s.contains("delegatecall("),
        level: RiskLevel::High,
        issue: "Delegatecall detected - high risk of proxy attacks",
        recommendations: &["Validate delegatecall targets", "Use proxy patterns carefully"],
    },
    Rule {
        matches: |s| s.contains("tx.origin"),
        level: RiskLevel::Medium,
        issue: "tx.origin usage detected - potential phishing risk",
        recommendations: &["Use msg.sender instead of tx.origin"],
    },
    Rule {
        matches: |s| s.contains("block.timestamp"),
        level: RiskLevel::Medium,
        issue: "Block timestamp usage detected - potential manipulation risk",
        recommendations: &["Be cautious with block.timestamp dependencies"],
    },
    Rule {
        matches: |s| s.contains("transfer(") && !s.contains("require("),
        level: RiskLevel::Medium,
        issue: "Unchecked transfer calls detected",
        recommendations: &["Check transfer return values"],
    },
    Rule {
        matches: |s| {
            s.contains(['+', '-', '*', '/']) && !s.contains("SafeMath") && !s.contains("unchecked")
        },
        level: RiskLevel::Medium,
        issue: "Arithmetic operations without SafeMath - potential overflow risk",
        recommendations: &["Use SafeMath or Solidity 0.8+ built-in checks"],
    },
    Rule {
        matches: |s| {
            (s.contains("onlyOwner") || s.contains("onlyAdmin"))
                && !s.contains("modifier")
                && !s.contains("require")
        },
        level: RiskLevel::Medium,
        issue: "Access control functions without proper modifiers",
        recommendations: &["Implement proper access control modifiers"],
    },
    Rule {
        matches: |s| s.contains("for(") || s.contains("while("),
        level: RiskLevel::Medium,
        issue: "Loop detected - potential gas limit issues",
        recommendations: &["Consider gas limits in loops", "Use pagination for large datasets"],
    },
];

const FALLBACK_RECOMMENDATIONS: &[&str] = &[
    "Review contract source code manually",
    "Check for recent security audits",
    "Verify contract functionality",
    "Start with small test amounts",
];

/// Keyword heuristics over contract source. The level only ever escalates
/// as rules match.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternRiskScorer;

impl RiskScorer for PatternRiskScorer {
    fn score(&self, source: &str) -> RiskAssessment {
        let mut level = RiskLevel::Low;
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        for rule in RULES.iter().filter(|rule| (rule.matches)(source)) {
            level = level.max(rule.level);
            issues.push(rule.issue.to_string());
            recommendations.extend(rule.recommendations.iter().map(|r| r.to_string()));
        }

        let found = issues.len();
        if issues.is_empty() {
            issues.push("No obvious security patterns detected".to_string());
        }
        if recommendations.is_empty() {
            recommendations.extend(FALLBACK_RECOMMENDATIONS.iter().map(|r| r.to_string()));
        }

        RiskAssessment {
            level,
            issues,
            recommendations,
            summary: format!(
                "Pattern-based security analysis completed. Risk level: {level}. {found} potential issues found."
            ),
        }
    }
}

/// Per-contract memo of risk assessments.
pub struct RiskCache {
    scorer: Arc<dyn RiskScorer>,
    freshness: Duration,
    entries: Mutex<FxHashMap<TrackedAddress, (RiskAssessment, Instant)>>,
}

impl RiskCache {
    pub fn new(scorer: Arc<dyn RiskScorer>) -> Self {
        Self::with_freshness(scorer, DEFAULT_RISK_FRESHNESS)
    }

    pub fn with_freshness(scorer: Arc<dyn RiskScorer>, freshness: Duration) -> Self {
        Self {
            scorer,
            freshness,
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn assess(&self, address: TrackedAddress, source: &str) -> RiskAssessment {
        if let Some((assessment, scored_at)) = self.lock().get(&address)
            && scored_at.elapsed() < self.freshness
        {
            return assessment.clone();
        }
        let assessment = self.scorer.score(source);
        debug!(%address, level = %assessment.level, "contract source scored");
        self.lock()
            .insert(address, (assessment.clone(), Instant::now()));
        assessment
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<TrackedAddress, (RiskAssessment, Instant)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
