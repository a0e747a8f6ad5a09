//! Answer verification against retrieved context.
//!
//! Given `(answer, retrieved chunks)` the verifier runs fact, entity,
//! attribution, fabrication, and hedging checks and produces a scored
//! report with span-level flags. It never modifies the answer; the
//! coordinator decides whether to re-generate.

pub mod checks;

use checks::{AttributionChecker, EntityChecker, FabricationChecker, NumericChecker, UncertaintyDetector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What kind of inconsistency a flag marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
    Numeric,
    Entity,
    Attribution,
    Fabrication,
}

impl std::fmt::Display for FlagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Numeric => "numeric",
            Self::Entity => "entity",
            Self::Attribution => "attribution",
            Self::Fabrication => "fabrication",
        };
        write!(f, "{s}")
    }
}

/// Flag severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Score penalty contributed by one flag of this severity.
    pub fn penalty(&self) -> f64 {
        match self {
            Self::Low => 0.05,
            Self::Medium => 0.1,
            Self::High => 0.2,
            Self::Critical => 0.3,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// One flagged span in the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flag {
    pub kind: FlagKind,
    pub severity: Severity,

    /// Character span `(start, end)` of the flagged text in the answer;
    /// `(0, 0)` when the text could not be located.
    pub span: (usize, usize),

    /// The flagged text.
    pub text: String,

    /// Why it was flagged.
    pub reason: String,

    /// What to do about it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,

    /// Detection confidence.
    pub confidence: f64,
}

/// The verification report for one answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierReport {
    /// `1 − Σ penalty(severity)`, clamped to `[0, 1]`. 1.0 = clean.
    pub overall_score: f64,

    /// All flags.
    pub flags: Vec<Flag>,

    /// Flag counts by kind.
    pub by_kind: BTreeMap<String, usize>,

    /// Flag counts by severity.
    pub by_severity: BTreeMap<String, usize>,

    /// Actionable follow-ups.
    pub recommendations: Vec<String>,

    /// Confidence hint derived from hedging language in the answer.
    pub confidence_hint: f64,
}

impl VerifierReport {
    /// Whether any flag reaches the given severity.
    pub fn has_severity(&self, severity: Severity) -> bool {
        self.flags.iter().any(|f| f.severity >= severity)
    }
}

/// The verifier. Stateless; construct once and share.
pub struct Verifier {
    numeric: NumericChecker,
    entity: EntityChecker,
    attribution: AttributionChecker,
    fabrication: FabricationChecker,
    uncertainty: UncertaintyDetector,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier {
    pub fn new() -> Self {
        Self {
            numeric: NumericChecker::new(),
            entity: EntityChecker::new(),
            attribution: AttributionChecker::new(),
            fabrication: FabricationChecker::new(),
            uncertainty: UncertaintyDetector::new(),
        }
    }

    /// Verify an answer against the retrieved chunk texts.
    pub fn verify(&self, answer: &str, chunks: &[String]) -> VerifierReport {
        let context = chunks.join(" ");

        let mut flags = Vec::new();
        flags.extend(self.numeric.check(answer, &context));
        flags.extend(self.entity.check(answer, &context));
        flags.extend(self.attribution.check(answer, &context));
        flags.extend(self.fabrication.check(answer, &context));

        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
        let mut penalty = 0.0;
        for flag in &flags {
            *by_kind.entry(flag.kind.to_string()).or_default() += 1;
            *by_severity.entry(flag.severity.to_string()).or_default() += 1;
            penalty += flag.severity.penalty();
        }

        let overall_score = (1.0 - penalty).clamp(0.0, 1.0);
        let recommendations = Self::recommendations(&flags);
        let confidence_hint = self.uncertainty.confidence_hint(answer);

        tracing::debug!(
            flags = flags.len(),
            score = overall_score,
            "verification complete"
        );

        VerifierReport {
            overall_score,
            flags,
            by_kind,
            by_severity,
            recommendations,
            confidence_hint,
        }
    }

    fn recommendations(flags: &[Flag]) -> Vec<String> {
        let mut recs = Vec::new();
        if flags.iter().any(|f| f.severity == Severity::Critical) {
            recs.push("Review and rewrite sections with critical inconsistencies".into());
        }
        if flags.iter().any(|f| f.kind == FlagKind::Numeric) {
            recs.push("Verify all numerical values against source documents".into());
        }
        if flags.iter().any(|f| f.kind == FlagKind::Entity) {
            recs.push("Double-check entity names and references".into());
        }
        if flags.iter().any(|f| f.kind == FlagKind::Attribution) {
            recs.push("Verify source attributions".into());
        }
        if flags.iter().any(|f| f.kind == FlagKind::Fabrication) {
            recs.push("Remove unsupported claims or add proper citations".into());
        }
        if flags.is_empty() {
            recs.push("Response appears well-grounded in source material".into());
        }
        recs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn grounded_answer_scores_clean() {
        let verifier = Verifier::new();
        let report = verifier.verify(
            "Annual leave is 20 working days after one year.",
            &ctx(&["Annual leave is 20 working days for employees after one year."]),
        );
        assert!(report.overall_score >= 0.9);
        assert!(report.flags.is_empty());
        assert_eq!(
            report.recommendations,
            vec!["Response appears well-grounded in source material"]
        );
    }

    #[test]
    fn fabricated_number_is_flagged_medium() {
        let verifier = Verifier::new();
        let report = verifier.verify(
            "Annual leave is 35 working days.",
            &ctx(&["Annual leave is 20 working days for employees."]),
        );
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == FlagKind::Numeric)
            .expect("numeric flag");
        assert_eq!(flag.severity, Severity::Medium);
        assert_eq!(flag.text, "35");
        assert!(report.overall_score < 1.0);
    }

    #[test]
    fn citation_anchors_are_not_numeric_claims() {
        let verifier = Verifier::new();
        let report = verifier.verify(
            "Annual leave is 20 working days [1].",
            &ctx(&["Annual leave is 20 working days for employees."]),
        );
        assert!(report.flags.is_empty(), "{:?}", report.flags);
    }

    #[test]
    fn number_within_tolerance_passes() {
        let verifier = Verifier::new();
        // 102 is within ±10% of 100.
        let report = verifier.verify(
            "Revenue was about 102 million.",
            &ctx(&["Revenue reached 100 million this quarter."]),
        );
        assert!(report.flags.iter().all(|f| f.kind != FlagKind::Numeric));
    }

    #[test]
    fn heavily_fabricated_answer_scores_below_half() {
        let verifier = Verifier::new();
        let report = verifier.verify(
            "According to Gartner, studies show that Initech Systems grew 45% to \
             9.99 million users, and research indicates further growth.",
            &ctx(&["Annual leave is 20 working days for employees after one year."]),
        );
        assert!(report.overall_score < 0.5, "score {}", report.overall_score);
        assert!(report.by_kind.contains_key("numeric"));
        assert!(report.by_kind.contains_key("fabrication"));
    }

    #[test]
    fn unknown_entity_is_flagged() {
        let verifier = Verifier::new();
        let report = verifier.verify(
            "The policy was written by Jane Doe.",
            &ctx(&["The leave policy applies to all employees."]),
        );
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == FlagKind::Entity)
            .expect("entity flag");
        assert_eq!(flag.text, "Jane Doe");
    }

    #[test]
    fn hedged_answer_lowers_confidence_hint() {
        let verifier = Verifier::new();
        let hedged = verifier.verify(
            "It is probably around 20 days, I think.",
            &ctx(&["Annual leave is 20 working days."]),
        );
        let firm = verifier.verify(
            "It is 20 days.",
            &ctx(&["Annual leave is 20 working days."]),
        );
        assert!(hedged.confidence_hint < firm.confidence_hint);
    }

    #[test]
    fn report_counts_by_kind_and_severity() {
        let verifier = Verifier::new();
        let report = verifier.verify(
            "Studies show 77 cases.",
            &ctx(&["There were 12 cases."]),
        );
        assert_eq!(report.by_kind.get("numeric"), Some(&1));
        assert_eq!(report.by_kind.get("fabrication"), Some(&1));
        assert_eq!(report.by_severity.get("medium"), Some(&1));
        assert_eq!(report.by_severity.get("high"), Some(&1));
    }
}
