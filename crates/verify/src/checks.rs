//! The individual verification checks.

use crate::{Flag, FlagKind, Severity};
use regex::Regex;

fn find_span(text: &str, needle: &str) -> (usize, usize) {
    text.find(needle)
        .map(|start| (start, start + needle.len()))
        .unwrap_or((0, 0))
}

/// Numbers in the answer must match a number in the context within ±10%
/// relative tolerance.
pub struct NumericChecker {
    number_re: Regex,
}

impl NumericChecker {
    pub fn new() -> Self {
        Self {
            number_re: Regex::new(r"\b\d{1,3}(?:,\d{3})*(?:\.\d+)?%?\b").expect("static regex"),
        }
    }

    fn extract(&self, text: &str) -> Vec<String> {
        self.number_re
            .find_iter(text)
            .filter(|m| {
                // Citation anchors ([1], [2], …) are not numeric claims.
                let bytes = text.as_bytes();
                let bracketed = m.start() > 0
                    && bytes[m.start() - 1] == b'['
                    && bytes.get(m.end()) == Some(&b']');
                !bracketed
            })
            .map(|m| m.as_str().to_string())
            .collect()
    }

    fn parse(raw: &str) -> Option<f64> {
        raw.replace(',', "").trim_end_matches('%').parse().ok()
    }

    fn close_to_any(value: f64, candidates: &[f64], tolerance: f64) -> bool {
        candidates
            .iter()
            .any(|c| (value - c).abs() / c.abs().max(1.0) < tolerance)
    }

    pub fn check(&self, answer: &str, context: &str) -> Vec<Flag> {
        let context_numbers: Vec<f64> = self
            .extract(context)
            .iter()
            .filter_map(|n| Self::parse(n))
            .collect();

        let mut flags = Vec::new();
        for raw in self.extract(answer) {
            let Some(value) = Self::parse(&raw) else {
                continue;
            };
            if !Self::close_to_any(value, &context_numbers, 0.1) {
                flags.push(Flag {
                    kind: FlagKind::Numeric,
                    severity: Severity::Medium,
                    span: find_span(answer, &raw),
                    reason: "number not found in sources".into(),
                    suggestion: Some(format!("Verify {raw} against source documents")),
                    text: raw,
                    confidence: 0.7,
                });
            }
        }
        flags
    }
}

impl Default for NumericChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Proper names in the answer must appear in the context (fuzzy match:
/// case-insensitive substring, bidirectional).
pub struct EntityChecker {
    name_re: Regex,
}

impl EntityChecker {
    pub fn new() -> Self {
        Self {
            // Two or more capitalized words in sequence.
            name_re: Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b").expect("static regex"),
        }
    }

    fn fuzzy_contains(haystack_lower: &str, name: &str) -> bool {
        let name_lower = name.to_lowercase();
        haystack_lower.contains(&name_lower) || name_lower.contains(haystack_lower)
    }

    pub fn check(&self, answer: &str, context: &str) -> Vec<Flag> {
        let context_lower = context.to_lowercase();
        let mut flags = Vec::new();
        let mut seen = Vec::new();

        for m in self.name_re.find_iter(answer) {
            let name = m.as_str();
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            if !Self::fuzzy_contains(&context_lower, name) {
                flags.push(Flag {
                    kind: FlagKind::Entity,
                    severity: Severity::Medium,
                    span: (m.start(), m.end()),
                    text: name.to_string(),
                    reason: format!("'{name}' not found in sources"),
                    suggestion: Some(format!("Verify whether '{name}' is correct")),
                    confidence: 0.6,
                });
            }
        }
        flags
    }
}

impl Default for EntityChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// "According to X" patterns require `X` to appear in the context.
pub struct AttributionChecker {
    patterns: Vec<Regex>,
}

impl AttributionChecker {
    pub fn new() -> Self {
        Self {
            patterns: vec![
                Regex::new(r"(?i)according to ([^,.:;]+)").expect("static regex"),
                Regex::new(r"(?i)\b([A-Z][\w ]{2,40}?) states that").expect("static regex"),
            ],
        }
    }

    pub fn check(&self, answer: &str, context: &str) -> Vec<Flag> {
        let context_lower = context.to_lowercase();
        let mut flags = Vec::new();

        for pattern in &self.patterns {
            for captures in pattern.captures_iter(answer) {
                let Some(m) = captures.get(1) else { continue };
                let attributed = m.as_str().trim();
                if attributed.is_empty() {
                    continue;
                }
                if !context_lower.contains(&attributed.to_lowercase()) {
                    flags.push(Flag {
                        kind: FlagKind::Attribution,
                        severity: Severity::Medium,
                        span: (m.start(), m.end()),
                        text: attributed.to_string(),
                        reason: format!("attributed source '{attributed}' not found in documents"),
                        suggestion: Some("Verify source attribution".into()),
                        confidence: 0.5,
                    });
                }
            }
        }
        flags
    }
}

impl Default for AttributionChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Phrases like "studies show" without a matching context sentence are
/// fabrication cues.
pub struct FabricationChecker {
    indicators: Vec<&'static str>,
}

impl FabricationChecker {
    pub fn new() -> Self {
        Self {
            indicators: vec![
                "studies show",
                "research indicates",
                "according to experts",
                "it is well known that",
                "scientists agree",
            ],
        }
    }

    pub fn check(&self, answer: &str, context: &str) -> Vec<Flag> {
        let answer_lower = answer.to_lowercase();
        let context_lower = context.to_lowercase();
        let mut flags = Vec::new();

        for indicator in &self.indicators {
            if answer_lower.contains(indicator) && !context_lower.contains(indicator) {
                flags.push(Flag {
                    kind: FlagKind::Fabrication,
                    severity: Severity::High,
                    span: find_span(&answer_lower, indicator),
                    text: (*indicator).to_string(),
                    reason: "unsupported claim indicator".into(),
                    suggestion: Some("Remove or verify claim with actual sources".into()),
                    confidence: 0.6,
                });
            }
        }
        flags
    }
}

impl Default for FabricationChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Recognizes hedging language and derives a confidence hint.
pub struct UncertaintyDetector {
    hedges: Vec<&'static str>,
    assertives: Vec<&'static str>,
}

impl UncertaintyDetector {
    pub fn new() -> Self {
        Self {
            hedges: vec![
                "probably",
                "might",
                "may be",
                "could be",
                "possibly",
                "approximately",
                "roughly",
                "i think",
                "i believe",
                "it seems",
                "apparently",
                "as far as i know",
            ],
            assertives: vec!["definitely", "certainly", "precisely", "exactly"],
        }
    }

    /// Hedging phrases present in the text.
    pub fn detect(&self, text: &str) -> Vec<&'static str> {
        let lower = text.to_lowercase();
        self.hedges
            .iter()
            .filter(|h| lower.contains(**h))
            .copied()
            .collect()
    }

    /// 0.9 for assertive text, 0.5 for hedged text, 0.7 otherwise.
    pub fn confidence_hint(&self, text: &str) -> f64 {
        let lower = text.to_lowercase();
        let hedged = self.hedges.iter().filter(|h| lower.contains(**h)).count();
        let assertive = self
            .assertives
            .iter()
            .filter(|a| lower.contains(**a))
            .count();

        if hedged > assertive {
            0.5
        } else if assertive > hedged {
            0.9
        } else {
            0.7
        }
    }
}

impl Default for UncertaintyDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_tolerance_uses_relative_error() {
        // 109 vs 100 → 9% off, inside ±10%; 111 → outside.
        assert!(NumericChecker::close_to_any(109.0, &[100.0], 0.1));
        assert!(!NumericChecker::close_to_any(111.0, &[100.0], 0.1));
    }

    #[test]
    fn numeric_parses_thousands_and_percent() {
        assert_eq!(NumericChecker::parse("1,250"), Some(1250.0));
        assert_eq!(NumericChecker::parse("45%"), Some(45.0));
        assert_eq!(NumericChecker::parse("3.5"), Some(3.5));
    }

    #[test]
    fn entity_fuzzy_match_is_bidirectional() {
        let checker = EntityChecker::new();
        // "Ada Lovelace" appears in context: no flag even with extra words.
        let flags = checker.check(
            "Ada Lovelace wrote the notes.",
            "The notes were written by ada lovelace in 1843.",
        );
        assert!(flags.is_empty());
    }

    #[test]
    fn attribution_extracts_the_attributed_source() {
        let checker = AttributionChecker::new();
        let flags = checker.check(
            "According to the Finance Report, margins fell.",
            "Margins fell in the third quarter.",
        );
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].text, "the Finance Report");
    }

    #[test]
    fn fabrication_cue_supported_by_context_passes() {
        let checker = FabricationChecker::new();
        let flags = checker.check(
            "Studies show improved retention.",
            "Recent studies show improved retention among users.",
        );
        assert!(flags.is_empty());
    }

    #[test]
    fn uncertainty_hint_levels() {
        let detector = UncertaintyDetector::new();
        assert_eq!(detector.confidence_hint("It is definitely 20 days."), 0.9);
        assert_eq!(detector.confidence_hint("It is probably 20 days."), 0.5);
        assert_eq!(detector.confidence_hint("It is 20 days."), 0.7);
        assert_eq!(detector.detect("I think it might rain").len(), 2);
    }
}
