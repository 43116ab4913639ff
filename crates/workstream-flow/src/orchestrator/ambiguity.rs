//! Intake ambiguity detection.
//!
//! Policy is pluggable: a detector is a set of [`AmbiguityRule`] objects
//! evaluated in order, the first match deciding the outcome. An ambiguous
//! intake never dispatches; it produces a blocked item plus one open
//! question built from the rule's verdict.

/// Verdict of a matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ambiguity {
    /// Names of the inputs the intake is missing.
    pub missing_fields: Vec<String>,
    /// The clarification question to ask.
    pub question_text: String,
}

/// One ambiguity rule over the raw request text.
pub trait AmbiguityRule: Send + Sync {
    /// Returns a verdict when the request is ambiguous under this rule.
    fn evaluate(&self, request_text: &str) -> Option<Ambiguity>;
}

/// Pluggable ambiguity policy over the intake request text.
pub trait AmbiguityDetector: Send + Sync {
    /// Returns the first matching verdict, or `None` for a clear request.
    fn evaluate(&self, request_text: &str) -> Option<Ambiguity>;
}

/// Flags requests shorter than a minimum length.
#[derive(Debug, Clone)]
pub struct MinimumLengthRule {
    min_chars: usize,
}

impl MinimumLengthRule {
    /// Creates a rule requiring at least `min_chars` non-whitespace-trimmed
    /// characters.
    #[must_use]
    pub const fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }
}

impl AmbiguityRule for MinimumLengthRule {
    fn evaluate(&self, request_text: &str) -> Option<Ambiguity> {
        let trimmed = request_text.trim();
        if trimmed.len() >= self.min_chars {
            return None;
        }
        Some(Ambiguity {
            missing_fields: vec!["scope".to_string()],
            question_text: "The request is too short. What scope and expected outputs \
                            should the audit cover?"
                .to_string(),
        })
    }
}

/// Flags requests that mention a keyword without asking anything specific.
#[derive(Debug, Clone)]
pub struct KeywordWithoutDetailRule {
    keyword: String,
    missing_field: String,
    question_text: String,
}

impl KeywordWithoutDetailRule {
    /// Creates a rule matching when `keyword` appears (case-insensitive) and
    /// the request carries no question mark of its own.
    #[must_use]
    pub fn new(
        keyword: impl Into<String>,
        missing_field: impl Into<String>,
        question_text: impl Into<String>,
    ) -> Self {
        Self {
            keyword: keyword.into().to_lowercase(),
            missing_field: missing_field.into(),
            question_text: question_text.into(),
        }
    }
}

impl AmbiguityRule for KeywordWithoutDetailRule {
    fn evaluate(&self, request_text: &str) -> Option<Ambiguity> {
        let lowered = request_text.to_lowercase();
        if !lowered.contains(&self.keyword) || request_text.contains('?') {
            return None;
        }
        Some(Ambiguity {
            missing_fields: vec![self.missing_field.clone()],
            question_text: self.question_text.clone(),
        })
    }
}

/// Detector evaluating a list of rules in order.
pub struct RuleBasedDetector {
    rules: Vec<Box<dyn AmbiguityRule>>,
}

impl RuleBasedDetector {
    /// Creates a detector from an explicit rule list.
    #[must_use]
    pub fn new(rules: Vec<Box<dyn AmbiguityRule>>) -> Self {
        Self { rules }
    }

    /// Creates the standard rule set: a minimum request length plus a
    /// KPI-mention-without-specifics check.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(MinimumLengthRule::new(12)),
            Box::new(KeywordWithoutDetailRule::new(
                "kpi",
                "kpi_list",
                "Which KPIs should the audit report on (SLA, MTTR, backlog aging, \
                 incident volume, ...)?",
            )),
        ])
    }
}

impl AmbiguityDetector for RuleBasedDetector {
    fn evaluate(&self, request_text: &str) -> Option<Ambiguity> {
        self.rules
            .iter()
            .find_map(|rule| rule.evaluate(request_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_requests_are_ambiguous() {
        let detector = RuleBasedDetector::standard();
        let verdict = detector.evaluate("audit").unwrap();
        assert_eq!(verdict.missing_fields, vec!["scope"]);
    }

    #[test]
    fn keyword_without_specifics_is_ambiguous() {
        let detector = RuleBasedDetector::standard();
        let verdict = detector
            .evaluate("audit the kpi dashboards for the support team")
            .unwrap();
        assert_eq!(verdict.missing_fields, vec!["kpi_list"]);
    }

    #[test]
    fn keyword_with_a_question_is_clear() {
        let detector = RuleBasedDetector::standard();
        assert!(detector
            .evaluate("can you audit these kpi dashboards: SLA, MTTR?")
            .is_none());
    }

    #[test]
    fn substantial_requests_are_clear() {
        let detector = RuleBasedDetector::standard();
        assert!(detector
            .evaluate("full audit of the support workflow for Q3")
            .is_none());
    }

    #[test]
    fn custom_rule_sets_are_honored() {
        let detector = RuleBasedDetector::new(vec![Box::new(MinimumLengthRule::new(100))]);
        assert!(detector.evaluate("short but fine elsewhere").is_some());
    }
}
