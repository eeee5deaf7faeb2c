//! Validation Engine — applies declarative rules to a generated output.
//!
//! One [`ValidationResult`] per rule, in rule order. A malformed or failing rule
//! only affects its own result: it is reported as `passed = false` with
//! `details`, and the remaining rules still run.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::eval::compare::compare;
use crate::eval::tokens::estimate_tokens;
use crate::models::eval::{
    CompareOptions, CustomRuleConfig, PhraseRuleConfig, RuleSpec, SimilarityRuleConfig,
    ValidationResult, ValidationRule,
};

#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("malformed rule: {0}")]
    Malformed(String),

    #[error("{0} rule requires a non-empty 'phrases' list")]
    MissingPhrases(&'static str),

    #[error("similarity rule requires a 'threshold' between 0 and 1")]
    InvalidThreshold,

    #[error("similarity rule requires an expected output")]
    MissingExpectedOutput,

    #[error("custom rule requires a 'customFunction' name")]
    MissingFunctionName,

    #[error("no resolver registered for custom rule '{0}'")]
    UnresolvedFunction(String),

    #[error("custom rule '{name}' failed: {reason}")]
    CustomFailed { name: String, reason: String },

    #[error("custom rule '{name}' returned score {score} outside [0, 1]")]
    InvalidScore { name: String, score: f64 },
}

/// What a custom rule reports back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CustomOutcome {
    pub passed: bool,
    pub score: Option<f64>,
}

impl CustomOutcome {
    pub fn pass_fail(passed: bool) -> Self {
        Self {
            passed,
            score: Some(if passed { 1.0 } else { 0.0 }),
        }
    }
}

/// A host-provided check referenced by name from a `custom` rule.
pub trait CustomRule: Send + Sync {
    fn check(&self, output: &str, config: &CustomRuleConfig) -> Result<CustomOutcome, String>;
}

impl<F> CustomRule for F
where
    F: Fn(&str, &CustomRuleConfig) -> Result<CustomOutcome, String> + Send + Sync,
{
    fn check(&self, output: &str, config: &CustomRuleConfig) -> Result<CustomOutcome, String> {
        self(output, config)
    }
}

/// Looks up custom rules by name.
pub trait CustomRuleResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<dyn CustomRule>>;
}

/// Name → rule map. [`CustomRuleRegistry::with_builtins`] ships
/// `non_empty` and `max_tokens` (`metadata.limit`).
#[derive(Default, Clone)]
pub struct CustomRuleRegistry {
    rules: HashMap<String, Arc<dyn CustomRule>>,
}

impl CustomRuleRegistry {
    pub fn with_builtins() -> Self {
        Self::default()
            .register(
                "non_empty",
                |output: &str, _: &CustomRuleConfig| -> Result<CustomOutcome, String> {
                    Ok(CustomOutcome::pass_fail(!output.trim().is_empty()))
                },
            )
            .register("max_tokens", max_tokens_rule)
    }

    pub fn register(mut self, name: impl Into<String>, rule: impl CustomRule + 'static) -> Self {
        self.rules.insert(name.into(), Arc::new(rule));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl CustomRuleResolver for CustomRuleRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<dyn CustomRule>> {
        self.rules.get(name).cloned()
    }
}

fn max_tokens_rule(output: &str, config: &CustomRuleConfig) -> Result<CustomOutcome, String> {
    let limit = config
        .metadata
        .as_ref()
        .and_then(|m| m.get("limit"))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| "metadata.limit must be a non-negative integer".to_string())?;

    let tokens = u64::from(estimate_tokens(output));
    let passed = tokens <= limit;
    let score = if passed {
        1.0
    } else {
        limit as f64 / tokens as f64
    };
    Ok(CustomOutcome {
        passed,
        score: Some(score),
    })
}

/// Inputs a rule may need besides the output itself.
pub struct ValidationContext<'a> {
    pub expected_outputs: &'a [String],
    pub comparison: CompareOptions,
    pub resolver: &'a dyn CustomRuleResolver,
}

struct RuleOutcome {
    passed: bool,
    score: Option<f64>,
    details: Option<String>,
}

/// Runs every rule against `output`. Never fails as a whole.
pub fn validate(
    output: &str,
    rules: &[RuleSpec],
    ctx: &ValidationContext<'_>,
) -> Vec<ValidationResult> {
    rules
        .iter()
        .map(|rule| match decode(rule).and_then(|r| check_rule(output, r, ctx)) {
            Ok(outcome) => ValidationResult {
                rule: rule.clone(),
                passed: outcome.passed,
                score: outcome.score,
                details: outcome.details,
            },
            Err(e) => {
                warn!("Validation rule '{}' could not be applied: {e}", rule.kind());
                ValidationResult {
                    rule: rule.clone(),
                    passed: false,
                    score: None,
                    details: Some(e.to_string()),
                }
            }
        })
        .collect()
}

/// Re-runs the typed decode on a malformed rule to recover serde's reason.
fn decode(rule: &RuleSpec) -> Result<&ValidationRule, RuleError> {
    match rule {
        RuleSpec::Valid(rule) => Ok(rule),
        RuleSpec::Malformed(raw) => Err(RuleError::Malformed(
            serde_json::from_value::<ValidationRule>(raw.clone())
                .err()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "rule could not be decoded".to_string()),
        )),
    }
}

fn check_rule(
    output: &str,
    rule: &ValidationRule,
    ctx: &ValidationContext<'_>,
) -> Result<RuleOutcome, RuleError> {
    match rule {
        ValidationRule::Required(config) => {
            let (found, missing) = partition_phrases(output, config, "required")?;
            let total = found.len() + missing.len();
            Ok(RuleOutcome {
                passed: missing.is_empty(),
                score: Some(found.len() as f64 / total as f64),
                details: (!missing.is_empty())
                    .then(|| format!("Missing required phrases: {}", missing.join(", "))),
            })
        }
        ValidationRule::Forbidden(config) => {
            let (found, missing) = partition_phrases(output, config, "forbidden")?;
            let total = found.len() + missing.len();
            Ok(RuleOutcome {
                passed: found.is_empty(),
                score: Some(missing.len() as f64 / total as f64),
                details: (!found.is_empty())
                    .then(|| format!("Forbidden phrases present: {}", found.join(", "))),
            })
        }
        ValidationRule::Similarity(config) => check_similarity(output, config, ctx),
        ValidationRule::Custom(config) => check_custom(output, config, ctx.resolver),
    }
}

/// Splits the configured phrases into (found, missing).
fn partition_phrases<'c>(
    output: &str,
    config: &'c PhraseRuleConfig,
    kind: &'static str,
) -> Result<(Vec<&'c str>, Vec<&'c str>), RuleError> {
    let phrases = config
        .phrases
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or(RuleError::MissingPhrases(kind))?;

    let haystack = if config.case_insensitive {
        output.to_lowercase()
    } else {
        output.to_string()
    };

    Ok(phrases.iter().map(String::as_str).partition(|phrase| {
        if config.case_insensitive {
            haystack.contains(&phrase.to_lowercase())
        } else {
            haystack.contains(phrase)
        }
    }))
}

fn check_similarity(
    output: &str,
    config: &SimilarityRuleConfig,
    ctx: &ValidationContext<'_>,
) -> Result<RuleOutcome, RuleError> {
    let threshold = config
        .threshold
        .filter(|t| (0.0..=1.0).contains(t))
        .ok_or(RuleError::InvalidThreshold)?;

    let expected = config
        .expected_output
        .as_deref()
        .or_else(|| ctx.expected_outputs.first().map(String::as_str))
        .ok_or(RuleError::MissingExpectedOutput)?;

    let similarity = compare(output, expected, ctx.comparison).similarity;
    let passed = similarity >= threshold;
    Ok(RuleOutcome {
        passed,
        score: Some(similarity),
        details: (!passed)
            .then(|| format!("Similarity {similarity:.3} is below threshold {threshold:.3}")),
    })
}

fn check_custom(
    output: &str,
    config: &CustomRuleConfig,
    resolver: &dyn CustomRuleResolver,
) -> Result<RuleOutcome, RuleError> {
    let name = config
        .custom_function
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .ok_or(RuleError::MissingFunctionName)?;

    let rule = resolver
        .resolve(name)
        .ok_or_else(|| RuleError::UnresolvedFunction(name.to_string()))?;

    let outcome = rule
        .check(output, config)
        .map_err(|reason| RuleError::CustomFailed {
            name: name.to_string(),
            reason,
        })?;

    if let Some(score) = outcome.score {
        if !(0.0..=1.0).contains(&score) {
            return Err(RuleError::InvalidScore {
                name: name.to_string(),
                score,
            });
        }
    }

    Ok(RuleOutcome {
        passed: outcome.passed,
        score: outcome.score,
        details: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(value: serde_json::Value) -> RuleSpec {
        serde_json::from_value(value).unwrap()
    }

    fn run(output: &str, rules: &[RuleSpec], expected: &[String]) -> Vec<ValidationResult> {
        let registry = CustomRuleRegistry::with_builtins();
        let ctx = ValidationContext {
            expected_outputs: expected,
            comparison: CompareOptions::default(),
            resolver: &registry,
        };
        validate(output, rules, &ctx)
    }

    #[test]
    fn test_required_all_present() {
        let results = run(
            "Hello Ann, welcome",
            &[rule(json!({ "type": "required", "config": { "phrases": ["Hello", "Ann"] } }))],
            &[],
        );
        assert!(results[0].passed);
        assert_eq!(results[0].score, Some(1.0));
        assert!(results[0].details.is_none());
    }

    #[test]
    fn test_required_all_absent() {
        let results = run(
            "Goodbye",
            &[rule(json!({ "type": "required", "config": { "phrases": ["Hello", "Ann"] } }))],
            &[],
        );
        assert!(!results[0].passed);
        assert_eq!(results[0].score, Some(0.0));
        assert_eq!(
            results[0].details.as_deref(),
            Some("Missing required phrases: Hello, Ann")
        );
    }

    #[test]
    fn test_required_is_case_sensitive_unless_configured() {
        let sensitive = run(
            "hello ann",
            &[rule(json!({ "type": "required", "config": { "phrases": ["Hello"] } }))],
            &[],
        );
        assert!(!sensitive[0].passed);

        let insensitive = run(
            "hello ann",
            &[rule(json!({
                "type": "required",
                "config": { "phrases": ["Hello"], "caseInsensitive": true }
            }))],
            &[],
        );
        assert!(insensitive[0].passed);
    }

    #[test]
    fn test_forbidden_scores_fraction_absent() {
        let results = run(
            "This is a secret plan",
            &[rule(json!({
                "type": "forbidden",
                "config": { "phrases": ["secret", "password", "token", "key"] }
            }))],
            &[],
        );
        assert!(!results[0].passed);
        assert_eq!(results[0].score, Some(0.75));
    }

    #[test]
    fn test_similarity_uses_expected_outputs_fallback() {
        let expected = vec!["Hello Ann".to_string()];
        let results = run(
            "Hello Ann",
            &[rule(json!({ "type": "similarity", "config": { "threshold": 0.9 } }))],
            &expected,
        );
        assert!(results[0].passed);
        assert_eq!(results[0].score, Some(1.0));
    }

    #[test]
    fn test_similarity_below_threshold_fails() {
        let results = run(
            "Completely different",
            &[rule(json!({
                "type": "similarity",
                "config": { "threshold": 0.8, "expectedOutput": "Hello Ann" }
            }))],
            &[],
        );
        assert!(!results[0].passed);
        assert!(results[0].score.unwrap() < 0.8);
    }

    #[test]
    fn test_malformed_rules_are_isolated_and_ordered() {
        let rules = vec![
            rule(json!({ "type": "custom", "config": { "customFunction": "does_not_exist" } })),
            rule(json!({ "type": "similarity", "config": { "threshold": 1.5 } })),
            rule(json!({ "type": "required", "config": {} })),
            rule(json!({ "type": "custom", "config": {} })),
            rule(json!({ "type": "required", "config": { "phrases": ["Ann"] } })),
        ];
        let results = run("Hello Ann", &rules, &[]);

        assert_eq!(results.len(), rules.len());
        for (result, rule) in results.iter().zip(&rules) {
            assert_eq!(&result.rule, rule);
        }
        for result in &results[..4] {
            assert!(!result.passed);
            assert!(!result.details.as_deref().unwrap_or_default().is_empty());
        }
        assert_eq!(
            results[0].details.as_deref(),
            Some("no resolver registered for custom rule 'does_not_exist'")
        );
        assert!(results[4].passed);
    }

    #[test]
    fn test_undecodable_rules_fail_with_serde_reason() {
        let rules = vec![
            rule(json!({ "type": "required", "config": { "phrases": "Ann" } })),
            rule(json!({ "type": "similarity", "config": { "threshold": "0.8" } })),
            rule(json!({ "type": "custom" })),
            rule(json!({ "type": "regex", "config": {} })),
            rule(json!({ "type": "required", "config": { "phrases": ["Ann"] } })),
        ];
        let results = run("Hello Ann", &rules, &[]);

        assert_eq!(results.len(), 5);
        for (result, rule) in results.iter().zip(&rules) {
            assert_eq!(&result.rule, rule);
        }
        for result in &results[..4] {
            assert!(!result.passed);
            assert_eq!(result.score, None);
            assert!(result
                .details
                .as_deref()
                .unwrap()
                .starts_with("malformed rule: "));
        }
        assert!(results[0].details.as_deref().unwrap().contains("expected a sequence"));
        assert!(results[3].details.as_deref().unwrap().contains("regex"));
        assert!(results[4].passed);
    }

    #[test]
    fn test_builtin_custom_rules() {
        let results = run(
            "abcdefgh",
            &[
                rule(json!({ "type": "custom", "config": { "customFunction": "non_empty" } })),
                rule(json!({
                    "type": "custom",
                    "config": { "customFunction": "max_tokens", "metadata": { "limit": 1 } }
                })),
                rule(json!({ "type": "custom", "config": { "customFunction": "max_tokens" } })),
            ],
            &[],
        );
        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert_eq!(results[1].score, Some(0.5));
        assert!(!results[2].passed);
        assert!(results[2].details.as_deref().unwrap().contains("metadata.limit"));
    }

    #[test]
    fn test_registered_closure_and_invalid_score() {
        let registry = CustomRuleRegistry::default()
            .register(
                "mentions_name",
                |output: &str, config: &CustomRuleConfig| -> Result<CustomOutcome, String> {
                    let name = config
                        .metadata
                        .as_ref()
                        .and_then(|m| m.get("name"))
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| "metadata.name missing".to_string())?;
                    Ok(CustomOutcome::pass_fail(output.contains(name)))
                },
            )
            .register(
                "broken_score",
                |_: &str, _: &CustomRuleConfig| -> Result<CustomOutcome, String> {
                    Ok(CustomOutcome {
                        passed: true,
                        score: Some(7.0),
                    })
                },
            );
        let ctx = ValidationContext {
            expected_outputs: &[],
            comparison: CompareOptions::default(),
            resolver: &registry,
        };
        let rules = vec![
            rule(json!({
                "type": "custom",
                "config": { "customFunction": "mentions_name", "metadata": { "name": "Ann" } }
            })),
            rule(json!({ "type": "custom", "config": { "customFunction": "broken_score" } })),
        ];

        let results = validate("Hi Ann", &rules, &ctx);
        assert!(results[0].passed);
        assert_eq!(results[0].score, Some(1.0));
        assert!(!results[1].passed);
        assert_eq!(registry.names(), vec!["broken_score", "mentions_name"]);
    }
}
