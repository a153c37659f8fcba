//! Pull a number out of model output and judge it against the exact answer.
//!
//! Two knobs, both fixed per run by configuration:
//! - extraction: the first or the last number-like match in the output;
//! - comparison: exact integers plus significant-figure rounding, or an
//!   absolute tolerance.

use mathprompt_core::{ExtractionPolicy, ScoringConfig, ScoringPolicy};
use regex::Regex;
use std::sync::OnceLock;

/// Optional minus, digits, optional decimal part, optional `/denominator`.
const NUMBER_PATTERN: &str = r"-?\d+(?:\.\d+)?(?:/\d+)?";

fn number_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NUMBER_PATTERN).ok()).as_ref()
}

/// Extract the model's answer from `text`.
///
/// Fractions like `3/4` are resolved by division. Returns `None` when nothing
/// matches or the denominator is zero.
pub fn extract_number(text: &str, policy: ExtractionPolicy) -> Option<f64> {
    let text = text.trim();
    let mut matches = number_regex()?.find_iter(text);
    let found = match policy {
        ExtractionPolicy::First => matches.next(),
        ExtractionPolicy::Last => matches.last(),
    }?;
    parse_number(found.as_str())
}

fn parse_number(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((numerator, denominator)) => {
            let numerator: f64 = numerator.parse().ok()?;
            let denominator: f64 = denominator.parse().ok()?;
            if denominator == 0.0 {
                return None;
            }
            Some(numerator / denominator)
        }
        None => s.parse().ok(),
    }
}

/// Round `x` to `sig` significant figures.
pub fn round_sig(x: f64, sig: u32) -> f64 {
    if x == 0.0 || !x.is_finite() {
        return x;
    }
    let magnitude = x.abs().log10().floor() as i32;
    let factor = 10f64.powi(sig as i32 - 1 - magnitude);
    (x * factor).round() / factor
}

/// Judge an extracted value against the expected answer.
///
/// A missing extraction is always wrong.
pub fn check_answer(extracted: Option<f64>, expected: f64, policy: &ScoringPolicy) -> bool {
    let Some(extracted) = extracted else {
        return false;
    };
    if !extracted.is_finite() {
        return false;
    }
    match *policy {
        ScoringPolicy::SignificantFigures { digits } => {
            if expected.fract() == 0.0 {
                extracted == expected
            } else {
                round_sig(extracted, digits) == round_sig(expected, digits)
            }
        }
        ScoringPolicy::Tolerance { tolerance } => (extracted - expected).abs() <= tolerance,
    }
}

/// Extraction and comparison bundled under one configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    /// Create a scorer for the given policies.
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Extract an answer from `response` and check it against `expected`.
    pub fn score(&self, response: &str, expected: f64) -> (Option<f64>, bool) {
        let extracted = extract_number(response, self.config.extraction);
        let correct = check_answer(extracted, expected, &self.config.policy);
        (extracted, correct)
    }

    /// The policies in use.
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIG3: ScoringPolicy = ScoringPolicy::SignificantFigures { digits: 3 };
    const TOL: ScoringPolicy = ScoringPolicy::Tolerance { tolerance: 0.01 };

    #[test]
    fn test_extract_plain_integer() {
        assert_eq!(extract_number("The answer is 42.", ExtractionPolicy::First), Some(42.0));
    }

    #[test]
    fn test_extract_negative_fraction() {
        assert_eq!(extract_number("-3/4 apples", ExtractionPolicy::First), Some(-0.75));
    }

    #[test]
    fn test_extract_nothing() {
        assert_eq!(extract_number("no numbers here", ExtractionPolicy::First), None);
        assert_eq!(extract_number("", ExtractionPolicy::Last), None);
    }

    #[test]
    fn test_extract_zero_denominator() {
        assert_eq!(extract_number("5/0", ExtractionPolicy::First), None);
    }

    #[test]
    fn test_extract_decimal() {
        assert_eq!(extract_number("  = 3.75\n", ExtractionPolicy::First), Some(3.75));
    }

    #[test]
    fn test_first_versus_last() {
        let text = "12 + 30 = 42";
        assert_eq!(extract_number(text, ExtractionPolicy::First), Some(12.0));
        assert_eq!(extract_number(text, ExtractionPolicy::Last), Some(42.0));
    }

    #[test]
    fn test_round_sig() {
        assert_eq!(round_sig(3.14159, 3), 3.14);
        assert_eq!(round_sig(0.0012345, 2), 0.0012);
        assert_eq!(round_sig(123456.0, 3), 123000.0);
        assert_eq!(round_sig(0.0, 3), 0.0);
    }

    #[test]
    fn test_significant_figures_policy() {
        assert!(check_answer(Some(100.0), 100.0, &SIG3));
        assert!(check_answer(Some(3.14159), 3.14, &SIG3));
        assert!(!check_answer(Some(3.2), 3.14, &SIG3));
        // Integers must match exactly.
        assert!(!check_answer(Some(100.4), 100.0, &SIG3));
    }

    #[test]
    fn test_tolerance_policy() {
        assert!(check_answer(Some(5.004), 5.0, &TOL));
        assert!(!check_answer(Some(5.02), 5.0, &TOL));
        assert!(check_answer(Some(-7.0), -7.0, &TOL));
    }

    #[test]
    fn test_missing_extraction_is_wrong() {
        assert!(!check_answer(None, 0.0, &SIG3));
        assert!(!check_answer(None, 0.0, &TOL));
        assert!(!check_answer(Some(f64::INFINITY), 1.0, &TOL));
    }

    #[test]
    fn test_scorer_combines_both_steps() {
        let scorer = Scorer::default();
        assert_eq!(scorer.score("19", 19.0), (Some(19.0), true));
        assert_eq!(scorer.score("I think it is 20", 19.0), (Some(20.0), false));
        assert_eq!(scorer.score("unsure", 19.0), (None, false));
    }
}
