//! Privacy filter: rejects disallowed personal data before persistence.
//!
//! Built-in detectors cover US social security numbers and payment card
//! numbers (Luhn-validated). Deployments add their own patterns through
//! `[privacy] blocked_patterns`.

use advisor_config::PrivacyConfig;
use advisor_core::error::IngestError;
use regex_lite::Regex;

/// What the filter found. The matched text is never included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivacyViolation {
    pub detector: String,
    pub offset: usize,
}

impl std::fmt::Display for PrivacyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} detected at byte {}", self.detector, self.offset)
    }
}

impl From<PrivacyViolation> for IngestError {
    fn from(v: PrivacyViolation) -> Self {
        IngestError::PrivacyRejected { reason: v.to_string() }
    }
}

enum Detector {
    Pattern { name: String, regex: Regex },
    CardNumber(Regex),
}

pub struct PrivacyFilter {
    enabled: bool,
    detectors: Vec<Detector>,
}

impl std::fmt::Debug for PrivacyFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivacyFilter")
            .field("enabled", &self.enabled)
            .field("detectors", &self.detectors.len())
            .finish()
    }
}

const SSN_PATTERN: &str = r"\b\d{3}-\d{2}-\d{4}\b";
const CARD_PATTERN: &str = r"\b\d(?:[ -]?\d){12,18}\b";

impl PrivacyFilter {
    /// Built-in detectors only.
    pub fn builtin() -> Self {
        let mut detectors = Vec::new();
        if let Ok(regex) = Regex::new(SSN_PATTERN) {
            detectors.push(Detector::Pattern { name: "ssn".into(), regex });
        }
        if let Ok(regex) = Regex::new(CARD_PATTERN) {
            detectors.push(Detector::CardNumber(regex));
        }
        Self { enabled: true, detectors }
    }

    /// A filter that accepts everything.
    pub fn disabled() -> Self {
        Self { enabled: false, detectors: Vec::new() }
    }

    /// Built-ins plus configured patterns. Invalid patterns are skipped with a
    /// warning; config validation rejects them earlier.
    pub fn from_config(config: &PrivacyConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let mut filter = Self::builtin();
        for (i, pattern) in config.blocked_patterns.iter().enumerate() {
            match Regex::new(pattern) {
                Ok(regex) => filter.detectors.push(Detector::Pattern {
                    name: format!("blocked_pattern[{i}]"),
                    regex,
                }),
                Err(e) => tracing::warn!(pattern = %pattern, error = %e, "Skipping invalid privacy pattern"),
            }
        }
        filter
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// First violation in `text`, if any.
    pub fn scan(&self, text: &str) -> Option<PrivacyViolation> {
        if !self.enabled {
            return None;
        }
        for detector in &self.detectors {
            match detector {
                Detector::Pattern { name, regex } => {
                    if let Some(m) = regex.find(text) {
                        return Some(PrivacyViolation { detector: name.clone(), offset: m.start() });
                    }
                }
                Detector::CardNumber(regex) => {
                    if let Some(m) = regex.find_iter(text).find(|m| luhn_valid(m.as_str())) {
                        return Some(PrivacyViolation {
                            detector: "card_number".into(),
                            offset: m.start(),
                        });
                    }
                }
            }
        }
        None
    }

    pub fn check(&self, text: &str) -> Result<(), IngestError> {
        match self.scan(text) {
            Some(v) => Err(v.into()),
            None => Ok(()),
        }
    }
}

impl Default for PrivacyFilter {
    fn default() -> Self {
        Self::builtin()
    }
}

fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
