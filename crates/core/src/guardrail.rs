//! Output guardrails: filters run against the agent's accumulated transcript
//! before its audio reaches the playback sink.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// Transcript characters accumulated between two guardrail evaluations.
pub const GUARDRAIL_CHECK_STEP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationCategory {
    Offensive,
    OffBrand,
    Violence,
}

impl fmt::Display for ModerationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModerationCategory::Offensive => "OFFENSIVE",
            ModerationCategory::OffBrand => "OFF_BRAND",
            ModerationCategory::Violence => "VIOLENCE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailVerdict {
    Pass,
    Tripped {
        category: ModerationCategory,
        rationale: String,
    },
}

/// A tripped guardrail together with the guardrail's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailTrip {
    pub guardrail: String,
    pub category: ModerationCategory,
    pub rationale: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait OutputGuardrail: Send + Sync {
    fn name(&self) -> String;

    async fn check(&self, text: &str) -> Result<GuardrailVerdict>;
}

/// Runs every guardrail in order and returns the first trip.
///
/// A guardrail that errors is logged and treated as passing.
pub async fn run_guardrails(
    guardrails: &[Arc<dyn OutputGuardrail>],
    text: &str,
) -> Option<GuardrailTrip> {
    for guardrail in guardrails {
        match guardrail.check(text).await {
            Ok(GuardrailVerdict::Pass) => {}
            Ok(GuardrailVerdict::Tripped {
                category,
                rationale,
            }) => {
                return Some(GuardrailTrip {
                    guardrail: guardrail.name(),
                    category,
                    rationale,
                });
            }
            Err(e) => {
                tracing::warn!(guardrail = %guardrail.name(), "guardrail check failed: {:#}", e);
            }
        }
    }
    None
}

/// Keyword moderation scoped to the company the agent represents.
///
/// `OffBrand` trips when a disparaging term appears in the same sentence as the
/// company name.
pub struct ModerationGuardrail {
    company_name: String,
    offensive: Vec<String>,
    violence: Vec<String>,
    disparaging: Vec<String>,
}

impl ModerationGuardrail {
    pub fn new(company_name: impl Into<String>) -> Self {
        let words = |list: &[&str]| -> Vec<String> {
            list.iter().map(|w| w.to_string()).collect()
        };
        Self {
            company_name: company_name.into(),
            offensive: words(&["idiot", "stupid", "moron", "shut up"]),
            violence: words(&["kill", "attack", "shoot", "hurt you"]),
            disparaging: words(&["terrible", "awful", "worst", "scam", "useless"]),
        }
    }

    pub fn with_offensive_terms(mut self, terms: Vec<String>) -> Self {
        self.offensive = terms;
        self
    }

    pub fn with_violence_terms(mut self, terms: Vec<String>) -> Self {
        self.violence = terms;
        self
    }

    pub fn with_disparaging_terms(mut self, terms: Vec<String>) -> Self {
        self.disparaging = terms;
        self
    }

    fn classify(&self, text: &str) -> Option<(ModerationCategory, String)> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect();
        let contains = |term: &str, hay: &str| {
            if term.contains(' ') {
                hay.contains(term)
            } else {
                words.contains(&term)
            }
        };

        if let Some(term) = self
            .violence
            .iter()
            .find(|t| contains(t.as_str(), &lowered))
        {
            return Some((
                ModerationCategory::Violence,
                format!("violent language: \"{}\"", term),
            ));
        }
        if let Some(term) = self
            .offensive
            .iter()
            .find(|t| contains(t.as_str(), &lowered))
        {
            return Some((
                ModerationCategory::Offensive,
                format!("offensive language: \"{}\"", term),
            ));
        }

        let company = self.company_name.to_lowercase();
        for sentence in lowered.split(['.', '!', '?']) {
            if !sentence.contains(&company) {
                continue;
            }
            let sentence_words: Vec<&str> = sentence
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .collect();
            if let Some(term) = self
                .disparaging
                .iter()
                .find(|t| sentence_words.contains(&t.as_str()))
            {
                return Some((
                    ModerationCategory::OffBrand,
                    format!("disparages {}: \"{}\"", self.company_name, term),
                ));
            }
        }
        None
    }
}

#[async_trait]
impl OutputGuardrail for ModerationGuardrail {
    fn name(&self) -> String {
        "moderation_guardrail".to_string()
    }

    async fn check(&self, text: &str) -> Result<GuardrailVerdict> {
        Ok(match self.classify(text) {
            Some((category, rationale)) => GuardrailVerdict::Tripped {
                category,
                rationale,
            },
            None => GuardrailVerdict::Pass,
        })
    }
}

/// Decides when the growing transcript of one response is due for a check.
#[derive(Debug, Default)]
pub struct TranscriptDebounce {
    text: String,
    checked_len: usize,
}

impl TranscriptDebounce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a delta; returns the full text when another step has accumulated.
    pub fn push(&mut self, delta: &str) -> Option<&str> {
        self.text.push_str(delta);
        if self.text.len() >= self.checked_len + GUARDRAIL_CHECK_STEP {
            self.checked_len = self.text.len();
            Some(&self.text)
        } else {
            None
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn reset(&mut self) {
        self.text.clear();
        self.checked_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn neutral_text_passes() {
        let guardrail = ModerationGuardrail::new("Zoom");
        let verdict = guardrail
            .check("Zoom meetings can be scheduled from the calendar tab.")
            .await
            .unwrap();
        assert_eq!(verdict, GuardrailVerdict::Pass);
    }

    #[tokio::test]
    async fn disparaging_the_company_is_off_brand() {
        let guardrail = ModerationGuardrail::new("Zoom");
        let verdict = guardrail
            .check("Honestly, Zoom is the worst option here.")
            .await
            .unwrap();
        assert!(matches!(
            verdict,
            GuardrailVerdict::Tripped {
                category: ModerationCategory::OffBrand,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn disparaging_word_elsewhere_is_fine() {
        let guardrail = ModerationGuardrail::new("Zoom");
        let verdict = guardrail
            .check("The weather was terrible. Zoom works fine though.")
            .await
            .unwrap();
        assert_eq!(verdict, GuardrailVerdict::Pass);
    }

    #[tokio::test]
    async fn whole_words_only() {
        let guardrail = ModerationGuardrail::new("Zoom");
        let verdict = guardrail.check("Let me check the skill list.").await.unwrap();
        assert_eq!(verdict, GuardrailVerdict::Pass);
    }

    #[tokio::test]
    async fn first_trip_wins_and_errors_are_skipped() {
        let mut failing = MockOutputGuardrail::new();
        failing.expect_name().return_const("failing".to_string());
        failing
            .expect_check()
            .returning(|_| Err(anyhow::anyhow!("backend down")));

        let mut tripping = MockOutputGuardrail::new();
        tripping.expect_name().return_const("strict".to_string());
        tripping.expect_check().returning(|_| {
            Ok(GuardrailVerdict::Tripped {
                category: ModerationCategory::Offensive,
                rationale: "test".to_string(),
            })
        });

        let mut unreachable = MockOutputGuardrail::new();
        unreachable.expect_check().never();

        let guardrails: Vec<Arc<dyn OutputGuardrail>> =
            vec![Arc::new(failing), Arc::new(tripping), Arc::new(unreachable)];
        let trip = run_guardrails(&guardrails, "anything").await.unwrap();
        assert_eq!(trip.guardrail, "strict");
        assert_eq!(trip.category, ModerationCategory::Offensive);
    }

    #[test]
    fn debounce_fires_every_step() {
        let mut debounce = TranscriptDebounce::new();
        let chunk = "x".repeat(40);

        assert!(debounce.push(&chunk).is_none());
        assert!(debounce.push(&chunk).is_none());
        assert_eq!(debounce.push(&chunk).map(str::len), Some(120));
        assert!(debounce.push(&chunk).is_none());

        debounce.reset();
        assert!(debounce.text().is_empty());
    }
}
