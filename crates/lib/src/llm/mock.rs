//! Deterministic stand-in for the local model. Picks a topic template from the question and
//! echoes the question back, so the service is usable without a model runtime.

use super::backend::{ModelBackend, ModelRequest, ModelResponse, Provenance, BackendError};
use super::safety;
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Prompts built by the follow-up agent end with this marker followed by the new question.
pub const QUESTION_MARKER: &str = "User question:";

const CHOLESTEROL: &str = "Cholesterol is a waxy substance found in the blood. The body needs some of it to make hormones and digest fats. Levels above the reference range (for total cholesterol, commonly 240 mg/dL) are associated with a higher risk of heart disease, because excess cholesterol can build up in artery walls.

General information often discussed with healthcare providers includes dietary fiber, physical activity and weight management. A healthcare provider can assess individual risk factors and explain which options fit a specific situation.";

const BLOOD_PRESSURE: &str = "Blood pressure is the force of blood pushing against artery walls. It is reported as two numbers: systolic (while the heart beats) and diastolic (while it rests). Readings below 120/80 mmHg are generally considered normal.

Health literature commonly discusses sodium intake, regular aerobic activity and stress reduction in relation to blood pressure. A healthcare provider can interpret specific readings and discuss what they mean individually.";

const GLUCOSE: &str = "Blood glucose is the main sugar carried in the blood. Diabetes is a condition where glucose levels stay higher than normal over time, which can affect several body systems.

General topics often covered by health authorities include nutrition, physical activity and glucose monitoring to track patterns. For an explanation of specific readings, a healthcare provider or diabetes educator is the right person to ask.";

const GENERAL: &str = "Here is some general educational information:

- Test results are compared against reference ranges, which can differ between laboratories.
- A value outside the range is a reason to talk with a healthcare provider, not by itself a conclusion.
- Some values are borderline and are simply monitored over time.

For guidance based on individual results and health history, please consult a healthcare provider.";

/// Mock model backend. Never fails; latency is the time to format a template.
#[derive(Debug, Clone, Default)]
pub struct MockBackend;

impl MockBackend {
    pub fn new() -> Self {
        Self
    }

    /// Deterministic answer for `prompt`.
    pub fn compose(prompt: &str) -> String {
        let question = extract_question(prompt);
        let lower = question.to_lowercase();
        let body = if lower.contains("cholesterol") {
            CHOLESTEROL
        } else if lower.contains("blood pressure") || lower.contains("hypertension") {
            BLOOD_PRESSURE
        } else if lower.contains("diabetes") || lower.contains("glucose") || lower.contains("blood sugar") {
            GLUCOSE
        } else {
            GENERAL
        };
        let mut answer = format!("You asked: \"{}\"\n\n{}", question, body);
        if !safety::check_answer(&answer).is_empty() {
            answer.push_str("\n\n");
            answer.push_str(safety::REVIEW_DISCLAIMER);
        }
        answer
    }
}

/// Text after the last question marker, or the whole prompt when there is none.
fn extract_question(prompt: &str) -> &str {
    prompt
        .rfind(QUESTION_MARKER)
        .map(|i| &prompt[i + QUESTION_MARKER.len()..])
        .unwrap_or(prompt)
        .trim()
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn generate(
        &self,
        request: &ModelRequest,
        _deadline: Duration,
    ) -> Result<ModelResponse, BackendError> {
        let started = Instant::now();
        let answer = Self::compose(request.prompt());
        Ok(ModelResponse {
            answer,
            provenance: Provenance::Mock,
            latency: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_is_deterministic_and_references_question() {
        let a = MockBackend::compose("What should I do about a mild headache?");
        let b = MockBackend::compose("What should I do about a mild headache?");
        assert_eq!(a, b);
        assert!(a.contains("What should I do about a mild headache?"));
    }

    #[test]
    fn topic_comes_from_last_question_only() {
        let prompt = format!(
            "Previous conversation:\nuser: tell me about cholesterol\n\n{} Is my blood pressure fine?",
            QUESTION_MARKER
        );
        let a = MockBackend::compose(&prompt);
        assert!(a.contains("systolic"));
        assert!(!a.contains("waxy"));
        assert!(a.starts_with("You asked: \"Is my blood pressure fine?\""));
    }

    #[test]
    fn templates_pass_the_safety_check() {
        for q in ["cholesterol?", "glucose?", "hypertension?", "anything else?"] {
            let a = MockBackend::compose(q);
            assert!(!a.contains(safety::REVIEW_DISCLAIMER), "flagged: {}", q);
        }
    }

    #[test]
    fn flagged_question_echo_gets_disclaimer() {
        let a = MockBackend::compose("Should I stop taking my pills?");
        assert!(a.ends_with(safety::REVIEW_DISCLAIMER));
    }

    #[tokio::test]
    async fn generate_never_fails_and_tags_mock() {
        let req = ModelRequest::new("diabetes question", 128, 0.2);
        let res = MockBackend::new()
            .generate(&req, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(res.provenance, Provenance::Mock);
        assert!(res.answer.contains("glucose"));
    }
}
