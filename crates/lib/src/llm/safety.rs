//! Safety guardrails for health answers: the system preamble sent with every prompt and a
//! phrase check that flags diagnosis, treatment or personal-advice wording in answers.

pub const SAFETY_SYSTEM_PROMPT: &str = "You are a medical report explanation assistant providing educational information only.

CRITICAL SAFETY RULES - YOU MUST FOLLOW THESE:
1. Do NOT provide medical advice
2. Do NOT make diagnoses
3. Do NOT suggest treatment

GUIDELINES:
- Explain medical terms and concepts in simple, educational language
- Describe what test results mean in general terms
- Encourage consulting healthcare providers for personalized guidance
- Always recommend professional medical consultation for any concerns
- Do NOT prescribe or suggest specific medications
- Do NOT give emergency instructions (except \"call emergency services\")";

/// Appended to mock answers that trip the phrase check.
pub const REVIEW_DISCLAIMER: &str =
    "[This response was flagged for safety review. Please consult your healthcare provider.]";

const DIAGNOSIS_PHRASES: &[&str] = &[
    "you have ",
    "you suffer from",
    "you are diabetic",
    "you are hypertensive",
    "diagnosis:",
    "diagnosed with",
    "definitely have",
];

const TREATMENT_PHRASES: &[&str] = &[
    "take this medication",
    "you should take",
    "prescribe",
    "start taking",
    "stop taking",
    "don't take",
    "switch to",
    "increase your dose",
];

const ADVICE_PHRASES: &[&str] = &[
    "follow this diet",
    "do this exercise",
    "avoid these foods",
    "sleep like this",
    "here's what you should do",
];

/// Category of a flagged phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Diagnosis,
    Treatment,
    PersonalAdvice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub phrase: &'static str,
}

/// Returns every flagged phrase found in `answer` (case-insensitive). Empty means safe.
pub fn check_answer(answer: &str) -> Vec<Violation> {
    let lower = answer.to_lowercase();
    let groups = [
        (ViolationKind::Diagnosis, DIAGNOSIS_PHRASES),
        (ViolationKind::Treatment, TREATMENT_PHRASES),
        (ViolationKind::PersonalAdvice, ADVICE_PHRASES),
    ];
    groups
        .iter()
        .flat_map(|(kind, phrases)| {
            phrases
                .iter()
                .filter(|p| lower.contains(*p))
                .map(move |p| Violation { kind: *kind, phrase: p })
        })
        .collect()
}

/// Prefix `prompt` with the safety preamble.
pub fn with_safety_preamble(prompt: &str) -> String {
    format!("{}\n\n{}", SAFETY_SYSTEM_PROMPT, prompt)
}
