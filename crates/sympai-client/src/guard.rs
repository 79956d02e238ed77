//! Topic guard — keyword predicate restricting dispatch to symptom queries.

/// Vocabulary of in-domain terms. Matching is case-insensitive substring.
pub const SYMPTOM_KEYWORDS: &[&str] = &[
    "fever",
    "cough",
    "pain",
    "headache",
    "nausea",
    "fatigue",
    "dizziness",
    "sore throat",
    "vomiting",
    "diarrhea",
    "chills",
    "rash",
    "infection",
    "symptom",
    "swelling",
    "cramps",
    "bleeding",
    "congestion",
    "shortness of breath",
];

/// Advisory shown in place of a reply when the guard declines an input.
pub const OFF_TOPIC_ADVISORY: &str =
    "⚠️ Please ask a question related to medical symptoms only.";

/// True when the input mentions at least one symptom keyword.
pub fn is_symptom_related(text: &str) -> bool {
    let lower = text.to_lowercase();
    SYMPTOM_KEYWORDS.iter().any(|kw| lower.contains(kw))
}
