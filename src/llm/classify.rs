//! Keyword classification of a conversation.

use super::types::{ChatMessage, Classification, Complexity, TaskType};

const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    ("construction", &["béton", "structure", "chantier", "plans", "permis", "estimation"]),
    ("finance", &["budget", "coût", "facture", "paiement", "marge"]),
    ("legal", &["contrat", "clause", "responsabilité", "conformité"]),
    ("technical", &["calcul", "ingénierie", "spécification", "norme"]),
];

const TASK_KEYWORDS: &[(TaskType, &[&str])] = &[
    (TaskType::Analysis, &["analyse", "évalue", "examine", "diagnostic"]),
    (TaskType::Coding, &["code", "script", "fonction", "programme"]),
    (TaskType::Summarization, &["résume", "synthèse", "récapitule"]),
    (TaskType::Translation, &["traduis", "translate"]),
    (TaskType::Extraction, &["extrais", "parse", "données"]),
];

/// First task family whose keywords appear in `text`.
pub fn detect_task_type(text: &str) -> Option<TaskType> {
    let lowered = text.to_lowercase();
    TASK_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lowered.contains(w)))
        .map(|(task, _)| *task)
}

fn detect_domain(lowered: &str) -> &'static str {
    DOMAIN_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lowered.contains(w)))
        .map(|(domain, _)| *domain)
        .unwrap_or("general")
}

pub fn classify(messages: &[ChatMessage], agent_level: Option<&str>) -> Classification {
    let text = messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let words = text.split_whitespace().count();

    let complexity = match agent_level {
        Some("L0" | "L1") => Complexity::Complex,
        _ if words > 500 => Complexity::Complex,
        Some("L2") => Complexity::Medium,
        _ if words > 200 => Complexity::Medium,
        _ => Complexity::Simple,
    };

    let lowered = text.to_lowercase();
    Classification {
        complexity,
        domain: detect_domain(&lowered),
        task_type: detect_task_type(&lowered),
        requires_reasoning: complexity == Complexity::Complex,
        estimated_tokens: words * 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::MessageRole;

    fn user(text: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::new(MessageRole::User, text)]
    }

    #[test]
    fn diagnostic_keywords_mean_analysis() {
        let c = classify(&user("Fais un diagnostic de la fissure"), None);
        assert_eq!(c.task_type, Some(TaskType::Analysis));

        let c = classify(&user("Analyse ce rapport SST"), None);
        assert_eq!(c.task_type, Some(TaskType::Analysis));
    }

    #[test]
    fn no_keywords_means_no_task_type() {
        assert_eq!(classify(&user("Bonjour"), None).task_type, None);
    }

    #[test]
    fn domain_first_match_wins() {
        let c = classify(&user("Le budget du béton"), None);
        assert_eq!(c.domain, "construction");
        assert_eq!(classify(&user("Salut"), None).domain, "general");
    }

    #[test]
    fn complexity_from_agent_level_and_length() {
        assert_eq!(classify(&user("court"), Some("L0")).complexity, Complexity::Complex);
        assert_eq!(classify(&user("court"), Some("L2")).complexity, Complexity::Medium);
        assert_eq!(classify(&user("court"), Some("L3")).complexity, Complexity::Simple);

        let long = "mot ".repeat(250);
        assert_eq!(classify(&user(&long), None).complexity, Complexity::Medium);
        let longer = "mot ".repeat(501);
        let c = classify(&user(&longer), Some("L3"));
        assert_eq!(c.complexity, Complexity::Complex);
        assert!(c.requires_reasoning);
        assert_eq!(c.estimated_tokens, 501 * 4);
    }
}
