//! Static model tables: rates, provider membership, and routing candidates.

use serde::Serialize;

use super::types::{Complexity, Model, Provider, TaskType};

/// USD per 1M tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rates {
    pub input: f64,
    pub output: f64,
}

use Model::*;

impl Model {
    pub fn rates(&self) -> Rates {
        let (input, output) = match self {
            ClaudeOpus => (15.0, 75.0),
            ClaudeSonnet => (3.0, 15.0),
            ClaudeHaiku => (0.25, 1.25),
            Gpt4o => (5.0, 15.0),
            Gpt4oMini => (0.15, 0.60),
            Gpt4Turbo => (10.0, 30.0),
            GeminiPro => (3.5, 10.5),
            GeminiFlash => (0.35, 1.05),
            Llama3 | Mistral | CodeLlama => (0.0, 0.0),
        };
        Rates { input, output }
    }

    pub fn provider(&self) -> Provider {
        match self {
            ClaudeOpus | ClaudeSonnet | ClaudeHaiku => Provider::Claude,
            Gpt4o | Gpt4oMini | Gpt4Turbo => Provider::Gpt,
            GeminiPro | GeminiFlash => Provider::Gemini,
            Llama3 | Mistral | CodeLlama => Provider::Ollama,
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let rates = self.rates();
        (input_tokens as f64 * rates.input + output_tokens as f64 * rates.output) / 1_000_000.0
    }
}

impl Provider {
    /// The first entry is the model used when falling back to this provider.
    pub fn models(&self) -> &'static [Model] {
        match self {
            Provider::Claude => &[ClaudeOpus, ClaudeSonnet, ClaudeHaiku],
            Provider::Gpt => &[Gpt4o, Gpt4oMini, Gpt4Turbo],
            Provider::Gemini => &[GeminiPro, GeminiFlash],
            Provider::Ollama => &[Llama3, Mistral, CodeLlama],
        }
    }

    pub fn fallback_model(&self) -> Model {
        self.models()[0]
    }
}

pub const FALLBACK_ORDER: &[Provider] = &[Provider::Claude, Provider::Gpt, Provider::Gemini, Provider::Ollama];

pub const QUALITY_RANK: &[Model] = &[ClaudeOpus, Gpt4o, ClaudeSonnet];

pub const LATENCY_RANK: &[Model] = &[ClaudeHaiku, GeminiFlash, Gpt4oMini];

pub fn task_candidates(task: TaskType) -> &'static [Model] {
    match task {
        TaskType::Analysis => &[ClaudeOpus, Gpt4o],
        TaskType::Coding => &[ClaudeSonnet, Gpt4o, CodeLlama],
        TaskType::Chat => &[ClaudeHaiku, Gpt4oMini, GeminiFlash],
        TaskType::Summarization => &[ClaudeSonnet, GeminiPro],
        TaskType::Translation => &[GeminiPro, ClaudeSonnet],
        TaskType::Extraction => &[ClaudeHaiku, GeminiFlash],
    }
}

pub fn complexity_candidates(complexity: Complexity) -> &'static [Model] {
    match complexity {
        Complexity::Complex => &[ClaudeOpus, Gpt4Turbo, GeminiPro],
        Complexity::Medium => &[ClaudeSonnet, Gpt4o, GeminiPro],
        Complexity::Simple => &[ClaudeHaiku, Gpt4oMini, GeminiFlash],
    }
}

/// Position in a rank table; unranked models sort after ranked ones.
pub fn rank(table: &[Model], model: Model) -> usize {
    table.iter().position(|m| *m == model).unwrap_or(usize::MAX)
}

/// One row of `GET /llm/models`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: Model,
    pub provider: Provider,
    pub input_per_million: f64,
    pub output_per_million: f64,
}

pub fn catalog() -> Vec<ModelInfo> {
    Model::ALL
        .iter()
        .map(|model| {
            let rates = model.rates();
            ModelInfo {
                id: *model,
                provider: model.provider(),
                input_per_million: rates.input,
                output_per_million: rates.output,
            }
        })
        .collect()
}
