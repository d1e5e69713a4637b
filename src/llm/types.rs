use serde::{Deserialize, Serialize};

string_enum! {
    pub enum Provider {
        Claude => "claude",
        Gpt => "gpt",
        Gemini => "gemini",
        Ollama => "ollama",
    }
}

string_enum! {
    pub enum Model {
        ClaudeOpus => "claude-opus-4-20250514",
        ClaudeSonnet => "claude-sonnet-4-5-20250514",
        ClaudeHaiku => "claude-haiku-4-5-20250514",
        Gpt4o => "gpt-4o",
        Gpt4oMini => "gpt-4o-mini",
        Gpt4Turbo => "gpt-4-turbo",
        GeminiPro => "gemini-1.5-pro",
        GeminiFlash => "gemini-1.5-flash",
        Llama3 => "llama3:70b",
        Mistral => "mistral:latest",
        CodeLlama => "codellama:34b",
    }
}

string_enum! {
    pub enum Strategy {
        CostOptimized => "cost_optimized",
        QualityOptimized => "quality_optimized",
        LatencyOptimized => "latency_optimized",
        Balanced => "balanced",
        Fallback => "fallback",
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Balanced
    }
}

string_enum! {
    pub enum TaskType {
        Analysis => "analysis",
        Coding => "coding",
        Chat => "chat",
        Summarization => "summarization",
        Translation => "translation",
        Extraction => "extraction",
    }
}

string_enum! {
    pub enum Complexity {
        Simple => "simple",
        Medium => "medium",
        Complex => "complex",
    }
}

string_enum! {
    pub enum MessageRole {
        System => "system",
        User => "user",
        Assistant => "assistant",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Routing input, also the body of `POST /llm/complete`.
///
/// `provider` and `model` stay strings so unknown values are rejected by
/// the router as a bad request rather than by the JSON decoder.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub strategy: Strategy,
    /// Ceiling in USD per 1K output tokens.
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub agent_level: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// What a provider client receives.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// What a provider client returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmResponse {
    pub content: String,
    pub provider: Provider,
    pub model: Model,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub latency_ms: u64,
    pub finish_reason: Option<String>,
    pub fallback_used: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Classification {
    pub complexity: Complexity,
    pub domain: &'static str,
    pub task_type: Option<TaskType>,
    pub requires_reasoning: bool,
    pub estimated_tokens: usize,
}

/// Running per `provider:model` tally.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UsageStats {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
    pub avg_latency_ms: f64,
}

impl UsageStats {
    pub fn record(&mut self, input_tokens: u64, output_tokens: u64, cost: f64, latency_ms: f64) {
        self.requests += 1;
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.total_cost += cost;
        let n = self.requests as f64;
        self.avg_latency_ms = (self.avg_latency_ms * (n - 1.0) + latency_ms) / n;
    }
}
