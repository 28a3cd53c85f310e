use serde::{Deserialize, Serialize};

/// Per-generation token usage, raw from the provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Totals accumulated across every generation of one conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatedTokens {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub generation_count: u32,
}

impl AccumulatedTokens {
    pub fn accumulate(&mut self, usage: &TokenUsage) {
        self.total_input_tokens += u64::from(usage.input_tokens);
        self.total_output_tokens += u64::from(usage.output_tokens);
        self.generation_count += 1;
    }
}
