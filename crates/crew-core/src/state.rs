use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::ConversationId;
use crate::messages::{ActionResult, AgentMessage, Message};
use crate::tokens::AccumulatedTokens;

/// Named artifact produced by one of the specialist agents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSlot {
    Research,
    Architecture,
    Code,
    Review,
    Tests,
}

impl ArtifactSlot {
    pub const ALL: [ArtifactSlot; 5] = [
        ArtifactSlot::Research,
        ArtifactSlot::Architecture,
        ArtifactSlot::Code,
        ArtifactSlot::Review,
        ArtifactSlot::Tests,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Architecture => "architecture",
            Self::Code => "code",
            Self::Review => "review",
            Self::Tests => "tests",
        }
    }
}

impl fmt::Display for ArtifactSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| format!("unknown artifact slot: {s}"))
    }
}

/// The five artifact slots. Last writer wins; nothing clears a slot implicitly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<String>,
}

impl Artifacts {
    pub fn get(&self, slot: ArtifactSlot) -> Option<&str> {
        match slot {
            ArtifactSlot::Research => self.research.as_deref(),
            ArtifactSlot::Architecture => self.architecture.as_deref(),
            ArtifactSlot::Code => self.code.as_deref(),
            ArtifactSlot::Review => self.review.as_deref(),
            ArtifactSlot::Tests => self.tests.as_deref(),
        }
    }

    pub fn set(&mut self, slot: ArtifactSlot, value: String) {
        let target = match slot {
            ArtifactSlot::Research => &mut self.research,
            ArtifactSlot::Architecture => &mut self.architecture,
            ArtifactSlot::Code => &mut self.code,
            ArtifactSlot::Review => &mut self.review,
            ArtifactSlot::Tests => &mut self.tests,
        };
        *target = Some(value);
    }

    /// Filled slots in declaration order.
    pub fn filled(&self) -> Vec<(ArtifactSlot, &str)> {
        ArtifactSlot::ALL
            .into_iter()
            .filter_map(|slot| self.get(slot).map(|v| (slot, v)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.filled().is_empty()
    }
}

/// History plus artifacts for one conversation.
///
/// The message list is append-only: there is no API to remove or reorder
/// entries. A state is owned by exactly one loop for the duration of one
/// invocation, then persisted as a checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    conversation_id: ConversationId,
    messages: Vec<Message>,
    #[serde(default)]
    artifacts: Artifacts,
    #[serde(default)]
    turn_count: u32,
    #[serde(default)]
    usage: AccumulatedTokens,
}

impl OrchestrationState {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            artifacts: Artifacts::default(),
            turn_count: 0,
            usage: AccumulatedTokens::default(),
        }
    }

    /// A fresh state seeded with a single user message.
    pub fn seeded(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        let mut state = Self::new(conversation_id);
        state.append(Message::user_text(text));
        state
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn usage(&self) -> &AccumulatedTokens {
        &self.usage
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append a generation's message, counting the turn and its usage.
    pub fn append_generation(&mut self, message: AgentMessage) {
        self.turn_count += 1;
        if let Some(ref usage) = message.usage {
            self.usage.accumulate(usage);
        }
        self.messages.push(Message::Agent(message));
    }

    pub fn append_result(&mut self, result: ActionResult) {
        self.messages.push(Message::ActionResult(result));
    }

    pub fn set_artifact(&mut self, slot: ArtifactSlot, value: String) {
        self.artifacts.set(slot, value);
    }

}
