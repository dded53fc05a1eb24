//! Per-turn agent session
//!
//! Lives for exactly one conversation turn: it accumulates the context the
//! composer assembles for that turn's answer. Cross-turn memory is owned by
//! the front end, not this core.

/// One conversation turn's working state
#[derive(Debug, Clone, Default)]
pub struct AgentSession {
    pub session_id: String,
    pub accumulated_context: String,
}

impl AgentSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            accumulated_context: String::new(),
        }
    }

    /// Append one labelled evidence section to the turn's context
    pub fn accumulate(&mut self, label: &str, text: &str) {
        self.accumulated_context.push_str("## ");
        self.accumulated_context.push_str(label);
        self.accumulated_context.push('\n');
        self.accumulated_context.push_str(text);
        self.accumulated_context.push_str("\n\n");
    }

    pub fn is_empty(&self) -> bool {
        self.accumulated_context.is_empty()
    }
}
