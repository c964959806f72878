//! Per-agent phase state machine.
//!
//! `idle` is the initial phase. An agent thinks while an LLM request is in
//! flight and acts for the tick in which a response is delivered.

use chrono::{DateTime, Utc};

use crate::types::{Agent, AgentPhase, FlagKind, LlmRequest, LlmRequestId, LlmStatus};

/// Why an agent's tick does no perception or LLM work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Paused,
    Flagged(FlagKind, DateTime<Utc>),
}

/// The LLM step a tick takes once perceptions are drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmStep {
    /// A completed response is waiting to be delivered.
    Deliver(LlmRequestId),
    /// A request is pending or thinking.
    Await(LlmRequestId),
    /// The latest request failed and needs an operator to re-arm it.
    Blocked(LlmRequestId),
    /// Nothing outstanding: submit a new request.
    Submit,
}

impl LlmStep {
    /// Phase the agent ends the tick in.
    pub fn phase(&self) -> AgentPhase {
        match self {
            LlmStep::Deliver(_) => AgentPhase::Acting,
            LlmStep::Await(_) | LlmStep::Blocked(_) | LlmStep::Submit => AgentPhase::Thinking,
        }
    }
}

pub struct AgentStateMachine;

impl AgentStateMachine {
    /// `Paused` wins over flags. Expired flags must be cleared beforehand.
    pub fn gate(agent: &Agent, now: DateTime<Utc>) -> Option<Gate> {
        if !agent.is_running {
            return Some(Gate::Paused);
        }
        agent
            .flags
            .blocking(now)
            .map(|(kind, until)| Gate::Flagged(kind, until))
    }

    /// Chooses the next step from the agent's requests, newest first.
    pub fn llm_step(requests: &[LlmRequest]) -> LlmStep {
        if let Some(done) = requests
            .iter()
            .rev()
            .find(|r| r.status == LlmStatus::Completed)
        {
            return LlmStep::Deliver(done.id);
        }
        if let Some(open) = requests.iter().find(|r| r.status.is_outstanding()) {
            return LlmStep::Await(open.id);
        }
        match requests.first() {
            Some(latest) if latest.status == LlmStatus::Failed => LlmStep::Blocked(latest.id),
            _ => LlmStep::Submit,
        }
    }
}
