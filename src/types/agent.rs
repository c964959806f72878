use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{AgentId, AgentPhase, MemoryId, RoomId};

pub const DEFAULT_START_ROOM: &str = "start_room";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub look: String,
    pub description: String,
    pub location: RoomId,
    pub phase: AgentPhase,
    pub is_running: bool,
    pub flags: AgentFlags,
    pub inventory: Vec<String>,
    pub memories_loaded: Vec<MemoryId>,
    pub perception: String,
    pub prompt: String,
    pub tokens: i64,
    pub level: i64,
    pub last_command_sent: Option<DateTime<Utc>>,
    pub last_retrieved: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>, location: impl Into<RoomId>) -> Self {
        let name = name.into();
        Self {
            id: AgentId::new_v4(),
            prompt: format!("This is the prompt for agent {}.", name),
            name,
            look: String::new(),
            description: String::new(),
            location: location.into(),
            phase: AgentPhase::Idle,
            is_running: true,
            flags: AgentFlags::default(),
            inventory: Vec::new(),
            memories_loaded: Vec::new(),
            perception: String::new(),
            tokens: 0,
            level: 0,
            last_command_sent: None,
            last_retrieved: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// An agent is active while its last command falls inside the trailing window.
    pub fn is_active(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_command_sent {
            Some(sent) => now - sent < window,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
    Waiting,
    Meditating,
}

impl FlagKind {
    pub fn as_str(&self) -> &str {
        match self {
            FlagKind::Waiting => "waiting",
            FlagKind::Meditating => "meditating",
        }
    }
}

/// Timed gates. Each gate holds an absolute deadline while set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meditating: Option<DateTime<Utc>>,
}

impl AgentFlags {
    pub fn get(&self, kind: FlagKind) -> Option<DateTime<Utc>> {
        match kind {
            FlagKind::Waiting => self.waiting,
            FlagKind::Meditating => self.meditating,
        }
    }

    pub fn set(&mut self, kind: FlagKind, deadline: DateTime<Utc>) {
        match kind {
            FlagKind::Waiting => self.waiting = Some(deadline),
            FlagKind::Meditating => self.meditating = Some(deadline),
        }
    }

    pub fn clear(&mut self, kind: FlagKind) {
        match kind {
            FlagKind::Waiting => self.waiting = None,
            FlagKind::Meditating => self.meditating = None,
        }
    }

    /// Returns the first gate whose deadline has not yet passed.
    pub fn blocking(&self, now: DateTime<Utc>) -> Option<(FlagKind, DateTime<Utc>)> {
        [FlagKind::Waiting, FlagKind::Meditating]
            .into_iter()
            .find_map(|kind| self.get(kind).filter(|d| *d > now).map(|d| (kind, d)))
    }

    /// Clears every gate whose deadline has passed and reports which ones.
    pub fn clear_expired(&mut self, now: DateTime<Utc>) -> Vec<FlagKind> {
        let mut cleared = Vec::new();
        for kind in [FlagKind::Waiting, FlagKind::Meditating] {
            if matches!(self.get(kind), Some(deadline) if deadline <= now) {
                self.clear(kind);
                cleared.push(kind);
            }
        }
        cleared
    }
}

/// A partial update of an agent record.
///
/// The command worker and the agent loop both mutate agents. Each side reads a
/// snapshot, mutates a copy, and writes back only the fields it changed, so the
/// two never overwrite each other's disjoint fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentPatch {
    pub look: Option<String>,
    pub description: Option<String>,
    pub location: Option<RoomId>,
    pub phase: Option<AgentPhase>,
    pub is_running: Option<bool>,
    pub waiting: Option<Option<DateTime<Utc>>>,
    pub meditating: Option<Option<DateTime<Utc>>>,
    pub inventory: Option<Vec<String>>,
    pub memories_loaded: Option<Vec<MemoryId>>,
    pub perception: Option<String>,
    pub prompt: Option<String>,
    pub tokens: Option<i64>,
    pub level: Option<i64>,
    pub last_command_sent: Option<Option<DateTime<Utc>>>,
    pub last_retrieved: Option<Option<DateTime<Utc>>>,
}

fn changed<T: PartialEq + Clone>(before: &T, after: &T) -> Option<T> {
    (before != after).then(|| after.clone())
}

impl AgentPatch {
    pub fn diff(before: &Agent, after: &Agent) -> Self {
        Self {
            look: changed(&before.look, &after.look),
            description: changed(&before.description, &after.description),
            location: changed(&before.location, &after.location),
            phase: changed(&before.phase, &after.phase),
            is_running: changed(&before.is_running, &after.is_running),
            waiting: changed(&before.flags.waiting, &after.flags.waiting),
            meditating: changed(&before.flags.meditating, &after.flags.meditating),
            inventory: changed(&before.inventory, &after.inventory),
            memories_loaded: changed(&before.memories_loaded, &after.memories_loaded),
            perception: changed(&before.perception, &after.perception),
            prompt: changed(&before.prompt, &after.prompt),
            tokens: changed(&before.tokens, &after.tokens),
            level: changed(&before.level, &after.level),
            last_command_sent: changed(&before.last_command_sent, &after.last_command_sent),
            last_retrieved: changed(&before.last_retrieved, &after.last_retrieved),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, agent: &mut Agent) {
        if let Some(v) = &self.look {
            agent.look = v.clone();
        }
        if let Some(v) = &self.description {
            agent.description = v.clone();
        }
        if let Some(v) = &self.location {
            agent.location = v.clone();
        }
        if let Some(v) = self.phase {
            agent.phase = v;
        }
        if let Some(v) = self.is_running {
            agent.is_running = v;
        }
        if let Some(v) = self.waiting {
            agent.flags.waiting = v;
        }
        if let Some(v) = self.meditating {
            agent.flags.meditating = v;
        }
        if let Some(v) = &self.inventory {
            agent.inventory = v.clone();
        }
        if let Some(v) = &self.memories_loaded {
            agent.memories_loaded = v.clone();
        }
        if let Some(v) = &self.perception {
            agent.perception = v.clone();
        }
        if let Some(v) = &self.prompt {
            agent.prompt = v.clone();
        }
        if let Some(v) = self.tokens {
            agent.tokens = v;
        }
        if let Some(v) = self.level {
            agent.level = v;
        }
        if let Some(v) = self.last_command_sent {
            agent.last_command_sent = v;
        }
        if let Some(v) = self.last_retrieved {
            agent.last_retrieved = v;
        }
    }
}
