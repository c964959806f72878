use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::error::DungeonError;
use crate::protocol::DirectiveKey;
use crate::storage::traits::Storage;
use crate::types::{
    Agent, AgentFlags, AgentId, AgentPatch, ApiCredential, CommandEntry, CommandId, CommandStatus,
    LlmRequest, LlmRequestId, LlmStatus, Memory, MemoryId, PerceptionEntry, PerceptionId,
};

const AGENT_COLUMNS: &str = "id, name, look, description, location, phase, is_running, \
    waiting_until, meditating_until, inventory, memories_loaded, perception, prompt, tokens, \
    level, last_command_sent, last_retrieved, created_at";
const COMMAND_COLUMNS: &str = "id, agent_id, command, status, output, created_at";
const PERCEPTION_COLUMNS: &str =
    "id, agent_id, source_agent_id, kind, command_id, text, delivered, created_at";
const LLM_COLUMNS: &str = "id, agent_id, prompt, status, response, created_at";
const CREDENTIAL_COLUMNS: &str =
    "id, key, is_active, usage_count, last_used, description, parameters";

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/V001__initial_schema.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn agent_from_row(r: &PgRow) -> Result<Agent> {
    let phase: String = r.try_get("phase")?;
    Ok(Agent {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        look: r.try_get("look")?,
        description: r.try_get("description")?,
        location: r.try_get("location")?,
        phase: phase.parse()?,
        is_running: r.try_get("is_running")?,
        flags: AgentFlags {
            waiting: r.try_get("waiting_until")?,
            meditating: r.try_get("meditating_until")?,
        },
        inventory: serde_json::from_value(r.try_get("inventory")?)?,
        memories_loaded: serde_json::from_value(r.try_get("memories_loaded")?)?,
        perception: r.try_get("perception")?,
        prompt: r.try_get("prompt")?,
        tokens: r.try_get("tokens")?,
        level: r.try_get("level")?,
        last_command_sent: r.try_get("last_command_sent")?,
        last_retrieved: r.try_get("last_retrieved")?,
        created_at: r.try_get("created_at")?,
    })
}

fn command_from_row(r: &PgRow) -> Result<CommandEntry> {
    let status: String = r.try_get("status")?;
    Ok(CommandEntry {
        id: r.try_get("id")?,
        agent_id: r.try_get("agent_id")?,
        command: r.try_get("command")?,
        status: status.parse()?,
        output: r.try_get("output")?,
        created_at: r.try_get("created_at")?,
    })
}

fn perception_from_row(r: &PgRow) -> Result<PerceptionEntry> {
    let kind: String = r.try_get("kind")?;
    Ok(PerceptionEntry {
        id: r.try_get("id")?,
        agent_id: r.try_get("agent_id")?,
        source_agent_id: r.try_get("source_agent_id")?,
        kind: kind.parse()?,
        command_id: r.try_get("command_id")?,
        text: r.try_get("text")?,
        delivered: r.try_get("delivered")?,
        created_at: r.try_get("created_at")?,
    })
}

fn llm_request_from_row(r: &PgRow) -> Result<LlmRequest> {
    let status: String = r.try_get("status")?;
    Ok(LlmRequest {
        id: r.try_get("id")?,
        agent_id: r.try_get("agent_id")?,
        prompt: r.try_get("prompt")?,
        status: status.parse()?,
        response: r.try_get("response")?,
        created_at: r.try_get("created_at")?,
    })
}

fn memory_from_row(r: &PgRow) -> Result<Memory> {
    Ok(Memory {
        id: r.try_get("id")?,
        agent_id: r.try_get("agent_id")?,
        key: r.try_get("key")?,
        value: r.try_get("value")?,
    })
}

fn credential_from_row(r: &PgRow) -> Result<ApiCredential> {
    Ok(ApiCredential {
        id: r.try_get("id")?,
        key: r.try_get("key")?,
        is_active: r.try_get("is_active")?,
        usage_count: r.try_get("usage_count")?,
        last_used: r.try_get("last_used")?,
        description: r.try_get("description")?,
        parameters: r.try_get("parameters")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn create_agent(&self, agent: &Agent) -> Result<()> {
        let result = sqlx::query(&format!(
            "INSERT INTO agents ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            AGENT_COLUMNS
        ))
        .bind(agent.id)
        .bind(&agent.name)
        .bind(&agent.look)
        .bind(&agent.description)
        .bind(&agent.location)
        .bind(agent.phase.as_str())
        .bind(agent.is_running)
        .bind(agent.flags.waiting)
        .bind(agent.flags.meditating)
        .bind(serde_json::to_value(&agent.inventory)?)
        .bind(serde_json::to_value(&agent.memories_loaded)?)
        .bind(&agent.perception)
        .bind(&agent.prompt)
        .bind(agent.tokens)
        .bind(agent.level)
        .bind(agent.last_command_sent)
        .bind(agent.last_retrieved)
        .bind(agent.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(DungeonError::AgentExists(agent.name.clone()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE id = $1", AGENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(agent_from_row).transpose()
    }

    async fn get_agent_by_name(&self, name: &str) -> Result<Option<Agent>> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE name = $1", AGENT_COLUMNS))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(agent_from_row).transpose()
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM agents ORDER BY created_at",
            AGENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(agent_from_row).collect()
    }

    async fn agents_in_room(&self, room_id: &str) -> Result<Vec<Agent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM agents WHERE location = $1 ORDER BY created_at",
            AGENT_COLUMNS
        ))
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(agent_from_row).collect()
    }

    async fn update_agent(&self, agent: &Agent) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE agents
            SET name = $2, look = $3, description = $4, location = $5, phase = $6,
                is_running = $7, waiting_until = $8, meditating_until = $9, inventory = $10,
                memories_loaded = $11, perception = $12, prompt = $13, tokens = $14, level = $15,
                last_command_sent = $16, last_retrieved = $17
            WHERE id = $1
            "#,
        )
        .bind(agent.id)
        .bind(&agent.name)
        .bind(&agent.look)
        .bind(&agent.description)
        .bind(&agent.location)
        .bind(agent.phase.as_str())
        .bind(agent.is_running)
        .bind(agent.flags.waiting)
        .bind(agent.flags.meditating)
        .bind(serde_json::to_value(&agent.inventory)?)
        .bind(serde_json::to_value(&agent.memories_loaded)?)
        .bind(&agent.perception)
        .bind(&agent.prompt)
        .bind(agent.tokens)
        .bind(agent.level)
        .bind(agent.last_command_sent)
        .bind(agent.last_retrieved)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn patch_agent(&self, id: AgentId, patch: &AgentPatch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(self.get_agent(id).await?.is_some());
        }

        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE agents SET ");
        let mut set = query.separated(", ");
        if let Some(v) = &patch.look {
            set.push("look = ").push_bind_unseparated(v.clone());
        }
        if let Some(v) = &patch.description {
            set.push("description = ").push_bind_unseparated(v.clone());
        }
        if let Some(v) = &patch.location {
            set.push("location = ").push_bind_unseparated(v.clone());
        }
        if let Some(v) = patch.phase {
            set.push("phase = ").push_bind_unseparated(v.as_str().to_string());
        }
        if let Some(v) = patch.is_running {
            set.push("is_running = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.waiting {
            set.push("waiting_until = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.meditating {
            set.push("meditating_until = ").push_bind_unseparated(v);
        }
        if let Some(v) = &patch.inventory {
            set.push("inventory = ").push_bind_unseparated(serde_json::to_value(v)?);
        }
        if let Some(v) = &patch.memories_loaded {
            set.push("memories_loaded = ").push_bind_unseparated(serde_json::to_value(v)?);
        }
        if let Some(v) = &patch.perception {
            set.push("perception = ").push_bind_unseparated(v.clone());
        }
        if let Some(v) = &patch.prompt {
            set.push("prompt = ").push_bind_unseparated(v.clone());
        }
        if let Some(v) = patch.tokens {
            set.push("tokens = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.level {
            set.push("level = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.last_command_sent {
            set.push("last_command_sent = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.last_retrieved {
            set.push("last_retrieved = ").push_bind_unseparated(v);
        }
        query.push(" WHERE id = ").push_bind(id);

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_command(&self, entry: &CommandEntry) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO commands ({}) VALUES ($1, $2, $3, $4, $5, $6)",
            COMMAND_COLUMNS
        ))
        .bind(entry.id)
        .bind(entry.agent_id)
        .bind(&entry.command)
        .bind(entry.status.as_str())
        .bind(&entry.output)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_command(&self, id: CommandId) -> Result<Option<CommandEntry>> {
        let row = sqlx::query(&format!("SELECT {} FROM commands WHERE id = $1", COMMAND_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(command_from_row).transpose()
    }

    async fn update_command(&self, entry: &CommandEntry) -> Result<()> {
        sqlx::query("UPDATE commands SET command = $2, status = $3, output = $4 WHERE id = $1")
            .bind(entry.id)
            .bind(&entry.command)
            .bind(entry.status.as_str())
            .bind(&entry.output)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn commands_with_status(&self, status: CommandStatus) -> Result<Vec<CommandEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM commands WHERE status = $1 ORDER BY created_at",
            COMMAND_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(command_from_row).collect()
    }

    async fn claim_command(&self, id: CommandId) -> Result<Option<CommandEntry>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE commands SET status = 'processing'
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            COMMAND_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(command_from_row).transpose()
    }

    async fn recent_commands(&self, agent_id: AgentId, limit: usize) -> Result<Vec<CommandEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM commands WHERE agent_id = $1 ORDER BY created_at DESC LIMIT $2",
            COMMAND_COLUMNS
        ))
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(command_from_row).collect()
    }

    async fn delete_agent_commands(&self, agent_id: AgentId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM commands WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn create_perception(&self, entry: &PerceptionEntry) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO perceptions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            PERCEPTION_COLUMNS
        ))
        .bind(entry.id)
        .bind(entry.agent_id)
        .bind(entry.source_agent_id)
        .bind(entry.kind.as_str())
        .bind(entry.command_id)
        .bind(&entry.text)
        .bind(entry.delivered)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn undelivered_perceptions(&self, agent_id: AgentId) -> Result<Vec<PerceptionEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM perceptions WHERE agent_id = $1 AND NOT delivered ORDER BY created_at",
            PERCEPTION_COLUMNS
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(perception_from_row).collect()
    }

    async fn mark_perception_delivered(&self, id: PerceptionId, text: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE perceptions SET delivered = TRUE, text = $2 WHERE id = $1 AND NOT delivered",
        )
        .bind(id)
        .bind(text)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn recent_perceptions(
        &self,
        agent_id: Option<AgentId>,
        limit: usize,
    ) -> Result<Vec<PerceptionEntry>> {
        let rows = match agent_id {
            Some(agent_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM perceptions WHERE agent_id = $1 \
                     ORDER BY created_at DESC LIMIT $2",
                    PERCEPTION_COLUMNS
                ))
                .bind(agent_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM perceptions ORDER BY created_at DESC LIMIT $1",
                    PERCEPTION_COLUMNS
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(perception_from_row).collect()
    }

    async fn delete_agent_perceptions(&self, agent_id: AgentId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM perceptions WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn create_llm_request(&self, request: &LlmRequest) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO llm_requests ({}) VALUES ($1, $2, $3, $4, $5, $6)",
            LLM_COLUMNS
        ))
        .bind(request.id)
        .bind(request.agent_id)
        .bind(&request.prompt)
        .bind(request.status.as_str())
        .bind(&request.response)
        .bind(request.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_llm_request(&self, id: LlmRequestId) -> Result<Option<LlmRequest>> {
        let row = sqlx::query(&format!("SELECT {} FROM llm_requests WHERE id = $1", LLM_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(llm_request_from_row).transpose()
    }

    async fn update_llm_request(&self, request: &LlmRequest) -> Result<()> {
        sqlx::query("UPDATE llm_requests SET prompt = $2, status = $3, response = $4 WHERE id = $1")
            .bind(request.id)
            .bind(&request.prompt)
            .bind(request.status.as_str())
            .bind(&request.response)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn transition_llm_request(
        &self,
        id: LlmRequestId,
        from: LlmStatus,
        to: LlmStatus,
        response: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE llm_requests
            SET status = $3, response = COALESCE($4, response)
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(response)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn llm_requests_with_status(&self, status: LlmStatus) -> Result<Vec<LlmRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM llm_requests WHERE status = $1 ORDER BY created_at",
            LLM_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(llm_request_from_row).collect()
    }

    async fn recent_llm_requests(
        &self,
        agent_id: AgentId,
        limit: usize,
    ) -> Result<Vec<LlmRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM llm_requests WHERE agent_id = $1 ORDER BY created_at DESC LIMIT $2",
            LLM_COLUMNS
        ))
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(llm_request_from_row).collect()
    }

    async fn delete_agent_llm_requests(&self, agent_id: AgentId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM llm_requests WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn create_memory(&self, memory: &Memory) -> Result<()> {
        sqlx::query("INSERT INTO memories (id, agent_id, key, value) VALUES ($1, $2, $3, $4)")
            .bind(memory.id)
            .bind(memory.agent_id)
            .bind(&memory.key)
            .bind(&memory.value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_memory(&self, id: MemoryId) -> Result<Option<Memory>> {
        let row = sqlx::query("SELECT id, agent_id, key, value FROM memories WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(memory_from_row).transpose()
    }

    async fn get_memory_by_key(&self, agent_id: AgentId, key: &str) -> Result<Option<Memory>> {
        let row = sqlx::query(
            "SELECT id, agent_id, key, value FROM memories WHERE agent_id = $1 AND key = $2",
        )
        .bind(agent_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(memory_from_row).transpose()
    }

    async fn update_memory(&self, memory: &Memory) -> Result<()> {
        sqlx::query("UPDATE memories SET key = $2, value = $3 WHERE id = $1")
            .bind(memory.id)
            .bind(&memory.key)
            .bind(&memory.value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_memory(&self, id: MemoryId) -> Result<()> {
        sqlx::query("DELETE FROM memories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_memories(&self, agent_id: AgentId) -> Result<Vec<Memory>> {
        let rows = sqlx::query(
            "SELECT id, agent_id, key, value FROM memories WHERE agent_id = $1 ORDER BY key",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(memory_from_row).collect()
    }

    async fn add_credential(&self, credential: &ApiCredential) -> Result<()> {
        // A key already on file is left as it is.
        sqlx::query(&format!(
            r#"
            INSERT INTO api_credentials ({})
            SELECT $1, $2, $3, $4, $5, $6, $7
            WHERE NOT EXISTS (SELECT 1 FROM api_credentials WHERE key = $2)
            "#,
            CREDENTIAL_COLUMNS
        ))
        .bind(credential.id)
        .bind(&credential.key)
        .bind(credential.is_active)
        .bind(credential.usage_count)
        .bind(credential.last_used)
        .bind(&credential.description)
        .bind(&credential.parameters)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn acquire_credential(&self) -> Result<Option<ApiCredential>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE api_credentials
            SET usage_count = usage_count + 1, last_used = NOW()
            WHERE id = (
                SELECT id FROM api_credentials
                WHERE is_active
                ORDER BY last_used NULLS FIRST
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            CREDENTIAL_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn record_directive(&self, key: &DirectiveKey) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO directive_ledger (source, source_id, match_index)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(key.source.as_str())
        .bind(key.source_id)
        .bind(key.index as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
