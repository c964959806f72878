//! End-to-end tests for the agent pipeline:
//! - LLM response directives reach the command queue exactly once
//! - command results flow back as perceptions into the next prompt
//! - one outstanding LLM request per agent
//! - perception buffer stays within its limit

use std::sync::Arc;

use mad_dungeon::commands::CommandDispatcher;
use mad_dungeon::engine::{AgentLoop, CommandWorker, Gate, LlmOrchestrator, TickOutcome};
use mad_dungeon::protocol::{DirectiveProcessor, DirectiveSource};
use mad_dungeon::providers::{MockLLMProvider, StaticProviderFactory};
use mad_dungeon::storage::{InMemoryStore, Storage};
use mad_dungeon::{
    Agent, AgentPhase, ApiCredential, CommandStatus, EngineSettings, LlmStatus, PerceptionEntry,
    WorldModel,
};

const WORLD: &str = r#"{
    "rooms": {
        "start_room": {
            "title": "The Gatehouse",
            "description": "A cold stone gatehouse.",
            "exits": {"north": "great_hall"}
        },
        "great_hall": {
            "title": "The Great Hall",
            "description": "Long tables rot beneath a vaulted ceiling.",
            "exits": {"south": "start_room"}
        }
    },
    "objects": {},
    "placements": {}
}"#;

struct Dungeon {
    store: Arc<InMemoryStore>,
    worker: CommandWorker,
    orchestrator: Arc<LlmOrchestrator>,
    agent_loop: AgentLoop,
    provider: Arc<MockLLMProvider>,
}

fn dungeon(provider: MockLLMProvider, settings: EngineSettings) -> Dungeon {
    let store = Arc::new(InMemoryStore::new());
    let world = Arc::new(WorldModel::from_json(WORLD).unwrap());
    let provider = Arc::new(provider);

    let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), world, settings.clone()));
    let worker = CommandWorker::new(store.clone(), dispatcher, settings.clone());
    let orchestrator = Arc::new(LlmOrchestrator::new(
        store.clone(),
        Arc::new(StaticProviderFactory::new(provider.clone())),
        settings.llm_timeout,
    ));
    let agent_loop = AgentLoop::new(store.clone(), orchestrator.clone(), settings);

    Dungeon {
        store,
        worker,
        orchestrator,
        agent_loop,
        provider,
    }
}

async fn spawn_agent(store: &InMemoryStore, name: &str) -> Agent {
    let agent =
        Agent::new(name, "start_room").with_prompt(format!("You are {}, an explorer.", name));
    store.create_agent(&agent).await.unwrap();
    agent
}

#[tokio::test]
async fn test_llm_directive_round_trip() {
    let d = dungeon(
        MockLLMProvider::with_response("I should look around. [command|look]".to_string()),
        EngineSettings::default(),
    );
    d.store.add_credential(&ApiCredential::new("test-key")).await.unwrap();
    let ada = spawn_agent(&d.store, "Ada").await;

    // First tick submits a prompt built from the persona.
    let first = match d.agent_loop.tick_agent(ada.id).await.unwrap() {
        TickOutcome::Submitted(id) => id,
        other => panic!("expected a submitted request, got {:?}", other),
    };
    let request = d.store.get_llm_request(first).await.unwrap().unwrap();
    assert!(request.prompt.starts_with("You are Ada, an explorer."));
    assert_eq!(
        d.store.get_agent(ada.id).await.unwrap().unwrap().phase,
        AgentPhase::Thinking
    );

    d.orchestrator.dispatch_pending().await.unwrap();
    d.orchestrator.wait_idle().await;
    assert_eq!(d.provider.calls(), 1);

    // Delivery consumes the directive and records the rewritten response.
    assert_eq!(
        d.agent_loop.tick_agent(ada.id).await.unwrap(),
        TickOutcome::Delivered(first)
    );
    let delivered = d.store.get_llm_request(first).await.unwrap().unwrap();
    assert_eq!(delivered.status, LlmStatus::Delivered);
    assert_eq!(
        delivered.response.as_deref(),
        Some("I should look around. processed_look")
    );
    let queued = d.store.commands_for(ada.id).unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].command, "look");

    // The worker runs it and reports back.
    assert_eq!(d.worker.drain().await.unwrap(), 1);
    let done = d.store.get_command(queued[0].id).await.unwrap().unwrap();
    assert_eq!(done.status, CommandStatus::Completed);

    // The next tick drains the result into the buffer and the next prompt.
    let second = match d.agent_loop.tick_agent(ada.id).await.unwrap() {
        TickOutcome::Submitted(id) => id,
        other => panic!("expected a submitted request, got {:?}", other),
    };
    let agent = d.store.get_agent(ada.id).await.unwrap().unwrap();
    assert!(agent.perception.contains("LLM: I should look around. processed_look"));
    assert!(agent.perception.contains("MAD: > look\nThe Gatehouse"));

    let next = d.store.get_llm_request(second).await.unwrap().unwrap();
    assert!(next.prompt.contains("Agent Perception History:"));
    assert!(next.prompt.contains("MAD: > look\nThe Gatehouse"));

    // Nothing in the delivered history is issued again.
    assert_eq!(d.store.commands_for(ada.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_single_outstanding_request_per_agent() {
    let d = dungeon(MockLLMProvider::new(), EngineSettings::default());
    let bo = spawn_agent(&d.store, "Bo").await;

    assert!(matches!(
        d.agent_loop.tick_agent(bo.id).await.unwrap(),
        TickOutcome::Submitted(_)
    ));
    for _ in 0..3 {
        assert!(matches!(
            d.agent_loop.tick_agent(bo.id).await.unwrap(),
            TickOutcome::Awaiting(_)
        ));
    }
    assert_eq!(d.store.llm_requests_for(bo.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_request_blocks_until_rearmed() {
    let d = dungeon(MockLLMProvider::failing("quota exhausted"), EngineSettings::default());
    d.store.add_credential(&ApiCredential::new("test-key")).await.unwrap();
    let cy = spawn_agent(&d.store, "Cy").await;

    d.agent_loop.tick_agent(cy.id).await.unwrap();
    d.orchestrator.dispatch_pending().await.unwrap();
    d.orchestrator.wait_idle().await;

    for _ in 0..2 {
        assert!(matches!(
            d.agent_loop.tick_agent(cy.id).await.unwrap(),
            TickOutcome::Blocked(_)
        ));
    }
    let requests = d.store.llm_requests_for(cy.id).unwrap();
    assert_eq!(requests.len(), 1);

    // An operator answer unblocks the agent.
    let mut request = requests[0].clone();
    request.status = LlmStatus::Completed;
    request.response = Some("[command|ping]".to_string());
    d.store.update_llm_request(&request).await.unwrap();

    assert_eq!(
        d.agent_loop.tick_agent(cy.id).await.unwrap(),
        TickOutcome::Delivered(request.id)
    );
    assert_eq!(d.store.commands_for(cy.id).unwrap()[0].command, "ping");
}

#[tokio::test]
async fn test_replayed_text_enqueues_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let dee = spawn_agent(&store, "Dee").await;
    let processor = DirectiveProcessor::new(store.clone());
    let source = uuid::Uuid::new_v4();
    let text = "[command|go north] then [command|say hello there]";

    let first = processor
        .process(dee.id, DirectiveSource::LlmResponse, source, text)
        .await
        .unwrap();
    assert_eq!(first.enqueued.len(), 2);
    assert_eq!(first.text, "processed_go_north then processed_say_hello_there");

    let replay = processor
        .process(dee.id, DirectiveSource::LlmResponse, source, text)
        .await
        .unwrap();
    assert!(replay.enqueued.is_empty());
    assert_eq!(replay.text, first.text);

    let commands: Vec<String> = store
        .commands_for(dee.id)
        .unwrap()
        .into_iter()
        .map(|c| c.command)
        .collect();
    assert_eq!(commands.len(), 2);
    assert!(commands.contains(&"go north".to_string()));
    assert!(commands.contains(&"say hello there".to_string()));
}

#[tokio::test]
async fn test_perception_buffer_keeps_newest_text() {
    let settings = EngineSettings {
        perception_limit: 5000,
        ..EngineSettings::default()
    };
    let d = dungeon(MockLLMProvider::new(), settings);
    let eve = spawn_agent(&d.store, "Eve").await;

    let noise: String = (0..6000).map(|i| if i % 2 == 0 { 'a' } else { 'b' }).collect();
    let loud = format!("{}END", noise);
    d.store
        .create_perception(&PerceptionEntry::environmental(eve.id, None, loud))
        .await
        .unwrap();

    d.agent_loop.tick_agent(eve.id).await.unwrap();

    let agent = d.store.get_agent(eve.id).await.unwrap().unwrap();
    assert_eq!(agent.perception.chars().count(), 5000);
    assert!(agent.perception.ends_with("END"));
    assert!(d.store.undelivered_perceptions(eve.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_paused_agent_is_left_alone() {
    let d = dungeon(MockLLMProvider::new(), EngineSettings::default());
    let mut fay = spawn_agent(&d.store, "Fay").await;
    fay.is_running = false;
    d.store.update_agent(&fay).await.unwrap();
    d.store
        .create_perception(&PerceptionEntry::environmental(fay.id, None, "[command|look]"))
        .await
        .unwrap();

    assert_eq!(
        d.agent_loop.tick_agent(fay.id).await.unwrap(),
        TickOutcome::Skipped(Gate::Paused)
    );
    assert!(d.store.llm_requests_for(fay.id).unwrap().is_empty());
    assert!(d.store.commands_for(fay.id).unwrap().is_empty());
    assert_eq!(d.store.undelivered_perceptions(fay.id).await.unwrap().len(), 1);
}
