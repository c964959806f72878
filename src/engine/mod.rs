pub mod agent_loop;
pub mod buffer;
pub mod command_worker;
pub mod lifecycle;
pub mod orchestrator;
pub mod prompt;
pub mod recovery;
pub mod scheduler;

pub use agent_loop::{AgentLoop, TickOutcome};
pub use command_worker::CommandWorker;
pub use lifecycle::{AgentStateMachine, Gate, LlmStep};
pub use orchestrator::LlmOrchestrator;
pub use recovery::{recover_interrupted, RecoverySummary};
pub use scheduler::{run_periodic, shutdown_channel, Tick};
