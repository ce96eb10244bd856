// Self-assessment diagnosis engine.
// SessionManager, AnswerRecorder, ComputationTrigger and ResultPoller are composed by
// DiagnosisStateMachine; the store trait is the only way out to persistence.

pub mod handlers;
pub mod machine;
#[cfg(test)]
pub mod memory;
pub mod poller;
pub mod recorder;
pub mod registry;
pub mod session;
pub mod store;
pub mod trigger;
