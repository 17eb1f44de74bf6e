//! # Hive Orchestration Core
//!
//! Headless orchestration for AI coding-assistant CLIs.
//!
//! ## Overview
//!
//! Hive spawns provider CLIs (Claude, Amp, Codex, Gemini, OpenCode) as
//! long-running subprocesses, normalizes their incompatible JSONL dialects
//! into one unified event model, tracks per-workflow lifecycle state across
//! many concurrent workflows, and republishes everything through a
//! cross-workflow event bus with envelope enrichment.
//!
//! ## Architecture
//!
//! | Layer | Module | Responsibility |
//! |-------|--------|----------------|
//! | Events | [`event`] | Unified `OutputEvent` model |
//! | Parsers | [`parser`] | Five JSONL dialects → unified events |
//! | Processes | [`process`] | Subprocess lifecycle, scanners, cancellation |
//! | Clients | [`client`] | Auth probes, executable lookup, argv, MCP config |
//! | Workflows | [`workflow`] | Instance state machine + registry |
//! | Bus | [`bus`] | Fan-in, classification, envelopes, lifecycle hook |
//! | Wiring | [`orchestrator`] | Composition root owned by the entry point |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hive::client::ClientConfig;
//! use hive::bus::ProcessRole;
//! use hive::workflow::WorkflowSpec;
//! use hive::Orchestrator;
//!
//! # async fn run() -> Result<(), hive::HiveError> {
//! let orchestrator = Orchestrator::with_builtin_clients();
//! orchestrator.install_lifecycle_sync();
//!
//! let workflow = orchestrator.create_workflow(&WorkflowSpec {
//!     template_id: "code-review".into(),
//!     initial_prompt: "Review the open diff".into(),
//!     ..Default::default()
//! })?;
//!
//! let config = ClientConfig::new("Review the open diff", std::env::temp_dir());
//! let mut process = orchestrator
//!     .launch(workflow.id, "claude", &config, ProcessRole::Coordinator)
//!     .await?;
//! process.wait().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Event Flow
//!
//! A spawn request selects a provider factory from the client registry; the
//! adapter validates auth, locates the executable, materializes MCP config,
//! builds the argument vector, and constructs a [`process::HeadlessProcess`].
//! The process reads stdout line by line through the provider's
//! [`parser::EventParser`], stamps and forwards unified events, and extracts
//! the session reference in-band. The bus wraps each workflow's events in
//! [`bus::ControlPlaneEvent`] envelopes and fans them out to subscribers.

pub mod bus;
pub mod client;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod parser;
pub mod process;
pub mod workflow;

pub use error::{FixSuggestion, HiveError};
pub use event::{ContentBlock, ErrorInfo, ErrorReason, EventType, OutputEvent, UsageInfo};
pub use orchestrator::Orchestrator;
pub use process::{HeadlessProcess, ProcessStatus};
pub use workflow::{WorkflowInstance, WorkflowRegistry, WorkflowSpec, WorkflowState};
