//! SiteKeeper orchestration core: the master-side engine that dispatches
//! typed tasks to remote agents, tracks per-node progress through a
//! two-phase readiness/dispatch protocol, aggregates outcomes hierarchically
//! (NodeTask → NodeAction → Stage → MasterAction), and journals the whole
//! run for after-the-fact reconstruction.
//!
//! No transport, HTTP surface, or persistent storage backend is implemented
//! here — those are external collaborators this crate is built to plug into
//! (see [`transport::AgentTransport`] and [`journal::JournalService`]).

pub mod agent_hub;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handler_registry;
pub mod journal;
pub mod log_router;
pub mod logging;
pub mod master_action_runtime;
pub mod model;
pub mod registry;
pub mod stage_context;
pub mod transport;

/// Test doubles (`FakeTransport`), kept public so integration tests under
/// `tests/` can build scenarios against the same fakes the unit tests use.
pub mod testing;

pub use agent_hub::AgentHubFacade;
pub use config::SiteKeeperConfig;
pub use coordinator::NodeActionCoordinator;
pub use error::{SiteKeeperError, SiteKeeperResult};
pub use handler_registry::HandlerRegistry;
pub use journal::{InMemoryJournal, JournalService};
pub use log_router::LogRouter;
pub use master_action_runtime::{MasterActionContext, MasterActionRuntime, WorkflowHandler};
pub use registry::AgentRegistry;
