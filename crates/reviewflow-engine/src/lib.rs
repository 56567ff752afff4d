// Execution engine
//
// Takes a work item, runs the workflow's actions in order under
// cancellation and timeouts, writes logs, updates execution status, and
// honours retries and failure propagation. Also home to the dispatcher
// (trigger matching + dedup), the commenter admission service, and the
// authorization collaborator interface.

pub mod actions;
pub mod admission;
pub mod authz;
pub mod dispatcher;
pub mod engine;
pub mod retry;

pub use actions::{ActionContext, ActionHandler, ActionOutcome, ActionRegistry};
pub use admission::CommenterAdmission;
pub use authz::{AccessAuditLog, AllowAll, AuditEntry, AuthorizationContext, Authorizer};
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use engine::{EngineConfig, ExecutionEngine, RunDisposition};
pub use retry::RetryPolicy;
