//! Session orchestration and token-authorized relaying for a Kahla account.
//!
//! [`SessionManager`] keeps the pusher session alive, [`EventDispatcher`]
//! reacts to its events and [`RelayService`] owns the token registry that
//! the HTTP surface sends through.

pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod relay;
pub mod retry;
pub mod session;
pub mod task_gate;

pub use dispatcher::{EventDispatcher, REFRESH_TOKEN_COMMAND};
pub use error::RelayError;
pub use registry::{ConversationRegistry, ConversationTable};
pub use relay::{BackgroundTask, RelayService};
pub use retry::RetryPolicy;
pub use session::{Credentials, SessionEvent, SessionManager, SessionState};
pub use task_gate::TaskGate;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
