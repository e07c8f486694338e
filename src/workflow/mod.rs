//! Blocking acknowledgment workflow.
//!
//! - [`state`]: the pure state machine over the delivery inbox.
//! - [`session`]: the event loop that owns it and performs side effects.
//! - [`presenter`]: the rendering seam.

pub mod presenter;
pub mod session;
pub mod state;

pub use presenter::Presenter;
pub use session::{MessageSession, SessionHandle, SessionSnapshot};
pub use state::{AckWorkflow, WorkflowState};
