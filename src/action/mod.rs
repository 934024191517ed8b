//! Typed moderator and system commands
//!
//! Actions are submitted to the [`ActionBus`], dispatched by type to a handler,
//! and report exactly one result back through their [`ResultHandle`].

mod bus;
mod error;
mod handler;
mod output;
mod types;

pub use bus::{ActionBus, ActionDispatcher};
pub use error::{ActionError, ActionResult};
pub use handler::{ActionHandler, HandlerContext, HandlerRegistry};
pub use output::ActionOutput;
pub use types::{Action, ActionKind, ActionParams, ActionType, NetParams, Origin, ResultHandle};
