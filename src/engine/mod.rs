pub mod dispatcher;
pub mod executor;
pub mod pacing;
pub mod template;

pub use dispatcher::{DispatchError, EngineContext, TickReport};
pub use executor::{ActionExecutor, ActionFailure, GatewayExecutor};
