pub mod actions;
pub mod bus;
pub mod continuation;
pub mod correlation;
pub mod dispatch;
pub mod engine;
pub mod frame;
pub mod parse;
pub mod router;
pub mod supervisor;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use bus::{EventBus, SubscriptionId};
pub use continuation::{ContinuationHandler, LabelClassifier};
pub use dispatch::{CommandDispatcher, HttpDispatcher};
pub use engine::{CorrelationEngine, PendingWait, ProgressCallback, WaitOptions};
pub use supervisor::ConnectionState;
pub use transport::{Transport, WsTransport};
pub use types::{channels, GatewayEvent, MjMessage, ProgressSnapshot, ProtocolError};
