//! Model turn streaming: events, content buffering and the turn coordinator

pub mod buffer;
pub mod coordinator;
pub mod events;

pub use buffer::{find_safe_split, ContentBuffer};
pub use coordinator::{StreamCoordinator, TurnOutcome, TurnReport};
pub use events::{CompressionInfo, StreamEvent};
