//! Broker mechanics: publish/consume contract, naming and an in-memory broker.

pub mod bus;
pub mod in_memory_bus;
pub mod naming;

pub use bus::{Acknowledger, BrokerError, Consumer, Delivery, MessageBroker};
pub use in_memory_bus::InMemoryBroker;
pub use naming::{dead_letter_queue, Destinations};
