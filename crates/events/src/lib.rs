//! Notifications raised by the cabinet core and the bus that carries them.
//!
//! The core publishes; whatever fans notifications out to UI clients
//! subscribes. Push delivery itself lives outside this workspace.

pub mod bus;
pub mod in_memory_bus;
pub mod notification;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use notification::{Notification, NotificationEnvelope};
