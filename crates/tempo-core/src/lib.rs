pub mod events;
pub mod ids;
pub mod kinds;

pub use events::{AffectedEntity, ChangeEvent, NotificationEnvelope, NotificationType};
pub use kinds::EntityKind;
