pub mod bus;
pub mod client;
pub mod handlers;
pub mod rpc;
pub mod server;

pub use bus::{NotificationBus, TOPIC_CHANGES};
pub use handlers::HandlerState;
pub use server::{start, ServerConfig, ServerHandle};
