pub mod connection;
pub mod fanout;
pub mod registry;

pub use connection::GatewayContext;
pub use fanout::Fanout;
pub use registry::PresenceRegistry;
