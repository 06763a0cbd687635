use std::sync::Arc;

use parley_db::Database;
use parley_directory::{IdentityDirectory, MembershipDirectory};
use parley_gateway::{Fanout, GatewayContext, PresenceRegistry};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub registry: PresenceRegistry,
    pub fanout: Fanout,
    pub identity: Arc<dyn IdentityDirectory>,
    pub membership: Arc<dyn MembershipDirectory>,
    pub jwt_secret: String,
}

impl AppStateInner {
    /// The same wiring a WebSocket session gets.
    pub fn gateway_context(&self) -> GatewayContext {
        GatewayContext {
            registry: self.registry.clone(),
            fanout: self.fanout.clone(),
            db: self.db.clone(),
            identity: self.identity.clone(),
            membership: self.membership.clone(),
        }
    }
}
