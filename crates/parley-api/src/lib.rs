pub mod deletes;
pub mod error;
pub mod groups;
pub mod history;
pub mod middleware;
pub mod reads;
pub mod state;

pub use error::ApiError;
pub use state::{AppState, AppStateInner};
