//! Sessions and the ids of their runs.

mod ids;
mod manager;
mod state;

pub use ids::{RunId, SessionId};
pub use manager::SessionManager;
pub use state::{Session, SessionBuilder};
