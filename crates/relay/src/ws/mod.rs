mod handler;
pub mod protocol;
mod session;

pub use handler::{router, WsRouterState};
pub use session::SessionHub;
