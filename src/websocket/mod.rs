pub mod handler;
pub mod session;

pub use handler::{orderflow_ws_handler, ConnectParams};
pub use session::{authorize, run_session, SessionState, WsState};
