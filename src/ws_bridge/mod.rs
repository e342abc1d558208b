pub mod bridge;

pub use bridge::{start_ws_server, ClientMessage};
