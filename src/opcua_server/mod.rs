pub mod plc;

pub use plc::start_opcua_server;
