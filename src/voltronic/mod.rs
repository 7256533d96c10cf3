pub mod command;
pub mod frame;
pub mod reply;
pub mod telemetry;
pub mod transport;
