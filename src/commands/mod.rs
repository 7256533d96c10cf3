pub mod exchange;
pub mod raw;

pub use exchange::{Exchange, ExchangePolicy};
pub use raw::RawCommand;
