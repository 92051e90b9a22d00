pub mod connection;
pub mod message;

pub use connection::*;
pub use message::*;
