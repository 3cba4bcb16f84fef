pub mod board;
pub mod command;
pub mod constants;
pub mod listener;
pub mod relay;
pub mod sample;
pub mod session;
pub mod workflow;

// Convenience exports
pub use board::{ Board, BoardError, BoardState, Link, OpenBci };
pub use command::Command;
pub use listener::{ Connection, Listener };
pub use sample::Sample;
pub use session::Session;
pub use workflow::{ ConnectError, ConnectOptions };
