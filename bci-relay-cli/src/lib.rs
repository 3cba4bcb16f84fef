//! Command line host for the OpenBCI relay service.
pub mod app;

pub use app::{ App, command };
