//! The acquisition board adapter.
//!
//! A [`Board`] hides whether samples come from a physical OpenBCI Cyton on a
//! serial port or from the built-in simulator. Connecting yields a [`Link`]
//! that carries the one-shot ready notification and the sample stream.
use std::future::Future;

use thiserror::Error;
use tokio::sync::{ mpsc::{ self, error::TrySendError }, oneshot };

use crate::sample::Sample;

pub mod cyton;
pub mod simulator;

pub use cyton::OpenBci;

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -  Enums

#[derive( Clone, Copy, Debug, PartialEq )]
pub enum BoardState {
  Idle,
  Connected,
  Streaming
}

/// Commands sent from the adapter to a link's I/O task.
#[derive( Clone, Copy, Debug, PartialEq )]
pub enum BoardCommand {
  StreamStart,
  StreamStop
}

#[derive( Debug, Error )]
pub enum BoardError {
  /// Discovery found no physical board.
  #[error( "no OpenBCI board was found" )]
  NotFound,

  /// The operation requires a connected board.
  #[error( "the board is not connected" )]
  NotConnected,

  /// The link's command queue is full.
  #[error( "the board link is busy" )]
  Busy,

  /// The link's I/O task is gone.
  #[error( "the board link is closed" )]
  Closed,

  #[error( "serial port error: {0}" )]
  Serial( #[from] tokio_serial::Error ),

  #[error( "io error: {0}" )]
  Io( #[from] std::io::Error )
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Link

/// The notification side of a connected board.
#[derive( Debug )]
pub struct Link {
  /// Resolves once, when the board reports it is ready.
  pub ready: oneshot::Receiver<()>,

  /// Samples in production order, produced only while streaming.
  pub samples: mpsc::Receiver<Sample>
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -  Board

pub trait Board: Send + Sync + 'static {
  /// Searches for a physical board and returns its port name.
  fn discover( &self ) -> impl Future<Output = Result<String,BoardError>> + Send;

  /// Connects to the board at `port_name`.
  fn connect( &self, port_name: &str ) -> impl Future<Output = Result<Link,BoardError>> + Send;

  /// Drops the current link. A no-op when idle.
  fn disconnect( &self ) -> Result<(),BoardError>;

  /// Starts sample production. A no-op when already streaming.
  fn stream_start( &self ) -> Result<(),BoardError>;

  /// Stops sample production. A no-op when not streaming.
  fn stream_stop( &self ) -> Result<(),BoardError>;

  fn state( &self ) -> BoardState;
}

/// Hands `sample` to the listener without waiting. A full channel drops the
/// sample; a closed channel ends the link.
pub(crate) fn publish( samples_tx: &mpsc::Sender<Sample>, sample: Sample ) -> Result<(),BoardError> {
  match samples_tx.try_send( sample ) {
    Ok(()) => Ok(()),
    Err( TrySendError::Full( sample ) ) => {
      log::warn!( "Sample channel is full, dropping sample #{}", sample.sample_number );
      Ok(())
    },
    Err( TrySendError::Closed( _ ) ) => Err( BoardError::Closed )
  }
}
