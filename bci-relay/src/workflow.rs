//! The connect workflow: discover a board (or fall back to the simulator),
//! connect to it and wait for it to report ready.
//!
//! The workflow is a single future. Its owner cancels it by dropping it, which
//! stops it at whichever step it is suspended on.
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{ mpsc, watch };
use tokio::time::{ self, Duration };

use crate::board::{ Board, BoardError };
use crate::constants::SIMULATOR_PORT_NAME;
use crate::sample::Sample;

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs( 10 );

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -  Types

#[derive( Clone, Copy, Debug, PartialEq )]
pub enum Stage {
  Idle,
  Discovering,
  Connecting,
  Connected,
  Ready
}

#[derive( Clone, Debug )]
pub struct ConnectOptions {
  /// Connect to this port instead of running discovery.
  pub serial_port: Option<String>,

  /// Connect to the simulator when discovery finds no board.
  pub simulator_fallback: bool,

  /// How long to wait for the board's ready notification.
  pub ready_timeout: Duration
}

impl Default for ConnectOptions {
  fn default() -> Self {
    Self{
      serial_port: None,
      simulator_fallback: true,
      ready_timeout: DEFAULT_READY_TIMEOUT
    }
  }
}

#[derive( Debug, Error )]
pub enum ConnectError {
  #[error( "board discovery failed: {0}" )]
  Discovery( BoardError ),

  #[error( "failed to connect to {port_name}: {source}" )]
  Connect { port_name: String, source: BoardError },

  #[error( "board did not report ready within {0:?}" )]
  ReadyTimeout( Duration ),

  #[error( "board link closed before it reported ready" )]
  ReadyDropped
}

/// A board that has connected and reported ready.
#[derive( Debug )]
pub struct Connected {
  pub port_name: String,
  pub samples: mpsc::Receiver<Sample>
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -  Workflow

pub struct Workflow<B: Board> {
  board: Arc<B>,
  options: ConnectOptions,

  // Published so the owner can report where a cancelled workflow stopped
  stage: watch::Sender<Stage>
}

impl<B: Board> Workflow<B> {
  pub fn new( board: Arc<B>, options: ConnectOptions ) -> Self {
    let ( stage, _ ) = watch::channel( Stage::Idle );
    return Self{ board, options, stage };
  }

  /// Observes the workflow's stage, including after `run` has consumed it.
  pub fn stage( &self ) -> watch::Receiver<Stage> {
    self.stage.subscribe()
  }

  /// Runs every step to completion. On failure the board is left idle.
  pub async fn run( self ) -> Result<Connected,ConnectError> {
    let port_name = self.resolve_port().await?;

    self.advance( Stage::Connecting );
    let link =
      match self.board.connect( &port_name ).await {
        Ok( link ) => link,
        Err( source ) => {
          self.release();
          return Err( ConnectError::Connect{ port_name, source } );
        }
      };

    self.advance( Stage::Connected );
    let ready = time::timeout( self.options.ready_timeout, link.ready ).await;

    match ready {
      Ok( Ok(()) ) => {
        self.advance( Stage::Ready );
        Ok( Connected{ port_name, samples: link.samples } )
      },

      Ok( Err( _ ) ) => {
        self.release();
        Err( ConnectError::ReadyDropped )
      },

      Err( _ ) => {
        self.release();
        Err( ConnectError::ReadyTimeout( self.options.ready_timeout ) )
      }
    }
  }

  // Returns the configured port, the discovered port, or the simulator.
  async fn resolve_port( &self ) -> Result<String,ConnectError> {
    if let Some( port_name ) = self.options.serial_port.clone() {
      return Ok( port_name );
    }

    self.advance( Stage::Discovering );

    match self.board.discover().await {
      Ok( port_name ) => {
        log::info!( "Board found on {port_name}" );
        Ok( port_name )
      },

      Err( err ) if self.options.simulator_fallback => {
        log::info!( "No board found ({err}), falling back to the simulator" );
        Ok( SIMULATOR_PORT_NAME.to_string() )
      },

      Err( err ) => Err( ConnectError::Discovery( err ) )
    }
  }

  fn advance( &self, stage: Stage ) {
    let previous = self.stage.send_replace( stage );
    log::debug!( "Connect workflow: {previous:?} -> {stage:?}" );
  }

  // Leaves the board idle after a failed step.
  fn release( &self ) {
    if let Err( err ) = self.board.disconnect() {
      log::warn!( "Cannot disconnect board: {err}" );
    }
  }
}
