//! The control-plane listener: owns the UDP socket, runs the event loop that
//! feeds control commands, connect workflow completions and board samples
//! through one task.
use std::future::{ Future, pending };
use std::io;
use std::net::{ IpAddr, Ipv4Addr, SocketAddr };
use std::pin::Pin;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{ mpsc, watch };
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::board::{ Board, BoardState };
use crate::command::{ self, Command, Controller };
use crate::constants::*;
use crate::relay;
use crate::sample::Sample;
use crate::session::Session;
use crate::workflow::{ ConnectError, ConnectOptions, Connected, Stage, Workflow };

type PendingWorkflow = Pin<Box<dyn Future<Output = Result<Connected,ConnectError>> + Send>>;

// A connect workflow that has not completed yet.
struct InFlight {
  future: PendingWorkflow,
  stage: watch::Receiver<Stage>
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Connection

#[derive( Debug )]
pub struct Connection {
  address: SocketAddr,
  shutdown_tx: watch::Sender<bool>,
  handle: JoinHandle<io::Result<()>>
}

impl Connection {
  /// The local address the listener is bound to.
  pub fn address( &self ) -> SocketAddr {
    return self.address;
  }

  /// Asks the event loop to disconnect the board and exit.
  pub fn shutdown( &self ) {
    let _ = self.shutdown_tx.send( true );
  }

  /// Waits for the event loop to exit. Returns the transport error that
  /// stopped it, if any.
  pub async fn join( &mut self ) -> io::Result<()> {
    return ( &mut self.handle ).await?;
  }
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Listener Builder

pub struct Listener<B: Board> {
  /// The local address the listener binds. Defaults to `0.0.0.0:41234`.
  address: SocketAddr,

  board: Arc<B>,

  options: ConnectOptions
}

impl<B: Board> Listener<B> {
  /// Creates a new listener for `board`. Must call `Listener::serve().await`
  /// to start.
  pub fn new( board: Arc<B> ) -> Self {
    return Self{
      address: SocketAddr::new( IpAddr::V4( Ipv4Addr::UNSPECIFIED ), RELAY_LISTEN_PORT ),
      board,
      options: ConnectOptions::default()
    };
  }

  // Overrides the default address that the listener binds.
  pub fn address( mut self, address: SocketAddr ) -> Self {
    self.address = address;
    return self;
  }

  // Connects to `port` instead of discovering a board.
  pub fn serial_port( mut self, port: Option<String> ) -> Self {
    self.options.serial_port = port;
    return self;
  }

  // Enables or disables the simulator fallback when no board is discovered.
  pub fn simulator_fallback( mut self, enabled: bool ) -> Self {
    self.options.simulator_fallback = enabled;
    return self;
  }

  // Bounds the wait for the board's ready notification.
  pub fn ready_timeout( mut self, timeout: Duration ) -> Self {
    self.options.ready_timeout = timeout;
    return self;
  }

  /// Binds the socket and spawns the event loop.
  pub async fn serve( self ) -> io::Result<Connection> {
    let socket = UdpSocket::bind( self.address ).await?;
    let address = socket.local_addr()?;
    let ( shutdown_tx, shutdown_rx ) = watch::channel( false );

    log::info!( "Listening on {address}" );

    let service = Service{
      board: self.board,
      options: self.options,
      samples: None,
      session: Session::new(),
      socket,
      subscribed: false,
      workflow: None
    };

    return Ok( Connection{
      address,
      shutdown_tx,
      handle: tokio::spawn( service.run( shutdown_rx ) )
    });
  }
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Service

struct Service<B: Board> {
  board: Arc<B>,
  options: ConnectOptions,

  // The connected board's sample stream, once its workflow has completed.
  samples: Option<mpsc::Receiver<Sample>>,

  session: Session,
  socket: UdpSocket,

  // Whether samples are relayed. Samples that arrive while false are dropped.
  subscribed: bool,

  workflow: Option<InFlight>
}

impl<B: Board> Service<B> {
  async fn run( mut self, mut shutdown_rx: watch::Receiver<bool> ) -> io::Result<()> {
    let mut buf = [0u8; RELAY_CONTROL_BYTES];

    let result = loop {
      tokio::select! {
        received = self.socket.recv_from( &mut buf ) => {
          match received {
            Ok( ( length, sender ) ) => {
              let payload = &buf[..length];
              log::debug!( "Received {:?} from {sender}", String::from_utf8_lossy( payload ) );
              command::dispatch( Command::decode( payload ), sender, &mut self );
            },
            Err( err ) if is_fatal_recv_error( &err ) => break Err( err ),
            Err( err ) => log::warn!( "Ignoring receive error: {err}" )
          }
        },

        outcome = poll_workflow( &mut self.workflow ) => {
          self.workflow = None;

          if let Err( err ) = self.on_workflow_done( outcome ).await {
            break Err( err );
          }
        },

        sample = next_sample( &mut self.samples ) => {
          if let Err( err ) = self.on_sample( sample ) {
            break Err( err );
          }
        },

        Ok(()) = shutdown_rx.changed() => break Ok(())
      }
    };

    self.cancel_workflow();
    self.samples = None;
    self.disconnect_board();

    match result {
      Ok(()) => {
        log::info!( "Listener shut down" );
        Ok(())
      },
      Err( err ) => {
        log::error!( "Listener failed, closing socket: {err:?}" );
        Err( err )
      }
    }
  }

  async fn on_workflow_done( &mut self, outcome: Result<Connected,ConnectError> ) -> io::Result<()> {
    let connected =
      match outcome {
        Ok( connected ) => connected,
        Err( err ) => {
          log::error!( "Connect workflow failed: {err}" );
          return Ok(());
        }
      };

    log::info!( "Board on {} is ready", connected.port_name );
    self.samples = Some( connected.samples );

    // The session is read here, after the workflow, so a client that left
    // mid-workflow never receives a stale notice.
    match self.session.endpoint() {
      Some( endpoint ) => {
        self.socket.send_to( RELAY_NOTICE_READY, endpoint ).await?;
        log::info!( "Sent ready to {endpoint}" );
      },
      None => log::info!( "ready" )
    }

    return Ok(());
  }

  fn on_sample( &mut self, sample: Option<Sample> ) -> io::Result<()> {
    match sample {
      Some( sample ) if self.subscribed => {
        relay::forward( &self.session, sample, &self.socket )?;
      },

      Some( sample ) => {
        log::trace!( "Discarding sample #{} while not streaming", sample.sample_number );
      },

      None => {
        log::info!( "Board link closed" );
        self.samples = None;
        self.subscribed = false;

        if self.board.state() != BoardState::Idle {
          self.disconnect_board();
        }
      }
    }

    return Ok(());
  }

  fn cancel_workflow( &mut self ) {
    if let Some( in_flight ) = self.workflow.take() {
      log::info!( "Cancelled the connect workflow while {:?}", *in_flight.stage.borrow() );
    }
  }

  fn disconnect_board( &self ) {
    if let Err( err ) = self.board.disconnect() {
      log::warn!( "Cannot disconnect board: {err}" );
    }
  }
}

impl<B: Board> Controller for Service<B> {
  fn stream_start( &mut self ) {
    match self.board.stream_start() {
      Ok(()) => {
        self.subscribed = true;
        log::info!( "Streaming started" );
      },
      Err( err ) => log::warn!( "Cannot start streaming: {err}" )
    }
  }

  fn stream_stop( &mut self ) {
    if let Err( err ) = self.board.stream_stop() {
      log::warn!( "Cannot stop streaming: {err}" );
    }

    self.subscribed = false;
    log::info!( "Streaming stopped" );
  }

  fn connect_begin( &mut self, sender: SocketAddr ) {
    self.cancel_workflow();
    self.samples = None;
    self.subscribed = false;

    if self.board.state() != BoardState::Idle {
      self.disconnect_board();
    }

    self.session.begin( sender.ip(), sender.port() );
    log::info!( "Client {sender} registered, connecting to board" );

    let workflow = Workflow::new( self.board.clone(), self.options.clone() );
    let stage = workflow.stage();
    self.workflow = Some( InFlight{ future: Box::pin( workflow.run() ), stage } );
  }

  fn connect_end( &mut self ) {
    if let Some( endpoint ) = self.session.endpoint() {
      log::info!( "Client {endpoint} deregistered" );
    }

    self.session.end();
    self.cancel_workflow();

    // The sample link stays open until the board closes it, so samples still
    // in flight reach the relay and are logged locally.
    self.disconnect_board();
  }
}

async fn poll_workflow( workflow: &mut Option<InFlight> ) -> Result<Connected,ConnectError> {
  match workflow {
    Some( in_flight ) => in_flight.future.as_mut().await,
    None => pending().await
  }
}

async fn next_sample( samples: &mut Option<mpsc::Receiver<Sample>> ) -> Option<Sample> {
  match samples {
    Some( samples ) => samples.recv().await,
    None => pending().await
  }
}

// An unconnected UDP socket on Windows reports `ConnectionReset` once a
// previous datagram's target port has closed. The socket itself stays usable.
fn is_fatal_recv_error( err: &io::Error ) -> bool {
  err.kind() != io::ErrorKind::ConnectionReset
}

#[cfg( test )]
mod tests {
  use super::*;

  #[test]
  fn a_connection_reset_on_receive_is_not_fatal() {
    assert!( ! is_fatal_recv_error( &io::Error::from( io::ErrorKind::ConnectionReset ) ) );
    assert!( is_fatal_recv_error( &io::Error::from( io::ErrorKind::PermissionDenied ) ) );
    assert!( is_fatal_recv_error( &io::Error::other( "socket closed" ) ) );
  }
}
