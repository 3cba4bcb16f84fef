use std::io;
use std::sync::Arc;

use parking_lot::{ Mutex, RwLock };
use tokio::sync::{ mpsc, oneshot };

use bci_relay::{ Board, BoardError, BoardState, Link, Sample };

#[derive( Clone, Debug, PartialEq )]
pub enum Call {
  Discover,
  Connect( String ),
  Disconnect,
  StreamStart,
  StreamStop
}

// A scripted board that records every call made to it.
pub struct FakeBoard {
  calls: Arc<RwLock<Vec<Call>>>,
  discovered: Option<String>,
  fail_connect: bool,
  fail_disconnect: bool,
  keep_link: bool,
  ready_on_connect: bool,
  state: Mutex<BoardState>,
  ready_tx: Mutex<Option<oneshot::Sender<()>>>,
  samples_tx: Mutex<Option<mpsc::Sender<Sample>>>
}

impl FakeBoard {
  // A board with no discoverable hardware that reports ready on connect.
  pub fn new() -> Self {
    return Self{
      calls: Arc::new( RwLock::new( Vec::new() ) ),
      discovered: None,
      fail_connect: false,
      fail_disconnect: false,
      keep_link: false,
      ready_on_connect: true,
      state: Mutex::new( BoardState::Idle ),
      ready_tx: Mutex::new( None ),
      samples_tx: Mutex::new( None )
    };
  }

  pub fn discovers( mut self, port_name: &str ) -> Self {
    self.discovered = Some( port_name.to_string() );
    return self;
  }

  pub fn failing_connect( mut self ) -> Self {
    self.fail_connect = true;
    return self;
  }

  // Disconnecting reports an error, after resetting like a closed link.
  pub fn failing_disconnect( mut self ) -> Self {
    self.fail_disconnect = true;
    return self;
  }

  // Keeps delivering samples after a disconnect, like a board whose I/O task
  // has not wound down yet.
  pub fn lingering_link( mut self ) -> Self {
    self.keep_link = true;
    return self;
  }

  pub fn never_ready( mut self ) -> Self {
    self.ready_on_connect = false;
    return self;
  }

  pub fn calls( &self ) -> Vec<Call> {
    self.calls.read().clone()
  }

  pub fn count( &self, call: &Call ) -> usize {
    self.calls.read().iter().filter(| recorded |{ *recorded == call }).count()
  }

  // Delivers `sample` on the current link. Returns false without a link.
  pub fn push_sample( &self, sample: Sample ) -> bool {
    match self.samples_tx.lock().as_ref() {
      Some( samples_tx ) => samples_tx.try_send( sample ).is_ok(),
      None => false
    }
  }

  fn record( &self, call: Call ) {
    self.calls.write().push( call );
  }
}

impl Board for FakeBoard {
  async fn discover( &self ) -> Result<String,BoardError> {
    self.record( Call::Discover );
    return self.discovered.clone().ok_or( BoardError::NotFound );
  }

  async fn connect( &self, port_name: &str ) -> Result<Link,BoardError> {
    self.record( Call::Connect( port_name.to_string() ) );

    if self.fail_connect {
      return Err( BoardError::Io( io::Error::other( "port is busy" ) ) );
    }

    let ( ready_tx, ready ) = oneshot::channel();
    let ( samples_tx, samples ) = mpsc::channel( 16 );

    if self.ready_on_connect {
      let _ = ready_tx.send(());
    } else {
      *self.ready_tx.lock() = Some( ready_tx );
    }

    *self.samples_tx.lock() = Some( samples_tx );
    *self.state.lock() = BoardState::Connected;

    return Ok( Link{ ready, samples } );
  }

  fn disconnect( &self ) -> Result<(),BoardError> {
    self.record( Call::Disconnect );
    *self.state.lock() = BoardState::Idle;
    *self.ready_tx.lock() = None;

    if ! self.keep_link {
      *self.samples_tx.lock() = None;
    }

    if self.fail_disconnect {
      return Err( BoardError::Closed );
    }

    return Ok(());
  }

  fn stream_start( &self ) -> Result<(),BoardError> {
    self.record( Call::StreamStart );
    let mut state = self.state.lock();

    match *state {
      BoardState::Idle => Err( BoardError::NotConnected ),
      _ => {
        *state = BoardState::Streaming;
        Ok(())
      }
    }
  }

  fn stream_stop( &self ) -> Result<(),BoardError> {
    self.record( Call::StreamStop );
    let mut state = self.state.lock();

    if *state == BoardState::Streaming {
      *state = BoardState::Connected;
    }

    return Ok(());
  }

  fn state( &self ) -> BoardState {
    *self.state.lock()
  }
}
