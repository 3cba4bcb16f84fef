use std::net::SocketAddr;

use crate::constants::*;

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Command

/// Commands recognized by the relay's control protocol.
#[derive( Clone, Copy, Debug, PartialEq )]
pub enum Command {
  StreamStart,
  StreamStop,
  ConnectBegin,
  ConnectEnd,
  /// Any payload that is not an exact protocol marker.
  Unrecognized
}

impl Command {
  /// Decodes a raw control datagram by exact match against the protocol
  /// markers.
  pub fn decode( payload: &[u8] ) -> Command {
    match payload {
      RELAY_COMMAND_STREAM_START => Command::StreamStart,
      RELAY_COMMAND_STREAM_STOP => Command::StreamStop,
      RELAY_COMMAND_CONNECT_BEGIN => Command::ConnectBegin,
      RELAY_COMMAND_CONNECT_END => Command::ConnectEnd,
      _ => Command::Unrecognized
    }
  }
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Controller

/// The state transitions a control command can trigger. Every transition is
/// fire-and-forget.
pub trait Controller {
  fn stream_start( &mut self );
  fn stream_stop( &mut self );
  fn connect_begin( &mut self, sender: SocketAddr );
  fn connect_end( &mut self );
}

/// Invokes exactly one transition on `controller` for `command`.
///
/// An `Unrecognized` payload disconnects the client, the same as
/// `/connect/end`.
pub fn dispatch<C: Controller>( command: Command, sender: SocketAddr, controller: &mut C ) {
  match command {
    Command::StreamStart => controller.stream_start(),
    Command::StreamStop => controller.stream_stop(),
    Command::ConnectBegin => controller.connect_begin( sender ),
    Command::ConnectEnd => controller.connect_end(),
    Command::Unrecognized => {
      log::info!( "Unrecognized command from {sender}, treating it as a disconnect" );
      controller.connect_end()
    }
  }
}

#[cfg( test )]
mod tests {
  use std::net::{ IpAddr, Ipv4Addr };

  use super::*;

  #[derive( Debug, Default, PartialEq )]
  struct Calls {
    stream_start: usize,
    stream_stop: usize,
    connect_begin: Vec<SocketAddr>,
    connect_end: usize
  }

  impl Controller for Calls {
    fn stream_start( &mut self ) { self.stream_start += 1; }
    fn stream_stop( &mut self ) { self.stream_stop += 1; }
    fn connect_begin( &mut self, sender: SocketAddr ) { self.connect_begin.push( sender ); }
    fn connect_end( &mut self ) { self.connect_end += 1; }
  }

  fn sender() -> SocketAddr {
    SocketAddr::new( IpAddr::V4( Ipv4Addr::new( 1, 2, 3, 4 ) ), 9000 )
  }

  fn dispatch_payload( payload: &[u8] ) -> Calls {
    let mut calls = Calls::default();
    dispatch( Command::decode( payload ), sender(), &mut calls );
    calls
  }

  #[test]
  fn decodes_the_four_markers() {
    assert_eq!( Command::decode( b"/stream/start" ), Command::StreamStart );
    assert_eq!( Command::decode( b"/stream/stop" ), Command::StreamStop );
    assert_eq!( Command::decode( b"/connect/begin" ), Command::ConnectBegin );
    assert_eq!( Command::decode( b"/connect/end" ), Command::ConnectEnd );
  }

  #[test]
  fn requires_an_exact_match() {
    assert_eq!( Command::decode( b"/stream/start\n" ), Command::Unrecognized );
    assert_eq!( Command::decode( b"/STREAM/START" ), Command::Unrecognized );
    assert_eq!( Command::decode( b"" ), Command::Unrecognized );
  }

  #[test]
  fn each_command_invokes_only_its_transition() {
    assert_eq!( dispatch_payload( b"/stream/start" ), Calls{ stream_start: 1, ..Default::default() } );
    assert_eq!( dispatch_payload( b"/stream/stop" ), Calls{ stream_stop: 1, ..Default::default() } );
    assert_eq!( dispatch_payload( b"/connect/begin" ), Calls{ connect_begin: vec![ sender() ], ..Default::default() } );
    assert_eq!( dispatch_payload( b"/connect/end" ), Calls{ connect_end: 1, ..Default::default() } );
  }

  #[test]
  fn garbage_is_dispatched_like_connect_end() {
    let connect_end = dispatch_payload( b"/connect/end" );

    for payload in [ &b"hello"[..], b"/connect", b"\xff\x00", b"" ] {
      assert_eq!( dispatch_payload( payload ), connect_end );
    }
  }
}
