use std::net::{ IpAddr, SocketAddr };

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Session

/// The single remote client eligible to receive the relay's datagrams.
///
/// The endpoint and the connected flag are one value, so any reader observes
/// address, port and flag together.
#[derive( Clone, Copy, Debug, Default, PartialEq )]
pub struct Session {
  endpoint: Option<SocketAddr>
}

impl Session {
  /// Creates a disconnected session.
  pub fn new() -> Self {
    return Self{ endpoint: None };
  }

  /// Registers `address:port` as the client and marks the session connected.
  pub fn begin( &mut self, address: IpAddr, port: u16 ) {
    self.endpoint = Some( SocketAddr::new( address, port ) );
  }

  /// Clears the registered client and marks the session disconnected.
  pub fn end( &mut self ) {
    self.endpoint = None;
  }

  /// Returns a snapshot of the registered client, if connected.
  #[inline]
  pub fn endpoint( &self ) -> Option<SocketAddr> {
    return self.endpoint;
  }
}

#[cfg( test )]
mod tests {
  use std::net::Ipv4Addr;

  use super::*;

  #[test]
  fn starts_disconnected() {
    assert_eq!( Session::new().endpoint(), None );
  }

  #[test]
  fn begin_then_end_resets_every_field() {
    let mut session = Session::new();
    session.begin( IpAddr::V4( Ipv4Addr::new( 1, 2, 3, 4 ) ), 9000 );

    assert_eq!( session.endpoint(), Some( "1.2.3.4:9000".parse().unwrap() ) );

    session.end();
    assert_eq!( session, Session::new() );
  }
}
