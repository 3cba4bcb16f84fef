use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::sample::Sample;
use crate::session::Session;

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Transport

/// An outbound datagram sink. `send_to` must never wait: a send that cannot
/// complete immediately fails with `io::ErrorKind::WouldBlock`.
pub trait Transport {
  fn send_to( &self, payload: &[u8], target: SocketAddr ) -> io::Result<()>;
}

impl Transport for UdpSocket {
  fn send_to( &self, payload: &[u8], target: SocketAddr ) -> io::Result<()> {
    self.try_send_to( payload, target ).map(|_|{ () })
  }
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -  Relay

#[derive( Clone, Copy, Debug, PartialEq )]
pub enum Forwarded {
  /// Sent as one datagram to the registered client.
  Sent( SocketAddr ),

  /// No client is registered; the sample was logged locally.
  Logged,

  /// The socket could not take the datagram without waiting.
  Dropped
}

/// Forwards `sample` to the session's client, or logs it when no client is
/// registered. Consumes the sample either way.
pub fn forward<T: Transport>( session: &Session, sample: Sample, transport: &T ) -> io::Result<Forwarded> {
  let Some( endpoint ) = session.endpoint() else {
    log::info!( "{sample}" );
    return Ok( Forwarded::Logged );
  };

  match transport.send_to( &sample.to_bytes(), endpoint ) {
    Ok(()) => Ok( Forwarded::Sent( endpoint ) ),
    Err( err ) if err.kind() == io::ErrorKind::WouldBlock => {
      log::warn!( "Socket is busy, dropping sample #{}", sample.sample_number );
      Ok( Forwarded::Dropped )
    },
    Err( err ) => Err( err )
  }
}

#[cfg( test )]
mod tests {
  use std::cell::RefCell;
  use std::net::{ IpAddr, Ipv4Addr };

  use super::*;

  #[derive( Default )]
  struct FakeTransport {
    sent: RefCell<Vec<( Vec<u8>, SocketAddr )>>,
    fail_with: Option<io::ErrorKind>
  }

  impl Transport for FakeTransport {
    fn send_to( &self, payload: &[u8], target: SocketAddr ) -> io::Result<()> {
      if let Some( kind ) = self.fail_with {
        return Err( io::Error::from( kind ) );
      }

      self.sent.borrow_mut().push( ( payload.to_vec(), target ) );
      Ok(())
    }
  }

  fn sample() -> Sample {
    Sample{ sample_number: 3, channel_data: [ 1.5; 8 ], aux_data: [ 0.0, 0.0, 1.0 ], timestamp: 1_000 }
  }

  fn connected_session() -> Session {
    let mut session = Session::new();
    session.begin( IpAddr::V4( Ipv4Addr::new( 1, 2, 3, 4 ) ), 9000 );
    session
  }

  #[test]
  fn does_not_send_without_a_client() {
    let transport = FakeTransport::default();

    let forwarded = forward( &Session::new(), sample(), &transport ).unwrap();
    assert_eq!( forwarded, Forwarded::Logged );
    assert!( transport.sent.borrow().is_empty() );
  }

  #[test]
  fn sends_exactly_once_to_the_client_with_an_unmodified_payload() {
    let transport = FakeTransport::default();
    let session = connected_session();

    let forwarded = forward( &session, sample(), &transport ).unwrap();
    assert_eq!( forwarded, Forwarded::Sent( session.endpoint().unwrap() ) );

    let sent = transport.sent.borrow();
    assert_eq!( sent.len(), 1 );
    assert_eq!( sent[0].1, SocketAddr::new( IpAddr::V4( Ipv4Addr::new( 1, 2, 3, 4 ) ), 9000 ) );
    assert_eq!( sent[0].0, sample().to_bytes().to_vec() );
    assert_eq!( Sample::from_bytes( &sent[0].0 ), Some( sample() ) );
  }

  #[test]
  fn does_not_send_after_the_session_ends() {
    let transport = FakeTransport::default();
    let mut session = connected_session();
    session.end();

    assert_eq!( forward( &session, sample(), &transport ).unwrap(), Forwarded::Logged );
    assert!( transport.sent.borrow().is_empty() );
  }

  #[test]
  fn drops_a_sample_when_the_socket_would_block() {
    let transport = FakeTransport{ fail_with: Some( io::ErrorKind::WouldBlock ), ..Default::default() };
    assert_eq!( forward( &connected_session(), sample(), &transport ).unwrap(), Forwarded::Dropped );
  }

  #[test]
  fn surfaces_other_send_errors() {
    let transport = FakeTransport{ fail_with: Some( io::ErrorKind::PermissionDenied ), ..Default::default() };
    assert!( forward( &connected_session(), sample(), &transport ).is_err() );
  }
}
