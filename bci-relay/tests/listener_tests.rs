use std::io;
use std::net::{ IpAddr, Ipv4Addr, SocketAddr };
use std::sync::Arc;

use log::{ Log, Metadata, Record };
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::time::{ sleep, timeout, Duration };

use bci_relay::constants::SIMULATOR_PORT_NAME;
use bci_relay::{ Board, BoardState, Connection, Listener, OpenBci, Sample };

mod support;
use support::{ Call, FakeBoard };

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Test Helpers

fn localhost() -> SocketAddr {
  SocketAddr::new( IpAddr::V4( Ipv4Addr::LOCALHOST ), 0 )
}

// Starts a listener on an ephemeral localhost port, plus a client socket.
async fn setup<B: Board>( board: Arc<B> ) -> io::Result<( Connection, UdpSocket )> {
  let conn = Listener::new( board ).address( localhost() ).ready_timeout( Duration::from_secs( 1 ) ).serve().await?;
  let client = UdpSocket::bind( localhost() ).await?;
  return Ok( ( conn, client ) );
}

async fn send( client: &UdpSocket, conn: &Connection, payload: &[u8] ) -> io::Result<()> {
  client.send_to( payload, conn.address() ).await?;
  return Ok(());
}

// Waits up to `wait` for one datagram.
async fn recv_within( client: &UdpSocket, wait: Duration ) -> Option<Vec<u8>> {
  let mut buf = [0u8; 512];

  match timeout( wait, client.recv_from( &mut buf ) ).await {
    Ok( Ok( ( length, _ ) ) ) => Some( buf[..length].to_vec() ),
    _ => None
  }
}

// Polls `condition` every few milliseconds for up to one second.
async fn eventually<F: Fn() -> bool>( condition: F ) -> bool {
  for _ in 0..200 {
    if condition() { return true; }
    sleep( Duration::from_millis( 5 ) ).await;
  }

  return condition();
}

fn sample( sample_number: u8 ) -> Sample {
  Sample{ sample_number, channel_data: [ -3.25; 8 ], aux_data: [ 0.0, 0.0, 1.0 ], timestamp: 42 }
}

// Records every log line. Shared by all tests in this file, so assertions
// match on text only one test produces.
struct CapturedLog {
  lines: Mutex<Vec<String>>
}

impl Log for CapturedLog {
  fn enabled( &self, _: &Metadata ) -> bool { true }

  fn log( &self, record: &Record ) {
    self.lines.lock().push( record.args().to_string() );
  }

  fn flush( &self ) {}
}

static CAPTURED_LOG: CapturedLog = CapturedLog{ lines: Mutex::new( Vec::new() ) };

fn capture_log() {
  if log::set_logger( &CAPTURED_LOG ).is_ok() {
    log::set_max_level( log::LevelFilter::Trace );
  }
}

fn logged( needle: &str ) -> usize {
  CAPTURED_LOG.lines.lock().iter().filter(| line |{ line.contains( needle ) }).count()
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Unit Tests

#[tokio::test]
async fn connect_begin_sends_ready_to_the_sender() -> io::Result<()> {
  let board = Arc::new( FakeBoard::new() );
  let ( conn, client ) = setup( board.clone() ).await?;

  send( &client, &conn, b"/connect/begin" ).await?;

  assert_eq!( recv_within( &client, Duration::from_secs( 1 ) ).await, Some( b"ready".to_vec() ) );
  assert_eq!( recv_within( &client, Duration::from_millis( 100 ) ).await, None );
  assert_eq!( board.calls(), vec![ Call::Discover, Call::Connect( SIMULATOR_PORT_NAME.to_string() ) ] );
  return Ok(());
}

#[tokio::test]
async fn streams_samples_to_the_registered_client() -> io::Result<()> {
  let board = Arc::new( FakeBoard::new() );
  let ( conn, client ) = setup( board.clone() ).await?;

  send( &client, &conn, b"/connect/begin" ).await?;
  assert_eq!( recv_within( &client, Duration::from_secs( 1 ) ).await, Some( b"ready".to_vec() ) );

  send( &client, &conn, b"/stream/start" ).await?;
  assert!( eventually(|| board.state() == BoardState::Streaming ).await );

  assert!( board.push_sample( sample( 1 ) ) );
  assert!( board.push_sample( sample( 2 ) ) );

  let first = recv_within( &client, Duration::from_secs( 1 ) ).await.unwrap();
  let second = recv_within( &client, Duration::from_secs( 1 ) ).await.unwrap();
  assert_eq!( first, sample( 1 ).to_bytes().to_vec() );
  assert_eq!( Sample::from_bytes( &second ), Some( sample( 2 ) ) );
  return Ok(());
}

#[tokio::test]
async fn samples_are_not_relayed_after_stream_stop() -> io::Result<()> {
  let board = Arc::new( FakeBoard::new() );
  let ( conn, client ) = setup( board.clone() ).await?;

  send( &client, &conn, b"/connect/begin" ).await?;
  assert!( recv_within( &client, Duration::from_secs( 1 ) ).await.is_some() );

  send( &client, &conn, b"/stream/start" ).await?;
  send( &client, &conn, b"/stream/stop" ).await?;
  assert!( eventually(|| board.count( &Call::StreamStop ) == 1 ).await );

  board.push_sample( sample( 1 ) );
  assert_eq!( recv_within( &client, Duration::from_millis( 200 ) ).await, None );
  return Ok(());
}

#[tokio::test]
async fn stream_stop_twice_or_before_start_is_harmless() -> io::Result<()> {
  let board = Arc::new( FakeBoard::new() );
  let ( conn, client ) = setup( board.clone() ).await?;

  send( &client, &conn, b"/stream/stop" ).await?;
  send( &client, &conn, b"/stream/stop" ).await?;
  assert!( eventually(|| board.count( &Call::StreamStop ) == 2 ).await );
  assert_ne!( board.state(), BoardState::Streaming );

  // The listener is still serving
  send( &client, &conn, b"/connect/begin" ).await?;
  assert_eq!( recv_within( &client, Duration::from_secs( 1 ) ).await, Some( b"ready".to_vec() ) );
  return Ok(());
}

#[tokio::test]
async fn stream_start_without_a_board_keeps_serving() -> io::Result<()> {
  let board = Arc::new( FakeBoard::new() );
  let ( conn, client ) = setup( board.clone() ).await?;

  send( &client, &conn, b"/stream/start" ).await?;
  assert!( eventually(|| board.count( &Call::StreamStart ) == 1 ).await );
  assert_eq!( board.state(), BoardState::Idle );

  send( &client, &conn, b"/connect/begin" ).await?;
  assert_eq!( recv_within( &client, Duration::from_secs( 1 ) ).await, Some( b"ready".to_vec() ) );
  return Ok(());
}

#[tokio::test]
async fn connect_end_stops_all_outbound_datagrams() -> io::Result<()> {
  let board = Arc::new( FakeBoard::new() );
  let ( conn, client ) = setup( board.clone() ).await?;

  send( &client, &conn, b"/connect/begin" ).await?;
  assert!( recv_within( &client, Duration::from_secs( 1 ) ).await.is_some() );
  send( &client, &conn, b"/stream/start" ).await?;
  assert!( eventually(|| board.state() == BoardState::Streaming ).await );

  send( &client, &conn, b"/connect/end" ).await?;
  assert!( eventually(|| board.state() == BoardState::Idle ).await );
  assert_eq!( board.count( &Call::Disconnect ), 1 );

  assert!( ! board.push_sample( sample( 1 ) ) );
  assert_eq!( recv_within( &client, Duration::from_millis( 200 ) ).await, None );
  return Ok(());
}

#[tokio::test]
async fn an_unrecognized_payload_disconnects_like_connect_end() -> io::Result<()> {
  let board = Arc::new( FakeBoard::new() );
  let ( conn, client ) = setup( board.clone() ).await?;

  send( &client, &conn, b"/connect/begin" ).await?;
  assert!( recv_within( &client, Duration::from_secs( 1 ) ).await.is_some() );

  send( &client, &conn, b"hello" ).await?;
  assert!( eventually(|| board.count( &Call::Disconnect ) == 1 ).await );
  assert_eq!( board.state(), BoardState::Idle );
  return Ok(());
}

#[tokio::test]
async fn a_disconnect_mid_workflow_suppresses_the_ready_notice() -> io::Result<()> {
  capture_log();
  let board = Arc::new( FakeBoard::new().never_ready() );
  let ( conn, client ) = setup( board.clone() ).await?;

  send( &client, &conn, b"/connect/begin" ).await?;
  assert!( eventually(|| board.state() == BoardState::Connected ).await );

  send( &client, &conn, b"/connect/end" ).await?;
  assert!( eventually(|| board.state() == BoardState::Idle ).await );
  assert!( logged( "Cancelled the connect workflow while Connected" ) >= 1 );

  assert_eq!( recv_within( &client, Duration::from_millis( 200 ) ).await, None );
  return Ok(());
}

#[tokio::test]
async fn a_sample_after_connect_end_is_logged_locally() -> io::Result<()> {
  capture_log();
  let board = Arc::new( FakeBoard::new().lingering_link() );
  let ( conn, client ) = setup( board.clone() ).await?;

  send( &client, &conn, b"/connect/begin" ).await?;
  assert_eq!( recv_within( &client, Duration::from_secs( 1 ) ).await, Some( b"ready".to_vec() ) );
  send( &client, &conn, b"/stream/start" ).await?;
  assert!( eventually(|| board.state() == BoardState::Streaming ).await );

  send( &client, &conn, b"/connect/end" ).await?;
  assert!( eventually(|| board.count( &Call::Disconnect ) == 1 ).await );

  assert!( board.push_sample( sample( 213 ) ) );
  assert!( eventually(|| logged( "sample #213 t=" ) == 1 ).await );

  assert_eq!( recv_within( &client, Duration::from_millis( 200 ) ).await, None );
  assert_eq!( logged( "sample #213 t=" ), 1 );
  return Ok(());
}

#[tokio::test]
async fn a_failed_disconnect_is_logged_and_serving_continues() -> io::Result<()> {
  capture_log();
  let board = Arc::new( FakeBoard::new().failing_disconnect() );
  let ( conn, client ) = setup( board.clone() ).await?;

  send( &client, &conn, b"/connect/begin" ).await?;
  assert_eq!( recv_within( &client, Duration::from_secs( 1 ) ).await, Some( b"ready".to_vec() ) );

  send( &client, &conn, b"/connect/end" ).await?;
  assert!( eventually(|| board.count( &Call::Disconnect ) == 1 ).await );
  assert!( eventually(|| logged( "Cannot disconnect board: the board link is closed" ) >= 1 ).await );

  send( &client, &conn, b"/connect/begin" ).await?;
  assert_eq!( recv_within( &client, Duration::from_secs( 1 ) ).await, Some( b"ready".to_vec() ) );
  return Ok(());
}

#[tokio::test]
async fn shutdown_disconnects_the_board() -> io::Result<()> {
  let board = Arc::new( FakeBoard::new() );
  let ( mut conn, client ) = setup( board.clone() ).await?;

  send( &client, &conn, b"/connect/begin" ).await?;
  assert!( recv_within( &client, Duration::from_secs( 1 ) ).await.is_some() );

  conn.shutdown();
  timeout( Duration::from_secs( 1 ), conn.join() ).await??;

  assert_eq!( board.calls().last(), Some( &Call::Disconnect ) );
  assert_eq!( board.state(), BoardState::Idle );
  return Ok(());
}

#[tokio::test]
async fn relays_simulator_samples_end_to_end() -> io::Result<()> {
  let board = Arc::new( OpenBci::new().sample_rate( 500 ) );
  let conn =
    Listener::new( board.clone() )
      .address( localhost() )
      .serial_port( Some( SIMULATOR_PORT_NAME.to_string() ) )
      .serve().await?;
  let client = UdpSocket::bind( localhost() ).await?;

  send( &client, &conn, b"/connect/begin" ).await?;
  assert_eq!( recv_within( &client, Duration::from_secs( 2 ) ).await, Some( b"ready".to_vec() ) );

  send( &client, &conn, b"/stream/start" ).await?;

  let mut numbers = Vec::new();
  for _ in 0..3 {
    let payload = recv_within( &client, Duration::from_secs( 2 ) ).await.unwrap();
    let sample = Sample::from_bytes( &payload ).unwrap();
    assert_eq!( sample.aux_data, [ 0.0, 0.0, 1.0 ] );
    numbers.push( sample.sample_number );
  }

  assert_eq!( numbers, vec![ 0, 1, 2 ] );

  send( &client, &conn, b"/connect/end" ).await?;
  assert!( eventually(|| board.state() == BoardState::Idle ).await );
  return Ok(());
}
