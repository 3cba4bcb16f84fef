//! The relay service host, used by `main`.
use std::io;
use std::net::{ IpAddr, Ipv4Addr, SocketAddr };
use std::sync::Arc;

use tokio::time::Duration;

use bci_relay::constants::{ CYTON_SAMPLE_RATE, RELAY_LISTEN_PORT };
use bci_relay::workflow::DEFAULT_READY_TIMEOUT;
use bci_relay::{ Listener, OpenBci };

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Command

/// Defines the command line interface using CLAP.
pub fn command() -> clap::Command {
  clap::Command::new( "bci-relay" )
    .about( "Relays OpenBCI samples to a UDP client on request." )
    .arg( clap::Arg::new( "bind" )
      .long( "bind" )
      .help( "Local address to listen on." )
      .default_value( "0.0.0.0" )
      .value_parser( clap::value_parser!( IpAddr ) ) )
    .arg( clap::Arg::new( "port" )
      .long( "port" )
      .short( 'p' )
      .help( "UDP port for control commands." )
      .default_value( RELAY_LISTEN_PORT.to_string() )
      .value_parser( clap::value_parser!( u16 ) ) )
    .arg( clap::Arg::new( "serial-port" )
      .long( "serial-port" )
      .help( "Serial port of the board. Skips discovery when set." ) )
    .arg( clap::Arg::new( "no-simulator" )
      .long( "no-simulator" )
      .help( "Fail the connect instead of falling back to the simulator." )
      .action( clap::ArgAction::SetTrue ) )
    .arg( clap::Arg::new( "ready-timeout" )
      .long( "ready-timeout" )
      .help( "Seconds to wait for the board to report ready." )
      .default_value( DEFAULT_READY_TIMEOUT.as_secs().to_string() )
      .value_parser( clap::value_parser!( u64 ) ) )
    .arg( clap::Arg::new( "sample-rate" )
      .long( "sample-rate" )
      .help( "Samples per second produced by the simulator." )
      .default_value( CYTON_SAMPLE_RATE.to_string() )
      .value_parser( clap::value_parser!( u32 ).range( 1.. ) ) )
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - App

#[derive( Clone, Debug )]
pub struct App {
  address: SocketAddr,

  // Skips discovery and connects here when set
  serial_port: Option<String>,

  simulator_fallback: bool,
  ready_timeout: Duration,
  sample_rate: u32
}

impl App {
  pub fn from_matches( matches: &clap::ArgMatches ) -> Self {
    let ip = matches.get_one::<IpAddr>( "bind" ).copied().unwrap_or( IpAddr::V4( Ipv4Addr::UNSPECIFIED ) );
    let port = matches.get_one::<u16>( "port" ).copied().unwrap_or( RELAY_LISTEN_PORT );

    let ready_timeout =
      matches.get_one::<u64>( "ready-timeout" )
        .map(| secs |{ Duration::from_secs( *secs ) })
        .unwrap_or( DEFAULT_READY_TIMEOUT );

    return Self{
      address: SocketAddr::new( ip, port ),
      serial_port: matches.get_one::<String>( "serial-port" ).cloned(),
      simulator_fallback: ! matches.get_flag( "no-simulator" ),
      ready_timeout,
      sample_rate: matches.get_one::<u32>( "sample-rate" ).copied().unwrap_or( CYTON_SAMPLE_RATE )
    };
  }

  pub fn address( &self ) -> SocketAddr {
    self.address
  }

  pub fn serial_port( &self ) -> Option<&str> {
    self.serial_port.as_deref()
  }

  pub fn simulator_fallback( &self ) -> bool {
    self.simulator_fallback
  }

  pub fn ready_timeout( &self ) -> Duration {
    self.ready_timeout
  }

  pub fn sample_rate( &self ) -> u32 {
    self.sample_rate
  }

  /// Serves until Ctrl-C or until the listener fails.
  pub async fn run( self ) -> io::Result<()> {
    let board = Arc::new( OpenBci::new().sample_rate( self.sample_rate ) );

    let mut conn =
      Listener::new( board )
        .address( self.address )
        .serial_port( self.serial_port )
        .simulator_fallback( self.simulator_fallback )
        .ready_timeout( self.ready_timeout )
        .serve().await?;

    tokio::select! {
      result = conn.join() => return result,
      signal = tokio::signal::ctrl_c() => signal?
    }

    log::info!( "Interrupted, shutting down" );
    conn.shutdown();
    return conn.join().await;
  }
}
