//! The OpenBCI Cyton adapter. Talks to a physical board over its serial
//! dongle, or to the built-in simulator when connected to
//! `SIMULATOR_PORT_NAME`.
use parking_lot::Mutex;
use tokio::io::{ AsyncReadExt, AsyncWriteExt };
use tokio::sync::mpsc::{ self, error::TrySendError };
use tokio::sync::oneshot;
use tokio_serial::{ SerialPortBuilderExt, SerialPortInfo, SerialPortType, SerialStream };

use crate::board::simulator::Simulator;
use crate::board::{ Board, BoardCommand, BoardError, BoardState, Link, publish };
use crate::constants::*;
use crate::sample::Sample;

// Bytes of boot banner kept while waiting for the ready marker.
const BANNER_LIMIT: usize = 1024;

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - OpenBci

pub struct OpenBci {
  /// Capacity of each link's sample channel.
  capacity: usize,

  /// Rate at which the simulator produces samples.
  sample_rate: u32,

  inner: Mutex<Inner>
}

struct Inner {
  state: BoardState,

  // Commands for the current link's I/O task. Dropping it ends the task.
  command_tx: Option<mpsc::Sender<BoardCommand>>
}

impl OpenBci {
  pub fn new() -> Self {
    return Self{
      capacity: RELAY_SAMPLE_CAPACITY,
      sample_rate: CYTON_SAMPLE_RATE,
      inner: Mutex::new( Inner{ state: BoardState::Idle, command_tx: None } )
    };
  }

  // Overrides the sample channel capacity of future links.
  pub fn capacity( mut self, capacity: usize ) -> Self {
    self.capacity = capacity.max( 1 );
    return self;
  }

  // Overrides the simulator's sample rate.
  pub fn sample_rate( mut self, sample_rate: u32 ) -> Self {
    self.sample_rate = sample_rate.max( 1 );
    return self;
  }
}

impl Default for OpenBci {
  fn default() -> Self {
    Self::new()
  }
}

impl Board for OpenBci {
  async fn discover( &self ) -> Result<String,BoardError> {
    let ports =
      tokio::task::spawn_blocking( tokio_serial::available_ports ).await
        .map_err(|_|{ BoardError::Closed })??;

    return find_cyton_port( &ports ).ok_or( BoardError::NotFound );
  }

  async fn connect( &self, port_name: &str ) -> Result<Link,BoardError> {
    let ( command_tx, command_rx ) = mpsc::channel::<BoardCommand>( 16 );
    let ( ready_tx, ready ) = oneshot::channel();
    let ( samples_tx, samples ) = mpsc::channel::<Sample>( self.capacity );

    if port_name == SIMULATOR_PORT_NAME {
      log::info!( "Connecting to the OpenBCI simulator at {} Hz", self.sample_rate );
      let simulator = Simulator::new( self.sample_rate );

      tokio::spawn( async move {
        if let Err( err ) = simulator.run( command_rx, ready_tx, samples_tx ).await {
          log::warn!( "Simulator link ended: {err}" );
        }
      });
    } else {
      log::info!( "Opening serial port {port_name} at {CYTON_BAUD_RATE} baud" );
      let port = tokio_serial::new( port_name, CYTON_BAUD_RATE ).open_native_async()?;
      let name = port_name.to_string();

      tokio::spawn( async move {
        if let Err( err ) = run_serial( port, command_rx, ready_tx, samples_tx ).await {
          log::error!( "Serial link to {name} ended: {err}" );
        }
      });
    }

    let previous = {
      let mut inner = self.inner.lock();
      inner.state = BoardState::Connected;
      inner.command_tx.replace( command_tx )
    };

    if previous.is_some() {
      log::warn!( "Replaced an existing board link" );
    }

    return Ok( Link{ ready, samples } );
  }

  fn disconnect( &self ) -> Result<(),BoardError> {
    let mut inner = self.inner.lock();

    if inner.state != BoardState::Idle {
      log::info!( "Disconnecting board" );
    }

    inner.reset();
    return Ok(());
  }

  fn stream_start( &self ) -> Result<(),BoardError> {
    let mut inner = self.inner.lock();

    match inner.state {
      BoardState::Idle => Err( BoardError::NotConnected ),
      BoardState::Streaming => Ok(()),
      BoardState::Connected => {
        inner.send( BoardCommand::StreamStart )?;
        inner.state = BoardState::Streaming;
        Ok(())
      }
    }
  }

  fn stream_stop( &self ) -> Result<(),BoardError> {
    let mut inner = self.inner.lock();

    if inner.state == BoardState::Streaming {
      inner.state = BoardState::Connected;
      inner.send( BoardCommand::StreamStop )?;
    }

    return Ok(());
  }

  fn state( &self ) -> BoardState {
    self.inner.lock().state
  }
}

impl Inner {
  fn send( &mut self, command: BoardCommand ) -> Result<(),BoardError> {
    let Some( command_tx ) = self.command_tx.as_ref() else {
      return Err( BoardError::NotConnected );
    };

    match command_tx.try_send( command ) {
      Ok(()) => Ok(()),
      Err( TrySendError::Full( _ ) ) => Err( BoardError::Busy ),
      Err( TrySendError::Closed( _ ) ) => {
        // The link's task is gone, so the board is effectively idle.
        self.reset();
        Err( BoardError::Closed )
      }
    }
  }

  fn reset( &mut self ) {
    self.state = BoardState::Idle;
    self.command_tx = None;
  }
}

/// Picks the first port that looks like an OpenBCI dongle: an FTDI USB
/// device, or a port named like a USB serial adapter.
pub fn find_cyton_port( ports: &[SerialPortInfo] ) -> Option<String> {
  ports.iter()
    .find(| port |{
      let is_ftdi = matches!( &port.port_type, SerialPortType::UsbPort( usb ) if usb.vid == CYTON_FTDI_VENDOR_ID );
      is_ftdi || port.port_name.contains( "usbserial" ) || port.port_name.contains( "ttyUSB" )
    })
    .map(| port |{ port.port_name.clone() })
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Serial link

async fn run_serial(
  mut port: SerialStream,
  mut command_rx: mpsc::Receiver<BoardCommand>,
  ready_tx: oneshot::Sender<()>,
  samples_tx: mpsc::Sender<Sample>
) -> Result<(),BoardError> {
  let mut banner: Vec<u8> = Vec::new();
  let mut buf = [0u8; 256];
  let mut parser = PacketParser::new();
  let mut ready_tx = Some( ready_tx );
  let mut streaming = false;

  // A soft reset makes the board print its banner, ending with `$$$`.
  port.write_all( &[CYTON_COMMAND_RESET] ).await?;

  loop {
    tokio::select! {
      command = command_rx.recv() => match command {
        Some( BoardCommand::StreamStart ) => {
          streaming = true;

          // Deferred until ready when the board is still booting
          if ready_tx.is_none() {
            port.write_all( &[CYTON_COMMAND_STREAM_START] ).await?;
          }
        },

        Some( BoardCommand::StreamStop ) => {
          streaming = false;
          port.write_all( &[CYTON_COMMAND_STREAM_STOP] ).await?;
        },

        None => {
          if streaming {
            port.write_all( &[CYTON_COMMAND_STREAM_STOP] ).await?;
          }

          return Ok(());
        }
      },

      read = port.read( &mut buf ) => {
        let length = read?;

        if length == 0 {
          return Err( BoardError::Closed );
        }

        if ready_tx.is_some() {
          banner.extend_from_slice( &buf[..length] );

          if contains_ready_marker( &banner ) {
            log::info!( "Board is ready" );
            banner.clear();

            if let Some( ready_tx ) = ready_tx.take() {
              let _ = ready_tx.send(());
            }

            if streaming {
              port.write_all( &[CYTON_COMMAND_STREAM_START] ).await?;
            }
          } else if banner.len() > BANNER_LIMIT {
            banner.drain( ..banner.len() - ( CYTON_READY_MARKER.len() - 1 ) );
          }
        } else {
          for sample in parser.feed( &buf[..length] ) {
            publish( &samples_tx, sample )?;
          }
        }
      }
    }
  }
}

fn contains_ready_marker( bytes: &[u8] ) -> bool {
  bytes.windows( CYTON_READY_MARKER.len() ).any(| window |{ window == CYTON_READY_MARKER })
}

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Packet Parser

/// Frames the Cyton's 33-byte sample packets out of a raw serial stream:
///
/// | Byte | Content |
/// |---|---|
/// | 0 | header `0xA0` |
/// | 1 | sample number |
/// | 2..26 | 8 channels, 24-bit big-endian two's complement |
/// | 26..32 | 3 aux values, 16-bit big-endian |
/// | 32 | footer `0xCn` |
#[derive( Debug, Default )]
pub struct PacketParser {
  pending: Vec<u8>
}

impl PacketParser {
  pub fn new() -> Self {
    return Self{ pending: Vec::with_capacity( CYTON_PACKET_BYTES * 4 ) };
  }

  /// Appends `bytes` and returns every complete packet decoded so far. Bytes
  /// that cannot start a valid packet are skipped.
  pub fn feed( &mut self, bytes: &[u8] ) -> Vec<Sample> {
    self.pending.extend_from_slice( bytes );

    let mut samples = Vec::new();
    let mut start: usize = 0;

    while self.pending.len() - start >= CYTON_PACKET_BYTES {
      let packet = &self.pending[start..start + CYTON_PACKET_BYTES];

      if packet[0] == CYTON_PACKET_HEADER && packet[CYTON_PACKET_BYTES - 1] & 0xF0 == CYTON_PACKET_FOOTER {
        samples.push( decode_packet( packet ) );
        start += CYTON_PACKET_BYTES;
      } else {
        start += 1;
      }
    }

    self.pending.drain( ..start );
    return samples;
  }
}

fn decode_packet( packet: &[u8] ) -> Sample {
  let mut channel_data = [0f32; CYTON_CHANNEL_COUNT];
  let mut aux_data = [0f32; CYTON_AUX_COUNT];

  for ( channel, value ) in channel_data.iter_mut().enumerate() {
    let offset = 2 + channel * 3;
    // Sign-extends the 24-bit count through the arithmetic shift
    let count = i32::from_be_bytes([ packet[offset], packet[offset + 1], packet[offset + 2], 0 ]) >> 8;
    *value = count as f32 * CYTON_SCALE_CHANNEL_UV;
  }

  // Only the standard footer carries accelerometer data
  if packet[CYTON_PACKET_BYTES - 1] == CYTON_PACKET_FOOTER {
    for ( axis, value ) in aux_data.iter_mut().enumerate() {
      let offset = 26 + axis * 2;
      let count = i16::from_be_bytes([ packet[offset], packet[offset + 1] ]);
      *value = count as f32 * CYTON_SCALE_ACCEL_G;
    }
  }

  return Sample::new( packet[1], channel_data, aux_data );
}

#[cfg( test )]
mod tests {
  use super::*;

  fn packet( sample_number: u8, channel_counts: [i32; 8], accel: [i16; 3], footer: u8 ) -> Vec<u8> {
    let mut bytes = vec![ CYTON_PACKET_HEADER, sample_number ];

    for count in channel_counts {
      bytes.extend_from_slice( &count.to_be_bytes()[1..4] );
    }

    for count in accel {
      bytes.extend_from_slice( &count.to_be_bytes() );
    }

    bytes.push( footer );
    bytes
  }

  #[test]
  fn decodes_a_standard_packet() {
    let bytes = packet( 42, [ 1, -1, 8_388_607, -8_388_608, 0, 0, 0, 0 ], [ 16, -16, 0 ], 0xC0 );
    let samples = PacketParser::new().feed( &bytes );

    assert_eq!( samples.len(), 1 );
    let sample = samples[0];
    assert_eq!( sample.sample_number, 42 );
    assert_eq!( sample.channel_data[0], CYTON_SCALE_CHANNEL_UV );
    assert_eq!( sample.channel_data[1], -CYTON_SCALE_CHANNEL_UV );
    assert!( ( sample.channel_data[2] - 187_500.0 ).abs() < 1.0 );
    assert!( ( sample.channel_data[3] + 187_500.0 ).abs() < 1.0 );
    assert_eq!( sample.aux_data, [ 0.002, -0.002, 0.0 ] );
  }

  #[test]
  fn ignores_aux_data_for_non_standard_footers() {
    let bytes = packet( 1, [0; 8], [ 16, 16, 16 ], 0xC1 );
    let samples = PacketParser::new().feed( &bytes );

    assert_eq!( samples.len(), 1 );
    assert_eq!( samples[0].aux_data, [0.0; 3] );
  }

  #[test]
  fn resynchronises_after_garbage_and_split_reads() {
    let mut stream = b"OpenBCI V3 8-16 channel\n$$$".to_vec();
    stream.extend( packet( 1, [0; 8], [0; 3], 0xC0 ) );
    stream.extend( [ 0xA0, 0x00, 0x13 ] );
    stream.extend( packet( 2, [0; 8], [0; 3], 0xC0 ) );

    let mut parser = PacketParser::new();
    let ( head, tail ) = stream.split_at( 40 );

    let mut samples = parser.feed( head );
    samples.extend( parser.feed( tail ) );

    let numbers: Vec<u8> = samples.iter().map(| sample |{ sample.sample_number }).collect();
    assert_eq!( numbers, vec![ 1, 2 ] );
  }

  #[test]
  fn finds_usb_serial_ports_by_name() {
    let ports = vec![
      SerialPortInfo{ port_name: "/dev/ttyS0".into(), port_type: SerialPortType::Unknown },
      SerialPortInfo{ port_name: "/dev/ttyUSB0".into(), port_type: SerialPortType::Unknown },
    ];

    assert_eq!( find_cyton_port( &ports ), Some( "/dev/ttyUSB0".to_string() ) );
    assert_eq!( find_cyton_port( &ports[..1] ), None );
  }

  #[test]
  fn detects_the_ready_marker() {
    assert!( contains_ready_marker( b"Firmware: v3.1.2\n$$$" ) );
    assert!( ! contains_ready_marker( b"$$" ) );
  }
}
