//! One reading set from the board and its outbound wire format.
use std::fmt;
use std::time::{ SystemTime, UNIX_EPOCH };

use zerocopy::byteorder::little_endian::{ F32, U64 };
use zerocopy::{ FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned };

use crate::constants::{ CYTON_AUX_COUNT, CYTON_CHANNEL_COUNT };

/// Size of an encoded sample datagram.
pub const SAMPLE_BYTES: usize = std::mem::size_of::<SamplePacket>();

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Sample

#[derive( Clone, Copy, Debug, Default, PartialEq )]
pub struct Sample {
  /// Wrapping counter assigned by the board.
  pub sample_number: u8,

  /// Channel readings in µV.
  pub channel_data: [f32; CYTON_CHANNEL_COUNT],

  /// Accelerometer readings in g. Zero when the board sends no aux data.
  pub aux_data: [f32; CYTON_AUX_COUNT],

  /// Milliseconds since the Unix epoch at which the sample was decoded.
  pub timestamp: u64
}

impl Sample {
  pub fn new( sample_number: u8, channel_data: [f32; CYTON_CHANNEL_COUNT], aux_data: [f32; CYTON_AUX_COUNT] ) -> Self {
    return Self{ sample_number, channel_data, aux_data, timestamp: now_millis() };
  }

  /// Encodes the sample as a little-endian datagram payload.
  pub fn to_bytes( &self ) -> [u8; SAMPLE_BYTES] {
    let packet = SamplePacket{
      timestamp: U64::new( self.timestamp ),
      sample_number: self.sample_number,
      channel_data: self.channel_data.map( F32::new ),
      aux_data: self.aux_data.map( F32::new )
    };

    let mut bytes = [0u8; SAMPLE_BYTES];
    bytes.copy_from_slice( packet.as_bytes() );
    return bytes;
  }

  /// Decodes a datagram payload produced by `to_bytes`. Returns `None` when
  /// `bytes` is not exactly one packet long.
  pub fn from_bytes( bytes: &[u8] ) -> Option<Sample> {
    let packet = SamplePacket::read_from_bytes( bytes ).ok()?;

    return Some( Sample{
      sample_number: packet.sample_number,
      channel_data: packet.channel_data.map(| value |{ value.get() }),
      aux_data: packet.aux_data.map(| value |{ value.get() }),
      timestamp: packet.timestamp.get()
    });
  }
}

impl fmt::Display for Sample {
  fn fmt( &self, f: &mut fmt::Formatter ) -> fmt::Result {
    write!( f, "sample #{:<3} t={} channels=[", self.sample_number, self.timestamp )?;

    for ( index, value ) in self.channel_data.iter().enumerate() {
      if index > 0 { write!( f, ", " )?; }
      write!( f, "{value:.3}" )?;
    }

    return write!( f, "] aux=[{:.3}, {:.3}, {:.3}]", self.aux_data[0], self.aux_data[1], self.aux_data[2] );
  }
}

// Wire layout. Every field is byte-aligned so the packet has no padding.
#[repr( C )]
#[derive( FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned )]
struct SamplePacket {
  timestamp: U64,
  sample_number: u8,
  channel_data: [F32; CYTON_CHANNEL_COUNT],
  aux_data: [F32; CYTON_AUX_COUNT]
}

pub(crate) fn now_millis() -> u64 {
  SystemTime::now()
    .duration_since( UNIX_EPOCH )
    .map(| elapsed |{ elapsed.as_millis() as u64 })
    .unwrap_or( 0 )
}

#[cfg( test )]
mod tests {
  use super::*;

  #[test]
  fn encodes_a_fixed_size_little_endian_packet() {
    let sample = Sample{
      sample_number: 7,
      channel_data: [ 1.0, -2.5, 0.0, 0.0, 0.0, 0.0, 0.0, 100.25 ],
      aux_data: [ 0.5, 0.0, -0.5 ],
      timestamp: 0x0102_0304
    };

    let bytes = sample.to_bytes();
    assert_eq!( SAMPLE_BYTES, 53 );
    assert_eq!( &bytes[0..8], &0x0102_0304u64.to_le_bytes() );
    assert_eq!( bytes[8], 7 );
    assert_eq!( &bytes[9..13], &1.0f32.to_le_bytes() );
    assert_eq!( &bytes[41..45], &0.5f32.to_le_bytes() );

    assert_eq!( Sample::from_bytes( &bytes ), Some( sample ) );
  }

  #[test]
  fn rejects_a_short_payload() {
    assert_eq!( Sample::from_bytes( b"ready" ), None );
  }
}
