//! A synthetic board used when no hardware is attached.
use std::f32::consts::TAU;

use tokio::sync::{ mpsc, oneshot };
use tokio::time::{ self, Duration, MissedTickBehavior };

use crate::board::{ BoardCommand, BoardError, publish };
use crate::constants::{ CYTON_AUX_COUNT, CYTON_CHANNEL_COUNT };
use crate::sample::Sample;

/// How long the simulator "boots" before reporting ready.
pub const SIMULATOR_READY_DELAY: Duration = Duration::from_millis( 50 );

// Peak amplitude of each synthetic channel, in µV.
const AMPLITUDE_UV: f32 = 20.0;

#[derive( Clone, Copy, Debug )]
pub struct Simulator {
  sample_rate: u32
}

impl Simulator {
  pub fn new( sample_rate: u32 ) -> Self {
    return Self{ sample_rate: sample_rate.max( 1 ) };
  }

  /// Runs the simulated link until `command_rx` closes.
  pub async fn run(
    self,
    mut command_rx: mpsc::Receiver<BoardCommand>,
    ready_tx: oneshot::Sender<()>,
    samples_tx: mpsc::Sender<Sample>
  ) -> Result<(),BoardError> {
    time::sleep( SIMULATOR_READY_DELAY ).await;
    let _ = ready_tx.send(());

    let mut ticker = time::interval( Duration::from_secs_f64( 1.0 / self.sample_rate as f64 ) );
    ticker.set_missed_tick_behavior( MissedTickBehavior::Delay );

    let mut sample_number: u8 = 0;
    let mut streaming = false;
    let mut tick: u64 = 0;

    loop {
      tokio::select! {
        command = command_rx.recv() => match command {
          Some( BoardCommand::StreamStart ) => streaming = true,
          Some( BoardCommand::StreamStop ) => streaming = false,
          None => return Ok(())
        },

        _ = ticker.tick(), if streaming => {
          publish( &samples_tx, self.synthesize( sample_number, tick ) )?;
          sample_number = sample_number.wrapping_add( 1 );
          tick += 1;
        }
      }
    }
  }

  /// Produces the `tick`-th sample: channel `n` is a sine wave at `n + 8` Hz,
  /// and the accelerometer reads 1 g on the z axis.
  pub fn synthesize( &self, sample_number: u8, tick: u64 ) -> Sample {
    let seconds = ( tick as f64 / self.sample_rate as f64 ) as f32;
    let mut channel_data = [0f32; CYTON_CHANNEL_COUNT];

    for ( channel, value ) in channel_data.iter_mut().enumerate() {
      let frequency = channel as f32 + 8.0;
      *value = AMPLITUDE_UV * ( TAU * frequency * seconds ).sin();
    }

    let mut aux_data = [0f32; CYTON_AUX_COUNT];
    aux_data[2] = 1.0;

    return Sample::new( sample_number, channel_data, aux_data );
  }
}

#[cfg( test )]
mod tests {
  use super::*;

  #[test]
  fn synthesizes_bounded_sine_waves() {
    let simulator = Simulator::new( 250 );

    let first = simulator.synthesize( 0, 0 );
    assert_eq!( first.channel_data, [0.0; CYTON_CHANNEL_COUNT] );
    assert_eq!( first.aux_data, [ 0.0, 0.0, 1.0 ] );

    for tick in 1..500 {
      let sample = simulator.synthesize( tick as u8, tick );
      assert!( sample.channel_data.iter().all(| value |{ value.abs() <= AMPLITUDE_UV }) );
    }
  }

  #[test]
  fn clamps_a_zero_sample_rate() {
    let sample = Simulator::new( 0 ).synthesize( 0, 1 );
    assert!( sample.channel_data.iter().all(| value |{ value.is_finite() }) );
  }
}
