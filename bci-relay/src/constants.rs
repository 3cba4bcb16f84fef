//! Constants that map to the relay control protocol and to the OpenBCI Cyton
//! serial protocol. The Cyton definitions can be found at:
//! https://docs.openbci.com/Cyton/CytonDataFormat/

// Relay control markers
pub const RELAY_COMMAND_STREAM_START: &[u8]  = b"/stream/start";
pub const RELAY_COMMAND_STREAM_STOP: &[u8]   = b"/stream/stop";
pub const RELAY_COMMAND_CONNECT_BEGIN: &[u8] = b"/connect/begin";
pub const RELAY_COMMAND_CONNECT_END: &[u8]   = b"/connect/end";

// Relay outbound notices
pub const RELAY_NOTICE_READY: &[u8] = b"ready";

// Relay network
pub const RELAY_LISTEN_PORT: u16       = 41234;
pub const RELAY_CONTROL_BYTES: usize   = 512;
pub const RELAY_SAMPLE_CAPACITY: usize = 256;

// Cyton command signals
pub const CYTON_COMMAND_RESET: u8        = b'v';
pub const CYTON_COMMAND_STREAM_START: u8 = b'b';
pub const CYTON_COMMAND_STREAM_STOP: u8  = b's';

// Cyton packet framing
pub const CYTON_PACKET_HEADER: u8      = 0xA0;
pub const CYTON_PACKET_FOOTER: u8      = 0xC0;
pub const CYTON_PACKET_BYTES: usize    = 33;
pub const CYTON_READY_MARKER: &[u8]    = b"$$$";

// Cyton serial link
pub const CYTON_BAUD_RATE: u32 = 115_200;
pub const CYTON_FTDI_VENDOR_ID: u16 = 0x0403;

// Cyton sample layout and scaling
pub const CYTON_CHANNEL_COUNT: usize = 8;
pub const CYTON_AUX_COUNT: usize     = 3;
pub const CYTON_SAMPLE_RATE: u32     = 250;

/// Microvolts per count at the default ADS1299 gain of 24.
pub const CYTON_SCALE_CHANNEL_UV: f32 = 4.5 / 24.0 / 8_388_607.0 * 1_000_000.0;

/// Accelerometer g per count.
pub const CYTON_SCALE_ACCEL_G: f32 = 0.002 / 16.0;

// Simulator
pub const SIMULATOR_PORT_NAME: &str = "OpenBCISimulator";
