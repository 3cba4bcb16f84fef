//! Starts the OpenBCI relay service.
use std::process::ExitCode;

use bci_relay_cli::App;

// - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - Main

#[tokio::main( flavor="current_thread" )]
async fn main() -> ExitCode {
  env_logger::Builder::from_env( env_logger::Env::default().default_filter_or( "info" ) ).init();

  let matches = bci_relay_cli::command().get_matches();

  match App::from_matches( &matches ).run().await {
    Ok(()) => ExitCode::SUCCESS,
    Err( err ) => {
      log::error!( "{err}" );
      ExitCode::FAILURE
    }
  }
}
