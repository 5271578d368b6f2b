use clap::Parser;

/// Clean an exchange price history, forecast the next close and write the
/// artefacts next to it.
///
/// Reads `THYAO.csv` from the working directory and writes into
/// `closecast_output/`. Set `RUST_LOG` to change verbosity.
#[derive(Parser, Debug)]
#[command(name = "closecast", version)]
pub struct Cli {}
