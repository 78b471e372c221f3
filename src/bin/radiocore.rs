// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CLI entry point: parses a `ReceiverConfig` from the command line,
//! binds the data/status sockets, and runs one channel until shutdown.

use clap::Parser;
use radiocore::config::ReceiverConfig;
use radiocore::demod::DemodType;
use radiocore::tuning::FrontEnd;
use radiocore::Receiver;
use std::net::UdpSocket;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "radiocore", about = "Channelizing SDR receiver core")]
struct Args {
    /// Multicast/unicast address:port carrying the raw I/Q input stream.
    #[arg(long, default_value = "0.0.0.0:5004")]
    data_in: String,

    /// Address:port to send demodulated audio to.
    #[arg(long, default_value = "127.0.0.1:5007")]
    data_out: String,

    /// Local address:port to send audio from.
    #[arg(long, default_value = "0.0.0.0:0")]
    data_out_bind: String,

    /// Address:port to receive command packets on.
    #[arg(long, default_value = "0.0.0.0:5005")]
    status_in: String,

    /// Address:port to send status packets to.
    #[arg(long, default_value = "127.0.0.1:5006")]
    status_out: String,

    /// Local address:port to send status packets from.
    #[arg(long, default_value = "0.0.0.0:0")]
    status_out_bind: String,

    /// linear|am|fm
    #[arg(long, default_value = "fm")]
    demod: String,

    #[arg(long, default_value_t = -8000.0)]
    low_edge: f32,

    #[arg(long, default_value_t = 8000.0)]
    high_edge: f32,

    #[arg(long, default_value_t = 3)]
    verbosity: usize,
}

/// No physical device is addressed by this core; logs the retune
/// request so an external device-control process (out of scope, per
/// SPEC_FULL §1) can pick it up from the log or a future IPC hook.
struct LoggingFrontEnd;

impl FrontEnd for LoggingFrontEnd {
    fn set_first_lo(&self, hz: f64) {
        log::info!("front end: set first LO to {hz} Hz");
    }
}

fn main() -> radiocore::Result<()> {
    let args = Args::parse();

    stderrlog::new()
        .module(module_path!())
        .verbosity(args.verbosity)
        .init()
        .expect("failed to initialize logger");

    let demod_type = match args.demod.as_str() {
        "fm" => DemodType::Fm,
        "am" => DemodType::Am,
        _ => DemodType::Linear,
    };

    let config = ReceiverConfig {
        demod_type,
        low_edge: args.low_edge,
        high_edge: args.high_edge,
        ..ReceiverConfig::default()
    };

    let front_end = Arc::new(LoggingFrontEnd);
    let receiver = Receiver::new(config, front_end);

    let data_in = UdpSocket::bind(&args.data_in)?;
    let data_out_socket = UdpSocket::bind(&args.data_out_bind)?;
    let data_out_addr = args.data_out.parse().map_err(radiocore::RadioError::AddrParse)?;
    let status_in = UdpSocket::bind(&args.status_in)?;
    let status_out_socket = UdpSocket::bind(&args.status_out_bind)?;
    let status_out_addr = args.status_out.parse().map_err(radiocore::RadioError::AddrParse)?;

    let shutdown_receiver = receiver.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        shutdown_receiver.request_shutdown();
    })
    .expect("failed to install signal handler");

    log::info!("radiocore listening for I/Q on {}", args.data_in);
    let handles = receiver.spawn(data_in, data_out_socket, data_out_addr, status_in, status_out_socket, status_out_addr);
    for h in handles {
        let _ = h.join();
    }
    Ok(())
}
