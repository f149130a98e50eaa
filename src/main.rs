// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use args::Args;
use clap::Parser;
use fpga_framegrab::{cgi, Access, DevMem, FrameGrabber};
use std::{error::Error, fs::File, io, io::BufWriter};
use tracing::{debug, error};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

mod args;

/// Installs the global subscriber. Logs go to stderr since stdout carries
/// the CGI response.
fn init_logging(args: &Args) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.verbose { "debug" } else { "info" })
    });

    let journald = if args.journald {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer),
            Err(e) => {
                eprintln!("journald unavailable: {e}");
                None
            }
        }
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(journald);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let channel = args.channel()?;
    let config = args.capture_config()?;
    debug!("{:?}", config);

    let mem = DevMem::open(&args.device, Access::ReadWrite)?;
    let grabber = FrameGrabber::new(mem, config)?;
    let frame = grabber.capture(channel)?;

    let header = !args.no_header;
    match &args.output {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            cgi::write_response(&mut out, frame.as_bytes(), header)?;
        }
        None => {
            let mut out = io::stdout().lock();
            cgi::write_response(&mut out, frame.as_bytes(), header)?;
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args)?;

    if let Err(e) = run(&args) {
        error!("{e}");
        return Err(e);
    }
    Ok(())
}
