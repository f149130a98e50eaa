// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use fpga_framegrab::{cgi, CaptureConfig, CaptureError};
use std::path::PathBuf;

/// Command-line arguments for the FPGA frame grabber.
///
/// Every option can also be given through the environment, which is how the
/// grabber is configured when it runs as a CGI program.
///
/// # Example
///
/// ```bash
/// # Write channel 2 to a file
/// fpga-framegrab --channel 2 --no-header --output frame.jpeg
///
/// # As a CGI program, taking the channel from the request
/// QUERY_STRING="ch=1&t=155000000&ext=.jpeg" fpga-framegrab --cgi-query
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Physical memory device
    #[arg(short, long, env = "DEVMEM", default_value = "/dev/mem")]
    pub device: PathBuf,

    /// Capture channel index
    #[arg(short, long, env = "CHANNEL", default_value = "1")]
    pub channel: u32,

    /// Take the channel from the CGI query string instead of --channel
    #[arg(long)]
    pub cgi_query: bool,

    /// CGI query string (e.g. ch=1&t=155000000&ext=.jpeg)
    #[arg(long, env = "QUERY_STRING", hide_env_values = true)]
    pub query_string: Option<String>,

    /// JSON hardware profile with the register layout and frame limits
    #[arg(long, env = "REGISTER_LAYOUT")]
    pub layout: Option<PathBuf>,

    /// Physical base address of the capture register block
    #[arg(long, env = "BASE_ADDRESS", value_parser = parse_address)]
    pub base_address: Option<u64>,

    /// Largest accepted frame payload in bytes
    #[arg(long, env = "MAX_FRAME_SIZE")]
    pub max_frame_size: Option<usize>,

    /// Write the image to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Omit the Content-type header
    #[arg(long)]
    pub no_header: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Also log to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,
}

impl Args {
    /// Resolves the channel to capture.
    pub fn channel(&self) -> Result<u32, CaptureError> {
        if !self.cgi_query {
            return Ok(self.channel);
        }
        match &self.query_string {
            Some(query) => cgi::channel_from_query(query),
            None => Err(CaptureError::Query("QUERY_STRING is not set".to_string())),
        }
    }

    /// Builds the capture configuration from the profile and overrides.
    pub fn capture_config(&self) -> Result<CaptureConfig, CaptureError> {
        let mut config = match &self.layout {
            Some(path) => CaptureConfig::from_path(path)?,
            None => CaptureConfig::default(),
        };
        if let Some(base) = self.base_address {
            config.layout.base_address = base;
        }
        if let Some(max) = self.max_frame_size {
            config.max_frame_size = max;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Accepts `0x`-prefixed hexadecimal or plain decimal addresses.
fn parse_address(s: &str) -> Result<u64, String> {
    let s = s.trim().replace('_', "");
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("invalid address {s:?}: {err}"))
}
