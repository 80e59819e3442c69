//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Manager for tile controller devices.
#[derive(Debug, Parser)]
#[command(name = "tilemgr", version, about)]
pub struct Cli {
    /// Turn on debug logging.
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Device endpoint: a serial device path or `host[:port]`.
    #[arg(short, long, global = true, default_value = "/dev/ttyUSB0")]
    pub port: String,

    /// Serial baud rate.
    #[arg(short, long, global = true, default_value_t = 115_200)]
    pub baud: u32,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Format the filesystem, install the bootstrap files and restart.
    Init {
        /// Directory holding the bootstrap files (`main.lua`, `init.lua`).
        #[arg(long, default_value = "core")]
        core: PathBuf,
    },

    /// Restart the node.
    Restart,

    /// Open an interactive terminal on the device console.
    Terminal,

    /// List files on the device.
    List,

    /// Copy files to the device. Each argument is `local` or
    /// `local=remote`.
    Copy {
        /// Restart the node after all uploads succeed.
        #[arg(short, long)]
        restart: bool,

        /// Files to upload.
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Remove files from the device.
    Rm {
        /// Names to remove.
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Configure WiFi credentials.
    Wifi {
        /// SSID of the access point.
        ssid: String,
        /// Passphrase for the access point.
        passphrase: String,
    },

    /// Configure the node hostname.
    Hostname {
        /// Name for the node.
        name: String,
    },

    /// Print the chip id.
    Info,
}

/// Split a copy argument into source path and optional remote name.
pub fn split_copy_arg(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once('=') {
        Some((source, remote)) => (source, Some(remote)),
        None => (arg, None),
    }
}
