// src/server/port_file.rs

//! The port file a client library polls to find the daemon's ephemeral port.
//!
//! Format: `sock=<port>` on the first line, then a line holding `EOF` so a
//! reader can tell a complete file from a partially written one.

use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::Path;

/// Writes the port file through a temporary sibling and a rename, so readers
/// never observe a half-written file.
pub fn write_port_file(path: &Path, port: u16) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");

    fs::write(&tmp, format!("sock={port}\nEOF\n"))
        .with_context(|| format!("Failed to write port file '{}'", path.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move port file into place at '{}'", path.display()))?;
    Ok(())
}

/// Parses a complete port file and returns the port it names.
pub fn read_port_file(path: &Path) -> Result<u16> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read port file '{}'", path.display()))?;

    let mut port = None;
    let mut complete = false;
    for line in contents.lines() {
        if line == "EOF" {
            complete = true;
            break;
        }
        if let Some(value) = line.strip_prefix("sock=") {
            port = Some(
                value
                    .parse::<u16>()
                    .with_context(|| format!("Invalid port '{value}' in port file"))?,
            );
        }
    }

    if !complete {
        return Err(anyhow!("Port file '{}' is incomplete", path.display()));
    }
    port.ok_or_else(|| anyhow!("Port file '{}' names no port", path.display()))
}
