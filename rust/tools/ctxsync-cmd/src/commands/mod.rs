//! Command implementations for ctxsync-cmd

use anyhow::Result;
use serde::Serialize;

pub mod lock;
pub mod pool;
pub mod race;

/// Prints `report` as pretty JSON, or through `print_text` otherwise.
pub fn emit<R: Serialize>(report: &R, json: bool, print_text: impl FnOnce(&R)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_text(report);
    }
    Ok(())
}
