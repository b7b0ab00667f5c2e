//! Identity command implementation.

use anyhow::Result;
use memsnap_core::{Process, Transport};

use crate::cli::TargetArgs;
use crate::target;

pub fn run(target: &TargetArgs, prefer: Transport) -> Result<()> {
    let process = target::open(target, prefer)?;
    println!("Identity:    {}", process.identity()?);
    println!("Base offset: {:#x}", process.base_offset()?);
    Ok(())
}
