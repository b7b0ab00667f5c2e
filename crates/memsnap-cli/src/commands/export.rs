//! Rendering of captures as text, JSON or TSV.

use std::fmt::Write;
use std::path::Path;

use anyhow::Result;

use super::snapshot::Capture;
use crate::cli::OutputFormat;

pub fn render(format: OutputFormat, capture: &Capture) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => generate_text(capture),
        OutputFormat::Json => generate_json(capture)?,
        OutputFormat::Tsv => generate_tsv(capture),
    })
}

pub fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, content)?;
        eprintln!("Exported to: {}", path.display());
    } else {
        println!("{}", content);
    }
    Ok(())
}

pub fn generate_text(capture: &Capture) -> String {
    let world = &capture.world;
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", capture.version, capture.identity);
    let _ = writeln!(
        out,
        "World '{}' tick {} phase {}",
        world.name, world.tick, world.phase
    );
    let _ = writeln!(
        out,
        "  online: {}  ranked: {}  modded: {}",
        world.status.online, world.status.ranked, world.status.modded
    );
    if let Some(player) = world.leader.as_ref().and_then(|l| l.get()) {
        let perks: Vec<String> = player.perks.iter_set().map(|p| p.to_string()).collect();
        let _ = writeln!(
            out,
            "  leader: {} ({} gold) [{}]",
            player.name,
            player.gold,
            perks.join(", ")
        );
    }
    let _ = writeln!(out, "  units: {}", world.units.iter().flatten().count());
    for unit in world.units.iter().flatten() {
        let base = unit.unit();
        let _ = write!(out, "    #{} {} hp {}", base.id, unit.kind(), base.hp);
        if let Some(detail) = unit.detail() {
            let _ = write!(out, " ({})", detail);
        }
        let _ = writeln!(out);
    }
    for (item, amount) in &world.stock {
        let _ = writeln!(out, "  stock {}: {}", item, amount);
    }
    let _ = write!(
        out,
        "{} batches, {} bytes, {:?}",
        capture.stats.batches, capture.stats.bytes, capture.stats.elapsed
    );
    out
}

pub fn generate_json(capture: &Capture) -> Result<String> {
    Ok(serde_json::to_string_pretty(capture)?)
}

/// One row per unit.
pub fn generate_tsv(capture: &Capture) -> String {
    let mut out = String::from("tick\tkind\tid\thp\towner\tdetail");
    for unit in capture.world.units.iter().flatten() {
        let base = unit.unit();
        let owner = base
            .owner
            .as_ref()
            .map(|o| format!("{:#x}", o.address()))
            .unwrap_or_default();
        let detail = unit.detail().map(|d| d.to_string()).unwrap_or_default();
        let _ = write!(
            out,
            "\n{}\t{}\t{}\t{}\t{}\t{}",
            capture.world.tick,
            unit.kind(),
            base.id,
            base.hp,
            owner,
            detail
        );
    }
    out
}
