use super::Context;
use anyhow::{Context as _, Result};
use std::path::PathBuf;

pub async fn run(ctx: Context, hosts_file: Option<PathBuf>) -> Result<()> {
    let engine = ctx.engine(hosts_file)?;
    let summary = engine.down().await.context("Teardown failed")?;

    if !summary.had_record && summary.lan_addresses_released == 0 && !summary.subnet_torn_down {
        println!("Nothing to release");
        return Ok(());
    }

    if summary.lan_addresses_released > 0 {
        println!("  LAN addresses released: {}", summary.lan_addresses_released);
    }
    if summary.subnet_torn_down {
        println!("  Isolated subnet torn down");
    }
    println!("✓ Released");
    Ok(())
}
