use super::Context;
use anyhow::{Context as _, Result};

pub async fn run(ctx: &Context) -> Result<()> {
    let engine = ctx.engine(None)?;
    let count = engine
        .lan()
        .refresh_announcements()
        .await
        .context("Announcing failed")?;

    if count == 0 {
        println!("No LAN addresses allocated");
    } else {
        println!("✓ Announced {count} addresses");
    }
    Ok(())
}
