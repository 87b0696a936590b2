use super::Context;
use anyhow::Result;

pub async fn run(mut ctx: Context, count: usize, interface: Option<String>) -> Result<()> {
    if interface.is_some() {
        ctx.config.lan.interface = interface;
    }

    let engine = ctx.engine(None)?;
    let lan = engine.lan();
    let desc = lan.network_details().await?;

    println!(
        "Scanning {} on {} from host {} ...",
        desc.network, desc.interface_name, ctx.config.lan.scan_offset
    );
    let free = lan.find_free_ips(&desc, count).await?;

    if free.is_empty() {
        println!("No free addresses found");
    } else {
        for address in &free {
            println!("  {address}");
        }
        println!("✓ Found {} of {} free addresses", free.len(), count);
    }
    Ok(())
}
