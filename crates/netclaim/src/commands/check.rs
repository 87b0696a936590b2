use super::Context;
use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use indexmap::IndexMap;
use std::net::IpAddr;

pub async fn run(ctx: &Context) -> Result<()> {
    let engine = ctx.engine(None)?;
    let Some(record) = engine.status() else {
        println!("No allocation");
        return Ok(());
    };

    let candidates: IndexMap<String, _> = record
        .addresses()
        .into_iter()
        .filter_map(|(service, address)| match address {
            IpAddr::V4(v4) => Some((service, v4)),
            IpAddr::V6(_) => None,
        })
        .collect();
    if candidates.is_empty() {
        println!("No addresses allocated, nothing to check");
        return Ok(());
    }

    let lan = engine.lan();
    let desc = lan.network_details().await?;
    let conflicts = lan.detect_conflicts(&desc, &candidates, &record.ports()).await;

    let mut table = Table::new();
    table.set_header(vec!["SERVICE", "ADDRESS", "PORT", "FINDINGS"]);
    for (service, address) in &candidates {
        let (findings, color) = match conflicts.get(service) {
            Some(report) => (report.to_string(), Color::Red),
            None => ("clear".to_string(), Color::Green),
        };
        let port = record
            .ports()
            .get(service)
            .copied()
            .unwrap_or(ctx.config.lan.default_port);
        table.add_row(vec![
            Cell::new(service),
            Cell::new(address),
            Cell::new(port),
            Cell::new(findings).fg(color),
        ]);
    }
    println!("{table}");

    if conflicts.is_empty() {
        println!("✓ No conflicts");
    } else {
        println!("⚠ {} conflicting services", conflicts.len());
    }
    Ok(())
}
