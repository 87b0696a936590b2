use super::Context;
use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use indexmap::IndexMap;
use network_identity::lan::service_urls;
use std::net::IpAddr;

pub async fn run(ctx: &Context) -> Result<()> {
    let engine = ctx.engine(None)?;
    let Some(record) = engine.status() else {
        println!("No allocation");
        return Ok(());
    };

    let addresses: IndexMap<String, IpAddr> = record
        .endpoints()
        .into_iter()
        .filter(|(_, endpoint)| endpoint.port.is_some())
        .map(|(service, endpoint)| (service, endpoint.address))
        .collect();
    let ports = record.ports();

    let urls = service_urls(&addresses, &ports, ctx.config.lan.default_port);
    let results = engine.lan().verify_connectivity(&addresses, &ports).await;

    let mut table = Table::new();
    table.set_header(vec!["SERVICE", "URL", "REACHABLE"]);
    for (service, reachable) in &results {
        let (text, color) = if *reachable {
            ("yes", Color::Green)
        } else {
            ("no", Color::Red)
        };
        table.add_row(vec![
            Cell::new(service),
            Cell::new(urls.get(service).map(String::as_str).unwrap_or("-")),
            Cell::new(text).fg(color),
        ]);
    }
    println!("{table}");

    let reachable = results.values().filter(|r| **r).count();
    println!("{} of {} services reachable", reachable, results.len());
    Ok(())
}
