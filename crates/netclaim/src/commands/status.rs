use super::Context;
use anyhow::Result;

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let engine = ctx.engine(None)?;

    let Some(record) = engine.status() else {
        if json {
            println!("null");
        } else {
            println!("No allocation");
        }
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        if record.requested != record.strategy {
            println!("Requested {}, fell back to {}", record.requested, record.strategy);
        }
        super::print_record(&record);
    }
    Ok(())
}
