use anyhow::Result;

pub fn cmd_metrics() -> Result<()> {
    print!("{}", taskpilot::metrics::gather_text()?);
    Ok(())
}
