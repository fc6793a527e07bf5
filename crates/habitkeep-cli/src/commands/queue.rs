use chrono::Utc;

use crate::app::App;
use crate::commands::common::format_queue_lines;
use crate::error::CliError;

pub async fn run_queue(app: &App, as_json: bool) -> Result<(), CliError> {
    let entries = app.db.list_queue().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Nothing waiting to sync.");
        return Ok(());
    }

    for line in format_queue_lines(&entries, Utc::now().timestamp_millis()) {
        println!("{line}");
    }
    println!("{} pending", entries.len());
    Ok(())
}
