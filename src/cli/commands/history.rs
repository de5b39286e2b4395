//! History command - show recorded build steps of a working container

use crate::builder::HistoryEntry;
use crate::cli::args::{HistoryArgs, OutputFormat};
use crate::config::Config;
use crate::error::StowageResult;
use crate::store::ImageStore;
use console::style;

/// Execute the history command
pub async fn execute(args: HistoryArgs, config: &Config) -> StowageResult<()> {
    let store = super::open_store(config);
    let builder = store
        .open_existing(&args.container)
        .await
        .map_err(|e| e.context(format!("reading build container {:?}", args.container)))?;

    match args.format {
        OutputFormat::Table => print_table(&builder.container, &builder.history),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&builder.history)?),
        OutputFormat::Plain => {
            for entry in &builder.history {
                println!("{}", entry.created_by);
            }
        }
    }

    Ok(())
}

fn print_table(container: &str, history: &[HistoryEntry]) {
    if history.is_empty() {
        eprintln!("No history recorded for {}", container);
        return;
    }

    println!("{:<20} {}", style("CREATED").bold(), style("CREATED BY").bold());
    for entry in history {
        println!(
            "{:<20} {}",
            entry.created.format("%Y-%m-%d %H:%M:%S"),
            entry.created_by
        );
    }
}
