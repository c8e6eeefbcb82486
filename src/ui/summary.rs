use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::config::model::ModelConfig;
use crate::supervisor::ProxyStatus;

pub fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print a table indented by 2 spaces.
pub fn print_table(table: &Table) {
    for line in table.to_string().lines() {
        println!("  {}", line);
    }
}

pub fn status_text(status: ProxyStatus, use_color: bool) -> String {
    let label = status.to_string();
    if !use_color {
        return format!("\u{25cf} {}", label);
    }
    match status {
        ProxyStatus::Active => format!("{} {}", "\u{25cf}".green(), label.green()),
        ProxyStatus::Warning => format!("{} {}", "\u{25cf}".yellow(), label.yellow()),
        ProxyStatus::Inactive => format!("{} {}", "\u{25cf}".red(), label.red()),
    }
}

pub fn models_table(models: &[ModelConfig]) -> Table {
    let use_color = std::io::stdout().is_terminal();
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Model").set_alignment(CellAlignment::Left),
        Cell::new("Provider").set_alignment(CellAlignment::Left),
        Cell::new("Category").set_alignment(CellAlignment::Left),
        Cell::new("Temp").set_alignment(CellAlignment::Right),
        Cell::new("API key").set_alignment(CellAlignment::Left),
        Cell::new("Enabled").set_alignment(CellAlignment::Center),
    ]);

    for model in models {
        let enabled = match (model.enabled, use_color) {
            (true, true) => format!("{}", "yes".green()),
            (false, true) => format!("{}", "no".dimmed()),
            (true, false) => "yes".to_string(),
            (false, false) => "no".to_string(),
        };
        table.add_row(vec![
            Cell::new(&model.name),
            Cell::new(&model.provider),
            Cell::new(&model.category),
            Cell::new(format!("{:.1}", model.temperature)).set_alignment(CellAlignment::Right),
            Cell::new(model.masked_api_key()),
            Cell::new(enabled).set_alignment(CellAlignment::Center),
        ]);
    }
    table
}

pub fn print_startup_banner(host: &str, port: u16, log_file: Option<&std::path::Path>) {
    let use_color = std::io::stdout().is_terminal();

    println!();
    if use_color {
        println!("  {} http://{}:{}", "proxyme".bold(), host, port);
    } else {
        println!("  proxyme http://{}:{}", host, port);
    }
    if let Some(path) = log_file {
        println!("  Log file: {}", path.display());
    }
    if use_color {
        println!(
            "  Press {} to stop, send {} to restart",
            "Ctrl+C".bold(),
            "SIGHUP".bold()
        );
    } else {
        println!("  Press Ctrl+C to stop, send SIGHUP to restart");
    }
    println!();
}
