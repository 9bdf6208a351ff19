//! Plain-text session summary printed after the TUI exits.

use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

use crate::analysis::TrendStats;
use crate::coordinator::DashboardState;
use crate::format;
use crate::models::Sentiment;

fn sentiment_color(sentiment: Sentiment) -> Color {
    match sentiment {
        Sentiment::Bullish => Color::Green,
        Sentiment::Bearish => Color::Red,
        Sentiment::Volatile => Color::Yellow,
        Sentiment::Neutral => Color::DarkGrey,
    }
}

fn row(label: &str, value: Cell) -> Vec<Cell> {
    vec![
        Cell::new(label).fg(Color::DarkGrey),
        value.set_alignment(CellAlignment::Right),
    ]
}

pub fn build_summary(state: &DashboardState, symbol: &str) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new(symbol).add_attribute(Attribute::Bold),
            Cell::new("Last session")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
        ]);

    match &state.price {
        Some(snapshot) => {
            let change_color = if snapshot.change_24h_pct >= 0.0 {
                Color::Green
            } else {
                Color::Red
            };
            table.add_row(row("Price", Cell::new(format::usd(snapshot.price))));
            table.add_row(row(
                "24h change",
                Cell::new(format::pct(snapshot.change_24h_pct)).fg(change_color),
            ));
            table.add_row(row(
                "24h volume",
                Cell::new(format::compact_usd(snapshot.volume_24h)),
            ));
            table.add_row(row(
                "Observed at (UTC)",
                Cell::new(format::format_timestamp(snapshot.observed_at.timestamp_millis())),
            ));
        }
        None => {
            table.add_row(row("Price", Cell::new("---")));
        }
    }

    let volatility = TrendStats::from_series(&state.chart)
        .map(|stats| format::pct(stats.volatility_pct))
        .unwrap_or_else(|| "---".to_string());
    table.add_row(row(
        &format!("Volatility ({})", state.range),
        Cell::new(volatility),
    ));

    match &state.analysis {
        Some(analysis) => {
            table.add_row(row(
                "Sentiment",
                Cell::new(analysis.sentiment).fg(sentiment_color(analysis.sentiment)),
            ));
        }
        None => {
            table.add_row(row("Sentiment", Cell::new("---")));
        }
    }

    if let Some(target) = state.alert.target_price.filter(|_| state.alert.enabled) {
        let status = if state.alert.triggered {
            "triggered"
        } else {
            "watching"
        };
        table.add_row(row(
            "Alert",
            Cell::new(format!("{} at {}", status, format::usd(target))),
        ));
    }

    if let Some(error) = &state.refresh.last_error {
        table.add_row(row("Last error", Cell::new(error).fg(Color::Red)));
    }

    table
}

pub fn print_summary(state: &DashboardState, symbol: &str) {
    let updated = state
        .refresh
        .last_updated
        .map(format::local_time)
        .unwrap_or_else(|| "never".to_string());
    println!(
        "\n(Last refreshed at {})\n{}",
        updated,
        build_summary(state, symbol)
    );
}
