use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    symbols::Marker,
    text::Line,
    widgets::{
        Axis, Block, Borders, Chart, Clear, Dataset, GraphType, Paragraph, Sparkline, Tabs, Wrap,
        block::Title,
    },
};
use std::io;
use std::time::Duration;

use crate::analysis::TrendStats;
use crate::coordinator::{Coordinator, DashboardState};
use crate::format;
use crate::models::{ChartPoint, Sentiment, TimeRange};

// --- App State ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Normal,
    EditingTarget,
}

struct App {
    coordinator: Coordinator,
    symbol: String,
    alert_input: String,
    input_mode: InputMode,
    notice: Option<String>,
}

impl App {
    fn new(coordinator: Coordinator, symbol: String) -> Self {
        Self {
            coordinator,
            symbol,
            alert_input: String::new(),
            input_mode: InputMode::Normal,
            notice: None,
        }
    }

    fn state(&self) -> &DashboardState {
        self.coordinator.state()
    }

    fn toggle_alert(&mut self) -> bool {
        match self.coordinator.toggle_alert(&self.alert_input) {
            Ok(()) => true,
            Err(e) => {
                self.notice = Some(e.to_string());
                false
            }
        }
    }
}

// --- TUI ---

/// Runs the dashboard until the user quits and returns the final state.
pub async fn run_tui(
    coordinator: Coordinator,
    symbol: String,
    poll_period: Duration,
) -> Result<DashboardState> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(coordinator, symbol);
    let res = run_app(&mut terminal, &mut app, poll_period).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res.map(|_| app.state().clone())
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    poll_period: Duration,
) -> Result<()> {
    // Polling stops when this guard drops on return.
    let _timer = app.coordinator.start(poll_period);

    loop {
        while let Some(event) = app.coordinator.try_next_event() {
            app.coordinator.apply(event);
        }

        terminal.draw(|f| ui(f, app))?;

        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if !handle_key_event(key, app) {
                        return Ok(());
                    }
                }
                // Resize: the next draw picks up the new size.
                _ => {}
            }
        }
    }
}

fn handle_key_event(key: KeyEvent, app: &mut App) -> bool {
    if app.input_mode == InputMode::EditingTarget {
        match key.code {
            KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => app.alert_input.push(c),
            KeyCode::Backspace => {
                app.alert_input.pop();
            }
            KeyCode::Enter => {
                if app.toggle_alert() {
                    app.notice = None;
                    app.input_mode = InputMode::Normal;
                }
            }
            KeyCode::Esc => app.input_mode = InputMode::Normal,
            _ => {}
        }
        return true;
    }

    app.notice = None;
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return false,
        KeyCode::Char('r') | KeyCode::F(5) => app.coordinator.refresh(false),
        KeyCode::Char('g') => {
            if !app.coordinator.request_analysis() {
                app.notice = Some("No market data to analyze yet.".to_string());
            }
        }
        KeyCode::Char('a') => {
            if app.state().alert.enabled {
                app.notice = Some("Stop the alert (t) before editing the target.".to_string());
            } else {
                app.input_mode = InputMode::EditingTarget;
            }
        }
        KeyCode::Char('t') | KeyCode::Enter => {
            app.toggle_alert();
        }
        KeyCode::Char('d') => app.coordinator.dismiss_alert(),
        KeyCode::Left => {
            let range = app.state().range.prev();
            app.coordinator.set_range(range);
        }
        KeyCode::Right => {
            let range = app.state().range.next();
            app.coordinator.set_range(range);
        }
        KeyCode::Char(c) if c.is_ascii_digit() => {
            let digit = c.to_digit(10).unwrap_or(0) as usize;
            if let Some(range) = digit.checked_sub(1).and_then(TimeRange::from_index) {
                app.coordinator.set_range(range);
            }
        }
        _ => {}
    }
    true
}

// --- Rendering ---

const ACCENT: Color = Color::Rgb(234, 179, 8);

fn ui(f: &mut Frame, app: &App) {
    let state = app.state();
    let banners = banner_lines(app);

    let rows = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(banners.len() as u16),
        Constraint::Length(4),
        Constraint::Min(10),
        Constraint::Length(1),
    ])
    .split(f.size());

    render_header(f, app, rows[0]);
    f.render_widget(Paragraph::new(banners), rows[1]);
    render_stats(f, state, rows[2]);

    let main = Layout::horizontal([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(rows[3]);
    render_market(f, state, main[0]);

    let side = Layout::vertical([Constraint::Length(6), Constraint::Min(6)]).split(main[1]);
    render_alert_panel(f, app, side[0]);
    render_analysis_panel(f, state, side[1]);

    f.render_widget(
        Paragraph::new(
            "[r/F5] refresh  [1-6 ←/→] range  [a] edit target  [t] alert on/off  [d] dismiss  [g] analysis  [q] quit",
        )
        .style(Style::default().fg(Color::DarkGray)),
        rows[4],
    );

    if state.refresh.loading && state.price.is_none() {
        let area = centered_rect(50, 20, rows[3]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new("Loading market data...\nPlease wait.")
                .block(Block::default().title("Refreshing").borders(Borders::ALL))
                .alignment(Alignment::Center),
            area,
        );
    }
}

fn banner_lines(app: &App) -> Vec<Line<'static>> {
    let state = app.state();
    let mut lines = Vec::new();

    if state.alert.triggered {
        let target = state.alert.target_price.map(format::usd).unwrap_or_default();
        lines.push(
            Line::from(format!(
                " 🔔 Price alert: {} reached target {}!  [d] dismiss",
                app.symbol, target
            ))
            .style(Style::default().fg(Color::White).bg(Color::Red).bold()),
        );
    }
    if let Some(error) = &state.refresh.last_error {
        lines.push(Line::from(format!(" ⚡ {}", error)).style(Style::default().fg(Color::LightRed)));
    }
    if let Some(notice) = &app.notice {
        lines.push(Line::from(format!(" {}", notice)).style(Style::default().fg(Color::Yellow)));
    }
    lines
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let state = app.state();
    let updated = state
        .refresh
        .last_updated
        .map(|at| format!("Updated: {}", format::local_time(at)))
        .unwrap_or_default();
    let spinner = if state.refresh.loading { "  ⟳ refreshing" } else { "" };

    let title = Line::from(vec![
        Span::styled(app.symbol.clone(), Style::default().fg(Color::White).bold()),
        Span::styled("Vol", Style::default().fg(ACCENT).bold()),
    ]);
    f.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(updated, Style::default().fg(Color::Gray)),
            Span::styled(spinner, Style::default().fg(ACCENT)),
        ]))
        .alignment(Alignment::Right)
        .block(Block::default().borders(Borders::ALL).title(title)),
        area,
    );
}

fn stat_card(f: &mut Frame, area: Rect, label: &str, value: String, sub: String, color: Color) {
    let text = vec![
        Line::from(Span::styled(value, Style::default().fg(Color::White).bold())),
        Line::from(Span::styled(sub, Style::default().fg(color))),
    ];
    f.render_widget(
        Paragraph::new(text).block(
            Block::default()
                .borders(Borders::ALL)
                .title(label.to_string())
                .border_style(Style::default().fg(Color::DarkGray)),
        ),
        area,
    );
}

fn render_stats(f: &mut Frame, state: &DashboardState, area: Rect) {
    let cards = Layout::horizontal([Constraint::Percentage(25); 4]).split(area);

    match &state.price {
        Some(snapshot) => {
            let color = if snapshot.change_24h_pct >= 0.0 {
                Color::Green
            } else {
                Color::Red
            };
            stat_card(
                f,
                cards[0],
                "Current price",
                format::usd(snapshot.price),
                format!("{} (24h)", format::pct(snapshot.change_24h_pct)),
                color,
            );
            stat_card(
                f,
                cards[1],
                "24h volume",
                format::compact_usd(snapshot.volume_24h),
                "liquidity".to_string(),
                Color::Green,
            );
        }
        None => {
            stat_card(f, cards[0], "Current price", "---".into(), String::new(), Color::Gray);
            stat_card(f, cards[1], "24h volume", "---".into(), String::new(), Color::Gray);
        }
    }

    let volatility = TrendStats::from_series(&state.chart)
        .map(|stats| format::pct(stats.volatility_pct))
        .unwrap_or_else(|| "---".to_string());
    let span_label = if state.range == TimeRange::H24 {
        "intraday range"
    } else {
        "period range"
    };
    stat_card(
        f,
        cards[2],
        "Volatility index",
        volatility,
        span_label.to_string(),
        Color::Gray,
    );

    let waiting = state.analysis_loading || (state.refresh.loading && state.analysis.is_none());
    let (value, sub, color) = match &state.analysis {
        _ if waiting => ("...".to_string(), "thinking...".to_string(), Color::Gray),
        Some(analysis) if analysis.is_unavailable() => (
            analysis.sentiment.to_string(),
            "unavailable".to_string(),
            Color::Gray,
        ),
        Some(analysis) => (
            analysis.sentiment.to_string(),
            "AI driven".to_string(),
            sentiment_color(analysis.sentiment),
        ),
        None => ("---".to_string(), "waiting...".to_string(), Color::Gray),
    };
    stat_card(f, cards[3], "AI sentiment", value, sub, color);
}

fn render_market(f: &mut Frame, state: &DashboardState, area: Rect) {
    let parts = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(6),
        Constraint::Length(5),
    ])
    .split(area);

    let titles: Vec<String> = TimeRange::ALL
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{} {}", i + 1, r.label()))
        .collect();
    f.render_widget(
        Tabs::new(titles)
            .select(state.range.index())
            .style(Style::default().fg(Color::Gray))
            .highlight_style(Style::default().fg(Color::Black).bg(ACCENT))
            .divider("|"),
        parts[0],
    );

    let chart_block = Block::default()
        .borders(Borders::ALL)
        .title("Price & volume")
        .title(Title::from("data: CoinGecko").alignment(Alignment::Right));

    if state.chart.is_empty() {
        let placeholder = if state.refresh.loading {
            "Loading market data..."
        } else {
            "No chart data"
        };
        f.render_widget(
            Paragraph::new(placeholder)
                .alignment(Alignment::Center)
                .block(chart_block),
            parts[1],
        );
        return;
    }

    let first = state.chart[0].timestamp_ms;
    let last = state.chart[state.chart.len() - 1].timestamp_ms;
    let span = last - first;
    let x_bounds = [first as f64, (last.max(first + 1)) as f64];
    let y_bounds = price_bounds(&state.chart);

    let prices: Vec<(f64, f64)> = state
        .chart
        .iter()
        .map(|p| (p.timestamp_ms as f64, p.price))
        .collect();

    let mut guides: Vec<(&str, Color, Vec<(f64, f64)>)> = Vec::new();
    if let Some(analysis) = &state.analysis {
        if let Some(support) = analysis.support_price {
            guides.push(("support", Color::Green, vec![(x_bounds[0], support), (x_bounds[1], support)]));
        }
        if let Some(resistance) = analysis.resistance_price {
            guides.push((
                "resistance",
                Color::Red,
                vec![(x_bounds[0], resistance), (x_bounds[1], resistance)],
            ));
        }
    }

    let mut datasets = vec![
        Dataset::default()
            .name("price")
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(ACCENT))
            .data(&prices),
    ];
    for (name, color, points) in &guides {
        datasets.push(
            Dataset::default()
                .name(*name)
                .marker(Marker::Dot)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(*color))
                .data(points),
        );
    }

    let mid_ts = first + span / 2;
    let x_labels = vec![
        Span::raw(format::axis_label(first, span)),
        Span::raw(format::axis_label(mid_ts, span)),
        Span::raw(format::axis_label(last, span)),
    ];
    let y_labels = vec![
        Span::raw(format::usd(y_bounds[0])),
        Span::raw(format::usd((y_bounds[0] + y_bounds[1]) / 2.0)),
        Span::raw(format::usd(y_bounds[1])),
    ];

    f.render_widget(
        Chart::new(datasets)
            .block(chart_block)
            .x_axis(
                Axis::default()
                    .bounds(x_bounds)
                    .labels(x_labels)
                    .style(Style::default().fg(Color::Gray)),
            )
            .y_axis(
                Axis::default()
                    .bounds(y_bounds)
                    .labels(y_labels)
                    .style(Style::default().fg(Color::Gray)),
            ),
        parts[1],
    );

    let width = parts[2].width.saturating_sub(2) as usize;
    let volumes = bucket_volumes(&state.chart, width);
    f.render_widget(
        Sparkline::default()
            .block(Block::default().borders(Borders::ALL).title("Volume"))
            .data(&volumes)
            .style(Style::default().fg(Color::Gray)),
        parts[2],
    );
}

fn render_alert_panel(f: &mut Frame, app: &App, area: Rect) {
    let alert = &app.state().alert;
    let border = if alert.enabled { ACCENT } else { Color::DarkGray };

    let target_line = if alert.enabled {
        let target = alert.target_price.map(format::usd).unwrap_or_default();
        Line::from(vec![Span::raw("Target: "), Span::styled(target, Style::default().bold())])
    } else {
        let cursor = if app.input_mode == InputMode::EditingTarget { "_" } else { "" };
        let input = if app.alert_input.is_empty() && cursor.is_empty() {
            Span::styled("enter target price", Style::default().fg(Color::DarkGray))
        } else {
            Span::raw(format!("{}{}", app.alert_input, cursor))
        };
        Line::from(vec![Span::raw("Target: $"), input])
    };

    let status_line = if alert.enabled {
        let target = alert.target_price.map(format::usd).unwrap_or_default();
        Line::from(Span::styled(
            format!("Monitoring: alert when price ≥ {}", target),
            Style::default().fg(Color::Green),
        ))
    } else if app.input_mode == InputMode::EditingTarget {
        Line::from(Span::styled(
            "[Enter] set  [Esc] cancel",
            Style::default().fg(Color::Gray),
        ))
    } else {
        Line::from(Span::styled(
            "[a] edit target  [t] set",
            Style::default().fg(Color::Gray),
        ))
    };

    let action = if alert.enabled { "[t] stop" } else { "" };
    f.render_widget(
        Paragraph::new(vec![target_line, status_line, Line::from(action)]).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Price alert")
                .border_style(Style::default().fg(border)),
        ),
        area,
    );
}

fn render_analysis_panel(f: &mut Frame, state: &DashboardState, area: Rect) {
    let action = if state.analysis_loading {
        "thinking..."
    } else {
        "[g] refresh analysis"
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title("AI market analyst")
        .title(Title::from(action).alignment(Alignment::Right));

    let lines: Vec<Line> = match &state.analysis {
        None if state.analysis_loading => vec![Line::from(Span::styled(
            "Thinking...",
            Style::default().fg(Color::Gray).italic(),
        ))],
        None => vec![Line::from(Span::styled(
            "Press g to get AI market insight.",
            Style::default().fg(Color::DarkGray),
        ))],
        Some(analysis) => {
            let mut lines = vec![Line::from(Span::styled(
                format!(" {} ", analysis.sentiment),
                Style::default()
                    .fg(Color::Black)
                    .bg(sentiment_color(analysis.sentiment))
                    .bold(),
            ))];
            if let Some(support) = &analysis.support_level {
                lines.push(Line::from(vec![
                    Span::styled("Support:    ", Style::default().fg(Color::Gray)),
                    Span::raw(support.clone()),
                ]));
            }
            if let Some(resistance) = &analysis.resistance_level {
                lines.push(Line::from(vec![
                    Span::styled("Resistance: ", Style::default().fg(Color::Gray)),
                    Span::raw(resistance.clone()),
                ]));
            }
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                format!("\"{}\"", analysis.summary),
                Style::default().fg(Color::Gray).italic(),
            )));
            lines
        }
    };

    f.render_widget(
        Paragraph::new(lines).wrap(Wrap { trim: true }).block(block),
        area,
    );
}

fn sentiment_color(sentiment: Sentiment) -> Color {
    match sentiment {
        Sentiment::Bullish => Color::Green,
        Sentiment::Bearish => Color::Red,
        Sentiment::Volatile => ACCENT,
        Sentiment::Neutral => Color::Gray,
    }
}

/// Y-axis bounds with 10% headroom above and below the price range.
fn price_bounds(points: &[ChartPoint]) -> [f64; 2] {
    let (min, max) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.price), hi.max(p.price))
        });
    let mut padding = (max - min) * 0.1;
    if padding <= 0.0 {
        padding = (max.abs() * 0.01).max(1e-6);
    }
    [min - padding, max + padding]
}

/// Averages volumes into at most `width` buckets for the sparkline.
fn bucket_volumes(points: &[ChartPoint], width: usize) -> Vec<u64> {
    if points.is_empty() || width == 0 {
        return Vec::new();
    }
    let per_bucket = points.len().div_ceil(width);
    points
        .chunks(per_bucket)
        .map(|chunk| {
            let total: f64 = chunk.iter().map(|p| p.volume.max(0.0)).sum();
            (total / chunk.len() as f64) as u64
        })
        .collect()
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}
