use crate::app::UiCommand;
use crate::config::{SlotEntry, Watchlist};
use crate::error;
use crate::monitor::candle::CandleWindow;
use crate::monitor::supervisor::MAX_CHART_SLOTS;
use crate::monitor::threshold::{Threshold, ThresholdCondition};
use crate::ui::core::sink::UiEvent;
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use num_format::{Locale, ToFormattedString};
use ratatui::layout::Alignment;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::mpsc;

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceCell {
    Unknown,
    Loading,
    Price(f64),
    Error,
}

#[derive(Debug, Clone)]
pub struct SlotState {
    pub symbol: String,
    pub threshold: String,
    pub price: PriceCell,
}

impl SlotState {
    fn empty() -> Self {
        Self {
            symbol: String::new(),
            threshold: String::new(),
            price: PriceCell::Unknown,
        }
    }

    fn entry(&self) -> SlotEntry {
        SlotEntry {
            symbol: self.symbol.clone(),
            threshold: self.threshold.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChartPanel {
    pub title: Option<String>,
    pub candles: CandleWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Alert,
    System,
}

pub struct Dashboard {
    pub slots: Vec<SlotState>,
    pub charts: Vec<ChartPanel>,
    pub log: VecDeque<(LogKind, String)>,
    pub notice: Option<String>,
    pub selected: usize,
    /// Text being typed into the selected slot, when editing.
    pub input: Option<String>,
    pub monitoring: Option<Duration>,
    pub running: bool,
    bell: bool,
    commands: mpsc::UnboundedSender<UiCommand>,
    events: mpsc::UnboundedReceiver<UiEvent>,
}

impl Dashboard {
    pub fn new(
        watchlist: &Watchlist,
        commands: mpsc::UnboundedSender<UiCommand>,
        events: mpsc::UnboundedReceiver<UiEvent>,
    ) -> Self {
        let mut slots: Vec<SlotState> = (0..MAX_CHART_SLOTS).map(|_| SlotState::empty()).collect();
        for (slot, entry) in slots.iter_mut().zip(&watchlist.slots) {
            slot.symbol = entry.symbol.trim().to_uppercase();
            slot.threshold = entry.threshold.clone();
        }

        Self {
            slots,
            charts: (0..MAX_CHART_SLOTS).map(|_| ChartPanel::default()).collect(),
            log: VecDeque::new(),
            notice: None,
            selected: 0,
            input: None,
            monitoring: None,
            running: true,
            bell: false,
            commands,
            events,
        }
    }

    /// Drives the terminal on the calling thread until the user quits.
    pub fn run(&mut self) -> error::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        // Fill in prices for the restored watchlist.
        for slot in 0..self.slots.len() {
            if !self.slots[slot].symbol.is_empty() {
                self.request_price(slot);
            }
        }

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> error::Result<()> {
        while self.running {
            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key_input(key);
                    }
                }
            }

            self.drain_events();

            terminal.draw(|f| self.render(f))?;

            if std::mem::take(&mut self.bell) {
                let backend = terminal.backend_mut();
                Write::write_all(backend, b"\x07")?;
                Write::flush(backend)?;
            }
        }
        Ok(())
    }

    pub fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
        }
    }

    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Candle {
                slot,
                symbol,
                candle,
            } => {
                if let Some(chart) = self.charts.get_mut(slot) {
                    if chart.title.as_deref() == Some(symbol.as_str()) {
                        chart.candles.push(candle);
                    }
                }
            }
            UiEvent::ChartReset { slot, symbol } => {
                if let Some(chart) = self.charts.get_mut(slot) {
                    chart.candles.clear();
                    chart.title = Some(symbol);
                }
            }
            UiEvent::ChartClear { slot } => {
                if let Some(chart) = self.charts.get_mut(slot) {
                    chart.candles.clear();
                }
            }
            UiEvent::Alert(line) => self.push_log(LogKind::Alert, line),
            UiEvent::System(line) => self.push_log(LogKind::System, line),
            UiEvent::Notify { line, show_notice } => {
                self.bell = true;
                if show_notice {
                    self.notice = Some(line);
                }
            }
            UiEvent::InitialPrice {
                slot,
                symbol,
                price,
            } => {
                if let Some(state) = self.slots.get_mut(slot) {
                    if state.symbol == symbol {
                        state.price = match price {
                            Some(p) => PriceCell::Price(p),
                            None if symbol.is_empty() => PriceCell::Unknown,
                            None => PriceCell::Error,
                        };
                    }
                }
            }
            UiEvent::Monitoring(interval) => self.monitoring = interval,
        }
    }

    fn push_log(&mut self, kind: LogKind, line: String) {
        self.log.push_back((kind, line));
        while self.log.len() > MAX_LOG_LINES {
            self.log.pop_front();
        }
    }

    fn send(&self, command: UiCommand) {
        if let Err(e) = self.commands.send(command) {
            log::error!("Controller is gone, dropping command: {:?}", e.0);
        }
    }

    fn entries(&self) -> Vec<SlotEntry> {
        self.slots.iter().map(SlotState::entry).collect()
    }

    fn request_price(&mut self, slot: usize) {
        let symbol = self.slots[slot].symbol.clone();
        self.slots[slot].price = if symbol.is_empty() {
            PriceCell::Unknown
        } else {
            PriceCell::Loading
        };
        self.send(UiCommand::LookupPrice { slot, symbol });
    }

    pub fn handle_key_input(&mut self, key: KeyEvent) {
        if self.input.is_some() {
            self.handle_edit_key(key);
            return;
        }

        if self.notice.is_some() {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc) {
                self.notice = None;
            }
            return;
        }

        match key.code {
            KeyCode::Char('q') => {
                self.send(UiCommand::Quit(self.entries()));
                self.running = false;
            }
            KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down => self.selected = (self.selected + 1).min(self.slots.len() - 1),
            KeyCode::Char('e') => self.input = Some(self.edit_text(self.selected)),
            KeyCode::Char('d') => {
                self.slots[self.selected] = SlotState::empty();
                self.request_price(self.selected);
            }
            KeyCode::Char('r') => self.request_price(self.selected),
            KeyCode::Char('s') => self.send(UiCommand::Start(self.entries())),
            KeyCode::Char('x') => self.send(UiCommand::Stop),
            _ => (),
        }
    }

    /// Pre-filled editor text. An empty threshold is suggested at the last
    /// known price.
    fn edit_text(&self, slot: usize) -> String {
        let state = &self.slots[slot];
        match (state.threshold.is_empty(), state.price) {
            (false, _) => format!("{} {}", state.symbol, state.threshold),
            (true, PriceCell::Price(p)) if !state.symbol.is_empty() => {
                format!(
                    "{} {}@{:.2}",
                    state.symbol,
                    ThresholdCondition::GreaterThan.label(),
                    p
                )
            }
            _ => state.symbol.clone(),
        }
    }

    fn handle_edit_key(&mut self, key: KeyEvent) {
        let Some(input) = self.input.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Char(c) => input.push(c),
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Esc => self.input = None,
            KeyCode::Enter => {
                let text = input.clone();
                match parse_slot_input(&text) {
                    Ok((symbol, threshold)) => {
                        let slot = self.selected;
                        self.slots[slot].symbol = symbol;
                        self.slots[slot].threshold = threshold;
                        self.input = None;
                        self.request_price(slot);
                    }
                    Err(e) => {
                        let line = format!("[{}] SYSTEM: {}", Local::now().format("%H:%M:%S"), e);
                        self.push_log(LogKind::System, line);
                    }
                }
            }
            _ => (),
        }
    }

    pub fn render<B: Backend>(&self, f: &mut Frame<B>) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(10),
                Constraint::Length(2),
            ])
            .split(f.size());

        self.render_header(f, chunks[0]);
        self.render_charts(f, chunks[1]);

        let bottom = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(chunks[2]);
        self.render_slots(f, bottom[0]);
        self.render_log(f, bottom[1]);

        self.render_footer(f, chunks[3]);

        if let Some(notice) = &self.notice {
            Self::render_notice(f, notice);
        }
    }

    fn render_header<B: Backend>(&self, f: &mut Frame<B>, area: Rect) {
        let status = match self.monitoring {
            Some(interval) => Span::styled(
                format!("MONITORING every {}s", interval.as_secs()),
                Style::default().fg(Color::Green),
            ),
            None => Span::styled("IDLE", Style::default().fg(Color::Yellow)),
        };

        let configured = self.slots.iter().filter(|s| !s.symbol.is_empty()).count();
        let header = Paragraph::new(Text::from(vec![
            Line::from(vec![
                Span::styled(
                    "STOCKWATCH ",
                    Style::default()
                        .fg(Color::LightCyan)
                        .add_modifier(Modifier::BOLD),
                ),
                status,
            ]),
            Line::from(Span::styled(
                format!(
                    "Last update: {} | Symbols: {}/{}",
                    Local::now().format("%H:%M:%S"),
                    configured,
                    MAX_CHART_SLOTS
                ),
                Style::default().fg(Color::Gray),
            )),
        ]))
        .block(Block::default().borders(Borders::BOTTOM));

        f.render_widget(header, area);
    }

    fn render_charts<B: Backend>(&self, f: &mut Frame<B>, area: Rect) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(area);

        for (row, row_area) in rows.iter().enumerate() {
            let cols = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(*row_area);
            for (col, cell) in cols.iter().enumerate() {
                let slot = row * 2 + col;
                if let Some(chart) = self.charts.get(slot) {
                    Self::render_candle_chart(f, *cell, slot, chart);
                }
            }
        }
    }

    fn render_candle_chart<B: Backend>(f: &mut Frame<B>, area: Rect, slot: usize, chart: &ChartPanel) {
        let title = match &chart.title {
            Some(symbol) => format!("{} Candles", symbol),
            None => format!("Chart {}", slot + 1),
        };
        let chart_block = Block::default().borders(Borders::ALL).title(title);
        let inner_area = chart_block.inner(area);
        f.render_widget(chart_block, area);

        if inner_area.height < 3 || inner_area.width < 12 {
            return;
        }

        let Some((mut min_price, mut max_price)) = chart.candles.price_bounds() else {
            let message = Paragraph::new("Waiting for data")
                .style(Style::default().fg(Color::DarkGray))
                .alignment(Alignment::Center);
            f.render_widget(message, inner_area);
            return;
        };

        // A flat window still needs a vertical scale.
        if max_price - min_price <= f64::EPSILON {
            let pad = (max_price.abs() * 0.005).max(0.01);
            min_price -= pad;
            max_price += pad;
        }
        let price_range = max_price - min_price;

        let label_width = 10u16;
        let plot_width = inner_area.width.saturating_sub(label_width);
        let candle_width = 1u16;
        let candle_spacing = 1u16;
        let visible = (plot_width / (candle_width + candle_spacing)).max(1) as usize;
        let skip = chart.candles.len().saturating_sub(visible);

        let height = (inner_area.height - 1) as f64;
        let to_y = |price: f64| {
            inner_area.y + (inner_area.height - 1) - (((price - min_price) / price_range) * height).round() as u16
        };

        for (i, candle) in chart.candles.iter().skip(skip).enumerate() {
            let x = inner_area.x + (i as u16 * (candle_width + candle_spacing));
            if x >= inner_area.x + plot_width {
                break;
            }

            let color = if candle.is_bullish() {
                Color::Green
            } else {
                Color::Red
            };

            // Wick
            for y in to_y(candle.high)..=to_y(candle.low) {
                let wick = Paragraph::new("│").style(Style::default().fg(color));
                f.render_widget(wick, Rect::new(x, y, 1, 1));
            }

            // Body
            let (top, bottom) = if candle.is_bullish() {
                (to_y(candle.close), to_y(candle.open))
            } else {
                (to_y(candle.open), to_y(candle.close))
            };
            for y in top..=bottom {
                let body = Paragraph::new("█").style(Style::default().fg(color));
                f.render_widget(body, Rect::new(x, y, candle_width, 1));
            }
        }

        let label_x = inner_area.right() - label_width;
        let top_label = Paragraph::new(format_price(max_price))
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Right);
        let bottom_label = Paragraph::new(format_price(min_price))
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Right);
        f.render_widget(top_label, Rect::new(label_x, inner_area.y, label_width, 1));
        f.render_widget(
            bottom_label,
            Rect::new(label_x, inner_area.bottom() - 1, label_width, 1),
        );

        if let Some(last) = chart.candles.last() {
            let last_label = Paragraph::new(format_price(last.close))
                .style(Style::default().fg(Color::White).add_modifier(Modifier::BOLD))
                .alignment(Alignment::Right);
            f.render_widget(
                last_label,
                Rect::new(label_x, to_y(last.close), label_width, 1),
            );
        }
    }

    fn render_slots<B: Backend>(&self, f: &mut Frame<B>, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("Watchlist");
        let inner_area = block.inner(area);
        f.render_widget(block, area);

        let rows = self.slots.iter().enumerate().map(|(i, slot)| {
            let price = match slot.price {
                PriceCell::Unknown => Span::raw("-"),
                PriceCell::Loading => Span::styled("...", Style::default().fg(Color::Gray)),
                PriceCell::Price(p) => Span::raw(format_price(p)),
                PriceCell::Error => Span::styled("error", Style::default().fg(Color::Red)),
            };
            let style = if i == self.selected {
                Style::default().bg(Color::DarkGray)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(format!("{}", i + 1)),
                Cell::from(if slot.symbol.is_empty() { "-" } else { slot.symbol.as_str() }),
                Cell::from(price),
                Cell::from(slot.threshold.as_str()),
            ])
            .style(style)
        });

        let table = Table::new(rows)
            .header(
                Row::new(vec!["#", "Symbol", "Price", "Alert"])
                    .style(Style::default().add_modifier(Modifier::BOLD)),
            )
            .widths(&[
                Constraint::Length(2),
                Constraint::Length(10),
                Constraint::Length(12),
                Constraint::Min(10),
            ]);

        f.render_widget(table, inner_area);
    }

    fn render_log<B: Backend>(&self, f: &mut Frame<B>, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("Alerts");
        let inner_area = block.inner(area);
        f.render_widget(block, area);

        let visible = inner_area.height as usize;
        let skip = self.log.len().saturating_sub(visible);
        let lines: Vec<Line> = self
            .log
            .iter()
            .skip(skip)
            .map(|(kind, line)| {
                let color = match kind {
                    LogKind::Alert => Color::LightRed,
                    LogKind::System => Color::Gray,
                };
                Line::from(Span::styled(line.as_str(), Style::default().fg(color)))
            })
            .collect();

        f.render_widget(Paragraph::new(lines), inner_area);
    }

    fn render_footer<B: Backend>(&self, f: &mut Frame<B>, area: Rect) {
        let bold = Style::default().add_modifier(Modifier::BOLD);
        let controls = match &self.input {
            Some(input) => vec![
                Span::styled(format!("Slot {}: ", self.selected + 1), bold),
                Span::raw(input.clone()),
                Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
                Span::raw("   "),
                Span::styled("Enter", bold),
                Span::raw(" Save  "),
                Span::styled("Esc", bold),
                Span::raw(" Cancel  (SYMBOL [> < ^ v]@value)"),
            ],
            None => vec![
                Span::raw("Controls: "),
                Span::styled("↑/↓", bold),
                Span::raw(" Select  "),
                Span::styled("e", bold),
                Span::raw(" Edit  "),
                Span::styled("d", bold),
                Span::raw(" Clear  "),
                Span::styled("r", bold),
                Span::raw(" Refresh  "),
                Span::styled("s", bold),
                Span::raw(" Start  "),
                Span::styled("x", bold),
                Span::raw(" Stop  "),
                Span::styled("q", bold),
                Span::raw(" Quit"),
            ],
        };

        let footer = Paragraph::new(Line::from(controls))
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::TOP));

        f.render_widget(footer, area);
    }

    fn render_notice<B: Backend>(f: &mut Frame<B>, notice: &str) {
        let area = centered_rect(60, 7, f.size());
        let popup = Paragraph::new(Text::from(vec![
            Line::from(Span::styled(
                notice,
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Enter/Esc to dismiss",
                Style::default().fg(Color::Gray),
            )),
        ]))
        .wrap(Wrap { trim: true })
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("ALERT")
                .style(Style::default().fg(Color::LightRed)),
        );

        f.render_widget(Clear, area);
        f.render_widget(popup, area);
    }
}

/// Splits `"SYMBOL [threshold]"` and canonicalizes the threshold text.
pub fn parse_slot_input(text: &str) -> Result<(String, String), String> {
    let text = text.trim();
    let (symbol, rest) = match text.split_once(char::is_whitespace) {
        Some((symbol, rest)) => (symbol, rest.trim()),
        None => (text, ""),
    };
    let symbol = symbol.to_uppercase();

    if rest.is_empty() {
        return Ok((symbol, String::new()));
    }
    if symbol.is_empty() {
        return Err("an alert needs a symbol".to_string());
    }
    let threshold: Threshold = rest
        .parse()
        .map_err(|e| format!("invalid alert for {}: {}", symbol, e))?;
    Ok((symbol, threshold.to_string()))
}

fn centered_rect(percent_x: u16, height: u16, area: Rect) -> Rect {
    let width = area.width * percent_x / 100;
    let height = height.min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

fn format_price(price: f64) -> String {
    let decimals = if price.abs() >= 1000.0 { 2 } else { 4 };
    let formatted = format!("{:.*}", decimals, price.abs());
    let (whole, fraction) = match formatted.split_once('.') {
        Some(parts) => parts,
        None => (formatted.as_str(), ""),
    };
    let whole = whole
        .parse::<u64>()
        .map(|w| w.to_formatted_string(&Locale::en))
        .unwrap_or_else(|_| whole.to_string());
    let sign = if price < 0.0 { "-" } else { "" };
    format!("{}{}.{}", sign, whole, fraction)
}
