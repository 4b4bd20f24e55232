/// Frame rendering for the whale watch TUI
///
/// Draws the bubble field, wall ladder, whale tape, and insight panels
/// from a read-only snapshot assembled once per frame.
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
    Frame,
};
use whalewatch_engine::{
    BullBearPower, EntityMode, Flash, FlashDirection, HypeReality, PatternMarker, PlaybackMode,
    PlaybackStatus, VisualEntity, WallBucket, WhaleActivity, WhaleAlert,
};

/// Everything the renderer needs for one frame.
pub struct UiSnapshot {
    pub connected: bool,
    pub mode: PlaybackMode,
    pub status: PlaybackStatus,
    pub progress: f64,
    pub speed: f64,
    pub entity_mode: EntityMode,
    pub entity_count: usize,
    pub mid_price: f64,
    pub imbalance: f64,
    pub bid_walls: Vec<WallBucket>,
    pub ask_walls: Vec<WallBucket>,
    pub flashes: Vec<Flash>,
    pub ripple_count: usize,
    pub markers: Vec<PatternMarker>,
    pub entities: Vec<VisualEntity>,
    pub alerts: Vec<WhaleAlert>,
    pub activity: WhaleActivity,
    pub price_change_10s: Option<f64>,
    pub hype: Option<HypeReality>,
    pub bull_bear: BullBearPower,
}

pub fn ui(f: &mut Frame, snapshot: &UiSnapshot) {
    let size = f.area();
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(12),
            Constraint::Length(8),
            Constraint::Length(1),
        ])
        .split(size);

    render_playback_bar(f, snapshot, main_chunks[0]);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(main_chunks[1]);
    render_bubble_field(f, snapshot, middle[0]);
    render_wall_ladder(f, snapshot, middle[1]);

    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(main_chunks[2]);
    render_whale_tape(f, snapshot, bottom[0]);
    render_insight_panel(f, snapshot, bottom[1]);

    render_footer(f, snapshot, main_chunks[3]);
}

fn render_playback_bar(f: &mut Frame, snapshot: &UiSnapshot, area: Rect) {
    let (label, color) = match (snapshot.mode, snapshot.status) {
        (PlaybackMode::Live, _) if snapshot.connected => ("LIVE", Color::Green),
        (PlaybackMode::Live, _) => ("LIVE (disconnected)", Color::Red),
        (_, PlaybackStatus::Idle) => ("REPLAY - no timeline", Color::DarkGray),
        (_, PlaybackStatus::Ready) => ("REPLAY - ready", Color::Yellow),
        (_, PlaybackStatus::Playing) => ("REPLAY - playing", Color::Cyan),
        (_, PlaybackStatus::Paused) => ("REPLAY - paused", Color::Yellow),
        (_, PlaybackStatus::Complete) => ("REPLAY - complete", Color::Magenta),
    };

    let gauge = Gauge::default()
        .block(
            Block::default()
                .title(format!(" {label}  ({:.0}x) ", snapshot.speed))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(color)),
        )
        .gauge_style(Style::default().fg(color))
        .ratio(snapshot.progress.clamp(0.0, 1.0));
    f.render_widget(gauge, area);
}

fn render_bubble_field(f: &mut Frame, snapshot: &UiSnapshot, area: Rect) {
    let mode_label = match snapshot.entity_mode {
        EntityMode::AllTrades => "all trades",
        EntityMode::WhalesOnly => "whales only",
    };
    let block = Block::default()
        .title(format!(
            "BUBBLE FIELD [{mode_label}] ({} live)",
            snapshot.entity_count
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let mut lines = Vec::new();
    for entity in &snapshot.entities {
        let side = if entity.is_buy { "▲" } else { "▼" };
        let side_color = if entity.is_buy {
            Color::Green
        } else {
            Color::Red
        };
        let ring = if entity.is_whale { "◎ " } else { "  " };
        let bar_len = (entity.aggression * 10.0).round() as usize;
        let fade_pct = (entity.fade * 100.0).round();
        lines.push(Line::from(vec![
            Span::styled(ring, Style::default().fg(Color::Magenta)),
            Span::styled(side, Style::default().fg(side_color)),
            Span::styled(
                format!(" {:>8.1}k ", entity.value / 1_000.0),
                Style::default()
                    .fg(side_color)
                    .add_modifier(if entity.is_whale {
                        Modifier::BOLD
                    } else {
                        Modifier::empty()
                    }),
            ),
            Span::styled(
                format!("{:<10}", "█".repeat(bar_len)),
                Style::default().fg(Color::Yellow),
            ),
            Span::styled(
                format!(" {fade_pct:>3.0}%"),
                Style::default().fg(Color::DarkGray),
            ),
        ]));
    }

    if lines.is_empty() {
        lines.push(Line::from(Span::styled(
            "Waiting for trades...",
            Style::default().fg(Color::DarkGray),
        )));
    }

    let paragraph = Paragraph::new(lines).block(block);
    f.render_widget(paragraph, area);
}

fn render_wall_ladder(f: &mut Frame, snapshot: &UiSnapshot, area: Rect) {
    let block = Block::default()
        .title(format!(
            "WALL LADDER  mid {}  imbalance {:+.2}",
            if snapshot.mid_price > 0.0 {
                format!("{:.1}", snapshot.mid_price)
            } else {
                "?".to_string()
            },
            snapshot.imbalance
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let mut lines = Vec::new();

    // Asks above the mid, highest first so the ladder reads top-down.
    let mut asks = snapshot.ask_walls.clone();
    asks.sort_by(|a, b| b.price.total_cmp(&a.price));
    for wall in &asks {
        lines.push(wall_line(wall, Color::Red, &snapshot.flashes));
    }

    lines.push(Line::from(Span::styled(
        format!(
            "─── mid ─── {} ripple{}",
            snapshot.ripple_count,
            if snapshot.ripple_count == 1 { "" } else { "s" }
        ),
        Style::default().fg(Color::DarkGray),
    )));

    let mut bids = snapshot.bid_walls.clone();
    bids.sort_by(|a, b| b.price.total_cmp(&a.price));
    for wall in &bids {
        lines.push(wall_line(wall, Color::Green, &snapshot.flashes));
    }

    let paragraph = Paragraph::new(lines).block(block);
    f.render_widget(paragraph, area);
}

fn wall_line(wall: &WallBucket, color: Color, flashes: &[Flash]) -> Line<'static> {
    let intensity_bar = "█".repeat((wall.intensity * 12.0).round() as usize);
    let confirmed = if wall.confirmed { " WALL" } else { "" };
    let flash = flashes
        .iter()
        .find(|fl| (fl.price - wall.price).abs() < wall.price * 0.001)
        .map(|fl| match fl.direction {
            FlashDirection::Up => " +",
            FlashDirection::Down => " -",
        })
        .unwrap_or("");

    Line::from(vec![
        Span::styled(format!("{:>10.1} ", wall.price), Style::default().fg(color)),
        Span::styled(
            format!("{:>9.2} ", wall.quantity),
            Style::default().fg(Color::White),
        ),
        Span::styled(
            format!("{intensity_bar:<12}"),
            Style::default().fg(Color::Yellow),
        ),
        Span::styled(
            confirmed,
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(flash, Style::default().fg(Color::Cyan)),
    ])
}

fn render_whale_tape(f: &mut Frame, snapshot: &UiSnapshot, area: Rect) {
    let block = Block::default()
        .title("WHALE TAPE")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let mut lines = Vec::new();
    for alert in snapshot.alerts.iter().rev() {
        let side_color = if alert.trade.is_buy {
            Color::Green
        } else {
            Color::Red
        };
        let label = alert.label.as_deref().unwrap_or(if alert.trade.is_buy {
            "whale buy"
        } else {
            "whale sell"
        });
        lines.push(Line::from(vec![
            Span::styled(
                format!("{} ", alert.trade.timestamp.format("%H:%M:%S")),
                Style::default().fg(Color::DarkGray),
            ),
            Span::styled(
                format!("${:>6.2}M ", alert.trade.trade_value / 1_000_000.0),
                Style::default()
                    .fg(side_color)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("score {:.2} ", alert.whale_score),
                Style::default().fg(Color::Yellow),
            ),
            Span::styled(label.to_string(), Style::default().fg(Color::White)),
        ]));
    }

    if lines.is_empty() {
        lines.push(Line::from(Span::styled(
            "No whales yet",
            Style::default().fg(Color::DarkGray),
        )));
    }

    let paragraph = Paragraph::new(lines).block(block).wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn render_insight_panel(f: &mut Frame, snapshot: &UiSnapshot, area: Rect) {
    let block = Block::default()
        .title("ACTIVITY & PATTERNS")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let mut lines = Vec::new();

    let power = &snapshot.bull_bear;
    let power_color = if power.bull_power >= 0.0 {
        Color::Green
    } else {
        Color::Red
    };
    lines.push(Line::from(vec![
        Span::raw("Whale activity: "),
        Span::styled(
            format!("{:>5.1}/100 ", snapshot.activity.score),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(
                "({} whales, ${:.1}M / 10m)",
                snapshot.activity.whale_count,
                snapshot.activity.whale_value_total / 1_000_000.0
            ),
            Style::default().fg(Color::DarkGray),
        ),
    ]));
    lines.push(Line::from(vec![
        Span::raw("Bull power: "),
        Span::styled(
            format!("{:+.2} ", power.bull_power),
            Style::default().fg(power_color).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("momentum {:.2}", power.momentum),
            Style::default().fg(Color::White),
        ),
    ]));

    if let Some(change) = snapshot.price_change_10s {
        lines.push(Line::from(vec![
            Span::raw("Price 10s: "),
            Span::styled(
                format!("{change:+.3}%"),
                Style::default().fg(if change >= 0.0 {
                    Color::Green
                } else {
                    Color::Red
                }),
            ),
        ]));
    }
    if let Some(hype) = &snapshot.hype {
        lines.push(Line::from(Span::styled(
            hype.insight,
            Style::default().fg(Color::White),
        )));
    }

    for marker in &snapshot.markers {
        lines.push(Line::from(vec![
            Span::styled("◆ ", Style::default().fg(Color::Yellow)),
            Span::styled(
                format!("{:<13}", marker.label),
                Style::default().fg(Color::Yellow),
            ),
            Span::styled(
                format!("@ {:.1} ({})", marker.price, marker.side),
                Style::default().fg(Color::DarkGray),
            ),
        ]));
    }

    let paragraph = Paragraph::new(lines).block(block).wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn render_footer(f: &mut Frame, snapshot: &UiSnapshot, area: Rect) {
    let keys = match snapshot.mode {
        PlaybackMode::Live => "q quit | w whales-only | r replay session buffer",
        PlaybackMode::Replay => "q quit | space play/pause | ←/→ scrub | w whales-only | l live",
    };
    let paragraph = Paragraph::new(Line::from(Span::styled(
        keys,
        Style::default().fg(Color::DarkGray),
    )));
    f.render_widget(paragraph, area);
}
