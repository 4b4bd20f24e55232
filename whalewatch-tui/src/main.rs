/// Whale Watch TUI
///
/// Terminal front-end for the reconstruction engine: connects to the live
/// feed (or loads a recorded timeline passed as an argument), drives the
/// playback controller once per frame, and renders read-only snapshots.
use std::{
    error::Error,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::Mutex;
use tracing::{info, warn};
use whalewatch_engine::{
    EngineConfig, EntityMode, PlaybackController, PlaybackMode, ReplayBatch, ReplayRecord,
    Timeline,
};

mod ui;
mod websocket;

use ui::{ui, UiSnapshot};
use websocket::{ConnectionStatus, FeedClient, FeedConfig};

/// Get feed URL from WS_URL env var (default: ws://127.0.0.1:8000/ws)
fn get_ws_url() -> String {
    std::env::var("WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8000/ws".to_string())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Route logs to a file when WHALEWATCH_LOG is set; stderr would corrupt
/// the alternate screen.
fn init_logging() {
    if let Ok(path) = std::env::var("WHALEWATCH_LOG") {
        if let Ok(file) = std::fs::File::create(&path) {
            tracing_subscriber::fmt()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
    }
}

/// Read a recorded timeline. The store emits either a `{events: [...]}`
/// batch or a bare record array.
fn load_timeline(path: &str) -> Result<Timeline, Box<dyn Error>> {
    let raw = std::fs::read_to_string(path)?;
    let batch = match serde_json::from_str::<ReplayBatch>(&raw) {
        Ok(batch) => batch,
        Err(_) => ReplayBatch {
            events: serde_json::from_str::<Vec<ReplayRecord>>(&raw)?,
        },
    };
    Ok(Timeline::from_batch(batch))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    // Setup panic hook to restore terminal on crash
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));

    let cfg = EngineConfig::from_env();
    let mut controller = PlaybackController::new(cfg);

    // An argument selects replay mode; otherwise attach to the live feed.
    let replay_path = std::env::args().nth(1);
    if let Some(path) = &replay_path {
        match load_timeline(path) {
            Ok(timeline) => {
                info!(path = path.as_str(), events = timeline.len(), "timeline loaded");
                controller.load(timeline);
            }
            Err(err) => {
                // Stay Idle with zero duration rather than half-loaded.
                warn!(path = path.as_str(), %err, "failed to load timeline");
                controller.load(Timeline::default());
            }
        }
    } else {
        controller.go_live();
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let controller = Arc::new(Mutex::new(controller));
    let connected = Arc::new(AtomicBool::new(false));

    if replay_path.is_none() {
        let client = FeedClient::new(FeedConfig::new(get_ws_url()));
        let (mut event_rx, mut status_rx) = client.start();

        {
            let pc = Arc::clone(&controller);
            tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    let mut guard = pc.lock().await;
                    guard.apply_live(event, now_ms());
                }
            });
        }

        {
            let connected_flag = Arc::clone(&connected);
            tokio::spawn(async move {
                while let Some(status) = status_rx.recv().await {
                    match status {
                        ConnectionStatus::Connected => {
                            connected_flag.store(true, Ordering::Relaxed)
                        }
                        ConnectionStatus::Disconnected | ConnectionStatus::Reconnecting => {
                            connected_flag.store(false, Ordering::Relaxed)
                        }
                    }
                }
            });
        }
    }

    let mut last_render = Instant::now();
    let render_interval = Duration::from_millis(100);

    loop {
        if event::poll(Duration::from_millis(30))? {
            if let Event::Key(key) = event::read()? {
                let mut guard = controller.lock().await;
                let now = now_ms();
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Char(' ') => guard.toggle(now),
                    KeyCode::Left => guard.scrub_by(-0.05, now),
                    KeyCode::Right => guard.scrub_by(0.05, now),
                    KeyCode::Char('w') => {
                        let mode = match guard.state().entity_mode() {
                            EntityMode::AllTrades => EntityMode::WhalesOnly,
                            EntityMode::WhalesOnly => EntityMode::AllTrades,
                        };
                        guard.state_mut().set_mode(mode, now);
                    }
                    KeyCode::Char('r') => {
                        if guard.mode() == PlaybackMode::Live {
                            guard.replay_live_buffer();
                            guard.play(now);
                        }
                    }
                    KeyCode::Char('l') => guard.go_live(),
                    _ => {}
                }
            }
        }

        if last_render.elapsed() >= render_interval {
            let snapshot = {
                let mut guard = controller.lock().await;
                let now = now_ms();
                guard.tick(now);
                build_snapshot(&mut guard, connected.load(Ordering::Relaxed), now)
            };
            terminal.draw(|f| ui(f, &snapshot))?;
            last_render = Instant::now();
        }
    }

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn build_snapshot(pc: &mut PlaybackController, connected: bool, now: i64) -> UiSnapshot {
    // In replay, transient TTLs run on the virtual clock.
    let view_now = match pc.mode() {
        PlaybackMode::Live => now,
        PlaybackMode::Replay => {
            pc.timeline().start_ts_ms()
                + (pc.progress() * pc.timeline().duration_ms() as f64) as i64
        }
    };

    let mut entities: Vec<_> = pc.state().entities().cloned().collect();
    entities.sort_by(|a, b| b.value.total_cmp(&a.value));
    entities.truncate(20);

    let alerts: Vec<_> = pc.state().recent_alerts().rev().take(8).cloned().collect();

    UiSnapshot {
        connected,
        mode: pc.mode(),
        status: pc.status(),
        progress: pc.progress(),
        speed: pc.speed_multiplier(),
        entity_mode: pc.state().entity_mode(),
        entity_count: pc.state().entity_count(),
        mid_price: pc.state().mid_price(),
        imbalance: pc.state().imbalance(),
        bid_walls: pc.state().bid_walls().to_vec(),
        ask_walls: pc.state().ask_walls().to_vec(),
        activity: pc.state().whale_activity(view_now),
        price_change_10s: pc.state().price_change_10s(view_now),
        hype: pc.state().hype_reality(view_now),
        bull_bear: pc.state().bull_bear(),
        flashes: pc.state_mut().flashes(view_now),
        ripple_count: pc.state_mut().ripples(view_now).len(),
        markers: pc.state_mut().markers(view_now),
        entities,
        alerts,
    }
}
