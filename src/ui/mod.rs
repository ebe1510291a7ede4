//! Terminal dashboard: key handling and the render loop.

pub mod format;
pub mod panels;

use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

const INPUT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Main,
    Logs,
}

pub struct App {
    pub state: Arc<AppState>,
    pub page: Page,
    pub should_quit: bool,
}

impl App {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            page: Page::Main,
            should_quit: false,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true
            }
            KeyCode::Char('p') => {
                info!("🔍 Peer analysis restarted");
                self.state.restart_peer_analysis();
            }
            KeyCode::Char('r') | KeyCode::Char('h') => {
                let role = self.state.refresh_role();
                info!("🔍 Role refreshed ({}), peer analysis restarted", role);
                self.state.restart_peer_analysis();
            }
            KeyCode::Char('l') => {
                self.page = match self.page {
                    Page::Main => Page::Logs,
                    Page::Logs => Page::Main,
                }
            }
            _ => {}
        }
    }
}

/// Take over the terminal until the operator quits or the failure threshold is hit
pub async fn run(state: Arc<AppState>) -> Result<(), AppError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(state);
    let res = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> Result<(), AppError> {
    let tick = Duration::from_secs(app.state.config.app.refresh);
    let mut last_draw: Option<Instant> = None;
    let mut dirty = true;

    loop {
        if dirty || last_draw.map_or(true, |t| t.elapsed() >= tick) {
            app.state.failures.check()?;
            terminal.draw(|f| panels::ui(f, app))?;
            last_draw = Some(Instant::now());
            dirty = false;
        }

        if event::poll(INPUT_POLL)? {
            if let Event::Key(key) = event::read()? {
                app.handle_key(key);
                dirty = true;
            }
        }

        if app.should_quit {
            return Ok(());
        }

        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::genesis::GenesisModel;
    use crate::log_buffer::LogBuffer;
    use crate::metrics::NodeMetrics;
    use crate::peers::{
        DisabledGeoLocator, DiscoveryConfig, LatencyProber, PeerDiscovery, TcpInfoProbe,
    };
    use ratatui::backend::TestBackend;

    fn app(config: Config) -> App {
        let genesis = GenesisModel::resolve(&config).unwrap();
        let discovery = PeerDiscovery::new(DiscoveryConfig::from_config(&config));
        let prober = LatencyProber::new(
            Arc::new(TcpInfoProbe::default()),
            Arc::new(DisabledGeoLocator),
        );
        App::new(Arc::new(AppState::new(
            config,
            genesis,
            discovery,
            prober,
            Arc::new(LogBuffer::new(100)),
        )))
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn screen(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let mut out = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                out.push_str(buffer.get(x, y).symbol());
            }
            out.push('\n');
        }
        out
    }

    #[test]
    fn test_quit_keys() {
        for code in [KeyCode::Char('q'), KeyCode::Esc] {
            let mut app = app(Config::default());
            app.handle_key(press(code));
            assert!(app.should_quit);
        }

        let mut app = app(Config::default());
        app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(app.should_quit);
    }

    #[test]
    fn test_log_page_toggle() {
        let mut app = app(Config::default());
        app.handle_key(press(KeyCode::Char('l')));
        assert_eq!(app.page, Page::Logs);
        app.handle_key(press(KeyCode::Char('l')));
        assert_eq!(app.page, Page::Main);
        app.handle_key(press(KeyCode::Char('x')));
        assert!(!app.should_quit);
    }

    #[test]
    fn test_refresh_key_updates_role() {
        let mut config = Config::default();
        config.node.block_producer = true;
        let mut app = app(config);
        app.handle_key(press(KeyCode::Char('h')));
        assert_eq!(app.state.role(), crate::node::Role::Core);
        assert!(app.state.discovery.snapshot().is_empty());
    }

    #[test]
    fn test_render_main_and_logs() {
        let mut config = Config::default();
        config.app.node_name = "relay-01".to_string();
        let mut app = app(config);
        app.state.set_metrics(NodeMetrics {
            block_num: 10_543_210,
            epoch_num: 480,
            slot_in_epoch: 216_000,
            ..Default::default()
        });

        let mut terminal = Terminal::new(TestBackend::new(140, 50)).unwrap();
        terminal.draw(|f| panels::ui(f, &app)).unwrap();
        let text = screen(&terminal);
        assert!(text.contains("relay-01"));
        assert!(text.contains("10,543,210"));
        assert!(text.contains("Epoch 480"));
        assert!(text.contains("Waiting for peer connections"));

        let subscriber = {
            use tracing_subscriber::layer::SubscriberExt;
            tracing_subscriber::registry().with(crate::log_buffer::LogBufferLayer::new(
                app.state.log_buffer.clone(),
            ))
        };
        tracing::subscriber::with_default(subscriber, || {
            app.handle_key(press(KeyCode::Char('p')));
            app.handle_key(press(KeyCode::Char('l')));
        });
        assert_eq!(app.page, Page::Logs);
        terminal.draw(|f| panels::ui(f, &app)).unwrap();
        assert!(screen(&terminal).contains("Peer analysis restarted"));
    }

    #[test]
    fn test_core_panel_shows_kes_estimate() {
        let mut config = Config::default();
        config.node.block_producer = true;
        let app = app(config);
        let estimate = app.state.chain().kes_period;
        app.state.set_metrics(NodeMetrics {
            kes_period: estimate + 1,
            remaining_kes_periods: 40,
            ..Default::default()
        });

        let mut terminal = Terminal::new(TestBackend::new(140, 50)).unwrap();
        terminal.draw(|f| panels::ui(f, &app)).unwrap();
        let text = screen(&terminal);
        assert!(text.contains(&format!("{} (est. {})", estimate + 1, estimate)));
        assert!(text.contains("KES remaining"));
    }
}
