use std::borrow::Cow;

use ratatui::{
    layout::{Alignment, Constraint, Direction as LayoutDirection, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, Wrap},
    Frame,
};

use super::format::{
    format_bytes, group_digits, histogram_bar, percent_or_na, tip_status_text, HISTOGRAM_WIDTH,
};
use super::{App, Page};
use crate::epoch::{self, format_duration, TipStatus};
use crate::node::{Role, NOT_AVAILABLE};
use crate::peers::{Direction, PeerRecord, ProbePhase, RttBucket};

const LABEL: Style = Style::new().fg(Color::Gray);
const VALUE: Style = Style::new().fg(Color::White);
const ACCENT: Style = Style::new().fg(Color::Cyan);

fn panel<'a>(title: impl Into<Cow<'a, str>>) -> Block<'a> {
    Block::default().borders(Borders::ALL).title(Span::styled(
        title,
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    ))
}

fn field(label: &str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{:<14}: ", label), LABEL),
        Span::styled(value, VALUE),
    ])
}

pub fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Content
            Constraint::Length(3), // Footer
        ])
        .split(f.size());

    render_header(f, chunks[0], app);
    match app.page {
        Page::Main => render_main(f, chunks[1], app),
        Page::Logs => render_logs(f, chunks[1], app),
    }
    render_footer(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let state = &app.state;
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" > {}", state.config.app.node_name),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("{} {}", state.genesis.network, state.role()),
            Style::default().fg(Color::Green),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("nodeview {}", crate::version::version_string()),
            Style::default().fg(Color::Gray),
        ),
    ]))
    .block(Block::default().borders(Borders::ALL))
    .alignment(Alignment::Left);

    f.render_widget(header, area);
}

fn render_main(f: &mut Frame, area: Rect, app: &App) {
    let columns = Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(area);

    let core_height = if app.state.role() == Role::Core { 9 } else { 0 };
    let left = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Length(8),           // Node
            Constraint::Length(6),           // Resources
            Constraint::Length(8),           // Connections
            Constraint::Length(core_height), // Core
            Constraint::Min(0),
        ])
        .split(columns[0]);

    render_node(f, left[0], app);
    render_resources(f, left[1], app);
    render_connections(f, left[2], app);
    if core_height > 0 {
        render_core(f, left[3], app);
    }

    let right = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Length(3),  // Epoch
            Constraint::Length(10), // Chain
            Constraint::Length(6),  // Block propagation
            Constraint::Min(8),     // Peers
        ])
        .split(columns[1]);

    render_epoch_gauge(f, right[0], app);
    render_chain(f, right[1], app);
    render_propagation(f, right[2], app);
    render_peers(f, right[3], app);
}

fn render_node(f: &mut Frame, area: Rect, app: &App) {
    let state = &app.state;
    let process = state.process();
    let uptime = process
        .as_ref()
        .map(|p| format_duration(p.uptime_secs))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let version = state
        .node_version()
        .map(|v| v.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let public_ip = state
        .public_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let lines = vec![
        field("Uptime", uptime),
        field("Version", version),
        field("Network", state.genesis.network.to_string()),
        field("Role", state.role().to_string()),
        field("P2P", if state.p2p() { "enabled" } else { "disabled" }.to_string()),
        field("Public IP", public_ip),
    ];
    f.render_widget(Paragraph::new(lines).block(panel("Node")), area);
}

fn render_resources(f: &mut Frame, area: Rect, app: &App) {
    let state = &app.state;
    let process = state.process();
    let metrics = state.metrics();

    let cpu = process
        .as_ref()
        .map(|p| format!("{:.1}%", p.cpu_percent))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let rss = process
        .as_ref()
        .map(|p| format_bytes(p.rss_bytes))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let (live, gc) = match metrics.as_deref() {
        Some(m) => (
            format!("{} / {}", format_bytes(m.mem_live), format_bytes(m.mem_heap)),
            format!("{} minor / {} major", m.gc_minor, m.gc_major),
        ),
        None => (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string()),
    };

    let lines = vec![
        field("CPU", cpu),
        field("RSS", rss),
        field("Live / Heap", live),
        field("GC", gc),
    ];
    f.render_widget(Paragraph::new(lines).block(panel("Resources")), area);
}

fn render_connections(f: &mut Frame, area: Rect, app: &App) {
    let state = &app.state;
    let lines = if state.p2p() {
        match state.metrics() {
            Some(m) => vec![
                field("Incoming", m.conn_incoming.to_string()),
                field("Outgoing", m.conn_outgoing.to_string()),
                field(
                    "Uni / Bi / Dup",
                    format!("{} / {} / {}", m.conn_unidirectional, m.conn_bidirectional, m.conn_prunable),
                ),
                field(
                    "Cold/Warm/Hot",
                    format!("{} / {} / {}", m.peers_cold, m.peers_warm, m.peers_hot),
                ),
            ],
            None => vec![field("Peers", NOT_AVAILABLE.to_string())],
        }
    } else {
        let peers = state.discovery.snapshot();
        let count = |dir: Direction| peers.iter().filter(|p| p.direction == dir).count();
        vec![
            field("Incoming", count(Direction::In).to_string()),
            field("Outgoing", count(Direction::Out).to_string()),
            field("Duplex", count(Direction::Duplex).to_string()),
            field("Total", peers.len().to_string()),
        ]
    };
    f.render_widget(Paragraph::new(lines).block(panel("Connections")), area);
}

fn render_core(f: &mut Frame, area: Rect, app: &App) {
    let state = &app.state;
    let Some(m) = state.metrics() else {
        f.render_widget(
            Paragraph::new(NOT_AVAILABLE).block(panel("Core")),
            area,
        );
        return;
    };

    let now = epoch::now_unix_secs();
    let expiry = epoch::kes_expiry(&state.genesis, now, m.remaining_kes_periods)
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let kes_estimate = state.chain().kes_period;
    let kes_style = if m.kes_period == kes_estimate {
        VALUE
    } else {
        Style::default().fg(Color::Yellow)
    };

    let lines = vec![
        Line::from(vec![
            Span::styled(format!("{:<14}: ", "KES period"), LABEL),
            Span::styled(format!("{} (est. {})", m.kes_period, kes_estimate), kes_style),
        ]),
        field("KES remaining", m.remaining_kes_periods.to_string()),
        field("KES expiry", expiry),
        field("Leader", m.is_leader.to_string()),
        field("Adopted", m.adopted.to_string()),
        field("Invalid", m.didnt_adopt.to_string()),
        field("Missed slots", format!("{} ({:.2}%)", m.missed_slots, m.missed_slots_percent())),
    ];
    f.render_widget(Paragraph::new(lines).block(panel("Core")), area);
}

fn render_epoch_gauge(f: &mut Frame, area: Rect, app: &App) {
    let state = &app.state;
    let progress = state.epoch_progress();
    let chain = state.chain();
    let epoch_num = state
        .metrics()
        .map(|m| m.epoch_num)
        .unwrap_or(chain.epoch_estimate);
    let remaining = epoch::time_until_next_epoch(&state.genesis, epoch::now_unix_secs());

    let gauge = Gauge::default()
        .block(panel(format!("Epoch {}", epoch_num)))
        .gauge_style(Style::default().fg(Color::Green).bg(Color::DarkGray))
        .ratio((progress / 100.0).clamp(0.0, 1.0))
        .label(format!("{:.1}%  ({} left)", progress, format_duration(remaining)));
    f.render_widget(gauge, area);
}

fn render_chain(f: &mut Frame, area: Rect, app: &App) {
    let state = &app.state;
    let now = epoch::now_unix_secs();
    let tip_ref = epoch::current_slot_estimate(&state.genesis, now);
    let status = state.tip_status(now);
    let status_style = match status {
        Some(TipStatus::Healthy(_)) => Style::default().fg(Color::Green),
        Some(TipStatus::Lagging(_)) => Style::default().fg(Color::Yellow),
        Some(TipStatus::Syncing(_)) | Some(TipStatus::Starting) => Style::default().fg(Color::Red),
        None => VALUE,
    };

    let mut lines = match state.metrics() {
        Some(m) => vec![
            field("Block", group_digits(m.block_num)),
            field("Slot", format!("{} (epoch slot {})", group_digits(m.slot_num), m.slot_in_epoch)),
            field("Tip (ref)", group_digits(tip_ref)),
            Line::from(vec![
                Span::styled(format!("{:<14}: ", "Tip diff"), LABEL),
                Span::styled(tip_status_text(status), status_style),
            ]),
            field("Density", format!("{:.3}%", m.density * 100.0)),
            field("Mempool", format!("{} tx / {}", m.mempool_tx, format_bytes(m.mempool_bytes))),
            field("Processed tx", group_digits(m.tx_processed)),
        ],
        None => vec![
            field("Tip (ref)", group_digits(tip_ref)),
            field("Status", "waiting for metrics...".to_string()),
        ],
    };
    lines.push(field(
        "Block interval",
        format!("~{}s", epoch::slot_interval_threshold(&state.genesis) / 1000),
    ));
    f.render_widget(Paragraph::new(lines).block(panel("Chain")), area);
}

fn render_propagation(f: &mut Frame, area: Rect, app: &App) {
    let lines = match app.state.metrics() {
        Some(m) => vec![
            field(
                "Within 1/3/5s",
                format!(
                    "{:.0}% / {:.0}% / {:.0}%",
                    m.blocks_within_1s * 100.0,
                    m.blocks_within_3s * 100.0,
                    m.blocks_within_5s * 100.0
                ),
            ),
            field("Last delay", format!("{:.2}s", m.block_delay)),
            field("Served", group_digits(m.blocks_served)),
            field("Late", format!("{} (forks {})", m.blocks_late, m.forks)),
        ],
        None => vec![field("Propagation", NOT_AVAILABLE.to_string())],
    };
    f.render_widget(Paragraph::new(lines).block(panel("Block Propagation")), area);
}

fn render_peers(f: &mut Frame, area: Rect, app: &App) {
    let state = &app.state;
    let stats = state.prober.snapshot();

    if stats.phase != ProbePhase::Done {
        let text = if stats.expected == 0 {
            "Waiting for peer connections...".to_string()
        } else {
            format!(
                "Peer analysis started... please wait! {}/{}",
                stats.checked, stats.expected
            )
        };
        f.render_widget(
            Paragraph::new(Span::styled(text, ACCENT))
                .block(panel("Peers"))
                .wrap(Wrap { trim: true }),
            area,
        );
        return;
    }

    let chunks = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(0)])
        .split(area);

    let colors = [Color::Green, Color::Yellow, Color::LightRed, Color::Red];
    let mut lines: Vec<Line> = RttBucket::ALL[..4]
        .iter()
        .zip(colors)
        .map(|(bucket, color)| {
            let pct = stats.percent(*bucket);
            Line::from(vec![
                Span::styled(format!("{:>10} ", bucket.label()), LABEL),
                Span::styled(
                    format!("{:>3} {:>4} ", stats.count(*bucket), percent_or_na(pct)),
                    VALUE,
                ),
                Span::styled(
                    histogram_bar(pct.unwrap_or(0.0), HISTOGRAM_WIDTH),
                    Style::default().fg(color),
                ),
            ])
        })
        .collect();
    lines.push(Line::from(vec![
        Span::styled(format!("{:>10} ", "total"), LABEL),
        Span::styled(
            format!(
                "{}  unreachable {}  avg {}",
                stats.checked,
                stats.count(RttBucket::Unreachable),
                stats
                    .average_rtt_ms
                    .map(|ms| format!("{} ms", ms))
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string())
            ),
            VALUE,
        ),
    ]));
    f.render_widget(Paragraph::new(lines).block(panel("Peers")), chunks[0]);

    let rows: Vec<Row> = state
        .prober
        .peers()
        .iter()
        .enumerate()
        .map(|(i, peer)| peer_row(i + 1, peer))
        .collect();
    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Min(24),
            Constraint::Length(4),
            Constraint::Length(7),
            Constraint::Min(16),
        ],
    )
    .header(
        Row::new(vec!["#", "Remote peer", "Dir", "RTT ms", "Location"])
            .style(Style::default().fg(Color::Yellow)),
    )
    .block(panel("Peer RTT"));
    f.render_widget(table, chunks[1]);
}

fn peer_row(rank: usize, peer: &PeerRecord) -> Row<'static> {
    let rtt_color = match peer.rtt.bucket() {
        RttBucket::Under50 => Color::Green,
        RttBucket::Under100 => Color::Yellow,
        RttBucket::Under200 => Color::LightRed,
        RttBucket::Over200 | RttBucket::Unreachable => Color::Red,
    };
    Row::new(vec![
        Cell::from(rank.to_string()),
        Cell::from(format!("{}:{}", peer.ip, peer.port)),
        Cell::from(peer.direction.to_string()),
        Cell::from(Span::styled(peer.rtt.to_string(), Style::default().fg(rtt_color))),
        Cell::from(peer.location_or_placeholder().to_string()),
    ])
}

fn render_logs(f: &mut Frame, area: Rect, app: &App) {
    let height = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = app
        .state
        .log_buffer
        .tail(height)
        .into_iter()
        .map(|line| Line::from(line.to_string()))
        .collect();
    f.render_widget(Paragraph::new(lines).block(panel("Log")), area);
}

fn render_footer(f: &mut Frame, area: Rect, app: &App) {
    let key = Style::default().fg(Color::Yellow);
    let mut spans = vec![
        Span::styled("[q] ", key),
        Span::raw("Quit  |  "),
        Span::styled("[p] ", key),
        Span::raw("Peer analysis  |  "),
        Span::styled("[r] ", key),
        Span::raw("Refresh  |  "),
        Span::styled("[l] ", key),
        Span::raw(match app.page {
            Page::Main => "Logs",
            Page::Logs => "Dashboard",
        }),
    ];
    let failures = app.state.failures.count();
    if failures > 0 {
        spans.push(Span::styled(
            format!(
                "  |  {} failed polls in a row (max {})",
                failures,
                app.state.failures.threshold()
            ),
            Style::default().fg(Color::Red),
        ));
    }

    let footer = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Left);
    f.render_widget(footer, area);
}
