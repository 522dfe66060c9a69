use crate::client::app::App;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Instant;

static ANSI_ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z~]|\x1b\][^\x07]*(?:\x07|\x1b\\)|\x1b[a-zA-Z]").unwrap()
});

/// Usernames are whatever clients claim; keep escape and control
/// sequences out of the terminal
pub fn sanitize_name(s: &str) -> String {
    ANSI_ESCAPE_RE
        .replace_all(s, "")
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}

const HELP_TEXT: &[&str] = &[
    "Room controls",
    "",
    "  s        Start the game (host, 2+ players)",
    "  l        Leave the room",
    "  q / Esc  Close this view, stay in the room",
    "  ?        Toggle this help",
];

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_header(f, app, chunks[0]);
    draw_members(f, app, chunks[1]);
    draw_status(f, app, chunks[2]);
    draw_controls(f, app, chunks[3]);
    draw_notifications(f, app);
    draw_help_popup(f, app);
}

fn draw_header(f: &mut Frame, app: &App, area: Rect) {
    let title = Line::from(vec![
        Span::styled(
            format!("Room {}", sanitize_name(app.view.room_id())),
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            "  as {}  since {}",
            sanitize_name(app.view.identity()),
            app.entered_at.format("%H:%M")
        )),
    ]);
    let header = Paragraph::new(title).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    );
    f.render_widget(header, area);
}

fn draw_members(f: &mut Frame, app: &App, area: Rect) {
    let host = app.view.room().and_then(|r| r.host.as_deref());
    let items: Vec<ListItem> = app
        .view
        .members()
        .iter()
        .map(|member| {
            let mut spans = vec![Span::raw(sanitize_name(member))];
            if Some(member.as_str()) == host {
                spans.push(Span::styled(" ★ host", Style::default().fg(Color::Yellow)));
            }
            if member == app.view.identity() {
                spans.push(Span::styled(" (you)", Style::default().fg(Color::DarkGray)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .title("Players in this room")
            .borders(Borders::ALL),
    );
    f.render_widget(list, area);
}

fn draw_status(f: &mut Frame, app: &App, area: Rect) {
    let style = if app.view.error().is_some() {
        Style::default().fg(Color::LightRed)
    } else if app.view.started() {
        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };
    f.render_widget(Paragraph::new(app.status_line()).style(style), area);
}

fn draw_controls(f: &mut Frame, app: &App, area: Rect) {
    let enabled = Style::default().fg(Color::Black).bg(Color::Green);
    let disabled = Style::default().fg(Color::DarkGray);

    let mut spans = Vec::new();
    if app.view.is_host() {
        let label = if app.view.started() {
            " Game Started "
        } else if app.view.is_starting() {
            " Starting... "
        } else {
            " [s] Start Game "
        };
        spans.push(Span::styled(
            label,
            if app.view.can_start() { enabled } else { disabled },
        ));
        spans.push(Span::raw(" "));
    }
    let leave = if app.view.is_leaving() {
        " Leaving... "
    } else {
        " [l] Leave Room "
    };
    spans.push(Span::styled(
        leave,
        Style::default().fg(Color::Black).bg(Color::Magenta),
    ));
    spans.push(Span::raw("  [q] close  [?] help"));

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_notifications(f: &mut Frame, app: &App) {
    let now = Instant::now();
    let notifications: Vec<_> = app
        .notifications
        .iter()
        .filter(|n| now.duration_since(n.timestamp) < n.duration)
        .collect();

    let max_width = f.area().width.saturating_sub(4);
    let mut current_y = f.area().height.saturating_sub(3);

    for notification in notifications.iter().rev() {
        let message = format!(" {}", sanitize_name(&notification.message));
        let display: String = message.chars().take(max_width as usize).collect();
        let width = display.chars().count() as u16 + 2;
        let x = f.area().width.saturating_sub(width).saturating_sub(1);

        let p = Paragraph::new(display).style(Style::default().bg(Color::DarkGray).fg(Color::White));
        f.render_widget(p, Rect::new(x, current_y, width, 1));
        current_y = current_y.saturating_sub(1);
        if current_y <= 3 {
            break;
        }
    }
}

fn draw_help_popup(f: &mut Frame, app: &App) {
    if !app.show_help {
        return;
    }

    let size = f.area();
    let width = size.width.saturating_sub(10).min(60);
    let height = size.height.saturating_sub(4).min(HELP_TEXT.len() as u16 + 2);
    let area = Rect::new(
        (size.width - width) / 2,
        (size.height - height) / 2,
        width,
        height,
    );

    let block = Block::default()
        .title("Help (press ? to close)")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue))
        .style(Style::default().bg(Color::Black));

    let inner = block.inner(area);
    f.render_widget(block, area);
    let lines: Vec<ListItem> = HELP_TEXT
        .iter()
        .map(|&s| ListItem::new(Text::raw(s)))
        .collect();
    f.render_widget(List::new(lines), inner);
}
