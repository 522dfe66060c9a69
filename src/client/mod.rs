//! Client - landing flow, room view and the terminal interface

mod app;
pub mod connection;
pub mod identity;
pub mod landing;
pub mod room;
mod ui;

pub use connection::RoomClient;
pub use identity::IdentityStore;
pub use landing::{check_entry, enter, validate_entry, EntryError, EntryRequest};
pub use room::{join_room, RoomView};

use crate::client::app::{action_for_key, Action, App};
use crate::config::Config;
use crate::store::{Room, RoomBackend, Subscription};
use anyhow::{anyhow, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::Stdout;
use std::time::Duration;
use tokio::sync::mpsc;

/// How the room view was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomExit {
    /// Left the room; membership removed
    Left,
    /// Closed the view; still a member
    Detached,
}

/// Connect to the configured server. The service key is only sent when
/// `service` is set.
pub async fn connect(config: &Config, service: bool) -> Result<RoomClient> {
    let key = if service {
        config.keys.service_key.clone()
    } else {
        config.keys.anon_key.clone()
    };
    RoomClient::connect(
        &config.socket_path(),
        key,
        Duration::from_millis(config.client.connect_timeout_ms),
    )
    .await
}

/// Landing flow followed by the room view
pub async fn enter_room(
    config: &Config,
    username: Option<String>,
    room_code: Option<String>,
) -> Result<RoomExit> {
    let identity = IdentityStore::new(config.identity_path());
    let username = match username {
        Some(name) => name,
        None => identity.load()?.unwrap_or_default(),
    };
    let room_code = room_code.unwrap_or_default();

    // Blank fields never reach the server
    validate_entry(&username, &room_code)?;

    let client = connect(config, false).await?;
    let request = enter(&client, &identity, &username, &room_code).await?;

    tracing::info!("Entering room {} as {}", request.room_id, request.username);
    run_room_view(&client, config, request).await
}

/// Print every room the server knows
pub async fn list_rooms(config: &Config) -> Result<()> {
    let client = connect(config, false).await?;
    let rooms = client.list_rooms().await?;

    if rooms.is_empty() {
        println!("No rooms found.");
        return Ok(());
    }
    for room in rooms {
        println!(
            "{:<20} {:>2} players  host: {:<16} {}",
            room.room_id,
            room.member_count,
            room.host.as_deref().unwrap_or("-"),
            if room.started { "started" } else { "waiting" }
        );
    }
    Ok(())
}

/// Provision an empty room
pub async fn create_room(config: &Config, room_id: &str) -> Result<()> {
    let client = connect(config, true).await?;
    let room = client.create_room(room_id.trim()).await?;
    println!("Room '{}' created.", room.room_id);
    Ok(())
}

/// Print the remembered username
pub fn whoami(config: &Config) -> Result<()> {
    let identity = IdentityStore::new(config.identity_path());
    match identity.load()? {
        Some(name) => println!("{}", name),
        None => println!("No username remembered yet."),
    }
    Ok(())
}

async fn run_room_view(
    client: &RoomClient,
    config: &Config,
    request: EntryRequest,
) -> Result<RoomExit> {
    let mut view = RoomView::new(&request.room_id, &request.username);
    view.load(client).await;

    // Subscribe before joining so our own join comes back as a push too
    let mut subscription = match client.subscribe(&request.room_id).await {
        Ok(sub) => Some(sub),
        Err(e) => {
            tracing::warn!("No live updates for {}: {}", request.room_id, e);
            None
        }
    };
    view.join(client, config.client.join_attempts).await;

    let mut app = App::new(view);
    app.note_membership_changes();

    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let (input_tx, input_rx) = mpsc::channel(100);
    std::thread::spawn(move || forward_input(event::read, input_tx));

    let result = event_loop(&mut terminal, &mut app, client, &mut subscription, input_rx).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Some(subscription) = subscription {
        if let Err(e) = client.unsubscribe(subscription).await {
            tracing::debug!("Unsubscribe from {} failed: {}", request.room_id, e);
        }
    }

    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    client: &RoomClient,
    subscription: &mut Option<Subscription>,
    mut input_rx: mpsc::Receiver<Event>,
) -> Result<RoomExit> {
    let mut tick = tokio::time::interval(Duration::from_millis(250));

    loop {
        app.prune_notifications();
        terminal.draw(|f| ui::draw(f, app))?;

        tokio::select! {
            event = input_rx.recv() => {
                let Some(event) = event else {
                    return Err(anyhow!("Terminal input closed"));
                };
                let Event::Key(key) = event else { continue };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match action_for_key(&key) {
                    Action::Start => {
                        if app.view.can_start() {
                            app.view.start(client).await;
                            app.note_membership_changes();
                        } else if app.view.is_host() && !app.view.started() {
                            app.add_notification(
                                "Need at least two players to start".to_string(),
                                Duration::from_secs(3),
                            );
                        }
                    }
                    Action::Leave => {
                        app.view.leave(client).await;
                        return Ok(RoomExit::Left);
                    }
                    Action::Detach => return Ok(RoomExit::Detached),
                    Action::ToggleHelp => app.show_help = !app.show_help,
                    Action::None => {}
                }
            }

            change = next_change(subscription) => {
                match change {
                    Some(room) => {
                        app.view.apply_change(room);
                        app.note_membership_changes();
                    }
                    None => {
                        *subscription = None;
                        app.add_notification(
                            "Live updates stopped".to_string(),
                            Duration::from_secs(5),
                        );
                    }
                }
            }

            _ = tick.tick() => {}
        }
    }
}

/// Next pushed row, or never if there is no subscription
async fn next_change(subscription: &mut Option<Subscription>) -> Option<Room> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

/// Feed terminal events to the UI loop until either side goes away
fn forward_input<F>(mut read: F, input_tx: mpsc::Sender<Event>)
where
    F: FnMut() -> std::io::Result<Event>,
{
    loop {
        match read() {
            Ok(event) => {
                if input_tx.blocking_send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Terminal input failed: {}", e);
                break;
            }
        }
    }
}
