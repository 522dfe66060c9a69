use super::room::RoomView;
use chrono::{DateTime, Local};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::time::{Duration, Instant};

pub struct Notification {
    pub message: String,
    pub timestamp: Instant,
    pub duration: Duration,
}

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Leave,
    /// Close the view but stay a member
    Detach,
    ToggleHelp,
    None,
}

pub fn action_for_key(key: &KeyEvent) -> Action {
    match (key.code, key.modifiers) {
        (KeyCode::Char('c'), KeyModifiers::CONTROL) => Action::Detach,
        (KeyCode::Char('s'), _) => Action::Start,
        (KeyCode::Char('l'), _) => Action::Leave,
        (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => Action::Detach,
        (KeyCode::Char('?'), _) => Action::ToggleHelp,
        _ => Action::None,
    }
}

pub struct App {
    pub view: RoomView,
    pub notifications: Vec<Notification>,
    pub show_help: bool,
    pub entered_at: DateTime<Local>,
    /// Members at the last update, for join/leave notices; `None` before the first
    last_members: Option<Vec<String>>,
}

impl App {
    pub fn new(view: RoomView) -> Self {
        Self {
            view,
            notifications: Vec::new(),
            show_help: false,
            entered_at: Local::now(),
            last_members: None,
        }
    }

    pub fn add_notification(&mut self, message: String, duration: Duration) {
        self.notifications.push(Notification {
            message,
            timestamp: Instant::now(),
            duration,
        });
    }

    pub fn prune_notifications(&mut self) {
        let now = Instant::now();
        self.notifications
            .retain(|n| now.duration_since(n.timestamp) < n.duration);
    }

    /// Queue notices for members who arrived or left since the last update
    pub fn note_membership_changes(&mut self) {
        let current = self.view.members().to_vec();
        let Some(previous) = self.last_members.replace(current.clone()) else {
            return;
        };

        let arrived: Vec<_> = current
            .iter()
            .filter(|m| !previous.contains(m))
            .cloned()
            .collect();
        let departed: Vec<_> = previous
            .iter()
            .filter(|m| !current.contains(m))
            .cloned()
            .collect();

        for name in arrived {
            self.add_notification(format!("{} joined", name), Duration::from_secs(3));
        }
        for name in departed {
            self.add_notification(format!("{} left", name), Duration::from_secs(3));
        }
    }

    pub fn status_line(&self) -> String {
        if self.view.is_loading() {
            return "Loading...".to_string();
        }
        if let Some(error) = self.view.error() {
            return error.to_string();
        }
        if self.view.is_leaving() {
            return "Leaving...".to_string();
        }
        if self.view.started() {
            return "Game started".to_string();
        }
        if self.view.is_starting() {
            return "Starting...".to_string();
        }
        match self.view.members().len() {
            0 => "No players yet.".to_string(),
            1 => "Waiting for more players".to_string(),
            n if self.view.is_host() => format!("{} players ready - press s to start", n),
            n => format!("{} players - waiting for the host", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Room;

    fn room(members: &[&str], started: bool) -> Room {
        Room {
            room_id: "R1".to_string(),
            members: members.iter().map(|s| s.to_string()).collect(),
            host: members.first().map(|s| s.to_string()),
            started,
        }
    }

    #[test]
    fn test_keys_map_to_actions() {
        let key = |c| KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE);
        assert_eq!(action_for_key(&key('s')), Action::Start);
        assert_eq!(action_for_key(&key('l')), Action::Leave);
        assert_eq!(action_for_key(&key('q')), Action::Detach);
        assert_eq!(action_for_key(&key('x')), Action::None);
        assert_eq!(
            action_for_key(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Action::Detach
        );
    }

    #[test]
    fn test_status_line_for_host_and_guest() {
        let mut host = App::new(RoomView::new("R1", "alice"));
        host.view.apply_change(room(&["alice", "bob"], false));
        assert!(host.status_line().contains("press s to start"));

        let mut guest = App::new(RoomView::new("R1", "bob"));
        guest.view.apply_change(room(&["alice", "bob"], false));
        assert!(guest.status_line().contains("waiting for the host"));

        guest.view.apply_change(room(&["alice", "bob"], true));
        assert_eq!(guest.status_line(), "Game started");
    }

    #[test]
    fn test_membership_notices() {
        let mut app = App::new(RoomView::new("R1", "alice"));
        app.view.apply_change(room(&["alice"], false));
        app.note_membership_changes();
        assert!(app.notifications.is_empty());

        app.view.apply_change(room(&["alice", "bob"], false));
        app.note_membership_changes();
        app.view.apply_change(room(&["bob"], false));
        app.note_membership_changes();

        let messages: Vec<_> = app.notifications.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["bob joined", "alice left"]);
    }

    #[test]
    fn test_arrivals_noticed_after_room_was_empty() {
        let mut app = App::new(RoomView::new("R1", "alice"));
        app.view.apply_change(room(&[], false));
        app.note_membership_changes();
        assert!(app.notifications.is_empty());

        app.view.apply_change(room(&["bob"], false));
        app.note_membership_changes();
        app.view.apply_change(room(&[], false));
        app.note_membership_changes();
        app.view.apply_change(room(&["carol"], false));
        app.note_membership_changes();

        let messages: Vec<_> = app.notifications.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["bob joined", "bob left", "carol joined"]);
    }
}
