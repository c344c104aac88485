use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal,
};
use steadycast_engine::{PlayerHandle, PlayerError, UiCommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Volume change per `+`/`-` key press.
pub const VOLUME_STEP: i16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Command(UiCommand),
    /// Relative volume change, applied to the last published volume.
    Volume(i16),
    Quit,
}

/// Maps a key press to a player action.
pub fn map_key(key: &KeyEvent) -> Option<KeyAction> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return matches!(key.code, KeyCode::Char('c')).then_some(KeyAction::Quit);
    }
    let action = match key.code {
        KeyCode::Char(' ') | KeyCode::Char('k') => KeyAction::Command(UiCommand::TogglePlay),
        KeyCode::Char('m') => KeyAction::Command(UiCommand::ToggleMute),
        KeyCode::Char('f') => KeyAction::Command(UiCommand::ToggleFullscreen),
        KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Up => KeyAction::Volume(VOLUME_STEP),
        KeyCode::Char('-') | KeyCode::Down => KeyAction::Volume(-VOLUME_STEP),
        KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
        // Any other key counts as activity over the player.
        _ => KeyAction::Command(UiCommand::RevealControls),
    };
    Some(action)
}

/// Applies a relative volume step, saturating at 0 and 100.
pub fn step_volume(current: u8, delta: i16) -> u8 {
    (i16::from(current) + delta).clamp(0, 100) as u8
}

fn dispatch(handle: &PlayerHandle, command: UiCommand) -> Result<(), PlayerError> {
    match command {
        UiCommand::TogglePlay => handle.toggle_play(),
        UiCommand::SetVolume(volume) => handle.set_volume(volume),
        UiCommand::ToggleMute => handle.toggle_mute(),
        UiCommand::ToggleFullscreen => handle.toggle_fullscreen(),
        UiCommand::RevealControls => handle.reveal_controls(),
    }
}

/// Listens for key presses and forwards them to the player.
///
/// Blocks the calling thread; run it on a blocking task. Raw mode is enabled
/// for the duration and restored once `token` is cancelled or `q` is pressed.
pub fn input_handler(handle: PlayerHandle, token: CancellationToken) {
    if terminal::enable_raw_mode().is_err() {
        info!("Failed to enable raw mode. Input handling will be disabled.");
        return;
    }

    while !token.is_cancelled() {
        let Ok(true) = event::poll(Duration::from_millis(100)) else {
            continue;
        };
        let Ok(Event::Key(key)) = event::read() else {
            continue;
        };
        let result = match map_key(&key) {
            Some(KeyAction::Command(command)) => dispatch(&handle, command),
            Some(KeyAction::Volume(delta)) => {
                handle.set_volume(step_volume(handle.state().volume, delta))
            }
            Some(KeyAction::Quit) => {
                info!("Quit requested. Shutting down gracefully...");
                token.cancel();
                break;
            }
            None => Ok(()),
        };
        if let Err(e) = result {
            warn!("Player no longer accepts commands: {e}");
            token.cancel();
            break;
        }
    }

    if terminal::disable_raw_mode().is_err() {
        info!("Failed to disable raw mode.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_player_keys() {
        assert_eq!(
            map_key(&press(KeyCode::Char(' '))),
            Some(KeyAction::Command(UiCommand::TogglePlay))
        );
        assert_eq!(
            map_key(&press(KeyCode::Char('m'))),
            Some(KeyAction::Command(UiCommand::ToggleMute))
        );
        assert_eq!(
            map_key(&press(KeyCode::Char('f'))),
            Some(KeyAction::Command(UiCommand::ToggleFullscreen))
        );
        assert_eq!(
            map_key(&press(KeyCode::Char('+'))),
            Some(KeyAction::Volume(VOLUME_STEP))
        );
        assert_eq!(
            map_key(&press(KeyCode::Down)),
            Some(KeyAction::Volume(-VOLUME_STEP))
        );
        assert_eq!(
            map_key(&press(KeyCode::Char('x'))),
            Some(KeyAction::Command(UiCommand::RevealControls))
        );
    }

    #[test]
    fn test_quit_keys() {
        assert_eq!(map_key(&press(KeyCode::Char('q'))), Some(KeyAction::Quit));
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(map_key(&ctrl_c), Some(KeyAction::Quit));
        let ctrl_x = KeyEvent::new(KeyCode::Char('x'), KeyModifiers::CONTROL);
        assert_eq!(map_key(&ctrl_x), None);
    }

    #[test]
    fn test_release_events_are_ignored() {
        let mut key = press(KeyCode::Char(' '));
        key.kind = KeyEventKind::Release;
        assert_eq!(map_key(&key), None);
    }

    #[test]
    fn test_volume_step_saturates() {
        assert_eq!(step_volume(95, VOLUME_STEP), 100);
        assert_eq!(step_volume(5, -VOLUME_STEP), 0);
        assert_eq!(step_volume(50, -VOLUME_STEP), 40);
    }
}
