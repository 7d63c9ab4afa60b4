/// Physical input simulation.
///
/// `InputDriver` is the seam the dispatcher talks to; `EnigoDriver` is the
/// desktop implementation (enigo for pointer/keyboard, arboard for the
/// clipboard, the xcap window list for the focus query).
use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

use crate::agent_engine::state::Modifier;
use crate::errors::{PilotError, PilotResult};
use crate::perception::types::ScreenPoint;

/// Coordinates are screen (input) pixels.
pub trait InputDriver {
    fn move_to(&mut self, point: ScreenPoint) -> PilotResult<()>;
    fn click(&mut self) -> PilotResult<()>;
    fn type_text(&mut self, text: &str) -> PilotResult<()>;
    /// Single key, no modifiers.
    fn press(&mut self, key: &str) -> PilotResult<()>;
    /// Modifiers held down in order, key tapped, modifiers released in reverse.
    fn hotkey(&mut self, modifiers: &[Modifier], key: &str) -> PilotResult<()>;
    /// Put `text` on the clipboard and issue the platform paste shortcut.
    fn paste(&mut self, text: &str) -> PilotResult<()>;
    /// Whether the window under `point` is the focused one.
    fn window_focused_at(&mut self, point: ScreenPoint) -> PilotResult<bool>;
    /// Whether `press`/`hotkey` can send `key` on this backend.
    fn supports_key(&self, _key: &str) -> bool {
        true
    }
}

pub struct EnigoDriver {
    enigo: Enigo,
    clipboard: Option<arboard::Clipboard>,
}

impl EnigoDriver {
    pub fn new() -> PilotResult<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| PilotError::Executor(format!("Failed to initialize input backend: {e}")))?;
        Ok(Self {
            enigo,
            clipboard: None,
        })
    }

    fn key_click(&mut self, key: Key) -> PilotResult<()> {
        self.enigo
            .key(key, Direction::Click)
            .map_err(|e| PilotError::Executor(format!("Failed to press key: {e}")))
    }
}

impl InputDriver for EnigoDriver {
    fn move_to(&mut self, point: ScreenPoint) -> PilotResult<()> {
        tracing::debug!(x = point.x, y = point.y, "move pointer");
        self.enigo
            .move_mouse(point.x, point.y, Coordinate::Abs)
            .map_err(|e| PilotError::Executor(format!("Failed to move mouse: {e}")))
    }

    fn click(&mut self) -> PilotResult<()> {
        self.enigo
            .button(Button::Left, Direction::Click)
            .map_err(|e| PilotError::Executor(format!("Failed to click: {e}")))
    }

    fn type_text(&mut self, text: &str) -> PilotResult<()> {
        self.enigo
            .text(text)
            .map_err(|e| PilotError::Executor(format!("Failed to type text: {e}")))
    }

    fn press(&mut self, key: &str) -> PilotResult<()> {
        let k = to_enigo_key(key)
            .ok_or_else(|| PilotError::Executor(format!("Unknown key: {key}")))?;
        self.key_click(k)
    }

    fn hotkey(&mut self, modifiers: &[Modifier], key: &str) -> PilotResult<()> {
        let k = to_enigo_key(key)
            .ok_or_else(|| PilotError::Executor(format!("Unknown key: {key}")))?;

        let mut held: Vec<Key> = Vec::with_capacity(modifiers.len());
        let mut result = Ok(());
        for m in modifiers {
            let mk = modifier_key(*m);
            if let Err(e) = self.enigo.key(mk, Direction::Press) {
                result = Err(PilotError::Executor(format!("Failed to press modifier: {e}")));
                break;
            }
            held.push(mk);
        }
        if result.is_ok() {
            result = self.key_click(k);
        }
        // Always release what was pressed.
        let enigo = &mut self.enigo;
        release_in_reverse(held, |k| enigo.key(k, Direction::Release));
        result
    }

    fn paste(&mut self, text: &str) -> PilotResult<()> {
        if self.clipboard.is_none() {
            let cb = arboard::Clipboard::new()
                .map_err(|e| PilotError::Executor(format!("Failed to open clipboard: {e}")))?;
            self.clipboard = Some(cb);
        }
        if let Some(cb) = self.clipboard.as_mut() {
            cb.set_text(text.to_string())
                .map_err(|e| PilotError::Executor(format!("Failed to set clipboard: {e}")))?;
        }
        self.hotkey(&[paste_modifier()], "v")
    }

    fn window_focused_at(&mut self, point: ScreenPoint) -> PilotResult<bool> {
        let windows = match xcap::Window::all() {
            Ok(w) => w,
            Err(e) => {
                tracing::debug!(error = %e, "window list unavailable, assuming focused");
                return Ok(true);
            }
        };
        // Front-to-back order: the first visible window is the focused one.
        let visible: Vec<&xcap::Window> = windows
            .iter()
            .filter(|w| !w.is_minimized() && w.width() > 0 && w.height() > 0)
            .collect();
        let Some(front) = visible.first() else {
            return Ok(true);
        };
        let under = visible.iter().find(|w| {
            point.x >= w.x()
                && point.y >= w.y()
                && point.x < w.x() + w.width() as i32
                && point.y < w.y() + w.height() as i32
        });
        Ok(match under {
            Some(w) => w.id() == front.id(),
            None => true,
        })
    }

    fn supports_key(&self, key: &str) -> bool {
        to_enigo_key(key).is_some()
    }
}

/// Release held keys last-pressed first. A failed release is logged and the
/// remaining keys are still released.
fn release_in_reverse<E: std::fmt::Display>(held: Vec<Key>, mut release: impl FnMut(Key) -> Result<(), E>) {
    for k in held.into_iter().rev() {
        if let Err(e) = release(k) {
            tracing::warn!(error = %e, key = ?k, "failed to release modifier");
        }
    }
}

/// CMD+V on macOS, CTRL+V elsewhere.
pub fn paste_modifier() -> Modifier {
    if cfg!(target_os = "macos") {
        Modifier::Cmd
    } else {
        Modifier::Ctrl
    }
}

/// CMD maps to Command on macOS and Super/Windows elsewhere.
pub fn modifier_key(m: Modifier) -> Key {
    match m {
        Modifier::Cmd => Key::Meta,
        Modifier::Ctrl => Key::Control,
        Modifier::Alt => Key::Alt,
        Modifier::Shift => Key::Shift,
    }
}

/// Case-insensitive key name → enigo key. Single characters map to their
/// lowercase Unicode key so no implicit shift is added.
pub fn to_enigo_key(name: &str) -> Option<Key> {
    let name = name.trim();
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Some(Key::Unicode(c.to_ascii_lowercase()));
    }

    let upper = name.to_ascii_uppercase();
    let key = match upper.as_str() {
        "ENTER" | "RETURN" => Key::Return,
        "TAB" => Key::Tab,
        "ESC" | "ESCAPE" => Key::Escape,
        "SPACE" => Key::Space,
        "BACKSPACE" => Key::Backspace,
        "DELETE" | "DEL" => Key::Delete,
        "UP" | "ARROWUP" | "UPARROW" => Key::UpArrow,
        "DOWN" | "ARROWDOWN" | "DOWNARROW" => Key::DownArrow,
        "LEFT" | "ARROWLEFT" | "LEFTARROW" => Key::LeftArrow,
        "RIGHT" | "ARROWRIGHT" | "RIGHTARROW" => Key::RightArrow,
        "HOME" => Key::Home,
        "END" => Key::End,
        "PAGEUP" | "PGUP" => Key::PageUp,
        "PAGEDOWN" | "PGDN" => Key::PageDown,
        "F1" => Key::F1,
        "F2" => Key::F2,
        "F3" => Key::F3,
        "F4" => Key::F4,
        "F5" => Key::F5,
        "F6" => Key::F6,
        "F7" => Key::F7,
        "F8" => Key::F8,
        "F9" => Key::F9,
        "F10" => Key::F10,
        "F11" => Key::F11,
        "F12" => Key::F12,
        "F13" => Key::F13,
        "F14" => Key::F14,
        "F15" => Key::F15,
        "F16" => Key::F16,
        "F17" => Key::F17,
        "F18" => Key::F18,
        "F19" => Key::F19,
        "F20" => Key::F20,
        "CAPSLOCK" | "CAPS" => Key::CapsLock,
        #[cfg(not(target_os = "macos"))]
        "INSERT" | "INS" => Key::Insert,
        #[cfg(not(target_os = "macos"))]
        "PRINTSCREEN" | "PRINTSCR" | "PRTSC" => Key::PrintScr,
        // Punctuation spelled out by name.
        "COMMA" => Key::Unicode(','),
        "PERIOD" | "DOT" => Key::Unicode('.'),
        "SLASH" => Key::Unicode('/'),
        "BACKSLASH" => Key::Unicode('\\'),
        "MINUS" | "HYPHEN" => Key::Unicode('-'),
        "EQUALS" | "EQUAL" => Key::Unicode('='),
        "PLUS" => Key::Unicode('+'),
        "SEMICOLON" => Key::Unicode(';'),
        "QUOTE" | "APOSTROPHE" => Key::Unicode('\''),
        "BACKTICK" | "GRAVE" => Key::Unicode('`'),
        "LEFTBRACKET" | "OPENBRACKET" => Key::Unicode('['),
        "RIGHTBRACKET" | "CLOSEBRACKET" => Key::Unicode(']'),
        _ => return None,
    };
    Some(key)
}
