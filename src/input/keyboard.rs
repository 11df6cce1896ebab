//! Per-seat keyboard state
//!
//! Keycodes and modifier masks pass through untranslated. The seat only
//! needs to know what is held so it can drop events that change nothing:
//! a second press of a held key, a release of a key that is not down, or a
//! modifier update identical to the current one.

use std::collections::BTreeSet;

use log::trace;

use super::events::KeyState;

/// Effect of one key event on the keyboard state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransition {
    Pressed,
    Released,
    /// Press of a held key or release of a key that was not down
    Redundant,
}

/// Keyboard state of a seat
///
/// Focus lives in [`crate::input::FocusState`].
#[derive(Debug, Default)]
pub struct Keyboard {
    held: BTreeSet<u32>,
    modifiers: ModifierState,
}

/// Keyboard modifier masks as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModifierState {
    /// Depressed modifiers (currently held down)
    pub depressed: u32,
    /// Latched modifiers (sticky, cleared on next key)
    pub latched: u32,
    /// Locked modifiers (toggled, like caps lock)
    pub locked: u32,
    /// Keyboard group/layout
    pub group: u32,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key event
    pub fn key(&mut self, keycode: u32, state: KeyState) -> KeyTransition {
        let changed = match state {
            KeyState::Pressed => self.held.insert(keycode),
            KeyState::Released => self.held.remove(&keycode),
        };
        match (changed, state) {
            (false, _) => {
                trace!("Key {} already {:?}", keycode, state);
                KeyTransition::Redundant
            }
            (true, KeyState::Pressed) => KeyTransition::Pressed,
            (true, KeyState::Released) => KeyTransition::Released,
        }
    }

    /// Replace the modifier state; false if nothing changed
    pub fn set_modifiers(&mut self, modifiers: ModifierState) -> bool {
        if self.modifiers == modifiers {
            return false;
        }
        self.modifiers = modifiers;
        true
    }

    pub fn modifiers(&self) -> ModifierState {
        self.modifiers
    }

    pub fn is_held(&self, keycode: u32) -> bool {
        self.held.contains(&keycode)
    }

    /// Held keycodes, ascending
    pub fn held(&self) -> impl Iterator<Item = u32> + '_ {
        self.held.iter().copied()
    }

    /// Forget everything, e.g. when the seat loses its last keyboard
    pub fn reset(&mut self) {
        self.held.clear();
        self.modifiers = ModifierState::default();
    }
}
