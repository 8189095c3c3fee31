// Keyboard and mouse state gathered from winit events

use std::collections::HashSet;
use winit::event::ElementState;
use winit::keyboard::KeyCode;

/// Held keys plus mouse movement accumulated since the last frame
#[derive(Debug, Default)]
pub struct InputState {
    held: HashSet<KeyCode>,
    mouse_delta: (f64, f64),
}

impl InputState {
    /// Record a key event. Returns true on the initial press (not repeats).
    pub fn handle_key(&mut self, key: KeyCode, state: ElementState) -> bool {
        match state {
            ElementState::Pressed => self.held.insert(key),
            ElementState::Released => {
                self.held.remove(&key);
                false
            }
        }
    }

    pub fn is_held(&self, key: KeyCode) -> bool {
        self.held.contains(&key)
    }

    pub fn add_mouse_delta(&mut self, dx: f64, dy: f64) {
        self.mouse_delta.0 += dx;
        self.mouse_delta.1 += dy;
    }

    /// Return and clear the accumulated mouse movement
    pub fn take_mouse_delta(&mut self) -> (f64, f64) {
        std::mem::take(&mut self.mouse_delta)
    }

    /// Forget everything, e.g. when the window loses focus
    pub fn clear(&mut self) {
        self.held.clear();
        self.mouse_delta = (0.0, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_is_reported_once() {
        let mut input = InputState::default();
        assert!(input.handle_key(KeyCode::KeyW, ElementState::Pressed));
        assert!(!input.handle_key(KeyCode::KeyW, ElementState::Pressed));
        assert!(input.is_held(KeyCode::KeyW));

        input.handle_key(KeyCode::KeyW, ElementState::Released);
        assert!(!input.is_held(KeyCode::KeyW));
    }

    #[test]
    fn mouse_delta_accumulates_until_taken() {
        let mut input = InputState::default();
        input.add_mouse_delta(1.0, 2.0);
        input.add_mouse_delta(0.5, -1.0);
        assert_eq!(input.take_mouse_delta(), (1.5, 1.0));
        assert_eq!(input.take_mouse_delta(), (0.0, 0.0));
    }
}
