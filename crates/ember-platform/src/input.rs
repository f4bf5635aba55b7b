// SPDX-License-Identifier: CEPL-1.0
use ember_math::CameraInput;
use tracing::trace;
use winit::keyboard::KeyCode;

/// Tracks which camera actions are held, keyed by physical key position.
#[derive(Debug, Default, Clone)]
pub struct InputManager {
    held: CameraInput,
}

/// Physical key bindings. Positions, not characters, so AZERTY users get the same layout.
pub fn binding(code: KeyCode) -> Option<CameraInput> {
    let action = match code {
        KeyCode::KeyW => CameraInput::MOVE_FORWARD,
        KeyCode::KeyS => CameraInput::MOVE_BACK,
        KeyCode::KeyA => CameraInput::MOVE_LEFT,
        KeyCode::KeyD => CameraInput::MOVE_RIGHT,
        KeyCode::KeyQ => CameraInput::RAISE,
        KeyCode::KeyE => CameraInput::LOWER,
        KeyCode::ArrowUp => CameraInput::LOOK_UP,
        KeyCode::ArrowDown => CameraInput::LOOK_DOWN,
        KeyCode::ArrowLeft => CameraInput::TURN_LEFT,
        KeyCode::ArrowRight => CameraInput::TURN_RIGHT,
        _ => return None,
    };
    Some(action)
}

impl InputManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a key transition. Returns `true` if the key is bound.
    pub fn on_key(&mut self, code: KeyCode, is_down: bool) -> bool {
        let Some(action) = binding(code) else {
            return false;
        };
        self.held.set(action, is_down);
        trace!(?code, is_down, held = ?self.held, "key");
        true
    }

    pub fn is_down(&self, action: CameraInput) -> bool {
        self.held.contains(action)
    }

    pub fn state(&self) -> CameraInput {
        self.held
    }

    /// Releases everything, e.g. when the window loses focus and key-up events go elsewhere.
    pub fn clear(&mut self) {
        self.held = CameraInput::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_and_release() {
        let mut input = InputManager::new();
        assert!(input.on_key(KeyCode::KeyW, true));
        assert!(input.is_down(CameraInput::MOVE_FORWARD));
        assert!(input.on_key(KeyCode::KeyW, false));
        assert!(!input.is_down(CameraInput::MOVE_FORWARD));
    }

    #[test]
    fn unbound_keys_are_ignored() {
        let mut input = InputManager::new();
        assert!(!input.on_key(KeyCode::KeyZ, true));
        assert_eq!(input.state(), CameraInput::empty());
    }

    #[test]
    fn held_keys_combine() {
        let mut input = InputManager::new();
        input.on_key(KeyCode::KeyQ, true);
        input.on_key(KeyCode::ArrowLeft, true);
        assert_eq!(input.state(), CameraInput::RAISE | CameraInput::TURN_LEFT);
        input.clear();
        assert!(input.state().is_empty());
    }

    #[test]
    fn every_camera_action_has_a_key() {
        let keys = [
            KeyCode::KeyW,
            KeyCode::KeyS,
            KeyCode::KeyA,
            KeyCode::KeyD,
            KeyCode::KeyQ,
            KeyCode::KeyE,
            KeyCode::ArrowUp,
            KeyCode::ArrowDown,
            KeyCode::ArrowLeft,
            KeyCode::ArrowRight,
        ];
        let all = keys
            .iter()
            .filter_map(|k| binding(*k))
            .fold(CameraInput::empty(), |acc, a| acc | a);
        assert_eq!(all, CameraInput::all());
    }
}
