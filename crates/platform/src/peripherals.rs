//! Keyboard and mouse state fed from window events.
//!
//! Per-frame deltas (`just_pressed`, mouse motion, wheel) accumulate between
//! two calls to [`Peripherals::reset`], which the app issues once per frame.

use std::collections::HashSet;

use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::keyboard::{ModifiersState, PhysicalKey};

pub use winit::keyboard::KeyCode;

/// Mouse buttons tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    fn from_winit(button: winit::event::MouseButton) -> Option<Self> {
        match button {
            winit::event::MouseButton::Left => Some(Self::Left),
            winit::event::MouseButton::Right => Some(Self::Right),
            winit::event::MouseButton::Middle => Some(Self::Middle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

#[derive(Debug, Default)]
pub struct Keyboard {
    held: HashSet<KeyCode>,
    just_pressed: HashSet<KeyCode>,
    last_pressed: Option<KeyCode>,
    modifiers: Modifiers,
}

impl Keyboard {
    pub fn press(&mut self, key: KeyCode) {
        if self.held.insert(key) {
            self.just_pressed.insert(key);
        }
        self.last_pressed = Some(key);
    }

    pub fn release(&mut self, key: KeyCode) {
        self.held.remove(&key);
    }

    #[inline]
    pub fn is_pressed(&self, key: KeyCode) -> bool {
        self.held.contains(&key)
    }

    /// True only during the frame the key went down.
    #[inline]
    pub fn is_just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed.contains(&key)
    }

    #[inline]
    pub fn last_pressed(&self) -> Option<KeyCode> {
        self.last_pressed
    }

    #[inline]
    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }
}

#[derive(Debug, Default)]
pub struct Mouse {
    position: Option<(f64, f64)>,
    delta: (f64, f64),
    wheel: f32,
    buttons: HashSet<MouseButton>,
}

impl Mouse {
    /// Record a cursor position; the first sample produces no delta.
    pub fn move_to(&mut self, x: f64, y: f64) {
        if let Some((px, py)) = self.position {
            self.delta.0 += x - px;
            self.delta.1 += y - py;
        }
        self.position = Some((x, y));
    }

    #[inline]
    pub fn position(&self) -> (f64, f64) {
        self.position.unwrap_or_default()
    }

    /// Accumulated motion since the last reset.
    #[inline]
    pub fn delta(&self) -> (f64, f64) {
        self.delta
    }

    #[inline]
    pub fn wheel_delta(&self) -> f32 {
        self.wheel
    }

    #[inline]
    pub fn is_pressed(&self, button: MouseButton) -> bool {
        self.buttons.contains(&button)
    }
}

/// Keyboard and mouse state for one window.
#[derive(Debug, Default)]
pub struct Peripherals {
    pub keyboard: Keyboard,
    pub mouse: Mouse,
}

impl Peripherals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a window event into the current state.
    ///
    /// Returns `true` if the event was an input event.
    pub fn handle_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    match event.state {
                        ElementState::Pressed => self.keyboard.press(code),
                        ElementState::Released => self.keyboard.release(code),
                    }
                }
                true
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                self.keyboard.modifiers = modifiers_from_state(modifiers.state());
                true
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.mouse.move_to(position.x, position.y);
                true
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if let Some(button) = MouseButton::from_winit(*button) {
                    match state {
                        ElementState::Pressed => self.mouse.buttons.insert(button),
                        ElementState::Released => self.mouse.buttons.remove(&button),
                    };
                }
                true
            }
            WindowEvent::MouseWheel { delta, .. } => {
                self.mouse.wheel += match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32,
                };
                true
            }
            _ => false,
        }
    }

    /// Clear per-frame deltas. Held keys and buttons persist.
    pub fn reset(&mut self) {
        self.keyboard.just_pressed.clear();
        self.mouse.delta = (0.0, 0.0);
        self.mouse.wheel = 0.0;
    }
}

fn modifiers_from_state(state: ModifiersState) -> Modifiers {
    Modifiers {
        shift: state.shift_key(),
        ctrl: state.control_key(),
        alt: state.alt_key(),
    }
}
