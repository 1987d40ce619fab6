//! Simulated player entity shared by the server hub and the client mirror

use crate::protocol::UpdatePlayer;
use crate::{ClientSlot, PLAYER_STEP};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Player {
    pub x: f64,
    pub y: f64,
    pub left_pressed: bool,
    pub right_pressed: bool,
}

impl Player {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            left_pressed: false,
            right_pressed: false,
        }
    }

    /// Advances the player one host frame. Left wins when both keys are held.
    pub fn step(&mut self) {
        if self.left_pressed {
            self.x -= PLAYER_STEP;
        } else if self.right_pressed {
            self.x += PLAYER_STEP;
        }
    }

    /// Overwrites position and input flags from an update (last write wins).
    pub fn apply_update(&mut self, update: &UpdatePlayer) {
        self.x = update.x;
        self.y = update.y;
        self.left_pressed = update.left_pressed;
        self.right_pressed = update.right_pressed;
    }

    pub fn to_update(&self, slot: ClientSlot) -> UpdatePlayer {
        UpdatePlayer {
            slot: slot.to_wire(),
            x: self.x,
            y: self.y,
            left_pressed: self.left_pressed,
            right_pressed: self.right_pressed,
        }
    }
}
