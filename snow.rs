//! snowglobe - Core snowfall simulation
//! No heap allocation, no_std compatible

#![no_std]

/// All externalized knobs for the simulation.
#[derive(Copy, Clone)]
pub struct Settings {
    // Display bounds
    pub screen_width: i32,
    pub screen_height: i32,

    // Wind
    pub wind_step: f32,
    pub max_wind: f32,
    pub wind_drift_factor: f32,

    // Flake generation
    pub min_size: i32,
    pub max_size: i32,
    pub min_fall_speed: f32,
    pub max_fall_speed: f32,

    // Off-screen tolerance before a flake is recycled
    pub edge_margin: i32,

    // RNG seed
    pub rng_seed: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            screen_width: 1920,
            screen_height: 1080,
            wind_step: 0.02,
            max_wind: 2.0,
            wind_drift_factor: 5.0,
            min_size: 4,
            max_size: 6,
            min_fall_speed: 2.0,
            max_fall_speed: 5.0,
            edge_margin: 10,
            rng_seed: 0x12345678,
        }
    }
}

/// One simulated flake. Size and speed are fixed between respawns,
/// position mutates every frame.
#[derive(Copy, Clone, Default)]
pub struct Snowflake {
    pub x: i32,
    pub y: i32,
    pub size: i32,
    pub speed: f32,
}

/// Where a flake re-enters the scene after leaving it.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Respawn {
    /// Random column in the strip above the screen (startup, bottom exit).
    Above,
    /// Just off the left edge, after drifting out past the right.
    EnterLeft,
    /// Just off the right edge, after drifting out past the left.
    EnterRight,
}

/// Classified input event, as read from the touch device.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TouchEvent {
    /// Absolute-axis motion report.
    Motion,
    /// End-of-report synchronization marker.
    Sync,
    /// Anything else the device emits.
    Other,
}

/// Debounces raw touch events into background switches.
///
/// A physical touch produces a burst of motion events; only the first one
/// while no touch is active advances the cursor. A sync event ends the
/// gesture and re-arms the trigger.
pub struct BackgroundSelector {
    cursor: usize,
    count: usize,
    touch_active: bool,
}

impl BackgroundSelector {
    /// `count` must be nonzero; startup refuses to run without backgrounds.
    pub fn new(count: usize) -> Self {
        assert!(count > 0, "background selector needs at least one image");
        Self {
            cursor: 0,
            count,
            touch_active: false,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Feeds one event through the debounce machine.
    /// Returns true when the cursor advanced.
    pub fn handle(&mut self, event: TouchEvent) -> bool {
        match event {
            TouchEvent::Motion => {
                if self.touch_active {
                    return false;
                }
                self.touch_active = true;
                self.cursor = (self.cursor + 1) % self.count;
                true
            }
            TouchEvent::Sync => {
                self.touch_active = false;
                false
            }
            TouchEvent::Other => false,
        }
    }
}

/// Snowfall state: a fixed pool of flakes plus the shared wind velocity.
pub struct SnowSystem<const FLAKES: usize> {
    pub flakes: [Snowflake; FLAKES],
    pub wind: f32,

    // Random state
    rng_state: u32,
    settings: Settings,
}

impl<const FLAKES: usize> SnowSystem<FLAKES> {
    pub fn new(settings: Settings) -> Self {
        let mut system = Self {
            flakes: [Snowflake::default(); FLAKES],
            wind: 0.0,
            // xorshift state must never be zero
            rng_state: settings.rng_seed.max(1),
            settings,
        };
        for i in 0..FLAKES {
            system.respawn(i, Respawn::Above);
        }
        system
    }

    // Simple PRNG (xorshift32)
    fn random(&mut self) -> f32 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 17;
        self.rng_state ^= self.rng_state << 5;
        (self.rng_state as f32) / (u32::MAX as f32)
    }

    fn random_range(&mut self, min: f32, max: f32) -> f32 {
        min + self.random() * (max - min)
    }

    /// Uniform integer in `[min, max]`. Callers keep `min` non-negative so
    /// the truncation rounds toward `min`.
    fn random_int(&mut self, min: i32, max: i32) -> i32 {
        self.random_range(min as f32, max as f32 + 1.0) as i32
    }

    /// (Re)places flake `i` in the strip above the screen.
    pub fn respawn(&mut self, i: usize, mode: Respawn) {
        let s = self.settings;
        let x = match mode {
            Respawn::Above => self.random_int(0, s.screen_width - 1),
            Respawn::EnterLeft => -s.edge_margin,
            Respawn::EnterRight => s.screen_width + s.edge_margin,
        };
        let y = -self.random_int(1, s.screen_height);
        let size = self.random_int(s.min_size, s.max_size);
        let speed = self.random_range(s.min_fall_speed, s.max_fall_speed);

        let flake = &mut self.flakes[i];
        flake.x = x;
        flake.y = y;
        flake.size = size;
        flake.speed = speed;
    }

    /// Nudges the wind by one random-walk step and clamps it.
    pub fn advance_wind(&mut self) {
        let step = (self.random_int(0, 2) - 1) as f32;
        self.wind += step * self.settings.wind_step;
        self.wind = self.wind.clamp(-self.settings.max_wind, self.settings.max_wind);
    }

    /// Moves flake `i` one frame under the current wind, recycling it once
    /// it leaves the scene. A bottom exit wins over a horizontal exit on
    /// the same frame.
    pub fn update_flake(&mut self, i: usize) {
        let s = self.settings;
        // Smaller flakes catch more wind.
        let drift = (self.wind * s.wind_drift_factor / self.flakes[i].size as f32) as i32;
        let fall = self.flakes[i].speed as i32;
        self.flakes[i].x += drift;
        self.flakes[i].y += fall;

        let flake = self.flakes[i];
        if flake.y > s.screen_height {
            self.respawn(i, Respawn::Above);
        } else if flake.x < -s.edge_margin {
            self.respawn(i, Respawn::EnterRight);
        } else if flake.x > s.screen_width + s.edge_margin {
            self.respawn(i, Respawn::EnterLeft);
        }
    }

    /// Advances the whole system one frame: wind first, then every flake.
    pub fn update(&mut self) {
        self.advance_wind();
        for i in 0..FLAKES {
            self.update_flake(i);
        }
    }
}
