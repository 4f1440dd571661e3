//! Analog stick to cursor/scroll translation.
//!
//! Runs once per frame with the measured `dt`. Deflection magnitude maps
//! through a dead zone, an exponential ease curve in the mid range and a
//! boost ramp at full deflection. Per-axis fractional remainders carry the
//! sub-pixel part of each frame's delta into the next frame, so the emitted
//! integer deltas track the true analog integral within one unit. Cursor
//! and scroll run the same pipeline with their own speed setting, remainder
//! and boost timer; scroll additionally inverts the vertical axis.

use chrono::{DateTime, Local};

use crate::config::CursorSettings;

const DEAD_ZONE: f64 = 0.05;
const FULL_DEFLECTION: f64 = 0.95;

/// Exponential ease for mid-range deflection. Stays below 1 over its whole
/// input range so full deflection is always the fastest pre-boost speed.
fn response(r: f64) -> f64 {
    1.5 * 2.4_f64.powf(4.3 * (r - 1.1))
}

pub struct MotionModel {
    settings: CursorSettings,
    cursor_boost: Option<DateTime<Local>>,
    scroll_boost: Option<DateTime<Local>>,
    cursor_carry_x: f64,
    cursor_carry_y: f64,
    scroll_carry_x: f64,
    scroll_carry_y: f64,
}

impl MotionModel {
    pub fn new(settings: &CursorSettings) -> Self {
        Self {
            settings: settings.clone(),
            cursor_boost: None,
            scroll_boost: None,
            cursor_carry_x: 0.0,
            cursor_carry_y: 0.0,
            scroll_carry_x: 0.0,
            scroll_carry_y: 0.0,
        }
    }

    /// Speed multiplier for the cursor stick at the given deflection.
    pub fn speed(&mut self, x: f64, y: f64, now: DateTime<Local>) -> f64 {
        Self::speed_with(&mut self.cursor_boost, &self.settings, x, y, now)
    }

    /// Integer cursor delta for one frame of `dt` seconds.
    pub fn cursor_delta(
        &mut self,
        x: f64,
        y: f64,
        dt: f64,
        now: DateTime<Local>,
    ) -> (i32, i32) {
        let speed = Self::speed_with(&mut self.cursor_boost, &self.settings, x, y, now);
        let (ex, ey) = effective(x, y);
        let scale = speed * self.settings.cursor_speed * dt;
        let dx = accumulate(&mut self.cursor_carry_x, ex * scale);
        let dy = accumulate(&mut self.cursor_carry_y, ey * scale);
        (dx, dy)
    }

    /// Integer scroll delta for one frame. Vertical is inverted so pushing
    /// the stick up scrolls the content up.
    pub fn scroll_delta(
        &mut self,
        x: f64,
        y: f64,
        dt: f64,
        now: DateTime<Local>,
    ) -> (i32, i32) {
        let speed = Self::speed_with(&mut self.scroll_boost, &self.settings, x, y, now);
        let (ex, ey) = effective(x, y);
        let scale = speed * self.settings.scroll_speed * dt;
        let dx = accumulate(&mut self.scroll_carry_x, ex * scale);
        let dy = accumulate(&mut self.scroll_carry_y, ey * scale);
        (dx, -dy)
    }

    /// Drops remainders and boost timers. Called on mode switches.
    pub fn reset(&mut self) {
        self.cursor_boost = None;
        self.scroll_boost = None;
        self.cursor_carry_x = 0.0;
        self.cursor_carry_y = 0.0;
        self.scroll_carry_x = 0.0;
        self.scroll_carry_y = 0.0;
    }

    fn speed_with(
        boost: &mut Option<DateTime<Local>>,
        settings: &CursorSettings,
        x: f64,
        y: f64,
        now: DateTime<Local>,
    ) -> f64 {
        let r = x.hypot(y);
        if r < DEAD_ZONE {
            *boost = None;
            return 0.0;
        }
        if r > FULL_DEFLECTION {
            let started = *boost.get_or_insert(now);
            let held = (now - started).num_milliseconds() as f64 / 1000.0;
            if held < settings.cursor_boost_acceleration_delay {
                return 1.0;
            }
            let ramp = ((held - settings.cursor_boost_acceleration_delay)
                / settings.cursor_boost_acceleration_time)
                .min(1.0);
            return 1.0 + ramp * settings.cursor_boost_speed;
        }
        // Any mid-range frame resets the boost timer.
        *boost = None;
        response(r)
    }
}

/// Clamps the deflection vector to unit magnitude at full deflection.
fn effective(x: f64, y: f64) -> (f64, f64) {
    let r = x.hypot(y);
    if r > FULL_DEFLECTION {
        (x / r, y / r)
    } else {
        (x, y)
    }
}

/// Adds one frame's analog delta to the axis remainder and takes out the
/// integer part. A direction reversal or a centered frame drops the
/// remainder so the cursor never overshoots into the old direction.
fn accumulate(carry: &mut f64, value: f64) -> i32 {
    if *carry != 0.0 && (value == 0.0 || (value > 0.0) != (*carry > 0.0)) {
        *carry = 0.0;
    }
    *carry += value;
    let whole = carry.trunc();
    *carry -= whole;
    whole as i32
}
