//! Move-time estimate: `T = |D|/V + V/A` once the motor has run out of
//! room to keep accelerating (`|D| >= V^2/A`), else the pure
//! accelerate-then-decelerate triangle `T = 2*sqrt(|D|/A)`.

use md2_model::motor::MotionPolicy;

pub fn move_time_seconds(delta_abs: f64, policy: &MotionPolicy) -> f64 {
    let v = policy.max_velocity;
    let a = policy.max_acceleration;
    if a <= 0.0 {
        return 0.0;
    }
    if delta_abs >= (v * v) / a {
        delta_abs / v + v / a
    } else {
        2.0 * (delta_abs / a).sqrt()
    }
}

/// One requested move: resolve a preset or use the fallback target,
/// optionally forcing a direct jog instead of coordinate-system batching.
#[derive(Debug, Clone)]
pub struct MoveSpec {
    pub motor: String,
    pub jog: bool,
    pub preset: Option<String>,
    pub fallback: Option<f64>,
}

impl MoveSpec {
    pub fn to_target(motor: impl Into<String>, target: f64) -> Self {
        MoveSpec {
            motor: motor.into(),
            jog: false,
            preset: None,
            fallback: Some(target),
        }
    }

    pub fn to_preset(motor: impl Into<String>, preset: impl Into<String>) -> Self {
        MoveSpec {
            motor: motor.into(),
            jog: false,
            preset: Some(preset.into()),
            fallback: None,
        }
    }

    pub fn jog_to(motor: impl Into<String>, target: f64) -> Self {
        MoveSpec {
            motor: motor.into(),
            jog: true,
            preset: None,
            fallback: Some(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(v: f64, a: f64) -> MotionPolicy {
        MotionPolicy {
            max_velocity: v,
            max_acceleration: a,
            in_position_band_sixteenths: 16,
            update_resolution: 0.001,
            glitch_threshold_counts: 10,
        }
    }

    #[test]
    fn short_move_uses_triangular_profile() {
        // |D| < V^2/A: never reaches max velocity.
        let p = policy(100.0, 1000.0);
        let t = move_time_seconds(1.0, &p);
        assert!((t - 2.0 * (1.0f64 / 1000.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn long_move_uses_trapezoidal_profile() {
        let p = policy(10.0, 100.0);
        // V^2/A = 1.0, so a delta of 50 clears the threshold comfortably.
        let t = move_time_seconds(50.0, &p);
        assert!((t - (50.0 / 10.0 + 10.0 / 100.0)).abs() < 1e-9);
    }
}
