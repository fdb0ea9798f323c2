//! The seam to preset storage: the orchestrator is synchronous
//! (condvar-driven, like the rest of the daemon), while preset values live
//! in the async KV mirror — so this is a narrow blocking trait the binary
//! wires to a bridge over `md2_kv`, the same way `PmacTransport` lets the
//! link stay agnostic of its socket implementation.

use crate::error::MotionError;

pub trait PresetSource: Send + Sync {
    fn find_preset(&self, motor: &str, name: &str) -> Result<f64, MotionError>;
    fn set_preset(&self, motor: &str, name: &str, position: f64) -> Result<(), MotionError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MockPresetSource {
        presets: Mutex<HashMap<(String, String), f64>>,
    }

    impl MockPresetSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, motor: &str, name: &str, position: f64) {
            self.presets.lock().insert((motor.to_string(), name.to_string()), position);
        }
    }

    impl PresetSource for MockPresetSource {
        fn find_preset(&self, motor: &str, name: &str) -> Result<f64, MotionError> {
            self.presets
                .lock()
                .get(&(motor.to_string(), name.to_string()))
                .copied()
                .ok_or_else(|| MotionError::PresetUnavailable(format!("{motor}.{name}")))
        }

        fn set_preset(&self, motor: &str, name: &str, position: f64) -> Result<(), MotionError> {
            self.presets.lock().insert((motor.to_string(), name.to_string()), position);
            Ok(())
        }
    }
}
