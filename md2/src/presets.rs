//! Adapts the KV mirror's blocking handle onto `md2_motion::PresetSource`.

use md2_kv::KvHandle;
use md2_motion::{MotionError, PresetSource};
use std::sync::Arc;

pub struct KvPresetSource {
    kv: Arc<dyn KvHandle>,
}

impl KvPresetSource {
    pub fn new(kv: Arc<dyn KvHandle>) -> Self {
        KvPresetSource { kv }
    }
}

impl PresetSource for KvPresetSource {
    fn find_preset(&self, motor: &str, name: &str) -> Result<f64, MotionError> {
        self.kv.find_preset(motor, name).map_err(|e| MotionError::Kv(e.to_string()))
    }

    fn set_preset(&self, motor: &str, name: &str, position: f64) -> Result<(), MotionError> {
        self.kv.set_preset(motor, name, position).map_err(|e| MotionError::Kv(e.to_string()))
    }
}
