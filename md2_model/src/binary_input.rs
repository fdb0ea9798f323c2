//! Binary input edge detection over the ACC-11C digital input words.

use md2_events::EventBus;
use std::sync::Arc;

/// One monitored bit in the status block's ACC-11C words.
#[derive(Debug, Clone)]
pub struct BinaryInput {
    pub name: String,
    /// Index into `RawStatusBlock::acc11c_words`.
    pub word_index: usize,
    pub mask: u32,
    pub rising_event: String,
    pub falling_event: String,
    previous: Option<bool>,
}

impl BinaryInput {
    pub fn new(
        name: impl Into<String>,
        word_index: usize,
        mask: u32,
        rising_event: impl Into<String>,
        falling_event: impl Into<String>,
    ) -> Self {
        BinaryInput {
            name: name.into(),
            word_index,
            mask,
            rising_event: rising_event.into(),
            falling_event: falling_event.into(),
            previous: None,
        }
    }

    /// Current decoded level, if a sample has been observed.
    pub fn is_set(&self) -> Option<bool> {
        self.previous
    }

    /// Observe one status-block word and emit exactly one event per
    /// observed edge; the first sample always fires one event, rising if
    /// the bit is set, falling if it's clear.
    pub fn observe(&mut self, words: &[u32], bus: &Arc<EventBus>) {
        let Some(&word) = words.get(self.word_index) else {
            return;
        };
        let current = word & self.mask != 0;
        match self.previous {
            None => {
                self.previous = Some(current);
                bus.send(if current { self.rising_event.clone() } else { self.falling_event.clone() });
            }
            Some(prev) if prev != current => {
                self.previous = Some(current);
                bus.send(if current {
                    self.rising_event.clone()
                } else {
                    self.falling_event.clone()
                });
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn recording_bus() -> (Arc<EventBus>, Arc<Mutex<Vec<String>>>) {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.add_listener(".*", move |name| s.lock().push(name.to_string()))
            .unwrap();
        bus.spawn_worker();
        (bus, seen)
    }

    fn drain(seen: &Arc<Mutex<Vec<String>>>, n: usize) -> Vec<String> {
        for _ in 0..200 {
            if seen.lock().len() >= n {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        seen.lock().clone()
    }

    #[test]
    fn first_sample_fires_matching_level() {
        let (bus, seen) = recording_bus();
        let mut input = BinaryInput::new("BackLightDown", 0, 0x1, "BackLightDown Rising", "BackLightDown Falling");
        input.observe(&[0x1], &bus);
        let events = drain(&seen, 1);
        assert_eq!(events, vec!["BackLightDown Rising".to_string()]);
        bus.close();
    }

    #[test]
    fn first_sample_low_fires_falling() {
        let (bus, seen) = recording_bus();
        let mut input = BinaryInput::new("BackLightDown", 0, 0x1, "BackLightDown Rising", "BackLightDown Falling");
        input.observe(&[0x0], &bus);
        let events = drain(&seen, 1);
        assert_eq!(events, vec!["BackLightDown Falling".to_string()]);
        bus.close();
    }

    #[test]
    fn exactly_one_event_per_edge() {
        let (bus, seen) = recording_bus();
        let mut input = BinaryInput::new("X", 0, 0x1, "X Rising", "X Falling");
        input.observe(&[0x0], &bus); // first sample, low -> falling
        input.observe(&[0x1], &bus); // rising
        input.observe(&[0x1], &bus); // steady, no event
        input.observe(&[0x0], &bus); // falling
        let events = drain(&seen, 3);
        assert_eq!(
            events,
            vec!["X Falling".to_string(), "X Rising".to_string(), "X Falling".to_string()]
        );
        bus.close();
    }
}
