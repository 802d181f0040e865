//! Packet counter and radio-parameter amortization.
//!
//! Querying the modem for signal quality is expensive, so radio parameters are
//! only attached to every `limit`-th packed message. The counter wraps on
//! overflow and lives in memory only.

use parking_lot::Mutex;

#[derive(Debug)]
struct State {
    value: u32,
    limit: u32,
    radio_sent_at: u32,
}

/// Packet sequence counter shared by the Packer and the runtime API.
#[derive(Debug)]
pub struct PacketCounter {
    state: Mutex<State>,
}

impl PacketCounter {
    /// Creates a counter at 0 that requests radio parameters every `limit` packs.
    pub fn new(limit: u32) -> Self {
        Self {
            state: Mutex::new(State {
                value: 0,
                limit: limit.max(1),
                radio_sent_at: 0,
            }),
        }
    }

    /// Current value.
    pub fn get(&self) -> u32 {
        self.state.lock().value
    }

    /// Overrides the value and restarts the radio window from it.
    pub fn set(&self, value: u32) {
        let mut s = self.state.lock();
        s.value = value;
        s.radio_sent_at = value;
    }

    /// Back to 0.
    pub fn reset(&self) {
        self.set(0);
    }

    /// Current limit.
    pub fn limit(&self) -> u32 {
        self.state.lock().limit
    }

    /// Changes the limit. Callers validate the range beforehand.
    pub fn set_limit(&self, limit: u32) {
        self.state.lock().limit = limit.max(1);
    }

    /// True once `limit` messages were packed since the last radio report.
    pub fn radio_due(&self) -> bool {
        let s = self.state.lock();
        s.value.wrapping_sub(s.radio_sent_at) >= s.limit
    }

    /// Records one packed message, stamped with the value before the bump.
    pub fn on_packed(&self, included_radio: bool) {
        let mut s = self.state.lock();
        if included_radio {
            s.radio_sent_at = s.value;
        }
        s.value = s.value.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radio_is_due_after_limit_packs() {
        let counter = PacketCounter::new(5);
        for _ in 0..4 {
            counter.on_packed(false);
            assert!(!counter.radio_due());
        }
        counter.on_packed(false);
        assert_eq!(counter.get(), 5);
        assert!(counter.radio_due());

        counter.on_packed(true);
        for _ in 0..4 {
            assert!(!counter.radio_due());
            counter.on_packed(false);
        }
        assert_eq!(counter.get(), 10);
        assert!(counter.radio_due());
    }

    #[test]
    fn set_and_reset_restart_the_window() {
        let counter = PacketCounter::new(2);
        counter.on_packed(false);
        counter.on_packed(false);
        assert!(counter.radio_due());

        counter.set(100);
        assert_eq!(counter.get(), 100);
        assert!(!counter.radio_due());

        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn counter_wraps() {
        let counter = PacketCounter::new(3);
        counter.set(u32::MAX);
        counter.on_packed(false);
        assert_eq!(counter.get(), 0);
        counter.on_packed(false);
        counter.on_packed(false);
        assert!(counter.radio_due());
    }
}
