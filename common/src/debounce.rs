/// Highest GPIO number addressable by the input pin mask.
pub const MAX_PIN: u8 = 39;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinRecord {
    pub pin: u8,
    pub pressed: bool,
    pub last_transition_ms: u64,
}

/// Owns the canonical pressed/released state of every configured input.
///
/// Time is passed in explicitly so the engine stays pure; the setup of the
/// interrupt queue that feeds `on_event` lives with the platform glue.
#[derive(Debug, Clone)]
pub struct DebounceEngine {
    window_ms: u64,
    pins: Vec<PinRecord>,
}

impl DebounceEngine {
    /// Builds one record per set bit of `mask`, in ascending pin order.
    ///
    /// `sample` reads the live electrical level; the inputs are active-low,
    /// so `sample` must return `true` when the line reads low.
    pub fn register(mask: u64, window_ms: u64, mut sample: impl FnMut(u8) -> bool) -> Self {
        let mut pins = Vec::with_capacity(mask.count_ones() as usize);
        for pin in 0..=MAX_PIN {
            if mask & (1_u64 << pin) != 0 {
                pins.push(PinRecord {
                    pin,
                    pressed: sample(pin),
                    last_transition_ms: 0,
                });
            }
        }
        Self { window_ms, pins }
    }

    pub fn pins(&self) -> &[PinRecord] {
        &self.pins
    }

    /// Consumes one queued edge event.
    ///
    /// Returns `true` when the transition is accepted. An accepted transition
    /// recomputes `pressed` from the instantaneous level rather than the edge
    /// direction, so coalesced edges in the queue cannot invert the state.
    /// Events closer than the bounce window to the previous accepted
    /// transition are discarded without touching the record, as are events
    /// for pins that were never registered.
    pub fn on_event(&mut self, pin: u8, live_pressed: bool, now_ms: u64) -> bool {
        let Some(record) = self.pins.iter_mut().find(|record| record.pin == pin) else {
            return false;
        };

        let time_between = now_ms.saturating_sub(record.last_transition_ms);
        if time_between <= self.window_ms {
            return false;
        }

        record.pressed = live_pressed;
        record.last_transition_ms = now_ms;
        true
    }

    /// Resamples every record from the live level. Run immediately before a
    /// snapshot so the report carries the authoritative electrical state.
    pub fn refresh(&mut self, mut sample: impl FnMut(u8) -> bool) {
        for record in &mut self.pins {
            record.pressed = sample(record.pin);
        }
    }

    /// Pressed flags in registration order.
    pub fn states(&self) -> Vec<bool> {
        self.pins.iter().map(|record| record.pressed).collect()
    }
}
