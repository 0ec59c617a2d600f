// Timer Facility (§4.8): interval timer, TOD clock, clock comparator,
// CPU timer. `update` is called once per emulated-time quantum by the
// stepper, mirroring the teacher's `Bus::update(&CPU)` per-tick hook
// (memory.rs).

use crate::interrupt::{low_storage, InterruptLatches};
use crate::memory::Mal;

/// IBM 1900-epoch, 2^-12 microsecond units per tick (§4.8 "SetTod").
const TOD_TICKS_PER_UPDATE: u64 = 13_333_333;

#[derive(Clone, Debug, Default)]
pub struct Timer {
    pub tod_enabled: bool,
    pub tod: u64,
    pub clock_comparator: u64,
    pub cpu_timer: i64,
    pub timer_tics: u32,
}

impl Timer {
    pub fn new() -> Self {
        Timer { tod_enabled: false, tod: 0, clock_comparator: u64::MAX, cpu_timer: 0, timer_tics: 1 }
    }

    /// Converts a host wallclock microsecond count into the IBM TOD format
    /// (microseconds since 1900-01-01, shifted left 12) and starts the clock.
    pub fn set_tod(&mut self, host_micros_since_1900: u64) {
        self.tod = host_micros_since_1900 << 12;
        self.tod_enabled = true;
    }

    /// Runs one update quantum against main storage's interval-timer word and
    /// the CPU's interrupt latches (§4.8).
    pub fn update(&mut self, mal: &mut Mal, latches: &mut InterruptLatches) {
        let word = mal.load_word_raw(low_storage::INTERVAL_TIMER);
        let decremented = word.wrapping_sub(0x100);
        mal.store_word_raw(low_storage::INTERVAL_TIMER, decremented);
        if decremented & 0xffff_fff0 == 0 {
            latches.interval_timer = true;
        }

        if self.tod_enabled {
            self.tod = self.tod.wrapping_add(TOD_TICKS_PER_UPDATE);
            if self.tod >= self.clock_comparator {
                latches.clock_comparator = true;
            }
        }

        self.cpu_timer = self.cpu_timer.wrapping_sub((self.timer_tics as i64) << 12);
        if self.cpu_timer < 0 {
            latches.cpu_timer = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Ram;

    #[test]
    fn interval_timer_sets_latch_when_it_reaches_zero() {
        let mut mal = Mal::new(Ram::new(1 << 16));
        mal.store_word_raw(low_storage::INTERVAL_TIMER, 0x100);
        let mut timer = Timer::new();
        let mut latches = InterruptLatches::new();
        timer.update(&mut mal, &mut latches);
        assert!(latches.interval_timer);
    }

    #[test]
    fn cpu_timer_going_negative_sets_latch() {
        let mut mal = Mal::new(Ram::new(1 << 16));
        let mut timer = Timer::new();
        timer.cpu_timer = 1;
        let mut latches = InterruptLatches::new();
        timer.update(&mut mal, &mut latches);
        assert!(latches.cpu_timer);
    }
}
