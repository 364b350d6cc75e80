//! ## kestrel-core::time
//! **Simulated time, time bases and conversion to core ticks**
//!
//! All queueing and comparison happens in core ticks (`SimTime`). Components
//! speak in cycles of a time base such as `"1ns"` or `"2.5GHz"`; a
//! [`TimeConverter`] turns those cycles into core ticks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Simulated time in core ticks.
pub type SimTime = u64;

const ATTOS_PER_SECOND: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeError {
    #[error("invalid time base {input:?}: {reason}")]
    Parse { input: String, reason: &'static str },

    #[error("time base {input:?} is finer than the core time base {core:?}")]
    TooFine { input: String, core: String },

    #[error("time base {input:?} is out of range")]
    OutOfRange { input: String },
}

/// Current simulated time of one partition, shared by everything in it.
#[derive(Clone, Debug)]
pub struct VirtualClock {
    ticks: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new(start: SimTime) -> Self {
        Self {
            ticks: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn now(&self) -> SimTime {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn advance(&self, ticks: SimTime) {
        self.ticks.fetch_add(ticks, Ordering::Release);
    }

    /// Moves the clock to `time`. Simulated time never runs backwards, so an
    /// earlier `time` is ignored.
    pub fn set(&self, time: SimTime) {
        self.ticks.fetch_max(time, Ordering::AcqRel);
    }

    /// Moves the clock to `time` unconditionally. Only used on restart.
    pub(crate) fn reset_to(&self, time: SimTime) {
        self.ticks.store(time, Ordering::Release);
    }
}

/// Core ticks per cycle of some time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeConverter {
    factor: SimTime,
}

impl TimeConverter {
    /// One cycle is one core tick.
    pub const CORE: TimeConverter = TimeConverter { factor: 1 };

    pub(crate) fn from_factor(factor: SimTime) -> Self {
        Self {
            factor: factor.max(1),
        }
    }

    pub fn factor(&self) -> SimTime {
        self.factor
    }

    pub fn convert_to_core_time(&self, cycles: SimTime) -> SimTime {
        cycles.saturating_mul(self.factor)
    }

    /// Whole cycles elapsed in `time` core ticks.
    pub fn convert_from_core_time(&self, time: SimTime) -> SimTime {
        time / self.factor
    }
}

impl Default for TimeConverter {
    fn default() -> Self {
        Self::CORE
    }
}

/// Owner of the core time base; hands out cached converters.
#[derive(Debug)]
pub struct TimeLord {
    core_base: String,
    core_attos: u128,
    cache: Mutex<HashMap<String, TimeConverter>>,
}

impl TimeLord {
    pub fn new(core_base: &str) -> Result<Self, TimeError> {
        let core_attos = parse_period_attos(core_base)?;
        debug!(core_base, core_attos, "time lord initialized");
        Ok(Self {
            core_base: core_base.trim().to_owned(),
            core_attos,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn core_base(&self) -> &str {
        &self.core_base
    }

    /// Converter for `base`, e.g. `"1ns"` or `"1GHz"`.
    ///
    /// The period is rounded to the nearest whole core tick and must be at
    /// least one tick.
    pub fn get_time_converter(&self, base: &str) -> Result<TimeConverter, TimeError> {
        let key = base.trim();
        if let Some(tc) = self.cache.lock().get(key) {
            return Ok(*tc);
        }

        let attos = parse_period_attos(key)?;
        let factor = div_round(attos, self.core_attos);
        if factor == 0 {
            return Err(TimeError::TooFine {
                input: key.to_owned(),
                core: self.core_base.clone(),
            });
        }
        let factor = SimTime::try_from(factor).map_err(|_| TimeError::OutOfRange {
            input: key.to_owned(),
        })?;

        let tc = TimeConverter::from_factor(factor);
        self.cache.lock().insert(key.to_owned(), tc);
        Ok(tc)
    }
}

fn div_round(numerator: u128, denominator: u128) -> u128 {
    numerator / denominator + u128::from(numerator % denominator >= denominator - denominator / 2)
}

/// Period of one cycle of `input` in attoseconds.
fn parse_period_attos(input: &str) -> Result<u128, TimeError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let parse_error = |reason| TimeError::Parse {
        input: input.to_owned(),
        reason,
    };
    let out_of_range = || TimeError::OutOfRange {
        input: input.to_owned(),
    };

    let (mantissa, scale) = parse_decimal(number).ok_or_else(|| parse_error("expected a number"))?;
    if mantissa == 0 {
        return Err(parse_error("time base must be non-zero"));
    }

    let attos = match unit.trim() {
        "s" => period(mantissa, scale, ATTOS_PER_SECOND),
        "ms" => period(mantissa, scale, 1_000_000_000_000_000),
        "us" => period(mantissa, scale, 1_000_000_000_000),
        "ns" => period(mantissa, scale, 1_000_000_000),
        "ps" => period(mantissa, scale, 1_000_000),
        "fs" => period(mantissa, scale, 1_000),
        "Hz" => frequency(mantissa, scale, 1),
        "kHz" => frequency(mantissa, scale, 1_000),
        "MHz" => frequency(mantissa, scale, 1_000_000),
        "GHz" => frequency(mantissa, scale, 1_000_000_000),
        "" => return Err(parse_error("missing unit")),
        _ => return Err(parse_error("unknown unit")),
    }
    .ok_or_else(out_of_range)?;

    if attos == 0 {
        return Err(out_of_range());
    }
    Ok(attos)
}

/// `"2.50"` parses to `(250, 100)`.
fn parse_decimal(number: &str) -> Option<(u128, u128)> {
    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut mantissa: u128 = 0;
    for digit in whole.bytes().chain(fraction.bytes()) {
        mantissa = mantissa
            .checked_mul(10)?
            .checked_add(u128::from(digit - b'0'))?;
    }
    let scale = 10u128.checked_pow(u32::try_from(fraction.len()).ok()?)?;
    Some((mantissa, scale))
}

fn period(mantissa: u128, scale: u128, unit_attos: u128) -> Option<u128> {
    Some(div_round(mantissa.checked_mul(unit_attos)?, scale))
}

fn frequency(mantissa: u128, scale: u128, unit_hz: u128) -> Option<u128> {
    let hz_scaled = mantissa.checked_mul(unit_hz)?;
    Some(div_round(ATTOS_PER_SECOND.checked_mul(scale)?, hz_scaled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_never_runs_backwards() {
        let clock = VirtualClock::new(10);
        clock.advance(5);
        assert_eq!(clock.now(), 15);
        clock.set(12);
        assert_eq!(clock.now(), 15);
        clock.set(40);
        assert_eq!(clock.clone().now(), 40);
    }

    #[test]
    fn periods_and_frequencies_convert_to_core_ticks() {
        let lord = TimeLord::new("1ps").unwrap();
        assert_eq!(lord.get_time_converter("1ns").unwrap().factor(), 1_000);
        assert_eq!(lord.get_time_converter("1GHz").unwrap().factor(), 1_000);
        assert_eq!(lord.get_time_converter("2.5ns").unwrap().factor(), 2_500);
        assert_eq!(lord.get_time_converter("1 us").unwrap().factor(), 1_000_000);
        assert_eq!(lord.get_time_converter("3GHz").unwrap().factor(), 333);
        assert_eq!(lord.get_time_converter("1ps").unwrap(), TimeConverter::CORE);
    }

    #[test]
    fn converter_round_trips_whole_cycles() {
        let lord = TimeLord::new("1ps").unwrap();
        let tc = lord.get_time_converter("2ns").unwrap();
        assert_eq!(tc.convert_to_core_time(5), 10_000);
        assert_eq!(tc.convert_from_core_time(10_999), 5);
    }

    #[test]
    fn finer_than_core_is_rejected() {
        let lord = TimeLord::new("1ns").unwrap();
        assert!(matches!(
            lord.get_time_converter("1ps"),
            Err(TimeError::TooFine { .. })
        ));
        // 0.6ns rounds up to one core tick
        assert_eq!(lord.get_time_converter("0.6ns").unwrap().factor(), 1);
    }

    #[test]
    fn malformed_bases_are_parse_errors() {
        let lord = TimeLord::new("1ps").unwrap();
        for bad in ["", "ns", "10", "0ns", "1.2.3ns", "5 parsecs"] {
            assert!(lord.get_time_converter(bad).is_err(), "{bad:?} should not parse");
        }
        assert!(TimeLord::new("fast").is_err());
    }

    #[test]
    fn converters_are_cached_by_trimmed_name() {
        let lord = TimeLord::new("1ps").unwrap();
        let first = lord.get_time_converter(" 1ns ").unwrap();
        assert_eq!(lord.cache.lock().len(), 1);
        assert_eq!(lord.get_time_converter("1ns").unwrap(), first);
        assert_eq!(lord.cache.lock().len(), 1);
    }
}
