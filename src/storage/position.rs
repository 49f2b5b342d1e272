//! Position arithmetic and gap padding
//!
//! A series is a flat array of samples; the array index of a timestamp is
//! derived from the series start time and interval, so the position is the
//! only index. These helpers are shared by the direct and buffered write
//! paths so both produce identical bytes.

use crate::storage::types::{encode_sample, PaddingMode, SAMPLE_SIZE};

/// Floor-align a timestamp to the interval grid
pub fn align(timestamp: i64, interval: i64) -> i64 {
    timestamp.div_euclid(interval) * interval
}

/// Array position of an aligned timestamp (write side, floor)
pub fn position(aligned: i64, start_time: i64, interval: i64) -> i64 {
    (aligned - start_time).div_euclid(interval)
}

/// Nearest array position of an arbitrary timestamp (read side, rounded)
pub fn nearest_position(time: i64, start_time: i64, interval: i64) -> i64 {
    ((time - start_time) as f64 / interval as f64).round() as i64
}

/// Synthesize `gap` filler values between the current tail and a new sample.
///
/// Fillers are NaN unless a last value exists and the mode asks for one:
/// `Flat` repeats it, `Join` steps linearly towards `value` by
/// `(value - last) / (gap + 1)` per slot.
pub fn padding(mode: PaddingMode, last: Option<f32>, value: f64, gap: i64) -> Vec<f32> {
    if gap <= 0 {
        return Vec::new();
    }

    let (mut fill, step) = match (mode, last) {
        (PaddingMode::None, _) | (_, None) => (f64::NAN, 0.0),
        (PaddingMode::Flat, Some(last)) => (last as f64, 0.0),
        (PaddingMode::Join, Some(last)) => {
            let last = last as f64;
            (last, (value - last) / (gap + 1) as f64)
        }
    };

    let mut out = Vec::with_capacity(gap as usize);
    for _ in 0..gap {
        fill += step;
        out.push(fill as f32);
    }
    out
}

/// Encode fillers followed by the new sample as one contiguous byte run
pub fn encode_run(fillers: &[f32], value: f32) -> Vec<u8> {
    let mut buf = Vec::with_capacity((fillers.len() + 1) * SAMPLE_SIZE as usize);
    for fill in fillers {
        buf.extend_from_slice(&encode_sample(*fill));
    }
    buf.extend_from_slice(&encode_sample(value));
    buf
}
