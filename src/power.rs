/* Copyright 2025 Bruce Merry
 *
 * This program is free software: you can redistribute it and/or modify it
 * under the terms of the GNU General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
 * FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
 * more details.
 *
 * You should have received a copy of the GNU General Public License along
 * with this program. If not, see <https://www.gnu.org/licenses/>.
 */

use chrono::{DateTime, Duration, Utc};

/// Energy counter reading at a point in time
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnergySample {
    pub total_energy: f64, // kWh
    pub timestamp: DateTime<Utc>,
}

// Number of (non-integer) hours in a duration
fn duration_hours(duration: Duration) -> f64 {
    (duration.num_milliseconds() as f64) / 3600000.0
}

/// Average power in kW between two energy samples.
///
/// Returns 0 for the first sample, when time did not advance, or when the
/// counter went backwards (e.g. it was reset).
pub fn estimate(previous: Option<&EnergySample>, current: &EnergySample) -> f64 {
    let Some(previous) = previous else {
        return 0.0;
    };
    let hours = duration_hours(current.timestamp - previous.timestamp);
    if hours <= 0.0 {
        return 0.0;
    }
    ((current.total_energy - previous.total_energy) / hours).max(0.0)
}
