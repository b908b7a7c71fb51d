//! Liquid reward calibration: per-valve measured `(duration_ms, volume_ul)`
//! pairs and the fitted polynomial that maps a requested reward volume to a
//! valve open duration.
//!
//! At least two measured points are required per valve; anything less is a
//! fatal configuration error at the point of use, never a silent default.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// One measured calibration point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalPoint {
    pub duration_ms: f64,
    pub volume_ul: f64,
}

/// Calibration tables for the rig's valves, indexed by physical valve number
/// (1-based). Valves without measurements fail on first use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValveCalibration {
    tables: Vec<(u8, Vec<CalPoint>)>,
}

impl ValveCalibration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_table(&mut self, valve: u8, points: Vec<CalPoint>) {
        if let Some(slot) = self.tables.iter_mut().find(|(v, _)| *v == valve) {
            slot.1 = points;
        } else {
            self.tables.push((valve, points));
        }
    }

    fn table(&self, valve: u8) -> &[CalPoint] {
        self.tables
            .iter()
            .find(|(v, _)| *v == valve)
            .map(|(_, points)| points.as_slice())
            .unwrap_or(&[])
    }

    /// Valve open duration in seconds for the requested volume.
    ///
    /// Fits a least-squares polynomial (quadratic when three or more points
    /// exist, linear for exactly two) of duration-over-volume and evaluates
    /// it at `volume_ul`.
    pub fn valve_time(&self, volume_ul: f64, valve: u8) -> Result<f64> {
        let points = self.table(valve);
        if points.len() < 2 {
            return Err(EngineError::InsufficientCalibration {
                valve,
                measurements: points.len(),
            });
        }
        let degree = if points.len() >= 3 { 2 } else { 1 };
        let coeffs = polyfit(points, degree);
        let duration_ms = polyval(&coeffs, volume_ul);
        if duration_ms < 0.0 {
            return Err(EngineError::NegativeValveTime { valve, volume_ul });
        }
        Ok(duration_ms / 1000.0)
    }
}

/// Least-squares fit of `duration = sum(c[k] * volume^k)` via the normal
/// equations. Small fixed degree, so a direct Gaussian elimination is fine.
fn polyfit(points: &[CalPoint], degree: usize) -> Vec<f64> {
    let terms = degree + 1;
    // Normal matrix A^T A and right-hand side A^T b.
    let mut ata = vec![vec![0.0f64; terms]; terms];
    let mut atb = vec![0.0f64; terms];
    for p in points {
        let mut powers = vec![1.0f64; terms];
        for k in 1..terms {
            powers[k] = powers[k - 1] * p.volume_ul;
        }
        for row in 0..terms {
            for col in 0..terms {
                ata[row][col] += powers[row] * powers[col];
            }
            atb[row] += powers[row] * p.duration_ms;
        }
    }
    gaussian_solve(&mut ata, &mut atb);
    atb
}

fn gaussian_solve(a: &mut [Vec<f64>], b: &mut [f64]) {
    let n = b.len();
    for col in 0..n {
        // Partial pivot.
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        a.swap(col, pivot);
        b.swap(col, pivot);
        let diag = a[col][col];
        if diag.abs() < 1e-12 {
            continue;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col] / diag;
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    for i in 0..n {
        let diag = a[i][i];
        if diag.abs() >= 1e-12 {
            b[i] /= diag;
        }
    }
}

fn polyval(coeffs: &[f64], x: f64) -> f64 {
    let mut acc = 0.0;
    for &c in coeffs.iter().rev() {
        acc = acc * x + c;
    }
    acc
}

/// Bench-measured defaults for the first three valves of the training rig.
pub static DEFAULT_CALIBRATION: Lazy<ValveCalibration> = Lazy::new(|| {
    let mut cal = ValveCalibration::new();
    cal.set_table(1, points(&[
        (15.0, 0.0),
        (20.0, 0.17),
        (50.0, 1.35),
        (50.0, 1.31),
        (30.0, 0.55),
        (75.0, 2.635),
        (100.0, 3.82),
        (150.0, 6.59),
    ]));
    cal.set_table(2, points(&[
        (10.0, 0.0),
        (20.0, 0.205),
        (50.0, 1.18),
        (50.0, 1.085),
        (30.0, 0.46),
        (75.0, 2.2),
        (100.0, 3.36),
        (150.0, 5.63),
    ]));
    cal.set_table(3, points(&[
        (10.0, 0.0),
        (20.0, 0.49),
        (50.0, 1.52),
        (50.0, 1.295),
        (30.0, 0.62),
        (75.0, 2.775),
        (100.0, 4.18),
        (150.0, 6.65),
    ]));
    cal
});

fn points(raw: &[(f64, f64)]) -> Vec<CalPoint> {
    raw.iter()
        .map(|&(duration_ms, volume_ul)| CalPoint {
            duration_ms,
            volume_ul,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_valve_is_fatal() {
        let cal = ValveCalibration::new();
        assert!(matches!(
            cal.valve_time(5.5, 4),
            Err(EngineError::InsufficientCalibration { valve: 4, .. })
        ));
    }

    #[test]
    fn single_point_is_insufficient() {
        let mut cal = ValveCalibration::new();
        cal.set_table(1, vec![CalPoint { duration_ms: 20.0, volume_ul: 0.2 }]);
        assert!(matches!(
            cal.valve_time(0.2, 1),
            Err(EngineError::InsufficientCalibration { measurements: 1, .. })
        ));
    }

    #[test]
    fn two_points_fit_a_line() {
        let mut cal = ValveCalibration::new();
        cal.set_table(2, vec![
            CalPoint { duration_ms: 10.0, volume_ul: 1.0 },
            CalPoint { duration_ms: 30.0, volume_ul: 3.0 },
        ]);
        let time = cal.valve_time(2.0, 2).unwrap();
        assert!((time - 0.020).abs() < 1e-9, "got {time}");
    }

    #[test]
    fn default_tables_give_plausible_open_times() {
        // 5.5 ul on valve 1 should be on the order of 170 ms.
        let time = DEFAULT_CALIBRATION.valve_time(5.5, 1).unwrap();
        assert!(time > 0.1 && time < 0.3, "got {time}");
        // Monotone in volume.
        let smaller = DEFAULT_CALIBRATION.valve_time(2.0, 1).unwrap();
        assert!(smaller < time);
    }

    #[test]
    fn negative_extrapolation_is_fatal() {
        let mut cal = ValveCalibration::new();
        cal.set_table(1, vec![
            CalPoint { duration_ms: 10.0, volume_ul: 1.0 },
            CalPoint { duration_ms: 30.0, volume_ul: 3.0 },
        ]);
        // Line hits zero at volume 0; below that the open time goes negative.
        assert!(matches!(
            cal.valve_time(-1.0, 1),
            Err(EngineError::NegativeValveTime { .. })
        ));
    }
}
