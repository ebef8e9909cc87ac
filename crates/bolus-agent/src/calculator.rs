//! Clinical calculator: dose formula and residual insulin/carbohydrate decay.
//!
//! Everything here is pure. The per-person constants live in [`ClinicalProfile`];
//! per-request inputs arrive as [`Coefficients`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minutes over which a bolus decays linearly to zero.
pub const INSULIN_ACTION_MINUTES: f64 = 300.0;

/// How far back dose and carbohydrate records are considered.
pub const LOOKBACK_MINUTES: f64 = 300.0;

/// Bounds for the exercise factor.
pub const EXERCISE_RANGE: (f64, f64) = (0.5, 1.0);
/// Allowed morning-resistance values.
pub const MORNING_VALUES: (f64, f64) = (1.0, 1.3);
/// Bounds for the stress factor.
pub const STRESS_RANGE: (f64, f64) = (1.0, 1.3);
/// Bounds for the illness factor.
pub const ILLNESS_RANGE: (f64, f64) = (1.0, 1.3);

/// Fixed per-person dosing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinicalProfile {
    /// Insulin-to-carb ratio: grams covered by one unit.
    pub icr: f64,
    /// Correction factor: mg/dL drop per unit.
    pub correction_factor: f64,
    /// Target blood glucose in mg/dL.
    pub target: f64,
    /// Glucose at or above which a correction bolus is added.
    pub correction_threshold: f64,
    /// Grams of carbohydrate digested per hour.
    pub carb_digest_rate: f64,
}

impl Default for ClinicalProfile {
    fn default() -> Self {
        Self {
            icr: 6.5,
            correction_factor: 35.0,
            target: 120.0,
            correction_threshold: 155.0,
            carb_digest_rate: 20.0,
        }
    }
}

/// Inputs to a single dose computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Coefficients {
    pub carb_grams: f64,
    /// mg/dL
    pub blood_glucose: f64,
    /// Insulin on board, in units.
    pub residual_insulin: f64,
    pub exercise: f64,
    pub morning_resistance: f64,
    pub stress: f64,
    pub illness: f64,
}

impl Default for Coefficients {
    fn default() -> Self {
        Self {
            carb_grams: 0.0,
            blood_glucose: 120.0,
            residual_insulin: 0.0,
            exercise: 1.0,
            morning_resistance: 1.0,
            stress: 1.0,
            illness: 1.0,
        }
    }
}

impl Coefficients {
    /// Force every field into its documented domain.
    ///
    /// Non-finite factors fall back to neutral; out-of-range factors are
    /// clamped. Morning resistance snaps to whichever allowed value is nearer.
    pub fn clamped(self) -> Self {
        let defaults = Self::default();
        Self {
            carb_grams: non_negative(self.carb_grams),
            blood_glucose: if self.blood_glucose.is_finite() && self.blood_glucose > 0.0 {
                self.blood_glucose
            } else {
                defaults.blood_glucose
            },
            residual_insulin: non_negative(self.residual_insulin),
            exercise: clamp_factor(self.exercise, EXERCISE_RANGE),
            morning_resistance: snap_morning(self.morning_resistance),
            stress: clamp_factor(self.stress, STRESS_RANGE),
            illness: clamp_factor(self.illness, ILLNESS_RANGE),
        }
    }

    /// The four adjustment factors with display names.
    pub fn factors(&self) -> [(&'static str, f64); 4] {
        [
            ("exercise", self.exercise),
            ("morning resistance", self.morning_resistance),
            ("stress", self.stress),
            ("illness", self.illness),
        ]
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

fn clamp_factor(value: f64, (lo, hi): (f64, f64)) -> f64 {
    if value.is_finite() {
        value.clamp(lo, hi)
    } else {
        1.0
    }
}

fn snap_morning(value: f64) -> f64 {
    let (plain, morning) = MORNING_VALUES;
    if value.is_finite() && value >= (plain + morning) / 2.0 {
        morning
    } else {
        plain
    }
}

/// The computed dose and everything needed to justify it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseResult {
    pub meal_bolus: f64,
    pub correction_bolus: f64,
    pub residual_insulin: f64,
    /// `max(0, meal + correction - residual)`
    pub base_bolus: f64,
    /// Base bolus times every factor, rounded to one decimal.
    pub final_bolus: f64,
    pub exercise: f64,
    pub morning_resistance: f64,
    pub stress: f64,
    pub illness: f64,
}

impl DoseResult {
    /// Factors that actually changed the dose.
    pub fn non_neutral_factors(&self) -> Vec<(&'static str, f64)> {
        [
            ("exercise", self.exercise),
            ("morning resistance", self.morning_resistance),
            ("stress", self.stress),
            ("illness", self.illness),
        ]
        .into_iter()
        .filter(|(_, v)| (*v - 1.0).abs() > f64::EPSILON)
        .collect()
    }
}

impl fmt::Display for DoseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Base insulin: {} units (meal {}, correction {}, insulin on board {})",
            round_to(self.base_bolus, 2),
            self.meal_bolus,
            self.correction_bolus,
            self.residual_insulin
        )?;
        writeln!(
            f,
            "Factors applied: exercise({}), morning({}), stress({}), illness({})",
            self.exercise, self.morning_resistance, self.stress, self.illness
        )?;
        write!(f, "Recommended insulin: {:.1} units", self.final_bolus)
    }
}

/// Compute a dose.
///
/// Meal and correction components round to whole units before being
/// combined; the final figure rounds to one decimal. Ties round to even.
pub fn compute_dose(profile: &ClinicalProfile, coefficients: &Coefficients) -> DoseResult {
    let c = coefficients.clamped();

    let meal_bolus = if c.carb_grams > 0.0 {
        (c.carb_grams / profile.icr).round_ties_even()
    } else {
        0.0
    };

    let correction_bolus = if c.blood_glucose >= profile.correction_threshold {
        ((c.blood_glucose - profile.target) / profile.correction_factor).round_ties_even()
    } else {
        0.0
    };

    let base_bolus = (meal_bolus + correction_bolus - c.residual_insulin).max(0.0);
    let final_bolus =
        round_to(base_bolus * c.exercise * c.morning_resistance * c.stress * c.illness, 1);

    DoseResult {
        meal_bolus,
        correction_bolus,
        residual_insulin: c.residual_insulin,
        base_bolus,
        final_bolus,
        exercise: c.exercise,
        morning_resistance: c.morning_resistance,
        stress: c.stress,
        illness: c.illness,
    }
}

/// A past insulin dose or carbohydrate intake.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoseHistoryRecord {
    /// Units of insulin, or grams of carbohydrate.
    pub amount: f64,
    pub minutes_ago: f64,
}

impl DoseHistoryRecord {
    pub fn new(amount: f64, minutes_ago: f64) -> Self {
        Self {
            amount,
            minutes_ago,
        }
    }

    fn in_window(&self) -> bool {
        self.amount.is_finite() && self.amount > 0.0 && self.minutes_ago <= LOOKBACK_MINUTES
    }

    // Records stamped slightly in the future (clock skew) count as just taken.
    fn elapsed(&self) -> f64 {
        self.minutes_ago.max(0.0)
    }
}

/// Insulin on board: each dose decays linearly to zero over five hours.
pub fn insulin_on_board(doses: &[DoseHistoryRecord]) -> f64 {
    let total: f64 = doses
        .iter()
        .filter(|d| d.in_window())
        .map(|d| d.amount * (1.0 - d.elapsed() / INSULIN_ACTION_MINUTES).max(0.0))
        .sum();
    round_to(total, 2)
}

/// Carbohydrate on board given a digestion rate in grams per hour.
pub fn carbs_on_board(carbs: &[DoseHistoryRecord], digest_rate_per_hour: f64) -> f64 {
    let per_minute = digest_rate_per_hour / 60.0;
    let total: f64 = carbs
        .iter()
        .filter(|c| c.in_window())
        .map(|c| (c.amount - per_minute * c.elapsed()).max(0.0))
        .sum();
    round_to(total, 2)
}

/// Round to `places` decimals, ties to even.
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round_ties_even() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neutral(carb_grams: f64, blood_glucose: f64, residual_insulin: f64) -> Coefficients {
        Coefficients {
            carb_grams,
            blood_glucose,
            residual_insulin,
            ..Default::default()
        }
    }

    #[test]
    fn test_meal_with_correction() {
        let profile = ClinicalProfile::default();
        let result = compute_dose(&profile, &neutral(65.0, 180.0, 1.0));
        assert_eq!(result.meal_bolus, 10.0);
        assert_eq!(result.correction_bolus, 2.0);
        assert_eq!(result.base_bolus, 11.0);
        assert_eq!(result.final_bolus, 11.0);
        assert!(result.non_neutral_factors().is_empty());
    }

    #[test]
    fn test_no_carbs_below_threshold() {
        let result = compute_dose(&ClinicalProfile::default(), &neutral(0.0, 130.0, 0.0));
        assert_eq!(result.meal_bolus, 0.0);
        assert_eq!(result.correction_bolus, 0.0);
        assert_eq!(result.base_bolus, 0.0);
        assert_eq!(result.final_bolus, 0.0);
    }

    #[test]
    fn test_base_never_negative() {
        let profile = ClinicalProfile::default();
        for iob in [0.0, 0.5, 3.0, 12.7] {
            for bg in [60.0, 100.0, 154.9] {
                let result = compute_dose(&profile, &neutral(0.0, bg, iob));
                assert_eq!(result.base_bolus, 0.0, "bg={} iob={}", bg, iob);
            }
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let result = compute_dose(&ClinicalProfile::default(), &neutral(0.0, 155.0, 0.0));
        // (155 - 120) / 35 = 1.0
        assert_eq!(result.correction_bolus, 1.0);
    }

    #[test]
    fn test_factors_multiply_final_dose() {
        let coefficients = Coefficients {
            carb_grams: 65.0,
            blood_glucose: 100.0,
            exercise: 0.8,
            morning_resistance: 1.3,
            ..Default::default()
        };
        let result = compute_dose(&ClinicalProfile::default(), &coefficients);
        assert_eq!(result.base_bolus, 10.0);
        // 10 * 0.8 * 1.3 = 10.4
        assert_eq!(result.final_bolus, 10.4);
        assert_eq!(
            result.non_neutral_factors(),
            vec![("exercise", 0.8), ("morning resistance", 1.3)]
        );
    }

    #[test]
    fn test_compute_dose_is_pure() {
        let profile = ClinicalProfile::default();
        let coefficients = Coefficients {
            carb_grams: 48.0,
            blood_glucose: 210.0,
            residual_insulin: 1.37,
            stress: 1.15,
            ..Default::default()
        };
        assert_eq!(
            compute_dose(&profile, &coefficients),
            compute_dose(&profile, &coefficients)
        );
    }

    #[test]
    fn test_clamp_bounds_for_any_input() {
        let raw_values = [
            -10.0,
            0.0,
            0.49,
            0.5,
            0.7,
            1.0,
            1.14,
            1.16,
            1.3,
            1.31,
            5.0,
            f64::NAN,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ];
        for &v in &raw_values {
            let c = Coefficients {
                carb_grams: v,
                blood_glucose: v,
                residual_insulin: v,
                exercise: v,
                morning_resistance: v,
                stress: v,
                illness: v,
            }
            .clamped();
            assert!((0.5..=1.0).contains(&c.exercise), "exercise {} from {}", c.exercise, v);
            assert!(c.morning_resistance == 1.0 || c.morning_resistance == 1.3);
            assert!((1.0..=1.3).contains(&c.stress));
            assert!((1.0..=1.3).contains(&c.illness));
            assert!(c.carb_grams >= 0.0);
            assert!(c.residual_insulin >= 0.0);
        }
    }

    #[test]
    fn test_clamped_is_idempotent() {
        let c = Coefficients {
            exercise: 0.2,
            morning_resistance: 1.2,
            stress: 2.0,
            illness: 0.9,
            ..Default::default()
        }
        .clamped();
        assert_eq!(c, c.clamped());
        assert_eq!(c.exercise, 0.5);
        assert_eq!(c.morning_resistance, 1.3);
        assert_eq!(c.stress, 1.3);
        assert_eq!(c.illness, 1.0);
    }

    #[test]
    fn test_iob_linear_decay() {
        let iob = insulin_on_board(&[DoseHistoryRecord::new(4.0, 150.0)]);
        assert_eq!(iob, 2.0);
    }

    #[test]
    fn test_iob_sums_and_expires() {
        let doses = [
            DoseHistoryRecord::new(4.0, 150.0),
            DoseHistoryRecord::new(3.0, 30.0),
            DoseHistoryRecord::new(10.0, 320.0),
        ];
        // 2.0 + 3 * 0.9
        assert_eq!(insulin_on_board(&doses), 4.7);
    }

    #[test]
    fn test_iob_empty() {
        assert_eq!(insulin_on_board(&[]), 0.0);
    }

    #[test]
    fn test_cob_digests_linearly() {
        // 60g eaten 90 minutes ago at 20g/h leaves 30g
        let cob = carbs_on_board(&[DoseHistoryRecord::new(60.0, 90.0)], 20.0);
        assert_eq!(cob, 30.0);
        let gone = carbs_on_board(&[DoseHistoryRecord::new(20.0, 120.0)], 20.0);
        assert_eq!(gone, 0.0);
    }

    #[test]
    fn test_meal_tie_rounds_to_even() {
        // 42.25 / 6.5 = 6.5
        let result = compute_dose(&ClinicalProfile::default(), &neutral(42.25, 100.0, 0.0));
        assert_eq!(result.meal_bolus, 6.0);
        // 55.25 / 6.5 = 8.5
        let result = compute_dose(&ClinicalProfile::default(), &neutral(55.25, 100.0, 0.0));
        assert_eq!(result.meal_bolus, 8.0);
    }

    #[test]
    fn test_correction_tie_rounds_to_even() {
        // (207.5 - 120) / 35 = 2.5
        let result = compute_dose(&ClinicalProfile::default(), &neutral(0.0, 207.5, 0.0));
        assert_eq!(result.correction_bolus, 2.0);
        assert_eq!(result.final_bolus, 2.0);
        // (242.5 - 120) / 35 = 3.5
        let result = compute_dose(&ClinicalProfile::default(), &neutral(0.0, 242.5, 0.0));
        assert_eq!(result.correction_bolus, 4.0);
    }

    #[test]
    fn test_round_to_ties_even() {
        assert_eq!(round_to(0.25, 1), 0.2);
        assert_eq!(round_to(0.75, 1), 0.8);
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(1.234, 2), 1.23);
    }

    #[test]
    fn test_display_mentions_final_dose() {
        let result = compute_dose(&ClinicalProfile::default(), &neutral(65.0, 180.0, 1.0));
        let text = result.to_string();
        assert!(text.contains("Recommended insulin: 11.0 units"), "{}", text);
    }
}
