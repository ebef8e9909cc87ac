//! Health-data collaborator: glucose readings and treatment history.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use std::time::Duration;

use crate::calculator::{self, ClinicalProfile, DoseHistoryRecord};
use crate::error::Result;

/// Window of dose and carbohydrate history consulted per extraction.
pub const HISTORY_WINDOW: Duration = Duration::from_secs(5 * 60 * 60);

/// Read access to the person's glucose and treatment records.
///
/// Implementations report an unreachable store as `Error::HealthData`;
/// "no reading" is `Ok(None)`, not an error.
#[async_trait]
pub trait HealthData: Send + Sync {
    /// Most recent blood glucose in mg/dL.
    async fn latest_glucose(&self) -> Result<Option<f64>>;

    /// Insulin doses taken within `window`.
    async fn recent_dose_events(&self, window: Duration) -> Result<Vec<DoseHistoryRecord>>;

    /// Carbohydrate intake within `window`.
    async fn recent_carb_events(&self, window: Duration) -> Result<Vec<DoseHistoryRecord>>;
}

/// Clinical context handed to the coefficient extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthContext {
    pub now: DateTime<FixedOffset>,
    pub blood_glucose: Option<f64>,
    /// Insulin on board, units.
    pub iob: f64,
    /// Carbohydrate on board, grams.
    pub cob: f64,
}

impl HealthContext {
    /// Wall-clock time as the person would read it.
    pub fn local_time(&self) -> String {
        self.now.format("%H:%M").to_string()
    }
}

/// Read the store once and derive IOB/COB.
pub async fn prepare_context(
    source: &dyn HealthData,
    profile: &ClinicalProfile,
    now: DateTime<FixedOffset>,
) -> Result<HealthContext> {
    let blood_glucose = source.latest_glucose().await?;
    let doses = source.recent_dose_events(HISTORY_WINDOW).await?;
    let carbs = source.recent_carb_events(HISTORY_WINDOW).await?;

    let context = HealthContext {
        now,
        blood_glucose,
        iob: calculator::insulin_on_board(&doses),
        cob: calculator::carbs_on_board(&carbs, profile.carb_digest_rate),
    };
    tracing::debug!(
        glucose = ?context.blood_glucose,
        iob = context.iob,
        cob = context.cob,
        doses = doses.len(),
        carbs = carbs.len(),
        "prepared health context"
    );
    Ok(context)
}

/// A fixed snapshot; useful offline and in tests.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StaticHealthData {
    pub blood_glucose: Option<f64>,
    pub doses: Vec<DoseHistoryRecord>,
    pub carbs: Vec<DoseHistoryRecord>,
}

fn within(records: &[DoseHistoryRecord], window: Duration) -> Vec<DoseHistoryRecord> {
    let limit = window.as_secs_f64() / 60.0;
    records
        .iter()
        .filter(|r| r.minutes_ago <= limit)
        .copied()
        .collect()
}

#[async_trait]
impl HealthData for StaticHealthData {
    async fn latest_glucose(&self) -> Result<Option<f64>> {
        Ok(self.blood_glucose)
    }

    async fn recent_dose_events(&self, window: Duration) -> Result<Vec<DoseHistoryRecord>> {
        Ok(within(&self.doses, window))
    }

    async fn recent_carb_events(&self, window: Duration) -> Result<Vec<DoseHistoryRecord>> {
        Ok(within(&self.carbs, window))
    }
}
