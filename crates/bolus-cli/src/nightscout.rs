//! Nightscout health-data client.

use async_trait::async_trait;
use bolus_agent::{DoseHistoryRecord, Error, HealthData, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::config::NightscoutConfig;

#[derive(Debug, Deserialize)]
struct Entry {
    sgv: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct Treatment {
    #[serde(default)]
    insulin: Option<f64>,
    #[serde(default)]
    carbs: Option<f64>,
    created_at: String,
}

pub struct NightscoutClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    api_secret: Option<String>,
}

impl NightscoutClient {
    pub fn new(config: &NightscoutConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            api_secret: config.api_secret.clone(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut request = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .timeout(Duration::from_secs(15));
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }
        if let Some(secret) = &self.api_secret {
            request = request.header("api-secret", secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::HealthData(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HealthData(format!("{} returned HTTP {}", path, status)));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::HealthData(format!("{}: {}", path, e)))
    }

    async fn treatments(&self, window: Duration) -> Result<Vec<Treatment>> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| Error::HealthData(e.to_string()))?;
        let since = (Utc::now() - window).to_rfc3339();
        self.get(
            "/api/v1/treatments.json",
            &[
                ("find[created_at][$gte]", since),
                ("count", "1000".to_string()),
            ],
        )
        .await
    }
}

/// Turn treatments into records, keeping positive amounts picked by `amount`.
fn records(
    treatments: &[Treatment],
    now: DateTime<Utc>,
    amount: impl Fn(&Treatment) -> Option<f64>,
) -> Vec<DoseHistoryRecord> {
    treatments
        .iter()
        .filter_map(|t| {
            let value = amount(t).filter(|v| *v > 0.0)?;
            let at = match DateTime::parse_from_rfc3339(&t.created_at) {
                Ok(at) => at.with_timezone(&Utc),
                Err(e) => {
                    tracing::warn!(created_at = %t.created_at, error = %e, "skipping treatment");
                    return None;
                }
            };
            let minutes_ago = ((now - at).num_seconds() as f64 / 60.0).max(0.0);
            Some(DoseHistoryRecord::new(value, minutes_ago))
        })
        .collect()
}

#[async_trait]
impl HealthData for NightscoutClient {
    async fn latest_glucose(&self) -> Result<Option<f64>> {
        let entries: Vec<Entry> = self
            .get("/api/v1/entries.json", &[("count", "1".to_string())])
            .await?;
        Ok(entries.first().and_then(|e| e.sgv))
    }

    async fn recent_dose_events(&self, window: Duration) -> Result<Vec<DoseHistoryRecord>> {
        let treatments = self.treatments(window).await?;
        Ok(records(&treatments, Utc::now(), |t| t.insulin))
    }

    async fn recent_carb_events(&self, window: Duration) -> Result<Vec<DoseHistoryRecord>> {
        let treatments = self.treatments(window).await?;
        Ok(records(&treatments, Utc::now(), |t| t.carbs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Vec<Treatment> {
        serde_json::from_str(
            r#"[
                {"eventType": "Meal Bolus", "insulin": 4, "carbs": 60, "created_at": "2025-03-14T10:30:00.000Z"},
                {"eventType": "Correction Bolus", "insulin": 1.5, "created_at": "2025-03-14T11:45:00Z"},
                {"eventType": "Carb Correction", "carbs": 15, "insulin": null, "created_at": "2025-03-14T12:00:00+00:00"},
                {"eventType": "Note", "created_at": "not a date", "insulin": 2}
            ]"#,
        )
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_insulin_records() {
        let doses = records(&sample(), now(), |t| t.insulin);
        assert_eq!(
            doses,
            vec![
                DoseHistoryRecord::new(4.0, 150.0),
                DoseHistoryRecord::new(1.5, 75.0)
            ]
        );
    }

    #[test]
    fn test_carb_records() {
        let carbs = records(&sample(), now(), |t| t.carbs);
        assert_eq!(
            carbs,
            vec![
                DoseHistoryRecord::new(60.0, 150.0),
                DoseHistoryRecord::new(15.0, 60.0)
            ]
        );
    }

    #[test]
    fn test_entry_without_sgv() {
        let entries: Vec<Entry> = serde_json::from_str(r#"[{"type": "mbg", "mbg": 140}]"#).unwrap();
        assert_eq!(entries[0].sgv, None);
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let client = NightscoutClient::new(&NightscoutConfig {
            url: "https://ns.example.com/".into(),
            token: None,
            api_secret: None,
        });
        assert_eq!(client.base_url, "https://ns.example.com");
    }
}
