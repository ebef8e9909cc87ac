//! Coefficient extractor: conversation plus health context in, coefficients out.

use bolus_ai::Message;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::sync::LazyLock;

use crate::calculator::Coefficients;
use crate::error::{Error, Result};
use crate::health::HealthContext;
use crate::reasoner::Reasoner;
use crate::stages::gatherer::is_completion_sentinel;
use crate::stages::prompts::{extractor_policy, ExtractorInputs};

/// Fields as the model writes them. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct RawFactors {
    #[serde(default, alias = "carb_grams", deserialize_with = "lenient_f64")]
    pub carbs: Option<f64>,
    #[serde(default, alias = "blood_glucose", deserialize_with = "lenient_f64")]
    pub blood_sugar: Option<f64>,
    #[serde(default, alias = "residual_insulin", deserialize_with = "lenient_f64")]
    pub iob: Option<f64>,
    #[serde(default, alias = "exercise", deserialize_with = "lenient_f64")]
    pub exercise_factor: Option<f64>,
    #[serde(default, alias = "morning_resistance", deserialize_with = "lenient_f64")]
    pub morning_factor: Option<f64>,
    #[serde(default, alias = "stress", deserialize_with = "lenient_f64")]
    pub stress_factor: Option<f64>,
    #[serde(default, alias = "illness", deserialize_with = "lenient_f64")]
    pub ill_factor: Option<f64>,
}

/// Accept numbers, numeric strings and null.
fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => Ok(n.as_f64()),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("not a number: {:?}", s))),
        other => Err(D::Error::custom(format!("not a number: {}", other))),
    }
}

static FENCED_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

/// Pull the JSON object out of a reply, fenced or bare.
pub fn parse_factors(text: &str) -> Result<RawFactors> {
    let json = if let Some(caps) = FENCED_JSON_RE.captures(text) {
        caps.get(1).map(|m| m.as_str()).unwrap_or_default()
    } else {
        match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => &text[start..=end],
            _ => return Err(Error::extraction("no JSON object in reply")),
        }
    };
    serde_json::from_str(json).map_err(|e| Error::extraction(e.to_string()))
}

/// History without the gatherer's completion replies.
pub fn filter_history(history: &[Message]) -> Vec<Message> {
    history
        .iter()
        .filter(|m| !(m.is_assistant() && !m.has_tool_calls() && is_completion_sentinel(&m.text())))
        .cloned()
        .collect()
}

/// Combine model output with the health context.
///
/// The glucose the model reports wins, since it has seen both the stored
/// reading and anything the person said. The stored reading is the fallback;
/// with neither the extraction fails rather than assume a number. Insulin on
/// board always comes from the health store.
pub fn resolve(raw: RawFactors, context: &HealthContext) -> Result<Coefficients> {
    let blood_glucose = raw
        .blood_sugar
        .filter(|bg| bg.is_finite() && *bg > 0.0)
        .or(context.blood_glucose)
        .ok_or(Error::GlucoseUnavailable)?;

    let neutral = Coefficients::default();
    Ok(Coefficients {
        carb_grams: raw.carbs.unwrap_or(0.0),
        blood_glucose,
        residual_insulin: context.iob,
        exercise: raw.exercise_factor.unwrap_or(neutral.exercise),
        morning_resistance: raw.morning_factor.unwrap_or(neutral.morning_resistance),
        stress: raw.stress_factor.unwrap_or(neutral.stress),
        illness: raw.ill_factor.unwrap_or(neutral.illness),
    }
    .clamped())
}

/// Run the extractor. Unparseable output fails the turn; there is no retry here.
pub async fn extract(
    reasoner: &dyn Reasoner,
    history: &[Message],
    context: &HealthContext,
) -> Result<Coefficients> {
    let time = context.local_time();
    let policy = extractor_policy(&ExtractorInputs {
        time: &time,
        blood_glucose: context.blood_glucose,
        iob: context.iob,
        cob: context.cob,
    });
    let messages = filter_history(history);
    let reply = reasoner.invoke(&policy, &messages, &[]).await?;
    let text = reply.message.text();

    let raw = parse_factors(&text).inspect_err(|e| {
        tracing::warn!(error = %e, reply = %text, "could not parse extractor reply");
    })?;
    let coefficients = resolve(raw, context)?;
    tracing::debug!(?coefficients, "coefficients extracted");
    Ok(coefficients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoner::mock::ScriptedReasoner;
    use crate::stages::prompts::COMPLETION_SENTINEL;
    use chrono::{FixedOffset, TimeZone};

    fn context(glucose: Option<f64>) -> HealthContext {
        HealthContext {
            now: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2025, 3, 14, 8, 0, 0)
                .unwrap(),
            blood_glucose: glucose,
            iob: 1.0,
            cob: 0.0,
        }
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = parse_factors(
            "Here you go:\n```json\n{\"carbs\": 65, \"morning_factor\": 1.3}\n```",
        )
        .unwrap();
        assert_eq!(raw.carbs, Some(65.0));
        assert_eq!(raw.morning_factor, Some(1.3));
        assert_eq!(raw.stress_factor, None);
    }

    #[test]
    fn test_parse_bare_json_with_strings_and_aliases() {
        let raw =
            parse_factors(r#"{"carb_grams": "40.5", "stress": 1.15, "blood_sugar": null}"#).unwrap();
        assert_eq!(raw.carbs, Some(40.5));
        assert_eq!(raw.stress_factor, Some(1.15));
        assert_eq!(raw.blood_sugar, None);
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(
            parse_factors("I think about 60 grams"),
            Err(Error::Extraction { .. })
        ));
        assert!(matches!(
            parse_factors(r#"{"carbs": "lots"}"#),
            Err(Error::Extraction { .. })
        ));
    }

    #[test]
    fn test_resolve_prefers_stated_glucose_and_clamps() {
        let raw = RawFactors {
            carbs: Some(65.0),
            blood_sugar: Some(250.0),
            iob: Some(9.0),
            exercise_factor: Some(0.2),
            stress_factor: Some(2.0),
            ..Default::default()
        };
        let c = resolve(raw, &context(Some(180.0))).unwrap();
        assert_eq!(c.blood_glucose, 250.0);
        assert_eq!(c.residual_insulin, 1.0);
        assert_eq!(c.exercise, 0.5);
        assert_eq!(c.stress, 1.3);
        assert_eq!(c.illness, 1.0);
    }

    #[test]
    fn test_resolve_glucose_fallbacks() {
        let raw = RawFactors {
            blood_sugar: Some(210.0),
            ..Default::default()
        };
        assert_eq!(resolve(raw, &context(None)).unwrap().blood_glucose, 210.0);
        let unusable = RawFactors {
            blood_sugar: Some(-5.0),
            ..Default::default()
        };
        assert_eq!(resolve(unusable, &context(Some(140.0))).unwrap().blood_glucose, 140.0);
        assert_eq!(
            resolve(RawFactors::default(), &context(Some(140.0))).unwrap().blood_glucose,
            140.0
        );
        assert!(matches!(
            resolve(RawFactors::default(), &context(None)),
            Err(Error::GlucoseUnavailable)
        ));
    }

    #[test]
    fn test_filter_history_drops_sentinel_replies() {
        let history = vec![
            Message::user("ramen"),
            Message::assistant("Any exercise?"),
            Message::assistant(COMPLETION_SENTINEL),
        ];
        let filtered = filter_history(&history);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|m| !is_completion_sentinel(&m.text())));
    }

    #[tokio::test]
    async fn test_extract_renders_context_and_filters() {
        let reasoner = ScriptedReasoner::new().text(r#"{"carbs": 65, "morning_factor": 1.3}"#);
        let history = vec![
            Message::user("ramen"),
            Message::assistant(COMPLETION_SENTINEL),
        ];
        let c = extract(&reasoner, &history, &context(Some(180.0)))
            .await
            .unwrap();
        assert_eq!(c.carb_grams, 65.0);
        assert_eq!(c.morning_resistance, 1.3);

        let calls = reasoner.calls();
        assert_eq!(calls[0].messages.len(), 1);
        assert!(calls[0].policy.contains("Current time: 08:00"));
        assert!(calls[0].policy.contains("180 mg/dL"));
    }

    #[tokio::test]
    async fn test_extract_unparseable_reply_is_extraction_error() {
        let reasoner = ScriptedReasoner::new().text("Sorry, I can't do that.");
        let err = extract(&reasoner, &[Message::user("x")], &context(Some(120.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
    }
}
