//! Explanation composer: the visible reply that closes a cycle.

use bolus_ai::Message;

use crate::calculator::{round_to, Coefficients, DoseResult};
use crate::error::Result;
use crate::reasoner::Reasoner;
use crate::stages::prompts::{dose_policy, QUERY_POLICY};
use crate::state::CalculationOutcome;

/// Shown when the model returns nothing usable.
pub const FALLBACK_REPLY: &str =
    "Sorry, an error occurred while preparing the answer. Please try again.";

/// Deterministic summary appended to every dose explanation.
pub fn dose_footer(dose: &DoseResult) -> String {
    let factors = dose.non_neutral_factors();
    let applied = if factors.is_empty() {
        "no adjustment factors".to_string()
    } else {
        factors
            .iter()
            .map(|(name, value)| format!("{} x{}", name, value))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "Base dose {} units, recommended {:.1} units ({}).",
        round_to(dose.base_bolus, 2),
        dose.final_bolus,
        applied
    )
}

fn describe_factors(factors: Option<&Coefficients>) -> String {
    match factors {
        Some(c) => format!(
            "carbs {} g, blood glucose {} mg/dL, insulin on board {} units, exercise {}, morning {}, stress {}, illness {}",
            c.carb_grams,
            c.blood_glucose,
            c.residual_insulin,
            c.exercise,
            c.morning_resistance,
            c.stress,
            c.illness
        ),
        None => "none".to_string(),
    }
}

fn or_fallback(text: String) -> String {
    if text.trim().is_empty() {
        tracing::warn!("composer returned an empty reply");
        FALLBACK_REPLY.to_string()
    } else {
        text.trim().to_string()
    }
}

/// Explain a calculation. Every non-neutral factor is named in the footer.
pub async fn compose_dose(
    reasoner: &dyn Reasoner,
    history: &[Message],
    factors: Option<&Coefficients>,
    outcome: &CalculationOutcome,
) -> Result<String> {
    let calculation = match outcome {
        CalculationOutcome::Dose(dose) => dose.to_string(),
        CalculationOutcome::Unavailable { reason } => reason.clone(),
    };
    let policy = dose_policy(&describe_factors(factors), &calculation);
    let reply = reasoner.invoke(&policy, history, &[]).await?;
    let body = or_fallback(reply.message.text());

    Ok(match outcome {
        CalculationOutcome::Dose(dose) => format!("{}\n\n{}", body, dose_footer(dose)),
        CalculationOutcome::Unavailable { .. } => body,
    })
}

/// Answer a general question. No dose is involved.
pub async fn compose_query(reasoner: &dyn Reasoner, history: &[Message]) -> Result<String> {
    let reply = reasoner.invoke(QUERY_POLICY, history, &[]).await?;
    Ok(or_fallback(reply.message.text()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::{compute_dose, ClinicalProfile};
    use crate::reasoner::mock::ScriptedReasoner;

    fn dose(c: &Coefficients) -> DoseResult {
        compute_dose(&ClinicalProfile::default(), c)
    }

    #[test]
    fn test_footer_lists_non_neutral_factors() {
        let d = dose(&Coefficients {
            carb_grams: 65.0,
            blood_glucose: 180.0,
            residual_insulin: 1.0,
            exercise: 0.8,
            stress: 1.15,
            ..Default::default()
        });
        let footer = dose_footer(&d);
        assert!(footer.contains("Base dose 11 units"));
        assert!(footer.contains("exercise x0.8"));
        assert!(footer.contains("stress x1.15"));
        assert!(!footer.contains("illness"));
    }

    #[test]
    fn test_footer_without_factors() {
        let d = dose(&Coefficients::default());
        assert_eq!(
            dose_footer(&d),
            "Base dose 0 units, recommended 0.0 units (no adjustment factors)."
        );
    }

    #[tokio::test]
    async fn test_compose_dose_passes_result_and_appends_footer() {
        let c = Coefficients {
            carb_grams: 65.0,
            blood_glucose: 180.0,
            residual_insulin: 1.0,
            ..Default::default()
        };
        let outcome = CalculationOutcome::Dose(dose(&c));
        let reasoner = ScriptedReasoner::new().text("For your ramen, take **11.0 units**.");
        let text = compose_dose(&reasoner, &[Message::user("ramen")], Some(&c), &outcome)
            .await
            .unwrap();
        assert!(text.starts_with("For your ramen"));
        assert!(text.ends_with("recommended 11.0 units (no adjustment factors)."));
        assert!(reasoner.calls()[0].policy.contains("Recommended insulin: 11.0 units"));
    }

    #[tokio::test]
    async fn test_compose_unavailable_has_no_footer() {
        let outcome = CalculationOutcome::Unavailable {
            reason: "No coefficients were available".into(),
        };
        let reasoner = ScriptedReasoner::new().text("I couldn't calculate a dose this time.");
        let text = compose_dose(&reasoner, &[], None, &outcome).await.unwrap();
        assert_eq!(text, "I couldn't calculate a dose this time.");
        assert!(reasoner.calls()[0].policy.contains("No coefficients were available"));
    }

    #[tokio::test]
    async fn test_empty_reply_falls_back() {
        let reasoner = ScriptedReasoner::new().text("   ");
        let text = compose_query(&reasoner, &[Message::user("carbs in rice?")])
            .await
            .unwrap();
        assert_eq!(text, FALLBACK_REPLY);
    }
}
