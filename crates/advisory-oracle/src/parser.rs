use crate::error::{OracleError, OracleResult};
use crate::models::OracleDecision;

/// Remove a surrounding ``` fence (optionally tagged `json`).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse the oracle's reply text into a decision.
///
/// Anything that is not a JSON object with `should_enter` and a
/// `confidence` in [0, 1] is an error; callers turn errors into a rejection.
pub fn parse_decision(text: &str) -> OracleResult<OracleDecision> {
    let body = strip_code_fences(text);
    if body.is_empty() {
        return Err(OracleError::InvalidResponse("empty reply".to_string()));
    }

    let decision: OracleDecision = serde_json::from_str(body)?;
    if !(0.0..=1.0).contains(&decision.confidence) {
        return Err(OracleError::InvalidResponse(format!(
            "confidence {} outside [0, 1]",
            decision.confidence
        )));
    }
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_json_parses() {
        let d = parse_decision(r#"{"should_enter": true, "confidence": 0.82, "reason": "aligned"}"#).unwrap();
        assert!(d.should_enter);
        assert_eq!(d.confidence, 0.82);
        assert_eq!(d.reason, "aligned");
    }

    #[test]
    fn fenced_json_parses() {
        let text = "```json\n{\"should_enter\": false, \"confidence\": 0.2, \"reason\": \"skip\"}\n```";
        let d = parse_decision(text).unwrap();
        assert!(!d.should_enter);

        let untagged = "```\n{\"should_enter\": true, \"confidence\": 0.6}\n```";
        assert!(parse_decision(untagged).unwrap().should_enter);
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        // Percent-scale reply must not turn into full confidence
        let err = parse_decision(r#"{"should_enter": true, "confidence": 85}"#).unwrap_err();
        assert!(matches!(err, OracleError::InvalidResponse(_)));
        assert!(parse_decision(r#"{"should_enter": true, "confidence": 1.7}"#).is_err());
        assert!(parse_decision(r#"{"should_enter": true, "confidence": -0.1}"#).is_err());

        let edge = parse_decision(r#"{"should_enter": true, "confidence": 1.0}"#).unwrap();
        assert_eq!(edge.confidence, 1.0);
    }

    #[test]
    fn malformed_reply_is_error() {
        assert!(parse_decision("I think you should buy").is_err());
        assert!(parse_decision("").is_err());
        assert!(parse_decision(r#"{"confidence": 0.9}"#).is_err());
    }
}
