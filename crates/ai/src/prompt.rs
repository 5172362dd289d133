//! Prompt construction and response parsing shared by every provider.

use std::fmt::Write;

use riskmap_scoring::ScoredRisk;

use crate::hedger::{HedgeError, HedgeResult};

/// Longest slice of a raw model reply quoted in parse errors.
const RAW_EXCERPT_CHARS: usize = 200;

pub const SYSTEM_PROMPT: &str = r#"You are a risk management advisor for small and medium businesses.
You will receive a list of business risks identified through an assessment questionnaire.
Each risk has a name, description, probability (1-10), impact (1-10), tier (watch/red/manage/ignore), and a static hedge suggestion.

Your job is to produce:
1. An executive_summary: 2-3 sentences summarising the overall risk posture. Be direct and specific.
2. A top_priority_html: a short HTML fragment (1-2 sentences, may use <strong>) identifying the single most urgent action. Inline elements only, no <html>, <body> or block elements.
3. A hedges object: for each risk (keyed by question_id), write an improved, specific hedge narrative. 2-4 sentences. Focus on concrete actions with rough timelines. Do not repeat the static hedge verbatim.

Respond ONLY with valid JSON matching this exact schema, no markdown fences, no preamble:
{
  "executive_summary": "...",
  "top_priority_html": "...",
  "hedges": {
    "question_id_1": "...",
    "question_id_2": "..."
  }
}"#;

/// Render risks as the user message.
pub fn build_prompt(risks: &[ScoredRisk]) -> String {
    let mut out = String::from("Here are the business risks to analyse:\n\n");
    for r in risks {
        let _ = writeln!(out, "question_id: {}", r.question_id);
        let _ = writeln!(out, "name: {}", r.risk_name);
        let _ = writeln!(out, "description: {}", r.risk_desc);
        let _ = writeln!(
            out,
            "probability: {}/10, impact: {}/10, score: {}, tier: {}",
            r.probability, r.impact, r.score, r.tier
        );
        let _ = writeln!(out, "static_hedge: {}", r.hedge);
        out.push_str("---\n");
    }
    out
}

/// Parse a model reply into a [`HedgeResult`], tolerating stray code fences.
pub fn parse_hedge_json(raw: &str) -> Result<HedgeResult, HedgeError> {
    let cleaned = strip_fences(raw);
    serde_json::from_str(cleaned).map_err(|e| {
        let excerpt: String = cleaned.chars().take(RAW_EXCERPT_CHARS).collect();
        HedgeError::Parse(format!("{e} (raw: {excerpt})"))
    })
}

fn strip_fences(raw: &str) -> &str {
    let s = raw.trim();
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    let s = s.strip_suffix("```").unwrap_or(s);
    s.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskmap_core::RiskTier;

    fn risk() -> ScoredRisk {
        ScoredRisk {
            question_id: "cash_runway".into(),
            rank: 1,
            risk_name: "Cash runway".into(),
            risk_desc: "Less than three months of cash.".into(),
            hedge: "Open a credit line.".into(),
            section: "Finance".into(),
            probability: 8,
            impact: 9,
            score: 72,
            tier: RiskTier::Watch,
        }
    }

    #[test]
    fn prompt_lists_every_field() {
        let prompt = build_prompt(&[risk()]);
        assert!(prompt.contains("question_id: cash_runway\n"));
        assert!(prompt.contains("probability: 8/10, impact: 9/10, score: 72, tier: watch\n"));
        assert!(prompt.contains("static_hedge: Open a credit line.\n"));
        assert!(prompt.ends_with("---\n"));
    }

    #[test]
    fn parses_plain_json() {
        let parsed = parse_hedge_json(
            r#"{"executive_summary":"Tight.","top_priority_html":"<strong>Cash</strong>","hedges":{"cash_runway":"Do X."}}"#,
        )
        .unwrap();
        assert_eq!(parsed.executive_summary, "Tight.");
        assert_eq!(parsed.hedges["cash_runway"], "Do X.");
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n{\"executive_summary\":\"ok\",\"hedges\":{}}\n```";
        let parsed = parse_hedge_json(raw).unwrap();
        assert_eq!(parsed.executive_summary, "ok");
        assert_eq!(parsed.top_priority_html, "");

        let bare = "```\n{\"hedges\":{\"a\":\"b\"}}```";
        assert_eq!(parse_hedge_json(bare).unwrap().hedges.len(), 1);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_hedge_json("Sure! Here are your hedges.").unwrap_err();
        assert!(matches!(err, HedgeError::Parse(msg) if msg.contains("raw: Sure!")));
    }
}
