//! Scoring and aggregation over a session's answers.

use serde::{Deserialize, Serialize};

use riskmap_core::{AnswerRow, RiskTier};

use crate::config::{RiskScore, ScoringConfig, ScoringError};
use crate::tier::TierThresholds;

/// A scored, ranked risk ready for hedging and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredRisk {
    pub question_id: String,
    /// Dense, 1-indexed position after sorting.
    pub rank: u32,
    pub risk_name: String,
    pub risk_desc: String,
    pub hedge: String,
    pub section: String,
    pub probability: u8,
    pub impact: u8,
    pub score: u16,
    pub tier: RiskTier,
}

/// Score a single answer against its configuration.
///
/// Radio answers that match no option (empty, skipped, stale) score the
/// minimum `(1, 1)` rather than failing.
pub fn score_answer(config: &ScoringConfig, answer: &str) -> RiskScore {
    match config {
        ScoringConfig::Radio(radio) => radio.score(answer),
        ScoringConfig::Text(text) => text.score(answer),
    }
}

/// Scores answer rows using a fixed set of tier cutoffs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scorer {
    thresholds: TierThresholds,
}

impl Scorer {
    pub fn new(thresholds: TierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> TierThresholds {
        self.thresholds
    }

    /// Score every scoring row, then sort and rank.
    ///
    /// Order is score descending, ties broken by question id ascending.
    /// Any invalid configuration fails the whole computation.
    pub fn compute_risks(&self, rows: &[AnswerRow]) -> Result<Vec<ScoredRisk>, ScoringError> {
        let mut risks = Vec::with_capacity(rows.len());

        for row in rows.iter().filter(|r| r.is_scoring) {
            let config = ScoringConfig::parse(&row.scoring_config)
                .map_err(|e| ScoringError::for_question(&row.question_id, e))?;
            let pair = score_answer(&config, &row.answer_text);

            risks.push(ScoredRisk {
                question_id: row.question_id.clone(),
                rank: 0,
                risk_name: row.risk_name.clone(),
                risk_desc: row.risk_desc.clone(),
                hedge: row.hedge.clone(),
                section: row.section_title.clone(),
                probability: pair.probability,
                impact: pair.impact,
                score: pair.composite(),
                tier: self.thresholds.classify(pair.probability, pair.impact),
            });
        }

        risks.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.question_id.cmp(&b.question_id))
        });
        for (idx, risk) in risks.iter_mut().enumerate() {
            risk.rank = idx as u32 + 1;
        }

        Ok(risks)
    }
}

/// [`Scorer::compute_risks`] with the default cutoffs.
pub fn compute_risks(rows: &[AnswerRow]) -> Result<Vec<ScoredRisk>, ScoringError> {
    Scorer::default().compute_risks(rows)
}

/// Mean composite score, rounded half-up; `0` when empty.
pub fn overall_score(risks: &[ScoredRisk]) -> u32 {
    if risks.is_empty() {
        return 0;
    }
    let n = risks.len() as u64;
    let total: u64 = risks.iter().map(|r| u64::from(r.score)).sum();
    ((2 * total + n) / (2 * n)) as u32
}

/// Number of `watch`-tier risks.
pub fn critical_count(risks: &[ScoredRisk]) -> usize {
    risks.iter().filter(|r| r.tier == RiskTier::Watch).count()
}

/// Order-preserving subset of risks whose tier is in `tiers`.
pub fn filter_by_tier(risks: &[ScoredRisk], tiers: &[RiskTier]) -> Vec<ScoredRisk> {
    risks
        .iter()
        .filter(|r| tiers.contains(&r.tier))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RadioConfig, TextConfig};
    use proptest::prelude::*;
    use serde_json::json;

    fn radio_row(question_id: &str, answer: &str) -> AnswerRow {
        AnswerRow {
            question_id: question_id.to_string(),
            answer_text: answer.to_string(),
            section_title: "Operations".to_string(),
            risk_name: format!("risk {question_id}"),
            risk_desc: "desc".to_string(),
            hedge: "static hedge".to_string(),
            scoring_config: json!({
                "type": "radio",
                "opts": ["Yes", "Partly", "No"],
                "p_scores": [2, 5, 9],
                "i_scores": [2, 6, 9]
            }),
            is_scoring: true,
        }
    }

    fn risk_with_score(question_id: &str, score: u16) -> ScoredRisk {
        ScoredRisk {
            question_id: question_id.to_string(),
            rank: 0,
            risk_name: String::new(),
            risk_desc: String::new(),
            hedge: String::new(),
            section: String::new(),
            probability: 1,
            impact: 1,
            score,
            tier: RiskTier::Ignore,
        }
    }

    fn text_config(threshold: i64) -> ScoringConfig {
        ScoringConfig::Text(TextConfig {
            threshold,
            p_short: 8,
            p_long: 3,
            i_short: 7,
            i_long: 2,
        })
    }

    #[test]
    fn radio_matches_trimmed_answer() {
        let cfg = ScoringConfig::parse(&radio_row("q", "").scoring_config).unwrap();
        let pair = score_answer(&cfg, "  No \n");
        assert_eq!(pair, RiskScore { probability: 9, impact: 9 });
    }

    #[test]
    fn radio_unknown_or_empty_answer_scores_minimum() {
        let cfg = ScoringConfig::parse(&radio_row("q", "").scoring_config).unwrap();
        assert_eq!(score_answer(&cfg, ""), RiskScore::MINIMUM);
        assert_eq!(score_answer(&cfg, "Maybe"), RiskScore::MINIMUM);
        assert_eq!(score_answer(&cfg, "no"), RiskScore::MINIMUM);
    }

    #[test]
    fn text_threshold_boundary_is_exclusive() {
        let cfg = text_config(5);
        assert_eq!(score_answer(&cfg, "abcde"), RiskScore { probability: 8, impact: 7 });
        assert_eq!(score_answer(&cfg, "abcdef"), RiskScore { probability: 3, impact: 2 });
        assert_eq!(score_answer(&cfg, "  abcde  "), RiskScore { probability: 8, impact: 7 });
    }

    #[test]
    fn zero_threshold_treats_any_text_as_long() {
        let cfg = text_config(0);
        assert_eq!(score_answer(&cfg, ""), RiskScore { probability: 8, impact: 7 });
        assert_eq!(score_answer(&cfg, "x"), RiskScore { probability: 3, impact: 2 });
    }

    #[test]
    fn compute_risks_sorts_ranks_and_skips_non_scoring() {
        let mut context = radio_row("q0", "No");
        context.is_scoring = false;
        let rows = vec![
            radio_row("q3", "Partly"),
            radio_row("q2", "No"),
            context,
            radio_row("q1", "Partly"),
            radio_row("q4", "Yes"),
        ];

        let risks = compute_risks(&rows).unwrap();
        let order: Vec<_> = risks.iter().map(|r| r.question_id.as_str()).collect();
        assert_eq!(order, vec!["q2", "q1", "q3", "q4"]);
        let ranks: Vec<_> = risks.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        assert_eq!(risks[0].score, 81);
        assert_eq!(risks[0].tier, RiskTier::Watch);
        assert_eq!(risks[1].tier, RiskTier::Ignore);
        assert_eq!(risks[0].section, "Operations");
    }

    #[test]
    fn compute_risks_names_the_broken_question() {
        let mut bad = radio_row("q9", "Yes");
        bad.scoring_config = json!({"type": "radio", "opts": ["Yes"], "p_scores": [1], "i_scores": []});
        let err = compute_risks(&[radio_row("q1", "Yes"), bad]).unwrap_err();
        assert!(matches!(err, ScoringError::Question { ref question_id, .. } if question_id == "q9"));
        assert!(err.to_string().starts_with("question \"q9\": radio config"));
    }

    #[test]
    fn non_scoring_rows_are_not_parsed() {
        let mut context = radio_row("ctx", "anything");
        context.is_scoring = false;
        context.scoring_config = json!(null);
        assert!(compute_risks(&[context]).unwrap().is_empty());
    }

    #[test]
    fn overall_score_rounds_half_up() {
        let scores = |s: &[u16]| -> Vec<ScoredRisk> {
            s.iter().enumerate().map(|(i, v)| risk_with_score(&format!("q{i}"), *v)).collect()
        };
        assert_eq!(overall_score(&scores(&[81, 30, 9])), 40);
        assert_eq!(overall_score(&scores(&[10, 11])), 11);
        assert_eq!(overall_score(&scores(&[10, 10, 11])), 10);
        assert_eq!(overall_score(&[]), 0);
    }

    #[test]
    fn critical_count_counts_watch_only() {
        let mut a = risk_with_score("a", 1);
        a.tier = RiskTier::Watch;
        let mut b = risk_with_score("b", 1);
        b.tier = RiskTier::Red;
        let c = risk_with_score("c", 1);
        assert_eq!(critical_count(&[a.clone(), b, c, a]), 2);
    }

    #[test]
    fn filter_by_tier_preserves_order() {
        let tiers = [RiskTier::Red, RiskTier::Ignore, RiskTier::Watch, RiskTier::Manage];
        let risks: Vec<_> = tiers
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut r = risk_with_score(&format!("q{i}"), 1);
                r.tier = *t;
                r
            })
            .collect();

        let picked = filter_by_tier(&risks, &[RiskTier::Watch, RiskTier::Red]);
        let ids: Vec<_> = picked.iter().map(|r| r.question_id.as_str()).collect();
        assert_eq!(ids, vec!["q0", "q2"]);
        assert!(filter_by_tier(&risks, &[]).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a matching option yields its configured pair; anything else yields (1, 1).
        #[test]
        fn radio_scoring_is_total(
            scores in prop::collection::vec((1i64..=10, 1i64..=10), 1..6),
            pick in any::<prop::sample::Index>(),
            stray in "[a-z]{1,8}",
        ) {
            let opts: Vec<String> = (0..scores.len()).map(|i| format!("Option {i}")).collect();
            let cfg = ScoringConfig::Radio(RadioConfig {
                opts: opts.clone(),
                p_scores: scores.iter().map(|s| s.0).collect(),
                i_scores: scores.iter().map(|s| s.1).collect(),
            });
            prop_assert!(cfg.validate().is_ok());

            let idx = pick.index(opts.len());
            let pair = score_answer(&cfg, &opts[idx]);
            prop_assert_eq!(pair, RiskScore::clamped(scores[idx].0, scores[idx].1));
            prop_assert_eq!(score_answer(&cfg, &stray), RiskScore::MINIMUM);
        }

        /// Property: output is sorted, ties ordered by id, ranks dense from 1.
        #[test]
        fn compute_risks_ordering(answers in prop::collection::vec(0usize..3, 0..20)) {
            let choices = ["Yes", "Partly", "No"];
            let rows: Vec<_> = answers
                .iter()
                .enumerate()
                .map(|(i, a)| radio_row(&format!("q{i:02}"), choices[*a]))
                .collect();

            let risks = compute_risks(&rows).unwrap();
            prop_assert_eq!(risks.len(), rows.len());
            for (idx, r) in risks.iter().enumerate() {
                prop_assert_eq!(r.rank as usize, idx + 1);
            }
            for pair in risks.windows(2) {
                prop_assert!(
                    pair[0].score > pair[1].score
                        || (pair[0].score == pair[1].score && pair[0].question_id < pair[1].question_id)
                );
            }
        }
    }
}
