use roda_core::Credit;

/// Breakpoints for the average-delay term, days.
pub const AVG_DELAY_LIMITS: [f64; 7] = [0.0, 7.0, 15.0, 26.0, 31.0, 60.0, 90.0];
/// Scores for the average-delay ranges.
pub const AVG_DELAY_SCORES: [f64; 6] = [1000.0, 800.0, 600.0, 400.0, 100.0, 0.0];
/// Breakpoints for the cumulative-delay term, days.
pub const CUM_DELAY_LIMITS: [f64; 6] = [0.0, 20.0, 40.0, 69.0, 180.0, 250.0];
/// Scores for the cumulative-delay ranges.
pub const CUM_DELAY_SCORES: [f64; 5] = [1000.0, 700.0, 400.0, 200.0, 0.0];

/// Bonus for a credit whose payment agreements were all honored.
pub const FULL_AGREEMENT_BONUS: f64 = 50.0;

/// Demographic baseline; a placeholder until a real demographic model
/// exists, weighted at zero.
pub const INITIAL_SCORE: f64 = 500.0;
/// Weight of the demographic baseline.
pub const W1: f64 = 0.0;
/// Weight of the credit-count quartile term.
pub const W2: f64 = 0.1;
/// Weight of the average-amount quartile term.
pub const W3: f64 = 0.1;
/// Weight of the weighted per-credit history.
pub const W4: f64 = 0.8;

/// Map a value through user-defined ranges: the score of the first limit
/// the value falls under, the last score otherwise. A missing value never
/// falls under any limit, so it lands on the last score as well.
pub fn piecewise_score(value: Option<f64>, limits: &[f64], scores: &[f64]) -> f64 {
    debug_assert_eq!(limits.len(), scores.len() + 1);
    if let Some(value) = value {
        for i in 1..limits.len() {
            if value < limits[i] {
                return scores[i - 1];
            }
        }
    }
    *scores.last().expect("scores are never empty")
}

/// Score one credit: the mean of its delay terms, plus the bonus when every
/// agreement was honored and the score is not already zero.
pub fn credit_score(credit: &Credit) -> f64 {
    let avg = piecewise_score(credit.avg_delay_days, &AVG_DELAY_LIMITS, &AVG_DELAY_SCORES);
    let cum = piecewise_score(
        credit.cumulative_delay_days,
        &CUM_DELAY_LIMITS,
        &CUM_DELAY_SCORES,
    );
    let score = (avg + cum) / 2.0;

    let full_compliance = match (credit.fulfilled_agreements, credit.total_agreements) {
        (Some(f), Some(t)) if t > 0 => f == t,
        _ => false,
    };
    if full_compliance && score != 0.0 {
        score + FULL_AGREEMENT_BONUS
    } else {
        score
    }
}

/// Triangular weighted mean: weights `1, 2, ..., n` normalized to sum 1,
/// applied in order, so the most recent scores dominate.
pub fn triangular_weighted_mean(scores: &[f64]) -> f64 {
    match scores.len() {
        0 => 0.0,
        1 => scores[0],
        n => {
            let weight_sum = (n * (n + 1)) as f64 / 2.0;
            scores
                .iter()
                .enumerate()
                .map(|(i, score)| (i + 1) as f64 / weight_sum * score)
                .sum()
        }
    }
}

/// Quartile thresholds of a population, with linear interpolation between
/// order statistics.
#[derive(Debug, Clone, Copy)]
pub struct Quartiles {
    q1: f64,
    q2: f64,
    q3: f64,
}

impl Quartiles {
    /// Compute the quartiles of the present values.
    pub fn of(values: impl IntoIterator<Item = Option<f64>>) -> Option<Self> {
        let mut values: Vec<f64> = values.into_iter().flatten().collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.partial_cmp(b).expect("scoring inputs are finite"));
        Some(Self {
            q1: quantile(&values, 0.25),
            q2: quantile(&values, 0.50),
            q3: quantile(&values, 0.75),
        })
    }

    /// The quartile score of one value. A missing value sits above every
    /// threshold.
    pub fn score(&self, value: Option<f64>) -> f64 {
        match value {
            Some(v) if v <= self.q1 => 250.0,
            Some(v) if v <= self.q2 => 500.0,
            Some(v) if v <= self.q3 => 750.0,
            _ => 1000.0,
        }
    }
}

/// Linear-interpolated quantile over sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let low = position.floor() as usize;
    let high = position.ceil() as usize;
    if low == high {
        sorted[low]
    } else {
        let fraction = position - low as f64;
        sorted[low] * (1.0 - fraction) + sorted[high] * fraction
    }
}

/// The composite raw score: weighted sum of the demographic baseline, both
/// quartile terms and the per-credit history. A client holding any lost
/// credit scores zero regardless.
pub fn composite_score(
    has_lost_credit: bool,
    count_quartile: f64,
    amount_quartile: f64,
    weighted_history: f64,
) -> f64 {
    if has_lost_credit {
        return 0.0;
    }
    INITIAL_SCORE * W1 + count_quartile * W2 + amount_quartile * W3 + weighted_history * W4
}

#[cfg(test)]
mod test {
    use chrono::NaiveDate;
    use roda_core::CreditStatus;

    use super::*;

    fn credit(avg: f64, cum: f64) -> Credit {
        Credit {
            credit_id: 1,
            client_id: 1,
            status: CreditStatus::Paid,
            principal: None,
            total_repayment: None,
            issuance_date: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
            term_days: None,
            avg_delay_days: Some(avg),
            cumulative_delay_days: Some(cum),
            current_delay_days: None,
            fulfilled_agreements: None,
            total_agreements: None,
            lost_flag: false,
            published_flag: false,
        }
    }

    #[test]
    fn piecewise_scores_follow_the_breakpoints() {
        let cases = [
            (0.0, 1000.0),
            (5.0, 1000.0),
            (7.0, 800.0),
            (14.9, 800.0),
            (20.0, 600.0),
            (28.0, 400.0),
            (45.0, 100.0),
            (75.0, 0.0),
            (90.0, 0.0),
            (500.0, 0.0),
        ];
        for (value, expected) in cases {
            assert_eq!(
                piecewise_score(Some(value), &AVG_DELAY_LIMITS, &AVG_DELAY_SCORES),
                expected,
                "avg delay {value}"
            );
        }
        // A blank cell falls through every range.
        assert_eq!(
            piecewise_score(None, &AVG_DELAY_LIMITS, &AVG_DELAY_SCORES),
            0.0
        );
    }

    #[test]
    fn credit_scores_average_both_delay_terms() {
        assert_eq!(credit_score(&credit(5.0, 10.0)), 1000.0);
        assert_eq!(credit_score(&credit(20.0, 50.0)), 500.0);
        assert_eq!(credit_score(&credit(100.0, 300.0)), 0.0);
    }

    #[test]
    fn full_compliance_earns_the_bonus_unless_score_is_zero() {
        let mut c = credit(5.0, 10.0);
        c.fulfilled_agreements = Some(3);
        c.total_agreements = Some(3);
        assert_eq!(credit_score(&c), 1050.0);

        c.fulfilled_agreements = Some(2);
        assert_eq!(credit_score(&c), 1000.0);

        let mut zero = credit(100.0, 300.0);
        zero.fulfilled_agreements = Some(3);
        zero.total_agreements = Some(3);
        assert_eq!(credit_score(&zero), 0.0);
    }

    #[test]
    fn triangular_mean_weights_recent_credits_heavier() {
        // Two credits: weights 1/3 and 2/3.
        let mean = triangular_weighted_mean(&[1000.0, 400.0]);
        assert!((mean - 600.0).abs() < 1e-9);

        assert_eq!(triangular_weighted_mean(&[]), 0.0);
        assert_eq!(triangular_weighted_mean(&[750.0]), 750.0);

        // Order matters.
        let reversed = triangular_weighted_mean(&[400.0, 1000.0]);
        assert!((reversed - 800.0).abs() < 1e-9);
    }

    #[test]
    fn quartile_scores_partition_the_population() {
        let q = Quartiles::of((1..=8).map(|v| Some(v as f64))).unwrap();
        assert_eq!(q.score(Some(1.0)), 250.0);
        assert_eq!(q.score(Some(4.0)), 500.0);
        assert_eq!(q.score(Some(6.0)), 750.0);
        assert_eq!(q.score(Some(8.0)), 1000.0);
        assert_eq!(q.score(None), 1000.0);

        assert!(Quartiles::of(std::iter::empty()).is_none());
    }

    #[test]
    fn composite_weights_match_the_model() {
        // 0·500 + 0.1·500 + 0.1·750 + 0.8·600
        let score = composite_score(false, 500.0, 750.0, 600.0);
        assert!((score - 605.0).abs() < 1e-9);
        assert_eq!(composite_score(true, 500.0, 750.0, 600.0), 0.0);
    }
}
