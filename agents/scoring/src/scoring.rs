use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use tracing::info;

use roda_base::{layout, store, Agent, AgentOutcome, CoreMetrics};
use roda_core::utils::{validate_date, yesterday_utc};

use crate::engine::{composite_score, credit_score, triangular_weighted_mean, Quartiles};
use crate::ingest::{self, ScoringInputs};
use crate::settings::ScoringSettings;
use crate::social::{apply_social_adjustments, ClientNode};
use crate::ScoreRow;

/// The ScoringEngine stage: one invocation scores every client and lands
/// the day's scores CSV.
pub struct ScoringEngine {
    settings: ScoringSettings,
    metrics: Arc<CoreMetrics>,
    date: chrono::NaiveDate,
}

#[async_trait]
impl Agent for ScoringEngine {
    const AGENT_NAME: &'static str = "scoring";

    type Settings = ScoringSettings;

    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self> {
        let date = match &settings.date {
            Some(d) => validate_date(d).wrap_err("invalid date setting")?,
            None => yesterday_utc(),
        };
        Ok(Self {
            settings,
            metrics,
            date,
        })
    }

    async fn run(self) -> Result<AgentOutcome> {
        let store = self.settings.object_store()?;
        let airtable = self.settings.airtable(&store).await?;

        let inputs = ingest::fetch_scoring_inputs(&airtable).await?;
        let rows = score_clients(&inputs);
        info!(scored = rows.len(), "Computed client scores");
        self.metrics
            .rows("scoring", "scored")
            .inc_by(rows.len() as u64);

        let key = layout::scores_key(self.date);
        store::write_csv(&store, &key, &rows).await?;
        info!(key, "Wrote daily scores");
        Ok(AgentOutcome::Complete)
    }
}

/// Score every client that holds at least one surviving credit: composite
/// raw scores first, then the social pass over the whole population, since
/// referral adjustments are computed from raw scores only.
pub fn score_clients(inputs: &ScoringInputs) -> Vec<ScoreRow> {
    let amount_quartiles =
        Quartiles::of(inputs.contacts.iter().map(|c| c.avg_credit_amount));
    let count_quartiles = Quartiles::of(
        inputs
            .contacts
            .iter()
            .map(|c| c.real_credit_count.map(f64::from)),
    );

    let mut nodes = Vec::new();
    for contact in &inputs.contacts {
        let Some(credits) = inputs.credits_by_client.get(&contact.client_id) else {
            continue;
        };
        if credits.is_empty() {
            continue;
        }

        let history: Vec<f64> = credits.iter().map(credit_score).collect();
        let weighted = triangular_weighted_mean(&history);
        let has_lost_credit = credits.iter().any(|c| c.lost_flag);

        let amount_term = amount_quartiles
            .map(|q| q.score(contact.avg_credit_amount))
            .unwrap_or_default();
        let count_term = count_quartiles
            .map(|q| q.score(contact.real_credit_count.map(f64::from)))
            .unwrap_or_default();
        let raw_score = composite_score(has_lost_credit, count_term, amount_term, weighted);

        let latest_delay_days = credits
            .iter()
            .rev()
            .find(|c| c.status.is_in_process())
            .and_then(|c| c.current_delay_days)
            .unwrap_or_default();

        nodes.push(ClientNode {
            client_id: contact.client_id,
            referrer_id: contact.referrer_id,
            raw_score,
            has_lost_credit,
            in_process: credits.iter().any(|c| c.status.is_in_process()),
            latest_delay_days,
        });
    }

    let outcomes = apply_social_adjustments(&nodes);
    nodes
        .iter()
        .map(|node| {
            let outcome = &outcomes[&node.client_id];
            ScoreRow {
                client_id: node.client_id,
                raw_score: node.raw_score,
                adjustment: outcome.adjustment,
                adjusted_score: outcome.adjusted_score,
                referred_lost: outcome.referred_lost,
                referrer_lost: outcome.referrer_lost,
                affected_by_network: outcome.affected_by_network,
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use chrono::NaiveDate;
    use roda_core::{ClientStatus, Contact, Credit, CreditStatus};

    use super::*;

    fn contact(client_id: u64, referrer: Option<u64>) -> Contact {
        Contact {
            client_id,
            status: ClientStatus::Active,
            gps_ids: Vec::new(),
            celo_address: None,
            referrer_id: referrer,
            avg_credit_amount: Some(100_000.0),
            real_credit_count: Some(2),
        }
    }

    fn credit(client_id: u64, month: u32, avg: f64, cum: f64) -> Credit {
        Credit {
            credit_id: client_id * 100 + month as u64,
            client_id,
            status: CreditStatus::Pending,
            principal: None,
            total_repayment: None,
            issuance_date: NaiveDate::from_ymd_opt(2023, month, 1).unwrap(),
            term_days: None,
            avg_delay_days: Some(avg),
            cumulative_delay_days: Some(cum),
            current_delay_days: Some(0.0),
            fulfilled_agreements: None,
            total_agreements: None,
            lost_flag: false,
            published_flag: false,
        }
    }

    fn inputs(contacts: Vec<Contact>, credits: Vec<Credit>) -> ScoringInputs {
        let mut credits_by_client: HashMap<u64, Vec<Credit>> = HashMap::new();
        for c in credits {
            credits_by_client.entry(c.client_id).or_default().push(c);
        }
        for list in credits_by_client.values_mut() {
            list.sort_by_key(|c| c.issuance_date);
        }
        ScoringInputs {
            contacts,
            credits_by_client,
        }
    }

    #[test]
    fn history_dominates_the_composite() {
        // One client, two credits: 1000 then 500; weighted 2/3 toward the
        // recent one. Single-member population puts both quartile terms at
        // 250.
        let inputs = inputs(
            vec![contact(1, None)],
            vec![credit(1, 1, 5.0, 10.0), credit(1, 6, 20.0, 50.0)],
        );
        let rows = score_clients(&inputs);
        assert_eq!(rows.len(), 1);

        let weighted = 1000.0 / 3.0 + 2.0 * 500.0 / 3.0;
        let expected = 0.1 * 250.0 + 0.1 * 250.0 + 0.8 * weighted;
        assert!((rows[0].raw_score - expected).abs() < 1e-9);
        assert_eq!(rows[0].adjusted_score, rows[0].raw_score.clamp(0.0, 1000.0));
    }

    #[test]
    fn clients_without_surviving_credits_are_not_scored() {
        let inputs = inputs(
            vec![contact(1, None), contact(2, None)],
            vec![credit(1, 1, 0.0, 0.0)],
        );
        let rows = score_clients(&inputs);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].client_id, 1);
    }

    #[test]
    fn lost_credit_zeroes_the_raw_and_adjusted_score() {
        let mut lost = credit(1, 1, 0.0, 0.0);
        lost.lost_flag = true;
        let inputs = inputs(vec![contact(1, None)], vec![lost]);
        let rows = score_clients(&inputs);
        assert_eq!(rows[0].raw_score, 0.0);
        assert_eq!(rows[0].adjusted_score, 0.0);
    }

    #[test]
    fn scores_stay_in_range_across_the_population() {
        let mut contacts = Vec::new();
        let mut credits = Vec::new();
        for id in 1..=12u64 {
            contacts.push(contact(id, if id > 1 { Some(1) } else { None }));
            credits.push(credit(id, (id % 12) as u32 + 1, 0.0, 0.0));
        }
        let inputs = inputs(contacts, credits);
        for row in score_clients(&inputs) {
            assert!(row.adjusted_score >= 0.0 && row.adjusted_score <= 1000.0);
        }
    }
}
