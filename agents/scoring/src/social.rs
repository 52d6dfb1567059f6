use std::collections::{BTreeMap, HashMap};

use tracing::debug;

/// Increment per referred client with a high score, when the referrer's
/// delay fraction stays under the bonus threshold.
pub const REFERRAL_BONUS: f64 = 0.05;
/// Decrement per referred client currently delayed.
pub const REFERRAL_PENALTY: f64 = 0.1;
/// Delay fraction at or above which no bonus is granted.
pub const BONUS_THRESHOLD: f64 = 0.2;
/// Raw score a referred client must exceed to earn its referrer the bonus.
pub const HIGH_SCORE: f64 = 800.0;
/// Penalty applied to the siblings of a defaulted referral.
pub const NETWORK_PENALTY: f64 = 0.5;

/// One client as the social pass sees it: raw score plus the referral edge
/// and the credit facts the adjustments depend on. Graph state lives in the
/// pass, never in these nodes.
#[derive(Debug, Clone)]
pub struct ClientNode {
    /// Client id
    pub client_id: u64,
    /// Who referred this client, if anyone
    pub referrer_id: Option<u64>,
    /// Composite score before adjustment
    pub raw_score: f64,
    /// Whether any of the client's credits is lost
    pub has_lost_credit: bool,
    /// Whether the client currently holds an in-process credit
    pub in_process: bool,
    /// Days of delay on the latest in-process credit
    pub latest_delay_days: f64,
}

/// The social pass verdict for one client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SocialOutcome {
    /// Accumulated multiplicative adjustment
    pub adjustment: f64,
    /// A referral of this client defaulted
    pub referred_lost: bool,
    /// The client's referrer defaulted
    pub referrer_lost: bool,
    /// Penalized because a sibling referral defaulted
    pub affected_by_network: bool,
    /// Final score: `clip(raw · (1 + adjustment), 0, 1000)`, forced to 0
    /// under any lost condition
    pub adjusted_score: f64,
}

/// Apply the referral-graph effects in a single pass over raw scores.
///
/// Adjustments are computed from raw scores only and never from each other,
/// so the result does not depend on sibling adjustments cascading. Only
/// referrals currently holding an in-process credit participate, in both
/// the bonus and the penalty terms.
pub fn apply_social_adjustments(clients: &[ClientNode]) -> BTreeMap<u64, SocialOutcome> {
    let by_id: HashMap<u64, &ClientNode> = clients.iter().map(|c| (c.client_id, c)).collect();

    // referrer -> referred clients with an in-process credit
    let mut referred: BTreeMap<u64, Vec<&ClientNode>> = BTreeMap::new();
    for client in clients {
        if let Some(referrer) = client.referrer_id {
            if client.in_process && by_id.contains_key(&referrer) {
                referred.entry(referrer).or_default().push(client);
            }
        }
    }

    let mut outcomes: BTreeMap<u64, SocialOutcome> = clients
        .iter()
        .map(|c| {
            let outcome = SocialOutcome {
                referrer_lost: c
                    .referrer_id
                    .and_then(|r| by_id.get(&r))
                    .is_some_and(|r| r.has_lost_credit),
                ..Default::default()
            };
            (c.client_id, outcome)
        })
        .collect();

    for client in clients {
        let Some(circle) = referred.get(&client.client_id) else {
            continue;
        };

        let delayed = circle.iter().filter(|r| r.latest_delay_days > 0.0).count();
        let delay_fraction = delayed as f64 / circle.len() as f64;

        let mut adjustment = 0.0;
        for referral in circle {
            if delay_fraction < BONUS_THRESHOLD && referral.raw_score > HIGH_SCORE {
                adjustment += REFERRAL_BONUS;
            }
            if referral.latest_delay_days > 0.0 {
                adjustment -= REFERRAL_PENALTY;
            }
        }
        let entry = outcomes
            .get_mut(&client.client_id)
            .expect("every client has an outcome");
        entry.adjustment += adjustment;

        if circle.iter().any(|r| r.has_lost_credit) {
            debug!(client_id = client.client_id, "Client has a defaulted referral");
            entry.adjustment = 0.0;
            entry.referred_lost = true;
            for sibling in circle.iter().filter(|r| !r.has_lost_credit) {
                let sibling_entry = outcomes
                    .get_mut(&sibling.client_id)
                    .expect("every client has an outcome");
                sibling_entry.adjustment -= NETWORK_PENALTY;
                sibling_entry.affected_by_network = true;
            }
        }
    }

    for client in clients {
        let entry = outcomes
            .get_mut(&client.client_id)
            .expect("every client has an outcome");
        entry.adjusted_score = if client.has_lost_credit || entry.referred_lost || entry.referrer_lost
        {
            0.0
        } else {
            (client.raw_score * (1.0 + entry.adjustment)).clamp(0.0, 1000.0)
        };
    }

    outcomes
}

#[cfg(test)]
mod test {
    use super::*;

    fn node(client_id: u64, referrer: Option<u64>, raw: f64) -> ClientNode {
        ClientNode {
            client_id,
            referrer_id: referrer,
            raw_score: raw,
            has_lost_credit: false,
            in_process: true,
            latest_delay_days: 0.0,
        }
    }

    #[test]
    fn one_delayed_referral_in_five_blocks_the_bonus_at_the_threshold() {
        // delay fraction 1/5 = 0.2, not under the 0.2 threshold: no bonus;
        // the delayed referral still costs one penalty.
        let mut clients = vec![node(1, None, 700.0)];
        for id in 2..=6 {
            clients.push(node(id, Some(1), 900.0));
        }
        clients[1].latest_delay_days = 3.0;

        let outcomes = apply_social_adjustments(&clients);
        let c = &outcomes[&1];
        assert!((c.adjustment + REFERRAL_PENALTY).abs() < 1e-9);
        assert!((c.adjusted_score - 700.0 * (1.0 - REFERRAL_PENALTY)).abs() < 1e-9);
    }

    #[test]
    fn high_scoring_referrals_earn_bonuses_under_the_threshold() {
        let mut clients = vec![node(1, None, 700.0)];
        for id in 2..=7 {
            clients.push(node(id, Some(1), 900.0));
        }
        clients[1].latest_delay_days = 2.0; // fraction 1/6 < 0.2

        let outcomes = apply_social_adjustments(&clients);
        // Six referrals over 800 earn 6 bonuses; one delayed costs one
        // penalty.
        let expected = 6.0 * REFERRAL_BONUS - REFERRAL_PENALTY;
        assert!((outcomes[&1].adjustment - expected).abs() < 1e-9);
    }

    #[test]
    fn referrals_without_an_in_process_credit_are_ignored() {
        let mut clients = vec![node(1, None, 700.0), node(2, Some(1), 950.0)];
        clients[1].in_process = false;

        let outcomes = apply_social_adjustments(&clients);
        assert_eq!(outcomes[&1].adjustment, 0.0);
        assert_eq!(outcomes[&1].adjusted_score, 700.0);
    }

    #[test]
    fn a_lost_referral_zeroes_the_referrer_and_penalizes_the_siblings() {
        let mut clients = vec![
            node(1, None, 900.0),
            node(2, Some(1), 950.0),
            node(3, Some(1), 850.0),
        ];
        clients[1].has_lost_credit = true;

        let outcomes = apply_social_adjustments(&clients);
        assert!(outcomes[&1].referred_lost);
        assert_eq!(outcomes[&1].adjusted_score, 0.0);

        // The sibling is penalized but not zeroed.
        let sibling = &outcomes[&3];
        assert!(sibling.affected_by_network);
        assert!((sibling.adjustment + NETWORK_PENALTY).abs() < 1e-9);
        assert!((sibling.adjusted_score - 850.0 * (1.0 - NETWORK_PENALTY)).abs() < 1e-9);

        // The lost referral itself scores zero through its own flag.
        assert_eq!(outcomes[&2].adjusted_score, 0.0);
    }

    #[test]
    fn a_lost_referrer_zeroes_the_referred_client() {
        let mut clients = vec![node(1, None, 900.0), node(2, Some(1), 950.0)];
        clients[0].has_lost_credit = true;

        let outcomes = apply_social_adjustments(&clients);
        assert!(outcomes[&2].referrer_lost);
        assert_eq!(outcomes[&2].adjusted_score, 0.0);
    }

    #[test]
    fn adjusted_scores_stay_in_range() {
        let mut clients = vec![node(1, None, 990.0)];
        for id in 2..=10 {
            clients.push(node(id, Some(1), 990.0));
        }
        let outcomes = apply_social_adjustments(&clients);
        // Nine bonuses would push past 1000; the clip holds the ceiling.
        assert_eq!(outcomes[&1].adjusted_score, 1000.0);
    }
}
