//! Revenue attribution: apportions closed-deal value across the ordered
//! touchpoints that preceded the deal, tagging whether the journey was
//! mostly autonomous or human-assisted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Channel;

/// One recorded interaction with the contact before the deal closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Touchpoint {
    pub channel: Channel,
    pub occurred_at: DateTime<Utc>,
    /// Executed by the scheduler (true) or a human-approved action (false).
    pub autonomous: bool,
    pub approval_item_id: Option<i64>,
}

/// A touchpoint with its computed share of the deal, in cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedTouchpoint {
    #[serde(flatten)]
    pub touchpoint: Touchpoint,
    pub share_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueAttribution {
    pub deal_id: String,
    pub deal_value_cents: i64,
    pub contact_id: String,
    pub workspace_id: String,
    pub touchpoints: Vec<AttributedTouchpoint>,
    pub autonomous_majority: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttributionError {
    #[error("no touchpoints recorded for contact {0}")]
    NoTouchpoints(String),
    #[error("deal value {0} is negative")]
    NegativeDealValue(i64),
}

/// Extension point for share computation. Implementations return relative
/// weights; the engine normalizes to cents and pins the rounding remainder
/// on the most recent touchpoint so shares always sum to the deal value.
pub trait Weighting {
    fn weights(&self, touchpoints: &[Touchpoint]) -> Vec<f64>;
}

/// Default weighting: every touchpoint counts the same.
pub struct EqualWeight;

impl Weighting for EqualWeight {
    fn weights(&self, touchpoints: &[Touchpoint]) -> Vec<f64> {
        vec![1.0; touchpoints.len()]
    }
}

/// Split `deal_value_cents` across the touchpoints. The last (most recent)
/// touchpoint absorbs the rounding remainder, so the shares sum exactly.
pub fn apportion(
    deal_value_cents: i64,
    touchpoints: &[Touchpoint],
    weighting: &dyn Weighting,
) -> Result<Vec<i64>, AttributionError> {
    if touchpoints.is_empty() {
        return Err(AttributionError::NoTouchpoints(String::new()));
    }
    if deal_value_cents < 0 {
        return Err(AttributionError::NegativeDealValue(deal_value_cents));
    }

    let weights = weighting.weights(touchpoints);
    let weight_sum: f64 = weights.iter().copied().filter(|w| *w > 0.0).sum();

    let mut shares: Vec<i64> = if weight_sum <= 0.0 {
        // Degenerate weighting: fall back to equal split.
        let n = touchpoints.len() as i64;
        touchpoints.iter().map(|_| deal_value_cents / n).collect()
    } else {
        weights
            .iter()
            .map(|w| {
                let w = w.max(0.0);
                ((deal_value_cents as f64) * (w / weight_sum)).floor() as i64
            })
            .collect()
    };

    let allocated: i64 = shares.iter().sum();
    let remainder = deal_value_cents - allocated;
    if let Some(last) = shares.last_mut() {
        *last += remainder;
    }

    debug_assert_eq!(shares.iter().sum::<i64>(), deal_value_cents);
    Ok(shares)
}

/// Build the attribution record for a deal from its touchpoint history.
pub fn attribute(
    deal_id: &str,
    deal_value_cents: i64,
    contact_id: &str,
    workspace_id: &str,
    touchpoints: Vec<Touchpoint>,
    weighting: &dyn Weighting,
) -> Result<RevenueAttribution, AttributionError> {
    if touchpoints.is_empty() {
        return Err(AttributionError::NoTouchpoints(contact_id.to_string()));
    }

    let shares = apportion(deal_value_cents, &touchpoints, weighting)?;
    let autonomous = touchpoints.iter().filter(|t| t.autonomous).count();
    let autonomous_majority = autonomous * 2 > touchpoints.len();

    let attributed = touchpoints
        .into_iter()
        .zip(shares)
        .map(|(touchpoint, share_cents)| AttributedTouchpoint {
            touchpoint,
            share_cents,
        })
        .collect();

    Ok(RevenueAttribution {
        deal_id: deal_id.to_string(),
        deal_value_cents,
        contact_id: contact_id.to_string(),
        workspace_id: workspace_id.to_string(),
        touchpoints: attributed,
        autonomous_majority,
        created_at: Utc::now(),
    })
}

/// Bucket label for touchpoint-count reporting.
pub fn touchpoint_bucket(count: usize) -> &'static str {
    match count {
        0 | 1 => "1",
        2..=3 => "2-3",
        4..=6 => "4-6",
        _ => "7+",
    }
}

/// Credited revenue and touch counts for one channel.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChannelRevenue {
    pub touches: i64,
    pub share_cents: i64,
    /// The portion of `share_cents` earned by scheduler-executed touches.
    pub autonomous_share_cents: i64,
}

/// Workspace-level attribution rollup for reporting.
#[derive(Debug, Default, Serialize)]
pub struct RevenueSummary {
    pub deals: i64,
    pub total_value_cents: i64,
    pub autonomous_majority_deals: i64,
    /// Revenue credited to touchpoints the scheduler executed.
    pub autonomous_value_cents: i64,
    pub by_channel: BTreeMap<&'static str, ChannelRevenue>,
    /// Deal counts by journey length: "1", "2-3", "4-6", "7+".
    pub by_touchpoint_bucket: BTreeMap<&'static str, i64>,
}

impl RevenueSummary {
    /// Per-channel fraction of credited revenue that was earned
    /// autonomously, for the learning loop's secondary signal. Channels
    /// with no credited revenue are skipped.
    pub fn channel_autonomous_shares(&self) -> Vec<(Channel, f64)> {
        self.by_channel
            .iter()
            .filter(|(_, revenue)| revenue.share_cents > 0)
            .filter_map(|(name, revenue)| {
                let channel = Channel::parse(name).ok()?;
                let share = revenue.autonomous_share_cents as f64 / revenue.share_cents as f64;
                Some((channel, share))
            })
            .collect()
    }
}

/// Fold stored attributions into the workspace rollup.
pub fn summarize(attributions: &[RevenueAttribution]) -> RevenueSummary {
    let mut summary = RevenueSummary::default();
    for attribution in attributions {
        summary.deals += 1;
        summary.total_value_cents += attribution.deal_value_cents;
        if attribution.autonomous_majority {
            summary.autonomous_majority_deals += 1;
        }
        *summary
            .by_touchpoint_bucket
            .entry(touchpoint_bucket(attribution.touchpoints.len()))
            .or_default() += 1;

        for attributed in &attribution.touchpoints {
            if attributed.touchpoint.autonomous {
                summary.autonomous_value_cents += attributed.share_cents;
            }
            let channel = summary
                .by_channel
                .entry(attributed.touchpoint.channel.as_str())
                .or_default();
            channel.touches += 1;
            channel.share_cents += attributed.share_cents;
            if attributed.touchpoint.autonomous {
                channel.autonomous_share_cents += attributed.share_cents;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn touchpoints(n: usize) -> Vec<Touchpoint> {
        let start = Utc::now() - Duration::days(n as i64);
        (0..n)
            .map(|i| Touchpoint {
                channel: if i % 2 == 0 {
                    Channel::Email
                } else {
                    Channel::Linkedin
                },
                occurred_at: start + Duration::days(i as i64),
                autonomous: i % 2 == 0,
                approval_item_id: None,
            })
            .collect()
    }

    #[test]
    fn four_equal_touchpoints_split_ten_thousand_dollars_exactly() {
        let shares = apportion(1_000_000, &touchpoints(4), &EqualWeight).unwrap();
        assert_eq!(shares, vec![250_000, 250_000, 250_000, 250_000]);
        assert_eq!(shares.iter().sum::<i64>(), 1_000_000);
    }

    #[test]
    fn remainder_lands_on_the_most_recent_touchpoint() {
        // 100.00 over 3 touchpoints: 33.33 + 33.33 + 33.34.
        let shares = apportion(10_000, &touchpoints(3), &EqualWeight).unwrap();
        assert_eq!(shares, vec![3_333, 3_333, 3_334]);
        assert_eq!(shares.iter().sum::<i64>(), 10_000);
    }

    #[test]
    fn shares_always_sum_to_the_deal_value() {
        for value in [0i64, 1, 99, 10_000, 999_999, 1_234_567] {
            for n in 1..=9 {
                let shares = apportion(value, &touchpoints(n), &EqualWeight).unwrap();
                assert_eq!(shares.iter().sum::<i64>(), value, "value={value} n={n}");
            }
        }
    }

    #[test]
    fn custom_weighting_still_sums_exactly() {
        struct RecencyWeight;
        impl Weighting for RecencyWeight {
            fn weights(&self, touchpoints: &[Touchpoint]) -> Vec<f64> {
                (1..=touchpoints.len()).map(|i| i as f64).collect()
            }
        }

        let shares = apportion(10_000, &touchpoints(4), &RecencyWeight).unwrap();
        assert_eq!(shares.iter().sum::<i64>(), 10_000);
        // Later touchpoints weigh more.
        assert!(shares[3] > shares[0]);
    }

    #[test]
    fn empty_history_is_an_error() {
        let err = apportion(10_000, &[], &EqualWeight).unwrap_err();
        assert!(matches!(err, AttributionError::NoTouchpoints(_)));
    }

    #[test]
    fn autonomy_majority_is_tagged() {
        let mut points = touchpoints(4);
        points.iter_mut().for_each(|t| t.autonomous = true);
        points[0].autonomous = false;

        let attribution =
            attribute("deal-1", 10_000, "contact-1", "ws-1", points, &EqualWeight).unwrap();

        assert!(attribution.autonomous_majority);
        assert_eq!(attribution.touchpoints.len(), 4);
    }

    #[test]
    fn even_split_is_not_a_majority() {
        let attribution = attribute(
            "deal-2",
            10_000,
            "contact-1",
            "ws-1",
            touchpoints(4),
            &EqualWeight,
        )
        .unwrap();
        // 2 of 4 autonomous: not a majority.
        assert!(!attribution.autonomous_majority);
    }

    #[test]
    fn buckets_cover_the_expected_ranges() {
        assert_eq!(touchpoint_bucket(1), "1");
        assert_eq!(touchpoint_bucket(3), "2-3");
        assert_eq!(touchpoint_bucket(6), "4-6");
        assert_eq!(touchpoint_bucket(11), "7+");
    }

    #[test]
    fn summary_rolls_up_by_channel_and_journey_length() {
        // deal-1: 3 touches (email, linkedin, email), 100.00; shares
        // 33.33 / 33.33 / 33.34, emails autonomous.
        let first =
            attribute("deal-1", 10_000, "contact-1", "ws-1", touchpoints(3), &EqualWeight).unwrap();
        // deal-2: a single autonomous email touch takes the whole 50.00.
        let second =
            attribute("deal-2", 5_000, "contact-2", "ws-1", touchpoints(1), &EqualWeight).unwrap();

        let summary = summarize(&[first, second]);

        assert_eq!(summary.deals, 2);
        assert_eq!(summary.total_value_cents, 15_000);
        assert_eq!(summary.autonomous_majority_deals, 2);
        assert_eq!(summary.autonomous_value_cents, 3_333 + 3_334 + 5_000);

        let email = &summary.by_channel["email"];
        assert_eq!(email.touches, 3);
        assert_eq!(email.share_cents, 3_333 + 3_334 + 5_000);
        assert_eq!(email.autonomous_share_cents, email.share_cents);
        let linkedin = &summary.by_channel["linkedin"];
        assert_eq!(linkedin.touches, 1);
        assert_eq!(linkedin.share_cents, 3_333);
        assert_eq!(linkedin.autonomous_share_cents, 0);

        assert_eq!(summary.by_touchpoint_bucket["2-3"], 1);
        assert_eq!(summary.by_touchpoint_bucket["1"], 1);

        let shares = summary.channel_autonomous_shares();
        assert!(shares.contains(&(Channel::Email, 1.0)));
        assert!(shares.contains(&(Channel::Linkedin, 0.0)));
    }
}
