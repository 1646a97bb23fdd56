//! # Admission Gate Pipeline
//!
//! Runs the safety checks in a fixed order for each candidate market,
//! short-circuiting on the first failure. Every failure records its reason on
//! the watchlist entry and transitions it to `rejected`; success transitions
//! it to `active` with the observed liquidity. The pipeline never starts
//! subscriptions itself; the ingress decides that based on the slot budget.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::aggregator::AggregatorSource;
use crate::config::Thresholds;
use crate::probes::SafetyProbes;
use crate::tax::TaxEstimator;
use crate::types::{now_ms, Candidate, MarketType};
use crate::watchlist::Watchlist;

/// Outcome of one admission run.
#[derive(Clone, Debug, PartialEq)]
pub enum GateDecision {
    Admitted { liquidity_usd: f64 },
    Rejected { reason: String },
}

pub struct GatePipeline {
    probes: Arc<SafetyProbes>,
    aggregator: Arc<dyn AggregatorSource>,
    watchlist: Arc<Watchlist>,
    taxes: Arc<TaxEstimator>,
    thresholds: Thresholds,
}

impl GatePipeline {
    pub fn new(
        probes: Arc<SafetyProbes>,
        aggregator: Arc<dyn AggregatorSource>,
        watchlist: Arc<Watchlist>,
        taxes: Arc<TaxEstimator>,
        thresholds: Thresholds,
    ) -> Self {
        Self { probes, aggregator, watchlist, taxes, thresholds }
    }

    /// Run the full check sequence and apply the lifecycle transition.
    /// Returns the decision so the caller can start a subscription.
    pub async fn admit(&self, candidate: &Candidate) -> GateDecision {
        let decision = self.evaluate(candidate).await;
        let key = candidate.key();
        match &decision {
            GateDecision::Admitted { liquidity_usd } => {
                self.watchlist.mark_active(&key, *liquidity_usd);
            }
            GateDecision::Rejected { reason } => {
                self.watchlist.mark_rejected(&key, reason);
            }
        }
        decision
    }

    async fn evaluate(&self, candidate: &Candidate) -> GateDecision {
        let chain = candidate.chain;
        let key = candidate.key();

        // One aggregator lookup shared by the liquidity fallback, the LP-risk
        // brackets and the V3 fee tier. Absence is normal for brand-new pools.
        let agg_pair = match self.aggregator.pair(chain, candidate.address).await {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "gate", market = %key, error = %e, "aggregator pair lookup failed");
                None
            }
        };
        let agg_liq = agg_pair.as_ref().and_then(|p| p.liquidity_usd());

        // 1. Bytecode presence for pool and both tokens.
        if let Err(reason) = self
            .probes
            .bytecode_present(chain, &[candidate.address, candidate.token0, candidate.token1])
            .await
        {
            return GateDecision::Rejected { reason };
        }

        // 2. Minimum liquidity.
        let liquidity_usd = match self
            .probes
            .usd_liquidity(candidate, agg_liq.or(candidate.reported_liquidity_usd))
            .await
        {
            Ok(liq) => liq,
            Err(reason) => return GateDecision::Rejected { reason },
        };
        if liquidity_usd < self.thresholds.min_liq_usd {
            return GateDecision::Rejected {
                reason: format!(
                    "liquidity fail: {:.2} < {:.2}",
                    liquidity_usd, self.thresholds.min_liq_usd
                ),
            };
        }

        // 3. Sellability. A V3 candidate without a fee tier borrows the
        // aggregator's reported one before probing.
        let mut probe_candidate = candidate.clone();
        if candidate.market_type == MarketType::V3 && probe_candidate.fee.is_none() {
            probe_candidate.fee = agg_pair.as_ref().and_then(|p| p.fee());
        }
        if let Err(reason) = self.probes.sellability(&probe_candidate).await {
            return GateDecision::Rejected { reason };
        }

        // 4. LP-risk score against the aggregator-reported liquidity,
        // falling back to the on-chain observation.
        let score = self.probes.lp_risk_score(
            chain,
            candidate.token0,
            candidate.token1,
            agg_liq.or(Some(liquidity_usd)),
        );
        if score >= 2 {
            return GateDecision::Rejected { reason: format!("lp risk fail: score {}", score) };
        }

        // 5. Tax averages, only when samples already exist for this market.
        let taxes = self.taxes.avg(&key, now_ms());
        if !taxes.is_empty() {
            let max = self.thresholds.max_tax_pct;
            if let Some(buy) = taxes.buy {
                if buy > max {
                    return GateDecision::Rejected {
                        reason: format!("tax fail: avg buy {:.2} > {:.2}", buy, max),
                    };
                }
            }
            if let Some(sell) = taxes.sell {
                if sell > max {
                    return GateDecision::Rejected {
                        reason: format!("tax fail: avg sell {:.2} > {:.2}", sell, max),
                    };
                }
            }
        }

        debug!(target: "gate", market = %key, liquidity_usd, "all checks passed");
        GateDecision::Admitted { liquidity_usd }
    }
}
