//! Gold price tasks: feed sync and price alerting.
//!
//! Two scheduled jobs share this module. The sync job pulls the latest
//! quote from the JD finance endpoint and persists it; the remind job
//! re-reads the most recent sample window, derives alert candidates
//! (absolute thresholds plus trend moves), and pushes the ones the notify
//! gate lets through.

use sqlx::PgPool;

use crate::config::GoldConfig;
use crate::database::{self, GoldPriceRecord};
use crate::gate::{NotifyBudget, NotifyGate};
use crate::notify::{Notifier, TextCard};
use crate::trend;
use crate::types::{AlertKey, PriceAlertState, TrendDirection};

const GOLD_PAGE_URL: &str = "https://m.jdjygold.com/finance-gold/msjgold/homepage?orderSource=7";

#[derive(Debug, serde::Deserialize)]
struct LatestPriceResponse {
    #[serde(rename = "resultCode")]
    result_code: i64,
    #[serde(rename = "resultData")]
    result_data: Option<ResultData>,
}

#[derive(Debug, serde::Deserialize)]
struct ResultData {
    datas: Option<QuotePayload>,
}

/// Quote fields as served by the feed. The id arrives as a string in some
/// responses and a number in others.
#[derive(Debug, serde::Deserialize)]
struct QuotePayload {
    id: serde_json::Value,
    #[serde(rename = "productSku", default)]
    product_sku: String,
    #[serde(default)]
    demode: bool,
    #[serde(rename = "priceNum", default)]
    price_num: String,
    price: f64,
    #[serde(rename = "yesterdayPrice", default)]
    yesterday_price: f64,
    #[serde(default)]
    time: i64,
}

impl QuotePayload {
    fn quote_id(&self) -> Option<i64> {
        self.id
            .as_i64()
            .or_else(|| self.id.as_str().and_then(|s| s.parse().ok()))
    }
}

/// Pull the latest quote and persist it. Every failure is logged and
/// absorbed; the next tick retries from scratch.
pub async fn sync_gold_price(client: &reqwest::Client, pool: &PgPool, cfg: &GoldConfig) {
    let mut request = client.get(&cfg.api_url).query(&cfg.api_params);
    for (name, value) in &cfg.api_headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            log::warn!("gold quote fetch failed: {e:#}");
            return;
        }
    };
    if !response.status().is_success() {
        log::warn!("gold quote fetch returned {}", response.status());
        return;
    }
    let payload: LatestPriceResponse = match response.json().await {
        Ok(p) => p,
        Err(e) => {
            log::warn!("gold quote payload unreadable: {e:#}");
            return;
        }
    };
    if payload.result_code != 0 {
        log::warn!("gold quote api error, resultCode {}", payload.result_code);
        return;
    }
    let Some(quote) = payload.result_data.and_then(|d| d.datas) else {
        log::warn!("gold quote payload missing datas");
        return;
    };
    let Some(id) = quote.quote_id() else {
        log::warn!("gold quote id unreadable: {:?}", quote.id);
        return;
    };

    let record = GoldPriceRecord {
        id,
        product_sku: quote.product_sku,
        demode: quote.demode,
        price_num: quote.price_num,
        price: quote.price,
        yesterday_price: quote.yesterday_price,
        time: quote.time,
    };
    match database::insert_gold_price(pool, &record).await {
        Ok(true) => log::info!("current gold price is {}", record.price),
        Ok(false) => log::debug!("gold price {id} already saved"),
        Err(e) => log::error!("failed to save gold price {id}: {e:#}"),
    }
}

/// Evaluate the sample window and push whatever the gate lets through.
pub async fn gold_price_remind(
    pool: &PgPool,
    cfg: &GoldConfig,
    gate: &NotifyGate,
    notifier: &dyn Notifier,
) {
    let samples = match database::latest_prices(pool, cfg.sample_count).await {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to load price samples: {e:#}");
            return;
        }
    };
    if samples.is_empty() {
        log::info!("empty gold price data");
        return;
    }
    log::debug!(
        "analyzing {} samples, newest at {}",
        samples.len(),
        samples[0].timestamp_ms
    );

    let prices: Vec<f64> = samples.iter().map(|s| s.price).collect();
    let candidates = build_candidates(&prices, cfg);
    let budget = NotifyBudget {
        max_repeats: cfg.duplicate_notify_times,
        window_secs: cfg.duplicate_notify_time_limit,
    };
    for (state, card) in candidates {
        gate.deliver(&AlertKey::Tagged(state), &card, &budget, notifier)
            .await;
    }
    log::debug!("gold price remind pass done");
}

/// Build the candidate alerts for one window of prices, newest first.
///
/// Absolute-threshold candidates only look at the latest price and are
/// regenerated on every pass while the condition holds; suppressing
/// repeats is the gate's job, not ours. Trend candidates additionally
/// need a significant Mann-Kendall verdict over the chronological window,
/// which is skipped entirely for windows of two or fewer samples.
fn build_candidates(prices_desc: &[f64], cfg: &GoldConfig) -> Vec<(PriceAlertState, TextCard)> {
    let mut candidates = Vec::new();
    let latest = prices_desc[0];

    if latest >= cfg.rise_to_target_price {
        candidates.push((
            PriceAlertState::RiseToTargetPrice,
            TextCard {
                title: "Gold price alert".to_string(),
                description: format!(
                    "Current price: <div class=\"highlight\">{latest}</div>\
                     Reached target price: {}",
                    cfg.rise_to_target_price
                ),
                url: GOLD_PAGE_URL.to_string(),
            },
        ));
    }
    if latest <= cfg.fall_to_target_price {
        candidates.push((
            PriceAlertState::FallToTargetPrice,
            TextCard {
                title: "Gold price alert".to_string(),
                description: format!(
                    "Current price: <div class=\"gray\">{latest}</div>\
                     Reached target price: {}",
                    cfg.fall_to_target_price
                ),
                url: GOLD_PAGE_URL.to_string(),
            },
        ));
    }

    if prices_desc.len() > 2 {
        let chronological: Vec<f64> = prices_desc.iter().rev().copied().collect();
        let verdict = trend::detect(&chronological, trend::DEFAULT_ALPHA);

        if verdict.is_significant && verdict.direction == TrendDirection::Rising {
            if let Some((gained, percent)) = move_from_min(prices_desc, latest) {
                log::info!(
                    "gold trending up, current price {latest}, gained {} ({percent}%)",
                    round4(gained)
                );
                if gained >= cfg.target_rise_price {
                    candidates.push((
                        PriceAlertState::ReachTargetRisePrice,
                        TextCard {
                            title: "Gold price rising alert".to_string(),
                            description: format!(
                                "Current price: <div class=\"highlight\">{}</div>\
                                 Gained: <div class=\"highlight\">{}</div>\
                                 Gain percent: <div class=\"highlight\">{percent}%</div>\
                                 Reached configured target: {}",
                                round4(latest),
                                round4(gained),
                                cfg.target_rise_price
                            ),
                            url: GOLD_PAGE_URL.to_string(),
                        },
                    ));
                }
            }
        }
        if verdict.is_significant && verdict.direction == TrendDirection::Falling {
            if let Some((lost, percent)) = move_from_max(prices_desc, latest) {
                log::info!(
                    "gold trending down, current price {latest}, moved {} ({percent}%)",
                    round4(lost)
                );
                if lost.abs() >= cfg.target_fall_price {
                    candidates.push((
                        PriceAlertState::ReachTargetFallPrice,
                        TextCard {
                            title: "Gold price falling alert".to_string(),
                            description: format!(
                                "Current price: <div class=\"gray\">{}</div>\
                                 Lost: <div class=\"gray\">{}</div>\
                                 Loss percent: <div class=\"gray\">{percent}%</div>\
                                 Reached configured target: {}",
                                round4(latest),
                                round4(lost),
                                cfg.target_fall_price
                            ),
                            url: GOLD_PAGE_URL.to_string(),
                        },
                    ));
                }
            }
        }
    }

    candidates
}

/// Move off the window minimum: `(latest - min, display percent)`.
/// A zero minimum would divide by zero; skip the candidate instead.
fn move_from_min(prices: &[f64], latest: f64) -> Option<(f64, f64)> {
    let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
    if min == 0.0 {
        log::warn!("window minimum is zero, skipping rise magnitude");
        return None;
    }
    let diff = latest - min;
    Some((diff, round4(100.0 * diff / min)))
}

/// Move off the window maximum; negative for a fall.
fn move_from_max(prices: &[f64], latest: f64) -> Option<(f64, f64)> {
    let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == 0.0 {
        log::warn!("window maximum is zero, skipping fall magnitude");
        return None;
    }
    let diff = latest - max;
    Some((diff, round4(100.0 * diff / max)))
}

/// Percentages are displayed rounded to 4 decimals; threshold comparisons
/// always use the unrounded magnitude.
fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> GoldConfig {
        GoldConfig {
            api_url: String::new(),
            api_headers: Default::default(),
            api_params: Default::default(),
            sample_count: 20,
            target_rise_price: 2.0,
            target_fall_price: 2.0,
            rise_to_target_price: 400.0,
            fall_to_target_price: 365.0,
            duplicate_notify_time_limit: 90,
            duplicate_notify_times: 3,
        }
    }

    fn states(candidates: &[(PriceAlertState, TextCard)]) -> Vec<PriceAlertState> {
        candidates.iter().map(|(s, _)| *s).collect()
    }

    #[test]
    fn rising_move_off_window_minimum() {
        // window [100, 105, 110, 120] oldest to newest, queried newest first
        let desc = [120.0, 110.0, 105.0, 100.0];
        let (gained, percent) = move_from_min(&desc, desc[0]).unwrap();
        assert_eq!(gained, 20.0);
        assert_eq!(percent, 20.0);
    }

    #[test]
    fn falling_move_off_window_maximum() {
        let desc = [100.0, 105.0, 110.0, 120.0];
        let (lost, percent) = move_from_max(&desc, desc[0]).unwrap();
        assert_eq!(lost, -20.0);
        assert_eq!(percent, -16.6667);
    }

    #[test]
    fn zero_extremum_is_guarded() {
        assert!(move_from_min(&[5.0, 0.0], 5.0).is_none());
        assert!(move_from_max(&[0.0, -1.0], -1.0).is_none());
    }

    #[test]
    fn two_samples_never_run_the_trend_test() {
        // a 2-sample window that would read as a huge rise if analyzed
        let candidates = build_candidates(&[401.0, 100.0], &cfg());
        assert_eq!(states(&candidates), vec![PriceAlertState::RiseToTargetPrice]);
    }

    #[test]
    fn threshold_candidate_regenerates_every_pass() {
        // suppression is the gate's job, not the orchestrator's
        let window = [401.0, 399.0, 398.5];
        for _ in 0..3 {
            let candidates = build_candidates(&window, &cfg());
            assert!(states(&candidates).contains(&PriceAlertState::RiseToTargetPrice));
        }
    }

    #[test]
    fn floor_candidate_fires_at_or_below_target() {
        let candidates = build_candidates(&[365.0, 366.0, 367.0], &cfg());
        assert_eq!(states(&candidates), vec![PriceAlertState::FallToTargetPrice]);
    }

    #[test]
    fn quiet_window_yields_nothing() {
        let candidates = build_candidates(&[380.0, 380.2, 379.9, 380.1], &cfg());
        assert!(candidates.is_empty());
    }

    #[test]
    fn significant_rise_past_target_adds_trend_candidate() {
        // steady climb of 0.5 per sample, 4.5 total, well past the 2.0 target
        let desc: Vec<f64> = (0..10).map(|i| 384.5 - 0.5 * i as f64).collect();
        let candidates = build_candidates(&desc, &cfg());
        assert_eq!(
            states(&candidates),
            vec![PriceAlertState::ReachTargetRisePrice]
        );
    }

    #[test]
    fn small_rise_stays_quiet_even_when_significant() {
        // same shape, 0.9 total move, below the 2.0 target
        let desc: Vec<f64> = (0..10).map(|i| 380.9 - 0.1 * i as f64).collect();
        let candidates = build_candidates(&desc, &cfg());
        assert!(candidates.is_empty());
    }

    #[test]
    fn significant_fall_past_target_adds_trend_candidate() {
        let desc: Vec<f64> = (0..10).map(|i| 376.0 + 0.5 * i as f64).collect();
        let candidates = build_candidates(&desc, &cfg());
        assert_eq!(
            states(&candidates),
            vec![PriceAlertState::ReachTargetFallPrice]
        );
    }

    #[test]
    fn threshold_and_trend_candidates_are_independent() {
        // price is through the ceiling while still climbing
        let desc: Vec<f64> = (0..10).map(|i| 405.0 - 0.5 * i as f64).collect();
        let candidates = build_candidates(&desc, &cfg());
        assert_eq!(
            states(&candidates),
            vec![
                PriceAlertState::RiseToTargetPrice,
                PriceAlertState::ReachTargetRisePrice,
            ]
        );
    }

    #[test]
    fn quote_id_accepts_both_encodings() {
        let s: QuotePayload =
            serde_json::from_str(r#"{"id": "123", "price": 380.0}"#).unwrap();
        assert_eq!(s.quote_id(), Some(123));
        let n: QuotePayload = serde_json::from_str(r#"{"id": 123, "price": 380.0}"#).unwrap();
        assert_eq!(n.quote_id(), Some(123));
    }
}
