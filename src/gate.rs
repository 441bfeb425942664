//! Notify gate: suppresses repeat notifications for the same condition.
//!
//! Each alert condition maps to one cache counter. The gate reads the
//! counter to decide whether the repeat budget is spent, and the caller
//! writes the incremented counter back only after a successful send. Every
//! write resets the entry TTL, so a condition that keeps firing inside the
//! window stays counted until it finally goes quiet for a full window
//! (burst-then-silence damping, not a fixed window).

use std::sync::Arc;

use crate::cache::CounterStore;
use crate::notify::{Notifier, TextCard};
use crate::types::AlertKey;

/// Repeat budget for one alert domain.
#[derive(Debug, Clone, Copy)]
pub struct NotifyBudget {
    /// How many times the same key may fire before being suppressed
    pub max_repeats: u32,
    /// Counter TTL in seconds, reset on every write
    pub window_secs: u64,
}

pub struct NotifyGate {
    store: Arc<dyn CounterStore>,
    /// `{project}-{env}` prefix keeping instances apart on a shared cache
    prefix: String,
}

impl NotifyGate {
    pub fn new(store: Arc<dyn CounterStore>, prefix: String) -> Self {
        Self { store, prefix }
    }

    fn cache_key(&self, key: &AlertKey) -> String {
        format!("{}-{}", self.prefix, key)
    }

    /// Whether to suppress this key, plus the current repeat count.
    ///
    /// No side effect; safe to call before deciding to alert. Cache errors
    /// are fail-open: the alert goes out rather than being silently dropped.
    pub async fn should_skip(&self, key: &AlertKey, budget: &NotifyBudget) -> (bool, u32) {
        let cache_key = self.cache_key(key);
        let count = match self.store.get(&cache_key).await {
            Ok(Some(raw)) => parse_counter(&raw, &cache_key),
            Ok(None) => 0,
            Err(e) => {
                log::warn!("counter read failed for {cache_key}, not suppressing: {e:#}");
                0
            }
        };
        (count >= budget.max_repeats, count)
    }

    /// Persist the new repeat count after a notification actually went out.
    ///
    /// The caller passes `current + 1`; the gate does not increment. The
    /// write resets the TTL to the full window.
    pub async fn record_fire(&self, key: &AlertKey, budget: &NotifyBudget, new_count: u32) {
        let cache_key = self.cache_key(key);
        let value = new_count.to_string();
        if let Err(e) = self
            .store
            .set_ex(&cache_key, value.as_bytes(), budget.window_secs)
            .await
        {
            log::warn!("counter write failed for {cache_key}: {e:#}");
        }
    }

    /// The gated dispatch sequence both alert domains share:
    /// skip check, push, then count the fire.
    ///
    /// The counter only moves after a send the notifier confirmed, so a
    /// refused or failed push does not consume repeat budget. Returns
    /// whether the notification went out.
    pub async fn deliver(
        &self,
        key: &AlertKey,
        card: &TextCard,
        budget: &NotifyBudget,
        notifier: &dyn Notifier,
    ) -> bool {
        let (skip, count) = self.should_skip(key, budget).await;
        if skip {
            log::info!("skip notify for {key}, already fired {count} times");
            return false;
        }
        match notifier.send(card).await {
            Ok(true) => {
                self.record_fire(key, budget, count + 1).await;
                true
            }
            Ok(false) => {
                log::warn!("notifier refused alert {key}");
                false
            }
            Err(e) => {
                log::warn!("failed to push alert {key}: {e:#}");
                false
            }
        }
    }
}

fn parse_counter(raw: &[u8], cache_key: &str) -> u32 {
    match std::str::from_utf8(raw).ok().and_then(|s| s.parse().ok()) {
        Some(n) => n,
        None => {
            log::warn!("unreadable counter under {cache_key}, treating as 0");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::types::PriceAlertState;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use tokio::time::Duration;

    fn gate() -> NotifyGate {
        NotifyGate::new(Arc::new(MemoryStore::new()), "alert-bot-test".to_string())
    }

    const BUDGET: NotifyBudget = NotifyBudget {
        max_repeats: 3,
        window_secs: 90,
    };

    #[tokio::test]
    async fn suppresses_after_budget_is_spent() {
        let gate = gate();
        let key = AlertKey::Tagged(PriceAlertState::RiseToTargetPrice);

        for fired in 0..BUDGET.max_repeats {
            let (skip, count) = gate.should_skip(&key, &BUDGET).await;
            assert!(!skip, "fire {} should pass", fired + 1);
            assert_eq!(count, fired);
            gate.record_fire(&key, &BUDGET, count + 1).await;
        }

        let (skip, count) = gate.should_skip(&key, &BUDGET).await;
        assert!(skip);
        assert_eq!(count, BUDGET.max_repeats);
    }

    #[tokio::test(start_paused = true)]
    async fn every_write_resets_the_window() {
        let gate = gate();
        let key = AlertKey::Tagged(PriceAlertState::FallToTargetPrice);

        gate.record_fire(&key, &BUDGET, 1).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        // second fire 60s in: counter still alive, TTL starts over
        let (_, count) = gate.should_skip(&key, &BUDGET).await;
        assert_eq!(count, 1);
        gate.record_fire(&key, &BUDGET, count + 1).await;

        // 120s after the first write, 60s after the second: still counted
        tokio::time::advance(Duration::from_secs(60)).await;
        let (_, count) = gate.should_skip(&key, &BUDGET).await;
        assert_eq!(count, 2);

        // a full quiet window finally forgets the key
        tokio::time::advance(Duration::from_secs(91)).await;
        let (skip, count) = gate.should_skip(&key, &BUDGET).await;
        assert!(!skip);
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn keys_do_not_share_counters() {
        let gate = gate();
        let tight = NotifyBudget {
            max_repeats: 1,
            window_secs: 90,
        };
        let rise = AlertKey::Tagged(PriceAlertState::RiseToTargetPrice);
        let slot = AlertKey::Composite("1024#0102#2026-08-10#08:00#12:00".to_string());

        gate.record_fire(&rise, &tight, 1).await;

        let (skip, count) = gate.should_skip(&slot, &tight).await;
        assert!(!skip);
        assert_eq!(count, 0);
        let (skip, _) = gate.should_skip(&rise, &tight).await;
        assert!(skip);
    }

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(anyhow!("connection refused"))
        }

        async fn set_ex(&self, _key: &str, _value: &[u8], _ttl_secs: u64) -> Result<()> {
            Err(anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn cache_failure_never_suppresses() {
        let gate = NotifyGate::new(Arc::new(BrokenStore), "alert-bot-test".to_string());
        let key = AlertKey::Tagged(PriceAlertState::ReachTargetRisePrice);

        let (skip, count) = gate.should_skip(&key, &BUDGET).await;
        assert!(!skip);
        assert_eq!(count, 0);
        // the write failing must not panic the orchestrator either
        gate.record_fire(&key, &BUDGET, 1).await;
    }

    struct StubNotifier {
        sent: std::sync::atomic::AtomicUsize,
        outcome: Result<bool, ()>,
    }

    impl StubNotifier {
        fn ok() -> Self {
            Self {
                sent: Default::default(),
                outcome: Ok(true),
            }
        }

        fn sent(&self) -> usize {
            self.sent.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl crate::notify::Notifier for StubNotifier {
        async fn send(&self, _card: &crate::notify::TextCard) -> Result<bool> {
            self.sent.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            match self.outcome {
                Ok(delivered) => Ok(delivered),
                Err(()) => Err(anyhow!("push gateway down")),
            }
        }
    }

    fn card() -> crate::notify::TextCard {
        crate::notify::TextCard {
            title: "t".to_string(),
            description: "d".to_string(),
            url: "u".to_string(),
        }
    }

    #[tokio::test]
    async fn deliver_counts_only_confirmed_sends() {
        let gate = gate();
        let key = AlertKey::Composite("1024#0102#2026-08-10#08:00#12:00".to_string());
        let budget = NotifyBudget {
            max_repeats: 1,
            window_secs: 7200,
        };
        let notifier = StubNotifier::ok();

        // the same slot seen on three consecutive polls
        assert!(gate.deliver(&key, &card(), &budget, &notifier).await);
        assert!(!gate.deliver(&key, &card(), &budget, &notifier).await);
        assert!(!gate.deliver(&key, &card(), &budget, &notifier).await);
        assert_eq!(notifier.sent(), 1);
    }

    #[tokio::test]
    async fn failed_push_does_not_consume_budget() {
        let gate = gate();
        let key = AlertKey::Tagged(PriceAlertState::FallToTargetPrice);
        let budget = NotifyBudget {
            max_repeats: 1,
            window_secs: 90,
        };

        let broken = StubNotifier {
            sent: Default::default(),
            outcome: Err(()),
        };
        assert!(!gate.deliver(&key, &card(), &budget, &broken).await);

        let refused = StubNotifier {
            sent: Default::default(),
            outcome: Ok(false),
        };
        assert!(!gate.deliver(&key, &card(), &budget, &refused).await);

        // budget still untouched, a healthy push goes straight out
        let healthy = StubNotifier::ok();
        assert!(gate.deliver(&key, &card(), &budget, &healthy).await);
        assert_eq!(healthy.sent(), 1);
    }

    #[tokio::test]
    async fn garbage_counter_restarts_at_zero() {
        let store = Arc::new(MemoryStore::new());
        store.set_ex("alert-bot-test-rise_to_target_price", b"\xff\xfe", 90)
            .await
            .unwrap();
        let gate = NotifyGate::new(store, "alert-bot-test".to_string());

        let key = AlertKey::Tagged(PriceAlertState::RiseToTargetPrice);
        let (skip, count) = gate.should_skip(&key, &BUDGET).await;
        assert!(!skip);
        assert_eq!(count, 0);
    }
}
