mod cache;
mod config;
mod database;
mod gate;
mod gold;
mod hospital;
mod notify;
mod trend;
mod types;

use std::sync::Arc;

use tokio::time::{timeout, Duration};

use cache::{CounterStore, MemoryStore, RedisStore};
use config::Config;
use gate::NotifyGate;
use notify::WeChatNotifier;

/// Hard wall-clock limit per task invocation. A hung upstream call is
/// dropped here; any counter writes already made stay as-is.
const TASK_TIME_LIMIT_SECS: u64 = 600;

const GOLD_SYNC_INTERVAL_SECS: u64 = 5;
const GOLD_REMIND_INTERVAL_SECS: u64 = 5;
const RESERVE_POLL_INTERVAL_SECS: u64 = 600;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();
    log::info!("starting alert bot...");

    let config = Arc::new(Config::from_env());

    // one HTTP client shared by every upstream call
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .expect("failed to build http client");

    let store = init_counter_store().await;
    let gate = Arc::new(NotifyGate::new(store, config.cache_prefix()));
    let notifier = Arc::new(WeChatNotifier::new(http.clone(), config.wechat.clone()));

    // Gold tasks need the database; without it the bot still polls
    // reservations rather than crashing.
    match database::init_pool().await {
        Ok(pool) => {
            let sync_http = http.clone();
            let sync_pool = pool.clone();
            let sync_config = Arc::clone(&config);
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(GOLD_SYNC_INTERVAL_SECS));
                loop {
                    interval.tick().await;
                    run_bounded(
                        "sync_gold_price",
                        gold::sync_gold_price(&sync_http, &sync_pool, &sync_config.gold),
                    )
                    .await;
                }
            });

            let remind_config = Arc::clone(&config);
            let remind_gate = Arc::clone(&gate);
            let remind_notifier = Arc::clone(&notifier);
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(GOLD_REMIND_INTERVAL_SECS));
                loop {
                    interval.tick().await;
                    run_bounded(
                        "gold_price_remind",
                        gold::gold_price_remind(
                            &pool,
                            &remind_config.gold,
                            &remind_gate,
                            remind_notifier.as_ref(),
                        ),
                    )
                    .await;
                }
            });
        }
        Err(e) => {
            log::error!("database unavailable, gold price tasks disabled: {e:#}");
        }
    }

    let reserve_config = Arc::clone(&config);
    let reserve_gate = Arc::clone(&gate);
    let reserve_notifier = Arc::clone(&notifier);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(RESERVE_POLL_INTERVAL_SECS));
        loop {
            interval.tick().await;
            run_bounded(
                "reserve_notify",
                hospital::reserve_notify(
                    &http,
                    &reserve_config.reserves,
                    &reserve_gate,
                    reserve_notifier.as_ref(),
                ),
            )
            .await;
        }
    });

    // keep main alive
    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}

/// Run one task invocation under the hard time limit.
async fn run_bounded<F: std::future::Future<Output = ()>>(name: &str, task: F) {
    if timeout(Duration::from_secs(TASK_TIME_LIMIT_SECS), task)
        .await
        .is_err()
    {
        log::warn!("{name} exceeded the {TASK_TIME_LIMIT_SECS}s task limit, dropped");
    }
}

/// Redis when reachable, in-process counters otherwise.
async fn init_counter_store() -> Arc<dyn CounterStore> {
    match std::env::var("REDIS_URL") {
        Ok(url) => match RedisStore::connect(&url).await {
            Ok(store) => {
                log::info!("connected to redis");
                Arc::new(store)
            }
            Err(e) => {
                log::warn!("redis unavailable, dedup counters are in-process only: {e:#}");
                Arc::new(MemoryStore::new())
            }
        },
        Err(_) => {
            log::warn!("REDIS_URL not set, dedup counters are in-process only");
            Arc::new(MemoryStore::new())
        }
    }
}
