//! Outgoing webhook delivery worker pool.
//!
//! Jobs are sharded to a fixed worker by `(service, event_type,
//! broadcaster)` so notifications for one key reach a given downstream in
//! order. Each worker drains its own bounded FIFO; on overflow the oldest
//! job for the same shard key is dropped first.

use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bridge_db::Database;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::{DELIVERY_TIMEOUT, MAX_ATTEMPTS};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Bridge-Signature";

const RETRY_BASE_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub service_id: String,
    pub url: String,
    pub body: String,
    pub event_type: String,
    pub broadcaster_user_id: String,
}

impl DeliveryJob {
    fn shard_key(&self) -> (&str, &str, &str) {
        (
            &self.service_id,
            &self.event_type,
            &self.broadcaster_user_id,
        )
    }
}

struct WorkerQueue {
    jobs: Mutex<VecDeque<DeliveryJob>>,
    notify: Notify,
}

pub struct DeliveryPool {
    queues: Vec<Arc<WorkerQueue>>,
    per_queue_cap: usize,
}

impl DeliveryPool {
    pub fn start(
        db: Database,
        signing_secret: Option<String>,
        shutdown: CancellationToken,
        workers: usize,
        total_queue: usize,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .unwrap_or_default();

        let workers = workers.max(1);
        let mut queues = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = Arc::new(WorkerQueue {
                jobs: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            });
            queues.push(queue.clone());
            tokio::spawn(Self::worker_loop(
                queue,
                http.clone(),
                signing_secret.clone(),
                db.clone(),
                shutdown.clone(),
            ));
        }

        Self {
            per_queue_cap: (total_queue / workers).max(1),
            queues,
        }
    }

    /// Queue a delivery. Never blocks the caller.
    pub fn enqueue(&self, job: DeliveryJob) {
        let idx = Self::shard_index(&job, self.queues.len());
        let queue = &self.queues[idx];
        {
            let mut jobs = queue.jobs.lock().unwrap_or_else(|e| e.into_inner());
            if jobs.len() >= self.per_queue_cap {
                // Prefer evicting the oldest job for the same key so other
                // keys on this shard keep their head of line.
                let evicted = match jobs.iter().position(|j| j.shard_key() == job.shard_key()) {
                    Some(pos) => jobs.remove(pos),
                    None => jobs.pop_front(),
                };
                if let Some(evicted) = evicted {
                    tracing::warn!(
                        service_id = %evicted.service_id,
                        event_type = %evicted.event_type,
                        "Delivery queue overflow, dropped oldest job"
                    );
                }
            }
            jobs.push_back(job);
        }
        queue.notify.notify_one();
    }

    pub fn pending_jobs(&self) -> usize {
        self.queues
            .iter()
            .map(|q| q.jobs.lock().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    /// Wait until queues are empty or the deadline passes.
    pub async fn drain(&self, deadline: Duration) {
        let _ = tokio::time::timeout(deadline, async {
            while self.pending_jobs() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
    }

    fn shard_index(job: &DeliveryJob, workers: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        job.shard_key().hash(&mut hasher);
        (hasher.finish() as usize) % workers
    }

    async fn worker_loop(
        queue: Arc<WorkerQueue>,
        http: reqwest::Client,
        signing_secret: Option<String>,
        db: Database,
        shutdown: CancellationToken,
    ) {
        loop {
            let job = queue
                .jobs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            match job {
                Some(job) => Self::deliver(&http, signing_secret.as_deref(), &db, job).await,
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = queue.notify.notified() => {}
                    }
                }
            }
        }
    }

    /// POST one envelope, retrying network errors and 5xx with backoff.
    async fn deliver(
        http: &reqwest::Client,
        signing_secret: Option<&str>,
        db: &Database,
        job: DeliveryJob,
    ) {
        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = http
                .post(&job.url)
                .header("Content-Type", "application/json")
                .body(job.body.clone());
            if let Some(secret) = signing_secret {
                request = request.header(SIGNATURE_HEADER, sign(secret, &job.body));
            }

            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(
                        service_id = %job.service_id,
                        url = %job.url,
                        "Webhook delivered"
                    );
                    return;
                }
                Ok(resp) if resp.status().is_client_error() => {
                    tracing::warn!(
                        service_id = %job.service_id,
                        url = %job.url,
                        status = resp.status().as_u16(),
                        "Webhook rejected, not retrying"
                    );
                    if let Err(e) =
                        db.increment_webhook_failures(&job.service_id, Utc::now().timestamp())
                    {
                        tracing::warn!(error = %e, "Failed to record webhook failure");
                    }
                    return;
                }
                Ok(resp) => {
                    tracing::warn!(
                        service_id = %job.service_id,
                        status = resp.status().as_u16(),
                        attempt,
                        "Webhook delivery failed, will retry"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        service_id = %job.service_id,
                        error = %e,
                        attempt,
                        "Webhook delivery error, will retry"
                    );
                }
            }

            if attempt < MAX_ATTEMPTS {
                let backoff = RETRY_BASE_BACKOFF * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }
        }

        tracing::error!(
            service_id = %job.service_id,
            url = %job.url,
            "Webhook delivery abandoned after {MAX_ATTEMPTS} attempts"
        );
    }
}

/// `sha256=<hex>` HMAC over the request body.
pub fn sign(secret: &str, body: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(service: &str, event_type: &str, broadcaster: &str) -> DeliveryJob {
        DeliveryJob {
            service_id: service.into(),
            url: "https://svc.example/hook".into(),
            body: "{}".into(),
            event_type: event_type.into(),
            broadcaster_user_id: broadcaster.into(),
        }
    }

    #[test]
    fn signature_is_stable_hex() {
        let sig = sign("topsecret", r#"{"id":"m1"}"#);
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
        assert_eq!(sig, sign("topsecret", r#"{"id":"m1"}"#));
        assert_ne!(sig, sign("othersecret", r#"{"id":"m1"}"#));
    }

    #[test]
    fn same_key_shards_to_same_worker() {
        let a = DeliveryPool::shard_index(&job("svcA", "channel.follow", "123"), 32);
        let b = DeliveryPool::shard_index(&job("svcA", "channel.follow", "123"), 32);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn overflow_prefers_same_key_eviction() {
        // One worker, tiny queue, so everything lands on the same shard.
        let pool = DeliveryPool::start(
            Database::open_in_memory().unwrap(),
            None,
            CancellationToken::new(),
            1,
            2,
        );
        // Current-thread runtime: the worker task cannot run between the
        // synchronous enqueues below, so the queue state is deterministic.
        let queue = pool.queues[0].clone();

        pool.enqueue(job("svcA", "channel.follow", "123"));
        pool.enqueue(job("svcB", "channel.cheer", "456"));
        pool.enqueue(job("svcA", "channel.follow", "123"));

        let jobs = queue.jobs.lock().unwrap();
        // svcB's job survived; svcA's oldest was evicted for its duplicate.
        assert!(jobs.len() <= 2);
        assert!(jobs.iter().any(|j| j.service_id == "svcB"));
    }
}
