//! Scheduled message registry.
//!
//! Holds pending future sends in memory and fires them with tokio timers.
//! Every registry mutation (schedule, fire, cancel) is followed by exactly
//! one `scheduledJobsUpdate` broadcast. Jobs are not persisted; a restart
//! drops them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::broadcast::{Broadcaster, JOBS_EVENT};
use crate::error::{Result, WagateError};
use crate::gateway::Gateway;

/// A pending scheduled send. The `handle` doubles as the cancel handle.
struct ScheduledMessage {
    recipient: String,
    body: String,
    fire_at: DateTime<Utc>,
    timezone: String,
    handle: JoinHandle<()>,
}

/// Serializable view of a pending job, as listed and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub number: String,
    pub message: String,
    /// RFC 3339 UTC instant.
    pub scheduled_time: String,
    pub timezone: String,
}

/// Returned by a successful `schedule` call.
#[derive(Debug, Clone)]
pub struct ScheduleReceipt {
    pub id: String,
    /// Fire time formatted in the requested timezone, for display.
    pub display_time: String,
}

pub struct Scheduler {
    jobs: Mutex<HashMap<String, ScheduledMessage>>,
    gateway: Arc<Gateway>,
    broadcaster: Arc<Broadcaster>,
}

impl Scheduler {
    pub fn new(gateway: Arc<Gateway>, broadcaster: Arc<Broadcaster>) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            gateway,
            broadcaster,
        })
    }

    /// Register a future send. `date` is `%Y-%m-%d`, `time` is `%H:%M`,
    /// `timezone` an IANA name. Fails with `InvalidSchedule` when parsing
    /// fails or the resolved instant is not strictly in the future.
    pub async fn schedule(
        self: &Arc<Self>,
        recipient: &str,
        body: &str,
        date: &str,
        time: &str,
        timezone: &str,
    ) -> Result<ScheduleReceipt> {
        let fire_local = resolve_fire_time(date, time, timezone)?;
        let fire_at = fire_local.with_timezone(&Utc);
        let now = Utc::now();
        if fire_at <= now {
            return Err(WagateError::InvalidSchedule(format!(
                "{date} {time} ({timezone}) is in the past"
            )));
        }

        let id = generate_job_id();
        let delay = (fire_at - now).to_std().unwrap_or_default();

        let task_scheduler = self.clone();
        let task_id = id.clone();
        let task_recipient = recipient.to_string();
        let task_body = body.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task_scheduler
                .fire(&task_id, &task_recipient, &task_body)
                .await;
        });

        {
            let mut jobs = self.jobs.lock().await;
            let _ = jobs.insert(
                id.clone(),
                ScheduledMessage {
                    recipient: recipient.to_string(),
                    body: body.to_string(),
                    fire_at,
                    timezone: timezone.to_string(),
                    handle,
                },
            );
        }
        let display_time = fire_local.format("%Y-%m-%d %H:%M %Z").to_string();
        info!(job = %id, fire_at = %fire_at, "message scheduled");
        self.publish_jobs().await;

        Ok(ScheduleReceipt { id, display_time })
    }

    /// Timer callback: attempt the send, then drop the job whatever happened.
    async fn fire(self: &Arc<Self>, id: &str, recipient: &str, body: &str) {
        info!(job = %id, "scheduled message firing");
        if let Err(e) = self.gateway.send_message(recipient, body).await {
            error!(job = %id, "scheduled send failed: {e}");
        }
        let _ = self.jobs.lock().await.remove(id);
        self.publish_jobs().await;
    }

    /// Pending jobs ordered by fire time.
    pub async fn list(&self) -> Vec<JobView> {
        let jobs = self.jobs.lock().await;
        let mut views: Vec<JobView> = jobs
            .iter()
            .map(|(id, job)| JobView {
                id: id.clone(),
                number: job.recipient.clone(),
                message: job.body.clone(),
                scheduled_time: job.fire_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                timezone: job.timezone.clone(),
            })
            .collect();
        views.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        views
    }

    /// Cancel a pending job. `JobNotFound` when the id is unknown or the
    /// timer already fired (its own removal is in flight). The handle is
    /// the sole truth, no extra locking on top.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        {
            let mut jobs = self.jobs.lock().await;
            match jobs.get(id) {
                None => return Err(WagateError::JobNotFound(id.to_string())),
                Some(job) if job.handle.is_finished() => {
                    return Err(WagateError::JobNotFound(id.to_string()));
                }
                Some(_) => {}
            }
            if let Some(job) = jobs.remove(id) {
                job.handle.abort();
            }
        }
        info!(job = %id, "scheduled message cancelled");
        self.publish_jobs().await;
        Ok(())
    }

    /// Push the current job list to all subscribers.
    pub async fn publish_jobs(&self) {
        let views = self.list().await;
        self.broadcaster.publish(JOBS_EVENT, views).await;
    }
}

/// Combine date, time, and IANA timezone into a timezone-aware instant.
/// A time inside a DST gap does not exist and is rejected; an ambiguous
/// (fold) time resolves to the earlier mapping.
fn resolve_fire_time(date: &str, time: &str, timezone: &str) -> Result<DateTime<Tz>> {
    let tz: Tz = timezone
        .parse()
        .map_err(|_| WagateError::InvalidSchedule(format!("unknown timezone '{timezone}'")))?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| WagateError::InvalidSchedule(format!("bad date '{date}': {e}")))?;
    let time = NaiveTime::parse_from_str(time, "%H:%M")
        .map_err(|e| WagateError::InvalidSchedule(format!("bad time '{time}': {e}")))?;
    let naive = date.and_time(time);

    match naive.and_local_timezone(tz) {
        chrono::LocalResult::Single(dt) => Ok(dt),
        chrono::LocalResult::Ambiguous(earliest, _) => Ok(earliest),
        chrono::LocalResult::None => Err(WagateError::InvalidSchedule(format!(
            "{naive} does not exist in {timezone}"
        ))),
    }
}

/// Millisecond timestamp plus a random suffix.
fn generate_job_id() -> String {
    format!(
        "{}-{:04x}",
        Utc::now().timestamp_millis(),
        rand::random::<u16>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::config::WhatsAppConfig;

    fn test_fixture() -> (Arc<Scheduler>, Arc<Broadcaster>) {
        let broadcaster = Arc::new(Broadcaster::new());
        let dir = tempfile::tempdir().expect("tempdir");
        let config = WhatsAppConfig {
            data_dir: dir.keep(),
            device_name: "Wagate Test".into(),
        };
        let gateway = Gateway::new(config, broadcaster.clone());
        let scheduler = Scheduler::new(gateway.clone(), broadcaster.clone());
        gateway.attach_scheduler(scheduler.clone());
        (scheduler, broadcaster)
    }

    #[test]
    fn test_resolve_fire_time_utc_offset() {
        // 09:00 Eastern on 2030-01-01 is 14:00 UTC.
        let dt = resolve_fire_time("2030-01-01", "09:00", "America/New_York").unwrap();
        let utc = dt.with_timezone(&Utc);
        assert_eq!(
            utc.to_rfc3339_opts(SecondsFormat::Secs, true),
            "2030-01-01T14:00:00Z"
        );
    }

    #[test]
    fn test_resolve_fire_time_rejects_bad_input() {
        assert!(matches!(
            resolve_fire_time("2030-13-01", "09:00", "UTC"),
            Err(WagateError::InvalidSchedule(_))
        ));
        assert!(matches!(
            resolve_fire_time("2030-01-01", "25:00", "UTC"),
            Err(WagateError::InvalidSchedule(_))
        ));
        assert!(matches!(
            resolve_fire_time("2030-01-01", "09:00", "Mars/Olympus"),
            Err(WagateError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn test_resolve_fire_time_dst_gap() {
        // 02:30 on the US spring-forward date does not exist in New York.
        assert!(matches!(
            resolve_fire_time("2030-03-10", "02:30", "America/New_York"),
            Err(WagateError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = generate_job_id();
        let b = generate_job_id();
        assert_ne!(a, b);
        // Leading component is a millisecond timestamp.
        let millis: i64 = a.split('-').next().unwrap().parse().unwrap();
        assert!(millis > 1_600_000_000_000);
    }

    #[tokio::test]
    async fn test_schedule_in_past_fails_and_registers_nothing() {
        let (scheduler, _bc) = test_fixture();
        let result = scheduler
            .schedule("15551234567", "hi", "2020-01-01", "09:00", "UTC")
            .await;
        assert!(matches!(result, Err(WagateError::InvalidSchedule(_))));
        assert!(scheduler.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_lists_job_with_utc_instant() {
        let (scheduler, _bc) = test_fixture();
        let receipt = scheduler
            .schedule("15551234567", "hi", "2030-01-01", "09:00", "America/New_York")
            .await
            .unwrap();
        assert!(receipt.display_time.contains("2030-01-01 09:00"));

        let jobs = scheduler.list().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, receipt.id);
        assert_eq!(jobs[0].number, "15551234567");
        assert_eq!(jobs[0].message, "hi");
        assert_eq!(jobs[0].timezone, "America/New_York");
        assert_eq!(jobs[0].scheduled_time, "2030-01-01T14:00:00Z");
    }

    #[tokio::test]
    async fn test_schedule_broadcasts_once() {
        let (scheduler, bc) = test_fixture();
        let mut rx = bc.subscribe("watcher".into()).await;

        scheduler
            .schedule("15551234567", "hi", "2030-01-01", "09:00", "UTC")
            .await
            .unwrap();

        let event: serde_json::Value =
            serde_json::from_str(&rx.try_recv().expect("jobs event")).unwrap();
        assert_eq!(event["event"], "scheduledJobsUpdate");
        assert_eq!(event["data"].as_array().unwrap().len(), 1);
        // Exactly one broadcast per mutation.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_list_orders_by_fire_time() {
        let (scheduler, _bc) = test_fixture();
        scheduler
            .schedule("15550000002", "later", "2030-01-02", "09:00", "UTC")
            .await
            .unwrap();
        scheduler
            .schedule("15550000001", "sooner", "2030-01-01", "09:00", "UTC")
            .await
            .unwrap();

        let jobs = scheduler.list().await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].message, "sooner");
        assert_eq!(jobs[1].message, "later");
    }

    #[tokio::test]
    async fn test_cancel_removes_job_and_broadcasts_once() {
        let (scheduler, bc) = test_fixture();
        let receipt = scheduler
            .schedule("15551234567", "hi", "2030-01-01", "09:00", "UTC")
            .await
            .unwrap();

        let mut rx = bc.subscribe("watcher".into()).await;
        scheduler.cancel(&receipt.id).await.unwrap();
        assert!(scheduler.list().await.is_empty());

        let event: serde_json::Value =
            serde_json::from_str(&rx.try_recv().expect("jobs event")).unwrap();
        assert_eq!(event["event"], "scheduledJobsUpdate");
        assert!(event["data"].as_array().unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_unknown_fails_without_broadcast() {
        let (scheduler, bc) = test_fixture();
        let mut rx = bc.subscribe("watcher".into()).await;

        let result = scheduler.cancel("does-not-exist").await;
        assert!(matches!(result, Err(WagateError::JobNotFound(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_failure() {
        let (scheduler, _bc) = test_fixture();
        let receipt = scheduler
            .schedule("15551234567", "hi", "2030-01-01", "09:00", "UTC")
            .await
            .unwrap();
        scheduler.cancel(&receipt.id).await.unwrap();
        assert!(matches!(
            scheduler.cancel(&receipt.id).await,
            Err(WagateError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fire_removes_job_even_when_send_fails() {
        let (scheduler, bc) = test_fixture();
        let receipt = scheduler
            .schedule("15551234567", "hi", "2030-01-01", "09:00", "UTC")
            .await
            .unwrap();

        let mut rx = bc.subscribe("watcher".into()).await;
        // Drive the timer callback directly; the gateway is disconnected so
        // the send fails, but the job is spent either way.
        scheduler.fire(&receipt.id, "15551234567", "hi").await;

        assert!(scheduler.list().await.is_empty());
        let event: serde_json::Value =
            serde_json::from_str(&rx.try_recv().expect("jobs event")).unwrap();
        assert_eq!(event["event"], "scheduledJobsUpdate");
        assert!(event["data"].as_array().unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_and_cleans_up() {
        let (scheduler, _bc) = test_fixture();

        // One minute out on the wall clock; the paused runtime auto-advances
        // through the sleep.
        let fire_at = Utc::now() + chrono::Duration::minutes(1);
        let date = fire_at.format("%Y-%m-%d").to_string();
        let time = fire_at.format("%H:%M").to_string();
        scheduler
            .schedule("15551234567", "hi", &date, &time, "UTC")
            .await
            .unwrap();
        assert_eq!(scheduler.list().await.len(), 1);

        // Let the timer task run to completion.
        for _ in 0..200 {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            if scheduler.list().await.is_empty() {
                break;
            }
        }
        assert!(scheduler.list().await.is_empty());
    }
}
