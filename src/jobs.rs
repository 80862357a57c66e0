use crate::{models::ApiError, pipeline::IngestionPipeline, reaper::StaleItemReaper};
use serde::Serialize;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use uuid::Uuid;

/// In-process rendition of the external at-least-once executor: jobs are
/// queued over a channel and worked one at a time, so two runs for the same
/// charity never overlap within one process.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
}

#[derive(Clone, Debug)]
pub enum JobRequest {
    Ingest { charity_id: i64 },
    Sweep { stale_days: i64 },
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    request: JobRequest,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: serde_json::Value },
    Failed { error: String },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(
        pipeline: IngestionPipeline,
        reaper: StaleItemReaper,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(job.id, JobState::Running);
                }

                let state = match job.request {
                    JobRequest::Ingest { charity_id } => {
                        let summary = pipeline.run(charity_id).await;
                        if summary.succeeded() {
                            JobState::Completed {
                                result: json!(summary),
                            }
                        } else {
                            JobState::Failed {
                                error: summary.result,
                            }
                        }
                    }
                    JobRequest::Sweep { stale_days } => {
                        let summary = reaper.sweep(stale_days).await;
                        JobState::Completed {
                            result: json!(summary),
                        }
                    }
                };

                let mut guard = statuses_bg.lock().await;
                guard.insert(job.id, state);
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue(&self, request: JobRequest) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(id, JobState::Queued);
        }
        let job = Job { id, request };
        self.tx.send(job).await.map_err(|_| ApiError {
            error: "queue_send_failed".into(),
            detail: Some("worker not available".into()),
        })?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebay::browse::{BrowseError, Marketplace, SearchPage};
    use crate::store::Store;
    use async_trait::async_trait;
    use std::time::Duration;

    struct EmptyMarket {
        fail: bool,
    }

    #[async_trait]
    impl Marketplace for EmptyMarket {
        async fn search_by_charity(
            &self,
            _charity_id: i64,
            _cursor: Option<&str>,
        ) -> Result<SearchPage, BrowseError> {
            if self.fail {
                Err(BrowseError::Request("rate limited".to_string()))
            } else {
                Ok(SearchPage {
                    item_summaries: None,
                    next: None,
                })
            }
        }

        async fn item_availability(
            &self,
            _item_id: &str,
        ) -> Result<crate::ebay::browse::Availability, BrowseError> {
            Err(BrowseError::MalformedAvailability)
        }
    }

    async fn queue_with(fail: bool) -> JobQueue {
        let store = Store::memory().await.expect("store");
        let market = Arc::new(EmptyMarket { fail });
        let pipeline = IngestionPipeline::new(store.clone(), market.clone())
            .with_page_delay(Duration::ZERO);
        let reaper = StaleItemReaper::new(store, market);
        let (queue, _worker) = JobQueue::spawn(pipeline, reaper);
        queue
    }

    async fn wait_for_terminal(queue: &JobQueue, id: Uuid) -> JobState {
        for _ in 0..100 {
            if let Some(info) = queue.get(id).await {
                match info.state {
                    JobState::Queued | JobState::Running => {}
                    terminal => return terminal,
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never finished");
    }

    #[tokio::test]
    async fn ingest_job_completes_with_summary() {
        let queue = queue_with(false).await;
        let id = queue
            .enqueue(JobRequest::Ingest { charity_id: 281 })
            .await
            .expect("enqueue");

        match wait_for_terminal(&queue, id).await {
            JobState::Completed { result } => {
                assert_eq!(result["result"], "success - no items");
            }
            other => panic!("unexpected state: {:?}", serde_json::to_value(&other)),
        }
    }

    #[tokio::test]
    async fn failed_run_is_reported_as_failed() {
        let queue = queue_with(true).await;
        let id = queue
            .enqueue(JobRequest::Ingest { charity_id: 281 })
            .await
            .expect("enqueue");

        match wait_for_terminal(&queue, id).await {
            JobState::Failed { error } => assert_eq!(error, "rate limited"),
            other => panic!("unexpected state: {:?}", serde_json::to_value(&other)),
        }
    }

    #[tokio::test]
    async fn sweep_job_completes() {
        let queue = queue_with(false).await;
        let id = queue
            .enqueue(JobRequest::Sweep { stale_days: 7 })
            .await
            .expect("enqueue");

        match wait_for_terminal(&queue, id).await {
            JobState::Completed { result } => {
                assert_eq!(result["examined"], 0);
            }
            other => panic!("unexpected state: {:?}", serde_json::to_value(&other)),
        }
    }

    #[tokio::test]
    async fn unknown_job_id_is_none() {
        let queue = queue_with(false).await;
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }
}
