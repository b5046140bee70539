use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{RunError, RunResult};
use crate::types::{ProcessingMode, Run, RunStatus};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub mode: Option<ProcessingMode>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_to: Option<DateTime<Utc>>,
}

impl RunFilter {
    pub fn matches(&self, run: &Run) -> bool {
        self.status.map_or(true, |s| run.status == s)
            && self.mode.map_or(true, |m| run.processing_mode == Some(m))
            && self.created_from.map_or(true, |from| run.created_at >= from)
            && self.created_to.map_or(true, |to| run.created_at < to)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total: usize,
}

/// Persistence for run records.
pub trait RunStore: Send + Sync {
    fn find_by_id(&self, id: Uuid) -> RunResult<Option<Run>>;

    /// Insert or replace.
    fn save(&self, run: Run) -> RunResult<Run>;

    /// Atomic read-modify-write of one run. The mutation is committed only if
    /// `apply` returns `Ok`; no other writer can interleave with it.
    fn update(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Run) -> RunResult<()>,
    ) -> RunResult<Run>;

    /// Newest first.
    fn find_filtered(&self, filter: &RunFilter, page: PageRequest) -> RunResult<Page<Run>>;
}

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<Uuid, Run>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for InMemoryRunStore {
    fn find_by_id(&self, id: Uuid) -> RunResult<Option<Run>> {
        Ok(self.runs.read().get(&id).cloned())
    }

    fn save(&self, run: Run) -> RunResult<Run> {
        self.runs.write().insert(run.id, run.clone());
        Ok(run)
    }

    fn update(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Run) -> RunResult<()>,
    ) -> RunResult<Run> {
        let mut runs = self.runs.write();
        let current = runs.get(&id).ok_or(RunError::NotFound(id))?;

        let mut draft = current.clone();
        apply(&mut draft)?;

        runs.insert(id, draft.clone());
        Ok(draft)
    }

    fn find_filtered(&self, filter: &RunFilter, page: PageRequest) -> RunResult<Page<Run>> {
        if page.size == 0 {
            return Err(RunError::Validation("page size must be at least 1".into()));
        }

        let runs = self.runs.read();
        let mut matching: Vec<&Run> = runs.values().filter(|r| filter.matches(r)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(page.page.saturating_mul(page.size))
            .take(page.size)
            .cloned()
            .collect();

        Ok(Page {
            items,
            page: page.page,
            size: page.size,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CreateRunRequest, HttpMethod, RequestDefinition};
    use chrono::Duration;

    fn run(mode: ProcessingMode) -> Run {
        Run::new(CreateRunRequest {
            total_requests: 3,
            concurrency: 1,
            processing_mode: Some(mode),
            pool_size_or_cap: None,
            delay_ms: None,
            request: RequestDefinition {
                url: "http://localhost:8080/api".into(),
                method: HttpMethod::Get,
                headers: HashMap::new(),
                body: None,
                content_type: None,
            },
            auto_approve: false,
        })
        .unwrap()
    }

    #[test]
    fn save_then_find() {
        let store = InMemoryRunStore::new();
        let saved = store.save(run(ProcessingMode::Parallel)).unwrap();
        assert_eq!(store.find_by_id(saved.id).unwrap(), Some(saved));
        assert_eq!(store.find_by_id(Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn failed_update_is_not_committed() {
        let store = InMemoryRunStore::new();
        let saved = store.save(run(ProcessingMode::Parallel)).unwrap();

        let result = store.update(saved.id, &mut |r| {
            r.status = RunStatus::Running;
            Err(RunError::Execution("rolled back".into()))
        });
        assert!(result.is_err());
        assert_eq!(
            store.find_by_id(saved.id).unwrap().unwrap().status,
            RunStatus::Waiting
        );

        let updated = store
            .update(saved.id, &mut |r| {
                r.status = RunStatus::Running;
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.status, RunStatus::Running);
    }

    #[test]
    fn update_of_missing_run_is_not_found() {
        let store = InMemoryRunStore::new();
        let id = Uuid::new_v4();
        let result = store.update(id, &mut |_| Ok(()));
        assert!(matches!(result, Err(RunError::NotFound(missing)) if missing == id));
    }

    #[test]
    fn filters_by_status_mode_and_date() {
        let store = InMemoryRunStore::new();
        let now = Utc::now();

        let mut old = run(ProcessingMode::Pooled);
        old.created_at = now - Duration::days(2);
        let mut finished = run(ProcessingMode::Pooled);
        finished.status = RunStatus::Finished;
        finished.created_at = now - Duration::hours(1);
        let parallel = run(ProcessingMode::Parallel);

        store.save(old.clone()).unwrap();
        store.save(finished.clone()).unwrap();
        store.save(parallel.clone()).unwrap();

        let pooled = RunFilter {
            mode: Some(ProcessingMode::Pooled),
            ..Default::default()
        };
        let page = store.find_filtered(&pooled, PageRequest::default()).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id, finished.id);
        assert_eq!(page.items[1].id, old.id);

        let recent_finished = RunFilter {
            status: Some(RunStatus::Finished),
            created_from: Some(now - Duration::days(1)),
            ..Default::default()
        };
        let page = store
            .find_filtered(&recent_finished, PageRequest::default())
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, finished.id);

        let before_old = RunFilter {
            created_to: Some(old.created_at),
            ..Default::default()
        };
        assert_eq!(
            store
                .find_filtered(&before_old, PageRequest::default())
                .unwrap()
                .total,
            0
        );
    }

    #[test]
    fn paginates_newest_first() {
        let store = InMemoryRunStore::new();
        let now = Utc::now();
        for minutes in 0..5 {
            let mut r = run(ProcessingMode::Sequential);
            r.created_at = now - Duration::minutes(minutes);
            store.save(r).unwrap();
        }

        let second = store
            .find_filtered(&RunFilter::default(), PageRequest { page: 1, size: 2 })
            .unwrap();
        assert_eq!(second.total, 5);
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[0].created_at, now - Duration::minutes(2));

        let past_end = store
            .find_filtered(&RunFilter::default(), PageRequest { page: 9, size: 2 })
            .unwrap();
        assert!(past_end.items.is_empty());

        assert!(store
            .find_filtered(&RunFilter::default(), PageRequest { page: 0, size: 0 })
            .is_err());
    }
}
