//! Extraction lifecycle: start a run, poll it while it is processing, load
//! its items.
//!
//! State lives in a `watch` channel so front ends can follow it. Polling is a
//! background task bound to "a run is selected and it is processing"; any
//! user-driven change of selection bumps `generation`, aborts the task, and
//! makes late writes from an old task no-ops. Each tick awaits its fetch
//! before the next one can fire and missed ticks are skipped, so at most one
//! poll request is ever in flight.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::ReviewApi;
use crate::error::{ApiError, StateError};
use crate::types::{ExtractedItem, Extraction, ExtractionStatus, StartExtractionRequest};

/// Where the selected run sits in `no-run → processing → {complete, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NoRun,
    Processing,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleState {
    pub meeting_id: Option<i64>,
    /// Newest first, as served.
    pub runs: Vec<Extraction>,
    pub selected: Option<i64>,
    pub items: Vec<ExtractedItem>,
    /// Last poll failure; cleared by the next successful fetch.
    pub last_error: Option<String>,
    /// Polling gave up because the session expired.
    pub halted: bool,
    generation: u64,
}

impl LifecycleState {
    pub fn selected_run(&self) -> Option<&Extraction> {
        let id = self.selected?;
        self.runs.iter().find(|r| r.id == id)
    }

    pub fn phase(&self) -> RunPhase {
        match self.selected_run().map(|r| r.status) {
            None => RunPhase::NoRun,
            Some(ExtractionStatus::Processing) => RunPhase::Processing,
            Some(ExtractionStatus::Complete) => RunPhase::Complete,
            Some(ExtractionStatus::Failed) => RunPhase::Failed,
        }
    }

    fn wants_polling(&self) -> bool {
        !self.halted && self.phase() == RunPhase::Processing
    }
}

struct Poller {
    run_id: i64,
    handle: JoinHandle<()>,
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct ExtractionController {
    api: Arc<dyn ReviewApi>,
    state: Arc<watch::Sender<LifecycleState>>,
    poll_interval: Duration,
    poller: Mutex<Option<Poller>>,
}

impl ExtractionController {
    pub fn new(api: Arc<dyn ReviewApi>, poll_interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::default());
        Self {
            api,
            state: Arc::new(tx),
            poll_interval,
            poller: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> LifecycleState {
        self.state.borrow().clone()
    }

    /// True while a poll task is alive for the selected run.
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .map(|p| !p.handle.is_finished())
            .unwrap_or(false)
    }

    /// Switch to a meeting: select its most recent run (or none) and load
    /// that run's items. On failure the previous state is kept.
    pub async fn select_meeting(&self, meeting_id: i64) -> Result<(), StateError> {
        self.cancel_polling();
        let result = self.load_meeting(meeting_id).await;
        self.reconcile_polling();
        result
    }

    async fn load_meeting(&self, meeting_id: i64) -> Result<(), StateError> {
        let runs = self.api.list_extractions(meeting_id).await?;
        let selected = most_recent(&runs);
        let items = match selected {
            Some(id) => self.api.list_items(id).await?,
            None => Vec::new(),
        };

        log::info!(
            "Meeting {}: {} runs, selected {:?}",
            meeting_id,
            runs.len(),
            selected
        );

        self.state.send_modify(|st| {
            st.generation += 1;
            st.meeting_id = Some(meeting_id);
            st.runs = runs;
            st.selected = selected;
            st.items = items;
            st.last_error = None;
            st.halted = false;
        });
        Ok(())
    }

    /// Forget the current meeting (e.g. after a workspace switch).
    pub fn clear(&self) {
        self.cancel_polling();
        self.state.send_modify(|st| {
            let generation = st.generation + 1;
            *st = LifecycleState {
                generation,
                ..LifecycleState::default()
            };
        });
    }

    /// Start a new run for `meeting_id` and make it the selected run.
    pub async fn start_extraction(
        &self,
        meeting_id: i64,
        model: Option<String>,
        transcript_version_id: Option<i64>,
    ) -> Result<i64, StateError> {
        let req = StartExtractionRequest {
            model: model.filter(|m| !m.trim().is_empty()),
            transcript_version_id,
        };
        let run = self.api.start_extraction(meeting_id, &req).await?;
        let run_id = run.id;

        log::info!(
            "Extraction {} started for meeting {} (model {:?})",
            run_id,
            meeting_id,
            run.model
        );

        self.cancel_polling();
        self.state.send_modify(|st| {
            st.generation += 1;
            if st.meeting_id != Some(meeting_id) {
                st.meeting_id = Some(meeting_id);
                st.runs.clear();
            }
            st.runs.retain(|r| r.id != run_id);
            st.runs.insert(0, run);
            st.selected = Some(run_id);
            st.items.clear();
            st.last_error = None;
            st.halted = false;
        });
        self.reconcile_polling();

        Ok(run_id)
    }

    /// Select one of the current meeting's runs and load its items.
    pub async fn select_run(&self, run_id: i64) -> Result<(), StateError> {
        if !self.state.borrow().runs.iter().any(|r| r.id == run_id) {
            return Err(StateError::UnknownRun(run_id));
        }

        self.cancel_polling();
        let result = match self.api.list_items(run_id).await {
            Ok(items) => {
                self.state.send_modify(|st| {
                    st.generation += 1;
                    st.selected = Some(run_id);
                    st.items = items;
                    st.last_error = None;
                    st.halted = false;
                });
                Ok(())
            }
            Err(e) => Err(e.into()),
        };
        self.reconcile_polling();
        result
    }

    /// Re-fetch the run list and the selected run's items. A selection that
    /// vanished falls back to the first run, or to none.
    pub async fn refresh(&self) -> Result<(), StateError> {
        let (meeting_id, selected) = {
            let st = self.state.borrow();
            (st.meeting_id, st.selected)
        };
        let meeting_id = meeting_id.ok_or(StateError::NoActiveMeeting)?;

        let fetched = fetch_lifecycle(self.api.as_ref(), meeting_id, selected).await?;
        self.state.send_modify(|st| fetched.apply(st));
        self.reconcile_polling();
        Ok(())
    }

    /// Swap an updated item into the in-memory list.
    pub fn replace_item(&self, item: ExtractedItem) {
        self.state.send_if_modified(|st| {
            match st.items.iter_mut().find(|i| i.id == item.id) {
                Some(slot) => {
                    *slot = item;
                    true
                }
                None => false,
            }
        });
    }

    pub fn item(&self, item_id: i64) -> Option<ExtractedItem> {
        self.state
            .borrow()
            .items
            .iter()
            .find(|i| i.id == item_id)
            .cloned()
    }

    /// Resolve once the selected run is terminal or nothing is selected.
    pub async fn wait_until_settled(&self) -> LifecycleState {
        let mut rx = self.state.subscribe();
        loop {
            {
                let st = rx.borrow_and_update();
                if !st.wants_polling() {
                    return st.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }

    fn cancel_polling(&self) {
        if let Some(poller) = self.poller.lock().take() {
            log::debug!("Extraction poller: cancelled for run {}", poller.run_id);
        }
    }

    /// Make the poll task match the state: running iff the selected run is
    /// processing.
    fn reconcile_polling(&self) {
        let (wanted, meeting_id, generation) = {
            let st = self.state.borrow();
            let wanted = if st.wants_polling() { st.selected } else { None };
            (wanted, st.meeting_id, st.generation)
        };

        let mut slot = self.poller.lock();
        let alive = slot
            .as_ref()
            .map(|p| Some(p.run_id) == wanted && !p.handle.is_finished())
            .unwrap_or(false);
        if alive {
            return;
        }
        *slot = None;

        if let (Some(run_id), Some(meeting_id)) = (wanted, meeting_id) {
            log::debug!("Extraction poller: started for run {}", run_id);
            let handle = tokio::spawn(run_poller(
                self.api.clone(),
                self.state.clone(),
                meeting_id,
                generation,
                self.poll_interval,
            ));
            *slot = Some(Poller { run_id, handle });
        }
    }
}

/// Result of one run-list + items fetch.
struct Fetched {
    runs: Vec<Extraction>,
    selected: Option<i64>,
    items: Vec<ExtractedItem>,
}

impl Fetched {
    fn apply(self, st: &mut LifecycleState) {
        st.runs = self.runs;
        st.selected = self.selected;
        st.items = self.items;
        st.last_error = None;
        st.halted = false;
    }
}

async fn fetch_lifecycle(
    api: &dyn ReviewApi,
    meeting_id: i64,
    selected: Option<i64>,
) -> Result<Fetched, ApiError> {
    let runs = api.list_extractions(meeting_id).await?;
    let selected = resolve_selection(&runs, selected);
    let items = match selected {
        Some(id) => api.list_items(id).await?,
        None => Vec::new(),
    };
    Ok(Fetched {
        runs,
        selected,
        items,
    })
}

fn most_recent(runs: &[Extraction]) -> Option<i64> {
    runs.iter()
        .max_by_key(|r| (r.created_at, r.id))
        .map(|r| r.id)
}

fn resolve_selection(runs: &[Extraction], previous: Option<i64>) -> Option<i64> {
    match previous {
        Some(id) if runs.iter().any(|r| r.id == id) => Some(id),
        _ => runs.first().map(|r| r.id),
    }
}

/// Periodic refresh while the selected run is processing.
async fn run_poller(
    api: Arc<dyn ReviewApi>,
    state: Arc<watch::Sender<LifecycleState>>,
    meeting_id: i64,
    generation: u64,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; the state was just loaded.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let selected = {
            let st = state.borrow();
            if st.generation != generation {
                return;
            }
            st.selected
        };

        match fetch_lifecycle(api.as_ref(), meeting_id, selected).await {
            Ok(fetched) => {
                let mut keep_polling = false;
                let applied = state.send_if_modified(|st| {
                    if st.generation != generation {
                        return false;
                    }
                    fetched.apply(st);
                    keep_polling = st.wants_polling();
                    true
                });
                if !applied {
                    return;
                }
                if !keep_polling {
                    let st = state.borrow();
                    log::info!(
                        "Extraction poller: meeting {} settled ({:?}, {} items)",
                        meeting_id,
                        st.phase(),
                        st.items.len()
                    );
                    return;
                }
            }
            Err(e) => {
                log::warn!("Extraction poller: refresh failed: {}", e);
                let stop = e.is_unauthorized();
                state.send_if_modified(|st| {
                    if st.generation != generation {
                        return false;
                    }
                    st.last_error = Some(e.to_string());
                    st.halted = stop;
                    true
                });
                if stop {
                    return;
                }
            }
        }
    }
}
