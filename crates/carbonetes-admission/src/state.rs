//! The running-stack / waiting-queue state machine.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use carbonetes_core::config::AdmissionConfig;

/// A managed job as the admission controller tracks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRecord {
    pub job_id: String,
    pub cluster: String,
    pub namespace: String,
}

/// Lifecycle event observed for a managed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Created {
        #[serde(flatten)]
        record: AdmissionRecord,
        #[serde(default)]
        suspended: bool,
    },
    Completed { job_id: String },
    Failed { job_id: String },
    Deleted { job_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Suspended,
}

/// A transition chosen by a poll. The structures are already updated
/// when it is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionAction {
    Suspend(AdmissionRecord),
    Resume(AdmissionRecord),
}

impl AdmissionAction {
    pub fn record(&self) -> &AdmissionRecord {
        match self {
            AdmissionAction::Suspend(r) | AdmissionAction::Resume(r) => r,
        }
    }

    /// Value of the `suspend` flag sent to the orchestration layer.
    pub fn suspend(&self) -> bool {
        matches!(self, AdmissionAction::Suspend(_))
    }
}

/// Read-only view published after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdmissionView {
    /// Bottom to top; the last entry is suspended first.
    pub running: Vec<AdmissionRecord>,
    /// Front to back; the first entry is resumed first.
    pub waiting: Vec<AdmissionRecord>,
    pub last_utilization: Option<f64>,
    pub suspended_total: u64,
    pub resumed_total: u64,
}

/// Hysteresis controller state. A job is in at most one structure.
#[derive(Debug, Clone)]
pub struct AdmissionState {
    running: Vec<AdmissionRecord>,
    waiting: VecDeque<AdmissionRecord>,
    high: f64,
    low: f64,
    last_utilization: Option<f64>,
    suspended_total: u64,
    resumed_total: u64,
}

impl AdmissionState {
    /// `low` must be below `high`; config validation guarantees it.
    pub fn new(high: f64, low: f64) -> Self {
        Self {
            running: Vec::new(),
            waiting: VecDeque::new(),
            high,
            low,
            last_utilization: None,
            suspended_total: 0,
            resumed_total: 0,
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(config.high_watermark, config.low_watermark)
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        if self.running.iter().any(|r| r.job_id == job_id) {
            Some(JobStatus::Running)
        } else if self.waiting.iter().any(|r| r.job_id == job_id) {
            Some(JobStatus::Suspended)
        } else {
            None
        }
    }

    /// Apply a lifecycle event. Returns whether anything changed.
    pub fn on_event(&mut self, event: JobEvent) -> bool {
        match event {
            JobEvent::Created { record, suspended } => {
                if suspended || self.status(&record.job_id).is_some() {
                    debug!(job = %record.job_id, suspended, "ignoring created event");
                    return false;
                }
                debug!(job = %record.job_id, cluster = %record.cluster, "job running");
                self.running.push(record);
                true
            }
            JobEvent::Completed { job_id }
            | JobEvent::Failed { job_id }
            | JobEvent::Deleted { job_id } => self.remove(&job_id),
        }
    }

    fn remove(&mut self, job_id: &str) -> bool {
        if let Some(pos) = self.running.iter().position(|r| r.job_id == job_id) {
            self.running.remove(pos);
            debug!(job = %job_id, "job left running stack");
            return true;
        }
        if let Some(pos) = self.waiting.iter().position(|r| r.job_id == job_id) {
            self.waiting.remove(pos);
            debug!(job = %job_id, "job left waiting queue");
            return true;
        }
        false
    }

    /// React to a utilization reading (a fraction, 0.0–1.0).
    ///
    /// Above `high`, the top of the running stack moves to the back of the
    /// waiting queue. Below `low`, the front of the waiting queue moves to
    /// the top of the running stack. Otherwise nothing happens.
    pub fn decide(&mut self, utilization: f64) -> Option<AdmissionAction> {
        self.last_utilization = Some(utilization);
        if utilization > self.high {
            let record = self.running.pop()?;
            self.waiting.push_back(record.clone());
            self.suspended_total += 1;
            Some(AdmissionAction::Suspend(record))
        } else if utilization < self.low {
            let record = self.waiting.pop_front()?;
            self.running.push(record.clone());
            self.resumed_total += 1;
            Some(AdmissionAction::Resume(record))
        } else {
            None
        }
    }

    /// Undo an action whose control call failed.
    pub fn revert(&mut self, action: &AdmissionAction) {
        match action {
            AdmissionAction::Suspend(record) => {
                if self.waiting.back() == Some(record) {
                    self.waiting.pop_back();
                    self.running.push(record.clone());
                    self.suspended_total -= 1;
                }
            }
            AdmissionAction::Resume(record) => {
                if self.running.last() == Some(record) {
                    self.running.pop();
                    self.waiting.push_front(record.clone());
                    self.resumed_total -= 1;
                }
            }
        }
    }

    pub fn view(&self) -> AdmissionView {
        AdmissionView {
            running: self.running.clone(),
            waiting: self.waiting.iter().cloned().collect(),
            last_utilization: self.last_utilization,
            suspended_total: self.suspended_total,
            resumed_total: self.resumed_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> AdmissionRecord {
        AdmissionRecord {
            job_id: id.to_string(),
            cluster: "kr".to_string(),
            namespace: "default".to_string(),
        }
    }

    fn created(id: &str) -> JobEvent {
        JobEvent::Created {
            record: record(id),
            suspended: false,
        }
    }

    fn ids(records: &[AdmissionRecord]) -> Vec<&str> {
        records.iter().map(|r| r.job_id.as_str()).collect()
    }

    fn started(ids: &[&str]) -> AdmissionState {
        let mut s = AdmissionState::new(0.60, 0.50);
        for id in ids {
            assert!(s.on_event(created(id)));
        }
        s
    }

    #[test]
    fn no_flapping_inside_band() {
        let mut s = started(&["j1", "j2", "j3"]);
        for u in [0.55, 0.58, 0.56, 0.57, 0.55, 0.58, 0.60, 0.50] {
            assert_eq!(s.decide(u), None, "utilization {u}");
        }
        assert_eq!(ids(&s.view().running), vec!["j1", "j2", "j3"]);

        assert_eq!(s.decide(0.61), Some(AdmissionAction::Suspend(record("j3"))));
        for u in [0.58, 0.55, 0.57] {
            assert_eq!(s.decide(u), None);
        }
        assert_eq!(s.decide(0.49), Some(AdmissionAction::Resume(record("j3"))));
        assert_eq!(s.view().suspended_total, 1);
        assert_eq!(s.view().resumed_total, 1);
    }

    #[test]
    fn suspends_lifo_resumes_fifo() {
        let mut s = started(&["j1", "j2", "j3"]);

        assert_eq!(s.decide(0.9), Some(AdmissionAction::Suspend(record("j3"))));
        assert_eq!(s.decide(0.9), Some(AdmissionAction::Suspend(record("j2"))));
        assert_eq!(ids(&s.view().waiting), vec!["j3", "j2"]);
        assert_eq!(s.status("j2"), Some(JobStatus::Suspended));

        assert_eq!(s.decide(0.1), Some(AdmissionAction::Resume(record("j3"))));
        assert_eq!(s.decide(0.1), Some(AdmissionAction::Resume(record("j2"))));

        let view = s.view();
        assert_eq!(ids(&view.running), vec!["j1", "j3", "j2"]);
        assert!(view.waiting.is_empty());
    }

    #[test]
    fn nothing_to_move() {
        let mut s = AdmissionState::new(0.60, 0.50);
        assert_eq!(s.decide(0.95), None);
        assert_eq!(s.decide(0.05), None);
        assert_eq!(s.view().last_utilization, Some(0.05));
    }

    #[test]
    fn terminal_events_remove_from_either_structure() {
        let mut s = started(&["j1", "j2"]);
        s.decide(0.9);
        assert_eq!(s.status("j2"), Some(JobStatus::Suspended));

        assert!(s.on_event(JobEvent::Deleted { job_id: "j2".into() }));
        assert!(s.on_event(JobEvent::Completed { job_id: "j1".into() }));
        assert!(!s.on_event(JobEvent::Failed { job_id: "j1".into() }));
        assert_eq!(s.status("j1"), None);
        assert_eq!(s.view(), AdmissionView {
            last_utilization: Some(0.9),
            suspended_total: 1,
            ..AdmissionView::default()
        });
    }

    #[test]
    fn duplicate_or_suspended_creation_ignored() {
        let mut s = started(&["j1"]);
        assert!(!s.on_event(created("j1")));
        s.decide(0.9);
        assert!(!s.on_event(created("j1")));
        assert!(!s.on_event(JobEvent::Created {
            record: record("j9"),
            suspended: true,
        }));
        assert!(s.view().running.is_empty());
        assert_eq!(ids(&s.view().waiting), vec!["j1"]);
    }

    #[test]
    fn revert_restores_positions() {
        let mut s = started(&["j1", "j2"]);
        let suspend = s.decide(0.9).unwrap();
        s.revert(&suspend);
        assert_eq!(ids(&s.view().running), vec!["j1", "j2"]);
        assert_eq!(s.view().suspended_total, 0);

        s.decide(0.9);
        s.decide(0.9);
        let resume = s.decide(0.1).unwrap();
        assert_eq!(resume.record().job_id, "j2");
        s.revert(&resume);
        assert_eq!(ids(&s.view().waiting), vec!["j2", "j1"]);
        assert!(s.view().running.is_empty());
    }

    #[test]
    fn event_json_shape() {
        let event: JobEvent = serde_json::from_str(
            r#"{"type":"created","job_id":"j1","cluster":"kr","namespace":"ml"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            JobEvent::Created {
                record: AdmissionRecord {
                    job_id: "j1".into(),
                    cluster: "kr".into(),
                    namespace: "ml".into(),
                },
                suspended: false,
            }
        );
        let done: JobEvent = serde_json::from_str(r#"{"type":"completed","job_id":"j1"}"#).unwrap();
        assert_eq!(done, JobEvent::Completed { job_id: "j1".into() });
    }
}
