//! Scripted adapters for scheduler tests
//!
//! Behavior is looked up by launch name, so a test can give each submitted
//! spec its own build delay, failures, run length and cancel behavior. The
//! adapters also record what the scheduler asked them to do.

use async_trait::async_trait;
use launchpad_core::domain::launch::LaunchSpec;
use launchpad_core::domain::run::{ImageRef, PublishedRef, RunHandle, RunStatus};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use super::{AdapterSet, Builder, Publisher, RegistryTarget, Runner, workload_name};
use crate::error::AdapterError;

/// What the runner does when asked to cancel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancelBehavior {
    #[default]
    Ack,
    Hang,
    Fail,
}

/// Behavior for launches with a given name
#[derive(Debug, Clone)]
pub struct Script {
    pub build_delay: Duration,
    /// The build panics instead of returning
    pub build_panics: bool,
    /// Returned by successive build attempts before one succeeds
    pub build_failures: VecDeque<AdapterError>,
    pub push_failures: VecDeque<AdapterError>,
    pub launch_error: Option<AdapterError>,
    pub launch_delay: Duration,
    pub poll_failures: VecDeque<AdapterError>,
    /// Polls answered with `Running` before `outcome` is reported
    pub polls_until_done: u32,
    pub outcome: RunStatus,
    pub cancel: CancelBehavior,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            build_delay: Duration::ZERO,
            build_panics: false,
            build_failures: VecDeque::new(),
            push_failures: VecDeque::new(),
            launch_error: None,
            launch_delay: Duration::ZERO,
            poll_failures: VecDeque::new(),
            polls_until_done: 1,
            outcome: RunStatus::Succeeded,
            cancel: CancelBehavior::Ack,
        }
    }
}

impl Script {
    pub fn build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = delay;
        self
    }

    pub fn panics_on_build(mut self) -> Self {
        self.build_panics = true;
        self
    }

    pub fn build_failures(mut self, failures: impl IntoIterator<Item = AdapterError>) -> Self {
        self.build_failures = failures.into_iter().collect();
        self
    }

    pub fn push_failures(mut self, failures: impl IntoIterator<Item = AdapterError>) -> Self {
        self.push_failures = failures.into_iter().collect();
        self
    }

    pub fn launch_error(mut self, error: AdapterError) -> Self {
        self.launch_error = Some(error);
        self
    }

    pub fn launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    pub fn poll_failures(mut self, failures: impl IntoIterator<Item = AdapterError>) -> Self {
        self.poll_failures = failures.into_iter().collect();
        self
    }

    pub fn polls(mut self, polls_until_done: u32) -> Self {
        self.polls_until_done = polls_until_done;
        self
    }

    pub fn runs_forever(self) -> Self {
        self.polls(u32::MAX)
    }

    pub fn outcome(mut self, outcome: RunStatus) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn cancel(mut self, cancel: CancelBehavior) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Default)]
struct State {
    scripts: HashMap<String, Script>,
    handles: HashMap<String, String>,
    polls: HashMap<String, u32>,
    build_starts: Vec<String>,
    build_calls: HashMap<String, u32>,
    push_calls: HashMap<String, u32>,
    launch_calls: HashMap<String, u32>,
    cancel_calls: HashMap<String, u32>,
    live: HashSet<Uuid>,
    max_live: usize,
}

/// Builder, publisher and runner driven by per-name scripts
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<State>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, name: &str, script: Script) -> &Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(name.to_string(), script);
        self
    }

    /// Adapter set using this backend for every role
    pub fn adapters(&self) -> AdapterSet {
        let backend = Arc::new(self.clone());
        AdapterSet::new(
            backend.clone(),
            backend.clone(),
            backend,
            RegistryTarget::local(),
        )
    }

    /// Launch names in the order their first build started
    pub fn build_order(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut seen = HashSet::new();
        state
            .build_starts
            .iter()
            .filter(|name| seen.insert((*name).clone()))
            .cloned()
            .collect()
    }

    pub fn build_calls(&self, name: &str) -> u32 {
        self.state.lock().unwrap().build_calls.get(name).copied().unwrap_or(0)
    }

    pub fn push_calls(&self, name: &str) -> u32 {
        self.state.lock().unwrap().push_calls.get(name).copied().unwrap_or(0)
    }

    pub fn launch_calls(&self, name: &str) -> u32 {
        self.state.lock().unwrap().launch_calls.get(name).copied().unwrap_or(0)
    }

    pub fn cancel_calls(&self, name: &str) -> u32 {
        self.state.lock().unwrap().cancel_calls.get(name).copied().unwrap_or(0)
    }

    /// Most jobs seen between build start and their final poll at any one time
    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    fn script_for(&self, name: &str) -> Script {
        self.state
            .lock()
            .unwrap()
            .scripts
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

fn bump(counter: &mut HashMap<String, u32>, name: &str) {
    *counter.entry(name.to_string()).or_insert(0) += 1;
}

#[async_trait]
impl Builder for ScriptedBackend {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn build(&self, job_id: Uuid, spec: &LaunchSpec) -> Result<ImageRef, AdapterError> {
        let name = spec.display_name().to_string();
        let (delay, panics) = {
            let mut state = self.state.lock().unwrap();
            state.build_starts.push(name.clone());
            bump(&mut state.build_calls, &name);
            state.live.insert(job_id);
            state.max_live = state.max_live.max(state.live.len());
            state
                .scripts
                .get(&name)
                .map(|s| (s.build_delay, s.build_panics))
                .unwrap_or_default()
        };

        tokio::time::sleep(delay).await;
        if panics {
            self.state.lock().unwrap().live.remove(&job_id);
            panic!("scripted build of {} panicked", name);
        }

        let failure = self
            .state
            .lock()
            .unwrap()
            .scripts
            .get_mut(&name)
            .and_then(|s| s.build_failures.pop_front());
        match failure {
            Some(err) => {
                if !err.is_transient() {
                    self.state.lock().unwrap().live.remove(&job_id);
                }
                Err(err)
            }
            None => Ok(ImageRef::local(format!("localhost/{}:{}", name, job_id.simple()))),
        }
    }
}

#[async_trait]
impl Publisher for ScriptedBackend {
    fn provider(&self) -> &'static str {
        "local"
    }

    async fn push(
        &self,
        job_id: Uuid,
        image: &ImageRef,
        _target: &RegistryTarget,
    ) -> Result<PublishedRef, AdapterError> {
        let name = image
            .reference
            .trim_start_matches("localhost/")
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string();

        let failure = {
            let mut state = self.state.lock().unwrap();
            bump(&mut state.push_calls, &name);
            state
                .scripts
                .get_mut(&name)
                .and_then(|s| s.push_failures.pop_front())
        };
        if let Some(err) = failure {
            if !err.is_transient() {
                self.state.lock().unwrap().live.remove(&job_id);
            }
            return Err(err);
        }

        Ok(PublishedRef {
            reference: image.reference.clone(),
            provider: "local".to_string(),
        })
    }
}

#[async_trait]
impl Runner for ScriptedBackend {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn launch(
        &self,
        job_id: Uuid,
        _image: &PublishedRef,
        spec: &LaunchSpec,
    ) -> Result<RunHandle, AdapterError> {
        let name = spec.display_name().to_string();
        let script = self.script_for(&name);
        {
            let mut state = self.state.lock().unwrap();
            bump(&mut state.launch_calls, &name);
            if script.launch_error.is_some() {
                state.live.remove(&job_id);
            }
        }
        if let Some(err) = script.launch_error {
            return Err(err);
        }
        tokio::time::sleep(script.launch_delay).await;

        let id = workload_name(job_id);
        self.state
            .lock()
            .unwrap()
            .handles
            .insert(id.clone(), format!("{}|{}", name, job_id));

        Ok(RunHandle {
            backend: "scripted".to_string(),
            id,
            namespace: None,
        })
    }

    async fn poll(&self, handle: &RunHandle) -> Result<RunStatus, AdapterError> {
        let mut state = self.state.lock().unwrap();
        let entry = state.handles.get(&handle.id).cloned().unwrap_or_default();
        let (name, job_id) = entry.split_once('|').unwrap_or_default();
        let job_id: Uuid = job_id.parse().unwrap_or_default();
        let name = name.to_string();

        let script = state.scripts.entry(name.clone()).or_default();
        if let Some(err) = script.poll_failures.pop_front() {
            return Err(err);
        }
        let polls_until_done = script.polls_until_done;
        let outcome = script.outcome.clone();

        let polls = state.polls.entry(handle.id.clone()).or_insert(0);
        *polls += 1;
        if *polls < polls_until_done {
            return Ok(RunStatus::Running);
        }

        state.live.remove(&job_id);
        Ok(outcome)
    }

    async fn cancel(&self, handle: &RunHandle) -> Result<(), AdapterError> {
        let name = {
            let mut state = self.state.lock().unwrap();
            let entry = state.handles.get(&handle.id).cloned().unwrap_or_default();
            let name = entry.split('|').next().unwrap_or_default().to_string();
            bump(&mut state.cancel_calls, &name);
            name
        };

        match self.script_for(&name).cancel {
            CancelBehavior::Ack => Ok(()),
            CancelBehavior::Fail => Err(AdapterError::transient("backend refused cancellation")),
            CancelBehavior::Hang => std::future::pending().await,
        }
    }
}
