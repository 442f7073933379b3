#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use stepwise_core::{FormId, FormRecord, OwnerId, Process, ProcessStep, ProcessType, Visibility};
use stepwise_engine::{
    Clock, EngineConfig, ExecutionService, HashingParams, ManualClock, NewProcess, NewStep,
    ObserverError, ProcessManager, ProgressEvent, ProgressObserver,
};
use stepwise_storage::{MemoryStorage, ProcessStorage};
use time::macros::datetime;
use time::OffsetDateTime;

pub fn test_config() -> EngineConfig {
    EngineConfig {
        hashing: HashingParams::minimal(),
        ..EngineConfig::default()
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingObserver {
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }
}

impl ProgressObserver for RecordingObserver {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_event(&self, event: &ProgressEvent) -> Result<(), ObserverError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct FailingObserver;

impl ProgressObserver for FailingObserver {
    fn name(&self) -> &str {
        "failing"
    }

    fn on_event(&self, _event: &ProgressEvent) -> Result<(), ObserverError> {
        Err("webhook endpoint unreachable".into())
    }
}

pub struct Harness<S: ProcessStorage> {
    pub storage: Arc<S>,
    pub clock: Arc<ManualClock>,
    pub service: Arc<ExecutionService<S>>,
    pub manager: ProcessManager<S>,
    pub events: Arc<RecordingObserver>,
    pub owner: OwnerId,
    pub form: FormRecord,
}

impl Harness<MemoryStorage> {
    pub async fn memory() -> Self {
        Self::new(MemoryStorage::new()).await
    }
}

impl<S: ProcessStorage> Harness<S> {
    pub async fn new(storage: S) -> Self {
        let storage = Arc::new(storage);
        let clock = Arc::new(ManualClock::new(datetime!(2025-03-01 9:00 UTC)));
        let events = Arc::new(RecordingObserver::default());
        let config = test_config();
        let service = ExecutionService::new(storage.clone(), config.clone())
            .unwrap()
            .with_clock(clock.clone())
            .with_observer(events.clone())
            .with_observer(Arc::new(FailingObserver));
        let manager = ProcessManager::new(storage.clone(), &config)
            .unwrap()
            .with_clock(clock.clone());

        let form = FormRecord {
            id: FormId::new(),
            slug: "contact-details".to_string(),
            title: "Contact details".to_string(),
            description: Some("Name, email, phone".to_string()),
        };
        manager.register_form(form.clone()).await.unwrap();

        Self {
            storage,
            clock,
            service: Arc::new(service),
            manager,
            events,
            owner: OwnerId::new("owner-1"),
            form,
        }
    }

    pub fn clock_now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Create a process owned by `self.owner` with one step per
    /// `(title, required)` pair, in order.
    pub async fn process(
        &self,
        new: NewProcess,
        steps: &[(&str, bool)],
    ) -> (Process, Vec<ProcessStep>) {
        let process = self.manager.create_process(&self.owner, new).await.unwrap();
        let mut created = Vec::new();
        for (title, required) in steps {
            let mut step = NewStep::new(self.form.id, *title);
            step.is_required = *required;
            created.push(
                self.manager
                    .create_step(&self.owner, &process.slug, step)
                    .await
                    .unwrap(),
            );
        }
        (process, created)
    }

    pub async fn linear(&self, slug: &str, steps: &[(&str, bool)]) -> (Process, Vec<ProcessStep>) {
        let mut new = NewProcess::new(format!("Process {slug}"));
        new.slug = Some(slug.to_string());
        self.process(new, steps).await
    }

    pub async fn free(&self, slug: &str, steps: &[(&str, bool)]) -> (Process, Vec<ProcessStep>) {
        let mut new = NewProcess::new(format!("Process {slug}"));
        new.slug = Some(slug.to_string());
        new.process_type = ProcessType::Free;
        self.process(new, steps).await
    }

    pub async fn private(&self, slug: &str, password: &str) -> (Process, Vec<ProcessStep>) {
        let mut new = NewProcess::new(format!("Process {slug}"));
        new.slug = Some(slug.to_string());
        new.visibility = Visibility::Private;
        new.password = Some(password.to_string());
        self.process(new, &[("Only step", true)]).await
    }

    /// The "P" fixture: linear, S1 and S2 required, S3 optional.
    pub async fn three_step(&self, slug: &str) -> (Process, Vec<ProcessStep>) {
        self.linear(slug, &[("S1", true), ("S2", true), ("S3", false)])
            .await
    }
}
