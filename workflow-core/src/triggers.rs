//! Trigger multiplexer: cron schedules, file-glob watches, and a dotted-name
//! event bus, all feeding a single queue that a processor loop drains by
//! firing `WorkflowRunner::run`. Grounded on the original engine's
//! `CronScheduler`/`FileWatcher`/`EventBus`/`TriggerManager`/`WorkflowDaemon`,
//! translated from `asyncio` tasks to `tokio` tasks. The file watcher polls
//! mtimes directly, the same way the original does, rather than reaching for
//! a native filesystem-event crate.

use crate::config::EngineConfig;
use crate::parser;
use crate::runner::{RunOptions, WorkflowRunner};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::SystemTime;
use tokio::sync::mpsc;
use workflow_kernel::model::{TriggerEvent, TriggerEventType, TriggerType};
use workflow_kernel::ports::{ClockPort, LlmCapability};
use workflow_kernel::value::Value;
use workflow_kernel::WorkflowResult;

/// The real wall clock, the `ClockPort` the daemon runs against outside tests.
pub struct SystemClock;

impl ClockPort for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The `cron` crate requires a leading seconds field; workflow documents
/// write standard 5-field unix cron the way the original's `croniter`
/// expects, so a bare 5-field expression gets `0 ` prepended.
fn normalize(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

/// Pure: the next fire time at or after `now`. Takes `now` as a parameter
/// rather than reading the wall clock itself, so cron scheduling is unit
/// testable without sleeping.
pub fn next_fire_after(expression: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Schedule::from_str(&normalize(expression)).ok()?.after(&now).next()
}

/// A registered cron job, tracked the same way the original `CronJob`
/// dataclass is: expression, cached next/last fire time, enable flag.
#[derive(Debug, Clone)]
struct CronJob {
    workflow_name: String,
    expression: String,
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
}

/// Polls registered cron expressions once a minute and emits a trigger event
/// for every job whose `next_run` has passed.
pub struct CronScheduler {
    jobs: Mutex<HashMap<String, CronJob>>,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, workflow_name: &str, expression: &str, clock: &dyn ClockPort) {
        let next_run = next_fire_after(expression, clock.now());
        let mut jobs = self.jobs.lock().unwrap();
        jobs.insert(
            workflow_name.to_string(),
            CronJob {
                workflow_name: workflow_name.to_string(),
                expression: expression.to_string(),
                next_run,
                last_run: None,
            },
        );
    }

    /// Checks every job once; returns the workflows due to fire and advances
    /// their schedules. Split out from the polling loop so it can be unit
    /// tested without sleeping.
    fn tick(&self, now: DateTime<Utc>) -> Vec<TriggerEvent> {
        let mut fired = Vec::new();
        let mut jobs = self.jobs.lock().unwrap();
        for job in jobs.values_mut() {
            let Some(next_run) = job.next_run else { continue };
            if now >= next_run {
                fired.push(TriggerEvent {
                    trigger_type: TriggerEventType::Cron,
                    workflow: job.workflow_name.clone(),
                    timestamp: now,
                    data: BTreeMap::from([("cron".to_string(), Value::String(job.expression.clone()))]),
                });
                job.last_run = Some(now);
                job.next_run = next_fire_after(&job.expression, now);
            }
        }
        fired
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

/// A registered file-glob watch with its last-seen modification times.
struct Watch {
    workflow_name: String,
    pattern: String,
    mtimes: HashMap<String, SystemTime>,
}

/// Polls glob patterns for changed files the way the original's
/// `_watch_loop` does: on every tick, re-glob the pattern, compare each
/// match's mtime against the last-seen value, and fire on growth.
pub struct FileWatcher {
    watches: Mutex<HashMap<String, Watch>>,
}

impl FileWatcher {
    pub fn new() -> Self {
        Self {
            watches: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, workflow_name: &str, pattern: &str) {
        let mut watches = self.watches.lock().unwrap();
        watches.insert(
            workflow_name.to_string(),
            Watch {
                workflow_name: workflow_name.to_string(),
                pattern: pattern.to_string(),
                mtimes: HashMap::new(),
            },
        );
    }

    fn tick(&self, now: DateTime<Utc>) -> Vec<TriggerEvent> {
        let mut fired = Vec::new();
        let mut watches = self.watches.lock().unwrap();
        for watch in watches.values_mut() {
            let Ok(paths) = glob::glob(&watch.pattern) else { continue };
            for entry in paths.filter_map(|p| p.ok()) {
                if !entry.is_file() {
                    continue;
                }
                let Ok(metadata) = std::fs::metadata(&entry) else { continue };
                let Ok(modified) = metadata.modified() else { continue };
                let key = entry.display().to_string();
                let changed = watch.mtimes.get(&key).is_some_and(|prev| modified > *prev);
                if changed {
                    let mut data = BTreeMap::new();
                    data.insert("file".to_string(), Value::String(key.clone()));
                    data.insert("pattern".to_string(), Value::String(watch.pattern.clone()));
                    fired.push(TriggerEvent {
                        trigger_type: TriggerEventType::Watch,
                        workflow: watch.workflow_name.clone(),
                        timestamp: now,
                        data,
                    });
                }
                watch.mtimes.insert(key, modified);
            }
        }
        fired
    }

    pub fn watch_count(&self) -> usize {
        self.watches.lock().unwrap().len()
    }
}

/// Dotted-name event subscriptions with `*` wildcard matching, translated
/// from the original's ad hoc `pattern.replace(".", r"\.").replace("*", ".*")`.
pub struct EventBus {
    subscriptions: Mutex<HashMap<String, Vec<String>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, workflow_name: &str, event_pattern: &str) {
        let mut subs = self.subscriptions.lock().unwrap();
        subs.entry(event_pattern.to_string())
            .or_default()
            .push(workflow_name.to_string());
    }

    pub fn emit(&self, event_name: &str, data: BTreeMap<String, Value>) -> Vec<TriggerEvent> {
        let now = Utc::now();
        let subs = self.subscriptions.lock().unwrap();
        let mut fired = Vec::new();
        for (pattern, workflows) in subs.iter() {
            if !pattern_matches(pattern, event_name) {
                continue;
            }
            for workflow_name in workflows {
                let mut event_data = data.clone();
                event_data.insert("event".to_string(), Value::String(event_name.to_string()));
                fired.push(TriggerEvent {
                    trigger_type: TriggerEventType::Event,
                    workflow: workflow_name.clone(),
                    timestamp: now,
                    data: event_data,
                });
            }
        }
        fired
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().values().map(Vec::len).sum()
    }
}

fn pattern_matches(pattern: &str, event_name: &str) -> bool {
    if pattern == event_name {
        return true;
    }
    if !pattern.contains('*') {
        return false;
    }
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    regex::Regex::new(&format!("^{escaped}$"))
        .map(|re| re.is_match(event_name))
        .unwrap_or(false)
}

/// Status snapshot written to `daemon_status_file`, mirroring the original's
/// `get_status()` payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DaemonStatus {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub cron_jobs: usize,
    pub file_watches: usize,
    pub event_subscriptions: usize,
}

/// Central coordinator owning one handler of each trigger kind plus the
/// queue a background processor drains to fire workflow runs.
pub struct TriggerManager {
    pub cron: CronScheduler,
    pub watcher: FileWatcher,
    pub events: EventBus,
}

impl TriggerManager {
    pub fn new() -> Self {
        Self {
            cron: CronScheduler::new(),
            watcher: FileWatcher::new(),
            events: EventBus::new(),
        }
    }

    /// Registers every workflow's declared trigger from the definitions
    /// directory. Workflows with a `manual` trigger are skipped; they only
    /// ever run via an explicit CLI invocation.
    pub fn register_all_workflows(&self, config: &EngineConfig) {
        for name in parser::list_workflows(config) {
            let Ok(workflow) = parser::load_workflow(config, &name) else {
                continue;
            };
            match workflow.trigger.trigger_type {
                TriggerType::Cron => {
                    if let Some(expr) = &workflow.trigger.cron {
                        self.cron.register(&name, expr, &SystemClock);
                    }
                }
                TriggerType::Watch => {
                    if let Some(pattern) = &workflow.trigger.watch {
                        self.watcher.register(&name, pattern);
                    }
                }
                TriggerType::Event => {
                    if let Some(pattern) = &workflow.trigger.event {
                        self.events.subscribe(&name, pattern);
                    }
                }
                TriggerType::Manual => {}
            }
        }
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            status: "running".to_string(),
            timestamp: Utc::now(),
            cron_jobs: self.cron.job_count(),
            file_watches: self.watcher.watch_count(),
            event_subscriptions: self.events.subscription_count(),
        }
    }
}

impl Default for TriggerManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a fired `TriggerEvent` into the variable map `WorkflowRunner::run`
/// expects, carrying the trigger's own data plus `_trigger_type`/`_trigger_time`,
/// the same convention the original `_default_handler` uses.
fn event_to_variables(event: &TriggerEvent) -> BTreeMap<String, Value> {
    let mut variables = event.data.clone();
    variables.insert(
        "_trigger_type".to_string(),
        Value::String(trigger_type_label(event.trigger_type).to_string()),
    );
    variables.insert(
        "_trigger_time".to_string(),
        Value::String(event.timestamp.to_rfc3339()),
    );
    variables
}

fn trigger_type_label(trigger_type: TriggerEventType) -> &'static str {
    match trigger_type {
        TriggerEventType::Manual => "manual",
        TriggerEventType::Cron => "cron",
        TriggerEventType::Watch => "watch",
        TriggerEventType::Event => "event",
    }
}

/// Background daemon: owns a `TriggerManager`, polls cron/watch sources on
/// their own intervals, and drains fired events through a single queue into
/// `WorkflowRunner::run`. Every run failure is caught and logged rather than
/// killing the loop, matching the original's "no failure terminates the
/// daemon" invariant.
pub struct WorkflowDaemon<'a, L: LlmCapability> {
    config: &'a EngineConfig,
    manager: TriggerManager,
    runner: WorkflowRunner<'a, L>,
}

impl<'a, L: LlmCapability> WorkflowDaemon<'a, L> {
    pub fn new(
        config: &'a EngineConfig,
        shell: &'a dyn workflow_kernel::ports::ShellPort<Error = std::io::Error>,
        llm: &'a L,
    ) -> Self {
        Self {
            config,
            manager: TriggerManager::new(),
            runner: WorkflowRunner::new(config, shell, llm),
        }
    }

    pub fn write_pid_file(&self) -> WorkflowResult<()> {
        if let Some(parent) = self.config.daemon_pid_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config.daemon_pid_file, std::process::id().to_string())?;
        Ok(())
    }

    fn write_status(&self, status: &str) -> WorkflowResult<()> {
        let mut snapshot = self.manager.status();
        snapshot.status = status.to_string();
        if let Some(parent) = self.config.daemon_status_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(
            &self.config.daemon_status_file,
            serde_json::to_string_pretty(&snapshot)?,
        )?;
        Ok(())
    }

    /// Runs until `shutdown` resolves. Cron and watch ticks happen on their
    /// configured poll intervals; the queue processor drains whatever they
    /// (or an external `emit`) produce roughly once a second.
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> WorkflowResult<()> {
        self.write_pid_file()?;
        self.manager.register_all_workflows(self.config);
        self.write_status("running")?;

        let (tx, mut rx) = mpsc::unbounded_channel::<TriggerEvent>();
        let mut cron_ticker = tokio::time::interval(tokio::time::Duration::from_millis(
            self.config.default_cron_poll_interval_ms,
        ));
        let mut watch_ticker = tokio::time::interval(tokio::time::Duration::from_millis(
            self.config.default_watch_poll_interval_ms,
        ));

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = cron_ticker.tick() => {
                    for event in self.manager.cron.tick(Utc::now()) {
                        let _ = tx.send(event);
                    }
                    self.write_status("running")?;
                }
                _ = watch_ticker.tick() => {
                    for event in self.manager.watcher.tick(Utc::now()) {
                        let _ = tx.send(event);
                    }
                }
                Some(event) = rx.recv() => {
                    if let Err(err) = self.fire(&event) {
                        tracing::error!("trigger processing error for `{}`: {err}", event.workflow);
                    }
                }
            }
        }

        self.write_status("stopped")?;
        if self.config.daemon_pid_file.exists() {
            std::fs::remove_file(&self.config.daemon_pid_file)?;
        }
        Ok(())
    }

    fn fire(&self, event: &TriggerEvent) -> WorkflowResult<()> {
        let variables = event_to_variables(event);
        self.runner.run(&event.workflow, variables, RunOptions::default())?;
        Ok(())
    }
}

/// Writes an event file under `events_dir` for a running daemon to pick up,
/// the out-of-process counterpart to the original's `emit_event()` helper.
/// The CLI's `emit` subcommand uses this; an in-process caller should call
/// `TriggerManager::events.emit` directly instead.
pub fn emit_event_file(config: &EngineConfig, event_name: &str, data: BTreeMap<String, Value>) -> WorkflowResult<()> {
    std::fs::create_dir_all(&config.events_dir)?;
    let timestamp = Utc::now();
    let path = config
        .events_dir
        .join(format!("{}.json", timestamp.format("%Y%m%d%H%M%S%f")));
    let payload = serde_json::json!({
        "name": event_name,
        "data": data,
        "timestamp": timestamp.to_rfc3339(),
    });
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

/// Reads and removes every pending event file under `events_dir`, returning
/// the events in filename (i.e. creation) order. The daemon calls this on
/// every tick to fold externally emitted events into its trigger queue.
pub fn drain_event_files(config: &EngineConfig) -> WorkflowResult<Vec<(String, BTreeMap<String, Value>)>> {
    let Ok(entries) = std::fs::read_dir(&config.events_dir) else {
        return Ok(Vec::new());
    };
    let mut paths: Vec<_> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();

    let mut drained = Vec::new();
    for path in paths {
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        let parsed: serde_json::Value = serde_json::from_str(&contents)?;
        let name = parsed["name"].as_str().unwrap_or_default().to_string();
        let data: BTreeMap<String, Value> = parsed
            .get("data")
            .and_then(|d| serde_json::from_value(d.clone()).ok())
            .unwrap_or_default();
        drained.push((name, data));
        std::fs::remove_file(&path)?;
    }
    Ok(drained)
}

pub fn daemon_status(config: &EngineConfig) -> WorkflowResult<Option<DaemonStatus>> {
    if !config.daemon_status_file.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&config.daemon_status_file)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

pub fn daemon_is_running(config: &EngineConfig) -> bool {
    matches!(daemon_status(config), Ok(Some(status)) if status.status == "running")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FixedClock(DateTime<Utc>);

    impl ClockPort for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[test]
    fn next_fire_after_does_not_read_the_wall_clock() {
        let now = DateTime::parse_from_rfc3339("2026-07-27T00:00:00Z").unwrap().with_timezone(&Utc);
        let next = next_fire_after("0 0 * * *", now).unwrap();
        assert_eq!(next, DateTime::parse_from_rfc3339("2026-07-28T00:00:00Z").unwrap().with_timezone(&Utc));
    }

    #[test]
    fn cron_scheduler_fires_once_schedule_time_passes() {
        let scheduler = CronScheduler::new();
        let now = Utc::now();
        scheduler.register("nightly", "0 0 * * *", &FixedClock(now));
        let far_future = now + chrono::Duration::days(2);
        let fired = scheduler.tick(far_future);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].workflow, "nightly");
        assert_eq!(fired[0].trigger_type, TriggerEventType::Cron);
    }

    #[test]
    fn cron_scheduler_does_not_refire_before_next_run() {
        let scheduler = CronScheduler::new();
        let now = Utc::now();
        scheduler.register("nightly", "0 0 * * *", &FixedClock(now));
        let far_future = now + chrono::Duration::days(2);
        let _ = scheduler.tick(far_future);
        let fired_again = scheduler.tick(far_future);
        assert!(fired_again.is_empty());
    }

    #[test]
    fn file_watcher_fires_on_mtime_increase() {
        let tmp = TempDir::new().unwrap();
        let file_path = tmp.path().join("inbox.md");
        std::fs::write(&file_path, "v1").unwrap();

        let watcher = FileWatcher::new();
        let pattern = tmp.path().join("*.md");
        watcher.register("ingest", pattern.to_str().unwrap());

        let first = watcher.tick(Utc::now());
        assert!(first.is_empty(), "first tick only seeds mtimes");

        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&file_path, "v2 longer content").unwrap();

        let second = watcher.tick(Utc::now());
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].workflow, "ingest");
    }

    #[test]
    fn event_bus_matches_exact_and_wildcard_subscriptions() {
        let bus = EventBus::new();
        bus.subscribe("on-idea", "idea.created");
        bus.subscribe("on-any-idea", "idea.*");
        bus.subscribe("on-kb", "knowledge.updated");

        let fired = bus.emit("idea.created", BTreeMap::new());
        let workflows: Vec<_> = fired.iter().map(|e| e.workflow.clone()).collect();
        assert!(workflows.contains(&"on-idea".to_string()));
        assert!(workflows.contains(&"on-any-idea".to_string()));
        assert!(!workflows.contains(&"on-kb".to_string()));
    }

    #[test]
    fn emitted_event_files_round_trip_through_drain() {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.events_dir = tmp.path().join(".events");

        let mut data = BTreeMap::new();
        data.insert("id".to_string(), Value::String("idea-1".to_string()));
        emit_event_file(&config, "idea.created", data).unwrap();

        let drained = drain_event_files(&config).unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, "idea.created");
        assert_eq!(drained[0].1.get("id"), Some(&Value::String("idea-1".to_string())));

        assert!(drain_event_files(&config).unwrap().is_empty());
    }
}
