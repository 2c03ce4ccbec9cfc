//! The dispatcher (§4.5): engine registry, validate-engine selection,
//! bounded-concurrency parallel validate with per-engine failure isolation,
//! and single-engine compute routing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{bounded, Sender};

use crate::engine::{Capability, ComputeRequest, ComputeResult, Engine, EngineResult};

/// One entry in the registry: name, concrete engine, and its declared
/// capabilities/version/availability snapshotted for `/engines`.
pub struct RegistryEntry {
    pub name: String,
    pub engine: Arc<dyn Engine>,
}

/// How engines were selected for one `/validate` request, carried through
/// for the request log line (§4.5 "Logging").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Explicit,
    Consensus,
    Default,
}

/// Errors the dispatcher can report back to the wire adapter for engine
/// selection and routing — distinct from engine-plane errors (§7).
#[derive(Debug, Clone)]
pub enum DispatchError {
    UnknownEngine(Vec<String>),
    NoEngines,
    EngineUnavailable(String),
    NotImplemented(String, &'static str),
}

/// The engine registry and validate worker pool, built once at startup and
/// treated as read-only afterward (§5 "Shared resources").
pub struct Dispatcher {
    entries: Vec<RegistryEntry>,
    index: HashMap<String, usize>,
    default_engine: Option<String>,
    pool: WorkerPool,
}

impl Dispatcher {
    /// Build a registry from already-constructed engines (construction
    /// failures are handled by the caller per §4.5's guarded-region rule:
    /// log and omit, never abort startup). `default_override` is the
    /// `CAS_DEFAULT_ENGINE` configuration value, if any.
    pub fn new(engines: Vec<(String, Arc<dyn Engine>)>, default_override: Option<&str>) -> Self {
        let mut index = HashMap::with_capacity(engines.len());
        let entries: Vec<RegistryEntry> = engines
            .into_iter()
            .enumerate()
            .map(|(i, (name, engine))| {
                index.insert(name.clone(), i);
                RegistryEntry { name, engine }
            })
            .collect();

        let default_engine = pick_default(&entries, &index, default_override);
        let pool_size = entries.len().max(2);

        Self {
            entries,
            index,
            default_engine,
            pool: WorkerPool::new(pool_size),
        }
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn default_engine(&self) -> Option<&str> {
        self.default_engine.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Engine>> {
        self.index.get(name).map(|&i| &self.entries[i].engine)
    }

    pub fn available_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Resolve which engines to validate against (§4.5 "Engine selection
    /// for validate").
    pub fn select_validate_engines(
        &self,
        explicit: Option<&[String]>,
        consensus: bool,
    ) -> Result<(Vec<String>, Selection), DispatchError> {
        if let Some(names) = explicit {
            let unknown: Vec<String> = names.iter().filter(|n| !self.index.contains_key(*n)).cloned().collect();
            if !unknown.is_empty() {
                return Err(DispatchError::UnknownEngine(unknown));
            }
            return Ok((names.to_vec(), Selection::Explicit));
        }

        if consensus {
            let names: Vec<String> = self
                .entries
                .iter()
                .filter(|e| e.engine.capabilities().contains(&Capability::Validate) && e.engine.is_available())
                .map(|e| e.name.clone())
                .collect();
            return Ok((names, Selection::Consensus));
        }

        let names = self.default_engine.clone().into_iter().collect::<Vec<_>>();
        Ok((names, Selection::Default))
    }

    /// Validate `preprocessed` against every engine in `selection`,
    /// preserving selection order in the result list regardless of
    /// completion order (§4.5 "Parallel validate", invariant 3, S11, S12).
    pub fn validate(&self, selection: &[String], preprocessed: &str) -> Vec<EngineResult> {
        if selection.len() <= 1 {
            return selection.iter().map(|name| self.validate_one(name, preprocessed)).collect();
        }

        let (tx, rx) = bounded::<(usize, EngineResult)>(selection.len());
        for (i, name) in selection.iter().enumerate() {
            let engine = self.get(name).cloned();
            let name = name.clone();
            let preprocessed = preprocessed.to_string();
            let tx = tx.clone();
            self.pool.submit(move || {
                let result = validate_one_isolated(engine, &name, &preprocessed);
                let _ = tx.send((i, result));
            });
        }
        drop(tx);

        let mut by_index: HashMap<usize, EngineResult> = HashMap::with_capacity(selection.len());
        for _ in 0..selection.len() {
            if let Ok((i, result)) = rx.recv() {
                by_index.insert(i, result);
            }
        }

        (0..selection.len())
            .map(|i| {
                by_index.remove(&i).unwrap_or_else(|| EngineResult::failed(&selection[i], "engine produced no result", 0))
            })
            .collect()
    }

    fn validate_one(&self, name: &str, preprocessed: &str) -> EngineResult {
        validate_one_isolated(self.get(name).cloned(), name, preprocessed)
    }

    /// Route a compute request to exactly one engine, checking existence,
    /// capability, and availability in that order (§4.5 "Compute").
    pub fn compute(&self, request: &ComputeRequest) -> Result<ComputeResult, DispatchError> {
        let Some(engine) = self.get(&request.engine) else {
            return Err(DispatchError::UnknownEngine(vec![request.engine.clone()]));
        };
        if !engine.capabilities().contains(&Capability::Compute) {
            return Err(DispatchError::NotImplemented(request.engine.clone(), "compute"));
        }
        if !engine.is_available() {
            return Err(DispatchError::EngineUnavailable(request.engine.clone()));
        }
        Ok(engine.compute(request))
    }
}

/// Run one engine's `validate`, catching panics so a misbehaving engine
/// never corrupts sibling results (§4.5, §7 "Propagation policy").
fn validate_one_isolated(engine: Option<Arc<dyn Engine>>, name: &str, preprocessed: &str) -> EngineResult {
    let start = Instant::now();
    let Some(engine) = engine else {
        return EngineResult::failed(name, "unknown engine", 0);
    };

    let preprocessed = preprocessed.to_string();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| engine.validate(&preprocessed)));
    match result {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(&panic);
            EngineResult::failed(name, message, start.elapsed().as_millis() as u64)
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "engine panicked".to_string()
    }
}

/// Default engine rule (§3 "Default engine"): explicit override if present
/// and available, else the first of a preferred-order list that is present,
/// available, and supports validate, else none.
fn pick_default(entries: &[RegistryEntry], index: &HashMap<String, usize>, default_override: Option<&str>) -> Option<String> {
    if let Some(name) = default_override {
        if let Some(&i) = index.get(name) {
            if entries[i].engine.is_available() {
                return Some(name.to_string());
            }
        }
    }

    const PREFERRED_ORDER: &[&str] = &["symbolic", "maxima", "octave"];
    for candidate in PREFERRED_ORDER {
        if let Some(&i) = index.get(*candidate) {
            let entry = &entries[i];
            if entry.engine.capabilities().contains(&Capability::Validate) && entry.engine.is_available() {
                return Some(entry.name.clone());
            }
        }
    }

    entries
        .iter()
        .find(|e| e.engine.capabilities().contains(&Capability::Validate) && e.engine.is_available())
        .map(|e| e.name.clone())
}

/// Bounded worker pool backing parallel validate (§5 "Shared resources"):
/// sized to engine count (minimum 2), created once, shut down
/// non-gracefully at process exit by dropping the channel sender, which
/// unblocks every worker's receive loop.
struct WorkerPool {
    sender: Sender<Job>,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

impl WorkerPool {
    fn new(size: usize) -> Self {
        let (sender, receiver) = bounded::<Job>(size.max(1) * 4);
        for _ in 0..size {
            let receiver = receiver.clone();
            std::thread::spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            });
        }
        Self { sender }
    }

    fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.sender.send(Box::new(job));
    }
}

/// Truncate `text` to `n` bytes at a char boundary, for the request log's
/// expression prefix (§9 Open Question: length is operational, not
/// load-bearing).
pub fn log_prefix(text: &str, n: usize) -> &str {
    if text.len() <= n {
        return text;
    }
    let mut end = n;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration as StdDuration;

    struct DelayEngine {
        name: &'static str,
        delay: StdDuration,
        caps: &'static [Capability],
        panics: bool,
    }

    impl Engine for DelayEngine {
        fn name(&self) -> &str {
            self.name
        }
        fn capabilities(&self) -> &'static [Capability] {
            self.caps
        }
        fn is_available(&self) -> bool {
            true
        }
        fn version(&self) -> String {
            "1".to_string()
        }
        fn validate(&self, _expression: &str) -> EngineResult {
            if self.panics {
                panic!("boom");
            }
            std::thread::sleep(self.delay);
            EngineResult::ok(self.name, Some(true), Some("ok".to_string()), 0)
        }
    }

    fn engine(name: &'static str, delay_ms: u64, panics: bool) -> (String, Arc<dyn Engine>) {
        (
            name.to_string(),
            Arc::new(DelayEngine {
                name,
                delay: StdDuration::from_millis(delay_ms),
                caps: &[Capability::Validate],
                panics,
            }),
        )
    }

    #[test]
    fn default_engine_prefers_configured_order() {
        let dispatcher = Dispatcher::new(vec![engine("octave", 0, false), engine("symbolic", 0, false)], None);
        assert_eq!(dispatcher.default_engine(), Some("symbolic"));
    }

    #[test]
    fn default_engine_honors_override() {
        let dispatcher = Dispatcher::new(vec![engine("octave", 0, false), engine("symbolic", 0, false)], Some("octave"));
        assert_eq!(dispatcher.default_engine(), Some("octave"));
    }

    #[test]
    fn select_explicit_rejects_unknown_engine() {
        let dispatcher = Dispatcher::new(vec![engine("symbolic", 0, false)], None);
        let err = dispatcher
            .select_validate_engines(Some(&["nosuch".to_string()]), false)
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownEngine(names) if names == vec!["nosuch".to_string()]));
    }

    #[test]
    fn select_consensus_returns_all_available_validate_engines() {
        let dispatcher = Dispatcher::new(vec![engine("a", 0, false), engine("b", 0, false)], None);
        let (names, mode) = dispatcher.select_validate_engines(None, true).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(mode, Selection::Consensus);
    }

    #[test]
    fn parallel_validate_preserves_selection_order_s11() {
        // S11: slow engine first, fast engine second — response order
        // must match selection order, not completion order.
        let dispatcher = Dispatcher::new(vec![engine("slow", 150, false), engine("fast", 0, false)], None);
        let selection = vec!["slow".to_string(), "fast".to_string()];
        let results = dispatcher.validate(&selection, "x");
        assert_eq!(results[0].engine, "slow");
        assert_eq!(results[1].engine, "fast");
    }

    #[test]
    fn parallel_validate_isolates_panicking_engine_s12() {
        // S12: first engine panics, second succeeds — the panic must not
        // void the sibling result.
        let dispatcher = Dispatcher::new(vec![engine("broken", 0, true), engine("ok", 0, false)], None);
        let selection = vec!["broken".to_string(), "ok".to_string()];
        let results = dispatcher.validate(&selection, "x");
        assert!(!results[0].success);
        assert!(results[1].success);
    }

    #[test]
    fn compute_reports_unknown_engine() {
        let dispatcher = Dispatcher::new(vec![], None);
        let request = ComputeRequest {
            engine: "nosuch".to_string(),
            template: "t".to_string(),
            inputs: HashMap::new(),
            timeout_s: 5.0,
        };
        assert!(matches!(dispatcher.compute(&request), Err(DispatchError::UnknownEngine(_))));
    }

    #[test]
    fn compute_reports_not_implemented_without_capability() {
        let dispatcher = Dispatcher::new(vec![engine("validate-only", 0, false)], None);
        let request = ComputeRequest {
            engine: "validate-only".to_string(),
            template: "t".to_string(),
            inputs: HashMap::new(),
            timeout_s: 5.0,
        };
        assert!(matches!(dispatcher.compute(&request), Err(DispatchError::NotImplemented(_, "compute"))));
    }

    #[test]
    fn log_prefix_truncates_at_char_boundary() {
        assert_eq!(log_prefix("hello world", 5), "hello");
        assert_eq!(log_prefix("hi", 50), "hi");
    }

    #[test]
    fn no_engines_selection_is_empty_not_an_error() {
        let dispatcher = Dispatcher::new(vec![], None);
        let (names, mode) = dispatcher.select_validate_engines(None, false).unwrap();
        assert!(names.is_empty());
        assert_eq!(mode, Selection::Default);
    }

    #[test]
    fn worker_pool_runs_submitted_jobs() {
        let counter = Arc::new(AtomicU64::new(0));
        let pool = WorkerPool::new(2);
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        std::thread::sleep(StdDuration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
