//! Endpoint manager: probe, rank, execute, persist, and switch strategies.
//!
//! Every mutating operation holds a per-endpoint lock, so two activation
//! triggers for the same path run one after the other. Operations on
//! different endpoints do not block each other.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::lifecycle::{EndpointPhase, PhaseEvent, transition};
use crate::core::ranking::{ApproachTruth, rank_strategies};
use crate::core::registry::{MANUAL_CONFIG, next_rank, preference_list, rank_of, resolve};
use crate::core::types::{
    DeploymentStatus, ExecutionResult, RouteTestReport, ServerProfile, StrategyState,
};
use crate::dispatch::Dispatcher;
use crate::endpoint::{Content, Endpoint};
use crate::executor::{DeployEnv, Executor};
use crate::io::config::DeployerConfig;
use crate::io::http::HttpClient;
use crate::io::store::{
    StateStore, delete_strategy_state, list_strategy_states, load_strategy_state,
    save_strategy_state,
};
use crate::probe::{EnvironmentProbe, Signals};
use crate::route_test::RouteTester;
use crate::status::{EndpointStatus, LastProbe};

/// Strategy to move to on `switch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchTarget {
    /// Next entry of the kind's preference list, wrapping around.
    Next,
    Named(String),
}

/// Per-endpoint result of a lifecycle hook.
#[derive(Debug)]
pub struct HookOutcome<T> {
    pub path: String,
    pub result: Result<T>,
}

pub struct EndpointManager<S: StateStore> {
    config: DeployerConfig,
    client: Arc<dyn HttpClient>,
    store: S,
    dispatcher: Dispatcher,
    signals: Signals,
    endpoints: Mutex<BTreeMap<String, Endpoint>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    phases: Mutex<HashMap<String, EndpointPhase>>,
    reports: Mutex<HashMap<String, RouteTestReport>>,
}

impl<S: StateStore> EndpointManager<S> {
    pub fn new(
        config: DeployerConfig,
        client: Arc<dyn HttpClient>,
        store: S,
        dispatcher: Dispatcher,
        signals: Signals,
    ) -> Self {
        Self {
            config,
            client,
            store,
            dispatcher,
            signals,
            endpoints: Mutex::new(BTreeMap::new()),
            locks: Mutex::new(HashMap::new()),
            phases: Mutex::new(HashMap::new()),
            reports: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fresh environment profile. Never cached.
    pub fn probe_environment(&self) -> ServerProfile {
        EnvironmentProbe::new(&self.config.site, &self.config.probe, &self.signals).probe()
    }

    /// Make an endpoint definition known without deploying it.
    pub fn adopt(&self, endpoint: Endpoint) {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        endpoints.insert(endpoint.path.clone(), endpoint);
    }

    pub fn endpoint(&self, path: &str) -> Option<Endpoint> {
        let endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        endpoints.get(path).cloned()
    }

    /// Probe, test, rank, execute the top candidate, and persist the outcome.
    ///
    /// A failed run is persisted as `failed` and returned; no other strategy
    /// is tried until an administrator switches.
    #[instrument(skip_all, fields(path = %endpoint.path, kind = endpoint.kind.as_str()))]
    pub fn register(&self, endpoint: Endpoint) -> Result<StrategyState> {
        let lock = self.endpoint_lock(&endpoint.path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.adopt(endpoint.clone());

        let previous = load_strategy_state(&self.store, &endpoint.path)?;
        self.advance(&endpoint.path, previous.as_ref(), PhaseEvent::Register)?;
        let outcome = self.register_locked(&endpoint, previous.as_ref());
        self.settle(&endpoint.path, &outcome);
        outcome
    }

    fn register_locked(
        &self,
        endpoint: &Endpoint,
        previous: Option<&StrategyState>,
    ) -> Result<StrategyState> {
        if let Some(previous) = previous {
            self.teardown_active(endpoint, previous);
        }

        let profile = self.probe_environment();
        let content = match endpoint.generate() {
            Ok(content) => content,
            Err(err) => return self.persist_generator_failure(endpoint, previous, &err),
        };
        let report = self.route_tester().test(endpoint, &content);

        let truth = ApproachTruth {
            static_file: report.static_file.success,
            dynamic_route: report.dynamic_route.success,
        };
        let ranked = rank_strategies(endpoint.kind, &profile, truth);
        let (name, rank) = match ranked.first() {
            Some(top) => (top.name, top.rank),
            None => {
                info!("no approach round-tripped, recording manual config");
                let rank = rank_of(endpoint.kind, MANUAL_CONFIG).unwrap_or(0);
                (MANUAL_CONFIG, rank)
            }
        };
        self.execute(endpoint, &content, &profile, report, name, rank)
    }

    /// Move to another strategy after re-probing.
    #[instrument(skip_all, fields(path = %path, target = ?target))]
    pub fn switch(&self, path: &str, target: SwitchTarget) -> Result<StrategyState> {
        let endpoint = self
            .endpoint(path)
            .ok_or_else(|| anyhow!("endpoint {path} is not registered"))?;
        let lock = self.endpoint_lock(path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = load_strategy_state(&self.store, path)?
            .ok_or_else(|| anyhow!("endpoint {path} has no strategy state"))?;
        let (name, rank) = match &target {
            SwitchTarget::Next => {
                let rank = next_rank(endpoint.kind, current.current_strategy_rank);
                (preference_list(endpoint.kind)[rank], rank)
            }
            SwitchTarget::Named(name) => {
                let strategy = resolve(name)?;
                let rank = rank_of(endpoint.kind, strategy.name).ok_or_else(|| {
                    anyhow!(
                        "strategy '{}' does not apply to {} endpoints",
                        strategy.name,
                        endpoint.kind.as_str()
                    )
                })?;
                (strategy.name, rank)
            }
        };

        self.advance(path, Some(&current), PhaseEvent::Switch)?;
        let outcome = self.switch_locked(&endpoint, &current, name, rank);
        self.settle(path, &outcome);
        outcome
    }

    fn switch_locked(
        &self,
        endpoint: &Endpoint,
        current: &StrategyState,
        name: &'static str,
        rank: usize,
    ) -> Result<StrategyState> {
        info!(from = ?current.current_strategy, to = name, rank, "switching strategy");
        self.teardown_active(endpoint, current);
        let profile = self.probe_environment();
        let content = match endpoint.generate() {
            Ok(content) => content,
            Err(err) => return self.persist_generator_failure(endpoint, Some(current), &err),
        };
        let report = self.route_tester().test(endpoint, &content);
        self.execute(endpoint, &content, &profile, report, name, rank)
    }

    /// Tear down the active strategy and forget the endpoint.
    #[instrument(skip_all, fields(path = %path))]
    pub fn unregister(&self, path: &str) -> Result<()> {
        let lock = self.endpoint_lock(path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let state = load_strategy_state(&self.store, path)?;
        let endpoint = self.endpoint(path);
        if let (Some(state), Some(endpoint)) = (&state, &endpoint) {
            self.teardown_active(endpoint, state);
        } else if state.is_some() {
            warn!("no endpoint definition, dropping state without cleanup");
        }
        delete_strategy_state(&self.store, path)?;

        if state.is_some() {
            self.advance(path, state.as_ref(), PhaseEvent::Remove)?;
        }
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        info!("endpoint unregistered");
        Ok(())
    }

    /// Re-apply persisted deployed strategies without re-probing.
    ///
    /// Returns the paths that have no usable state (none, or `failed`) and
    /// still need `register`.
    #[instrument(skip_all, fields(count = endpoints.len()))]
    pub fn restore(&self, endpoints: Vec<Endpoint>) -> Result<Vec<String>> {
        let profile = self.probe_environment();
        let mut pending = Vec::new();
        for endpoint in endpoints {
            let path = endpoint.path.clone();
            let lock = self.endpoint_lock(&path);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.adopt(endpoint.clone());

            let Some(mut state) = load_strategy_state(&self.store, &path)? else {
                pending.push(path);
                continue;
            };
            let Some(strategy) = state.current_strategy.clone() else {
                pending.push(path);
                continue;
            };
            if !state.status.is_deployed() {
                pending.push(path);
                continue;
            }

            let content = match endpoint.generate() {
                Ok(content) => content,
                Err(err) => {
                    warn!(path = %path, err = %err, "cannot restore, generator failed");
                    pending.push(path);
                    continue;
                }
            };
            let result = match Executor::run(&strategy, &endpoint, &content, self.env(&profile)) {
                Ok(result) => result,
                Err(err) => {
                    warn!(path = %path, err = %err, "persisted strategy is unknown");
                    pending.push(path);
                    continue;
                }
            };
            if !result.success {
                state.status = DeploymentStatus::Failed;
                state.last_error = Some(describe_failure(&result));
                save_strategy_state(&self.store, &state)?;
                warn!(path = %path, strategy, "restore failed");
            }
            self.set_phase(&path, state.status.into());
        }
        Ok(pending)
    }

    /// Register every endpoint once.
    pub fn activate(&self, endpoints: Vec<Endpoint>) -> Vec<HookOutcome<StrategyState>> {
        endpoints
            .into_iter()
            .map(|endpoint| {
                let path = endpoint.path.clone();
                let result = self.register(endpoint);
                if let Err(err) = &result {
                    warn!(path = %path, err = %err, "activation failed");
                }
                HookOutcome { path, result }
            })
            .collect()
    }

    /// Unregister every known endpoint.
    pub fn deactivate(&self) -> Result<Vec<HookOutcome<()>>> {
        let mut paths: BTreeSet<String> = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for state in list_strategy_states(&self.store)? {
            paths.insert(state.endpoint_path);
        }
        Ok(paths
            .into_iter()
            .map(|path| {
                let result = self.unregister(&path);
                HookOutcome { path, result }
            })
            .collect())
    }

    /// Read model over persisted state plus known, unregistered endpoints.
    pub fn status(&self) -> Result<Vec<EndpointStatus>> {
        let endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let reports = self
            .reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut rows = Vec::new();
        let mut seen = BTreeSet::new();
        for state in list_strategy_states(&self.store)? {
            let path = state.endpoint_path.clone();
            let kind = endpoints.get(&path).map(|endpoint| endpoint.kind);
            let phase = self.phase(&path, Some(&state));
            let last_probe = reports.get(&path).map(|report| LastProbe {
                static_file: report.static_file.clone(),
                dynamic_route: report.dynamic_route.clone(),
            });
            rows.push(EndpointStatus::from_state(&state, kind, phase, last_probe));
            seen.insert(path);
        }
        for (path, endpoint) in &endpoints {
            if !seen.contains(path) {
                rows.push(EndpointStatus::pending(
                    path,
                    endpoint.kind,
                    self.phase(path, None),
                ));
            }
        }
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(rows)
    }

    fn execute(
        &self,
        endpoint: &Endpoint,
        content: &Content,
        profile: &ServerProfile,
        report: RouteTestReport,
        name: &str,
        rank: usize,
    ) -> Result<StrategyState> {
        self.advance(&endpoint.path, None, PhaseEvent::Execute)?;
        let result = Executor::run(name, endpoint, content, self.env(profile))?;

        let strategy = resolve(name)?;
        let status = if result.success {
            strategy.deployed_status()
        } else {
            DeploymentStatus::Failed
        };
        let alternates_also_work = strategy
            .approach()
            .is_some_and(|approach| report.round_trips(approach.other()));
        let state = StrategyState {
            endpoint_path: endpoint.path.clone(),
            status,
            current_strategy: Some(name.to_string()),
            current_strategy_rank: rank,
            last_tested_at: report.tested_at,
            alternates_also_work,
            last_error: if !result.success {
                Some(describe_failure(&result))
            } else if strategy.approach().is_none() {
                Some(nothing_deployed_reason(name, &report))
            } else {
                None
            },
            suggestion: result.detail().map(str::to_string),
        };
        save_strategy_state(&self.store, &state)
            .with_context(|| format!("persist strategy state for {}", endpoint.path))?;
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint.path.clone(), report);
        info!(
            strategy = name,
            rank,
            status = status.as_str(),
            alternates_also_work,
            "strategy state persisted"
        );
        Ok(state)
    }

    fn persist_generator_failure(
        &self,
        endpoint: &Endpoint,
        previous: Option<&StrategyState>,
        err: &anyhow::Error,
    ) -> Result<StrategyState> {
        warn!(err = %err, "content generator failed, nothing deployed");
        let state = StrategyState {
            endpoint_path: endpoint.path.clone(),
            status: DeploymentStatus::Failed,
            current_strategy: previous.and_then(|state| state.current_strategy.clone()),
            current_strategy_rank: previous.map_or(0, |state| state.current_strategy_rank),
            last_tested_at: chrono::Utc::now(),
            alternates_also_work: false,
            last_error: Some(format!("{err:#}")),
            suggestion: None,
        };
        save_strategy_state(&self.store, &state)?;
        Ok(state)
    }

    fn teardown_active(&self, endpoint: &Endpoint, state: &StrategyState) {
        let Some(strategy) = state.current_strategy.as_deref() else {
            return;
        };
        let profile = ServerProfile::unknown();
        match Executor::teardown(strategy, endpoint, self.env(&profile)) {
            Ok(summary) => {
                for failure in &summary.failures {
                    warn!(err = %failure, "teardown left an artifact behind");
                }
            }
            Err(err) => warn!(err = %err, "persisted strategy is unknown, nothing to tear down"),
        }
    }

    fn route_tester(&self) -> RouteTester<'_> {
        RouteTester::new(
            self.client.as_ref(),
            &self.config.site,
            &self.dispatcher,
            self.config.http.timeout(),
        )
    }

    fn env<'a>(&'a self, profile: &'a ServerProfile) -> DeployEnv<'a> {
        DeployEnv {
            site: &self.config.site,
            profile,
            dispatcher: &self.dispatcher,
        }
    }

    fn endpoint_lock(&self, path: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(path.to_string()).or_default())
    }

    /// In-memory phase, else derived from persisted state.
    fn phase(&self, path: &str, state: Option<&StrategyState>) -> EndpointPhase {
        let phases = self.phases.lock().unwrap_or_else(PoisonError::into_inner);
        match (phases.get(path), state) {
            (Some(phase), _) => *phase,
            (None, Some(state)) => state.status.into(),
            (None, None) => EndpointPhase::Unregistered,
        }
    }

    fn advance(
        &self,
        path: &str,
        state: Option<&StrategyState>,
        event: PhaseEvent,
    ) -> Result<EndpointPhase> {
        let current = self.phase(path, state);
        let next = transition(current, event).map_err(|err| anyhow!("{path}: {err}"))?;
        self.set_phase(path, next);
        Ok(next)
    }

    fn set_phase(&self, path: &str, phase: EndpointPhase) {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), phase);
    }

    /// Close the lifecycle after register/switch, whatever happened.
    fn settle(&self, path: &str, outcome: &Result<StrategyState>) {
        match outcome {
            Ok(state) => {
                let phase = self.phase(path, None);
                let event = PhaseEvent::Finish(state.status);
                match transition(phase, event) {
                    Ok(next) => self.set_phase(path, next),
                    Err(_) => self.set_phase(path, state.status.into()),
                }
            }
            Err(_) => self.set_phase(path, EndpointPhase::Failed),
        }
    }
}

fn nothing_deployed_reason(strategy: &str, report: &RouteTestReport) -> String {
    if report.static_file.success || report.dynamic_route.success {
        format!("{strategy} deploys nothing, apply the suggested config")
    } else {
        "no delivery approach round-tripped, apply the suggested config".to_string()
    }
}

fn describe_failure(result: &ExecutionResult) -> String {
    let mut message = match (result.blocks_failed.first(), result.failure()) {
        (Some(block), Some(err)) => format!("{} failed in {block}: {err}", result.strategy),
        _ => format!("{} failed", result.strategy),
    };
    for failure in &result.cleanup_summary.failures {
        message.push_str(&format!("; {failure}"));
    }
    message
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::core::registry::{DYNAMIC_ROUTE, STATIC_FILE};
    use crate::io::store::MemoryStore;
    use crate::test_support::{FakeSite, TestSite, counting_endpoint, json_endpoint, test_signals};

    fn manager(site: &TestSite, fake: Arc<FakeSite>) -> EndpointManager<MemoryStore> {
        EndpointManager::new(
            site.config(),
            fake,
            MemoryStore::new(),
            site.dispatcher.clone(),
            test_signals(),
        )
    }

    #[test]
    fn content_is_generated_once_per_registration() {
        let site = TestSite::new();
        let fake = Arc::new(site.fake_site());
        let manager = manager(&site, fake);
        let (endpoint, calls) = counting_endpoint("/discovery.json");

        let state = manager.register(endpoint).expect("register");
        assert_eq!(state.current_strategy.as_deref(), Some(STATIC_FILE));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reregistration_replaces_previous_strategy() {
        let site = TestSite::new();
        let fake = Arc::new(site.fake_site());
        let manager = manager(&site, fake.clone());

        fake.set_static_enabled(false);
        let first = manager
            .register(json_endpoint("/discovery.json", r#"{"v":1}"#))
            .expect("register");
        assert_eq!(first.current_strategy.as_deref(), Some(DYNAMIC_ROUTE));
        assert!(site.dispatcher.handles("/discovery.json"));

        fake.set_static_enabled(true);
        let second = manager
            .register(json_endpoint("/discovery.json", r#"{"v":1}"#))
            .expect("register");
        assert_eq!(second.current_strategy.as_deref(), Some(STATIC_FILE));
        assert!(!site.dispatcher.handles("/discovery.json"));
        assert_eq!(manager.status().expect("status").len(), 1);
    }

    #[test]
    fn switch_requires_known_endpoint() {
        let site = TestSite::new();
        let manager = manager(&site, Arc::new(site.fake_site()));
        assert!(manager.switch("/nope.json", SwitchTarget::Next).is_err());
    }

    #[test]
    fn named_switch_rejects_strategy_of_other_kind() {
        let site = TestSite::new();
        let manager = manager(&site, Arc::new(site.fake_site()));
        manager
            .register(json_endpoint("/discovery.json", r#"{"v":1}"#))
            .expect("register");
        let err = manager
            .switch(
                "/discovery.json",
                SwitchTarget::Named("proxy-basic".to_string()),
            )
            .unwrap_err();
        assert!(err.to_string().contains("does not apply"));
        let state = load_strategy_state(manager.store(), "/discovery.json")
            .expect("load")
            .expect("state");
        assert_eq!(state.current_strategy.as_deref(), Some(STATIC_FILE));
    }

    #[test]
    fn generator_failure_persists_failed() {
        let site = TestSite::new();
        let manager = manager(&site, Arc::new(site.fake_site()));
        let endpoint = Endpoint::document(
            "/broken.json",
            Arc::new(|| -> Result<Content> { Err(anyhow!("payload service down")) }),
        )
        .expect("endpoint");

        let state = manager.register(endpoint).expect("register");
        assert_eq!(state.status, DeploymentStatus::Failed);
        assert!(
            state
                .last_error
                .as_deref()
                .is_some_and(|err| err.contains("payload service down"))
        );
    }

    #[test]
    fn restore_rebinds_dynamic_routes_without_probing() {
        let site = TestSite::new();
        let fake = Arc::new(site.fake_site());
        fake.set_static_enabled(false);
        let store = MemoryStore::new();
        {
            let manager = EndpointManager::new(
                site.config(),
                fake.clone(),
                MemoryStore::new(),
                site.dispatcher.clone(),
                test_signals(),
            );
            let state = manager
                .register(json_endpoint("/discovery.json", r#"{"v":1}"#))
                .expect("register");
            save_strategy_state(&store, &state).expect("copy state");
        }
        site.dispatcher.unbind("/discovery.json");

        let restored = EndpointManager::new(
            site.config(),
            fake.clone(),
            store,
            site.dispatcher.clone(),
            test_signals(),
        );
        let requests_before = fake.request_count();
        let pending = restored
            .restore(vec![
                json_endpoint("/discovery.json", r#"{"v":1}"#),
                json_endpoint("/other.json", "{}"),
            ])
            .expect("restore");
        assert_eq!(pending, vec!["/other.json"]);
        assert!(site.dispatcher.handles("/discovery.json"));
        assert_eq!(fake.request_count(), requests_before);
    }

    #[test]
    fn restore_hands_failed_endpoints_back_for_registration() {
        let site = TestSite::new();
        let manager = manager(&site, Arc::new(site.fake_site()));
        save_strategy_state(
            manager.store(),
            &StrategyState {
                endpoint_path: "/discovery.json".to_string(),
                status: DeploymentStatus::Failed,
                current_strategy: Some(MANUAL_CONFIG.to_string()),
                current_strategy_rank: 4,
                last_tested_at: chrono::Utc::now(),
                alternates_also_work: false,
                last_error: Some("no delivery approach round-tripped".to_string()),
                suggestion: None,
            },
        )
        .expect("seed state");

        let pending = manager
            .restore(vec![json_endpoint("/discovery.json", r#"{"v":1}"#)])
            .expect("restore");
        assert_eq!(pending, vec!["/discovery.json"]);
    }

    #[test]
    fn deactivate_removes_every_endpoint() {
        let site = TestSite::new();
        let manager = manager(&site, Arc::new(site.fake_site()));
        let outcomes = manager.activate(vec![
            json_endpoint("/a.json", "{}"),
            json_endpoint("/b.json", "{}"),
        ]);
        assert!(outcomes.iter().all(|outcome| outcome.result.is_ok()));
        assert!(site.root().join("a.json").exists());

        let removed = manager.deactivate().expect("deactivate");
        assert_eq!(removed.len(), 2);
        assert!(!site.root().join("a.json").exists());
        assert!(manager.status().expect("status").is_empty());
        assert!(list_strategy_states(manager.store()).expect("list").is_empty());
    }
}
