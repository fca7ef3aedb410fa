//! End-to-end registration scenarios against an in-process fake site.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use deployer::core::registry::{
    DYNAMIC_ROUTE, MANUAL_CONFIG, PROXY_BASIC, SHARED_FILE_SECTION, STATIC_FILE,
    STATIC_WITH_FALLBACK_RULE,
};
use deployer::core::types::{DeploymentStatus, StrategyState};
use deployer::executor::Executor;
use deployer::io::config::DeployerConfig;
use deployer::io::http::{HttpClient, HttpRequest};
use deployer::io::store::{MemoryStore, load_strategy_state, save_strategy_state};
use deployer::manager::{EndpointManager, SwitchTarget};
use deployer::test_support::{
    FakeSite, TestSite, apache_profile, json_endpoint, proxy_endpoint, section_endpoint,
    test_signals,
};

fn manager(site: &TestSite, web: &Arc<FakeSite>) -> EndpointManager<MemoryStore> {
    manager_with(site, web, site.config())
}

fn manager_with(
    site: &TestSite,
    web: &Arc<FakeSite>,
    config: DeployerConfig,
) -> EndpointManager<MemoryStore> {
    EndpointManager::new(
        config,
        Arc::clone(web) as Arc<dyn HttpClient>,
        MemoryStore::new(),
        site.dispatcher.clone(),
        test_signals(),
    )
}

fn fetch(web: &FakeSite, path: &str) -> (u16, String) {
    let response = web
        .send(&HttpRequest::get(
            format!("http://site.test{path}"),
            Duration::from_secs(1),
        ))
        .expect("response");
    (
        response.status,
        String::from_utf8_lossy(&response.body).into_owned(),
    )
}

#[test]
fn writable_filesystem_deploys_static_file_at_rank_zero() {
    let site = TestSite::new();
    let web = Arc::new(site.fake_site());
    web.set_dynamic_enabled(false);
    let manager = manager(&site, &web);

    let state = manager
        .register(json_endpoint("/discovery.json", r#"{"v":1}"#))
        .expect("register");

    assert_eq!(state.status, DeploymentStatus::StaticDeployed);
    assert_eq!(state.current_strategy.as_deref(), Some(STATIC_FILE));
    assert_eq!(state.current_strategy_rank, 0);
    assert!(!state.alternates_also_work);
    assert_eq!(
        fs::read_to_string(site.root().join("discovery.json")).expect("read"),
        r#"{"v":1}"#
    );
    assert_eq!(fetch(&web, "/discovery.json"), (200, r#"{"v":1}"#.to_string()));
}

#[test]
fn read_only_filesystem_falls_back_to_dynamic_route() {
    let mut site = TestSite::new();
    site.make_docroot_unwritable();
    let web = Arc::new(site.fake_site());
    let manager = manager(&site, &web);

    let state = manager
        .register(json_endpoint("/discovery.json", r#"{"v":1}"#))
        .expect("register");

    assert_eq!(state.status, DeploymentStatus::DynamicDeployed);
    assert_eq!(state.current_strategy.as_deref(), Some(DYNAMIC_ROUTE));
    assert_eq!(state.current_strategy_rank, 1);
    assert!(!state.alternates_also_work);
    assert_eq!(fetch(&web, "/discovery.json"), (200, r#"{"v":1}"#.to_string()));
}

#[test]
fn failing_rewrite_rule_rolls_back_and_persists_failed() {
    let site = TestSite::new().with_rewrite_config();
    site.break_rewrite_config();
    let web = Arc::new(site.fake_site());
    let mut config = site.config();
    config.probe.declared_server = Some("Apache/2.4.62".to_string());
    let manager = manager_with(&site, &web, config);

    manager
        .register(json_endpoint("/discovery.json", r#"{"v":1}"#))
        .expect("register");
    let state = manager
        .switch(
            "/discovery.json",
            SwitchTarget::Named(STATIC_WITH_FALLBACK_RULE.to_string()),
        )
        .expect("switch");

    assert_eq!(state.status, DeploymentStatus::Failed);
    assert_eq!(state.current_strategy.as_deref(), Some(STATIC_WITH_FALLBACK_RULE));
    assert_eq!(state.current_strategy_rank, 2);
    assert!(state.needs_manual_intervention());
    let reason = state.last_error.as_deref().expect("reason");
    assert!(reason.contains("config_unwritable"), "{reason}");
    assert!(!site.root().join("discovery.json").exists());
}

#[test]
fn switch_next_moves_failed_rank_zero_to_dynamic_route() {
    let site = TestSite::new();
    let web = Arc::new(site.fake_site());
    let manager = manager(&site, &web);
    let endpoint = json_endpoint("/discovery.json", r#"{"v":1}"#);
    manager.adopt(endpoint);
    save_strategy_state(
        manager.store(),
        &StrategyState {
            endpoint_path: "/discovery.json".to_string(),
            status: DeploymentStatus::Failed,
            current_strategy: Some(STATIC_FILE.to_string()),
            current_strategy_rank: 0,
            last_tested_at: Utc::now(),
            alternates_also_work: false,
            last_error: Some("static_file failed".to_string()),
            suggestion: None,
        },
    )
    .expect("seed state");

    let state = manager
        .switch("/discovery.json", SwitchTarget::Next)
        .expect("switch");

    assert_eq!(state.status, DeploymentStatus::DynamicDeployed);
    assert_eq!(state.current_strategy.as_deref(), Some(DYNAMIC_ROUTE));
    assert_eq!(state.current_strategy_rank, 1);
    // Static delivery round-trips on this site, so the alternate is recorded.
    assert!(state.alternates_also_work);
    assert!(state.last_error.is_none());
    assert!(site.dispatcher.handles("/discovery.json"));
}

#[test]
fn shared_section_appended_twice_appears_once() {
    let site = TestSite::new();
    let robots = site.root().join("robots.txt");
    fs::write(&robots, "User-agent: *\n").expect("write");
    let endpoint = section_endpoint("/llms-policy", "/robots.txt", "Allow: /llms.txt\n");
    let content = endpoint.generate().expect("content");
    let profile = apache_profile();

    for _ in 0..2 {
        let result = Executor::run(SHARED_FILE_SECTION, &endpoint, &content, site.env(&profile))
            .expect("known strategy");
        assert!(result.success);
    }

    let text = fs::read_to_string(&robots).expect("read");
    assert!(text.starts_with("User-agent: *\n"));
    assert_eq!(text.matches("Allow: /llms.txt").count(), 1);
}

#[test]
fn unreachable_site_records_failed_with_manual_config() {
    let site = TestSite::new();
    let web = Arc::new(site.fake_site());
    web.set_unreachable(true);
    let manager = manager(&site, &web);

    let state = manager
        .register(json_endpoint("/.well-known/ai.json", "{}"))
        .expect("register");

    assert_eq!(state.status, DeploymentStatus::Failed);
    assert_eq!(state.current_strategy.as_deref(), Some(MANUAL_CONFIG));
    assert!(state.needs_manual_intervention());
    let reason = state.last_error.as_deref().expect("reason");
    assert!(reason.contains("no delivery approach round-tripped"), "{reason}");
    let suggestion = state.suggestion.expect("suggestion");
    assert!(suggestion.contains("/.well-known/ai.json"), "{suggestion}");
    assert!(!site.root().join(".well-known").exists());

    let rows = manager.status().expect("status");
    assert_eq!(rows.len(), 1);
    assert!(rows[0].needs_attention);
    assert_eq!(rows[0].label(), "manual intervention required");
}

#[test]
fn site_serving_nothing_records_failed_with_suggestion() {
    let site = TestSite::new();
    let web = Arc::new(site.fake_site());
    web.set_static_enabled(false);
    web.set_dynamic_enabled(false);
    let manager = manager(&site, &web);

    let state = manager
        .register(json_endpoint("/discovery.json", r#"{"v":1}"#))
        .expect("register");

    assert_eq!(state.status, DeploymentStatus::Failed);
    assert_eq!(state.current_strategy.as_deref(), Some(MANUAL_CONFIG));
    assert!(state.suggestion.is_some());
    assert!(!site.root().join("discovery.json").exists());
    assert!(!site.dispatcher.handles("/discovery.json"));
    let rows = manager.status().expect("status");
    assert_eq!(rows[0].label(), "manual intervention required");
}

#[test]
fn failed_fallback_rule_keeps_file_that_was_already_served() {
    let site = TestSite::new().with_rewrite_config();
    fs::write(site.root().join("discovery.json"), r#"{"v":1}"#).expect("write");
    site.break_rewrite_config();
    let before = site.snapshot();
    let endpoint = json_endpoint("/discovery.json", r#"{"v":1}"#);
    let content = endpoint.generate().expect("content");
    let profile = apache_profile();

    let result = Executor::run(STATIC_WITH_FALLBACK_RULE, &endpoint, &content, site.env(&profile))
        .expect("known strategy");

    assert!(!result.success);
    assert_eq!(site.snapshot(), before);
}

#[test]
fn proxy_endpoint_forwards_to_upstream() {
    let site = TestSite::new();
    let web = Arc::new(site.fake_site());
    let manager = manager(&site, &web);

    let state = manager
        .register(proxy_endpoint("/api/chat", "http://upstream.test/v1/chat"))
        .expect("register");

    assert_eq!(state.current_strategy.as_deref(), Some(PROXY_BASIC));
    assert_eq!(state.status, DeploymentStatus::DynamicDeployed);
    assert!(!site.root().join("api").exists());
    assert_eq!(fetch(&web, "/api/chat"), (200, r#"{"upstream":true}"#.to_string()));
}

#[test]
fn unregister_removes_artifacts_and_state() {
    let site = TestSite::new();
    let web = Arc::new(site.fake_site());
    let manager = manager(&site, &web);
    manager
        .register(json_endpoint("/.well-known/ai.json", r#"{"v":1}"#))
        .expect("register");
    assert!(site.root().join(".well-known/ai.json").exists());

    manager.unregister("/.well-known/ai.json").expect("unregister");

    assert!(!site.root().join(".well-known/ai.json").exists());
    assert!(
        load_strategy_state(manager.store(), "/.well-known/ai.json")
            .expect("load")
            .is_none()
    );
    assert!(manager.status().expect("status").is_empty());
}

#[test]
fn unknown_named_switch_changes_nothing() {
    let site = TestSite::new();
    let web = Arc::new(site.fake_site());
    let manager = manager(&site, &web);
    let before = manager
        .register(json_endpoint("/discovery.json", r#"{"v":1}"#))
        .expect("register");

    let err = manager
        .switch("/discovery.json", SwitchTarget::Named("teleport".to_string()))
        .unwrap_err();
    assert!(format!("{err:#}").contains("unknown strategy 'teleport'"));

    let after = load_strategy_state(manager.store(), "/discovery.json")
        .expect("load")
        .expect("state");
    assert_eq!(after, before);
    assert!(site.root().join("discovery.json").exists());
}

#[test]
fn concurrent_registrations_leave_one_state() {
    let site = TestSite::new();
    let web = Arc::new(site.fake_site());
    let manager = Arc::new(manager(&site, &web));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                manager
                    .register(json_endpoint("/discovery.json", r#"{"v":1}"#))
                    .expect("register")
            })
        })
        .collect();
    for handle in handles {
        let state = handle.join().expect("thread");
        assert_eq!(state.current_strategy.as_deref(), Some(STATIC_FILE));
    }

    assert_eq!(manager.status().expect("status").len(), 1);
    assert_eq!(
        fs::read_to_string(site.root().join("discovery.json")).expect("read"),
        r#"{"v":1}"#
    );
}
