//! End-to-end: relay, simulated pages with observers, and panel
//! controllers wired together in-process.

use std::sync::Arc;
use std::time::Duration;

use odd_devtools::cli::simulate::simulate;
use odd_devtools::cli::SimulateArgs;
use odd_devtools::sim::{AppRuntime, SimulatedBrowser, SimulatedPageBridge, SimulatedTab};
use odd_domain::config::Config;
use odd_domain::Error;
use odd_panel::{ConnectionError, NamespaceEntry, PanelController, PanelControllerBuilder};
use odd_protocol::{ChannelName, ConnectSnapshot, Envelope, EnvelopeKind, TabId};
use odd_relay::Relay;
use serde_json::{json, Map};

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

async fn open_panel(relay: &Relay, tab: &Arc<SimulatedTab>) -> Arc<PanelController> {
    let panel = PanelControllerBuilder::new(tab.tab_id())
        .opener(Arc::new(relay.clone()))
        .bridge(Arc::new(SimulatedPageBridge::new(tab.clone())))
        .build()
        .unwrap();
    panel.open().await.unwrap();
    panel
}

fn app() -> Option<AppRuntime> {
    Some(AppRuntime::new("app.example", "1.0"))
}

#[tokio::test]
async fn tab_seven_connects_and_registers_namespace() {
    let (browser, relay) = SimulatedBrowser::with_relay();
    let tab7 = browser.open_tab(TabId(7), app());
    let tab8 = browser.open_tab(TabId(8), app());

    let panel = open_panel(&relay, &tab7).await;
    wait_until("tab 7 connected", || panel.is_connected()).await;

    assert!(tab7.observer_running());
    assert!(!tab8.observer_running());
    assert!(relay.has_channel(&ChannelName::panel(TabId(7))));
    assert!(relay.has_channel(&ChannelName::content(TabId(7))));
    assert!(!relay.has_channel(&ChannelName::content(TabId(8))));

    let snapshot = panel.snapshot();
    assert_eq!(snapshot.connection.error, None);
    assert_eq!(
        snapshot.namespaces,
        vec![NamespaceEntry {
            namespace: "app.example".into(),
            version: "1.0".into()
        }]
    );
}

#[tokio::test]
async fn counter_reaches_only_its_own_page() {
    let (browser, relay) = SimulatedBrowser::with_relay();
    let tab5 = browser.open_tab(TabId(5), app());
    let tab6 = browser.open_tab(TabId(6), app());
    let panel5 = open_panel(&relay, &tab5).await;
    let panel6 = open_panel(&relay, &tab6).await;
    wait_until("both connected", || panel5.is_connected() && panel6.is_connected()).await;

    let mut payload = Map::new();
    payload.insert("count".into(), json!(3));
    panel5.send_counter(payload).unwrap();

    wait_until("tab 5 counter", || tab5.received().len() == 1).await;
    let got = &tab5.received()[0];
    assert_eq!(got.kind, EnvelopeKind::Counter);
    assert_eq!(got.tab_id, Some(TabId(5)));
    assert_eq!(got.payload.get("count"), Some(&json!(3)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(tab6.received().is_empty());
}

#[tokio::test]
async fn page_without_runtime_reports_debug_mode_off() {
    let (browser, relay) = SimulatedBrowser::with_relay();
    let tab = browser.open_tab(TabId(3), None);
    let panel = open_panel(&relay, &tab).await;

    wait_until("observer ready handled", || tab.observer_running()).await;
    let state = panel.connection_state();
    assert!(!state.connected);
    assert_eq!(state.error, Some(ConnectionError::DebugModeOff));
}

#[tokio::test]
async fn eval_failure_surfaces_message() {
    let (browser, relay) = SimulatedBrowser::with_relay();
    let tab = browser.open_tab(TabId(2), app());
    tab.set_eval_failure(Some("inspected window closed".into()));
    let panel = open_panel(&relay, &tab).await;

    assert_eq!(
        panel.connection_state().error,
        Some(ConnectionError::EvalFailed(
            "Could not connect: inspected window closed".into()
        ))
    );

    tab.set_eval_failure(None);
    panel.on_shown().await;
    wait_until("connected after retry", || panel.is_connected()).await;
    assert_eq!(panel.connection_state().error, None);
}

#[tokio::test]
async fn panel_adopts_channel_from_restarted_relay() {
    let (browser, relay) = SimulatedBrowser::with_relay();
    let tab = browser.open_tab(TabId(7), app());
    let panel = open_panel(&relay, &tab).await;
    wait_until("tab 7 connected", || panel.is_connected()).await;

    relay.shutdown();
    wait_until("panel channel released", || {
        matches!(panel.send_inject(), Err(Error::NotConnected(_)))
    })
    .await;

    let (_browser2, relay2) = SimulatedBrowser::with_relay();
    panel
        .adopt_channel(relay2.connect(ChannelName::panel(TabId(7))))
        .unwrap();
    let content = relay2.connect(ChannelName::content(TabId(7)));
    content
        .post(Envelope::connect(&ConnectSnapshot::new("other.app", "2.0")))
        .unwrap();

    wait_until("second namespace", || panel.snapshot().namespaces.len() == 2).await;
    assert!(panel.is_connected());
    assert_eq!(panel.snapshot().namespaces[1].namespace, "other.app");
    assert!(panel.send_inject().is_ok());
}

#[tokio::test]
async fn closed_tab_reports_page_unavailable() {
    let (browser, relay) = SimulatedBrowser::with_relay();
    let tab = browser.open_tab(TabId(4), app());
    let panel = open_panel(&relay, &tab).await;
    wait_until("tab 4 connected", || panel.is_connected()).await;

    browser.close_tab(TabId(4)).unwrap();
    panel.on_shown().await;

    let state = panel.connection_state();
    assert!(!state.connected);
    assert_eq!(
        state.error,
        Some(ConnectionError::EvalFailed(
            "Could not connect: inspected page unavailable".into()
        ))
    );
}

#[tokio::test(start_paused = true)]
async fn reload_reconnects_within_grace() {
    let (browser, relay) = SimulatedBrowser::with_relay();
    let tab = browser.open_tab(TabId(4), app());
    let panel = open_panel(&relay, &tab).await;
    wait_until("connected", || panel.is_connected()).await;

    browser.reload(TabId(4)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let state = panel.connection_state();
    assert!(state.connected);
    assert_eq!(state.error, None);
    assert_eq!(panel.snapshot().namespaces.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reload_into_debug_off_page_times_out() {
    let (browser, relay) = SimulatedBrowser::with_relay();
    let tab = browser.open_tab(TabId(4), app());
    let panel = open_panel(&relay, &tab).await;
    wait_until("connected", || panel.is_connected()).await;

    tab.set_runtime(None);
    browser.reload(TabId(4)).await.unwrap();
    wait_until("disconnected", || !panel.is_connected()).await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(
        panel.connection_state().error,
        Some(ConnectionError::DebugModeOff)
    );
}

#[tokio::test]
async fn history_collects_and_clears_by_namespace() {
    let (browser, relay) = SimulatedBrowser::with_relay();
    let tab = browser.open_tab(TabId(1), app());
    let panel = open_panel(&relay, &tab).await;
    wait_until("connected", || panel.is_connected()).await;

    tab.emit_data(EnvelopeKind::Session, json!({ "step": 1 })).unwrap();
    tab.emit_data(EnvelopeKind::FileSystem, json!({ "path": "a.txt" })).unwrap();
    tab.set_runtime(Some(AppRuntime::new("other.app", "2.0")));
    tab.emit_data(EnvelopeKind::Session, json!({ "step": 2 })).unwrap();
    wait_until("three messages", || panel.snapshot().messages.len() == 3).await;

    assert_eq!(panel.clear_messages("app.example"), 2);
    let left = panel.snapshot().messages;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].namespace.as_deref(), Some("other.app"));

    assert_eq!(panel.clear_messages("*"), 1);
    assert!(panel.snapshot().messages.is_empty());
}

#[tokio::test]
async fn closed_panel_drops_content_traffic_quietly() {
    let (browser, relay) = SimulatedBrowser::with_relay();
    let tab = browser.open_tab(TabId(9), app());
    let panel = open_panel(&relay, &tab).await;
    wait_until("connected", || panel.is_connected()).await;

    panel.close();
    wait_until("panel channel gone", || {
        !relay.has_channel(&ChannelName::panel(TabId(9)))
    })
    .await;

    // The page keeps talking; nothing blocks or fails on its side.
    tab.emit_data(EnvelopeKind::Session, json!({ "step": 1 })).unwrap();
    assert!(tab.observer_running());
}

#[tokio::test(start_paused = true)]
async fn simulate_command_end_to_end() {
    let args = SimulateArgs {
        tabs: 2,
        ..SimulateArgs::default()
    };
    let report = simulate(&Config::default(), &args).await.unwrap();

    assert_eq!(report.tabs.len(), 2);
    for tab in &report.tabs {
        assert!(tab.panel.connection.connected, "tab {} not connected", tab.tab_id);
        assert_eq!(tab.panel.messages.len(), 2);
        assert_eq!(tab.panel.namespaces.len(), 1);
        assert_eq!(tab.page_received, 1);
    }
    // Panel and content channel per tab.
    assert_eq!(report.channels.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn simulate_without_runtime_reports_debug_off() {
    let args = SimulateArgs {
        no_runtime: true,
        ..SimulateArgs::default()
    };
    let report = simulate(&Config::default(), &args).await.unwrap();
    let tab = &report.tabs[0];
    assert!(!tab.panel.connection.connected);
    assert_eq!(tab.panel.connection.error, Some(ConnectionError::DebugModeOff));
    assert!(tab.panel.namespaces.is_empty());
}
