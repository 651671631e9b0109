//! `odd-devtools simulate`: drive relay, observers and panels through a
//! scripted browsing session.
//!
//! Per tab: open the panel, let the page register, emit a couple of app
//! events, pass a counter through to the page, then reload the page and
//! wait out the pageload grace period.

use std::sync::Arc;
use std::time::Duration;

use odd_domain::config::Config;
use odd_panel::{PanelController, PanelControllerBuilder, PanelSnapshot};
use odd_protocol::{EnvelopeKind, TabId};
use odd_relay::{ChannelInfo, Relay};
use serde::Serialize;
use serde_json::{json, Map};

use super::SimulateArgs;
use crate::sim::{AppRuntime, LoggingView, SimulatedBrowser, SimulatedPageBridge, SimulatedTab};

const FIRST_TAB: u32 = 1;
const APP_VERSION: &str = "1.0";
const SETTLE: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub tabs: Vec<TabReport>,
    /// Channels still registered before shutdown.
    pub channels: Vec<ChannelInfo>,
}

#[derive(Debug, Serialize)]
pub struct TabReport {
    pub tab_id: TabId,
    pub panel: PanelSnapshot,
    /// `counter` envelopes that reached the page.
    pub page_received: usize,
}

struct TabSession {
    tab: Arc<SimulatedTab>,
    panel: Arc<PanelController>,
}

/// Run the scripted session and collect what each panel ended up showing.
pub async fn simulate(config: &Config, args: &SimulateArgs) -> anyhow::Result<SimulationReport> {
    let (browser, relay) = SimulatedBrowser::with_relay_config(&config.relay);
    tracing::info!(tabs = args.tabs, runtime = !args.no_runtime, "simulation starting");

    let mut sessions = Vec::with_capacity(args.tabs as usize);
    for i in 0..args.tabs {
        let tab_id = TabId(FIRST_TAB + i);
        let runtime = (!args.no_runtime).then(|| AppRuntime::new(args.namespace.as_str(), APP_VERSION));
        let tab = browser.open_tab(tab_id, runtime);
        let panel = open_panel(config, &relay, &tab).await?;
        sessions.push(TabSession { tab, panel });
    }
    tokio::time::sleep(SETTLE).await;

    for (n, session) in sessions.iter().enumerate() {
        let tab_id = session.tab.tab_id();
        let events = [
            (EnvelopeKind::Session, json!({ "event": "session-started" })),
            (EnvelopeKind::FileSystem, json!({ "event": "file-written", "path": "public/notes.md" })),
        ];
        for (kind, detail) in events {
            if let Err(e) = session.tab.emit_data(kind, detail) {
                tracing::warn!(tab_id = %tab_id, error = %e, "page event not sent");
            }
        }

        let mut counter = Map::new();
        counter.insert("count".into(), json!(n + 1));
        session.panel.send_counter(counter)?;
    }
    tokio::time::sleep(SETTLE).await;

    for session in &sessions {
        browser.reload(session.tab.tab_id()).await?;
    }
    tokio::time::sleep(config.panel.pageload_grace() + SETTLE).await;

    let report = SimulationReport {
        tabs: sessions
            .iter()
            .map(|s| TabReport {
                tab_id: s.tab.tab_id(),
                panel: s.panel.snapshot(),
                page_received: s.tab.received().len(),
            })
            .collect(),
        channels: relay.channels(),
    };

    for session in &sessions {
        session.panel.close();
    }
    relay.shutdown();
    tracing::info!("simulation finished");
    Ok(report)
}

async fn open_panel(
    config: &Config,
    relay: &Relay,
    tab: &Arc<SimulatedTab>,
) -> anyhow::Result<Arc<PanelController>> {
    let tab_id = tab.tab_id();
    let panel = PanelControllerBuilder::new(tab_id)
        .extension_id(config.relay.extension_id.as_str())
        .config(config.panel.clone())
        .opener(Arc::new(relay.clone()))
        .bridge(Arc::new(SimulatedPageBridge::new(tab.clone())))
        .view(Arc::new(LoggingView::new(tab_id)))
        .build()?;
    panel.open().await?;
    Ok(panel)
}

/// Entry point for the subcommand: run and print the outcome.
pub async fn run(config: Config, args: SimulateArgs) -> anyhow::Result<()> {
    let report = simulate(&config, &args).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for tab in &report.tabs {
        let conn = &tab.panel.connection;
        let namespaces: Vec<String> = tab
            .panel
            .namespaces
            .iter()
            .map(|n| format!("{}@{}", n.namespace, n.version))
            .collect();
        let error = conn
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "none".into());
        println!(
            "tab {}: connected={} error={} namespaces=[{}] messages={} page_received={}",
            tab.tab_id,
            conn.connected,
            error,
            namespaces.join(", "),
            tab.panel.messages.len(),
            tab.page_received,
        );
    }
    Ok(())
}
