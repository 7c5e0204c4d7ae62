mod http;
mod socket;

use std::sync::Arc;

use stream_core::config::Config;
use stream_core::events::{EventBus, StreamEvent};
use stream_core::fallback::FallbackManager;
use stream_core::monitor::HealthMonitor;
use stream_core::probe::{HttpStreamProber, StreamProber};
use stream_core::store::{FileSettingsStore, SettingsStore};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Everything the servers need, built once at startup.
#[derive(Clone)]
pub struct AppContext {
    pub fallback: Arc<FallbackManager>,
    pub monitor: HealthMonitor,
    pub events: EventBus,
    pub store: Arc<dyn SettingsStore>,
}

impl AppContext {
    pub fn new(
        config: &Config,
        store: Arc<dyn SettingsStore>,
        prober: Arc<dyn StreamProber>,
        events: EventBus,
    ) -> Self {
        let fallback = Arc::new(FallbackManager::new(
            config.sources.clone(),
            config.selector.clone(),
            store.clone(),
            prober,
        ));
        let monitor = HealthMonitor::new(
            fallback.clone(),
            events.clone(),
            config.monitor.settings.clone(),
        );
        Self {
            fallback,
            monitor,
            events,
            store,
        }
    }
}

/// Tracing layer relaying WARN/ERROR lines to connected players
struct BroadcastLayer {
    sender: broadcast::Sender<StreamEvent>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<StreamEvent>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // Sent on the raw channel: logging from here would recurse
        let _ = self.sender.send(StreamEvent::Log { message });
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::load()?;
    config.apply_env();

    let events = EventBus::default();

    let log_path = config.daemon.log_file.clone();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(events.sender()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,stream_daemon=debug,stream_core=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);
    info!("Config loaded from: {:?}", Config::config_path());
    info!(
        "Sources: primary={:?} backup={:?} additional={}",
        config.sources.primary_url,
        config.sources.backup_url,
        config.sources.additional_urls.len()
    );

    let store: Arc<dyn SettingsStore> =
        Arc::new(FileSettingsStore::new(config.daemon.settings_file.clone()));
    let prober: Arc<dyn StreamProber> = Arc::new(HttpStreamProber::new()?);
    let ctx = AppContext::new(&config, store, prober, events);

    if config.socket.enabled {
        let _socket_handle = socket::start_server(
            config.socket.bind_address.clone(),
            config.socket.port,
            ctx.clone(),
        );
    }

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            ctx.clone(),
        );
    }

    if config.monitor.autostart {
        ctx.monitor.start_health_monitoring(None).await;
    }

    info!("Daemon initialised, waiting for Ctrl-C");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    if ctx.monitor.is_running() {
        ctx.monitor.stop_health_monitoring();
    }
    Ok(())
}
