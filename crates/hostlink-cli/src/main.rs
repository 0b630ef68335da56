//! `hostlink` – host telemetry and control link.
//!
//! 1. Loads `~/.hostlink/config.toml` (defaults when absent) and
//!    `HOSTLINK_*` overrides.
//! 2. Picks a capability provider for this host, wrapped for USB
//!    auto-mount when enabled.
//! 3. Wires cache, module registry, worker pool, poller scheduler, path
//!    guard, command router and connection hub.
//! 4. Serves HTTP and WebSocket until **Ctrl-C**, then stops the pollers
//!    and listeners.

mod config;
mod telemetry;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use hostlink_hal::{AutoMount, platform};
use hostlink_kernel::{
    BlockingPool, DeviceScanHook, DeviceTable, MetricsCache, ModuleRegistry, OriginPolicy, PathGuard,
    PollerScheduler, VolumeRefreshHook,
};
use hostlink_middleware::{CommandRouter, ConnectionHub, EventBus, RouterContext};
use hostlink_server::{LinkServer, allowlist};
use hostlink_types::{LinkError, ModuleName};
use tracing::{error, info, warn};

use crate::config::Config;

fn main() -> ExitCode {
    let _guard = telemetry::init_tracing("hostlink");

    let cfg = config::load().unwrap_or_else(|e| {
        warn!(error = %e, "config error; using defaults");
        let mut cfg = Config::default();
        config::apply_env_overrides(&mut cfg);
        cfg
    });

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "cannot start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "hostlink stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config) -> Result<(), LinkError> {
    let modules = cfg.modules();
    let mut provider = platform::detect(cfg.provider_kind(), cfg.provider_timeout(), cfg.mount_timeout());
    if cfg.auto_mount && modules.contains(&ModuleName::Usb) {
        provider = Arc::new(AutoMount::new(provider));
    }
    let platform_name = provider.platform().to_string();

    let cache = Arc::new(MetricsCache::new());
    let registry = Arc::new(ModuleRegistry::new(cfg.stale_after_failures));
    let pool = BlockingPool::new(cfg.worker_pool_size, cfg.provider_timeout());
    let guard = Arc::new(PathGuard::new());
    let bus = EventBus::default();

    // ── Pollers ────────────────────────────────────────────────────────────
    let mut scheduler = PollerScheduler::new(
        Arc::clone(&provider),
        Arc::clone(&cache),
        Arc::clone(&registry),
        pool.clone(),
        Arc::new(bus.clone()),
    );
    for &module in &modules {
        let Some(interval) = cfg.interval_for(module) else {
            registry.register(module, None);
            continue;
        };
        scheduler = scheduler.with_module(module, interval);
        scheduler = match module {
            ModuleName::Usb => scheduler.with_hook(module, Arc::new(VolumeRefreshHook::new(Arc::clone(&guard)))),
            ModuleName::Bluetooth => scheduler.with_hook(
                module,
                Arc::new(DeviceScanHook::new(
                    "devices",
                    DeviceTable::for_scan_interval(cfg.max_tracked_devices, interval),
                )),
            ),
            ModuleName::Wifi => scheduler.with_hook(
                module,
                Arc::new(DeviceScanHook::new(
                    "networks",
                    DeviceTable::for_scan_interval(cfg.max_tracked_devices, interval),
                )),
            ),
            _ => scheduler,
        };
    }

    // ── Dispatch and fan-out ───────────────────────────────────────────────
    let ctx = RouterContext::new(provider, cache, registry, pool, guard)
        .with_mount_timeout(cfg.mount_timeout())
        .with_fs_limits(cfg.fs_read_max_bytes, cfg.fs_list_max_entries);
    let router = Arc::new(CommandRouter::new(ctx, &modules));

    let policy = Arc::new(OriginPolicy::new(&cfg.allowed_origins));
    if let Some(url) = &cfg.origins_url {
        allowlist::refresh(&policy, url).await;
    }
    let hub = Arc::new(ConnectionHub::new(policy, router).with_queue_capacity(cfg.send_queue_capacity));
    let pump = hub.spawn_pump(&bus);

    // ── Listeners ──────────────────────────────────────────────────────────
    let server = LinkServer::new(Arc::clone(&hub))
        .with_bind(cfg.bind_address)
        .with_ports(cfg.http_port, cfg.ws_port)
        .bind()
        .await?;
    let pollers = scheduler.start();
    print_banner(&platform_name, &modules, server.http_addr()?, server.ws_addr()?);

    let served = server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    pollers.shutdown().await;
    drop(bus);
    if tokio::time::timeout(Duration::from_secs(1), pump).await.is_err() {
        warn!("update pump did not stop in time");
    }
    info!(clients = hub.connection_count(), "hostlink stopped");
    served
}

fn print_banner(platform: &str, modules: &[ModuleName], http: SocketAddr, ws: SocketAddr) {
    let names: Vec<&str> = modules.iter().map(|m| m.as_str()).collect();
    println!();
    println!("  {} {}", "hostlink".bold().cyan(), env!("CARGO_PKG_VERSION").dimmed());
    println!("  {:<9}{}", "provider".bold(), platform);
    println!("  {:<9}{}", "http".bold(), format!("http://{http}").green());
    println!("  {:<9}{}", "socket".bold(), format!("ws://{ws}").green());
    println!("  {:<9}{}", "modules".bold(), names.join(", "));
    println!("  Press {} to stop.", "Ctrl-C".yellow());
    println!();
}
