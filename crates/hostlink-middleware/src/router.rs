//! [`CommandRouter`] – maps inbound `{cmd, val}` requests to actions.
//!
//! The route table is closed: it is built once from the enabled module list
//! and never changes afterwards. A command outside it is answered with
//! `unknown_command` and touches nothing.
//!
//! | Route            | Commands                                              | Goes to                 |
//! |------------------|-------------------------------------------------------|-------------------------|
//! | `Ping`           | `ping`                                                | router                  |
//! | `Snapshot`       | `get_metrics`                                         | metrics cache           |
//! | `Status`         | `module_status`                                       | module registry         |
//! | `Subscribe`      | `subscribe`                                           | hub (per connection)    |
//! | `CacheRead`      | `{module}_get`, `usb_drives`                          | metrics cache           |
//! | `Control`        | `get_system_info`, `*_set`, `volume_mute`, `usb_*`    | provider via pool       |
//! | `FileSystem`     | `fs_list`, `fs_read`, `fs_write`, `fs_mkdir`, `fs_delete` | path guard, then provider |
//!
//! Replies are named `{cmd}_response` except for the fixed names `pong`,
//! `metrics`, `system_info`, `module_status` and `subscribed`. Every failure
//! becomes an `error` envelope carrying the taxonomy kind.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hostlink_hal::{Action, SharedProvider};
use hostlink_hal::fsops::{DEFAULT_MAX_LIST_ENTRIES, DEFAULT_MAX_READ_BYTES};
use hostlink_kernel::{BlockingPool, MetricsCache, ModuleRegistry, PathGuard};
use hostlink_types::{BroadcastClass, Envelope, LinkError, ModuleName};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

/// How a command is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Ping,
    Snapshot,
    Status,
    Subscribe,
    CacheRead(ModuleName),
    Control {
        module: ModuleName,
        action: Action,
        /// Broadcast command sent to every subscriber after success.
        notify: Option<&'static str>,
    },
    FileSystem(Action),
}

/// Result of dispatching one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Reply for the requesting connection only.
    pub reply: Envelope,
    /// Broadcast for every subscriber of the class.
    pub notify: Option<(BroadcastClass, Envelope)>,
    /// New subscription set for the requesting connection.
    pub subscribe: Option<BTreeSet<BroadcastClass>>,
}

impl Dispatch {
    fn reply(reply: Envelope) -> Self {
        Self { reply, notify: None, subscribe: None }
    }
}

/// Collaborators and limits the router works with.
pub struct RouterContext {
    pub provider: SharedProvider,
    pub cache: Arc<MetricsCache>,
    pub registry: Arc<ModuleRegistry>,
    pub pool: BlockingPool,
    pub guard: Arc<PathGuard>,
    pub mount_timeout: Duration,
    pub fs_read_max_bytes: u64,
    pub fs_list_max_entries: usize,
}

impl RouterContext {
    pub fn new(
        provider: SharedProvider,
        cache: Arc<MetricsCache>,
        registry: Arc<ModuleRegistry>,
        pool: BlockingPool,
        guard: Arc<PathGuard>,
    ) -> Self {
        Self {
            provider,
            cache,
            registry,
            pool,
            guard,
            mount_timeout: Duration::from_secs(30),
            fs_read_max_bytes: DEFAULT_MAX_READ_BYTES,
            fs_list_max_entries: DEFAULT_MAX_LIST_ENTRIES,
        }
    }

    pub fn with_mount_timeout(mut self, timeout: Duration) -> Self {
        self.mount_timeout = timeout;
        self
    }

    pub fn with_fs_limits(mut self, read_max_bytes: u64, list_max_entries: usize) -> Self {
        self.fs_read_max_bytes = read_max_bytes;
        self.fs_list_max_entries = list_max_entries;
        self
    }
}

pub struct CommandRouter {
    routes: HashMap<String, Route>,
    modules: Vec<ModuleName>,
    ctx: RouterContext,
}

impl CommandRouter {
    /// Build the route table for the enabled `modules`.
    pub fn new(ctx: RouterContext, modules: &[ModuleName]) -> Self {
        let enabled: BTreeSet<ModuleName> = modules.iter().copied().collect();
        let routes = build_routes(&enabled);
        debug!(commands = routes.len(), modules = enabled.len(), "command routes built");
        Self { routes, modules: enabled.into_iter().collect(), ctx }
    }

    /// Enabled modules, in canonical order.
    pub fn modules(&self) -> &[ModuleName] {
        &self.modules
    }

    /// Every routable command name, sorted.
    pub fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn route(&self, cmd: &str) -> Option<Route> {
        self.routes.get(cmd).copied()
    }

    pub fn cache(&self) -> &Arc<MetricsCache> {
        &self.ctx.cache
    }

    /// Serve one request. Never fails: errors come back as `error`
    /// envelopes in [`Dispatch::reply`].
    pub async fn dispatch(&self, request: Envelope) -> Dispatch {
        let Envelope { cmd, val } = request;
        let Some(route) = self.route(&cmd) else {
            debug!(%cmd, "unknown command");
            return Dispatch::reply(Envelope::error(Some(&cmd), &LinkError::UnknownCommand(cmd.clone())));
        };

        match self.execute(route, &cmd, val).await {
            Ok(dispatch) => dispatch,
            Err(e) => {
                match &e {
                    LinkError::InvalidArgument(_) | LinkError::PathRejected { .. } => {
                        debug!(%cmd, error = %e, "request refused")
                    }
                    _ => warn!(%cmd, error = %e, "command failed"),
                }
                Dispatch::reply(Envelope::error(Some(&cmd), &e))
            }
        }
    }

    async fn execute(&self, route: Route, cmd: &str, val: Value) -> Result<Dispatch, LinkError> {
        match route {
            Route::Ping => Ok(Dispatch::reply(Envelope::new(
                "pong",
                json!({ "timestamp": Utc::now() }),
            ))),
            Route::Snapshot => Ok(Dispatch::reply(Envelope::new("metrics", self.ctx.cache.snapshot()))),
            Route::Status => Ok(Dispatch::reply(Envelope::new(
                "module_status",
                self.ctx.registry.status(),
            ))),
            Route::Subscribe => {
                let classes = parse_classes(&val)?;
                let names: Vec<&str> = classes.iter().map(|c| c.as_str()).collect();
                Ok(Dispatch {
                    reply: Envelope::new("subscribed", json!({ "classes": names })),
                    notify: None,
                    subscribe: Some(classes),
                })
            }
            Route::CacheRead(module) => {
                let value = self.read_cached(module)?;
                Ok(Dispatch::reply(Envelope::new(format!("{cmd}_response"), value)))
            }
            Route::Control { module, action, notify } => {
                let value = self.control(module, action, val).await?;
                let reply_cmd = if module == ModuleName::System {
                    "system_info".to_string()
                } else {
                    format!("{cmd}_response")
                };
                let notify = notify.map(|name| (module.broadcast_class(), Envelope::new(name, value.clone())));
                Ok(Dispatch {
                    reply: Envelope::new(reply_cmd, value),
                    notify,
                    subscribe: None,
                })
            }
            Route::FileSystem(action) => {
                let value = self.filesystem(action, val).await?;
                Ok(Dispatch::reply(Envelope::new(format!("{cmd}_response"), value)))
            }
        }
    }

    /// Latest cached value for `module`, with its staleness flag.
    pub fn read_cached(&self, module: ModuleName) -> Result<Value, LinkError> {
        let entry = self
            .ctx
            .cache
            .get(module)
            .ok_or_else(|| LinkError::unavailable(module, "not yet polled"))?;
        Ok(json!({
            "module": entry.module,
            "value": entry.value,
            "timestamp": entry.timestamp,
            "generation": entry.generation,
            "stale": self.ctx.registry.is_stale(module),
        }))
    }

    /// Invoke a provider action on the worker pool.
    ///
    /// USB mount and unmount get the longer mount timeout.
    pub async fn control(&self, module: ModuleName, action: Action, args: Value) -> Result<Value, LinkError> {
        let timeout = match (module, action) {
            (ModuleName::Usb, Action::Mount | Action::Unmount) => self.ctx.mount_timeout,
            _ => self.ctx.pool.timeout(),
        };
        let provider = Arc::clone(&self.ctx.provider);
        self.ctx
            .pool
            .run_with_timeout(module, timeout, move || provider.invoke(module, action, &args))
            .await
    }

    /// Validate the requested path, then run the filesystem action on the
    /// canonical path. Nothing reaches the provider unless the guard admits
    /// the path.
    pub async fn filesystem(&self, action: Action, val: Value) -> Result<Value, LinkError> {
        let requested = val
            .as_str()
            .or_else(|| val.get("path").and_then(Value::as_str))
            .ok_or_else(|| LinkError::InvalidArgument("expected a 'path'".into()))?
            .to_string();

        let validated = self.ctx.guard.validate(&requested)?;
        if validated.is_root() && matches!(action, Action::Delete | Action::WriteFile) {
            return Err(LinkError::rejected(requested, "refusing to modify a volume root"));
        }

        let mut args = match val {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        args.insert("path".into(), Value::String(validated.path.display().to_string()));
        match action {
            Action::ReadFile => {
                let limit = args
                    .get("max_size")
                    .and_then(Value::as_u64)
                    .map_or(self.ctx.fs_read_max_bytes, |n| n.min(self.ctx.fs_read_max_bytes));
                args.insert("max_size".into(), Value::from(limit));
            }
            Action::ListDir => {
                let limit = args
                    .get("max_entries")
                    .and_then(Value::as_u64)
                    .map_or(self.ctx.fs_list_max_entries, |n| {
                        (n as usize).min(self.ctx.fs_list_max_entries)
                    });
                args.insert("max_entries".into(), Value::from(limit));
            }
            _ => {}
        }

        let provider = Arc::clone(&self.ctx.provider);
        let args = Value::Object(args);
        self.ctx
            .pool
            .run(ModuleName::Fs, move || provider.invoke(ModuleName::Fs, action, &args))
            .await
    }
}

fn build_routes(enabled: &BTreeSet<ModuleName>) -> HashMap<String, Route> {
    let mut routes = HashMap::from([
        ("ping".to_string(), Route::Ping),
        ("get_metrics".to_string(), Route::Snapshot),
        ("module_status".to_string(), Route::Status),
        ("subscribe".to_string(), Route::Subscribe),
    ]);
    let control = |module, action, notify| Route::Control { module, action, notify };

    for &module in enabled {
        if module.default_interval().is_some() {
            routes.insert(format!("{module}_get"), Route::CacheRead(module));
        }
        match module {
            ModuleName::System => {
                routes.insert("get_system_info".into(), control(module, Action::Read, None));
                routes.insert("system_get".into(), control(module, Action::Read, None));
            }
            ModuleName::Brightness => {
                routes.insert(
                    "brightness_set".into(),
                    control(module, Action::Set, Some("brightness_update")),
                );
            }
            ModuleName::Volume => {
                routes.insert("volume_set".into(), control(module, Action::Set, Some("volume_update")));
                routes.insert(
                    "volume_mute".into(),
                    control(module, Action::ToggleMute, Some("volume_update")),
                );
            }
            ModuleName::Usb => {
                routes.insert("usb_drives".into(), Route::CacheRead(module));
                routes.insert("usb_unmounted".into(), control(module, Action::ListUnmounted, None));
                routes.insert("usb_mount".into(), control(module, Action::Mount, None));
                routes.insert("usb_remove".into(), control(module, Action::Unmount, None));
            }
            ModuleName::Fs => {
                for (name, action) in [
                    ("fs_list", Action::ListDir),
                    ("fs_read", Action::ReadFile),
                    ("fs_write", Action::WriteFile),
                    ("fs_mkdir", Action::MakeDir),
                    ("fs_delete", Action::Delete),
                ] {
                    routes.insert(name.into(), Route::FileSystem(action));
                }
            }
            _ => {}
        }
    }
    routes
}

/// `null` or `"all"` means every class; otherwise a class name or a list
/// of them.
fn parse_classes(val: &Value) -> Result<BTreeSet<BroadcastClass>, LinkError> {
    match val {
        Value::Null => Ok(BroadcastClass::ALL.into_iter().collect()),
        Value::String(s) if s == "all" => Ok(BroadcastClass::ALL.into_iter().collect()),
        Value::String(s) => Ok(BTreeSet::from([s.parse()?])),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| LinkError::InvalidArgument("class names must be strings".into()))?
                    .parse()
            })
            .collect(),
        _ => Err(LinkError::InvalidArgument(
            "subscribe expects a class name or a list of them".into(),
        )),
    }
}
