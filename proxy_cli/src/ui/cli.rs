use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use proxy_core::lifecycle::errors::{CoreError, ServiceError};
use proxy_core::lifecycle::service::{self, ServiceHandler, ServiceState};
use proxy_core::storage::profile::TrafficStats;
use proxy_core::storage::StorageError;
use proxy_core::{AppContext, Profile, ServiceRunner};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;

use crate::settings::Settings;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "proxy-rs", version = "0.1.0", subcommand_required = true)]
pub struct Args {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the startup sequence and print where everything lives
    Init,
    /// List stored profiles
    List,
    /// Show the active profile and its UDP fallback
    Current,
    /// Create a profile from defaults plus the given fields
    Create {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        method: Option<String>,
        /// Id of a profile to use for UDP
        #[arg(long)]
        fallback: Option<i64>,
    },
    /// Make a profile active (an unknown id creates a default profile)
    Switch { id: i64 },
    /// Delete a profile
    Delete { id: i64 },
    /// Set or clear (no `--to`) a profile's UDP fallback
    Fallback {
        id: i64,
        #[arg(long)]
        to: Option<i64>,
    },
    /// Add traffic to a profile's counters
    Traffic { id: i64, tx: u64, rx: u64 },
    /// Run the networking service in the foreground; reads
    /// `start`, `stop`, `reload` and `quit` from stdin
    Run,
    /// Mirror the active profile for use before unlock
    DirectBoot { state: Toggle },
    /// Periodic subscription refresh
    AutoUpdate { state: Toggle },
    /// Request TCP Fast Open on the next start
    TcpFastOpen { state: Toggle },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        self == Toggle::On
    }
}

pub async fn run_cli(args: Args) -> Result<(), CoreError> {
    let settings = Settings::load(args.config.as_deref())?;
    let (control, commands) = service::channel();
    let app = Arc::new(AppContext::init(
        settings.core_config()?,
        settings.platform(),
        control,
        Handle::current(),
    )?);

    match args.command {
        Command::Init => {
            let storage = app.storage();
            println!("storage root:     {}", storage.root().display());
            println!("credential root:  {}", storage.credential_root().display());
            println!("device protected: {}", storage.is_device_protected());
            println!("direct boot:      {:?}", app.direct_boot().state());
            println!("scheduled jobs:   {:?}", app.scheduler().scheduled_keys());
        }
        Command::List => {
            let active = app.active_profile_ids();
            for profile in app.profiles().list_profiles()? {
                let marker = if active.first() == Some(&profile.id) { '*' } else { ' ' };
                println!("{marker} {}", describe(&profile));
            }
        }
        Command::Current => match app.current_profile() {
            Some((profile, fallback)) => {
                println!("{}", describe(&profile));
                if let Some(fallback) = fallback {
                    println!("  udp via {}", describe(&fallback));
                }
            }
            None => println!("no active profile"),
        },
        Command::Create {
            name,
            host,
            port,
            password,
            method,
            fallback,
        } => {
            let defaults = Profile::default();
            let template = Profile {
                name,
                host: host.unwrap_or_else(|| defaults.host.clone()),
                remote_port: port.unwrap_or(defaults.remote_port),
                password: password.unwrap_or_else(|| defaults.password.clone()),
                method: method.unwrap_or_else(|| defaults.method.clone()),
                udp_fallback: fallback,
                ..defaults
            };
            let profile = app.create_profile(Some(&template))?;
            println!("created {}", describe(&profile));
        }
        Command::Switch { id } => {
            let profile = app.switch_profile(id)?;
            println!("active: {}", describe(&profile));
        }
        Command::Delete { id } => {
            if app.delete_profile(id)? {
                println!("deleted profile {id}");
            } else {
                println!("no profile {id}");
            }
        }
        Command::Fallback { id, to } => {
            let mut profile = app
                .profiles()
                .get_profile(id)
                .ok_or(StorageError::ProfileNotFound(id))?;
            profile.udp_fallback = to;
            app.update_profile(&profile)?;
            println!("updated {}", describe(&profile));
        }
        Command::Traffic { id, tx, rx } => {
            app.record_traffic(id, TrafficStats::new(tx, rx))?;
        }
        Command::Run => {
            let handler = ForegroundService {
                app: Arc::clone(&app),
            };
            let runner = ServiceRunner::spawn(commands, handler);
            run_service_loop(&app, &runner).await?;
        }
        Command::DirectBoot { state } => {
            let enabled = app.set_direct_boot_aware(state.enabled())?;
            println!("direct boot: {}", if enabled { "on" } else { "off" });
        }
        Command::AutoUpdate { state } => {
            app.set_subscription_auto_update(state.enabled())?;
        }
        Command::TcpFastOpen { state } => {
            app.data_store().set_tcp_fast_open(state.enabled())?;
            info!("TCP Fast Open preference saved; applied on next start");
        }
    }
    Ok(())
}

fn describe(profile: &Profile) -> String {
    let traffic = profile.traffic();
    format!(
        "#{} {} ({}, {}) tx={} rx={}",
        profile.id,
        profile.display_name(),
        profile.formatted_address(),
        profile.method,
        traffic.tx,
        traffic.rx
    )
}

/// Reads control words from stdin until `quit` or EOF.
///
/// The service is started right away, mirroring what a host does after
/// the user taps "connect".
async fn run_service_loop(app: &AppContext, runner: &ServiceRunner) -> Result<(), CoreError> {
    let mut state = runner.subscribe();
    app.start_service();
    info!("Type start, stop, reload or quit.");

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "start" => app.start_service(),
            "stop" => app.stop_service(),
            "reload" => app.reload_service(),
            "quit" | "exit" => break,
            "" => continue,
            other => println!("unknown command: {other}"),
        }
    }

    app.stop_service();
    let _ = state.wait_for(|s| *s == ServiceState::Stopped).await;
    info!("Exiting...");
    Ok(())
}

/// Stand-in networking service: reports which profile it would serve.
/// Resolution goes through the context, so a locked host serves the
/// direct-boot snapshot.
struct ForegroundService {
    app: Arc<AppContext>,
}

impl ForegroundService {
    fn active(&self) -> Result<Profile, ServiceError> {
        self.app
            .current_profile()
            .map(|(profile, _)| profile)
            .ok_or_else(|| ServiceError::Start("no active profile".into()))
    }
}

#[async_trait]
impl ServiceHandler for ForegroundService {
    async fn start(&mut self) -> Result<(), ServiceError> {
        let profile = self.active()?;
        info!("Serving {}", describe(&profile));
        Ok(())
    }

    async fn stop(&mut self) {
        info!("Service stopped");
    }

    async fn reload(&mut self) -> Result<(), ServiceError> {
        let profile = self.active().map_err(|e| ServiceError::Reload(e.to_string()))?;
        info!("Reloaded; now serving {}", describe(&profile));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_core::platform::StaticCapabilities;
    use proxy_core::storage::selector::StorageRoots;

    fn settings(dir: &std::path::Path, unlocked: bool) -> Settings {
        Settings {
            storage: Some(StorageRoots::new(dir.join("ce"), dir.join("de"))),
            asset_dir: Some(dir.join("assets")),
            package_update_time: Some(1),
            tcp_fastopen_path: Some(dir.join("tcp_fastopen")),
            device: StaticCapabilities {
                pre_unlock_storage: true,
                encrypted: true,
                unlocked,
            },
            ..Settings::default()
        }
    }

    fn context(settings: &Settings) -> AppContext {
        let (control, _commands) = service::channel();
        AppContext::init(
            settings.core_config().unwrap(),
            settings.platform(),
            control,
            Handle::current(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn locked_host_serves_the_mirrored_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mirrored = {
            let app = context(&settings(dir.path(), true));
            let profile = app.switch_profile(0).unwrap();
            assert!(app.set_direct_boot_aware(true).unwrap());
            profile
        };

        let app = Arc::new(context(&settings(dir.path(), false)));
        let renamed = Profile {
            name: Some("edited after lock".into()),
            ..mirrored.clone()
        };
        app.profiles().update_profile(&renamed).unwrap();

        let service = ForegroundService { app };
        assert_eq!(service.active().unwrap(), mirrored);
    }
}
