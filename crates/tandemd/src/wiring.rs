//! Assembles the orchestrator from a validated `tandem.toml`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use tandem_api::ApiState;
use tandem_core::{epoch_secs, EnvironmentName, TandemConfig, TargetGroupId};
use tandem_health::{HealthGate, HttpProbeSource, TargetHealthSource};
use tandem_pipeline::{
    BuildCollaborator, Collaborators, PipelineSettings, Promoter, RunCoordinator, RunExecutor, SourceRepository,
    StateArtifactStore, StorePromotionChannel,
};
use tandem_routing::{IpSet, Listener, RoutingSync, RoutingTable};
use tandem_shift::{ComputePlatform, ShiftController, ShiftParams};
use tandem_state::{DeploymentGroupRecord, StateStore, DEFAULT_PROMOTION_CHANNEL};

use crate::adapters::{CommandBuilder, CommandPlatform, CommandSource};

/// The external systems the orchestrator drives.
pub struct Adapters {
    pub source: Arc<dyn SourceRepository>,
    pub builder: Arc<dyn BuildCollaborator>,
    pub platform: Arc<dyn ComputePlatform>,
    pub health: Arc<dyn TargetHealthSource>,
}

impl Adapters {
    pub fn from_config(config: &TandemConfig) -> Self {
        if config.source.fetch_command.is_none() {
            warn!("source.fetch_command is not set; production runs will fail in Sourcing");
        }
        let probe_spec = config.environment(EnvironmentName::Blue).health_check;
        Self {
            source: Arc::new(CommandSource::new(config.source.fetch_command.clone())),
            builder: Arc::new(CommandBuilder::new(config.build.command.clone())),
            platform: Arc::new(CommandPlatform::from_config(config)),
            health: Arc::new(HttpProbeSource::new(config.platform.probe_addresses.clone(), probe_spec)),
        }
    }
}

/// Install both listeners and make sure the production deployment group
/// exists. An existing group keeps its persisted live pointer, and the
/// production listener is derived from it.
pub fn bootstrap(config: &TandemConfig, store: &StateStore, table: &RoutingTable) -> anyhow::Result<DeploymentGroupRecord> {
    let allow = IpSet::parse(&config.staging.allow_list)?;
    table.install(Listener::restricted(
        &config.staging.listener,
        allow,
        TargetGroupId::new(config.staging.target_group.as_str()),
    )?);

    let (first, second) = config.production_target_groups()?;
    let group = store.bootstrap_deployment_group(&DeploymentGroupRecord::new(
        &config.production.deployment_group,
        EnvironmentName::Blue,
        &config.production.listener,
        first,
        second,
        epoch_secs(),
    ))?;
    RoutingSync::new(table.clone()).apply(&group)?;
    info!(
        group = %group.name,
        live = %group.live_target(),
        shadow = %group.shadow_target(),
        "routing bootstrapped"
    );
    Ok(group)
}

/// Wire every component over `store` and `table`.
pub fn assemble(
    config: &TandemConfig,
    store: StateStore,
    table: RoutingTable,
    adapters: Adapters,
) -> anyhow::Result<ApiState> {
    let settings = PipelineSettings::from_config(config)?;
    let artifacts = Arc::new(StateArtifactStore::new(store.clone()));
    let promotion = Arc::new(StorePromotionChannel::new(store.clone(), DEFAULT_PROMOTION_CHANNEL));

    let shift = ShiftController::new(
        store.clone(),
        adapters.platform.clone(),
        Arc::new(table.clone()),
        HealthGate::new(adapters.health),
        ShiftParams {
            health_timeout: config.health_timeout()?,
            health_interval: config.health_interval()?,
        },
    );
    let executor = RunExecutor::new(
        store.clone(),
        settings,
        Collaborators {
            source: adapters.source,
            builder: adapters.builder,
            artifacts: artifacts.clone(),
            platform: adapters.platform,
            promotion: promotion.clone(),
        },
        shift,
    );

    Ok(ApiState {
        coordinator: RunCoordinator::new(store.clone(), executor),
        promoter: Promoter::new(promotion, artifacts),
        store,
        routing: table,
    })
}

/// Periodically re-derive listener defaults from the persisted live
/// pointers until `shutdown` flips.
pub async fn run_sync_loop(
    sync: RoutingSync,
    store: StateStore,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = sync.sync(&store) {
                    warn!(error = %e, "routing sync failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_routing::RequestInfo;

    const CONFIG: &str = r#"
[artifact]
repository = "registry.example.com/shop/web"

[source]
branch = "main"

[environments.blue]
desired_count = 2
container_name = "web"
container_port = 8080
shape = { cpu_units = 256, memory_mib = 512 }
health_check = { path = "/healthz" }

[environments.green]
desired_count = 1
container_name = "web"
container_port = 8080
shape = { cpu_units = 256, memory_mib = 512 }
health_check = { path = "/healthz" }

[staging]
target_group = "green-tg"
allow_list = ["1.2.3.4/32"]

[production]
target_groups = ["blue-a", "blue-b"]
"#;

    fn target(table: &RoutingTable, listener: &str, source: &str) -> Option<String> {
        table
            .evaluate(listener, &RequestInfo::from_raw(Some(source), None))
            .unwrap()
            .action
            .target()
            .map(|t| t.to_string())
    }

    #[test]
    fn bootstrap_installs_both_listeners() {
        let config = TandemConfig::from_toml_str(CONFIG).unwrap();
        let store = StateStore::open_in_memory().unwrap();
        let table = RoutingTable::new();
        let group = bootstrap(&config, &store, &table).unwrap();

        assert_eq!(group.live_target().as_str(), "blue-a");
        assert_eq!(target(&table, "staging", "1.2.3.4").as_deref(), Some("green-tg"));
        assert_eq!(target(&table, "staging", "5.6.7.8"), None);
        assert_eq!(target(&table, "production", "5.6.7.8").as_deref(), Some("blue-a"));
    }

    #[test]
    fn bootstrap_keeps_persisted_live_pointer() {
        let config = TandemConfig::from_toml_str(CONFIG).unwrap();
        let store = StateStore::open_in_memory().unwrap();
        bootstrap(&config, &store, &RoutingTable::new()).unwrap();
        store
            .swap_live_target(
                "production",
                &TargetGroupId::new("blue-a"),
                "web-blue-1",
                &tandem_core::ImageTag::parse("abc1234").unwrap(),
                5,
            )
            .unwrap();

        // A restart rebuilds the table from the stored pointer.
        let table = RoutingTable::new();
        let group = bootstrap(&config, &store, &table).unwrap();
        assert_eq!(group.live_target().as_str(), "blue-b");
        assert_eq!(target(&table, "production", "5.6.7.8").as_deref(), Some("blue-b"));
    }

    #[tokio::test]
    async fn assemble_wires_a_working_coordinator() {
        let config = TandemConfig::from_toml_str(CONFIG).unwrap();
        let store = StateStore::open_in_memory().unwrap();
        let table = RoutingTable::new();
        bootstrap(&config, &store, &table).unwrap();
        let state = assemble(&config, store, table, Adapters::from_config(&config)).unwrap();

        assert!(state.promoter.current().unwrap().is_none());
        assert_eq!(state.coordinator.tracked_branch(), "main");
    }
}
