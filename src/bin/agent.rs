use std::sync::Arc;

use guardia_monitoring::agent::{AgentIdentity, AgentScheduler};
use guardia_monitoring::config::Args;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

fn init(debug: bool) {
    let level = if debug { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = filter::Targets::new().with_target("guardia_monitoring", level).with_target("agent", level);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::load();
    init(args.debug);

    let identity = AgentIdentity {
        server_url: args.server_url,
        name: args.agent_name,
        location: args.agent_location,
        only_location: args.only_location,
        access_key: args.agent_key,
    };

    let scheduler = Arc::new(AgentScheduler::new(identity)?);
    scheduler.run().await;
    Ok(())
}
