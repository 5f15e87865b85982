use tracing::{Instrument, trace_span};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use pgraw::Result;

mod query;
mod simple;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::Registry::default()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    simple::main().instrument(trace_span!("simple")).await?;
    query::main().instrument(trace_span!("query")).await?;

    Ok(())
}
