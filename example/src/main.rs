use tracing::trace_span;
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use hera::Result;

mod connection;
mod query;
mod from_row;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::Registry::default()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    trace_span!("connection").in_scope(connection::main)?;
    trace_span!("query").in_scope(query::main)?;
    trace_span!("from_row").in_scope(from_row::main)?;

    Ok(())
}
