use std::{env::var, time::Duration};
use hera::{Config, Connection, Registry, Result, query};

pub fn main() -> Result<()> {
    let url = var("HERA_URL").unwrap_or_else(|_| "hera://localhost:10101".into());

    let mut conn = Connection::connect(Config::parse(&url)?)?;
    query::<_, _, ()>("select 1 from dual", &mut conn).fetch_all()?;
    tracing::info!("connected{}", conn.meta());
    conn.close()?;

    let mut conn = Connection::connect_env()?;
    assert!(conn.is_valid(Duration::from_secs(5)));
    conn.close()?;

    // connections of one registry share statement caches and markdown budgets
    let registry = Registry::new();
    let mut conn = registry.connect(&url)?;
    query::<_, _, ()>("select 1 from dual", &mut conn).fetch_all()?;
    let mut other = registry.connect(&url)?;
    query::<_, _, ()>("select 1 from dual", &mut other).fetch_all()?;
    assert!(!conn.statement_cache().is_empty());

    Ok(())
}
