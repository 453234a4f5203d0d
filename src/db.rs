use crate::config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

pub async fn init_pool(cfg: &DatabaseConfig) -> Result<Pool<Postgres>, sqlx::Error> {
    let statement_timeout_ms = cfg.statement_timeout.as_millis() as i64;
    PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(cfg.acquire_timeout)
        .after_connect(move |conn, _meta| {
            // Store operations carry a bounded deadline; enforce it at the
            // session level so a stuck statement cannot hold a pooled
            // connection indefinitely.
            Box::pin(async move {
                sqlx::query(&format!("SET statement_timeout = {statement_timeout_ms}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&cfg.url)
        .await
}
