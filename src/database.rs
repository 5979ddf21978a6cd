use std::sync::Arc;

use bb8_postgres::bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use tokio_postgres::NoTls;

use crate::auth::PermissionGate;
use crate::config::Config;
use crate::store::MediaStore;

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

pub struct AppState {
    pub store: Arc<dyn MediaStore>,
    pub permissions: Arc<dyn PermissionGate>,
    pub config: Config,
}

pub async fn establish_pool_connection(config: &Config) -> Result<PgPool, tokio_postgres::Error> {
    let conn_manager = PostgresConnectionManager::new_from_stringlike(&config.database_url, NoTls)?;

    let pool = Pool::builder()
        .min_idle(Some(1))
        .max_size(config.db_pool_max_size)
        .build(conn_manager)
        .await?;
    Ok(pool)
}
