use diesel::{Connection, PgConnection};
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager},
    AsyncPgConnection,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::env;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

pub type PgPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct DatabaseConnections {
    pub postgres: PgPool,
}

impl DatabaseConnections {
    fn run_migrations(db_url: &str) -> Result<(), std::io::Error> {
        let mut conn = PgConnection::establish(db_url).expect("Can't connect to database");
        conn.run_pending_migrations(MIGRATIONS)
            .expect("Can't run migrations");
        Ok(())
    }

    pub fn postgres_pool(db_url: String) -> PgPool {
        let config = AsyncDieselConnectionManager::new(db_url);
        let max_pool_size = env::var("MAX_POOL_SIZE")
            .unwrap_or("8".to_string())
            .parse()
            .unwrap();
        Pool::builder(config)
            .max_size(max_pool_size)
            .build()
            .expect("Failed to create pool")
    }

    async fn init_postgres() -> Result<PgPool, std::io::Error> {
        let db_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let db_url_pool = db_url.clone();
        tokio::task::spawn_blocking(move || Self::run_migrations(&db_url)).await??;
        let pool = Self::postgres_pool(db_url_pool);

        Ok(pool)
    }

    pub async fn init() -> Result<Self, std::io::Error> {
        Ok(Self {
            postgres: Self::init_postgres().await?,
        })
    }
}
