use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect to the test database and apply migrations.
///
/// Tests using this helper are `#[ignore]`d by default and run with:
///   DATABASE_URL=postgres://... cargo test -- --ignored
pub async fn setup_pool() -> PgPool {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

pub async fn teardown_pool(pool: PgPool) {
    pool.close().await;
}
