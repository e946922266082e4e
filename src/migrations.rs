use sqlx::{Pool, Postgres};

// Embed SQL migrations at compile time for deterministic startup
const MIG_0001: &str = include_str!("../migrations/0001_create_conversations.sql");
const MIG_0002: &str = include_str!("../migrations/0002_create_messages.sql");
const MIG_0003: &str = include_str!("../migrations/0003_create_message_reads.sql");

pub async fn run_all(db: &Pool<Postgres>) -> Result<(), sqlx::Error> {
    // Run sequentially; each file may contain multiple statements and every
    // statement is written to be re-runnable.
    for (i, sql) in [MIG_0001, MIG_0002, MIG_0003].into_iter().enumerate() {
        let label = i + 1;
        match sqlx::query(sql).execute(db).await {
            Ok(_) => tracing::info!(migration = %label, "conversation-service migration applied"),
            Err(e) => {
                tracing::warn!(migration = %label, error = %e, "migration may have been applied already");
            }
        }
    }
    Ok(())
}
