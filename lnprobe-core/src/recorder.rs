use crate::config::DatabaseConfig;
use crate::error::PersistError;
use crate::probe::{ProbeAttempt, ProbeRecord};
use async_trait::async_trait;
use log::{debug, error, info};
use std::sync::{Arc, Mutex};
use tokio_postgres::NoTls;

#[cfg(test)]
use mockall::{automock, predicate::*};

/// Append-only sink for finished probe attempts.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OutcomeRecorder: Send + Sync {
    async fn record(&self, attempt: ProbeAttempt) -> Result<(), PersistError>;
}

pub struct PostgresRecorder {
    client: tokio_postgres::Client,
    table: String,
}

impl PostgresRecorder {
    /// Connects and makes sure the outcome table exists.
    pub async fn connect(
        database: &DatabaseConfig,
        table_name: &str,
    ) -> Result<Self, PersistError> {
        let mut config = tokio_postgres::Config::new();
        config
            .dbname(&database.dbname)
            .user(&database.user)
            .password(&database.password)
            .host(&database.host)
            .port(database.port);

        let (client, connection) = config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection closed: {e}");
            }
        });
        info!("Connected to database {}", database.dbname);

        let recorder = Self {
            client,
            table: quote_identifier(table_name),
        };
        recorder.create_table().await?;
        Ok(recorder)
    }

    async fn create_table(&self) -> Result<(), PersistError> {
        let statement = create_table_statement(&self.table);
        self.client.batch_execute(&statement).await?;
        info!("Table {} ready", self.table);
        Ok(())
    }
}

#[async_trait]
impl OutcomeRecorder for PostgresRecorder {
    async fn record(&self, attempt: ProbeAttempt) -> Result<(), PersistError> {
        let record = attempt.to_record()?;
        let statement = insert_statement(&self.table);
        self.client
            .execute(
                statement.as_str(),
                &[
                    &record.dest,
                    &record.failcode,
                    &record.erring_node,
                    &record.erring_channel,
                    &record.route,
                    &record.time,
                    &record.amount,
                ],
            )
            .await?;
        debug!("Recorded {} for {}", record.failcode, record.dest);
        Ok(())
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn create_table_statement(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id SERIAL PRIMARY KEY,
            dest VARCHAR,
            failcode VARCHAR,
            erring_node VARCHAR,
            erring_channel VARCHAR,
            route VARCHAR,
            time VARCHAR,
            amount VARCHAR
        )"
    )
}

fn insert_statement(table: &str) -> String {
    format!(
        "INSERT INTO {table} (dest, failcode, erring_node, erring_channel, route, time, amount) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)"
    )
}

/// Keeps rows in memory. Used for dry runs.
#[derive(Clone, Default)]
pub struct MemoryRecorder {
    records: Arc<Mutex<Vec<ProbeRecord>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Result<Vec<ProbeRecord>, PersistError> {
        let records = self.records.lock().map_err(|_| PersistError::LockError)?;
        Ok(records.clone())
    }
}

#[async_trait]
impl OutcomeRecorder for MemoryRecorder {
    async fn record(&self, attempt: ProbeAttempt) -> Result<(), PersistError> {
        let record = attempt.to_record()?;
        let mut records = self.records.lock().map_err(|_| PersistError::LockError)?;
        records.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::NO_ROUTE;

    #[test]
    fn quotes_table_names() {
        assert_eq!(quote_identifier("probes"), "\"probes\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn statements_target_quoted_table() {
        let table = quote_identifier("probe_run_7");
        assert!(create_table_statement(&table)
            .starts_with("CREATE TABLE IF NOT EXISTS \"probe_run_7\" ("));
        assert!(create_table_statement(&table).contains("id SERIAL PRIMARY KEY"));
        assert_eq!(
            insert_statement(&table),
            "INSERT INTO \"probe_run_7\" (dest, failcode, erring_node, erring_channel, route, time, amount) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
    }

    #[tokio::test]
    async fn memory_recorder_appends() {
        let recorder = MemoryRecorder::new();
        recorder
            .record(ProbeAttempt::new("02a", 1_000))
            .await
            .unwrap();
        recorder
            .record(ProbeAttempt::new("02b", 1_000))
            .await
            .unwrap();

        let records = recorder.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].dest, "02a");
        assert_eq!(records[1].failcode, NO_ROUTE);
    }
}
