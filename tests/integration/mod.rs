mod connection_test;
mod ingestion_test;
mod persistence_test;
mod query_test;
mod schema_test;
mod streaming_test;
