use telecare_core::{Collection, SyncSettings};

use crate::commands::common::{open_engine, parse_record_id};
use crate::error::CliError;

pub async fn run_retry(
    collection: Collection,
    id: &str,
    settings: &SyncSettings,
) -> Result<(), CliError> {
    let id = parse_record_id(id)?;
    let engine = open_engine(settings).await?;
    let queue_id = engine.retry_failed(collection, &id).await?;

    println!("{id} queued as {queue_id}");
    Ok(())
}

pub async fn run_delete(
    collection: Collection,
    id: &str,
    settings: &SyncSettings,
) -> Result<bool, CliError> {
    let id = parse_record_id(id)?;
    let engine = open_engine(settings).await?;

    let deleted = engine.delete_record(collection, &id).await?;
    if deleted {
        println!("{id}");
    } else {
        println!("No {collection} record {id}");
    }
    Ok(deleted)
}
