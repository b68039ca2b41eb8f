use telecare_core::db::RecordFilter;
use telecare_core::util::normalize_text_option;
use telecare_core::{Collection, Record, SyncSettings, SyncStatus};

use crate::commands::common::{
    format_record_lines, open_engine, record_to_list_item, RecordListItem,
};
use crate::error::CliError;

#[derive(Debug, Default)]
pub struct ListQuery {
    pub patient_id: Option<String>,
    pub date: Option<String>,
    pub status: Option<SyncStatus>,
    pub limit: usize,
}

impl ListQuery {
    fn filter(self) -> RecordFilter {
        RecordFilter {
            owner_id: normalize_text_option(self.patient_id),
            date: normalize_text_option(self.date),
            sync_status: self.status,
            limit: Some(self.limit),
        }
    }
}

pub async fn list_records(
    collection: Collection,
    query: ListQuery,
    settings: &SyncSettings,
) -> Result<Vec<Record>, CliError> {
    let engine = open_engine(settings).await?;
    Ok(engine.list(collection, &query.filter()).await?)
}

pub async fn run_list(
    collection: Collection,
    query: ListQuery,
    as_json: bool,
    settings: &SyncSettings,
) -> Result<(), CliError> {
    let records = list_records(collection, query, settings).await?;

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if records.is_empty() {
        println!("No {collection} records.");
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}
