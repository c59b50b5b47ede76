/*
 * This file is part of the Insights Analytics backend.
 *
 * Copyright (C) 2025 Insights Analytics contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tenant::events::model::EventType;
use crate::tenant::jobs::types::DataType;

/// What a single ingestion job has been asked to do: an inclusive date range
/// and the subset of data types to pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJobRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub data_types: Vec<DataType>,
}

impl IngestionJobRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.start_date > self.end_date {
            return Err(format!(
                "start_date {} is after end_date {}",
                self.start_date, self.end_date
            ));
        }
        if self.data_types.is_empty() {
            return Err("data_types must not be empty".to_string());
        }
        Ok(())
    }

    pub fn includes(&self, data_type: DataType) -> bool {
        self.data_types.contains(&data_type)
    }
}

/// Sparse update of a job row: only the populated fields reach the SET
/// clause. The builder mirrors how the engine reports: start of processing,
/// advisory progress markers, then a terminal write.
#[derive(Debug, Clone, Default)]
pub struct JobStatusUpdate {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub progress: Option<Value>,
    pub records_processed: Option<Value>,
}

impl JobStatusUpdate {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn started_now(mut self) -> Self {
        self.started_at = Some(Utc::now());
        self
    }
    pub fn completed_now(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self
    }
    pub fn error_message(mut self, error_message: impl Into<String>) -> Self {
        self.error_message = Some(error_message.into());
        self
    }
    /// Advisory only; later writes may overwrite it wholesale.
    pub fn progress_step(mut self, current: &str) -> Self {
        self.progress = Some(serde_json::json!({ "current": current }));
        self
    }
    pub fn records_processed(mut self, records: Value) -> Self {
        self.records_processed = Some(records);
        self
    }
}

/// Final per-type outcome counts, persisted as the job's
/// `records_processed` JSONB blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordsProcessed {
    pub purchase: u64,
    pub add_to_cart: u64,
    pub page_view: u64,
    pub view_search_results: u64,
    pub no_search_results: u64,
    pub view_item: u64,
    pub users_processed: u64,
    pub locations_processed: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RecordsProcessed {
    pub fn set_event_count(&mut self, event_type: EventType, count: u64) {
        match event_type {
            EventType::Purchase => self.purchase = count,
            EventType::AddToCart => self.add_to_cart = count,
            EventType::PageView => self.page_view = count,
            EventType::ViewSearchResults => self.view_search_results = count,
            EventType::NoSearchResults => self.no_search_results = count,
            EventType::ViewItem => self.view_item = count,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(start: (i32, u32, u32), end: (i32, u32, u32)) -> IngestionJobRequest {
        IngestionJobRequest {
            start_date: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
            data_types: vec![DataType::Events],
        }
    }

    #[test]
    fn test_validate_accepts_single_day_range() {
        assert!(request((2024, 1, 1), (2024, 1, 1)).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let err = request((2024, 1, 2), (2024, 1, 1)).validate().unwrap_err();
        assert!(err.contains("after end_date"));
    }

    #[test]
    fn test_validate_rejects_empty_data_types() {
        let mut req = request((2024, 1, 1), (2024, 1, 2));
        req.data_types.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_records_processed_serialization_omits_empty_warnings() {
        let mut records = RecordsProcessed::default();
        records.set_event_count(EventType::Purchase, 3);
        let json = records.to_json();
        assert_eq!(json["purchase"], 3);
        assert!(json.get("warnings").is_none());

        records.warnings.push("add_to_cart: boom".to_string());
        let json = records.to_json();
        assert_eq!(json["warnings"][0], "add_to_cart: boom");
    }

    #[test]
    fn test_progress_step_shape() {
        let update = JobStatusUpdate::new().progress_step("events");
        assert_eq!(
            update.progress.unwrap(),
            serde_json::json!({"current": "events"})
        );
    }
}
