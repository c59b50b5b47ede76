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

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;

/// The six GA4 event variants the engine ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Purchase,
    AddToCart,
    PageView,
    ViewSearchResults,
    NoSearchResults,
    ViewItem,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::Purchase,
        EventType::AddToCart,
        EventType::PageView,
        EventType::ViewSearchResults,
        EventType::NoSearchResults,
        EventType::ViewItem,
    ];

    /// Destination table; identical to the GA4 event name except that
    /// `no_search_results` also collects `view_search_results_no_results`.
    pub fn table_name(&self) -> &'static str {
        match self {
            EventType::Purchase => "purchase",
            EventType::AddToCart => "add_to_cart",
            EventType::PageView => "page_view",
            EventType::ViewSearchResults => "view_search_results",
            EventType::NoSearchResults => "no_search_results",
            EventType::ViewItem => "view_item",
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

/// A purchase transaction extracted from the warehouse.
///
/// `event_date` keeps the source's compact `YYYYMMDD` form; it is parsed to a
/// calendar date at insert time. `event_timestamp` is an opaque microsecond
/// string and is never interpreted, only ordered on. `raw_data` preserves the
/// full source document; the typed columns are lossy conveniences over it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurchaseEvent {
    pub event_date: String,
    pub event_timestamp: Option<String>,
    pub user_pseudo_id: Option<String>,
    pub user_prop_webuserid: Option<String>,
    pub user_prop_default_branch_id: Option<String>,
    pub param_ga_session_id: Option<String>,
    pub param_transaction_id: Option<String>,
    pub param_page_title: Option<String>,
    pub param_page_location: Option<String>,
    pub ecommerce_purchase_revenue: Option<BigDecimal>,
    pub items_json: Option<Value>,
    pub device_category: Option<String>,
    pub device_operating_system: Option<String>,
    pub geo_country: Option<String>,
    pub geo_city: Option<String>,
    pub raw_data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddToCartEvent {
    pub event_date: String,
    pub event_timestamp: Option<String>,
    pub user_pseudo_id: Option<String>,
    pub user_prop_webuserid: Option<String>,
    pub user_prop_default_branch_id: Option<String>,
    pub param_ga_session_id: Option<String>,
    pub param_page_title: Option<String>,
    pub param_page_location: Option<String>,
    pub first_item_item_id: Option<String>,
    pub first_item_item_name: Option<String>,
    pub first_item_item_category: Option<String>,
    pub first_item_price: Option<BigDecimal>,
    pub first_item_quantity: Option<i32>,
    pub items_json: Option<Value>,
    pub device_category: Option<String>,
    pub device_operating_system: Option<String>,
    pub geo_country: Option<String>,
    pub geo_city: Option<String>,
    pub raw_data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageViewEvent {
    pub event_date: String,
    pub event_timestamp: Option<String>,
    pub user_pseudo_id: Option<String>,
    pub user_prop_webuserid: Option<String>,
    pub user_prop_default_branch_id: Option<String>,
    pub param_ga_session_id: Option<String>,
    pub param_page_title: Option<String>,
    pub param_page_location: Option<String>,
    pub param_page_referrer: Option<String>,
    pub device_category: Option<String>,
    pub device_operating_system: Option<String>,
    pub geo_country: Option<String>,
    pub geo_city: Option<String>,
    pub raw_data: Option<Value>,
}

/// A successful search (`view_search_results`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchEvent {
    pub event_date: String,
    pub event_timestamp: Option<String>,
    pub user_pseudo_id: Option<String>,
    pub user_prop_webuserid: Option<String>,
    pub user_prop_default_branch_id: Option<String>,
    pub param_ga_session_id: Option<String>,
    pub param_search_term: Option<String>,
    pub param_page_title: Option<String>,
    pub param_page_location: Option<String>,
    pub device_category: Option<String>,
    pub device_operating_system: Option<String>,
    pub geo_country: Option<String>,
    pub geo_city: Option<String>,
    pub raw_data: Option<Value>,
}

/// A search the site tagged as returning no results. The upstream GA4
/// implementation fires this for every search on the search page; the
/// reclassifier later decides which of these were genuine misses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoSearchEvent {
    pub event_date: String,
    pub event_timestamp: Option<String>,
    pub user_pseudo_id: Option<String>,
    pub user_prop_webuserid: Option<String>,
    pub user_prop_default_branch_id: Option<String>,
    pub param_ga_session_id: Option<String>,
    pub param_no_search_results_term: Option<String>,
    pub param_page_title: Option<String>,
    pub param_page_location: Option<String>,
    pub device_category: Option<String>,
    pub device_operating_system: Option<String>,
    pub geo_country: Option<String>,
    pub geo_city: Option<String>,
    pub raw_data: Option<Value>,
}

impl From<NoSearchEvent> for SearchEvent {
    /// Relabels a mistagged no-results search: the search term moves from
    /// `param_no_search_results_term` to `param_search_term`, everything else
    /// is untouched.
    fn from(event: NoSearchEvent) -> Self {
        SearchEvent {
            event_date: event.event_date,
            event_timestamp: event.event_timestamp,
            user_pseudo_id: event.user_pseudo_id,
            user_prop_webuserid: event.user_prop_webuserid,
            user_prop_default_branch_id: event.user_prop_default_branch_id,
            param_ga_session_id: event.param_ga_session_id,
            param_search_term: event.param_no_search_results_term,
            param_page_title: event.param_page_title,
            param_page_location: event.param_page_location,
            device_category: event.device_category,
            device_operating_system: event.device_operating_system,
            geo_country: event.geo_country,
            geo_city: event.geo_city,
            raw_data: event.raw_data,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewItemEvent {
    pub event_date: String,
    pub event_timestamp: Option<String>,
    pub user_pseudo_id: Option<String>,
    pub user_prop_webuserid: Option<String>,
    pub user_prop_default_branch_id: Option<String>,
    pub param_ga_session_id: Option<String>,
    pub first_item_item_id: Option<String>,
    pub first_item_item_name: Option<String>,
    pub first_item_item_category: Option<String>,
    pub first_item_price: Option<BigDecimal>,
    pub param_page_title: Option<String>,
    pub param_page_location: Option<String>,
    pub items_json: Option<Value>,
    pub device_category: Option<String>,
    pub device_operating_system: Option<String>,
    pub geo_country: Option<String>,
    pub geo_city: Option<String>,
    pub raw_data: Option<Value>,
}

/// Extraction result for one date range: one vector per event type, each in
/// `event_timestamp` ascending order.
#[derive(Debug, Clone, Default)]
pub struct EventsByType {
    pub purchase: Vec<PurchaseEvent>,
    pub add_to_cart: Vec<AddToCartEvent>,
    pub page_view: Vec<PageViewEvent>,
    pub view_search_results: Vec<SearchEvent>,
    pub no_search_results: Vec<NoSearchEvent>,
    pub view_item: Vec<ViewItemEvent>,
}

impl EventsByType {
    pub fn into_batches(self) -> [EventBatch; 6] {
        [
            EventBatch::Purchase(self.purchase),
            EventBatch::AddToCart(self.add_to_cart),
            EventBatch::PageView(self.page_view),
            EventBatch::ViewSearchResults(self.view_search_results),
            EventBatch::NoSearchResults(self.no_search_results),
            EventBatch::ViewItem(self.view_item),
        ]
    }
}

/// A homogeneous slice of records destined for one event table.
#[derive(Debug, Clone)]
pub enum EventBatch {
    Purchase(Vec<PurchaseEvent>),
    AddToCart(Vec<AddToCartEvent>),
    PageView(Vec<PageViewEvent>),
    ViewSearchResults(Vec<SearchEvent>),
    NoSearchResults(Vec<NoSearchEvent>),
    ViewItem(Vec<ViewItemEvent>),
}

impl EventBatch {
    pub fn event_type(&self) -> EventType {
        match self {
            EventBatch::Purchase(_) => EventType::Purchase,
            EventBatch::AddToCart(_) => EventType::AddToCart,
            EventBatch::PageView(_) => EventType::PageView,
            EventBatch::ViewSearchResults(_) => EventType::ViewSearchResults,
            EventBatch::NoSearchResults(_) => EventType::NoSearchResults,
            EventBatch::ViewItem(_) => EventType::ViewItem,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EventBatch::Purchase(v) => v.len(),
            EventBatch::AddToCart(v) => v.len(),
            EventBatch::PageView(v) => v.len(),
            EventBatch::ViewSearchResults(v) => v.len(),
            EventBatch::NoSearchResults(v) => v.len(),
            EventBatch::ViewItem(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parses the warehouse's compact `YYYYMMDD` date form; dates already in
/// ISO `YYYY-MM-DD` form pass through unchanged.
pub fn parse_event_date(raw: &str) -> Option<chrono::NaiveDate> {
    if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
        chrono::NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
    } else {
        chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_type_table_names() {
        let names: Vec<&str> = EventType::ALL.iter().map(|t| t.table_name()).collect();
        assert_eq!(
            names,
            vec![
                "purchase",
                "add_to_cart",
                "page_view",
                "view_search_results",
                "no_search_results",
                "view_item",
            ]
        );
    }

    #[test]
    fn test_relabel_moves_search_term_only() {
        let event = NoSearchEvent {
            event_date: "20240101".to_string(),
            event_timestamp: Some("1000".to_string()),
            param_no_search_results_term: Some("copper pipe".to_string()),
            param_page_title: Some("Results for copper pipe".to_string()),
            param_ga_session_id: Some("s-1".to_string()),
            ..Default::default()
        };
        let relabeled = SearchEvent::from(event);
        assert_eq!(relabeled.param_search_term.as_deref(), Some("copper pipe"));
        assert_eq!(
            relabeled.param_page_title.as_deref(),
            Some("Results for copper pipe")
        );
        assert_eq!(relabeled.event_timestamp.as_deref(), Some("1000"));
        assert_eq!(relabeled.param_ga_session_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn test_parse_event_date_compact_and_iso() {
        let expected = chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(parse_event_date("20240115"), Some(expected));
        assert_eq!(parse_event_date("2024-01-15"), Some(expected));
        assert_eq!(parse_event_date("not-a-date"), None);
    }

    #[test]
    fn test_batches_keep_type_pairing() {
        let events = EventsByType {
            purchase: vec![PurchaseEvent::default()],
            ..Default::default()
        };
        let batches = events.into_batches();
        assert_eq!(batches[0].event_type(), EventType::Purchase);
        assert_eq!(batches[0].len(), 1);
        assert!(batches[2].is_empty());
    }
}
