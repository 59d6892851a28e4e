// crates/detox-web/src/request.rs
// ============================================================================
// Module: Request Context
// Description: Parameter merging, action selection, and request errors.
// Purpose: Turn raw query/form input into a validated request context.
// Dependencies: axum, detox-core, serde, url
// ============================================================================

//! ## Overview
//! Query-string and form-body parameters are merged into [`RequestParams`],
//! with body values winning. [`DetoxAction::from_params`] picks the operation
//! and validates its required parameters; cycle and partition selectors never
//! fail validation and instead fall back during resolution.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use detox_core::CycleOperation;
use detox_core::CycleRequest;
use detox_core::InventoryCategory;
use detox_core::NamePattern;
use detox_core::StoreError;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Parameters
// ============================================================================

/// Merged request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    /// Parameter values by name; later sources overwrite earlier ones.
    values: BTreeMap<String, String>,
}

impl RequestParams {
    /// Merges a query string with a form-encoded body (body wins).
    #[must_use]
    pub fn merge(query: Option<&str>, body: &[u8]) -> Self {
        let mut values = BTreeMap::new();
        let sources = query.map(str::as_bytes).into_iter().chain(std::iter::once(body));
        for source in sources {
            for (key, value) in url::form_urlencoded::parse(source) {
                values.insert(key.into_owned(), value.into_owned());
            }
        }
        Self {
            values,
        }
    }

    /// Returns the value of `key`, when present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns true when `key` is present.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Extracts the cycle and partition selectors.
    ///
    /// Unparseable numbers are dropped so resolution falls back.
    #[must_use]
    pub fn cycle_request(&self) -> CycleRequest {
        CycleRequest {
            cycle_number: self.number("cycleNumber"),
            partition_id: self.number("partitionId"),
            partition_name: self.get("partition").map(str::to_string),
        }
    }

    /// Parses `key` as an unsigned integer.
    fn number(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|value| value.trim().parse().ok())
    }

    /// Returns a required name pattern parameter.
    fn pattern(&self, key: &str) -> Result<NamePattern, RequestError> {
        let raw = self
            .get(key)
            .ok_or_else(|| RequestError::InvalidParams(format!("missing parameter {key}")))?;
        NamePattern::parse(raw).map_err(|err| RequestError::InvalidParams(format!("{key}: {err}")))
    }
}

// ============================================================================
// SECTION: Actions
// ============================================================================

/// Report selected by `getData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    /// Per-site summary for the cycle and its predecessor.
    Summary,
    /// Rows at sites matching the pattern.
    SiteDetail(NamePattern),
    /// Rows grouped by an inventory category.
    Inventory(InventoryCategory),
}

/// Operation requested by a `/detox` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetoxAction {
    /// Latest completed cycle number as plain text.
    CheckUpdate,
    /// Partitions with completed cycles of the operation.
    Partitions(CycleOperation),
    /// JSON report.
    Data(DataType),
    /// Rows of datasets matching the pattern, grouped by site.
    SearchDataset(NamePattern),
    /// Tab-separated deletion list.
    DumpDeletions,
    /// HTML shell.
    Page,
}

impl DetoxAction {
    /// Selects and validates the action named by `params`.
    ///
    /// Flags are checked in a fixed order; the first present one wins.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidParams`] when a required parameter is
    /// missing or malformed.
    pub fn from_params(
        params: &RequestParams,
        default_operation: CycleOperation,
    ) -> Result<Self, RequestError> {
        if params.has("checkUpdate") {
            return Ok(Self::CheckUpdate);
        }
        if params.has("getPartitions") {
            let operation = match params.get("operation") {
                Some(label) => CycleOperation::parse(label).ok_or_else(|| {
                    RequestError::InvalidParams(format!("unknown operation {label}"))
                })?,
                None => default_operation,
            };
            return Ok(Self::Partitions(operation));
        }
        if params.has("getData") {
            let data_type = match params.get("dataType") {
                Some("summary") => DataType::Summary,
                Some("siteDetail") => DataType::SiteDetail(params.pattern("siteName")?),
                Some("inventory") => {
                    let label = params.get("category").unwrap_or_default();
                    let category = InventoryCategory::parse(label)
                        .map_err(|err| RequestError::InvalidParams(err.to_string()))?;
                    DataType::Inventory(category)
                }
                Some(other) => {
                    return Err(RequestError::InvalidParams(format!("unknown dataType {other}")));
                }
                None => {
                    return Err(RequestError::InvalidParams(
                        "missing parameter dataType".to_string(),
                    ));
                }
            };
            return Ok(Self::Data(data_type));
        }
        if params.has("searchDataset") {
            return Ok(Self::SearchDataset(params.pattern("datasetName")?));
        }
        if params.has("dumpDeletions") {
            return Ok(Self::DumpDeletions);
        }
        Ok(Self::Page)
    }

    /// Returns the audit label of the action.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::CheckUpdate => "check_update",
            Self::Partitions(_) => "get_partitions",
            Self::Data(DataType::Summary) => "summary",
            Self::Data(DataType::SiteDetail(_)) => "site_detail",
            Self::Data(DataType::Inventory(_)) => "inventory",
            Self::SearchDataset(_) => "search_dataset",
            Self::DumpDeletions => "dump_deletions",
            Self::Page => "page",
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Request handling failures.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Request parameters failed validation.
    #[error("{0}")]
    InvalidParams(String),
    /// Request body exceeded the configured limit.
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    /// Snapshot store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Store did not answer a readiness probe.
    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
    /// Runtime failure outside the store.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RequestError {
    /// Returns the HTTP status for the error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidParams(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Structured error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Always `error`.
    result: &'static str,
    /// Human-readable message.
    message: String,
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            result: "error",
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
