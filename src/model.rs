//! Core data model for harvested records and their images.
//!
//! Two families of types live here:
//!
//! - **Storage types** ([`Record`], [`ImageRef`], [`ImageStatus`],
//!   [`RejectReason`]) - what gets persisted to the raw store as `info.json`
//!   and mutated by the harvest and cleaning stages.
//! - **Wire types** ([`ListingPage`], [`RecordSummary`], [`RecordDetail`]) -
//!   what the listing and detail endpoints return. Field aliases accept the
//!   upstream catalog's original naming so both response shapes deserialize
//!   into one model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Stable upstream identifier for a harvested record.
///
/// Upstream serves ids as either JSON numbers or strings depending on the
/// endpoint, so deserialization accepts both and normalizes to a string.
/// Ids are immutable once assigned and globally unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a record id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdVisitor;

        impl de::Visitor<'_> for IdVisitor {
            type Value = RecordId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or integer record id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<RecordId, E> {
                Ok(RecordId(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<RecordId, E> {
                Ok(RecordId(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<RecordId, E> {
                Ok(RecordId(v.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// Lifecycle status of a single image belonging to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Discovered but not yet fetched.
    Pending,
    /// Fetched, written to the raw store, and content-hashed.
    Downloaded,
    /// Fetch exhausted retries, hit a permanent error, or the bytes did not
    /// decode as an image (corruption). Distinct from a cleaning decision.
    Failed,
    /// Removed by a cleaning filter; `reject_reason` records which one.
    Rejected,
}

/// Why the cleaning pipeline rejected an image.
///
/// Categories are reported individually in the [`CleaningReport`] so a run
/// is auditable per filter stage.
///
/// [`CleaningReport`]: crate::clean::CleaningReport
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// File smaller than the configured minimum byte size.
    BelowMinBytes,
    /// Pixel dimensions below the configured minimum.
    BelowMinDimensions,
    /// Width/height ratio outside the configured bounds.
    AspectRatioOutOfBounds,
    /// Content hash already kept for an earlier image in traversal order.
    DuplicateContent,
    /// Classifier reported the target subject absent.
    NotTargetSubject,
    /// Classifier confidence below the configured threshold.
    LowConfidence,
    /// Classifier call failed and strict mode rejects inconclusive results.
    ClassifierInconclusive,
}

impl RejectReason {
    /// Stable label used in reports and log output.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::BelowMinBytes => "below_min_bytes",
            Self::BelowMinDimensions => "below_min_dimensions",
            Self::AspectRatioOutOfBounds => "aspect_ratio_out_of_bounds",
            Self::DuplicateContent => "duplicate_content",
            Self::NotTargetSubject => "not_target_subject",
            Self::LowConfidence => "low_confidence",
            Self::ClassifierInconclusive => "classifier_inconclusive",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One image owned by a record.
///
/// `content_hash` is present only once the image reaches
/// [`ImageStatus::Downloaded`]; `reject_reason` only when the status is
/// [`ImageStatus::Rejected`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    /// Where the image was (or will be) fetched from.
    pub source_url: String,

    /// Location in the raw store once downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,

    /// Lowercase hex SHA-256 of the downloaded bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Current lifecycle status.
    pub status: ImageStatus,

    /// Set iff `status` is `Rejected`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,

    /// Human-readable failure detail for `Failed` images (last error seen).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ImageRef {
    /// Creates a pending image ref for a source URL.
    #[must_use]
    pub fn pending(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            local_path: None,
            content_hash: None,
            status: ImageStatus::Pending,
            reject_reason: None,
            failure: None,
        }
    }

    /// Marks this ref rejected with the given reason.
    pub fn reject(&mut self, reason: RejectReason) {
        self.status = ImageStatus::Rejected;
        self.reject_reason = Some(reason);
    }

    /// True when the image survived download and has not been rejected.
    #[must_use]
    pub fn is_kept(&self) -> bool {
        self.status == ImageStatus::Downloaded
    }
}

/// Free-form per-record metadata with a typed core.
///
/// Upstream has no fixed schema, so the fields the pipeline actually reads
/// are modeled explicitly and everything unrecognized lands in `extra`,
/// preserved verbatim for the final dataset's provenance artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Short listing blurb shown next to the record upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Everything upstream sent that the pipeline does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One harvested entity: metadata plus an ordered image set.
///
/// Created when first discovered by the pagination walker; images are added
/// by the harvester and marked rejected by the cleaner. Records are never
/// deleted, only reported as emptied when every image ends up rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub display_name: String,
    /// Upstream profile URL, kept for provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub metadata: RecordMetadata,
    pub images: Vec<ImageRef>,
}

impl Record {
    /// Iterates over images that survived download and cleaning.
    pub fn kept_images(&self) -> impl Iterator<Item = &ImageRef> {
        self.images.iter().filter(|img| img.is_kept())
    }

    /// True when the record has downloaded images but all were rejected.
    #[must_use]
    pub fn is_emptied(&self) -> bool {
        !self.images.is_empty() && self.kept_images().next().is_none()
    }
}

/// One record summary as returned by the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSummary {
    #[serde(alias = "cat_id")]
    pub id: RecordId,

    #[serde(default, alias = "cat_name")]
    pub display_name: String,

    /// Relative or absolute URL of the record's detail page.
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub detail_url: Option<String>,

    /// Lead image shown on the listing page, when present.
    #[serde(default, alias = "image_1", skip_serializing_if = "Option::is_none")]
    pub lead_image_url: Option<String>,
}

/// Pagination metadata in the total-count style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    /// Current page number as reported by upstream (1-based).
    #[serde(alias = "now")]
    pub current: u32,

    #[serde(default, alias = "all_page", skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,

    /// Total record count across all pages, when upstream reports it.
    #[serde(default, alias = "rows", skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,
}

/// One page of the listing endpoint's response.
///
/// Upstream catalogs paginate in one of two styles: a `page` block with
/// total counts, or a bare `has_more` flag. The walker tolerates either;
/// when both are absent an empty `records` list terminates the crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingPage {
    #[serde(alias = "foster_list")]
    pub records: Vec<RecordSummary>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

/// Detail endpoint response: full metadata plus the ordered image list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDetail {
    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub metadata: RecordMetadata,

    /// Ordered image URLs; order is preserved through download and into the
    /// final dataset layout.
    #[serde(default, alias = "images")]
    pub image_urls: Vec<String>,
}
