use chrono::{DateTime, FixedOffset, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Where an image came from and when it was saved.
///
/// Supplied by the caller and never inferred. `saved_at` keeps the caller's UTC offset: EXIF
/// datetimes have no timezone field, so they are rendered as the wall-clock time in that
/// offset, while PNG and XMP timestamps are rendered in UTC.
///
/// # Example
///
/// ```rust
/// use chrono::DateTime;
/// use provenance_embed::record::ProvenanceRecord;
///
/// let saved_at = DateTime::parse_from_rfc3339("2026-01-09T14:30:45+00:00").unwrap();
/// let record = ProvenanceRecord::new("https://example.com/a", "https://cdn.example.com/a.jpg", saved_at);
/// assert_eq!(record.exif_datetime(), "2026:01:09 14:30:45");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    /// Page the image was found on.
    pub page_url: String,
    /// The image's own address.
    pub image_url: String,
    pub saved_at: DateTime<FixedOffset>,
}

impl ProvenanceRecord {
    pub fn new(
        page_url: impl Into<String>,
        image_url: impl Into<String>,
        saved_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            page_url: page_url.into(),
            image_url: image_url.into(),
            saved_at,
        }
    }

    /// Same as [`ProvenanceRecord::new`], stamped with the current local time.
    pub fn now(page_url: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self::new(page_url, image_url, Local::now().fixed_offset())
    }

    /// `"Source: {page} | Image: {image}"`, shared by EXIF and XMP.
    pub fn description(&self) -> String {
        format!("Source: {} | Image: {}", self.page_url, self.image_url)
    }

    /// EXIF `DateTime` form, `YYYY:MM:DD HH:MM:SS`, local wall-clock, no terminator.
    pub fn exif_datetime(&self) -> String {
        self.saved_at.format("%Y:%m:%d %H:%M:%S").to_string()
    }

    /// RFC 1123 form required for the PNG `Creation Time` keyword, always in GMT.
    pub fn http_date(&self) -> String {
        self.saved_at
            .with_timezone(&Utc)
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }

    /// ISO 8601 in UTC with millisecond precision, e.g. `2026-01-09T14:30:45.000Z`.
    pub fn iso8601(&self) -> String {
        self.saved_at
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Human-readable summary stored in the PNG `Comment` keyword.
    pub fn comment(&self) -> String {
        format!(
            "Saved from {} | Image: {} | Saved at: {}",
            self.page_url,
            self.image_url,
            self.iso8601()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: &str) -> ProvenanceRecord {
        ProvenanceRecord::new(
            "https://example.com/a",
            "https://cdn.example.com/a.jpg",
            DateTime::parse_from_rfc3339(ts).unwrap(),
        )
    }

    #[test]
    fn description_joins_both_urls() {
        assert_eq!(
            record("2026-01-09T14:30:45Z").description(),
            "Source: https://example.com/a | Image: https://cdn.example.com/a.jpg"
        );
    }

    #[test]
    fn exif_datetime_uses_local_wall_clock() {
        let r = record("2026-01-09T14:30:45+09:00");
        assert_eq!(r.exif_datetime(), "2026:01:09 14:30:45");
    }

    #[test]
    fn http_date_is_gmt() {
        let r = record("2025-12-16T15:30:45+01:00");
        assert_eq!(r.http_date(), "Tue, 16 Dec 2025 14:30:45 GMT");
    }

    #[test]
    fn http_date_zero_pads_day() {
        let r = record("2026-01-09T04:05:06Z");
        assert_eq!(r.http_date(), "Fri, 09 Jan 2026 04:05:06 GMT");
    }

    #[test]
    fn iso8601_is_utc_millis() {
        let r = record("2026-01-09T14:30:45-05:00");
        assert_eq!(r.iso8601(), "2026-01-09T19:30:45.000Z");
    }

    #[test]
    fn comment_embeds_urls_and_timestamp() {
        let c = record("2026-01-09T14:30:45Z").comment();
        assert!(c.contains("https://example.com/a"));
        assert!(c.contains("https://cdn.example.com/a.jpg"));
        assert!(c.contains("2026-01-09T14:30:45.000Z"));
    }
}
