//! BAP (berita acara pemeriksaan) assembly.
//!
//! Everything here is pure: the report service gathers session metadata and
//! rows, this module decides signatures, ordering, quantities and the file
//! name, and a [`render::DocumentRenderer`] turns the result into bytes.

pub mod render;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use serde::Serialize;

use crate::directory::{DetailRow, RecapRow};
use crate::models::SessionStatus;

pub const SUBMITTER_LABEL: &str = "Dilaksanakan oleh";
pub const MANAGER_LABEL: &str = "Disetujui oleh (Mgr)";
pub const L1_LABEL: &str = "Disetujui oleh (L1)";

/// Category keys in report order.
pub const CATEGORY_ORDER: [&str; 4] = [
    "working_assets",
    "broken_assets",
    "misplaced_assets",
    "missing_assets",
];

const MISSING_CATEGORY: &str = "missing_assets";
const UNIT: &str = "Unit";

const NAIVE_LAYOUTS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];
const ZONED_LAYOUTS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"];

/// Position of a category in the report; unknown categories sort last.
pub fn category_rank(category: &str) -> usize {
    CATEGORY_ORDER
        .iter()
        .position(|c| *c == category)
        .unwrap_or(CATEGORY_ORDER.len())
}

pub fn category_label(category: &str) -> &str {
    match category {
        "working_assets" => "sesuai dan berfungsi",
        "broken_assets" => "rusak",
        "misplaced_assets" => "selisih administrasi (karena mutasi)",
        "missing_assets" => "tidak ditemukan",
        other => other,
    }
}

/// Zone the report is printed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportZone {
    offset: FixedOffset,
}

impl ReportZone {
    /// Falls back to UTC+7 (Asia/Jakarta) for an out-of-range offset.
    pub fn from_hours(hours: i32) -> Self {
        let hours = if (-12..=14).contains(&hours) { hours } else { 7 };
        let offset = FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn jakarta() -> Self {
        Self::from_hours(7)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Indonesian zone abbreviation where one exists.
    pub fn label(&self) -> String {
        match self.offset.local_minus_utc() {
            25_200 => "WIB".to_string(),
            28_800 => "WITA".to_string(),
            32_400 => "WIT".to_string(),
            secs => {
                let sign = if secs < 0 { '-' } else { '+' };
                let secs = secs.abs();
                format!("UTC{}{:02}:{:02}", sign, secs / 3600, (secs % 3600) / 60)
            }
        }
    }

    pub fn localize<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.offset)
    }

    /// Reads a stored timestamp that may come back from the database in
    /// several textual shapes. Values without an offset are taken to be in
    /// this zone. Anything unparseable is treated as absent.
    pub fn parse_timestamp(&self, raw: Option<&str>) -> Option<DateTime<FixedOffset>> {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;

        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&self.offset));
        }
        for layout in ZONED_LAYOUTS {
            if let Ok(parsed) = DateTime::parse_from_str(raw, layout) {
                return Some(parsed.with_timezone(&self.offset));
            }
        }
        for layout in NAIVE_LAYOUTS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
                return self.offset.from_local_datetime(&naive).single();
            }
        }
        None
    }

    pub fn format_stamp(&self, at: Option<&DateTime<FixedOffset>>) -> String {
        match at {
            Some(at) => format!("{} {}", at.format("%Y-%m-%d %H:%M"), self.label()),
            None => "-".to_string(),
        }
    }
}

/// Somebody who signs the report, with the time they acted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
    pub name: String,
    pub signed_at: Option<DateTime<FixedOffset>>,
}

impl Signer {
    pub fn new(name: impl Into<String>, signed_at: Option<DateTime<FixedOffset>>) -> Self {
        Self {
            name: name.into(),
            signed_at,
        }
    }

    fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub label: &'static str,
    pub name: String,
    /// Formatted stamp, `-` when the time is unknown
    pub signed_at: String,
}

impl Signature {
    pub fn line(&self) -> String {
        format!("{}: {} - {}", self.label, self.name, self.signed_at)
    }
}

/// Signature block for a session at its current status.
///
/// The submitter always signs when known. The manager signs once the session
/// has passed manager review (escalated, verified or rejected) and the L1
/// reviewer once it is verified or rejected; a reviewer that was never
/// recorded does not sign.
pub fn build_signatures(
    status: SessionStatus,
    submitter: Option<&Signer>,
    manager: Option<&Signer>,
    l1: Option<&Signer>,
    zone: &ReportZone,
) -> Vec<Signature> {
    let manager_visible = matches!(
        status,
        SessionStatus::Escalated | SessionStatus::Verified | SessionStatus::Rejected
    );
    let l1_visible = matches!(status, SessionStatus::Verified | SessionStatus::Rejected);

    let slots = [
        (SUBMITTER_LABEL, submitter, true),
        (MANAGER_LABEL, manager, manager_visible),
        (L1_LABEL, l1, l1_visible),
    ];

    slots
        .into_iter()
        .filter_map(|(label, signer, visible)| match signer {
            Some(signer) if visible && signer.has_name() => Some(Signature {
                label,
                name: signer.name.trim().to_string(),
                signed_at: zone.format_stamp(signer.signed_at.as_ref()),
            }),
            _ => None,
        })
        .collect()
}

/// A recap row with the quantities printed on the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecapLine {
    pub category: String,
    pub category_label: String,
    pub product_variety: String,
    /// Count in the register
    pub recorded_qty: i64,
    /// Count found on the floor
    pub physical_qty: i64,
    pub variance: String,
    pub unit: &'static str,
}

impl From<&RecapRow> for RecapLine {
    fn from(row: &RecapRow) -> Self {
        let missing = row.category == MISSING_CATEGORY;
        Self {
            category: row.category.clone(),
            category_label: category_label(&row.category).to_string(),
            product_variety: row.product_variety.clone(),
            recorded_qty: row.asset_count,
            physical_qty: if missing { 0 } else { row.asset_count },
            variance: if missing {
                row.asset_count.to_string()
            } else {
                "-".to_string()
            },
            unit: UNIT,
        }
    }
}

pub fn sort_recap(rows: &mut [RecapRow]) {
    rows.sort_by(|a, b| {
        category_rank(&a.category)
            .cmp(&category_rank(&b.category))
            .then_with(|| a.product_variety.cmp(&b.product_variety))
    });
}

pub fn sort_details(rows: &mut [DetailRow]) {
    rows.sort_by(|a, b| {
        category_rank(&a.category)
            .cmp(&category_rank(&b.category))
            .then_with(|| a.asset_tag.cmp(&b.asset_tag))
    });
}

/// Per-category asset counts of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpnameStats {
    pub working_assets: i64,
    pub broken_assets: i64,
    pub misplaced_assets: i64,
    pub missing_assets: i64,
}

impl OpnameStats {
    pub fn from_recap(rows: &[RecapRow]) -> Self {
        rows.iter().fold(Self::default(), |mut stats, row| {
            match row.category.as_str() {
                "working_assets" => stats.working_assets += row.asset_count,
                "broken_assets" => stats.broken_assets += row.asset_count,
                "misplaced_assets" => stats.misplaced_assets += row.asset_count,
                "missing_assets" => stats.missing_assets += row.asset_count,
                _ => {}
            }
            stats
        })
    }
}

/// Everything a renderer needs to print a BAP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BapDocument {
    pub session_id: i64,
    pub location_name: String,
    pub location_group: String,
    /// `YYYY-MM-DD` of submission (or of generation when not submitted yet)
    pub end_date: String,
    /// `HH:MM` counterpart of `end_date`
    pub end_time: String,
    pub recap: Vec<RecapLine>,
    pub details: Vec<DetailRow>,
    pub signatures: Vec<Signature>,
}

pub struct BapInput {
    pub session_id: i64,
    pub location_name: String,
    pub location_group: String,
    pub ended_at: Option<DateTime<FixedOffset>>,
    pub recap: Vec<RecapRow>,
    pub details: Vec<DetailRow>,
    pub signatures: Vec<Signature>,
}

/// Orders rows and derives printed quantities. `now` stands in for the
/// submission time of a session that was never submitted.
pub fn assemble(input: BapInput, now: DateTime<FixedOffset>) -> BapDocument {
    let BapInput {
        session_id,
        location_name,
        location_group,
        ended_at,
        mut recap,
        mut details,
        signatures,
    } = input;

    sort_recap(&mut recap);
    sort_details(&mut details);
    let end = ended_at.unwrap_or(now);

    BapDocument {
        session_id,
        location_name,
        location_group,
        end_date: end.format("%Y-%m-%d").to_string(),
        end_time: end.format("%H:%M").to_string(),
        recap: recap.iter().map(RecapLine::from).collect(),
        details,
        signatures,
    }
}

/// Replaces every character that is not an ASCII letter or digit with `_`.
pub fn sanitize_file_fragment(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return "location".to_string();
    }
    trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// `BAP_opname_<location>_<dd-mm-YYYY>.<extension>`
pub fn report_filename(location_name: &str, date: NaiveDate, extension: &str) -> String {
    format!(
        "BAP_opname_{}_{}.{}",
        sanitize_file_fragment(location_name),
        date.format("%d-%m-%Y"),
        extension
    )
}
