use crate::core::exif::ExifService;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Match, Regex};
use std::ops::RangeInclusive;
use std::path::Path;

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").unwrap());

static MONTH_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec").unwrap()
});

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Years accepted from a bare 4-digit token.
pub const BARE_YEAR_RANGE: RangeInclusive<i32> = 1988..=2025;

/// Year assumed when only a month name is found.
pub const MONTH_NAME_YEAR: i32 = 2000;

/// Where a resolved date came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    Metadata,
    YearMonth,
    MonthName,
    DayMonthYear,
    BareYear,
}

type PathRule = fn(&PathTokens) -> Option<NaiveDate>;

/// Path rules in priority order. The first rule matching any segment wins.
const PATH_RULES: [(DateSource, PathRule); 4] = [
    (DateSource::YearMonth, year_month),
    (DateSource::MonthName, month_name),
    (DateSource::DayMonthYear, day_month_year),
    (DateSource::BareYear, bare_year),
];

/// Best-guess capture date: embedded metadata first, then the path.
pub struct DateResolver {
    exif_service: ExifService,
}

impl DateResolver {
    pub fn new() -> Self {
        Self {
            exif_service: ExifService::new(),
        }
    }

    /// Resolve the date of `file_path`, inferring from `inference_path` when the
    /// file carries no usable capture time.
    pub fn resolve(&self, file_path: &Path, inference_path: &Path) -> Option<(NaiveDate, DateSource)> {
        self.from_metadata(file_path)
            .map(|date| (date, DateSource::Metadata))
            .or_else(|| infer_date_from_path(inference_path))
    }

    fn from_metadata(&self, file_path: &Path) -> Option<NaiveDate> {
        match self.exif_service.capture_datetime(file_path) {
            Ok(taken_at) => taken_at.map(|dt| dt.date()),
            Err(e) => {
                log::debug!("No metadata date for {}: {}", file_path.display(), e);
                None
            }
        }
    }
}

impl Default for DateResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Infer a date from path segments alone.
pub fn infer_date_from_path(path: &Path) -> Option<(NaiveDate, DateSource)> {
    let tokens = PathTokens::new(path);
    PATH_RULES
        .iter()
        .find_map(|(source, rule)| rule(&tokens).map(|date| (date, *source)))
}

/// Path split into segments on either separator, plus the `/`-joined form
/// used by rules that span adjacent segments.
struct PathTokens {
    segments: Vec<String>,
    joined: String,
}

impl PathTokens {
    fn new(path: &Path) -> Self {
        let segments: Vec<String> = path
            .to_string_lossy()
            .split(['/', '\\'])
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let joined = segments.join("/");
        Self { segments, joined }
    }
}

fn digit_runs(text: &str) -> Vec<Match<'_>> {
    DIGIT_RUN.find_iter(text).collect()
}

fn separated_by_slash(text: &str, left: &Match<'_>, right: &Match<'_>) -> bool {
    &text[left.end()..right.start()] == "/"
}

/// `YYYY/M` or `YYYY/MM` across adjacent segments, day 1.
fn year_month(tokens: &PathTokens) -> Option<NaiveDate> {
    let text = tokens.joined.as_str();
    digit_runs(text).windows(2).find_map(|pair| {
        let (year, month) = (&pair[0], &pair[1]);
        if year.len() != 4 || !(1..=2).contains(&month.len()) {
            return None;
        }
        if !separated_by_slash(text, year, month) {
            return None;
        }
        NaiveDate::from_ymd_opt(year.as_str().parse().ok()?, month.as_str().parse().ok()?, 1)
    })
}

/// Month name anywhere in a segment, in [`MONTH_NAME_YEAR`], day 1.
fn month_name(tokens: &PathTokens) -> Option<NaiveDate> {
    tokens.segments.iter().find_map(|segment| {
        let found = MONTH_NAME.find(segment)?.as_str().to_lowercase();
        let month = MONTHS.iter().position(|m| *m == found)? as u32 + 1;
        NaiveDate::from_ymd_opt(MONTH_NAME_YEAR, month, 1)
    })
}

/// `DD/MM/YYYY` across adjacent segments.
fn day_month_year(tokens: &PathTokens) -> Option<NaiveDate> {
    let text = tokens.joined.as_str();
    digit_runs(text).windows(3).find_map(|triple| {
        let (day, month, year) = (&triple[0], &triple[1], &triple[2]);
        if day.len() != 2 || month.len() != 2 || year.len() != 4 {
            return None;
        }
        if !separated_by_slash(text, day, month) || !separated_by_slash(text, month, year) {
            return None;
        }
        NaiveDate::from_ymd_opt(
            year.as_str().parse().ok()?,
            month.as_str().parse().ok()?,
            day.as_str().parse().ok()?,
        )
    })
}

/// A standalone 4-digit year within [`BARE_YEAR_RANGE`], January 1st.
fn bare_year(tokens: &PathTokens) -> Option<NaiveDate> {
    tokens.segments.iter().find_map(|segment| {
        digit_runs(segment)
            .iter()
            .filter(|run| run.len() == 4)
            .filter_map(|run| run.as_str().parse::<i32>().ok())
            .find(|year| BARE_YEAR_RANGE.contains(year))
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
    })
}
