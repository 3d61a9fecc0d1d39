//! Filtering, multi-key sorting and pagination over a catalog snapshot.
//!
//! Every call works on the complete entry list handed in by the caller; no
//! index is kept between calls.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::state::MetadataEntry;

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Number of `sortN` / `dirN` parameter pairs read from a request.
pub const MAX_SORT_KEYS: usize = 10;

/// Column name -> case-insensitive substring pattern.
pub type Filters = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Kb,
    Name,
    OriginalFileName,
    Description,
    Tag,
    UploadTime,
    FilePath,
}

impl Column {
    /// Map a wire column name. Unknown names yield `None` and behave as an
    /// absent field.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "kb" => Some(Column::Kb),
            "name" => Some(Column::Name),
            "originalFileName" => Some(Column::OriginalFileName),
            "description" => Some(Column::Description),
            "tag" => Some(Column::Tag),
            "uploadTime" => Some(Column::UploadTime),
            "filePath" => Some(Column::FilePath),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    /// `desc` / `descending` (any case) is descending, anything else ascending.
    ///
    /// Older servers treated every value except the exact `asc` as
    /// descending. Clients only ever send `asc` or `desc`, where both rules
    /// agree; an unrecognized value now falls back to ascending.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("desc") || raw.eq_ignore_ascii_case("descending") {
            Direction::Descending
        } else {
            Direction::Ascending
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub direction: Direction,
}

impl SortKey {
    pub fn new(column: impl Into<String>, direction: Direction) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    pub data: Vec<MetadataEntry>,
    pub total_pages: usize,
}

/// A decoded list request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub filters: Filters,
    pub sorts: Vec<SortKey>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl QueryRequest {
    /// Decode `page`, `limit`, `filter_<col>` and `sort<N>` / `dir<N>`.
    ///
    /// Malformed numbers fall back to the defaults; they are never rejected.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let filters = params
            .iter()
            .filter_map(|(k, v)| {
                let col = k.strip_prefix("filter_")?;
                (!v.is_empty()).then(|| (col.to_string(), v.clone()))
            })
            .collect();

        let sorts = (0..MAX_SORT_KEYS)
            .filter_map(|i| {
                let column = params.get(&format!("sort{i}")).filter(|c| !c.is_empty())?;
                let direction = params
                    .get(&format!("dir{i}"))
                    .map_or(Direction::Ascending, |d| Direction::parse(d));
                Some(SortKey::new(column.clone(), direction))
            })
            .collect();

        Self {
            filters,
            sorts,
            page: params.get("page").and_then(|p| lenient_int(p)),
            page_size: params.get("limit").and_then(|l| lenient_int(l)),
        }
    }

    pub fn run(&self, all_entries: Vec<MetadataEntry>) -> QueryPage {
        query(
            all_entries,
            &self.filters,
            &self.sorts,
            self.page,
            self.page_size,
        )
    }
}

/// Filter, sort and paginate `all_entries`.
///
/// Absent or non-positive `page` / `page_size` use [`DEFAULT_PAGE`] and
/// [`DEFAULT_PAGE_SIZE`]. Pages past the end are empty.
pub fn query(
    all_entries: Vec<MetadataEntry>,
    filters: &Filters,
    sorts: &[SortKey],
    page: Option<i64>,
    page_size: Option<i64>,
) -> QueryPage {
    let mut matched = apply_filters(all_entries, filters);
    apply_sorts(&mut matched, sorts);

    let page = positive_or(page, DEFAULT_PAGE);
    let page_size = positive_or(page_size, DEFAULT_PAGE_SIZE);
    let total_pages = matched.len().div_ceil(page_size);

    let data = match (page - 1).checked_mul(page_size) {
        Some(start) if start < matched.len() => matched
            .into_iter()
            .skip(start)
            .take(page_size)
            .collect(),
        _ => Vec::new(),
    };

    QueryPage { data, total_pages }
}

/// Keep entries that contain every non-empty pattern in the named field.
pub fn apply_filters(entries: Vec<MetadataEntry>, filters: &Filters) -> Vec<MetadataEntry> {
    let active: Vec<(Option<Column>, String)> = filters
        .iter()
        .filter(|(_, pattern)| !pattern.is_empty())
        .map(|(col, pattern)| (Column::parse(col), pattern.to_lowercase()))
        .collect();

    if active.is_empty() {
        return entries;
    }

    entries
        .into_iter()
        .filter(|entry| {
            active.iter().all(|(col, pattern)| {
                field(entry, *col)
                    .display()
                    .to_lowercase()
                    .contains(pattern.as_str())
            })
        })
        .collect()
}

/// Lexicographic multi-key sort with `kb` as the final tiebreaker.
pub fn apply_sorts(entries: &mut [MetadataEntry], sorts: &[SortKey]) {
    if sorts.is_empty() {
        return;
    }

    let keys: Vec<(Option<Column>, Direction)> = sorts
        .iter()
        .map(|s| (Column::parse(&s.column), s.direction))
        .collect();

    entries.sort_by(|a, b| {
        for (col, dir) in &keys {
            let ord = field(a, *col).compare(&field(b, *col));
            let ord = match dir {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.kb.cmp(&b.kb)
    });
}

/// Value of one column of one entry.
#[derive(Debug, Clone, Copy)]
enum Field<'a> {
    Missing,
    Int(i128),
    Text(&'a str),
}

fn field(entry: &MetadataEntry, column: Option<Column>) -> Field<'_> {
    match column {
        Some(Column::Kb) => Field::Int(i128::from(entry.kb)),
        Some(Column::UploadTime) => Field::Int(i128::from(entry.upload_time)),
        Some(Column::Name) => Field::Text(&entry.name),
        Some(Column::OriginalFileName) => Field::Text(&entry.original_file_name),
        Some(Column::Description) => Field::Text(&entry.description),
        Some(Column::Tag) => Field::Text(&entry.tag),
        Some(Column::FilePath) => Field::Text(&entry.file_path),
        None => Field::Missing,
    }
}

impl Field<'_> {
    fn display(&self) -> String {
        match self {
            Field::Missing => String::new(),
            Field::Int(n) => n.to_string(),
            Field::Text(s) => (*s).to_string(),
        }
    }

    /// Missing sorts before any value; text ignores case.
    fn compare(&self, other: &Field<'_>) -> Ordering {
        match (self, other) {
            (Field::Missing, Field::Missing) => Ordering::Equal,
            (Field::Missing, _) => Ordering::Less,
            (_, Field::Missing) => Ordering::Greater,
            (Field::Int(a), Field::Int(b)) => a.cmp(b),
            (Field::Text(a), Field::Text(b)) => a
                .chars()
                .flat_map(char::to_lowercase)
                .cmp(b.chars().flat_map(char::to_lowercase)),
            (Field::Int(_), Field::Text(_)) => Ordering::Less,
            (Field::Text(_), Field::Int(_)) => Ordering::Greater,
        }
    }
}

fn positive_or(value: Option<i64>, default: usize) -> usize {
    value
        .filter(|v| *v > 0)
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(default)
}

/// Parse the leading integer of `raw` (`"3abc"` -> 3, `"abc"` -> None).
pub fn lenient_int(raw: &str) -> Option<i64> {
    let s = raw.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}
