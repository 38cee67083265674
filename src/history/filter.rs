use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Ordering;
use thiserror::Error;

use super::{HistoryEntry, QueryKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("invalid {field}: '{value}' is not an RFC 3339 timestamp or YYYY-MM-DD date")]
    InvalidDate { field: &'static str, value: String },
}

/// 1-indexed page window over a user's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    pub const DEFAULT_PER_PAGE: u32 = 10;
    pub const MAX_PER_PAGE: u32 = 50;

    /// Out-of-range values are replaced rather than rejected: a page below 1
    /// becomes 1 and a page size outside `1..=50` becomes 10.
    pub fn new(page: i64, per_page: i64) -> Self {
        let page = if page < 1 {
            1
        } else {
            u32::try_from(page).unwrap_or(u32::MAX)
        };
        let per_page = match u32::try_from(per_page) {
            Ok(n) if (1..=Self::MAX_PER_PAGE).contains(&n) => n,
            _ => Self::DEFAULT_PER_PAGE,
        };
        Self { page, per_page }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    pub fn last_page(&self, total: u64) -> u64 {
        total.div_ceil(u64::from(self.per_page))
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, i64::from(Self::DEFAULT_PER_PAGE))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Timestamp,
    QueryKind,
    Success,
}

impl SortField {
    fn parse(raw: &str) -> Self {
        match raw {
            "query_type" | "query_kind" => SortField::QueryKind,
            "success" => SortField::Success,
            _ => SortField::Timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("asc") {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortKey {
    /// Compares two entries on this key alone.
    pub fn compare(&self, a: &HistoryEntry, b: &HistoryEntry) -> Ordering {
        let ordering = match self.field {
            SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
            SortField::QueryKind => a.query_kind.as_str().cmp(b.query_kind.as_str()),
            SortField::Success => a.succeeded.cmp(&b.succeeded),
        };
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

const DEFAULT_SORT: SortKey = SortKey {
    field: SortField::Timestamp,
    direction: SortDirection::Desc,
};

/// Narrowing applied to a user's history before pagination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub database_ref: Option<String>,
    /// `Some(vec![])` matches nothing: every requested kind was unknown.
    pub query_kinds: Option<Vec<QueryKind>>,
    pub succeeded: Option<bool>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub sort: Vec<SortKey>,
}

impl HistoryFilter {
    /// Sort keys to apply, most recent first when none were requested.
    pub fn sort_keys(&self) -> Vec<SortKey> {
        if self.sort.is_empty() {
            vec![DEFAULT_SORT]
        } else {
            self.sort.clone()
        }
    }

    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        if let Some(db) = &self.database_ref {
            if &entry.database_ref != db {
                return false;
            }
        }
        if let Some(kinds) = &self.query_kinds {
            if !kinds.contains(&entry.query_kind) {
                return false;
            }
        }
        if let Some(succeeded) = self.succeeded {
            if entry.succeeded != succeeded {
                return false;
            }
        }
        if self.start.is_some_and(|start| entry.timestamp < start) {
            return false;
        }
        if self.end.is_some_and(|end| entry.timestamp > end) {
            return false;
        }
        if let Some(search) = &self.search {
            if !entry
                .query_text
                .to_lowercase()
                .contains(&search.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// Everything a history listing request can carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryQuery {
    pub pagination: Pagination,
    pub filter: HistoryFilter,
}

impl HistoryQuery {
    /// Reads `page`, `per_page`, the filters and the sort keys from raw
    /// query-string pairs. Repeated `query_type[]` keys accumulate. Numbered
    /// sort keys (`sort_0_by`, `sort_1_by`, ...) win over `sort_by`.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, FilterError> {
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .filter(|v| !v.is_empty())
        };
        let number = |key: &str| get(key).and_then(|v| v.trim().parse::<i64>().ok());

        let pagination = Pagination::new(
            number("page").unwrap_or(1),
            number("per_page").unwrap_or(i64::from(Pagination::DEFAULT_PER_PAGE)),
        );

        let requested_kinds: Vec<&str> = pairs
            .iter()
            .filter(|(k, _)| k == "query_type[]" || k == "query_type")
            .map(|(_, v)| v.as_str())
            .collect();
        let query_kinds = (!requested_kinds.is_empty())
            .then(|| requested_kinds.into_iter().filter_map(QueryKind::parse).collect());

        let succeeded = match get("success") {
            Some("true") => Some(true),
            Some("false") => Some(false),
            _ => None,
        };

        let start = get("start_date")
            .map(|v| parse_instant("start_date", v))
            .transpose()?;
        let end = get("end_date")
            .map(|v| parse_instant("end_date", v))
            .transpose()?;

        let mut sort = Vec::new();
        for index in 0.. {
            let Some(field) = get(&format!("sort_{}_by", index)) else {
                break;
            };
            let direction = get(&format!("sort_{}_dir", index)).unwrap_or("DESC");
            sort.push(SortKey {
                field: SortField::parse(field),
                direction: SortDirection::parse(direction),
            });
        }
        if sort.is_empty() {
            if let Some(field) = get("sort_by") {
                sort.push(SortKey {
                    field: SortField::parse(field),
                    direction: SortDirection::parse(get("sort_dir").unwrap_or("DESC")),
                });
            }
        }

        Ok(Self {
            pagination,
            filter: HistoryFilter {
                database_ref: get("database_ref").map(str::to_string),
                query_kinds,
                succeeded,
                start,
                end,
                search: get("search").map(str::to_string),
                sort,
            },
        })
    }
}

/// A bare date means midnight UTC on that day.
fn parse_instant(field: &'static str, value: &str) -> Result<DateTime<Utc>, FilterError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| FilterError::InvalidDate {
            field,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn clamps_pagination() {
        assert_eq!(Pagination::new(0, 10), Pagination { page: 1, per_page: 10 });
        assert_eq!(Pagination::new(-3, 51), Pagination { page: 1, per_page: 10 });
        assert_eq!(Pagination::new(2, 0), Pagination { page: 2, per_page: 10 });
        assert_eq!(Pagination::new(3, 50), Pagination { page: 3, per_page: 50 });
        assert_eq!(Pagination::new(2, 10).offset(), 10);
    }

    #[test]
    fn last_page_rounds_up() {
        let p = Pagination::new(1, 10);
        assert_eq!(p.last_page(15), 2);
        assert_eq!(p.last_page(20), 2);
        assert_eq!(p.last_page(0), 0);
    }

    #[test]
    fn parses_filters_and_unparseable_numbers() {
        let query = HistoryQuery::from_pairs(&pairs(&[
            ("page", "abc"),
            ("per_page", "25"),
            ("query_type[]", "SQL"),
            ("query_type[]", "Natural Language"),
            ("success", "false"),
            ("search", "Users"),
            ("start_date", "2024-05-01"),
            ("end_date", "2024-05-31T23:59:59Z"),
        ]))
        .unwrap();

        assert_eq!(query.pagination, Pagination { page: 1, per_page: 25 });
        assert_eq!(
            query.filter.query_kinds,
            Some(vec![QueryKind::RawSql, QueryKind::NaturalLanguage])
        );
        assert_eq!(query.filter.succeeded, Some(false));
        assert_eq!(query.filter.search.as_deref(), Some("Users"));
        assert_eq!(
            query.filter.start.unwrap().to_rfc3339(),
            "2024-05-01T00:00:00+00:00"
        );
        assert!(query.filter.end.is_some());
    }

    #[test]
    fn unknown_kinds_match_nothing() {
        let query = HistoryQuery::from_pairs(&pairs(&[("query_type[]", "Voice")])).unwrap();
        assert_eq!(query.filter.query_kinds, Some(vec![]));
    }

    #[test]
    fn numbered_sort_keys_win() {
        let query = HistoryQuery::from_pairs(&pairs(&[
            ("sort_by", "success"),
            ("sort_0_by", "query_type"),
            ("sort_0_dir", "ASC"),
            ("sort_1_by", "bogus"),
        ]))
        .unwrap();

        assert_eq!(
            query.filter.sort,
            vec![
                SortKey { field: SortField::QueryKind, direction: SortDirection::Asc },
                SortKey { field: SortField::Timestamp, direction: SortDirection::Desc },
            ]
        );
    }

    #[test]
    fn default_sort_is_newest_first() {
        let query = HistoryQuery::from_pairs(&[]).unwrap();
        assert_eq!(query.filter.sort_keys(), vec![DEFAULT_SORT]);
    }

    #[test]
    fn rejects_malformed_dates() {
        let err = HistoryQuery::from_pairs(&pairs(&[("start_date", "yesterday")])).unwrap_err();
        assert!(matches!(err, FilterError::InvalidDate { field: "start_date", .. }));
    }
}
