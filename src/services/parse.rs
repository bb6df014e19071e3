// src/services/parse.rs

//! Cargo schedule page parser.
//!
//! The schedule is published as a grid of `div`s:
//!
//! ```text
//! div.data
//! ├── div.header > div.col ...
//! └── div.body
//!     └── div.group
//!         └── div.toggle
//!             ├── div.col1  strong = scheduled, span = actual
//!             ├── div.col2  div.location
//!             ├── div.col3  div.airplane > span.name (flight, airline)
//!             ├── div.col4  terminal
//!             ├── div.col5  stand
//!             └── div.col6  status
//! ```
//!
//! Older pages use a plain `<table>`, which is read header by header.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{RawRow, fields};

/// Messages the site shows when a day has no movements.
static NO_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)照会されたデータがありません|データがありません|no data|there is no registered data")
        .expect("no-data pattern is valid")
});

/// Whether the page says there is nothing to show.
pub fn has_no_data_marker(html: &str) -> bool {
    NO_DATA.is_match(html)
}

/// Whether the cargo endpoint rejected the query outright.
///
/// Narrower than [`has_no_data_marker`]; this one triggers the fallback page.
pub fn reports_no_registered_data(html: &str) -> bool {
    html.contains("照会されたデータがありません")
        || html.to_lowercase().contains("there is no registered data")
}

/// Parse a schedule page into raw rows.
///
/// A page that reports no data yields an empty list. A blank body is a
/// parse error.
pub fn parse_schedule(html: &str, context: &str) -> Result<Vec<RawRow>> {
    if html.trim().is_empty() {
        return Err(AppError::parse(context, "empty response body"));
    }

    let document = Html::parse_document(html);

    let rows = parse_grid(&document, context)?;
    if !rows.is_empty() {
        log::debug!("{}: {} rows from grid layout", context, rows.len());
        return Ok(rows);
    }

    let rows = parse_tables(&document, context)?;
    if !rows.is_empty() {
        log::debug!("{}: {} rows from table layout", context, rows.len());
        return Ok(rows);
    }

    if has_no_data_marker(html) {
        log::info!("{}: no cargo schedule published", context);
    } else {
        log::debug!("{}: no rows found", context);
    }
    Ok(Vec::new())
}

fn parse_selector(s: &str, context: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::parse(context, format!("selector '{s}': {e:?}")))
}

/// Text of an element, ignoring screen-reader-only `i.hidden-text` spans.
fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            ElementRef::wrap(a).is_some_and(|e| {
                e.value().name() == "i" && e.value().classes().any(|c| c == "hidden-text")
            })
        });
        if !hidden {
            out.push_str(text.trim());
        }
    }
    out
}

fn plain_text(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

fn insert_nonempty(row: &mut RawRow, key: &str, value: String) {
    if !value.is_empty() {
        row.insert(key.to_string(), value);
    }
}

/// Grid layout used by the current site.
fn parse_grid(document: &Html, context: &str) -> Result<Vec<RawRow>> {
    let toggle = parse_selector("div.data div.body div.group div.toggle", context)?;
    let col1 = parse_selector("div.col1", context)?;
    let strong = parse_selector("strong", context)?;
    let span = parse_selector("span", context)?;
    let location = parse_selector("div.col2 div.location", context)?;
    let names = parse_selector("div.col3 div.airplane span.name", context)?;
    let col4 = parse_selector("div.col4", context)?;
    let col5 = parse_selector("div.col5", context)?;
    let col6 = parse_selector("div.col6", context)?;

    let mut rows = Vec::new();
    for group in document.select(&toggle) {
        let mut row = RawRow::new();

        if let Some(times) = group.select(&col1).next() {
            if let Some(s) = times.select(&strong).next() {
                insert_nonempty(&mut row, fields::SCHEDULED_TIME, plain_text(s));
            }
            if let Some(a) = times.select(&span).next() {
                insert_nonempty(&mut row, fields::ACTUAL_TIME, plain_text(a));
            }
        }

        if let Some(loc) = group.select(&location).next() {
            insert_nonempty(&mut row, fields::LOCATION, visible_text(loc));
        }

        let name_spans: Vec<_> = group.select(&names).collect();
        match name_spans.as_slice() {
            [first, second, ..] => {
                if let Some(number) = first.select(&strong).next() {
                    insert_nonempty(&mut row, fields::FLIGHT_NUMBER, plain_text(number));
                }
                insert_nonempty(&mut row, fields::AIRLINE, plain_text(*second));
            }
            [only] => {
                let text = plain_text(*only);
                if text.chars().any(|c| c.is_ascii_digit()) {
                    insert_nonempty(&mut row, fields::FLIGHT_NUMBER, text);
                } else {
                    insert_nonempty(&mut row, fields::AIRLINE, text);
                }
            }
            [] => {}
        }

        for (sel, key) in [(&col4, fields::TERMINAL), (&col5, fields::GATE), (&col6, fields::STATUS)] {
            if let Some(cell) = group.select(sel).next() {
                insert_nonempty(&mut row, key, visible_text(cell));
            }
        }

        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Map a published table header to a record field.
fn header_field(header: &str) -> Option<&'static str> {
    let h = header.trim().to_lowercase();
    let field = match h.as_str() {
        "便名" | "flight" | "flight no." | "flight no" | "편명" => fields::FLIGHT_NUMBER,
        "航空会社" | "airline" | "항공사" => fields::AIRLINE,
        "出発時間（予定）" | "到着時間（予定）" | "予定時間" | "scheduled" | "schedule" | "예정시간" => {
            fields::SCHEDULED_TIME
        }
        "出発時間（実際）" | "到着時間（実際）" | "変更時間" | "estimated" | "actual" | "변경시간" => {
            fields::ACTUAL_TIME
        }
        "目的地" | "出発地" | "destination" | "origin" | "목적지" | "출발지" => fields::LOCATION,
        "ターミナル" | "terminal" | "터미널" => fields::TERMINAL,
        "駐機場" | "stand" | "gate" | "주기장" => fields::GATE,
        "出発状態" | "到着状態" | "状態" | "status" | "현황" => fields::STATUS,
        _ => return None,
    };
    Some(field)
}

/// Generic table fallback.
fn parse_tables(document: &Html, context: &str) -> Result<Vec<RawRow>> {
    let table_sel = parse_selector("table", context)?;
    let thead_th = parse_selector("thead th", context)?;
    let tr = parse_selector("tr", context)?;
    let tbody_tr = parse_selector("tbody tr", context)?;
    let header_cell = parse_selector("th, td", context)?;

    let mut rows = Vec::new();
    for table in document.select(&table_sel) {
        let mut headers: Vec<String> = table.select(&thead_th).map(plain_text).collect();

        // The HTML parser wraps bare rows in an implicit tbody, so without a
        // thead the first row is the header and everything after it is data.
        let body: Vec<ElementRef<'_>> = if headers.is_empty() {
            let mut all = table.select(&tr);
            if let Some(first) = all.next() {
                headers = first.select(&header_cell).map(plain_text).collect();
            }
            all.collect()
        } else {
            table.select(&tbody_tr).collect()
        };

        for tr_elem in body {
            let cells: Vec<String> = tr_elem.select(&header_cell).map(plain_text).collect();
            if cells.iter().all(String::is_empty) {
                continue;
            }

            let mut row = RawRow::new();
            for (idx, text) in cells.into_iter().enumerate() {
                let key = match headers.get(idx) {
                    Some(h) => header_field(h).map(str::to_string).unwrap_or_else(|| h.clone()),
                    None => format!("column_{idx}"),
                };
                row.insert(key, text);
            }
            rows.push(row);
        }
    }
    Ok(rows)
}
