// src/services/message.rs

//! Discord webhook message rendering.

use std::fmt::Write;

use chrono::Local;
use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::models::Direction;
use crate::pipeline::{EntryTag, NotificationEntry, NotificationPayload, PayloadKind};

/// Embed colour for the daily listing.
const COLOR_LISTING: u32 = 3_447_003;
/// Embed colour for change notices.
const COLOR_CHANGES: u32 = 15_105_570;

const TRUNCATION_MARK: &str = "\n...(truncated)";

/// Body of a webhook POST.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub footer: Footer,
}

#[derive(Debug, Clone, Serialize)]
pub struct Footer {
    pub text: String,
}

/// Render a payload as a single-embed webhook message.
pub fn render(
    payload: &NotificationPayload,
    max_description_chars: usize,
    username: Option<&str>,
) -> WebhookMessage {
    let embed = Embed {
        title: title(payload),
        description: truncate(&description(payload), max_description_chars),
        color: match payload.kind {
            PayloadKind::FullListing => COLOR_LISTING,
            PayloadKind::Changes => COLOR_CHANGES,
        },
        footer: Footer {
            text: format!(
                "Fetched at {}",
                payload
                    .generated_at
                    .with_timezone(&Local)
                    .format("%Y/%m/%d %H:%M:%S")
            ),
        },
    };

    WebhookMessage {
        username: username.map(str::to_string),
        embeds: vec![embed],
    }
}

fn title(payload: &NotificationPayload) -> String {
    let (emoji, noun) = match payload.direction {
        Direction::Departure => ("🛫", "departure"),
        Direction::Arrival => ("🛬", "arrival"),
    };
    match payload.kind {
        PayloadKind::FullListing => format!("{emoji} Incheon Airport cargo {noun} schedule"),
        PayloadKind::Changes => format!("{emoji} Incheon Airport cargo {noun} schedule changed"),
    }
}

fn description(payload: &NotificationPayload) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "**Period**: {}", payload.range);
    let _ = writeln!(out, "**Airport**: {}", payload.airport);

    match payload.kind {
        PayloadKind::FullListing => {
            let _ = writeln!(out, "**Flights**: {}", payload.len());
        }
        PayloadKind::Changes => {
            let _ = writeln!(
                out,
                "**Changes**: {} new, {} time changed",
                payload.count(EntryTag::New.as_str()),
                payload.count("time-changed")
            );
        }
    }
    out.push('\n');

    for (date, entries) in payload.by_date() {
        let _ = writeln!(out, "**📅 {}**", date.format("%Y/%m/%d"));
        for entry in entries {
            write_entry(&mut out, entry, payload.direction);
            out.push('\n');
        }
    }
    out
}

fn write_entry(out: &mut String, entry: &NotificationEntry, direction: Direction) {
    let record = &entry.record;
    let airline = record.airline.as_deref().unwrap_or("N/A");
    let badge = match entry.tag {
        EntryTag::New => " 🆕",
        EntryTag::TimeChanged { .. } => " ⚠️",
        EntryTag::Listed => "",
    };
    let _ = writeln!(out, "✈️ **{}** ({}){}", record.flight_number, airline, badge);

    if let Some(location) = &record.location {
        let _ = writeln!(out, "  📍 {}: {}", direction.location_label(), location);
    }

    match entry.previous_time() {
        Some(previous) => {
            let _ = writeln!(
                out,
                "  🕐 Scheduled: {} → **{}**",
                previous, record.scheduled_time
            );
        }
        None => {
            let _ = writeln!(out, "  🕐 Scheduled: {}", record.scheduled_time);
        }
    }
    if let Some(actual) = &record.actual_time {
        if *actual != record.scheduled_time {
            let _ = writeln!(out, "  🕐 Actual: **{}**", actual);
        }
    }

    if let Some(gate) = &record.gate {
        let _ = writeln!(out, "  🚪 Stand: {}", gate);
    }
    if let Some(terminal) = &record.terminal {
        let _ = writeln!(out, "  🏢 Terminal: {}", terminal);
    }
    if let Some(status) = &record.status {
        let icon = if is_completed(status, direction) { "✅" } else { "⏳" };
        let _ = writeln!(out, "  {} Status: {}", icon, status);
    }
}

/// Whether a published status means the movement has happened.
fn is_completed(status: &str, direction: Direction) -> bool {
    let lower = status.to_lowercase();
    match direction {
        Direction::Departure => status.contains("出発") || lower.contains("depart"),
        Direction::Arrival => status.contains("到着") || lower.contains("arriv"),
    }
}

/// Cap `text` at `max_chars` characters without splitting a grapheme.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut out = String::new();
    let mut used = 0;
    for grapheme in text.graphemes(true) {
        let len = grapheme.chars().count();
        if used + len > max_chars {
            break;
        }
        out.push_str(grapheme);
        used += len;
    }
    out.push_str(TRUNCATION_MARK);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DateRange, FlightRecord, Snapshot};
    use crate::pipeline::{classify, diff, full_listing};
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, d).unwrap()
    }

    fn make_flight(number: &str, d: u32, time: &str) -> FlightRecord {
        FlightRecord {
            flight_number: number.into(),
            date: day(d),
            scheduled_time: time.into(),
            direction: Direction::Departure,
            airport: "NGO".into(),
            actual_time: None,
            airline: Some("KOREAN AIR".into()),
            location: Some("NAGOYA".into()),
            terminal: Some("T1".into()),
            gate: None,
            status: Some("出発".into()),
            extra: Default::default(),
        }
    }

    fn snapshot(records: Vec<FlightRecord>) -> Snapshot {
        Snapshot::new(
            "NGO",
            Direction::Departure,
            DateRange::starting(day(1), 7),
            records,
        )
    }

    #[test]
    fn test_full_listing_message() {
        let payload = full_listing(&snapshot(vec![
            make_flight("KE123", 2, "10:00"),
            make_flight("OZ456", 1, "12:00"),
        ]));

        let message = render(&payload, 1900, Some("cargo-bot"));
        let embed = &message.embeds[0];

        assert!(embed.title.contains("departure"));
        assert_eq!(embed.color, COLOR_LISTING);
        assert!(embed.description.contains("**Period**: 20241201 ~ 20241207"));
        assert!(embed.description.contains("**Flights**: 2"));
        assert!(embed.description.contains("✅ Status: 出発"));

        let first = embed.description.find("2024/12/01").unwrap();
        let second = embed.description.find("2024/12/02").unwrap();
        assert!(first < second);
        assert_eq!(message.username.as_deref(), Some("cargo-bot"));
    }

    #[test]
    fn test_change_message_shows_old_and_new_time() {
        let prev = snapshot(vec![make_flight("KE123", 1, "10:00")]);
        let curr = snapshot(vec![
            make_flight("KE123", 1, "11:00"),
            make_flight("CX777", 2, "08:00"),
        ]);
        let payload = classify(&diff(&prev, &curr));

        let message = render(&payload, 1900, None);
        let embed = &message.embeds[0];

        assert_eq!(embed.color, COLOR_CHANGES);
        assert!(embed.title.contains("changed"));
        assert!(embed.description.contains("1 new, 1 time changed"));
        assert!(embed.description.contains("10:00 → **11:00**"));
        assert!(embed.description.contains("**CX777** (KOREAN AIR) 🆕"));
    }

    #[test]
    fn test_serialized_shape() {
        let payload = full_listing(&snapshot(vec![make_flight("KE123", 1, "10:00")]));
        let json = serde_json::to_value(render(&payload, 1900, None)).unwrap();

        assert!(json.get("username").is_none());
        assert_eq!(json["embeds"][0]["color"], COLOR_LISTING);
        assert!(json["embeds"][0]["footer"]["text"].as_str().unwrap().starts_with("Fetched at"));
    }

    #[test]
    fn test_truncate_respects_limit() {
        let text = "✈️".repeat(50);
        let cut = truncate(&text, 7);
        let body = cut.strip_suffix(TRUNCATION_MARK).unwrap();
        // Each plane is two chars; a grapheme is never split.
        assert_eq!(body.chars().count(), 6);
        assert_eq!(body, "✈️".repeat(3));
    }

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate("short", 1900), "short");
    }

    #[test]
    fn test_long_listing_is_truncated() {
        let records = (0..200)
            .map(|i| make_flight(&format!("KE{i:04}"), 1 + (i % 7), "10:00"))
            .collect();
        let payload = full_listing(&snapshot(records));

        let message = render(&payload, 1900, None);
        let description = &message.embeds[0].description;
        assert!(description.ends_with(TRUNCATION_MARK));
        assert!(description.chars().count() <= 1900 + TRUNCATION_MARK.chars().count());
    }
}
