use crate::{
    blinds::TelemetryRecord,
    session::{Mode, SessionState},
};
use chrono::{DateTime, Local, TimeZone, Utc};
use std::fmt::Write;

const TIMESTAMP_WIDTH: usize = 19;
const STATUS_WIDTH: usize = 12;
const HUMIDITY_WIDTH: usize = 8;

pub fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Motion status only means something under manual control, so it is left
/// out in auto mode.
pub fn status_line(state: &SessionState) -> String {
    let mut line = format!("Current Mode: {}", capitalize(state.mode.as_str()));
    if state.mode == Mode::Manual {
        line.push_str(&format!(" | Blind Status: {}", capitalize(state.motion.as_str())));
    }
    line
}

pub fn human_timestamp(timestamp: DateTime<Utc>) -> String {
    human_timestamp_in(timestamp, &Local)
}

pub fn human_timestamp_in<Tz>(timestamp: DateTime<Utc>, zone: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    timestamp
        .with_timezone(zone)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub fn telemetry_table(records: &[TelemetryRecord]) -> String {
    telemetry_table_with(records, human_timestamp)
}

fn telemetry_table_with<F>(records: &[TelemetryRecord], format_time: F) -> String
where
    F: Fn(DateTime<Utc>) -> String,
{
    let mut table = format!(
        "{:<tw$} | {:<sw$} | {:<hw$} | Light Level\n",
        "Timestamp",
        "Status",
        "Humidity",
        tw = TIMESTAMP_WIDTH,
        sw = STATUS_WIDTH,
        hw = HUMIDITY_WIDTH,
    );
    for record in records {
        // writing into a String can't fail
        let _ = writeln!(
            table,
            "{:<tw$} | {:<sw$} | {:<hw$} | {}",
            format_time(record.timestamp),
            record.status,
            format!("{}%", record.humidity),
            record.light_level,
            tw = TIMESTAMP_WIDTH,
            sw = STATUS_WIDTH,
            hw = HUMIDITY_WIDTH,
        );
    }
    table
}

/// Everything the terminal shows for one state snapshot.
pub fn render_state(state: &SessionState) -> String {
    let mut output = String::new();
    if !state.message.is_empty() {
        let _ = writeln!(output, "> {}", state.message);
    }
    let _ = writeln!(output, "{}", status_line(state));
    if state.loading {
        output.push_str("Loading...\n");
    } else {
        output.push_str(&telemetry_table(&state.telemetry));
    }
    output
}
