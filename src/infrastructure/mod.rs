//! Adapters for the domain ports.

pub mod file_store;
pub mod in_memory;
pub mod simulated_gateway;

use crate::domain::event::EventRecord;

/// Parses event log lines, skipping blank and malformed ones with a warning.
pub(crate) fn parse_log<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<EventRecord> {
    lines
        .into_iter()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match EventRecord::from_line(line) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(line = idx + 1, error = %e, "Skipping malformed event record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_skips_garbage() {
        let log = concat!(
            r#"{"timestamp":"2024-05-01T12:00:00Z","type":"refunded","payload":{"amount":5}}"#,
            "\n",
            "{not json\n",
            "\n",
            r#"{"timestamp":"2024-05-01T12:00:01Z","type":"faulted","payload":{"reason":"jam"}}"#,
            "\n",
        );
        let records = parse_log(log.lines());
        assert_eq!(records.len(), 2);
    }
}
