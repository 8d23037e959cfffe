//! Foundational low-level utilities shared across Archivist crates.
//!
//! Provides atomic file-write helpers, JSONL appends for catalog output, and
//! time utilities used by job bookkeeping and completion replies.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{append_text_line, write_text_atomic};
pub use time_utils::{current_unix_timestamp_ms, format_elapsed_ms};

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn unit_format_elapsed_ms_uses_largest_units() {
        assert_eq!(format_elapsed_ms(0), "0ms");
        assert_eq!(format_elapsed_ms(950), "950ms");
        assert_eq!(format_elapsed_ms(12_400), "12s");
        assert_eq!(format_elapsed_ms(61_000), "1m 1s");
        assert_eq!(format_elapsed_ms(3_600_000 + 120_000), "1h 2m");
        assert_eq!(format_elapsed_ms(2 * 86_400_000 + 3_600_000), "2d 1h");
    }

    #[test]
    fn functional_write_text_atomic_replaces_existing_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested/registrations.json");
        write_text_atomic(&path, "first").expect("first write");
        write_text_atomic(&path, "second").expect("second write");
        assert_eq!(read_to_string(&path).expect("read"), "second");
    }

    #[test]
    fn functional_append_text_line_appends_newline_terminated_records() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("catalog/123.jsonl");
        append_text_line(&path, "{\"id\":\"1\"}").expect("append one");
        append_text_line(&path, "{\"id\":\"2\"}\n").expect("append two");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "{\"id\":\"1\"}\n{\"id\":\"2\"}\n");
    }

    #[test]
    fn regression_write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "data").expect_err("directory rejected");
        assert!(error.to_string().contains("is a directory"));
    }
}
