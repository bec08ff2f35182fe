//! CSV export of the frame log.
//!
//! Semicolon-separated, one row per frame:
//!   Value;Unit;Timestamp
//!   -43.210;kΩ;2026-10-15T14:03:22

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::error::Result;
use crate::frame::Frame;
use crate::session::FrameLog;

pub const HEADER: &str = "Value;Unit;Timestamp";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_row(frame: &Frame) -> String {
    let value = match frame.value() {
        Some(v) => format!("{:.3}", v),
        None => "NaN".to_string(),
    };
    format!(
        "{};{};{}",
        value,
        frame.unit_symbol(),
        frame.timestamp.format(TIMESTAMP_FORMAT)
    )
}

pub fn write_csv<W: Write>(mut out: W, frames: &[Frame]) -> std::io::Result<()> {
    writeln!(out, "{}", HEADER)?;
    for frame in frames {
        writeln!(out, "{}", format_row(frame))?;
    }
    out.flush()
}

/// Writes a snapshot of `log` to `path`, returning the number of rows.
///
/// The log is copied under its lock first so the worker is not held up by
/// file I/O.
pub fn export_to_path(path: &Path, log: &FrameLog) -> Result<usize> {
    let frames = log.snapshot();
    let file = File::create(path)?;
    write_csv(BufWriter::new(file), &frames)?;
    info!("[export] wrote {} frames to {}", frames.len(), path.display());
    Ok(frames.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_LEN;
    use chrono::{Local, TimeZone};

    fn frame(buf: [u8; FRAME_LEN]) -> Frame {
        let timestamp = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        Frame::decode(&buf, timestamp)
    }

    // -43.21 kΩ
    fn kilo_ohm_frame() -> [u8; FRAME_LEN] {
        [
            0x00, 0x0A, 0x07, 0x01, 0x0F, 0x0D, 0x0B, 0x00, 0x05, 0x02, 0x00, 0x04, 0x00, 0x00,
        ]
    }

    #[test]
    fn row_format() {
        assert_eq!(
            format_row(&frame(kilo_ohm_frame())),
            "-43.210;k\u{03A9};2024-03-09T07:05:01"
        );
    }

    #[test]
    fn invalid_value_and_missing_unit() {
        let mut buf = [0u8; FRAME_LEN];
        buf[2] = 0x03;
        assert_eq!(format_row(&frame(buf)), "NaN;;2024-03-09T07:05:01");
    }

    #[test]
    fn csv_has_header_then_rows() {
        let frames = vec![frame(kilo_ohm_frame()), frame(kilo_ohm_frame())];
        let mut out = Vec::new();
        write_csv(&mut out, &frames).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].starts_with("-43.210;"));
    }

    #[test]
    fn export_writes_file() {
        let log = FrameLog::new();
        log.append(frame(kilo_ohm_frame()));
        let path = std::env::temp_dir().join(format!("mm_reader_export_{}.csv", std::process::id()));

        assert_eq!(export_to_path(&path, &log).unwrap(), 1);
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(text.starts_with("Value;Unit;Timestamp\n-43.210;"));
    }
}
