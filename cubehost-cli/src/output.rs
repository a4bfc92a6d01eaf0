//! Text and JSON rendering for command results.
//!
//! Handlers build a payload and pass it to [`OutputWriter::render`]; the
//! `--output` flag decides whether it is printed as a human table or as
//! pretty JSON for scripts.

use std::io::Write;

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Writes command payloads in the format selected by `--output`.
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Selected format.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Write `payload` to stdout.
    pub fn render<T: Render + Serialize>(&self, payload: &T) -> Result<(), CliError> {
        let mut out = std::io::stdout().lock();
        self.render_to(&mut out, payload)?;
        out.flush()?;
        Ok(())
    }

    /// Write `payload` to `w`. JSON output is a single document followed by a newline.
    pub fn render_to<T: Render + Serialize>(
        &self,
        w: &mut dyn Write,
        payload: &T,
    ) -> Result<(), CliError> {
        if self.format == OutputFormat::Json {
            serde_json::to_writer_pretty(&mut *w, payload)?;
            writeln!(w)?;
        } else {
            payload.render_text(w)?;
        }
        Ok(())
    }
}

/// Human-readable form of a payload.
pub trait Render {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()>;
}

/// Byte count with a binary suffix, e.g. `2.0 GiB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct MemoryLine {
        server_id: String,
        memory: u64,
    }

    impl Render for MemoryLine {
        fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
            writeln!(w, "{} uses {}", self.server_id, human_bytes(self.memory))
        }
    }

    fn line() -> MemoryLine {
        MemoryLine {
            server_id: "survival".to_owned(),
            memory: 2_147_483_648,
        }
    }

    #[test]
    fn text_format_uses_render_impl() {
        let writer = OutputWriter::new(OutputFormat::Text);
        let mut buf = Vec::new();
        writer.render_to(&mut buf, &line()).expect("render text");
        assert_eq!(String::from_utf8(buf).expect("utf-8"), "survival uses 2.0 GiB\n");
    }

    #[test]
    fn json_format_is_one_document_with_trailing_newline() {
        let writer = OutputWriter::new(OutputFormat::Json);
        let mut buf = Vec::new();
        writer.render_to(&mut buf, &line()).expect("render json");

        assert!(buf.ends_with(b"\n"));
        let value: serde_json::Value = serde_json::from_slice(&buf).expect("valid json");
        assert_eq!(value["server_id"], "survival");
        assert_eq!(value["memory"], 2_147_483_648_u64);
    }

    #[test]
    fn human_bytes_picks_largest_unit() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(2_147_483_648), "2.0 GiB");
    }
}
