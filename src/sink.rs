use crate::data::Sample;
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const HEADER: &str = "timestamp,device_id,device_name,memory_used_MB,memory_total_MB";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only CSV log of samples. The header is written once, when the log
/// is created.
pub struct TelemetryLog<W: Write> {
    writer: W,
    target: String,
}

impl TelemetryLog<BufWriter<File>> {
    /// Creates (or truncates) the file at `path` and writes the header.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Self::init(BufWriter::new(file), path.display().to_string())
    }

    /// Continues an existing log. A missing or empty file is initialized
    /// like `create`; a file that does not start with `HEADER` is rejected.
    pub fn resume(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let target = path.display().to_string();

        if file.metadata()?.len() == 0 {
            return Self::init(BufWriter::new(file), target);
        }

        let mut first = Vec::new();
        BufReader::new(&mut file).read_until(b'\n', &mut first)?;
        if first.trim_ascii_end() != HEADER.as_bytes() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{target} is not a telemetry log (unexpected header)"),
            ));
        }

        // A killed poller can leave the last row without its newline
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        let mut writer = BufWriter::new(file);
        if last[0] != b'\n' {
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(Self { writer, target })
    }
}

impl<W: Write> TelemetryLog<W> {
    #[cfg(test)]
    pub fn new(writer: W) -> io::Result<Self> {
        Self::init(writer, "<writer>".to_string())
    }

    fn init(mut writer: W, target: String) -> io::Result<Self> {
        writeln!(writer, "{HEADER}")?;
        writer.flush()?;
        Ok(Self { writer, target })
    }

    /// Writes all rows of one tick, then flushes.
    pub fn append(&mut self, samples: &[Sample]) -> io::Result<()> {
        for sample in samples {
            writeln!(self.writer, "{}", encode_row(sample))?;
        }
        self.writer.flush()
    }

    /// Where the rows go, for error messages.
    pub fn target(&self) -> &str {
        &self.target
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn encode_row(sample: &Sample) -> String {
    format!(
        "{},{},{},{:.2},{:.2}",
        sample.timestamp.format(TIMESTAMP_FORMAT),
        sample.device_id,
        quote_field(&sample.device_name),
        sample.memory_used,
        sample.memory_total,
    )
}

fn quote_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
