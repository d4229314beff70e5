use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

/// Appends log output to a file and trims it back to the newest `max_lines`
/// lines once enough new lines have accumulated.
#[derive(Clone)]
pub struct LineCappedWriter {
    path: PathBuf,
    max_lines: usize,
    pending_lines: Arc<Mutex<usize>>,
}

impl LineCappedWriter {
    pub fn new(path: impl Into<PathBuf>, max_lines: u32) -> Self {
        Self {
            path: path.into(),
            max_lines: max_lines.max(1) as usize,
            pending_lines: Arc::new(Mutex::new(0)),
        }
    }

    /// Trim after 10% of the cap (at least 50 lines) has been written.
    fn trim_threshold(&self) -> usize {
        (self.max_lines / 10).max(50)
    }

    pub fn trim(&self) -> io::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
        if lines.len() <= self.max_lines {
            return Ok(());
        }

        let mut file = File::create(&self.path)?;
        for line in &lines[lines.len() - self.max_lines..] {
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl io::Write for LineCappedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(buf)?;

        let mut pending = self.pending_lines.lock();
        *pending += buf.iter().filter(|&&b| b == b'\n').count();
        if *pending >= self.trim_threshold() {
            if let Err(e) = self.trim() {
                eprintln!("Failed to trim log file {}: {}", self.path.display(), e);
            }
            *pending = 0;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LineCappedWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Removes ANSI escape sequences so coloured output stays readable on disk.
pub fn strip_ansi_escapes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' {
            in_escape = true;
        } else if in_escape {
            if c.is_ascii_alphabetic() {
                in_escape = false;
            }
        } else {
            result.push(c);
        }
    }
    result
}
