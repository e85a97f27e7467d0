//! Line cursor over one section of the ground-truth log.
//!
//! The ground-truth CSV exported by the motion-capture system holds two
//! sections, `Segments` and `Trajectories`, each introduced by a sentinel
//! line followed by four header lines. The offset of the first data byte of
//! each section is found once with [`find_stream_pos`] and reused by every
//! replay run.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Sentinel line of the per-frame euler + translation section.
pub const SEGMENTS_SECTION: &str = "Segments";

/// Sentinel line of the per-frame raw marker section.
pub const TRAJECTORIES_SECTION: &str = "Trajectories";

/// Header lines between a sentinel and the first data line.
const SECTION_HEADER_LINES: usize = 4;

/// Strip a trailing `\n` or `\r\n`.
fn trim_line_ending(line: &mut String) {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
}

/// Scan `path` for a line exactly equal to `section` and return the byte
/// offset just past the four header lines that follow it.
///
/// When the sentinel never appears the file length is returned, so a cursor
/// seeked there immediately reads as exhausted.
pub fn find_stream_pos(path: &Path, section: &str) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut line = String::new();
    let mut pos = 0u64;

    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            debug!(section, offset = pos, "section not found, using end of file");
            return Ok(pos);
        }
        pos += read as u64;
        trim_line_ending(&mut line);

        if line == section {
            let mut skipped = Vec::new();
            for _ in 0..SECTION_HEADER_LINES {
                skipped.clear();
                let read = reader.read_until(b'\n', &mut skipped)?;
                if read == 0 {
                    break;
                }
                pos += read as u64;
            }
            debug!(section, offset = pos, "found section start");
            return Ok(pos);
        }
    }
}

/// A text channel opened lazily on start and advanced one line per step.
#[derive(Debug, Default)]
pub struct TextCursor {
    reader: Option<BufReader<File>>,
    path: Option<PathBuf>,
    buf: String,
}

impl TextCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` for reading from its first byte.
    pub fn open(&mut self, path: &Path) -> io::Result<()> {
        let file = File::open(path)?;
        self.reader = Some(BufReader::new(file));
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Position the cursor at an absolute byte offset.
    pub fn seek(&mut self, offset: u64) -> io::Result<()> {
        match self.reader.as_mut() {
            Some(reader) => reader.seek(SeekFrom::Start(offset)).map(|_| ()),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "cursor is not open")),
        }
    }

    /// Next line without its line ending, or `None` at end of stream.
    ///
    /// A closed cursor and a read error both read as end of stream.
    pub fn next_line(&mut self) -> Option<String> {
        let reader = self.reader.as_mut()?;
        self.buf.clear();
        match reader.read_line(&mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                trim_line_ending(&mut self.buf);
                Some(self.buf.clone())
            }
            Err(e) => {
                warn!(path = ?self.path, "read failed, treating as end of stream: {}", e);
                None
            }
        }
    }

    pub fn close(&mut self) {
        self.reader = None;
        self.path = None;
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}
