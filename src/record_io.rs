use flate2::read::MultiGzDecoder;
use log::debug;
use noodles::bgzf;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::record::{Record, RecordKind};

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

/// Open a file and pick a decoder from its extension, returning a boxed BufRead
///
/// `.bgz` goes through the BGZF reader, `.gz` through a multi-member gzip
/// decoder (which also reads BGZF). `-` and `stdin` read standard input.
pub fn open_input<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    if path == Path::new("-") || path == Path::new("stdin") {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }

    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    let reader: Box<dyn BufRead> = match extension(path) {
        Some("bgz") => Box::new(BufReader::new(bgzf::io::reader::Reader::new(file))),
        Some("gz") => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        _ => Box::new(BufReader::new(file)),
    };
    Ok(reader)
}

/// Output file, plain or block-gzipped
pub enum OutputWriter {
    Plain(BufWriter<File>),
    Bgzf(bgzf::io::writer::Writer<File>),
}

impl OutputWriter {
    /// Wrap an open file; `path` only decides the compression
    pub fn new(file: File, path: &Path) -> Self {
        match extension(path) {
            Some("gz") | Some("bgz") => OutputWriter::Bgzf(bgzf::io::writer::Writer::new(file)),
            _ => OutputWriter::Plain(BufWriter::new(file)),
        }
    }

    /// Flush everything and, for BGZF, write the final block and EOF marker
    pub fn finish(self) -> io::Result<()> {
        match self {
            OutputWriter::Plain(mut writer) => writer.flush(),
            OutputWriter::Bgzf(mut writer) => writer.finish().map(|_| ()),
        }
    }
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputWriter::Plain(writer) => writer.write(buf),
            OutputWriter::Bgzf(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputWriter::Plain(writer) => writer.flush(),
            OutputWriter::Bgzf(writer) => writer.flush(),
        }
    }
}

/// Create an output file, block-gzipped when the extension asks for it
pub fn create_output<P: AsRef<Path>>(path: P) -> Result<OutputWriter> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    Ok(OutputWriter::new(file, path))
}

/// Line reader for the three record shapes
pub struct RecordReader<R: Read> {
    reader: BufReader<R>,
    kind: Option<RecordKind>,
    line_no: usize,
}

impl<R: Read> RecordReader<R> {
    /// Reader that detects the kind of each line from its field count
    pub fn new(reader: R) -> Self {
        RecordReader {
            reader: BufReader::new(reader),
            kind: None,
            line_no: 0,
        }
    }

    /// Reader that rejects every line not shaped like `kind`
    pub fn with_kind(reader: R, kind: RecordKind) -> Self {
        RecordReader {
            kind: Some(kind),
            ..Self::new(reader)
        }
    }

    /// Next record, skipping blank lines and `#` comments
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.trim().is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let parsed = match self.kind {
                Some(kind) => Record::parse_as(trimmed, kind),
                None => Record::from_line(trimmed),
            };
            return parsed.map(Some).map_err(|e| match e {
                Error::MalformedRecord(msg) => {
                    Error::MalformedRecord(format!("line {}: {msg}", self.line_no))
                }
                other => other,
            });
        }
    }

    /// Read everything; the first malformed line rejects the whole input
    pub fn read_all(&mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record()? {
            records.push(record);
        }
        debug!("read {} records over {} lines", records.len(), self.line_no);
        Ok(records)
    }
}

/// Read every record of a file (compression detected from the extension)
pub fn read_records<P: AsRef<Path>>(path: P, kind: Option<RecordKind>) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let input = open_input(path)?;
    let mut reader = match kind {
        Some(kind) => RecordReader::with_kind(input, kind),
        None => RecordReader::new(input),
    };
    reader.read_all().map_err(|e| match e {
        Error::MalformedRecord(msg) => {
            Error::MalformedRecord(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

/// Write records one per line
pub fn write_records<'a, W, I>(writer: &mut W, records: I) -> Result<usize>
where
    W: Write + ?Sized,
    I: IntoIterator<Item = &'a Record>,
{
    let mut count = 0;
    for record in records {
        writeln!(writer, "{record}")?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Kind of the first data line of a file, `None` for an empty file
pub fn sniff_kind<P: AsRef<Path>>(path: P) -> Result<Option<RecordKind>> {
    let mut reader = RecordReader::new(open_input(path)?);
    Ok(reader.read_record()?.map(|record| record.kind()))
}
