//! MAF text output
//!
//! Sequence lines of a block are column-aligned: source names are padded
//! on the right, numbers on the left, so the aligned text of every line
//! starts in the same column. `q` lines are padded to that column too.
//!
//! # Example
//!
//! ```no_run
//! use biomaf::io::DataSink;
//! use biomaf::maf::{MafReader, MafWriter, ParseOptions};
//!
//! let reader = MafReader::from_path("chr22.maf", ParseOptions::default())?;
//! let mut writer = MafWriter::to_sink(DataSink::from_path("chr22.maf.bgz"))?;
//! writer.write_header(reader.header())?;
//! for block in reader {
//!     writer.write_block(&block?)?;
//! }
//! writer.finish()?;
//! # Ok::<(), biomaf::MafError>(())
//! ```

use crate::error::Result;
use crate::io::compression::CompressedWriter;
use crate::io::sink::DataSink;
use crate::maf::record::{Block, Header, Sequence, SequenceData};
use std::io::Write;

/// Writes headers and blocks as MAF text
pub struct MafWriter<W: Write> {
    inner: W,
    reset_vars: bool,
    blocks_written: u64,
}

impl MafWriter<CompressedWriter> {
    /// Write to a sink; BGZF or gzip compression follows its extension
    pub fn to_sink(sink: DataSink) -> Result<Self> {
        Ok(Self::new(CompressedWriter::new(sink)?))
    }

    /// Flush and close the sink, writing the BGZF EOF marker if needed
    pub fn finish(self) -> Result<()> {
        self.inner.finish()
    }
}

impl<W: Write> MafWriter<W> {
    /// Wrap a writer
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            reset_vars: false,
            blocks_written: 0,
        }
    }

    /// Replace every block's variables with `score=0.0` on output
    pub fn reset_block_vars(mut self, reset: bool) -> Self {
        self.reset_vars = reset;
        self
    }

    /// Number of blocks written so far
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Write the `##maf` line, comment lines and a blank separator
    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        write!(self.inner, "##maf")?;
        for (key, value) in header.vars() {
            write!(self.inner, " {}={}", key, value)?;
        }
        writeln!(self.inner)?;
        if let Some(params) = header.alignment_params() {
            writeln!(self.inner, "# {}", params)?;
        }
        writeln!(self.inner)?;
        Ok(())
    }

    /// Write one block followed by a blank line
    pub fn write_block(&mut self, block: &Block) -> Result<()> {
        write!(self.inner, "a")?;
        if self.reset_vars {
            write!(self.inner, " score=0.0")?;
        } else {
            for (key, value) in &block.vars {
                write!(self.inner, " {}={}", key, value)?;
            }
        }
        writeln!(self.inner)?;

        let src_w = column_width(block, |s| s.source.len());
        let start_w = column_width(block, |s| digits(s.start));
        let size_w = column_width(block, |s| digits(s.size));
        let total_w = column_width(block, |s| digits(s.source_size));
        // Characters between the source column and the text column of an
        // `s` line, minus the separator the `q` line already has.
        let quality_pad = start_w + size_w + total_w + 5;

        for seq in &block.sequences {
            let tag = if seq.is_empty() { 'e' } else { 's' };
            write!(
                self.inner,
                "{} {:<sw$} {:>stw$} {:>szw$} {} {:>tw$} ",
                tag,
                seq.source,
                seq.start,
                seq.size,
                seq.strand,
                seq.source_size,
                sw = src_w,
                stw = start_w,
                szw = size_w,
                tw = total_w
            )?;
            match &seq.data {
                SequenceData::Aligned {
                    text,
                    quality,
                    synteny,
                } => {
                    writeln!(self.inner, "{}", text)?;
                    if !synteny.is_empty() {
                        writeln!(self.inner, "i {:<sw$} {}", seq.source, synteny.join(" "), sw = src_w)?;
                    }
                    if let Some(q) = quality {
                        writeln!(
                            self.inner,
                            "q {:<sw$} {:pad$}{}",
                            seq.source,
                            "",
                            q,
                            sw = src_w,
                            pad = quality_pad
                        )?;
                    }
                }
                SequenceData::Empty { status } => writeln!(self.inner, "{}", status)?,
            }
        }
        writeln!(self.inner)?;
        self.blocks_written += 1;
        Ok(())
    }

    /// Flush buffered output
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Unwrap the inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn column_width<F: Fn(&Sequence) -> usize>(block: &Block, f: F) -> usize {
    block.sequences.iter().map(f).max().unwrap_or(0)
}

fn digits(n: u64) -> usize {
    n.to_string().len()
}
