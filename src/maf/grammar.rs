//! Line-level MAF grammar
//!
//! Each line of a block is classified by its first character into a
//! [`LineRecord`]. Failures are reported as [`GrammarError`]s, which carry no
//! position; the block parser lifts them into [`MafError::Format`] with the
//! block's offset and the offending line.
//!
//! [`MafError::Format`]: crate::error::MafError::Format

use crate::maf::record::{Header, Sequence, SequenceData};
use crate::types::Strand;
use thiserror::Error;

/// Ordered `key=value` variables from a header or `a` line
pub type Vars = Vec<(String, String)>;

/// A malformed MAF line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    /// First line of the file is not a `##maf` header
    #[error("missing '##maf' header line")]
    MissingMarker,

    /// Header has no `version` variable
    #[error("header has no 'version' variable")]
    MissingVersion,

    /// Token is not of the form `key=value`
    #[error("malformed variable '{0}', expected key=value")]
    BadVariable(String),

    /// Wrong number of whitespace-separated fields
    #[error("'{tag}' line has {actual} fields, expected {expected}")]
    FieldCount {
        /// Line tag
        tag: char,
        /// Required field count
        expected: usize,
        /// Fields present
        actual: usize,
    },

    /// A numeric field is not a non-negative integer
    #[error("invalid {field} '{value}'")]
    InvalidNumber {
        /// Field name
        field: &'static str,
        /// Offending token
        value: String,
    },

    /// Strand token is neither `+` nor `-`
    #[error("invalid strand '{0}', expected '+' or '-'")]
    InvalidStrand(String),

    /// Status code of an `e` line is not a single character
    #[error("invalid empty-line status '{0}'")]
    InvalidStatus(String),

    /// Aligned text is shorter than the declared size
    #[error("text of {sequence} has {text_len} characters but size is {size}")]
    ShortText {
        /// Sequence source
        sequence: String,
        /// Characters of text
        text_len: usize,
        /// Declared size
        size: u64,
    },

    /// Aligned region runs past the end of its source sequence
    #[error("{sequence}: start {start} + size {size} exceeds source size {source_size}")]
    CoordinateRange {
        /// Sequence source
        sequence: String,
        /// Declared start
        start: u64,
        /// Declared size
        size: u64,
        /// Declared source size
        source_size: u64,
    },

    /// `i` or `q` line names a different source than the line before it
    #[error("'{tag}' line for {found} follows the sequence line for {expected}")]
    SourceMismatch {
        /// Line tag
        tag: char,
        /// Source of the preceding sequence
        expected: String,
        /// Source named on this line
        found: String,
    },

    /// `i` or `q` line without an `s` line to attach to
    #[error("'{0}' line does not follow an 's' line")]
    Orphan(char),

    /// Line tag not part of MAF
    #[error("unrecognized line tag '{0}'")]
    UnknownTag(char),

    /// Block text does not begin with an `a` line
    #[error("block does not start with an 'a' line")]
    MissingBlockStart,
}

/// One classified line of a block body
#[derive(Debug, Clone, PartialEq)]
pub enum LineRecord<'a> {
    /// `s` or `e` line
    Sequence(Sequence),
    /// `i` line: source and the fields after it
    Synteny {
        /// Source the line refers to
        source: &'a str,
        /// Remaining fields, verbatim
        data: Vec<String>,
    },
    /// `q` line: source and quality string
    Quality {
        /// Source the line refers to
        source: &'a str,
        /// Quality characters
        data: &'a str,
    },
    /// `#` comment or blank line
    Ignored,
    /// `i`, `q` or `e` line while that line kind is disabled
    Disabled(char),
    /// Line with an unrecognized tag
    Unknown(char),
}

/// Scan `key=value` tokens, each matching `\w+=\S*`
pub fn parse_vars(text: &str) -> Result<Vars, GrammarError> {
    text.split_ascii_whitespace()
        .map(|token| {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| GrammarError::BadVariable(token.to_string()))?;
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(GrammarError::BadVariable(token.to_string()));
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Parse the header text preceding the first block
///
/// Comment lines after `##maf` are joined with single spaces into
/// `alignment_params`. Any other non-blank line is returned as an
/// [`GrammarError::UnknownTag`] for the caller to warn about or reject.
pub fn parse_header(text: &str) -> Result<(Header, Vec<GrammarError>), GrammarError> {
    let mut lines = text.lines();
    let first = lines.next().ok_or(GrammarError::MissingMarker)?;
    let rest = first
        .strip_prefix("##maf")
        .filter(|r| r.is_empty() || r.starts_with(|c: char| c.is_ascii_whitespace()))
        .ok_or(GrammarError::MissingMarker)?;
    let vars = parse_vars(rest)?;

    let mut params: Vec<&str> = Vec::new();
    let mut stray = Vec::new();
    for line in lines {
        let line = line.trim_end_matches('\r');
        if let Some(comment) = line.strip_prefix('#') {
            let comment = comment.trim();
            if !comment.is_empty() {
                params.push(comment);
            }
        } else if let Some(tag) = line.trim_start().chars().next() {
            stray.push(GrammarError::UnknownTag(tag));
        }
    }
    let alignment_params = if params.is_empty() {
        None
    } else {
        Some(params.join(" "))
    };
    Ok((Header::new(vars, alignment_params)?, stray))
}

/// Parse the variables of an `a` line
pub fn parse_block_line(line: &str) -> Result<Vars, GrammarError> {
    let rest = line
        .strip_prefix('a')
        .filter(|r| r.is_empty() || r.starts_with(|c: char| c.is_ascii_whitespace()))
        .ok_or(GrammarError::MissingBlockStart)?;
    parse_vars(rest)
}

/// Classify and parse one line of a block body
pub fn parse_line(line: &str, extended: bool, empty: bool) -> Result<LineRecord<'_>, GrammarError> {
    let line = line.trim_end_matches('\r');
    let tag = match line.chars().next() {
        None => return Ok(LineRecord::Ignored),
        Some(c) => c,
    };
    match tag {
        's' => parse_sequence_line(line).map(LineRecord::Sequence),
        'e' if empty => parse_empty_line(line).map(LineRecord::Sequence),
        'i' if extended => {
            let mut fields = line.split_ascii_whitespace().skip(1);
            let source = fields.next().ok_or(GrammarError::FieldCount {
                tag,
                expected: 6,
                actual: 1,
            })?;
            Ok(LineRecord::Synteny {
                source,
                data: fields.map(str::to_string).collect(),
            })
        }
        'q' if extended => {
            let fields: Vec<&str> = line.split_ascii_whitespace().collect();
            if fields.len() != 3 {
                return Err(GrammarError::FieldCount {
                    tag,
                    expected: 3,
                    actual: fields.len(),
                });
            }
            Ok(LineRecord::Quality {
                source: fields[1],
                data: fields[2],
            })
        }
        'e' | 'i' | 'q' => Ok(LineRecord::Disabled(tag)),
        '#' => Ok(LineRecord::Ignored),
        c if c.is_ascii_whitespace() => {
            if line.trim().is_empty() {
                Ok(LineRecord::Ignored)
            } else {
                Ok(LineRecord::Unknown(c))
            }
        }
        c => Ok(LineRecord::Unknown(c)),
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<u64, GrammarError> {
    value.parse::<u64>().map_err(|_| GrammarError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn split_fields(line: &str, tag: char, expected: usize) -> Result<Vec<&str>, GrammarError> {
    let fields: Vec<&str> = line.split_ascii_whitespace().collect();
    if fields.len() != expected {
        return Err(GrammarError::FieldCount {
            tag,
            expected,
            actual: fields.len(),
        });
    }
    Ok(fields)
}

/// `start + size` must stay within the source sequence
fn check_range(source: &str, start: u64, size: u64, source_size: u64) -> Result<(), GrammarError> {
    match start.checked_add(size) {
        Some(end) if end <= source_size => Ok(()),
        _ => Err(GrammarError::CoordinateRange {
            sequence: source.to_string(),
            start,
            size,
            source_size,
        }),
    }
}

/// `s src start size strand srcSize text`
pub fn parse_sequence_line(line: &str) -> Result<Sequence, GrammarError> {
    let f = split_fields(line, 's', 7)?;
    let size = parse_number("size", f[3])?;
    let text = f[6];
    if (text.len() as u64) < size {
        return Err(GrammarError::ShortText {
            sequence: f[1].to_string(),
            text_len: text.len(),
            size,
        });
    }
    let start = parse_number("start", f[2])?;
    let source_size = parse_number("source size", f[5])?;
    check_range(f[1], start, size, source_size)?;
    Ok(Sequence {
        source: f[1].to_string(),
        start,
        size,
        strand: f[4].parse::<Strand>()?,
        source_size,
        data: SequenceData::Aligned {
            text: text.to_string(),
            quality: None,
            synteny: Vec::new(),
        },
    })
}

/// `e src start size strand srcSize status`
///
/// Six fields follow the tag; the last is a one-character status code.
pub fn parse_empty_line(line: &str) -> Result<Sequence, GrammarError> {
    let f = split_fields(line, 'e', 7)?;
    let mut chars = f[6].chars();
    let status = match (chars.next(), chars.next()) {
        (Some(c), None) => c,
        _ => return Err(GrammarError::InvalidStatus(f[6].to_string())),
    };
    let start = parse_number("start", f[2])?;
    let size = parse_number("size", f[3])?;
    let source_size = parse_number("source size", f[5])?;
    check_range(f[1], start, size, source_size)?;
    Ok(Sequence {
        source: f[1].to_string(),
        start,
        size,
        strand: f[4].parse::<Strand>()?,
        source_size,
        data: SequenceData::Empty { status },
    })
}
