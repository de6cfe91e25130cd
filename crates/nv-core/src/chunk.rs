//! Content chunking
//!
//! Splits a file's text into ordered chunks according to its category:
//! code is cut at function/class/assignment boundaries, markdown at
//! headings (or blank-line paragraphs when there are none), and anything
//! else into fixed character windows. Every chunk keeps its character span
//! in the original content.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Config;
use crate::extract::FileCategory;

/// Lines that open a function, class, or function-valued assignment.
static CODE_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?m)^[ \t]*(?:",
        // function foo / export default async function
        r"(?:export[ \t]+)?(?:default[ \t]+)?(?:async[ \t]+)?function\b",
        // class Foo / export abstract class Foo / python class
        r"|(?:export[ \t]+)?(?:default[ \t]+)?(?:(?:public|abstract|final)[ \t]+)*class[ \t]+\w+",
        // const foo = (...) => / let foo = function / var foo = async x =>
        r"|(?:export[ \t]+)?(?:const|let|var)[ \t]+\w+[ \t]*=[ \t]*(?:async[ \t]*)?(?:function\b|\([^)\n]*\)[ \t]*=>|\w+[ \t]*=>)",
        // def foo / async def foo
        r"|(?:async[ \t]+)?def[ \t]+\w+",
        // fn foo / pub(crate) async fn foo
        r"|(?:pub(?:\([^)\n]*\))?[ \t]+)?(?:async[ \t]+)?fn[ \t]+\w+",
        // func foo / func (r *T) foo
        r"|func[ \t]+(?:\([^)\n]*\)[ \t]*)?\w+",
        r")",
    ))
    .expect("code boundary pattern is valid")
});

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(#{1,6})[ \t]+(\S.*?)[ \t]*\r?$").expect("heading pattern is valid")
});

static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").expect("blank line pattern is valid"));

/// Kind of content a chunk holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Function,
    Code,
    Section,
    Paragraph,
    Generic,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Code => "code",
            Self::Section => "section",
            Self::Paragraph => "paragraph",
            Self::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChunkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "function" => Ok(Self::Function),
            "code" => Ok(Self::Code),
            "section" => Ok(Self::Section),
            "paragraph" => Ok(Self::Paragraph),
            "generic" => Ok(Self::Generic),
            other => Err(format!("unknown chunk type: {other}")),
        }
    }
}

/// Character offsets `[start, end)` into the source content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// File-level metadata carried by every chunk of that file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// Modification time, milliseconds since the Unix epoch
    pub mtime: u64,
    /// File size in bytes
    pub size: u64,
    /// Content checksum of the whole file
    pub checksum: Option<String>,
    pub file_name: String,
    /// Heading text for markdown sections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
}

/// A catalog record: one span of a file plus the location of its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    /// Vault-relative path with `/` separators
    pub file_path: String,
    pub chunk_index: usize,
    pub text: String,
    #[serde(flatten)]
    pub span: Span,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub metadata: ChunkMetadata,
    /// Byte offset of this chunk's vector in the vector store
    #[serde(default)]
    pub embedding_offset: u64,
    /// Number of f32 values in this chunk's vector
    #[serde(default)]
    pub embedding_length: usize,
}

impl Chunk {
    /// Stable identifier for a chunk of a file.
    pub fn make_id(file_path: &str, chunk_index: usize, span: Span) -> String {
        format!("{}#{}:{}-{}", file_path, chunk_index, span.start, span.end)
    }
}

/// A chunk before filtering, in byte offsets.
struct Candidate {
    start: usize,
    end: usize,
    chunk_type: ChunkType,
    heading: Option<String>,
}

/// Splits file content into chunks.
#[derive(Debug, Clone)]
pub struct ContentChunker {
    window_size: usize,
    min_chars: usize,
}

impl ContentChunker {
    pub fn new(window_size: usize, min_chars: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            min_chars,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.window_size, config.min_chunk_chars)
    }

    /// Chunk `content` of the file at `file_path` (vault-relative).
    ///
    /// The returned chunks have contiguous indices starting at 0, spans in
    /// characters, and zeroed embedding fields.
    pub fn chunk(&self, file_path: &str, content: &str, metadata: &ChunkMetadata) -> Vec<Chunk> {
        let candidates = match FileCategory::from_path(Path::new(file_path)) {
            FileCategory::Code => self.code_candidates(content),
            FileCategory::Markdown => self.markdown_candidates(content),
            FileCategory::Other => self.windows(content, ChunkType::Generic),
        };

        let offsets = CharOffsets::new(content);
        candidates
            .into_iter()
            .filter(|c| content[c.start..c.end].trim().chars().count() >= self.min_chars)
            .enumerate()
            .map(|(chunk_index, c)| {
                let span = Span {
                    start: offsets.char_at(c.start),
                    end: offsets.char_at(c.end),
                };
                Chunk {
                    id: Chunk::make_id(file_path, chunk_index, span),
                    file_path: file_path.to_string(),
                    chunk_index,
                    text: content[c.start..c.end].to_string(),
                    span,
                    chunk_type: c.chunk_type,
                    metadata: ChunkMetadata {
                        heading: c.heading,
                        ..metadata.clone()
                    },
                    embedding_offset: 0,
                    embedding_length: 0,
                }
            })
            .collect()
    }

    fn code_candidates(&self, content: &str) -> Vec<Candidate> {
        let boundaries: Vec<usize> = CODE_BOUNDARY.find_iter(content).map(|m| m.start()).collect();
        if boundaries.len() < 2 {
            return self.windows(content, ChunkType::Code);
        }

        let functions = spans_between(&boundaries, content.len()).map(|(start, end)| Candidate {
            start,
            end,
            chunk_type: ChunkType::Function,
            heading: None,
        });
        lead_in(boundaries[0], ChunkType::Code)
            .into_iter()
            .chain(functions)
            .collect()
    }

    fn markdown_candidates(&self, content: &str) -> Vec<Candidate> {
        let headings: Vec<(usize, String)> = HEADING
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let title = caps.get(2)?.as_str().trim_end_matches('#').trim();
                Some((whole.start(), title.to_string()))
            })
            .collect();

        if headings.is_empty() {
            return paragraphs(content);
        }

        let starts: Vec<usize> = headings.iter().map(|(start, _)| *start).collect();
        let sections = spans_between(&starts, content.len())
            .zip(headings)
            .map(|((start, end), (_, title))| Candidate {
                start,
                end,
                chunk_type: ChunkType::Section,
                heading: Some(title),
            });
        lead_in(starts[0], ChunkType::Paragraph)
            .into_iter()
            .chain(sections)
            .collect()
    }

    /// Fixed windows of `window_size` characters.
    fn windows(&self, content: &str, chunk_type: ChunkType) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        let mut start = 0;
        let mut count = 0;

        for (byte, _) in content.char_indices() {
            if count == self.window_size {
                candidates.push(Candidate {
                    start,
                    end: byte,
                    chunk_type,
                    heading: None,
                });
                start = byte;
                count = 0;
            }
            count += 1;
        }
        if start < content.len() {
            candidates.push(Candidate {
                start,
                end: content.len(),
                chunk_type,
                heading: None,
            });
        }

        candidates
    }
}

impl Default for ContentChunker {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Blank-line delimited paragraphs, trimmed of surrounding whitespace.
fn paragraphs(content: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut start = 0;

    let separators = BLANK_LINE
        .find_iter(content)
        .map(|m| (m.start(), m.end()))
        .chain(std::iter::once((content.len(), content.len())));

    for (sep_start, sep_end) in separators {
        let raw = &content[start..sep_start];
        let leading = raw.len() - raw.trim_start().len();
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let begin = start + leading;
            candidates.push(Candidate {
                start: begin,
                end: begin + trimmed.len(),
                chunk_type: ChunkType::Paragraph,
                heading: None,
            });
        }
        start = sep_end;
    }

    candidates
}

/// Whatever precedes the first boundary, as one candidate.
fn lead_in(first: usize, chunk_type: ChunkType) -> Option<Candidate> {
    (first > 0).then_some(Candidate {
        start: 0,
        end: first,
        chunk_type,
        heading: None,
    })
}

/// Pair each boundary with the next one, the last running to `len`.
fn spans_between(boundaries: &[usize], len: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
    boundaries.iter().enumerate().map(move |(i, &start)| {
        let end = boundaries.get(i + 1).copied().unwrap_or(len);
        (start, end)
    })
}

/// Byte offset to character offset lookup.
struct CharOffsets {
    starts: Vec<usize>,
}

impl CharOffsets {
    fn new(content: &str) -> Self {
        Self {
            starts: content.char_indices().map(|(b, _)| b).collect(),
        }
    }

    fn char_at(&self, byte: usize) -> usize {
        self.starts.partition_point(|&b| b < byte)
    }
}
