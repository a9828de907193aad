use std::sync::Arc;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Candidate source for one directory pass. Implementations must be
/// restartable: every call to `candidates` yields a fresh full pass.
pub trait PathGenerator: Send + Sync {
    fn candidates(&self) -> Box<dyn Iterator<Item = String> + Send + '_>;

    /// Number of candidates in a single pass, used by the progress monitor.
    fn pass_size(&self) -> u64;
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("failed to open wordlist '{path}': {source}")]
    FileOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read wordlist '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("wordlist '{path}' contains no usable entries")]
    EmptyWordlist { path: String },

    #[error("charset is empty")]
    EmptyCharset,

    #[error("invalid length range {min}-{max}")]
    InvalidLengthRange { min: usize, max: usize },
}

/// Dictionary generator backed by a wordlist loaded once at setup.
/// Blank lines and `#` comments are skipped at load time.
pub struct Dictionary {
    words: Arc<Vec<String>>,
}

impl Dictionary {
    pub fn new(words: Vec<String>) -> Self {
        Self {
            words: Arc::new(words),
        }
    }

    pub async fn from_file(path: &str) -> Result<Self, GeneratorError> {
        let words = read_wordlist(path).await?;
        if words.is_empty() {
            return Err(GeneratorError::EmptyWordlist {
                path: path.to_string(),
            });
        }
        Ok(Self::new(words))
    }
}

impl PathGenerator for Dictionary {
    fn candidates(&self) -> Box<dyn Iterator<Item = String> + Send + '_> {
        Box::new(self.words.iter().cloned())
    }

    fn pass_size(&self) -> u64 {
        self.words.len() as u64
    }
}

pub async fn read_wordlist(path: &str) -> Result<Vec<String>, GeneratorError> {
    let handle = File::open(path)
        .await
        .map_err(|e| GeneratorError::FileOpen {
            path: path.to_string(),
            source: e,
        })?;
    let mut out = Vec::new();
    let mut lines = BufReader::new(handle).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                out.push(line.to_string());
            }
            Ok(None) => break,
            Err(e) => {
                return Err(GeneratorError::FileRead {
                    path: path.to_string(),
                    source: e,
                })
            }
        }
    }
    Ok(out)
}

/// Exhaustive charset enumeration over a length range, lexicographic within
/// each length. Large but finite; the dispatcher's bounded probe queue is
/// what keeps this from running away.
pub struct BruteForceAlphabet {
    charset: Vec<char>,
    min_len: usize,
    max_len: usize,
}

impl BruteForceAlphabet {
    pub fn new(charset: Vec<char>, min_len: usize, max_len: usize) -> Result<Self, GeneratorError> {
        if charset.is_empty() {
            return Err(GeneratorError::EmptyCharset);
        }
        if min_len == 0 || min_len > max_len {
            return Err(GeneratorError::InvalidLengthRange {
                min: min_len,
                max: max_len,
            });
        }
        Ok(Self {
            charset,
            min_len,
            max_len,
        })
    }
}

struct OdometerIter<'a> {
    charset: &'a [char],
    min_len: usize,
    max_len: usize,
    len: usize,
    // one index per position, None once the current length is exhausted
    digits: Option<Vec<usize>>,
}

impl<'a> Iterator for OdometerIter<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            match &mut self.digits {
                Some(digits) => {
                    let word: String = digits.iter().map(|&i| self.charset[i]).collect();
                    // advance, rightmost digit fastest
                    let mut pos = digits.len();
                    let mut rolled = true;
                    while pos > 0 {
                        pos -= 1;
                        digits[pos] += 1;
                        if digits[pos] < self.charset.len() {
                            rolled = false;
                            break;
                        }
                        digits[pos] = 0;
                    }
                    if rolled {
                        self.digits = None;
                    }
                    return Some(word);
                }
                None => {
                    if self.len >= self.max_len {
                        return None;
                    }
                    self.len += 1;
                    if self.len < self.min_len {
                        self.len = self.min_len;
                    }
                    self.digits = Some(vec![0; self.len]);
                }
            }
        }
    }
}

impl PathGenerator for BruteForceAlphabet {
    fn candidates(&self) -> Box<dyn Iterator<Item = String> + Send + '_> {
        Box::new(OdometerIter {
            charset: &self.charset,
            min_len: self.min_len,
            max_len: self.max_len,
            len: self.min_len - 1,
            digits: None,
        })
    }

    fn pass_size(&self) -> u64 {
        let base = self.charset.len() as u64;
        (self.min_len..=self.max_len)
            .map(|len| base.saturating_pow(len as u32))
            .fold(0u64, u64::saturating_add)
    }
}

/// Markers a URL-fuzz run substitutes candidates between. A fuzz run is
/// non-recursive: only the synthetic start entry is ever expanded.
#[derive(Clone, Debug)]
pub struct FuzzMarkers {
    pub start: String,
    pub end: String,
}

impl FuzzMarkers {
    /// The relative URL probed for one candidate.
    pub fn apply(&self, item: &str) -> String {
        format!("{}{}{}", self.start, item, self.end)
    }
}

/// Makes a raw wordlist entry safe to splice into a URL: encodes spaces,
/// drops quotes and backslashes, trims path separators. A bare "/" entry
/// would recurse into the directory being expanded, so it is replaced with
/// a harmless placeholder.
pub fn sanitize_item(item: &str) -> String {
    let mut item: String = item
        .trim()
        .replace(' ', "%20")
        .replace('"', "")
        .replace('\\', "");

    if item.len() > 2 {
        while item.ends_with('/') {
            item.pop();
        }
        while item.starts_with('/') {
            item.remove(0);
        }
    } else if item.starts_with('/') {
        item = "dirprobe".to_string();
    }
    item
}
