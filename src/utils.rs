// SPDX-License-Identifier: MPL-2.0
use std::{fmt, ops::Range, str::FromStr};

use compact_str::CompactString;
use imara_diff::{
    intern::{Interner, Token},
    Algorithm,
};

/// Diff algorithm used to align copied text against edited text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffAlgorithm {
    /// Myers' algorithm with imara-diff's heuristics for very large inputs.
    #[default]
    Myers,
    /// Myers' algorithm, always producing a minimal edit script.
    MyersMinimal,
    Histogram,
    /// Python's `difflib.SequenceMatcher`, for comparison with the legacy tooling.
    #[cfg(feature = "python-diff")]
    Python,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown diff algorithm `{0}` (expected one of: myers, myers-minimal, histogram)")]
pub struct UnknownDiffAlgorithm(String);

impl FromStr for DiffAlgorithm {
    type Err = UnknownDiffAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "myers" => Ok(DiffAlgorithm::Myers),
            "myers-minimal" => Ok(DiffAlgorithm::MyersMinimal),
            "histogram" => Ok(DiffAlgorithm::Histogram),
            #[cfg(feature = "python-diff")]
            "python" => Ok(DiffAlgorithm::Python),
            _ => Err(UnknownDiffAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for DiffAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffAlgorithm::Myers => write!(f, "myers"),
            DiffAlgorithm::MyersMinimal => write!(f, "myers-minimal"),
            DiffAlgorithm::Histogram => write!(f, "histogram"),
            #[cfg(feature = "python-diff")]
            DiffAlgorithm::Python => write!(f, "python"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeTag {
    Insert,
    Delete,
    Replace,
}

/// A non-equal region of a character diff. Ranges are `char` indices, not byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub before: Range<u32>,
    pub after: Range<u32>,
}

impl Hunk {
    pub fn tag(&self) -> ChangeTag {
        match (self.before.is_empty(), self.after.is_empty()) {
            (true, _) => ChangeTag::Insert,
            (false, true) => ChangeTag::Delete,
            (false, false) => ChangeTag::Replace,
        }
    }
}

/// Compute the hunks of the edit script transforming `old` into `new`, character by character.
///
/// Everything between two hunks is equal in both inputs. Hunks are returned in order.
pub fn char_diff(algorithm: DiffAlgorithm, old: &str, new: &str) -> Vec<Hunk> {
    let algorithm = match algorithm {
        DiffAlgorithm::Myers => Algorithm::Myers,
        DiffAlgorithm::MyersMinimal => Algorithm::MyersMinimal,
        DiffAlgorithm::Histogram => Algorithm::Histogram,
        #[cfg(feature = "python-diff")]
        DiffAlgorithm::Python => return python_diff(old, new),
    };

    // capacity is the number of distinct characters, not the text length
    let mut interner: Interner<char> = Interner::new(256);
    let old_tokens: Vec<Token> = old.chars().map(|c| interner.intern(c)).collect();
    let new_tokens: Vec<Token> = new.chars().map(|c| interner.intern(c)).collect();

    let mut hunks = Vec::new();
    imara_diff::diff_with_tokens(
        algorithm,
        &old_tokens,
        &new_tokens,
        interner.num_tokens(),
        |before: Range<u32>, after: Range<u32>| {
            hunks.push(Hunk { before, after });
        },
    );

    hunks
}

#[cfg(feature = "python-diff")]
pub fn python_diff(old: &str, new: &str) -> Vec<Hunk> {
    use pyo3::prelude::*;

    let opcodes = Python::with_gil(|py| -> PyResult<Vec<(String, u32, u32, u32, u32)>> {
        let difflib = py.import_bound("difflib")?;
        let matcher = difflib
            .getattr("SequenceMatcher")?
            .call1((py.None(), old, new))?;
        matcher.call_method0("get_opcodes")?.extract()
    });

    match opcodes {
        Ok(opcodes) => opcodes
            .into_iter()
            .filter(|(tag, ..)| tag != "equal")
            .map(|(_, i1, i2, j1, j2)| Hunk {
                before: i1..i2,
                after: j1..j2,
            })
            .collect(),
        Err(err) => {
            tracing::error!(
                message = "difflib alignment failed, falling back to Myers",
                error = %err
            );
            char_diff(DiffAlgorithm::Myers, old, new)
        }
    }
}

/// Byte offset of every `char` in `text`, followed by `text.len()`.
///
/// Lets `char` index ranges from [`Hunk`]s be turned into string slices.
pub fn char_offsets(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect()
}

// shortuuid's alphabet: no 0/O, 1/I/l to stay readable when printed
const TOKEN_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const _: () = assert!(TOKEN_ALPHABET.len() == 57);

/// Length of an encoded token. 57^22 > 2^128, so every `u128` fits.
pub const TOKEN_LENGTH: usize = 22;

/// Encode 128 bits as a fixed-length base57 token.
pub fn encode_token(mut value: u128) -> CompactString {
    let mut digits = [0u8; TOKEN_LENGTH];
    for digit in digits.iter_mut().rev() {
        *digit = TOKEN_ALPHABET[(value % 57) as usize];
        value /= 57;
    }
    digits.iter().map(|&b| b as char).collect()
}
