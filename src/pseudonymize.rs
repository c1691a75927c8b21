// SPDX-License-Identifier: MPL-2.0
//! Replaces identifying values with stable masked tokens.
//!
//! Tokens are kept per identifier space (usually the name of the column being masked) in an
//! [`IdentifierMap`]. The map can be written to and reloaded from a separate mapping file, which is the
//! only place where original values and tokens appear side by side.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter},
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use compact_str::CompactString;
use rand::{rngs::StdRng, Rng, SeedableRng};
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::utils::encode_token;

pub type MaskToken = CompactString;

/// Result of masking one value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Masked {
    Token(MaskToken),
    /// The input was empty. Never equal to any token.
    NoValue,
}

impl Masked {
    pub fn token(&self) -> Option<&MaskToken> {
        match self {
            Masked::Token(token) => Some(token),
            Masked::NoValue => None,
        }
    }

    /// The value to write into an output field.
    pub fn as_field(&self) -> &str {
        match self {
            Masked::Token(token) => token.as_str(),
            Masked::NoValue => "",
        }
    }
}

// changing this changes every keyed token
const KEY_CONTEXT: &str = "tilewho 2024-06-01 identifier masking key";

/// How new tokens are generated.
#[derive(Debug, Clone)]
pub enum MaskPolicy {
    /// The token is a hash of the value, optionally keyed. Consistent across files without sharing state.
    ContentDerived { key: Option<[u8; 32]> },
    /// The token is random and only stays consistent through a persisted [`IdentifierMap`].
    Random,
    /// The token is the first match of the pattern inside the value, e.g. a numeric user id embedded in a
    /// `"Name Surname (12345)"` column. Different values carrying the same id share its token.
    ///
    /// Values without a match get a content-derived token, keyed with `fallback_key` if set.
    Pattern {
        pattern: Regex,
        fallback_key: Option<[u8; 32]>,
    },
}

/// Derive the 32-byte key used for keyed content tokens from a user-supplied secret.
pub fn secret_key(secret: &str) -> [u8; 32] {
    blake3::derive_key(KEY_CONTEXT, secret.as_bytes())
}

impl MaskPolicy {
    pub fn content_derived() -> Self {
        MaskPolicy::ContentDerived { key: None }
    }

    /// Content-derived tokens keyed with a secret, so tokens can't be recomputed from guessed values.
    pub fn keyed(secret: &str) -> Self {
        MaskPolicy::ContentDerived {
            key: Some(secret_key(secret)),
        }
    }

    pub fn pattern(pattern: Regex) -> Self {
        MaskPolicy::Pattern {
            pattern,
            fallback_key: None,
        }
    }

    /// Whether several originals may map to the same token.
    pub fn shares_tokens(&self) -> bool {
        matches!(self, MaskPolicy::Pattern { .. })
    }
}

/// Content-derived token for `value`.
pub fn content_token(value: &str, key: Option<&[u8; 32]>) -> MaskToken {
    let hash = match key {
        Some(key) => blake3::keyed_hash(key, value.as_bytes()),
        None => blake3::hash(value.as_bytes()),
    };
    let mut head = [0u8; 16];
    head.copy_from_slice(&hash.as_bytes()[..16]);
    encode_token(u128::from_le_bytes(head))
}

pub fn random_token<R: Rng + ?Sized>(rng: &mut R) -> MaskToken {
    encode_token(rng.gen())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    #[error("token `{token}` already masks a different value in `{space}`")]
    TokenCollision {
        space: CompactString,
        token: MaskToken,
    },
    #[error("value in `{space}` is already masked as `{existing}`, refusing to remap it to `{token}`")]
    ConflictingToken {
        space: CompactString,
        existing: MaskToken,
        token: MaskToken,
    },
}

/// One row of the mapping file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    #[serde(rename = "original_identifier")]
    pub original: String,
    #[serde(rename = "masked_identifier")]
    pub token: MaskToken,
    #[serde(rename = "column")]
    pub space: CompactString,
}

#[derive(Debug, thiserror::Error)]
pub enum MappingFileError {
    #[error("I/O error")]
    Io(#[from] io::Error),
    #[error("CSV error")]
    Csv(#[from] csv::Error),
    #[error("inconsistent mapping on line {line}")]
    Inconsistent {
        line: u64,
        #[source]
        source: ConsistencyError,
    },
}

#[derive(Debug, Default)]
struct SpaceIndex {
    by_original: FxHashMap<String, usize>,
    by_token: FxHashMap<MaskToken, usize>,
}

/// (identifier space, original value) to token.
///
/// Each original has exactly one token. Unless the map shares tokens, each token also stands for exactly
/// one original within its space.
#[derive(Debug, Default)]
pub struct IdentifierMap {
    entries: Vec<MappingEntry>,
    spaces: FxHashMap<CompactString, SpaceIndex>,
    shared_tokens: bool,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map where several originals may share one token, as produced by [`MaskPolicy::Pattern`].
    pub fn with_shared_tokens() -> Self {
        Self {
            shared_tokens: true,
            ..Self::default()
        }
    }

    /// An empty map with the token sharing rules of `policy`.
    pub fn for_policy(policy: &MaskPolicy) -> Self {
        if policy.shares_tokens() {
            Self::with_shared_tokens()
        } else {
            Self::new()
        }
    }

    pub fn shares_tokens(&self) -> bool {
        self.shared_tokens
    }

    pub fn get(&self, space: &str, original: &str) -> Option<&MaskToken> {
        let position = *self.spaces.get(space)?.by_original.get(original)?;
        Some(&self.entries[position].token)
    }

    pub fn contains_token(&self, space: &str, token: &str) -> bool {
        self.spaces
            .get(space)
            .is_some_and(|index| index.by_token.contains_key(token))
    }

    /// Record `original -> token` in `space`.
    ///
    /// Inserting an identical mapping again is a no-op. Fails if `original` is already mapped to another
    /// token, or, unless tokens are shared, `token` already stands for another value.
    pub fn insert(
        &mut self,
        space: &str,
        original: &str,
        token: MaskToken,
    ) -> Result<MaskToken, ConsistencyError> {
        let index = self.spaces.entry(CompactString::from(space)).or_default();

        if let Some(&position) = index.by_original.get(original) {
            let existing = &self.entries[position].token;
            if *existing == token {
                return Ok(token);
            }
            return Err(ConsistencyError::ConflictingToken {
                space: space.into(),
                existing: existing.clone(),
                token,
            });
        }

        if !self.shared_tokens && index.by_token.contains_key(&token) {
            return Err(ConsistencyError::TokenCollision {
                space: space.into(),
                token,
            });
        }

        let position = self.entries.len();
        self.entries.push(MappingEntry {
            original: original.to_string(),
            token: token.clone(),
            space: space.into(),
        });
        index.by_original.insert(original.to_string(), position);
        index.by_token.entry(token.clone()).or_insert(position);

        Ok(token)
    }

    /// All mappings in insertion order.
    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read a mapping file (`original_identifier,masked_identifier,column`) into a new map.
    pub fn load<R: io::Read>(reader: R) -> Result<Self, MappingFileError> {
        let mut map = Self::new();
        map.read(reader)?;
        Ok(map)
    }

    pub fn load_path(path: &Path) -> Result<Self, MappingFileError> {
        let mut map = Self::new();
        map.read_path(path)?;
        Ok(map)
    }

    /// Add the mappings of a mapping file, checking each against the ones already present.
    pub fn read<R: io::Read>(&mut self, reader: R) -> Result<(), MappingFileError> {
        let mut reader = csv::Reader::from_reader(reader);

        for (row, entry) in reader.deserialize::<MappingEntry>().enumerate() {
            let entry = entry?;
            self.insert(&entry.space, &entry.original, entry.token)
                .map_err(|source| MappingFileError::Inconsistent {
                    // header is line 1
                    line: row as u64 + 2,
                    source,
                })?;
        }

        Ok(())
    }

    pub fn read_path(&mut self, path: &Path) -> Result<(), MappingFileError> {
        self.read(BufReader::new(File::open(path)?))?;
        tracing::info!(
            message = "Loaded identifier mapping",
            path = %path.display(),
            entries = self.len()
        );
        Ok(())
    }

    /// Write all mappings in insertion order.
    pub fn save<W: io::Write>(&self, writer: W) -> Result<(), MappingFileError> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(writer);
        if self.entries.is_empty() {
            writer.write_record(["original_identifier", "masked_identifier", "column"])?;
        }
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save_path(&self, path: &Path) -> Result<(), MappingFileError> {
        self.save(BufWriter::new(File::create(path)?))?;
        tracing::info!(
            message = "Wrote identifier mapping",
            path = %path.display(),
            entries = self.len()
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PseudonymizeError {
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    #[error("value in `{space}` does not match the masking pattern `{pattern}`")]
    PatternMismatch {
        space: CompactString,
        pattern: String,
    },
}

/// Masks values, keeping every assigned token in an [`IdentifierMap`].
#[derive(Debug)]
pub struct Pseudonymizer {
    policy: MaskPolicy,
    map: IdentifierMap,
    rng: StdRng,
}

impl Pseudonymizer {
    pub fn new(policy: MaskPolicy) -> Self {
        Self::with_map(policy, IdentifierMap::new())
    }

    /// Start from a preloaded map. Values it already contains keep their tokens.
    pub fn with_map(policy: MaskPolicy, mut map: IdentifierMap) -> Self {
        if policy.shares_tokens() {
            map.shared_tokens = true;
        }
        Self {
            policy,
            map,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn policy(&self) -> &MaskPolicy {
        &self.policy
    }

    pub fn map(&self) -> &IdentifierMap {
        &self.map
    }

    pub fn into_map(self) -> IdentifierMap {
        self.map
    }

    pub fn mask(&mut self, space: &str, value: &str) -> Result<Masked, PseudonymizeError> {
        if value.is_empty() {
            return Ok(Masked::NoValue);
        }

        if let Some(token) = self.map.get(space, value) {
            return Ok(Masked::Token(token.clone()));
        }

        let token = self.generate(space, value)?;
        let token = self.map.insert(space, value, token)?;
        Ok(Masked::Token(token))
    }

    fn generate(&mut self, space: &str, value: &str) -> Result<MaskToken, PseudonymizeError> {
        match &self.policy {
            MaskPolicy::ContentDerived { key } => Ok(content_token(value, key.as_ref())),
            MaskPolicy::Random => {
                let mut token = random_token(&mut self.rng);
                while self.map.contains_token(space, &token) {
                    token = random_token(&mut self.rng);
                }
                Ok(token)
            }
            MaskPolicy::Pattern {
                pattern,
                fallback_key,
            } => match pattern.find(value) {
                Some(found) => Ok(MaskToken::from(found.as_str())),
                None if cfg!(feature = "strict") => Err(PseudonymizeError::PatternMismatch {
                    space: space.into(),
                    pattern: pattern.as_str().to_string(),
                }),
                None => {
                    tracing::warn!(
                        message = "Value does not match the masking pattern, using a content-derived token",
                        space,
                        pattern = pattern.as_str()
                    );
                    Ok(content_token(value, fallback_key.as_ref()))
                }
            },
        }
    }
}

/// A [`Pseudonymizer`] behind a mutex, for masking from several threads.
///
/// Which value receives which random token depends on the order in which threads acquire the lock.
#[derive(Debug, Clone)]
pub struct SharedPseudonymizer(Arc<Mutex<Pseudonymizer>>);

impl SharedPseudonymizer {
    pub fn new(pseudonymizer: Pseudonymizer) -> Self {
        Self(Arc::new(Mutex::new(pseudonymizer)))
    }

    pub fn mask(&self, space: &str, value: &str) -> Result<Masked, PseudonymizeError> {
        let mut pseudonymizer = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        pseudonymizer.mask(space, value)
    }

    /// Returns the pseudonymizer if this is the last handle.
    pub fn into_inner(self) -> Option<Pseudonymizer> {
        Arc::into_inner(self.0).map(|mutex| mutex.into_inner().unwrap_or_else(PoisonError::into_inner))
    }
}
