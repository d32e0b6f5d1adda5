/*******************************************************************************
*   (c) 2020 ZondaX GmbH
*
*  Licensed under the Apache License, Version 2.0 (the "License");
*  you may not use this file except in compliance with the License.
*  You may obtain a copy of the License at
*
*      http://www.apache.org/licenses/LICENSE-2.0
*
*  Unless required by applicable law or agreed to in writing, software
*  distributed under the License is distributed on an "AS IS" BASIS,
*  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
*  See the License for the specific language governing permissions and
*  limitations under the License.
********************************************************************************/
//! BIP44 derivation paths
//!
//! A path reads `m / purpose' / coin_type' / account' / change / address_index`.
//! The leading `m/` is optional, the purpose must be `44` and only the first
//! three levels may carry the hardening marker `'`.

use std::fmt;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};

use crate::params::{BIP44_HARDENED, BIP44_PURPOSE, MAX_PATH_ELEMENTS};

/// Number of levels of a BIP44 path
const BIP44_LEVELS: usize = 5;

/// Levels that accept the hardening marker (purpose, coin type, account)
const HARDENABLE_LEVELS: usize = 3;

const HARDENING_MARKER: char = '\'';

/// Why a derivation path was rejected
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PathViolation {
    /// Nothing to parse
    #[error("path is empty")]
    Empty,

    /// Wrong number of levels
    #[error("expected 5 levels, found {found}")]
    SegmentCount {
        /// Number of levels found
        found: usize,
    },

    /// The purpose level is not 44
    #[error("purpose must be 44, found '{found}'")]
    Purpose {
        /// Purpose level as written
        found: String,
    },

    /// A level is not a decimal number
    #[error("level {level} is not a decimal number")]
    NotNumeric {
        /// Zero based level
        level: usize,
    },

    /// A change or address index level carries the hardening marker
    #[error("level {level} cannot be hardened")]
    UnexpectedHardening {
        /// Zero based level
        level: usize,
    },

    /// A level does not fit below the hardening bit
    #[error("level {level} is not below 0x8000_0000")]
    Overflow {
        /// Zero based level
        level: usize,
    },

    /// Element count outside of what the device accepts
    #[error("{count} elements, expected 1 to 10")]
    Length {
        /// Number of elements
        count: usize,
    },
}

/// Invalid derivation path
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Bip44 Path '{path}' is invalid: {reason}")]
pub struct Bip44PathError {
    /// Path as given by the caller
    pub path: String,
    /// What is wrong with it
    pub reason: PathViolation,
}

impl Bip44PathError {
    fn new(path: impl Into<String>, reason: PathViolation) -> Self {
        Bip44PathError {
            path: path.into(),
            reason,
        }
    }
}

/// A validated derivation path
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DerivationPath {
    elements: Vec<u32>,
}

/// One validated level of a path string
struct Level {
    index: u32,
    hardened: bool,
}

impl Level {
    fn element(&self) -> u32 {
        if self.hardened {
            self.index | BIP44_HARDENED
        } else {
            self.index
        }
    }
}

fn tokenize(path: &str) -> Result<Vec<Level>, PathViolation> {
    if path.is_empty() {
        return Err(PathViolation::Empty);
    }

    let body = path.strip_prefix("m/").unwrap_or(path);
    let segments: Vec<&str> = body.split('/').collect();
    if segments.len() != BIP44_LEVELS {
        return Err(PathViolation::SegmentCount {
            found: segments.len(),
        });
    }

    segments
        .iter()
        .enumerate()
        .map(|(level, segment)| tokenize_level(level, segment))
        .collect()
}

fn tokenize_level(level: usize, segment: &str) -> Result<Level, PathViolation> {
    let (digits, hardened) = match segment.strip_suffix(HARDENING_MARKER) {
        Some(digits) => (digits, true),
        None => (segment, false),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PathViolation::NotNumeric { level });
    }

    if hardened && level >= HARDENABLE_LEVELS {
        return Err(PathViolation::UnexpectedHardening { level });
    }

    let index = match digits.parse::<u32>() {
        Ok(index) if index < BIP44_HARDENED => index,
        _ => return Err(PathViolation::Overflow { level }),
    };

    // leading zeros are not a valid purpose
    if level == 0 && (index != BIP44_PURPOSE || digits.starts_with('0')) {
        return Err(PathViolation::Purpose {
            found: segment.to_owned(),
        });
    }

    Ok(Level { index, hardened })
}

impl DerivationPath {
    /// Parses a path such as `44'/111'/0'/0/0` or `m/44'/111'/0'/0/0`
    ///
    /// The whole string is validated before any element is produced.
    pub fn parse(path: &str) -> Result<Self, Bip44PathError> {
        let levels = tokenize(path).map_err(|reason| Bip44PathError::new(path, reason))?;

        Ok(DerivationPath {
            elements: levels.iter().map(Level::element).collect(),
        })
    }

    /// Builds a path from raw elements, hardened ones already carrying the top bit
    pub fn from_elements(elements: &[u32]) -> Result<Self, Bip44PathError> {
        if elements.is_empty() || elements.len() > MAX_PATH_ELEMENTS {
            let path = DerivationPath {
                elements: elements.to_vec(),
            };
            return Err(Bip44PathError::new(
                path.to_string(),
                PathViolation::Length {
                    count: elements.len(),
                },
            ));
        }

        Ok(DerivationPath {
            elements: elements.to_vec(),
        })
    }

    /// Path elements in path order
    pub fn elements(&self) -> &[u32] {
        &self.elements
    }

    /// Length of the serialized path
    pub fn serialized_len(&self) -> usize {
        1 + self.elements.len() * 4
    }

    /// Serializes as `[count][element big endian]...`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.serialized_len()];
        // construction caps the count at MAX_PATH_ELEMENTS
        bytes[0] = self.elements.len() as u8;
        for (slot, element) in bytes[1..].chunks_exact_mut(4).zip(&self.elements) {
            BigEndian::write_u32(slot, *element);
        }
        bytes
    }
}

impl FromStr for DerivationPath {
    type Err = Bip44PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DerivationPath::parse(s)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for element in &self.elements {
            if element & BIP44_HARDENED != 0 {
                write!(f, "/{}'", element & !BIP44_HARDENED)?;
            } else {
                write!(f, "/{}", element)?;
            }
        }
        Ok(())
    }
}
