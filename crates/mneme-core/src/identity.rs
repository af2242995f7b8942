//! Identity normalization.
//!
//! Every identity that enters the harvester goes through [`normalize`], so
//! set operations (work set difference, ledger lookups, validator
//! comparisons) see one canonical form: handles without the leading `@`,
//! lowercased; numeric ids unchanged.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// How a batch addresses its targets on the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    /// Screen-name handles (case-insensitive).
    #[default]
    Handles,
    /// Numeric user ids.
    Ids,
}

impl fmt::Display for AddressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handles => write!(f, "handles"),
            Self::Ids => write!(f, "ids"),
        }
    }
}

impl FromStr for AddressMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "handles" | "handle" => Ok(Self::Handles),
            "ids" | "id" => Ok(Self::Ids),
            _ => Err(AppError::ConfigError(format!(
                "Unknown address mode: '{}'. Valid options: handles, ids",
                s
            ))),
        }
    }
}

/// A target identity.
///
/// [`normalize`], [`Identity::parse`] and [`Identity::from_key`] always
/// produce the canonical form: a `Handle` is non-empty, lowercase and free
/// of a leading `@`. The variants are public, so values built by hand may
/// not be canonical; [`Identity::canonicalize`] brings them into form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Identity {
    Handle(String),
    Id(u64),
}

impl Identity {
    /// The addressing mode this identity belongs to.
    pub fn mode(&self) -> AddressMode {
        match self {
            Identity::Handle(_) => AddressMode::Handles,
            Identity::Id(_) => AddressMode::Ids,
        }
    }

    /// Parses textual input in the given addressing mode.
    ///
    /// # Examples
    ///
    /// ```
    /// use mneme_core::identity::{AddressMode, Identity};
    ///
    /// let handle = Identity::parse("@NASA", AddressMode::Handles).unwrap();
    /// assert_eq!(handle, Identity::Handle("nasa".to_string()));
    ///
    /// let id = Identity::parse(" 783214 ", AddressMode::Ids).unwrap();
    /// assert_eq!(id, Identity::Id(783214));
    ///
    /// assert!(Identity::parse("nasa", AddressMode::Ids).is_err());
    /// ```
    pub fn parse(raw: &str, mode: AddressMode) -> Result<Self, AppError> {
        match mode {
            AddressMode::Handles => normalize(raw),
            AddressMode::Ids => raw
                .trim()
                .parse::<u64>()
                .map(Identity::Id)
                .map_err(|_| AppError::InvalidIdentity(raw.to_string())),
        }
    }

    /// Returns the canonical form of this identity.
    ///
    /// # Examples
    ///
    /// ```
    /// use mneme_core::identity::Identity;
    ///
    /// let raw = Identity::Handle(" @NASA".to_string());
    /// assert_eq!(raw.canonicalize().unwrap(), Identity::Handle("nasa".to_string()));
    /// assert!(Identity::Handle("@".to_string()).canonicalize().is_err());
    /// ```
    pub fn canonicalize(self) -> Result<Self, AppError> {
        match self {
            Identity::Handle(name) => normalize(name),
            id => Ok(id),
        }
    }

    /// Stable string key used by ledger backends.
    ///
    /// Handles keep their `@` marker so they can never collide with a
    /// numeric id that happens to be spelled with digits only.
    pub fn to_key(&self) -> String {
        match self {
            Identity::Handle(name) => format!("@{}", name),
            Identity::Id(id) => id.to_string(),
        }
    }

    /// Inverse of [`to_key`](Self::to_key).
    pub fn from_key(key: &str) -> Result<Self, AppError> {
        if key.starts_with('@') {
            normalize(key)
        } else {
            Identity::parse(key, AddressMode::Ids)
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_key()
    }
}

impl TryFrom<String> for Identity {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identity::from_key(&value)
    }
}

/// Unnormalized user input: a handle string or a numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawIdentity {
    Text(String),
    Numeric(u64),
}

impl From<&str> for RawIdentity {
    fn from(value: &str) -> Self {
        RawIdentity::Text(value.to_string())
    }
}

impl From<String> for RawIdentity {
    fn from(value: String) -> Self {
        RawIdentity::Text(value)
    }
}

impl From<u64> for RawIdentity {
    fn from(value: u64) -> Self {
        RawIdentity::Numeric(value)
    }
}

/// Canonicalizes a raw handle or id.
///
/// Strings lose surrounding whitespace and a single leading `@`, and are
/// lowercased. Integers pass through unchanged.
///
/// # Errors
///
/// Returns [`AppError::InvalidIdentity`] if nothing is left of a string
/// after trimming and stripping the marker.
///
/// # Examples
///
/// ```
/// use mneme_core::identity::{normalize, Identity};
///
/// assert_eq!(normalize("@OpenData").unwrap(), Identity::Handle("opendata".to_string()));
/// assert_eq!(normalize(42u64).unwrap(), Identity::Id(42));
/// assert!(normalize("   ").is_err());
/// ```
pub fn normalize(raw: impl Into<RawIdentity>) -> Result<Identity, AppError> {
    match raw.into() {
        RawIdentity::Numeric(id) => Ok(Identity::Id(id)),
        RawIdentity::Text(text) => {
            let trimmed = text.trim();
            let name = trimmed.strip_prefix('@').unwrap_or(trimmed);
            if name.trim().is_empty() {
                return Err(AppError::InvalidIdentity(text));
            }
            Ok(Identity::Handle(name.to_lowercase()))
        }
    }
}

/// A deduplicated, non-empty set of identities sharing one addressing mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityBatch {
    mode: AddressMode,
    identities: BTreeSet<Identity>,
}

impl IdentityBatch {
    /// Builds a batch from already-normalized identities.
    ///
    /// # Errors
    ///
    /// - [`AppError::EmptyBatch`] if `identities` is empty
    /// - [`AppError::MixedAddressMode`] if handles and ids are mixed
    pub fn new(identities: impl IntoIterator<Item = Identity>) -> Result<Self, AppError> {
        let identities: BTreeSet<Identity> = identities.into_iter().collect();
        let mode = check_address_mode(&identities)?;
        Ok(Self { mode, identities })
    }

    pub fn mode(&self) -> AddressMode {
        self.mode
    }

    pub fn identities(&self) -> &BTreeSet<Identity> {
        &self.identities
    }

    pub fn into_identities(self) -> BTreeSet<Identity> {
        self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Normalizes every raw value and builds an [`IdentityBatch`].
///
/// Duplicates that only differ by case or `@` marker collapse into one.
pub fn normalize_batch<I, R>(raws: I) -> Result<IdentityBatch, AppError>
where
    I: IntoIterator<Item = R>,
    R: Into<RawIdentity>,
{
    let identities = raws
        .into_iter()
        .map(normalize)
        .collect::<Result<Vec<_>, _>>()?;
    IdentityBatch::new(identities)
}

/// Returns the single addressing mode shared by `identities`.
pub(crate) fn check_address_mode<'a>(
    identities: impl IntoIterator<Item = &'a Identity>,
) -> Result<AddressMode, AppError> {
    let mut mode = None;
    for identity in identities {
        match mode {
            None => mode = Some(identity.mode()),
            Some(m) if m != identity.mode() => return Err(AppError::MixedAddressMode),
            Some(_) => {}
        }
    }
    mode.ok_or(AppError::EmptyBatch)
}
