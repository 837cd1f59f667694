//! The `ImageReference` value type.

use std::fmt;
use std::str::FromStr;

use crate::ReferenceError;

/// Tag assumed when a reference names neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LEN: usize = 128;
const MIN_DIGEST_HEX_LEN: usize = 32;

/// The version part of a reference: either a mutable tag or a content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// A tag such as `7` or `latest`.
    Tag(String),
    /// A content digest such as `sha256:...`.
    Digest(String),
}

impl Version {
    /// Returns the raw tag or digest string.
    pub fn as_str(&self) -> &str {
        match self {
            Version::Tag(tag) => tag,
            Version::Digest(digest) => digest,
        }
    }

    /// Returns true if this version is a content digest.
    pub fn is_digest(&self) -> bool {
        matches!(self, Version::Digest(_))
    }
}

/// A normalized, validated container image reference.
///
/// Two references are equal iff their canonical strings are equal, which
/// makes the type usable as a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    repository: String,
    version: Version,
}

impl ImageReference {
    /// Parse a `repository[:tag][@digest]` string.
    ///
    /// When both a tag and a digest are present the digest wins and the tag
    /// is dropped, since the digest pins the content.
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        if reference.is_empty() {
            return Err(ReferenceError::Empty);
        }
        if reference.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ReferenceError::Whitespace(reference.to_string()));
        }

        let (name_part, version) = if let Some((name, digest)) = reference.split_once('@') {
            let name = match split_tag(name) {
                Some((repo, tag)) => {
                    validate_tag(tag)?;
                    repo
                }
                None => name,
            };
            validate_digest(digest)?;
            (name, Version::Digest(digest.to_string()))
        } else if let Some((name, tag)) = split_tag(reference) {
            validate_tag(tag)?;
            (name, Version::Tag(tag.to_string()))
        } else {
            (reference, Version::Tag(DEFAULT_TAG.to_string()))
        };

        validate_repository(reference, name_part)?;

        Ok(Self {
            repository: name_part.to_string(),
            version,
        })
    }

    /// Build a reference from an explicit repository and tag.
    ///
    /// A tag that looks like a digest (`algo:hex`) is accepted as a digest.
    pub fn from_parts(repository: &str, tag: &str) -> Result<Self, ReferenceError> {
        if repository.is_empty() {
            return Err(ReferenceError::Empty);
        }
        let version = if tag.contains(':') {
            validate_digest(tag)?;
            Version::Digest(tag.to_string())
        } else {
            validate_tag(tag)?;
            Version::Tag(tag.to_string())
        };
        validate_repository(repository, repository)?;

        Ok(Self {
            repository: repository.to_string(),
            version,
        })
    }

    /// The repository without any tag or digest, e.g. `library/redis`.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Alias of [`repository`](Self::repository) used when talking to a pull API.
    pub fn unversioned(&self) -> &str {
        &self.repository
    }

    /// The version component.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The tag or digest string, e.g. `7` or `sha256:...`.
    pub fn version_part(&self) -> &str {
        self.version.as_str()
    }

    /// The registry host, if the repository names one.
    pub fn registry(&self) -> Option<&str> {
        let (first, _) = self.repository.split_once('/')?;
        looks_like_registry(first).then_some(first)
    }

    /// The canonical string form.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Version::Tag(tag) => write!(f, "{}:{}", self.repository, tag),
            Version::Digest(digest) => write!(f, "{}@{}", self.repository, digest),
        }
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageReference {
    type Error = ReferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for ImageReference {
    type Error = ReferenceError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl serde::Serialize for ImageReference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ImageReference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Split off a trailing `:tag`, ignoring a `:port` in the registry host.
fn split_tag(name: &str) -> Option<(&str, &str)> {
    let (repo, tag) = name.rsplit_once(':')?;
    if tag.contains('/') {
        // It's a port, not a tag
        None
    } else {
        Some((repo, tag))
    }
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn validate_tag(tag: &str) -> Result<(), ReferenceError> {
    let mut chars = tag.chars();
    let valid_first = chars
        .next()
        .map(|c| c.is_ascii_alphanumeric() || c == '_')
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if valid_first && valid_rest && tag.len() <= MAX_TAG_LEN {
        Ok(())
    } else {
        Err(ReferenceError::InvalidTag(tag.to_string()))
    }
}

fn validate_digest(digest: &str) -> Result<(), ReferenceError> {
    let invalid = || ReferenceError::InvalidDigest(digest.to_string());

    let (algorithm, hex) = digest.split_once(':').ok_or_else(invalid)?;
    if algorithm.is_empty()
        || !algorithm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '_' | '-'))
    {
        return Err(invalid());
    }
    if hex.len() < MIN_DIGEST_HEX_LEN || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    Ok(())
}

fn validate_repository(reference: &str, repository: &str) -> Result<(), ReferenceError> {
    let repo_err = |reason: &str| ReferenceError::InvalidRepository {
        reference: reference.to_string(),
        reason: reason.to_string(),
    };

    let mut components: Vec<&str> = repository.split('/').collect();
    if components.len() > 1 && looks_like_registry(components[0]) {
        validate_registry(reference, components[0])?;
        components.remove(0);
    }

    if components.is_empty() {
        return Err(repo_err("missing repository name"));
    }

    for component in components {
        if component.is_empty() {
            return Err(repo_err("empty path component"));
        }
        if !component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        {
            return Err(repo_err(&format!(
                "'{component}' must contain only lowercase letters, digits, '.', '_' or '-'"
            )));
        }
        let starts_ok = component.starts_with(|c: char| c.is_ascii_alphanumeric());
        let ends_ok = component.ends_with(|c: char| c.is_ascii_alphanumeric());
        if !starts_ok || !ends_ok {
            return Err(repo_err(&format!(
                "'{component}' must start and end with a letter or digit"
            )));
        }
    }

    Ok(())
}

fn validate_registry(reference: &str, registry: &str) -> Result<(), ReferenceError> {
    let registry_err = |reason: &str| ReferenceError::InvalidRegistry {
        reference: reference.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = match registry.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (registry, None),
    };

    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'))
    {
        return Err(registry_err("host must contain only letters, digits, '.' or '-'"));
    }
    if let Some(port) = port {
        if port.parse::<u16>().is_err() {
            return Err(registry_err("port must be a number between 0 and 65535"));
        }
    }
    Ok(())
}
