//! Role-based access control
//!
//! Maps a requesting role to the set of access tags it may read. The mapping
//! comes from configuration and is validated once at startup: every role
//! resolves to a non-empty set, and an unrecognised role is an error rather
//! than a fallback to some default set.

use crate::config::AccessConfig;
use crate::errors::{AppError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Normalized form used for comparisons; display keeps the configured spelling
fn normalize(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Classification label on a document and its chunks
#[derive(Debug, Clone)]
pub struct AccessTag {
    display: String,
    key: String,
}

impl AccessTag {
    pub fn new(value: impl AsRef<str>) -> Self {
        let display = value.as_ref().trim().to_string();
        let key = normalize(&display);
        Self { display, key }
    }

    pub fn as_str(&self) -> &str {
        &self.display
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

impl PartialEq for AccessTag {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for AccessTag {}

impl PartialOrd for AccessTag {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AccessTag {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl std::hash::Hash for AccessTag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for AccessTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl Serialize for AccessTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.display)
    }
}

impl<'de> Deserialize<'de> for AccessTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(AccessTag::new)
    }
}

/// Role attached to a query or an upload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Role(String);

impl Role {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn key(&self) -> String {
        normalize(&self.0)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set of tags a role may read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedTags(BTreeSet<AccessTag>);

impl AllowedTags {
    pub fn new(tags: impl IntoIterator<Item = AccessTag>) -> Self {
        Self(tags.into_iter().collect())
    }

    pub fn contains(&self, tag: &AccessTag) -> bool {
        self.0.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccessTag> {
        self.0.iter()
    }
}

/// Validated role to tag mapping
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    grants: HashMap<String, AllowedTags>,
}

impl AccessPolicy {
    /// Build and validate the policy from configuration
    pub fn from_config(config: &AccessConfig) -> Result<Self> {
        if config.roles.is_empty() {
            return Err(AppError::Configuration {
                message: "access policy defines no roles".to_string(),
            });
        }

        let mut grants = HashMap::with_capacity(config.roles.len());
        for grant in &config.roles {
            let role = Role::new(&grant.role);
            if role.key().is_empty() {
                return Err(AppError::Configuration {
                    message: "access policy contains an empty role name".to_string(),
                });
            }

            let tags = AllowedTags::new(
                grant
                    .tags
                    .iter()
                    .map(AccessTag::new)
                    .filter(|tag| !tag.is_empty()),
            );
            if tags.is_empty() {
                return Err(AppError::Configuration {
                    message: format!("role '{}' grants no access tags", role),
                });
            }

            if grants.insert(role.key(), tags).is_some() {
                return Err(AppError::Configuration {
                    message: format!("role '{}' is defined more than once", role),
                });
            }
        }

        Ok(Self { grants })
    }

    /// Resolve the tags a role may read
    pub fn allowed_tags(&self, role: &Role) -> Result<AllowedTags> {
        self.grants
            .get(&role.key())
            .cloned()
            .ok_or_else(|| AppError::UnknownRole {
                role: role.to_string(),
            })
    }

    /// Whether the role exists in the policy
    pub fn is_known_role(&self, role: &Role) -> bool {
        self.grants.contains_key(&role.key())
    }

    /// Whether any role can read this tag
    pub fn is_known_tag(&self, tag: &AccessTag) -> bool {
        self.grants.values().any(|tags| tags.contains(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoleGrant;

    fn policy() -> AccessPolicy {
        AccessPolicy::from_config(&AccessConfig::default()).unwrap()
    }

    #[test]
    fn test_default_policy_resolves_every_role() {
        let policy = policy();
        for role in ["Employee", "HR", "Admin"] {
            let tags = policy.allowed_tags(&Role::new(role)).unwrap();
            assert!(!tags.is_empty());
        }
    }

    #[test]
    fn test_employee_cannot_read_hr() {
        let tags = policy().allowed_tags(&Role::new("Employee")).unwrap();
        assert!(tags.contains(&AccessTag::new("Employee")));
        assert!(!tags.contains(&AccessTag::new("HR")));
        assert!(!tags.contains(&AccessTag::new("Admin")));
    }

    #[test]
    fn test_unknown_role_is_an_error() {
        let err = policy().allowed_tags(&Role::new("Guest")).unwrap_err();
        assert!(matches!(err, AppError::UnknownRole { ref role } if role == "Guest"));
    }

    #[test]
    fn test_matching_ignores_case_and_padding() {
        let policy = policy();
        let tags = policy.allowed_tags(&Role::new("  hr ")).unwrap();
        assert!(tags.contains(&AccessTag::new("hr")));
        assert_eq!(AccessTag::new(" HR ").as_str(), "HR");
    }

    #[test]
    fn test_role_without_tags_is_rejected() {
        let config = AccessConfig {
            roles: vec![RoleGrant {
                role: "Contractor".into(),
                tags: vec!["   ".into()],
            }],
        };
        assert!(matches!(
            AccessPolicy::from_config(&config),
            Err(AppError::Configuration { .. })
        ));
    }

    #[test]
    fn test_duplicate_role_is_rejected() {
        let config = AccessConfig {
            roles: vec![
                RoleGrant { role: "HR".into(), tags: vec!["HR".into()] },
                RoleGrant { role: "hr".into(), tags: vec!["Employee".into()] },
            ],
        };
        assert!(AccessPolicy::from_config(&config).is_err());
    }

    #[test]
    fn test_known_tags() {
        let policy = policy();
        assert!(policy.is_known_tag(&AccessTag::new("admin")));
        assert!(!policy.is_known_tag(&AccessTag::new("Finance")));
        assert!(policy.is_known_role(&Role::new("ADMIN")));
    }
}
