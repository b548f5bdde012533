use serde::{Deserialize, Serialize};

/// One repository object as it travels through the queue: a UUID plus a
/// type tag ("items", "themes", ...). This is also the wire format of a
/// queue member, serialized as `{"uuid": "...", "type": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Entity {
    pub(crate) uuid: String,
    #[serde(rename = "type")]
    pub(crate) entity_type: String,
}

impl Entity {
    pub(crate) fn new(uuid: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            entity_type: entity_type.into(),
        }
    }

    /// Directory-safe form of the uuid: everything outside
    /// `[0-9A-Za-z._-]` becomes an underscore. Non-ASCII is not
    /// transliterated (`é` maps to `_`, not `e`); identifiers are
    /// expected to be plain ASCII uuids.
    pub(crate) fn sanitized_uuid(&self) -> String {
        self.uuid
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// An entity is usable only if the sanitized uuid is non-empty (all
    /// workspace and archive paths derive from it) and the type tag is set.
    pub(crate) fn is_valid(&self) -> bool {
        !self.entity_type.trim().is_empty()
            && self
                .sanitized_uuid()
                .chars()
                .any(|c| c.is_ascii_alphanumeric())
    }

    pub(crate) fn to_member(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub(crate) fn from_member(member: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(member)
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.uuid, self.entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_round_trip() {
        let entity = Entity::new("6841cece-41f1-4edf-ab9a-59459a127c77", "items");
        let member = entity.to_member().unwrap();
        assert!(member.contains("\"uuid\""));
        assert!(member.contains("\"type\":\"items\""));
        assert_eq!(Entity::from_member(&member).unwrap(), entity);
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        let entity = Entity::new("ab/cd:e f", "items");
        assert_eq!(entity.sanitized_uuid(), "ab_cd_e_f");
        // Accented characters collapse to underscores, no transliteration.
        assert_eq!(Entity::new("caf\u{e9}", "items").sanitized_uuid(), "caf_");
    }

    #[test]
    fn validity() {
        assert!(Entity::new("6841cece", "items").is_valid());
        assert!(!Entity::new("///", "items").is_valid());
        assert!(!Entity::new("", "items").is_valid());
        assert!(!Entity::new("6841cece", "  ").is_valid());
    }
}
