use serde::{Deserialize, Serialize};

// ============================================================================
// Roles
// ============================================================================

/// Combat role attributed to a character or a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Tank,
    Healing,
    Dps,
}

impl Role {
    /// Parse the upstream / stored role tag. Unrecognized values map to DPS.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "TANK" => Role::Tank,
            "HEALING" | "HEALER" | "HEAL" => Role::Healing,
            _ => Role::Dps,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Tank => "TANK",
            Role::Healing => "HEALING",
            Role::Dps => "DPS",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Characters
// ============================================================================

/// Identity of a tracked character: (name, realm, region).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterIdentity {
    pub name: String,
    pub realm: String,
    pub region: String,
}

impl CharacterIdentity {
    pub fn new(name: impl Into<String>, realm: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            realm: realm.into(),
            region: region.into(),
        }
    }

    /// Realm as a lower-case slug ("Twisting Nether" -> "twisting-nether").
    pub fn realm_slug(&self) -> String {
        normalize_realm(&self.realm)
    }

    pub fn region_code(&self) -> String {
        self.region.trim().to_ascii_lowercase()
    }
}

impl std::fmt::Display for CharacterIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.realm_slug(), self.region_code())
    }
}

pub fn normalize_realm(realm: &str) -> String {
    realm
        .trim()
        .to_lowercase()
        .replace('\'', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Latest profile fields, always overwritten on upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub class_name: Option<String>,
    pub active_spec_name: Option<String>,
    pub active_spec_role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub id: i64,
    pub name: String,
    pub realm: String,
    pub region: String,
    pub class_name: Option<String>,
    pub active_spec_name: Option<String>,
    pub active_spec_role: Option<Role>,
    pub created_at: i64,
    pub updated_at: i64,
}
