use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, AppResult};

/// Policy half of a GPO that a preference is registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpoScope {
    Machine,
    User,
}

impl GpoScope {
    /// Parse scope from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "machine" | "computer" => Some(GpoScope::Machine),
            "user" => Some(GpoScope::User),
            _ => None,
        }
    }

    /// Directory attribute holding the extension list for this scope
    pub fn extension_attribute(&self) -> &'static str {
        match self {
            GpoScope::Machine => "gPCMachineExtensionNames",
            GpoScope::User => "gPCUserExtensionNames",
        }
    }

    /// Folder under the GPO root on the share
    pub fn folder(&self) -> &'static str {
        match self {
            GpoScope::Machine => "Machine",
            GpoScope::User => "User",
        }
    }

    /// Amount the policy version advances by.
    ///
    /// The machine counter lives in the low 16 bits, the user counter in the high 16 bits.
    pub fn version_increment(&self) -> u32 {
        match self {
            GpoScope::Machine => 1,
            GpoScope::User => 65536,
        }
    }
}

impl fmt::Display for GpoScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

/// GUID naming a GPO, stored without braces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpoId(String);

impl GpoId {
    /// Accepts `31B2F340-016D-11D2-945F-00C04FB984F9` with or without braces.
    pub fn parse(s: &str) -> AppResult<Self> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .unwrap_or(trimmed);

        if !is_hyphenated_guid(inner) {
            return Err(AppError::InvalidArgument(format!(
                "GPO id '{}' is not a GUID",
                s
            )));
        }

        Ok(Self(inner.to_string()))
    }

    /// Braced form used in share paths and distinguished names
    pub fn braced(&self) -> String {
        format!("{{{}}}", self.0)
    }
}

impl fmt::Display for GpoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// True for the 8-4-4-4-12 hex form, braces excluded
pub fn is_hyphenated_guid(s: &str) -> bool {
    s.len() == 36 && uuid::Uuid::try_parse(s).is_ok()
}

/// Engine settings that are not part of a single request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Share hosting the policy folders
    pub share_name: String,
    /// Replicated version file inside the GPO folder
    pub version_file: String,
    /// Age given to new entries when no timestamp is supplied
    pub backdate_days: i64,
    /// Domain controller used in the directory URL
    pub directory_server: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            share_name: "SYSVOL".to_string(),
            version_file: "gpt.ini".to_string(),
            backdate_days: 30,
            directory_server: None,
        }
    }
}

/// Convert a DNS domain name to its DN (`contoso.com` -> `DC=contoso,DC=com`)
pub fn domain_to_dn(domain: &str) -> String {
    domain
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| format!("DC={}", s))
        .collect::<Vec<_>>()
        .join(",")
}

/// DN of the groupPolicyContainer object for a GPO
pub fn gpo_dn(gpo_id: &GpoId, domain: &str) -> String {
    format!(
        "CN={},CN=Policies,CN=System,{}",
        gpo_id.braced(),
        domain_to_dn(domain)
    )
}

/// ADSI path of the GPO object, optionally pinned to a server
pub fn gpo_ldap_url(gpo_id: &GpoId, domain: &str, server: Option<&str>) -> String {
    match server {
        Some(server) => format!("LDAP://{}/{}", server, gpo_dn(gpo_id, domain)),
        None => format!("LDAP://{}", gpo_dn(gpo_id, domain)),
    }
}

/// Share-relative folder of the GPO (`contoso.com/Policies/{GUID}`)
pub fn gpo_share_path(gpo_id: &GpoId, domain: &str) -> String {
    format!("{}/Policies/{}", domain, gpo_id.braced())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_DOMAIN_POLICY: &str = "31B2F340-016D-11D2-945F-00C04FB984F9";

    #[test]
    fn test_scope_parse() {
        assert_eq!(GpoScope::parse("Machine"), Some(GpoScope::Machine));
        assert_eq!(GpoScope::parse("user"), Some(GpoScope::User));
        assert_eq!(GpoScope::parse("domain"), None);
    }

    #[test]
    fn test_scope_attributes() {
        assert_eq!(GpoScope::Machine.extension_attribute(), "gPCMachineExtensionNames");
        assert_eq!(GpoScope::User.extension_attribute(), "gPCUserExtensionNames");
        assert_eq!(GpoScope::User.version_increment(), 65536);
    }

    #[test]
    fn test_gpo_id_accepts_braces() {
        let bare = GpoId::parse(DEFAULT_DOMAIN_POLICY).unwrap();
        let braced = GpoId::parse(&format!("{{{}}}", DEFAULT_DOMAIN_POLICY)).unwrap();
        assert_eq!(bare, braced);
        assert_eq!(bare.braced(), format!("{{{}}}", DEFAULT_DOMAIN_POLICY));
    }

    #[test]
    fn test_gpo_id_rejects_garbage() {
        assert!(GpoId::parse("not-a-guid").is_err());
        assert!(GpoId::parse("31B2F340016D11D2945F00C04FB984F9").is_err());
    }

    #[test]
    fn test_gpo_paths() {
        let id = GpoId::parse(DEFAULT_DOMAIN_POLICY).unwrap();
        assert_eq!(domain_to_dn("contoso.com"), "DC=contoso,DC=com");
        assert_eq!(
            gpo_dn(&id, "contoso.com"),
            "CN={31B2F340-016D-11D2-945F-00C04FB984F9},CN=Policies,CN=System,DC=contoso,DC=com"
        );
        assert_eq!(
            gpo_ldap_url(&id, "contoso.com", Some("dc01")),
            "LDAP://dc01/CN={31B2F340-016D-11D2-945F-00C04FB984F9},CN=Policies,CN=System,DC=contoso,DC=com"
        );
        assert_eq!(
            gpo_share_path(&id, "contoso.com"),
            "contoso.com/Policies/{31B2F340-016D-11D2-945F-00C04FB984F9}"
        );
    }
}
