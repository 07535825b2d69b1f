//! Extension name list handling
//!
//! `gPCMachineExtensionNames` / `gPCUserExtensionNames` hold a run of
//! bracketed groups, each a run of braced GUIDs:
//!
//! ```text
//! [{00000000-0000-0000-0000-000000000000}{EXT1}{EXT2}][{CSE1}{EXT1}][{CSE2}{EXT2}]
//! ```
//!
//! The first GUID of a group is the client-side extension, the rest are the
//! editor extensions registered for it. The group headed by the null GUID
//! collects every editor extension in use.

use std::fmt;

use super::gpo::is_hyphenated_guid;
use super::preference::NULL_GUID;
use crate::error::{AppError, AppResult};

/// One bracketed group of braced GUIDs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionGroup {
    guids: Vec<String>,
}

impl ExtensionGroup {
    pub fn new(guids: Vec<String>) -> Self {
        Self { guids }
    }

    pub fn guids(&self) -> &[String] {
        &self.guids
    }

    fn is_null_group(&self) -> bool {
        self.guids.first().map(String::as_str) == Some(NULL_GUID)
    }

    /// Whether this group is exactly the `cse` + `extension` pair
    fn is_assignment(&self, cse: &str, extension: &str) -> bool {
        self.guids.len() == 2
            && self.guids[0].eq_ignore_ascii_case(cse)
            && self.guids[1].eq_ignore_ascii_case(extension)
    }

    /// Add an editor extension to the null group, keeping members sorted
    fn add_member(&mut self, extension: &str) {
        let mut members: Vec<String> = self.guids.drain(1..).collect();
        if !members.iter().any(|m| m.eq_ignore_ascii_case(extension)) {
            members.push(extension.to_string());
        }
        members.sort();
        self.guids.extend(members);
    }
}

impl fmt::Display for ExtensionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for guid in &self.guids {
            f.write_str(guid)?;
        }
        Ok(())
    }
}

/// Parsed extension name attribute
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtensionNames {
    groups: Vec<ExtensionGroup>,
}

impl ExtensionNames {
    /// Tokenize an attribute value into groups.
    ///
    /// Rejects unbalanced brackets, text outside brackets and anything inside
    /// a group that is not a braced GUID.
    pub fn parse(value: &str) -> AppResult<Self> {
        let invalid = AppError::InvalidExtensionNames;
        let mut groups = Vec::new();
        let mut chars = value.char_indices();

        while let Some((pos, c)) = chars.next() {
            match c {
                '[' => {}
                c if c.is_whitespace() => continue,
                other => {
                    return Err(invalid(format!(
                        "unexpected '{}' at offset {}, expected '['",
                        other, pos
                    )))
                }
            }

            let mut guids = Vec::new();
            loop {
                match chars.next() {
                    Some((_, ']')) => break,
                    Some((start, '{')) => {
                        let mut end = None;
                        for (i, c) in chars.by_ref() {
                            if c == '}' {
                                end = Some(i);
                                break;
                            }
                            if c == '{' || c == '[' || c == ']' {
                                return Err(invalid(format!(
                                    "unterminated GUID starting at offset {}",
                                    start
                                )));
                            }
                        }
                        let end = end.ok_or_else(|| {
                            invalid(format!("unterminated GUID starting at offset {}", start))
                        })?;
                        let inner = &value[start + 1..end];
                        if !is_hyphenated_guid(inner) {
                            return Err(invalid(format!(
                                "'{{{}}}' at offset {} is not a GUID",
                                inner, start
                            )));
                        }
                        guids.push(value[start..=end].to_string());
                    }
                    Some((i, other)) => {
                        return Err(invalid(format!(
                            "unexpected '{}' at offset {} inside group",
                            other, i
                        )))
                    }
                    None => {
                        return Err(invalid(format!(
                            "group starting at offset {} is not closed",
                            pos
                        )))
                    }
                }
            }

            if guids.is_empty() {
                return Err(invalid(format!("empty group at offset {}", pos)));
            }
            groups.push(ExtensionGroup::new(guids));
        }

        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[ExtensionGroup] {
        &self.groups
    }

    pub fn contains_assignment(&self, cse: &str, extension: &str) -> bool {
        self.groups.iter().any(|g| g.is_assignment(cse, extension))
    }

    /// Register `cse` + `extension`, updating the null group, then sort the groups.
    pub fn register(&mut self, cse: &str, extension: &str) {
        if self.contains_assignment(cse, extension) {
            return;
        }

        self.groups.push(ExtensionGroup::new(vec![
            cse.to_string(),
            extension.to_string(),
        ]));

        match self.groups.iter_mut().find(|g| g.is_null_group()) {
            Some(null_group) => null_group.add_member(extension),
            None => self.groups.push(ExtensionGroup::new(vec![
                NULL_GUID.to_string(),
                extension.to_string(),
            ])),
        }

        self.groups.sort_by_cached_key(|g| g.to_string());
    }
}

impl fmt::Display for ExtensionNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for group in &self.groups {
            write!(f, "[{}]", group)?;
        }
        Ok(())
    }
}

/// True when the directory holds no extension list yet (absent, empty or a single space)
pub fn is_unset(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Merge a CSE registration into an extension name attribute value.
///
/// Returns the value unchanged when the pair already appears in it; the
/// value is only tokenized when it actually has to change.
pub fn merge_extension_names(
    existing: Option<&str>,
    cse_guid: &str,
    extension_guid: &str,
) -> AppResult<String> {
    let existing = match existing {
        Some(value) if !is_unset(Some(value)) => value,
        _ => {
            return Ok(format!(
                "[{}{}][{}{}]",
                NULL_GUID, extension_guid, cse_guid, extension_guid
            ))
        }
    };

    let assignment = format!("{}{}", cse_guid, extension_guid).to_ascii_lowercase();
    if existing.to_ascii_lowercase().contains(&assignment) {
        return Ok(existing.to_string());
    }

    let mut names = ExtensionNames::parse(existing)?;
    names.register(cse_guid, extension_guid);
    Ok(names.to_string())
}
