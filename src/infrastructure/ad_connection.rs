//! Active Directory access using Windows ADSI
//!
//! Binds to a single GPO object (`LDAP://[server/]CN={GUID},CN=Policies,...`)
//! with the current Windows user's credentials or explicit ones, and reads
//! and writes its attributes.

use super::session::DirectorySession;
use crate::domain::VERSION_ATTRIBUTE;
use crate::error::{AppError, AppResult};

#[cfg(windows)]
use windows::{
    core::{Interface, BSTR, PCWSTR, VARIANT},
    Win32::Foundation::E_ACCESSDENIED,
    Win32::Networking::ActiveDirectory::*,
    Win32::System::Com::*,
    Win32::System::Variant::*,
};

/// Whether an attribute is stored as a 32-bit integer rather than a string
#[cfg_attr(not(windows), allow(dead_code))]
fn is_integer_attribute(name: &str) -> bool {
    name.eq_ignore_ascii_case(VERSION_ATTRIBUTE)
}

/// ADSI-backed directory session
pub struct AdsiDirectory {
    username: Option<String>,
    password: Option<String>,
    use_ssl: bool,
    #[cfg(windows)]
    object: Option<IADs>,
    #[cfg(windows)]
    com_initialized: bool,
}

impl AdsiDirectory {
    /// Without a username the current Windows credentials are used.
    pub fn new(username: Option<String>, password: Option<String>, use_ssl: bool) -> Self {
        Self {
            username,
            password,
            use_ssl,
            #[cfg(windows)]
            object: None,
            #[cfg(windows)]
            com_initialized: false,
        }
    }

    #[cfg(windows)]
    fn bound_object(&self) -> AppResult<&IADs> {
        self.object
            .as_ref()
            .ok_or_else(|| AppError::ConnectionFailed("not bound to a directory object".to_string()))
    }

    /// Read an attribute from the server, bypassing the property cache
    #[cfg(windows)]
    fn read_attribute(&self, name: &str) -> AppResult<Option<String>> {
        let obj = self.bound_object()?;
        unsafe {
            obj.GetInfo()
                .map_err(|e| AppError::DirectoryError(format!("Failed to refresh object: {}", e)))?;

            let prop_name = BSTR::from(name);
            match obj.Get(&prop_name) {
                Ok(value) => variant_to_string(&value).map(Some),
                Err(e) if e.code() == E_ADS_PROPERTY_NOT_FOUND => Ok(None),
                Err(e) => Err(AppError::DirectoryError(format!(
                    "Failed to get {}: {}",
                    name, e
                ))),
            }
        }
    }
}

#[cfg(windows)]
impl DirectorySession for AdsiDirectory {
    fn connect(&mut self, url: &str) -> bool {
        unsafe {
            if !self.com_initialized {
                if let Err(e) = CoInitializeEx(None, COINIT_APARTMENTTHREADED).ok() {
                    tracing::error!(error = %e, "COM initialization failed");
                    return false;
                }
                self.com_initialized = true;
            }

            let path_bstr = BSTR::from(url);
            let user_bstr = self.username.as_deref().map(BSTR::from);
            let password_bstr = self.password.as_deref().map(BSTR::from);

            let mut flags = ADS_SECURE_AUTHENTICATION.0;
            if self.use_ssl {
                flags |= ADS_USE_SSL.0;
            }

            let mut obj: Option<IADs> = None;
            let result = ADsOpenObject(
                PCWSTR(path_bstr.as_ptr()),
                user_bstr
                    .as_ref()
                    .map_or(PCWSTR::null(), |b| PCWSTR(b.as_ptr())),
                password_bstr
                    .as_ref()
                    .map_or(PCWSTR::null(), |b| PCWSTR(b.as_ptr())),
                ADS_AUTHENTICATION_ENUM(flags),
                &IADs::IID,
                &mut obj as *mut _ as *mut *mut std::ffi::c_void,
            );

            match (result, obj) {
                (Ok(()), Some(obj)) => {
                    tracing::debug!(url = url, "Bound to directory object");
                    self.object = Some(obj);
                    true
                }
                (Err(e), _) => {
                    tracing::error!(url = url, error = %e, "Failed to bind to directory object");
                    false
                }
                (Ok(()), None) => {
                    tracing::error!(url = url, "IADs interface not available");
                    false
                }
            }
        }
    }

    fn get_attribute(&mut self, name: &str) -> AppResult<Option<String>> {
        self.read_attribute(name)
    }

    fn set_attribute(&mut self, name: &str, value: &str, expected: Option<&str>) -> AppResult<bool> {
        // ADSI has no conditional modify; compare against a fresh read first.
        let current = self.read_attribute(name)?;
        if current.as_deref() != expected {
            tracing::warn!(
                attribute = name,
                expected = ?expected,
                current = ?current,
                "Attribute changed since it was read"
            );
            return Ok(false);
        }

        let obj = self.bound_object()?;
        unsafe {
            let prop_name = BSTR::from(name);
            let variant = if is_integer_attribute(name) {
                // Stored signed; versions above i32::MAX wrap as the directory does.
                let n = value.parse::<u32>().map_err(|_| {
                    AppError::InvalidArgument(format!("{} value '{}' is not a number", name, value))
                })?;
                VARIANT::from(n as i32)
            } else {
                VARIANT::from(BSTR::from(value))
            };

            obj.Put(&prop_name, &variant)
                .map_err(|e| AppError::DirectoryError(format!("Failed to set {}: {}", name, e)))?;

            obj.SetInfo().map_err(|e| {
                if e.code() == E_ACCESSDENIED {
                    AppError::PermissionDenied(format!("Not allowed to write {}: {}", name, e))
                } else {
                    AppError::DirectoryError(format!("Failed to commit {}: {}", name, e))
                }
            })?;
        }

        Ok(true)
    }

    fn disconnect(&mut self) {
        self.object = None;
    }
}

/// Non-Windows fallback - ADSI is unavailable
#[cfg(not(windows))]
impl DirectorySession for AdsiDirectory {
    fn connect(&mut self, url: &str) -> bool {
        tracing::error!(
            url = url,
            ssl = self.use_ssl,
            explicit_credentials = self.username.is_some() && self.password.is_some(),
            "ADSI directory access requires Windows"
        );
        false
    }

    fn get_attribute(&mut self, _name: &str) -> AppResult<Option<String>> {
        Err(AppError::ConnectionFailed("ADSI requires Windows".to_string()))
    }

    fn set_attribute(&mut self, _name: &str, _value: &str, _expected: Option<&str>) -> AppResult<bool> {
        Err(AppError::ConnectionFailed("ADSI requires Windows".to_string()))
    }

    fn disconnect(&mut self) {}
}

#[cfg(windows)]
impl Drop for AdsiDirectory {
    fn drop(&mut self) {
        self.object = None;
        if self.com_initialized {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Convert VARIANT to String
#[cfg(windows)]
fn variant_to_string(var: &VARIANT) -> AppResult<String> {
    let vt = var.vt();

    if vt == VT_BSTR {
        BSTR::try_from(var)
            .map(|b| b.to_string())
            .map_err(|e| AppError::DirectoryError(format!("Invalid string value: {}", e)))
    } else if vt == VT_I4 {
        i32::try_from(var)
            .map(|n| n.to_string())
            .map_err(|e| AppError::DirectoryError(format!("Invalid integer value: {}", e)))
    } else if vt == VT_EMPTY {
        Ok(String::new())
    } else {
        Err(AppError::WindowsError(format!(
            "Unsupported VARIANT type {}",
            vt.0
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_version_is_written_as_integer() {
        assert!(is_integer_attribute("versionNumber"));
        assert!(is_integer_attribute("VersionNumber"));
        assert!(!is_integer_attribute("gPCMachineExtensionNames"));
        assert!(!is_integer_attribute("displayName"));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_adsi_unavailable_off_windows() {
        let mut dir = AdsiDirectory::new(None, None, false);
        assert!(!dir.connect("LDAP://CN=x"));
        assert!(matches!(
            dir.get_attribute("versionNumber"),
            Err(AppError::ConnectionFailed(_))
        ));
    }
}
