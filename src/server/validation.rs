use crate::error::{Error, Result};
use crate::module::version::parse_version;

const MAX_NAME_LEN: usize = 64;

fn is_valid_name_char(c: char, allow_underscore: bool) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || (allow_underscore && c == '_')
}

fn validate_name(name: &str, entity: &str, allow_underscore: bool) -> Result<()> {
    if name.is_empty() {
        return Err(Error::bad_request(format!("{entity} name cannot be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::bad_request(format!(
            "{entity} name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name.chars().all(|c| is_valid_name_char(c, allow_underscore)) {
        let allowed = if allow_underscore {
            "alphanumeric characters, hyphens, and underscores"
        } else {
            "alphanumeric characters and hyphens"
        };
        return Err(Error::bad_request(format!("{entity} name can only contain {allowed}")));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric())
        || !name.ends_with(|c: char| c.is_ascii_alphanumeric())
    {
        return Err(Error::bad_request(format!(
            "{entity} name must start and end with an alphanumeric character"
        )));
    }
    Ok(())
}

/// `__` separates an analytics token from the namespace in download URLs.
pub fn validate_namespace_name(name: &str) -> Result<()> {
    validate_name(name, "Namespace", true)?;
    if name.contains("__") {
        return Err(Error::bad_request(
            "Namespace name cannot contain a double underscore",
        ));
    }
    Ok(())
}

pub fn validate_module_name(name: &str) -> Result<()> {
    validate_name(name, "Module", true)
}

pub fn validate_provider_name(name: &str) -> Result<()> {
    validate_name(name, "Provider", false)?;
    if name.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(Error::bad_request("Provider name must be lower case"));
    }
    Ok(())
}

pub fn validate_version(version: &str) -> Result<()> {
    parse_version(version).map(|_| ())
}

/// Platform components of provider binaries: lower-case alphanumerics.
pub fn validate_platform(os: &str, arch: &str) -> Result<()> {
    let valid = |s: &str| {
        !s.is_empty() && s.len() <= 32 && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    };
    if valid(os) && valid(arch) {
        Ok(())
    } else {
        Err(Error::bad_request(format!("Invalid platform {os}/{arch}")))
    }
}

/// Provider binary filenames are stored verbatim as a path component.
pub fn validate_filename(filename: &str) -> Result<()> {
    let valid = !filename.is_empty()
        && filename.len() <= 255
        && !filename.starts_with('.')
        && filename
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::bad_request(format!("Invalid filename '{filename}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_names() {
        assert!(validate_namespace_name("acme").is_ok());
        assert!(validate_namespace_name("acme_corp-1").is_ok());
        assert!(validate_namespace_name("acme__corp").is_err());
        assert!(validate_namespace_name("-acme").is_err());
        assert!(validate_namespace_name("ac me").is_err());
        assert!(validate_namespace_name("").is_err());
    }

    #[test]
    fn test_provider_names() {
        assert!(validate_provider_name("aws").is_ok());
        assert!(validate_provider_name("AWS").is_err());
        assert!(validate_provider_name("my_cloud").is_err());
    }

    #[test]
    fn test_versions() {
        assert!(validate_version("1.0.0").is_ok());
        assert!(validate_version("1.0.0-beta.1").is_ok());
        assert!(matches!(validate_version("1.0"), Err(Error::InvalidVersion(_))));
    }

    #[test]
    fn test_platform_and_filename() {
        assert!(validate_platform("linux", "amd64").is_ok());
        assert!(validate_platform("linux", "../x").is_err());
        assert!(validate_filename("terraform-provider-aws_4.0.0_linux_amd64.zip").is_ok());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename(".hidden").is_err());
    }
}
