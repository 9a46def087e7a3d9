//! Component D: name validators for object paths, interface names,
//! member names, error names and bus names.
//!
//! Grounded on rustbus's `params::validation::{validate_object_path,
//! validate_interface, validate_errorname, validate_busname}`,
//! retargeted to return the precise `ValidationError`
//! variants each caller needs (a bad DESTINATION and a bad SENDER are
//! both bus-name failures but surface as different codes) and to add
//! the member-name rule as its own function rather than reusing
//! `validate_interface`'s length-3 shortcut, since member names are
//! single-component and interface names require at least two.

use crate::error::ValidationError as VErr;

const MAX_NAME_LEN: usize = 255;

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `/foo/bar`-style object path.
pub fn validate_path(path: &str) -> Result<(), VErr> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(VErr::BadPath);
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(VErr::BadPath);
    }
    for component in path[1..].split('/') {
        if component.is_empty() {
            return Err(VErr::BadPath);
        }
        if !component.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(VErr::BadPath);
        }
    }
    Ok(())
}

/// Shared structure for interface and error names: `a.b.c`, each
/// component `[A-Za-z_][A-Za-z0-9_]*`, at least two components, total
/// length capped at 255.
fn validate_dotted(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    if !name.contains('.') {
        return false;
    }
    let mut n = 0;
    for component in name.split('.') {
        n += 1;
        if component.is_empty() {
            return false;
        }
        let mut chars = component.chars();
        let first = chars.next().unwrap();
        if !is_name_start(first) {
            return false;
        }
        if !chars.all(is_name_char) {
            return false;
        }
    }
    n >= 2
}

pub fn validate_interface(name: &str) -> Result<(), VErr> {
    if validate_dotted(name) {
        Ok(())
    } else {
        Err(VErr::BadInterface)
    }
}

pub fn validate_error_name(name: &str) -> Result<(), VErr> {
    if validate_dotted(name) {
        Ok(())
    } else {
        Err(VErr::BadErrorName)
    }
}

/// Single-component member name: `[A-Za-z_][A-Za-z0-9_]*`, length
/// capped at 255.
pub fn validate_member(name: &str) -> Result<(), VErr> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('.') {
        return Err(VErr::BadMember);
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !is_name_start(first) || !chars.all(is_name_char) {
        return Err(VErr::BadMember);
    }
    Ok(())
}

/// Either a well-known bus name (same grammar as interface) or a
/// unique name: `:` followed by two or more `-`/`_`/alphanumeric
/// components separated by `.`.
fn validate_bus_name_generic(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    if let Some(rest) = name.strip_prefix(':') {
        if !rest.contains('.') {
            return false;
        }
        let mut n = 0;
        for component in rest.split('.') {
            n += 1;
            if component.is_empty() {
                return false;
            }
            if !component
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return false;
            }
        }
        n >= 2
    } else {
        validate_dotted(name)
    }
}

pub fn validate_destination(name: &str) -> Result<(), VErr> {
    if validate_bus_name_generic(name) {
        Ok(())
    } else {
        Err(VErr::BadDestination)
    }
}

pub fn validate_sender(name: &str) -> Result<(), VErr> {
    if validate_bus_name_generic(name) {
        Ok(())
    } else {
        Err(VErr::BadSender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/foo/bar").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("foo").is_err());
        assert!(validate_path("/foo/").is_err());
        assert!(validate_path("/foo//bar").is_err());
        assert!(validate_path("/foo.bar").is_err());
    }

    #[test]
    fn interfaces() {
        assert!(validate_interface("org.Foo").is_ok());
        assert!(validate_interface("org.Foo.Bar").is_ok());
        assert!(validate_interface("Foo").is_err());
        assert!(validate_interface(".Foo").is_err());
        assert!(validate_interface("org.1Foo").is_err());
        assert!(validate_interface("org.").is_err());
    }

    #[test]
    fn members() {
        assert!(validate_member("Bar").is_ok());
        assert!(validate_member("_bar9").is_ok());
        assert!(validate_member("9bar").is_err());
        assert!(validate_member("bar.baz").is_err());
        assert!(validate_member("").is_err());
    }

    #[test]
    fn bus_names() {
        assert!(validate_destination("org.example.Svc").is_ok());
        assert!(validate_destination(":1.42").is_ok());
        assert!(validate_destination(":1").is_err());
        assert!(validate_destination("org").is_err());
    }
}
