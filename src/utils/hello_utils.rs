#![forbid(unsafe_code)]

use path_absolutize::Absolutize;
use std::ops::Deref;
use std::path::Path;

use poem::Request;

use anyhow::{Result, anyhow};
use log::{debug, LevelFilter};

use crate::utils::errors::Errors;

// First codepoint a name may not contain.  DEL and everything above it are
// rejected.
const MAX_NAME_CHAR: char = '\u{7F}';

// ***************************************************************************
// GENERAL PUBLIC FUNCTIONS
// ***************************************************************************
// ---------------------------------------------------------------------------
// get_absolute_path:
// ---------------------------------------------------------------------------
/** Replace tilde (~) and environment variable values in a path name and
 * then construct the absolute path name.  The difference between 
 * absolutize and standard canonicalize methods is that absolutize does not 
 * care about whether the file exists and what the file really is.
 */
pub fn get_absolute_path(path: &str) -> String {
    // Replace ~ and environment variable values if possible.
    // On error, return the string version of the original path.
    let s = match shellexpand::full(path) {
        Ok(x) => x,
        Err(_) => return path.to_owned(),
    };

    // Convert to absolute path if necessary.
    // Return original input on error.
    let p = Path::new(s.deref());
    let p1 = match p.absolutize() {
        Ok(x) => x,
        Err(_) => return path.to_owned(),
    };
    let p2 = match p1.to_str() {
        Some(x) => x,
        None => return path.to_owned(),
    };

    p2.to_owned()
}

// ---------------------------------------------------------------------------
// validate_name:
// ---------------------------------------------------------------------------
/** Names are restricted to ASCII codepoints below DEL.  The error carries the
 * offending name.
 */
pub fn validate_name(name: &str) -> Result<()> {
    if name.chars().any(|c| c >= MAX_NAME_CHAR) {
        return Err(anyhow!(Errors::InvalidName(name.to_string())));
    }
    Ok(())
}

// ***************************************************************************
//                                  Traits
// ***************************************************************************
pub trait RequestDebug {
    type Req;
    fn get_request_info(&self) -> String;
}

// ---------------------------------------------------------------------------
// debug_request:
// ---------------------------------------------------------------------------
// Dump http request information to the log.
pub fn debug_request(http_req: &Request, req: &impl RequestDebug) {
    // Check that debug or higher logging is in effect.
    let level = log::max_level();
    if level < LevelFilter::Debug {
        return;
    }
    
    // Accumulate the output.
    let mut s = "\n".to_string();

    // Restate the URI.
    let uri = http_req.uri();
    s += format!("  URI: {:?}\n", uri).as_str();

    // Accumulate the headers
    for (k, v) in http_req.headers().iter() {
         s += format!("  Header: {} = {:?} \n", k, v).as_str();
    };

    // Add the request's information.
    s += req.get_request_info().as_str();

    // Write the single log record.
    debug!("{}", s);
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::{get_absolute_path, validate_name};

    #[test]
    fn ascii_names_are_valid() {
        assert!(validate_name("world").is_ok());
        assert!(validate_name("Bob-42_x.y~").is_ok());
        assert!(validate_name("").is_ok());
    }

    #[test]
    fn non_ascii_names_are_rejected() {
        assert!(validate_name("wörld").is_err());
        assert!(validate_name("日本").is_err());
        assert!(validate_name("abc\u{7F}").is_err());
        assert!(validate_name("abc\u{7E}").is_ok());
    }

    #[test]
    fn absolute_paths_stay_put() {
        assert_eq!(get_absolute_path("/etc/hello.toml"), "/etc/hello.toml");
        assert!(get_absolute_path("hello.toml").starts_with('/'));
    }
}
