//! Typed, constructor-validated replacement for the free-form parameter map
//! the original message builders took. Validation happens once, here,
//! instead of being re-checked deep inside each encoder.

use crate::error::{Error, Result};

/// Characters disallowed in SIA text/name fields: the protocol's own
/// delimiters plus non-printable bytes.
fn is_disallowed(c: char) -> bool {
    !(' '..='~').contains(&c) || matches!(c, '[' | ']' | '|' | '^' | '/')
}

fn check_text(field: &str, value: &str) -> Result<()> {
    if let Some(bad) = value.chars().find(|c| is_disallowed(*c)) {
        return Err(Error::Encoding(format!(
            "{field} contains disallowed character {bad:?}"
        )));
    }
    Ok(())
}

fn check_numeric(field: &str, value: &str) -> Result<()> {
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Encoding(format!("{field} is not numeric: {value:?}")));
    }
    Ok(())
}

/// Emission type for a message, overridable by the caller; otherwise
/// inferred from the code's length by the poller's state-change logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    SiaDcs,
    AdmCid,
    Null,
}

impl EventType {
    pub fn as_dc09_type(self) -> &'static str {
        match self {
            EventType::SiaDcs => "SIA-DCS",
            EventType::AdmCid => "ADM-CID",
            EventType::Null => "NULL",
        }
    }
}

/// Validated parameters for one event. Construct with [`MessageParams::new`]
/// and field assignment, then call [`MessageParams::validate`] before handing
/// it to an encoder (the DC-03/DC-05 encoders call it internally already).
#[derive(Debug, Clone, Default)]
pub struct MessageParams {
    pub account: Option<String>,
    pub area: Option<String>,
    pub areaname: Option<String>,
    pub zone: Option<String>,
    pub zonename: Option<String>,
    pub user: Option<String>,
    pub username: Option<String>,
    /// Door number, consulted only when the DC-03 code is door-class.
    pub door: Option<String>,
    pub code: Option<String>,
    /// DC-05 qualifier: "1" (new alarm), "3" (new restore) or "6" (old alarm).
    pub q: Option<String>,
    pub text: Option<String>,
    pub time: Option<String>,
    pub flavor: Option<String>,
    pub lon: Option<String>,
    pub lat: Option<String>,
    pub mac: Option<String>,
    pub verification: Option<String>,
    pub r#type: Option<EventType>,
    /// Routine-only: seconds between emissions.
    pub interval: Option<i64>,
    /// Routine-only: seconds into the UTC day for the first emission.
    pub start: Option<i64>,
}

impl MessageParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates numeric fields and text-field character sets. Encoders call
    /// this, but callers assembling a [`MessageParams`] by hand may call it
    /// early to fail fast.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("area", &self.area), ("zone", &self.zone), ("user", &self.user)] {
            if let Some(v) = value {
                check_numeric(name, v)?;
            }
        }
        for (name, value) in [
            ("areaname", &self.areaname),
            ("zonename", &self.zonename),
            ("username", &self.username),
            ("text", &self.text),
        ] {
            if let Some(v) = value {
                check_text(name, v)?;
            }
        }
        Ok(())
    }
}

/// Which field, if any, a DC-03/DC-05 event code places its subject number in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeClass {
    User,
    Area,
    Door,
    Zone,
}

/// DC-03 codes carrying the user number (no way to carry a zone alongside).
const DC03_USER_CODES: &[&str] = &[
    "BC", "CE", "CF", "CJ", "CK", "CL", "CP", "CQ", "CR", "DA", "DB", "EE", "JD", "JH", "JK", "JP",
    "JS", "JT", "JV", "JX", "JY", "JZ", "OC", "OH", "OJ", "OK", "OL", "OP", "OQ", "OR", "OT", "RX",
];

/// DC-03 codes carrying the area number.
const DC03_AREA_CODES: &[&str] = &[
    "BA", "CA", "CD", "CG", "CI", "CT", "CW", "FI", "FK", "JA", "JR", "NF", "NL", "NM", "OA", "OG",
    "OI",
];

/// DC-03 codes carrying a door number.
const DC03_DOOR_CODES: &[&str] = &[
    "DC", "DD", "DE", "DF", "DG", "DH", "DI", "DJ", "DK", "DL", "DM", "DN", "DO", "DP", "DQ", "DR",
    "DS", "DV", "DW", "DX", "DY", "DZ",
];

/// Classifies a DC-03 event code for subject-field placement.
pub fn code_class_dc03(code: &str) -> CodeClass {
    if DC03_USER_CODES.contains(&code) {
        CodeClass::User
    } else if DC03_AREA_CODES.contains(&code) {
        CodeClass::Area
    } else if DC03_DOOR_CODES.contains(&code) {
        CodeClass::Door
    } else {
        CodeClass::Zone
    }
}

/// DC-05 (Contact-ID) 3-digit codes carrying the user number in place of zone.
const DC05_USER_CODES: &[&str] = &[
    "121", "313", "400", "401", "402", "403", "404", "405", "406", "407", "408", "409", "441",
    "442", "450", "451", "452", "453", "454", "455", "456", "457", "458", "459", "462", "463",
    "464", "466", "411", "412", "413", "414", "415", "421", "422", "424", "425", "429", "430",
    "431", "574", "604", "607", "625", "642", "652", "653",
];

pub fn dc05_is_user_code(code: &str) -> bool {
    DC05_USER_CODES.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_codes() {
        assert_eq!(code_class_dc03("BC"), CodeClass::User);
        assert_eq!(code_class_dc03("BA"), CodeClass::Area);
        assert_eq!(code_class_dc03("DC"), CodeClass::Door);
        assert_eq!(code_class_dc03("RP"), CodeClass::Zone);
    }

    #[test]
    fn rejects_non_numeric_zone() {
        let mut p = MessageParams::new();
        p.zone = Some("abc".into());
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_delimiter_in_text() {
        let mut p = MessageParams::new();
        p.text = Some("bad[text]".into());
        assert!(p.validate().is_err());
    }

    #[test]
    fn accepts_plain_values() {
        let mut p = MessageParams::new();
        p.zone = Some("14".into());
        p.text = Some("Front door open".into());
        assert!(p.validate().is_ok());
    }
}
