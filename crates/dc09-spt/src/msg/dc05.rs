//! Ademco Contact ID (SIA DC-05) numeric event encoder.

use super::params::{dc05_is_user_code, MessageParams};
use crate::error::{Error, Result};

fn pad_left(value: &str, width: usize) -> String {
    if value.len() >= width {
        value.to_string()
    } else {
        format!("{}{}", "0".repeat(width - value.len()), value)
    }
}

/// Builds a DC-05 payload: `#<account>|<Q><CCC> <AA> <ZZZ>]`, or with the
/// user number in place of zone for user-class codes.
pub fn dc05_event(spt_account: Option<&str>, params: &MessageParams) -> Result<String> {
    params.validate()?;

    let account = params.account.as_deref().or(spt_account);
    let mut msg = match account {
        None => "#0000|".to_string(),
        Some(a) => format!("#{a}|"),
    };

    let code = params.code.as_deref().unwrap_or("602");
    if code.len() != 3 {
        return Err(Error::Encoding("code should be 3 positions".into()));
    }

    let q = params.q.as_deref().unwrap_or("1");
    if q != "1" && q != "3" && q != "6" {
        return Err(Error::Encoding("qualifier q should be 1, 3 or 6".into()));
    }

    let area = params.area.as_deref().unwrap_or("00");
    let area = pad_left(area, 2);

    if dc05_is_user_code(code) {
        if let Some(user) = &params.user {
            let user = pad_left(user, 3);
            msg.push_str(q);
            msg.push_str(code);
            msg.push(' ');
            msg.push_str(&area);
            msg.push(' ');
            msg.push_str(&user);
            msg.push(']');
            return Ok(msg);
        }
    }

    let zone = params.zone.as_deref().unwrap_or("000");
    let zone = pad_left(zone, 3);
    msg.push_str(q);
    msg.push_str(code);
    msg.push(' ');
    msg.push_str(&area);
    msg.push(' ');
    msg.push_str(&zone);
    msg.push(']');
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fields() {
        let p = MessageParams::new();
        let msg = dc05_event(Some("1234"), &p).unwrap();
        assert_eq!(msg, "#1234|1602 00 000]");
    }

    #[test]
    fn zone_is_zero_padded() {
        let mut p = MessageParams::new();
        p.zone = Some("14".into());
        let msg = dc05_event(Some("1234"), &p).unwrap();
        assert_eq!(msg, "#1234|1602 00 014]");
    }

    #[test]
    fn user_class_code_prefers_user_over_zone() {
        let mut p = MessageParams::new();
        p.code = Some("400".into());
        p.user = Some("7".into());
        p.zone = Some("14".into());
        let msg = dc05_event(Some("1234"), &p).unwrap();
        assert_eq!(msg, "#1234|1400 00 007]");
    }

    #[test]
    fn rejects_bad_qualifier() {
        let mut p = MessageParams::new();
        p.q = Some("4".into());
        assert!(dc05_event(Some("1234"), &p).is_err());
    }

    #[test]
    fn qualifier_six_is_accepted() {
        let mut p = MessageParams::new();
        p.q = Some("6".into());
        assert!(dc05_event(Some("1234"), &p).is_ok());
    }

    #[test]
    fn rejects_wrong_length_code() {
        let mut p = MessageParams::new();
        p.code = Some("42".into());
        assert!(dc05_event(Some("1234"), &p).is_err());
    }
}
