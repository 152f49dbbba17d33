//! DC-09 extra-data block: `[X<lon>][Y<lat>][M<mac>][V<verification>]`.
//!
//! The original never returned this string from its builder function — a
//! defect, since the caller then had no way to append it. This version
//! returns the built string, empty if no extra fields are set.

use super::params::MessageParams;

pub fn dc09_extra(params: &MessageParams) -> String {
    let mut extra = String::new();
    if let Some(lon) = &params.lon {
        extra.push_str(&format!("[X{lon}]"));
    }
    if let Some(lat) = &params.lat {
        extra.push_str(&format!("[Y{lat}]"));
    }
    if let Some(mac) = &params.mac {
        extra.push_str(&format!("[M{mac}]"));
    }
    if let Some(verification) = &params.verification {
        extra.push_str(&format!("[V{verification}]"));
    }
    extra
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_when_no_fields_set() {
        assert_eq!(dc09_extra(&MessageParams::new()), "");
    }

    #[test]
    fn builds_all_four_fields_in_order() {
        let mut p = MessageParams::new();
        p.lon = Some("52.21".into());
        p.lat = Some("5.9699".into());
        p.mac = Some("00:11:22:33:44:55".into());
        p.verification = Some("https://cam.example/1".into());
        assert_eq!(
            dc09_extra(&p),
            "[X52.21][Y5.9699][M00:11:22:33:44:55][Vhttps://cam.example/1]"
        );
    }
}
