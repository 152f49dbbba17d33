//! SIA DC-03 alphanumeric event language encoder.

use super::params::{code_class_dc03, CodeClass, MessageParams};
use crate::error::Result;
use tracing::warn;

/// Builds a DC-03 payload: `#<account>|N[ri<area>][id<user>][ti<time>]<code><subject>[|A<text>]`.
///
/// Free-text messages (`code` absent or `"A"`, with `text` set) take the
/// short form `#<account>|A<text>` instead.
pub fn dc03_event(spt_account: Option<&str>, params: &MessageParams) -> Result<String> {
    params.validate()?;

    let account = params.account.as_deref().or(spt_account);
    let mut msg = match account {
        None => "#0000|".to_string(),
        Some(a) => format!("#{a}|"),
    };

    let code = params.code.as_deref();
    let text = params.text.as_deref();

    if (code.is_none() || code == Some("A")) && text.is_some() {
        msg.push('A');
        msg.push_str(text.unwrap());
        if params.zone.is_some() || params.area.is_some() || params.user.is_some() {
            warn!("text message can not contain zone, area or user ids");
        }
        return Ok(msg + "]");
    }

    let code = code.unwrap_or("RP");
    msg.push('N');

    let class = code_class_dc03(code);

    if let Some(area) = &params.area {
        if class != CodeClass::Area {
            msg.push_str("ri");
            msg.push_str(area);
            if let Some(areaname) = &params.areaname {
                msg.push('^');
                msg.push_str(areaname);
                msg.push('^');
            }
        }
    }
    if let Some(user) = &params.user {
        if class != CodeClass::User {
            msg.push_str("id");
            msg.push_str(user);
            if let Some(username) = &params.username {
                msg.push('^');
                msg.push_str(username);
                msg.push('^');
            }
        }
    }
    if let Some(time) = &params.time {
        msg.push_str("ti");
        if time == "now" {
            msg.push_str(&chrono::Local::now().format("%H:%M:%S").to_string());
        } else {
            msg.push_str(time);
        }
    }
    msg.push_str(code);

    match class {
        CodeClass::User => {
            if let Some(user) = &params.user {
                msg.push_str(user);
            }
            if let Some(zone) = &params.zone {
                warn!("zone {zone} not included in message because code {code} is user related");
            }
        }
        CodeClass::Area => {
            if let Some(area) = &params.area {
                msg.push_str(area);
            }
            if let Some(zone) = &params.zone {
                warn!("zone {zone} not included in message because code {code} is area related");
            }
        }
        CodeClass::Door => {
            if let Some(door) = &params.door {
                msg.push_str(door);
            }
            if let Some(zone) = &params.zone {
                warn!("zone {zone} not included in message because code {code} is door related");
            }
        }
        CodeClass::Zone => {
            if let Some(zone) = &params.zone {
                msg.push_str(zone);
                if let Some(zonename) = &params.zonename {
                    msg.push('^');
                    msg.push_str(zonename);
                    msg.push('^');
                }
            }
        }
    }

    if let Some(text) = text {
        if params.flavor.as_deref() == Some("xsia") {
            msg.push_str(&format!("*\"{text}\"NM"));
        } else {
            msg.push_str("|A");
            msg.push_str(text);
        }
    }

    Ok(msg + "]")
}
