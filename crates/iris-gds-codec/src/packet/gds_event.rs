//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "GdsPackets events for packet classes that are events by arriving."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use indexmap::IndexMap;
use iris_gds_catalog::prebuilt::GDS_PACKETS_MODULE;
use iris_gds_catalog::DataStandards;

use crate::payload::EventPayload;
use crate::primitive::Value;

/// Longest message a `GdsPackets` event carries, in bytes.
pub const GDS_EVENT_MSG_MAX: usize = 10_000;

/// `GdsPackets_{class_name}` event carrying `msg`, truncated on a char
/// boundary to [`GDS_EVENT_MSG_MAX`] bytes. `None` when the catalog was
/// built without prebuilt modules.
pub fn gds_packet_event(standards: &DataStandards, class_name: &str, msg: &str) -> Option<EventPayload> {
    let qualified = format!("{GDS_PACKETS_MODULE}_{class_name}");
    let (module, event) = standards.find_event(&qualified)?;
    let mut cut = msg.len().min(GDS_EVENT_MSG_MAX);
    while !msg.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut args = IndexMap::with_capacity(1);
    args.insert("msg".to_owned(), Value::Text(msg[..cut].to_owned()));
    Some(EventPayload::new(module.id, event.id, args, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_gds_catalog::fixtures;

    #[test]
    fn long_messages_are_cut_on_a_char_boundary() {
        let standards = fixtures::standards();
        let msg = format!("{}é", "a".repeat(GDS_EVENT_MSG_MAX - 1));
        let event = gds_packet_event(&standards, "WatchdogHelloPacket", &msg).expect("event");
        let text = event.args["msg"].as_str().expect("text");
        assert_eq!(text.len(), GDS_EVENT_MSG_MAX - 1);
        assert_eq!(event.formatted_string(&standards), text);
    }

    #[test]
    fn unknown_classes_have_no_event() {
        let standards = fixtures::standards();
        assert!(gds_packet_event(&standards, "NoSuchPacket", "x").is_none());
    }
}
