//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Concrete byte-stream transceivers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Link backends: a live serial line and two recorded sources.

mod archive;
mod pcap;
mod serial;

pub use archive::{ArchiveOpts, ArchiveTransceiver};
pub use pcap::{PcapOpts, PcapTransceiver, TransportProtocol};
pub use serial::SerialTransceiver;
