//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Packing policy for uplinked payloads."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use iris_gds_codec::Payload;
use iris_gds_ipc::messages::PacketSplit;

/// Group `payloads` into per-packet lists. `Any` packs individually.
pub fn pack(payloads: Vec<Payload>, split: PacketSplit) -> Vec<Vec<Payload>> {
    if payloads.is_empty() {
        return Vec::new();
    }
    match split {
        PacketSplit::Together => vec![payloads],
        PacketSplit::Individual | PacketSplit::Any => {
            payloads.into_iter().map(|payload| vec![payload]).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_gds_codec::{TelemetryPayload, Value};

    fn payloads(n: u32) -> Vec<Payload> {
        (0..n)
            .map(|i| TelemetryPayload::new(0x4A00, 0, Value::UInt(u64::from(i)), i).into())
            .collect()
    }

    #[test]
    fn individual_and_any_keep_input_order() {
        for split in [PacketSplit::Individual, PacketSplit::Any] {
            let groups = pack(payloads(3), split);
            let stamps: Vec<_> = groups.iter().map(|g| (g.len(), g[0].timestamp())).collect();
            assert_eq!(stamps, vec![(1, Some(0)), (1, Some(1)), (1, Some(2))]);
        }
    }

    #[test]
    fn together_makes_one_group_and_nothing_makes_none() {
        assert_eq!(pack(payloads(4), PacketSplit::Together).len(), 1);
        assert!(pack(Vec::new(), PacketSplit::Together).is_empty());
    }
}
