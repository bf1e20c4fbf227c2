//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Topic table listing and tag prefix check."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{bail, Result};
use iris_gds_ipc::topics::prefix_conflicts;
use iris_gds_ipc::{TopicDefinition, TOPICS};

pub fn run() -> Result<()> {
    print!("{}", render(&TOPICS));
    check(&TOPICS)?;
    println!("tags are prefix-free");
    Ok(())
}

fn render(defs: &[TopicDefinition]) -> String {
    let mut out = format!("{:<14} {:<4} {:<24} DESCRIPTION\n", "TOPIC", "TAG", "MESSAGE");
    for def in defs {
        out.push_str(&format!(
            "{:<14} {:<4} {:<24} {}\n",
            def.topic.to_string(),
            String::from_utf8_lossy(def.tag),
            def.kind.to_string(),
            def.description
        ));
    }
    out
}

fn check(defs: &[TopicDefinition]) -> Result<()> {
    let conflicts = prefix_conflicts(defs);
    if let Some((short, long)) = conflicts.first() {
        bail!(
            "{} topic tag conflicts, first: tag of {short} is a prefix of the tag of {long}",
            conflicts.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_gds_ipc::messages::MessageKind;
    use iris_gds_ipc::Topic;

    #[test]
    fn the_registered_table_is_prefix_free() {
        check(&TOPICS).expect("registered tags");
        let table = render(&TOPICS);
        assert_eq!(table.lines().count(), TOPICS.len() + 1);
        assert!(table.contains("DP"));
    }

    #[test]
    fn a_prefix_tag_is_reported() {
        let mut defs = TOPICS.to_vec();
        defs.push(TopicDefinition {
            topic: Topic::AppControl,
            tag: b"D",
            kind: MessageKind::AppControl,
            description: "clashes with every D tag",
        });
        assert!(check(&defs).is_err());
    }
}
