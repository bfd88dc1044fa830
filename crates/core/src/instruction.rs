//! Instructions: the wire projection of an executable link.

use serde::{Deserialize, Serialize};

use crate::encoding::encode_string;
use crate::link::Link;

/// Derived from a link each time instructions are computed; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: String,
    pub sleep: u32,
    /// Base64 of the rendered command.
    pub command: String,
    pub executor: String,
    pub timeout: u64,
    pub payloads: Vec<String>,
    pub uploads: Vec<String>,
    pub deadman: bool,
    pub delete_payload: bool,
}

impl Instruction {
    /// Project a link. Cleanup links carry no payloads or uploads.
    pub fn from_link(link: &Link) -> Self {
        let (payloads, uploads) = if link.cleanup {
            (Vec::new(), Vec::new())
        } else {
            (link.executor.payloads.clone(), link.executor.uploads.clone())
        };
        Self {
            id: link.id.clone(),
            sleep: link.jitter,
            command: encode_string(&link.command),
            executor: link.executor.name.clone(),
            timeout: link.executor.timeout,
            payloads,
            uploads,
            deadman: link.deadman,
            delete_payload: link.ability.delete_payload,
        }
    }

    /// The independently encoded body that goes inside the envelope's
    /// instruction list.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Encode an instruction list the way agents expect it: a JSON array of
/// JSON-encoded instruction strings, itself rendered to a string.
pub fn encode_instruction_list(instructions: &[Instruction]) -> Result<String, serde_json::Error> {
    let bodies = instructions
        .iter()
        .map(Instruction::to_wire)
        .collect::<Result<Vec<_>, _>>()?;
    serde_json::to_string(&bodies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::{Ability, Executor};
    use crate::encoding::decode_bytes;

    fn link(cleanup: bool) -> Link {
        let executor = Executor {
            name: "sh".into(),
            platform: "linux".into(),
            command: "id".into(),
            timeout: 30,
            payloads: vec!["tool.sh".into()],
            uploads: vec!["loot.txt".into()],
            cleanup: vec![],
            parsers: vec![],
        };
        let ability = Ability {
            ability_id: "a1".into(),
            name: "id".into(),
            tactic: String::new(),
            technique: String::new(),
            executors: vec![executor.clone()],
            delete_payload: true,
            visibility: 50,
        };
        let mut link = Link::new("paw1", ability, executor, "id -a".into());
        link.cleanup = cleanup;
        link.jitter = 3;
        link
    }

    #[test]
    fn projects_link_fields() {
        let instruction = Instruction::from_link(&link(false));
        assert_eq!(decode_bytes(&instruction.command).unwrap(), "id -a");
        assert_eq!(instruction.executor, "sh");
        assert_eq!(instruction.timeout, 30);
        assert_eq!(instruction.sleep, 3);
        assert_eq!(instruction.payloads, vec!["tool.sh".to_string()]);
        assert!(instruction.delete_payload);
    }

    #[test]
    fn cleanup_links_suppress_payloads() {
        let instruction = Instruction::from_link(&link(true));
        assert!(instruction.payloads.is_empty());
        assert!(instruction.uploads.is_empty());
    }

    #[test]
    fn instruction_list_is_double_encoded() {
        let instruction = Instruction::from_link(&link(false));
        let encoded = encode_instruction_list(std::slice::from_ref(&instruction)).unwrap();

        let outer: Vec<String> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(outer.len(), 1);
        let inner: Instruction = serde_json::from_str(&outer[0]).unwrap();
        assert_eq!(inner, instruction);
    }
}
