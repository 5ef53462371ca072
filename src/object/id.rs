use crate::storage::page::{ObjectHeader, PageId, VolumeId};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of an object: where it lives plus the uniquifier stamped on its
/// slot when it was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub volume: VolumeId,
    pub page_id: PageId,
    pub slot: u16,
    pub unique: u32,
}

impl ObjectId {
    pub fn new(volume: VolumeId, page_id: PageId, slot: u16, unique: u32) -> Self {
        Self {
            volume,
            page_id,
            slot,
            unique,
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.volume.0, self.page_id.0, self.slot, self.unique
        )
    }
}

impl FromStr for ObjectId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            return Err(anyhow!(
                "Object id must look like volume:page:slot:unique, got {:?}",
                s
            ));
        }
        Ok(Self {
            volume: VolumeId(parts[0].parse()?),
            page_id: PageId(parts[1].parse()?),
            slot: parts[2].parse()?,
            unique: parts[3].parse()?,
        })
    }
}

/// An object read back from its page.
#[derive(Debug, Clone)]
pub struct Object {
    pub id: ObjectId,
    pub header: ObjectHeader,
    pub data: Vec<u8>,
}

impl Object {
    pub fn new(id: ObjectId, header: ObjectHeader, data: Vec<u8>) -> Self {
        Self { id, header, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_equality() {
        let a = ObjectId::new(VolumeId(1), PageId(3), 2, 10);
        let b = ObjectId::new(VolumeId(1), PageId(3), 2, 10);
        let reused = ObjectId::new(VolumeId(1), PageId(3), 2, 11);

        assert_eq!(a, b);
        assert_ne!(a, reused);
    }

    #[test]
    fn test_object_id_text_form() -> Result<()> {
        let oid = ObjectId::new(VolumeId(1), PageId(42), 7, 1234);
        assert_eq!(oid.to_string(), "1:42:7:1234");
        assert_eq!("1:42:7:1234".parse::<ObjectId>()?, oid);

        assert!("1:42:7".parse::<ObjectId>().is_err());
        assert!("1:x:7:1".parse::<ObjectId>().is_err());
        Ok(())
    }
}
